//! Three-stage CardDAV discovery.
//!
//! 1. Depth-0 `current-user-principal` on the server URL; fall back to the
//!    server URL.
//! 2. Depth-0 `addressbook-home-set` on the principal; fall back to the
//!    principal.
//! 3. Depth-1 listing of the home; keep children whose resource type
//!    includes `addressbook`.
//!
//! A non-2xx response or a transport failure at any stage aborts discovery.
//! A 2xx response without properties counts as "absent" and the stage's
//! fallback applies.

use crate::client::{Credentials, DavClient, DavResponse, Depth};
use crate::error::{DavError, DavResult};
use crate::xml::{self, CARDDAV_NS, DAV_NS};
use reqwest::Url;
use tracing::{debug, info};

/// Name used when a collection has no display name, description or path.
pub const FALLBACK_NAME: &str = "Address Book";

/// An address book found on a server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredAddressBook {
    /// Human-readable name.
    pub name: String,
    /// Absolute collection URL.
    pub url: String,
}

/// Parses a user-supplied server URL.
///
/// A URL with no path is pointed at `/.well-known/carddav`.
///
/// # Errors
///
/// Returns [`DavError::InvalidUrl`] unless the input is an absolute
/// `http`/`https` URL with a host.
pub fn normalize_server_url(input: &str) -> DavResult<Url> {
    let url = Url::parse(input.trim())
        .map_err(|e| DavError::invalid_url(format!("{input}: {e}")))?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(DavError::invalid_url(format!(
            "{input}: expected an http or https URL"
        )));
    }
    if matches!(url.path(), "" | "/") {
        return url
            .join("/.well-known/carddav")
            .map_err(|e| DavError::invalid_url(e.to_string()));
    }
    Ok(url)
}

/// Returns `host[:port]` of a URL, used as a server's display name.
#[must_use]
pub fn server_display_name(url: &Url) -> String {
    match (url.host_str(), url.port()) {
        (Some(host), Some(port)) => format!("{host}:{port}"),
        (Some(host), None) => host.to_string(),
        (None, _) => url.to_string(),
    }
}

fn with_trailing_slash(url: &Url) -> Url {
    let mut url = url.clone();
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}

fn check(response: &DavResponse) -> DavResult<()> {
    if response.is_success() {
        Ok(())
    } else {
        Err(DavError::Status {
            status: response.status,
            url: response.url.to_string(),
        })
    }
}

fn resolve(base: &Url, href: &str) -> DavResult<Url> {
    base.join(href)
        .map_err(|e| DavError::invalid_url(format!("{href}: {e}")))
}

/// Runs a depth-0 query and resolves the named property's href.
fn find_href<C: DavClient + ?Sized>(
    client: &C,
    url: &Url,
    query: &str,
    property: (&str, &str),
    credentials: &Credentials,
) -> DavResult<Option<Url>> {
    let response = client.propfind(url, Depth::Zero, query, credentials)?;
    check(&response)?;
    if !response.has_properties() {
        return Ok(None);
    }
    let (ns, name) = property;
    xml::property_href(&response.body, ns, name)?
        .map(|href| resolve(&response.url, &href))
        .transpose()
}

fn last_segment(url: &Url) -> Option<String> {
    url.path()
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
}

/// Lists the address books below `home`.
fn list_address_books<C: DavClient + ?Sized>(
    client: &C,
    home: &Url,
    credentials: &Credentials,
) -> DavResult<Vec<DiscoveredAddressBook>> {
    let response = client.propfind(home, Depth::One, xml::COLLECTIONS_QUERY, credentials)?;
    check(&response)?;
    if !response.has_properties() {
        return Ok(Vec::new());
    }

    let mut books = Vec::new();
    for collection in xml::collections(&response.body)? {
        if !collection.is_address_book {
            continue;
        }
        let url = resolve(&response.url, &collection.href)?;
        let name = collection
            .display_name
            .or(collection.description)
            .or_else(|| last_segment(&url))
            .unwrap_or_else(|| FALLBACK_NAME.to_string());
        books.push(DiscoveredAddressBook {
            name,
            url: url.to_string(),
        });
    }
    Ok(books)
}

/// Discovers the address books reachable from `server_url`.
///
/// An empty list is a valid result: the server answered but holds no
/// address books.
///
/// # Errors
///
/// Returns the first transport, status or XML error encountered.
pub fn discover<C: DavClient + ?Sized>(
    client: &C,
    server_url: &Url,
    credentials: &Credentials,
) -> DavResult<Vec<DiscoveredAddressBook>> {
    let base = with_trailing_slash(server_url);

    let principal = find_href(
        client,
        &base,
        xml::PRINCIPAL_QUERY,
        (DAV_NS, "current-user-principal"),
        credentials,
    )?
    .unwrap_or_else(|| base.clone());
    debug!(%principal, "principal");

    let home = find_href(
        client,
        &principal,
        xml::HOME_SET_QUERY,
        (CARDDAV_NS, "addressbook-home-set"),
        credentials,
    )?
    .unwrap_or_else(|| principal.clone());
    debug!(%home, "address book home");

    let books = list_address_books(client, &home, credentials)?;
    info!(server = %server_url, count = books.len(), "discovered address books");
    Ok(books)
}
