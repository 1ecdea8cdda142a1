//! PROPFIND request bodies and multistatus parsing.

use crate::error::DavResult;
use roxmltree::{Document, Node};

/// The `DAV:` namespace.
pub const DAV_NS: &str = "DAV:";

/// The CardDAV namespace.
pub const CARDDAV_NS: &str = "urn:ietf:params:xml:ns:carddav";

pub(crate) const PRINCIPAL_QUERY: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<D:propfind xmlns:D="DAV:">
  <D:prop>
    <D:current-user-principal/>
  </D:prop>
</D:propfind>"#;

pub(crate) const HOME_SET_QUERY: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<D:propfind xmlns:D="DAV:" xmlns:C="urn:ietf:params:xml:ns:carddav">
  <D:prop>
    <C:addressbook-home-set/>
  </D:prop>
</D:propfind>"#;

pub(crate) const COLLECTIONS_QUERY: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<D:propfind xmlns:D="DAV:" xmlns:C="urn:ietf:params:xml:ns:carddav">
  <D:prop>
    <D:displayname/>
    <D:resourcetype/>
    <C:addressbook-description/>
  </D:prop>
</D:propfind>"#;

/// One `<D:response>` entry from a depth-1 listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Collection {
    /// The raw `href`, possibly relative.
    pub href: String,
    /// `displayname`, if present and non-empty.
    pub display_name: Option<String>,
    /// `addressbook-description`, if present and non-empty.
    pub description: Option<String>,
    /// Whether `resourcetype` contains `addressbook`.
    pub is_address_book: bool,
}

fn non_empty_text(node: Node<'_, '_>) -> Option<String> {
    node.text()
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(str::to_string)
}

fn first_descendant<'a, 'input>(
    node: Node<'a, 'input>,
    ns: &str,
    local: &str,
) -> Option<Node<'a, 'input>> {
    node.descendants().find(|n| n.has_tag_name((ns, local)))
}

/// Returns the first `href` inside the first `(ns, property)` element.
///
/// `Ok(None)` means the property is absent or carries no href.
pub fn property_href(body: &str, ns: &str, property: &str) -> DavResult<Option<String>> {
    let doc = Document::parse(body)?;
    Ok(doc
        .descendants()
        .filter(|n| n.has_tag_name((ns, property)))
        .find_map(|prop| first_descendant(prop, DAV_NS, "href").and_then(non_empty_text)))
}

/// Lists every response of a multistatus body.
///
/// Responses without an href are skipped.
pub fn collections(body: &str) -> DavResult<Vec<Collection>> {
    let doc = Document::parse(body)?;
    let found = doc
        .descendants()
        .filter(|n| n.has_tag_name((DAV_NS, "response")))
        .filter_map(|response| {
            let href = response
                .children()
                .find(|n| n.has_tag_name((DAV_NS, "href")))
                .and_then(non_empty_text)?;

            let is_address_book = response
                .descendants()
                .filter(|n| n.has_tag_name((DAV_NS, "resourcetype")))
                .any(|rt| first_descendant(rt, CARDDAV_NS, "addressbook").is_some());

            Some(Collection {
                href,
                display_name: first_descendant(response, DAV_NS, "displayname")
                    .and_then(non_empty_text),
                description: first_descendant(response, CARDDAV_NS, "addressbook-description")
                    .and_then(non_empty_text),
                is_address_book,
            })
        })
        .collect();
    Ok(found)
}
