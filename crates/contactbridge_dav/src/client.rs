//! PROPFIND client abstraction.
//!
//! Discovery only ever issues PROPFIND requests, so the client seam is a
//! single method. [`HttpDavClient`] is the production implementation;
//! [`crate::MockDavClient`] serves canned responses in tests.

use crate::error::{DavError, DavResult};
use reqwest::header::{CONTENT_TYPE, LOCATION};
use reqwest::{Method, Url};
use std::fmt;
use std::time::Duration;
use tracing::debug;

/// The `Depth` header of a PROPFIND request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Depth {
    /// Only the resource itself.
    Zero,
    /// The resource and its immediate children.
    One,
}

impl Depth {
    /// Returns the header value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Zero => "0",
            Self::One => "1",
        }
    }
}

/// Basic-auth credentials for a DAV server.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// User name.
    pub username: String,
    /// Password.
    pub password: String,
}

impl Credentials {
    /// Creates credentials.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Status and body of a PROPFIND response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DavResponse {
    /// URL that produced the response, after redirects.
    pub url: Url,
    /// HTTP status code.
    pub status: u16,
    /// Response body as text.
    pub body: String,
}

impl DavResponse {
    /// Creates a response.
    pub fn new(url: Url, status: u16, body: impl Into<String>) -> Self {
        Self {
            url,
            status,
            body: body.into(),
        }
    }

    /// Returns true for 200 and 207, the statuses that carry properties.
    #[must_use]
    pub const fn has_properties(&self) -> bool {
        matches!(self.status, 200 | 207)
    }

    /// Returns true for any 2xx status.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }
}

/// Something that can send PROPFIND requests.
///
/// Implementations return every HTTP response as `Ok`, whatever its status;
/// `Err` is reserved for requests that never got a response. Redirects are
/// followed with the method and body preserved, so `.well-known` lookups
/// land on the real DAV endpoint.
pub trait DavClient: Send + Sync {
    /// Sends a PROPFIND with the given depth and XML body.
    fn propfind(
        &self,
        url: &Url,
        depth: Depth,
        body: &str,
        credentials: &Credentials,
    ) -> DavResult<DavResponse>;
}

/// Maximum redirects followed for one request.
pub const MAX_REDIRECTS: usize = 5;

/// Blocking HTTP implementation of [`DavClient`].
#[derive(Debug, Clone)]
pub struct HttpDavClient {
    client: reqwest::blocking::Client,
}

impl HttpDavClient {
    /// Default request timeout.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

    /// Creates a client with the given request timeout.
    ///
    /// # Errors
    ///
    /// Returns [`DavError::Transport`] if the TLS backend cannot be set up.
    pub fn new(timeout: Duration) -> DavResult<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            // reqwest downgrades PROPFIND to GET on 301/302; follow by hand.
            .redirect(reqwest::redirect::Policy::none())
            .user_agent(concat!("contactbridge/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| DavError::transport(format!("http client: {e}")))?;
        Ok(Self { client })
    }
}

impl DavClient for HttpDavClient {
    fn propfind(
        &self,
        url: &Url,
        depth: Depth,
        body: &str,
        credentials: &Credentials,
    ) -> DavResult<DavResponse> {
        let method = Method::from_bytes(b"PROPFIND")
            .map_err(|e| DavError::transport(format!("method: {e}")))?;

        let mut url = url.clone();
        for _ in 0..=MAX_REDIRECTS {
            debug!(%url, depth = depth.as_str(), "PROPFIND");
            let response = self
                .client
                .request(method.clone(), url.clone())
                .basic_auth(&credentials.username, Some(&credentials.password))
                .header("Depth", depth.as_str())
                .header(CONTENT_TYPE, "application/xml; charset=utf-8")
                .body(body.to_string())
                .send()
                .map_err(|e| DavError::transport(format!("PROPFIND {url} failed: {e}")))?;

            let status = response.status();
            if status.is_redirection() {
                if let Some(next) = redirect_target(&url, response.headers().get(LOCATION))? {
                    debug!(from = %url, to = %next, status = status.as_u16(), "following redirect");
                    url = next;
                    continue;
                }
            }

            let body = response
                .text()
                .map_err(|e| DavError::transport(format!("read body: {e}")))?;
            debug!(%url, status = status.as_u16(), bytes = body.len(), "PROPFIND response");
            return Ok(DavResponse::new(url, status.as_u16(), body));
        }
        Err(DavError::transport(format!("too many redirects from {url}")))
    }
}

fn redirect_target(
    base: &Url,
    location: Option<&reqwest::header::HeaderValue>,
) -> DavResult<Option<Url>> {
    let Some(location) = location else {
        return Ok(None);
    };
    let location = location
        .to_str()
        .map_err(|e| DavError::invalid_url(format!("redirect location: {e}")))?;
    base.join(location)
        .map(Some)
        .map_err(|e| DavError::invalid_url(format!("redirect location {location}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn depth_header_values() {
        assert_eq!(Depth::Zero.as_str(), "0");
        assert_eq!(Depth::One.as_str(), "1");
    }

    fn response(status: u16) -> DavResponse {
        DavResponse::new(Url::parse("https://dav.example.com/").unwrap(), status, "")
    }

    #[test]
    fn response_status_classes() {
        assert!(response(207).has_properties());
        assert!(response(200).has_properties());
        assert!(!response(204).has_properties());
        assert!(response(204).is_success());
        assert!(!response(401).is_success());
    }

    #[test]
    fn redirect_target_resolves_relative_location() {
        let base = Url::parse("https://dav.example.com/.well-known/carddav").unwrap();
        let location = reqwest::header::HeaderValue::from_static("/remote.php/dav/");
        let next = redirect_target(&base, Some(&location)).unwrap().unwrap();
        assert_eq!(next.as_str(), "https://dav.example.com/remote.php/dav/");
        assert_eq!(redirect_target(&base, None).unwrap(), None);
    }

    #[test]
    fn credentials_debug_hides_password() {
        let creds = Credentials::new("alice", "hunter2");
        let shown = format!("{creds:?}");
        assert!(shown.contains("alice"));
        assert!(!shown.contains("hunter2"));
    }

    #[test]
    fn http_client_builds() {
        assert!(HttpDavClient::new(HttpDavClient::DEFAULT_TIMEOUT).is_ok());
    }
}
