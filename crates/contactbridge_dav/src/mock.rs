//! In-memory DAV client for tests.

use crate::client::{Credentials, DavClient, DavResponse, Depth, MAX_REDIRECTS};
use crate::error::{DavError, DavResult};
use parking_lot::Mutex;
use reqwest::Url;
use std::collections::HashMap;

/// A request seen by [`MockDavClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    /// Request URL.
    pub url: String,
    /// Depth header.
    pub depth: Depth,
    /// User name the request authenticated as.
    pub username: String,
}

#[derive(Debug, Clone)]
enum Route {
    Respond { status: u16, body: String },
    Redirect(String),
    Fail(String),
}

/// A [`DavClient`] that answers from a table of canned responses.
///
/// URLs are matched exactly, after normalisation by [`Url`]. Requests to an
/// unrouted URL get a `404`. Redirect routes are followed like the HTTP
/// client follows them.
#[derive(Debug, Default)]
pub struct MockDavClient {
    routes: Mutex<HashMap<String, Route>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl MockDavClient {
    /// Creates a client with no routes.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Answers requests to `url` with `status` and `body`.
    #[must_use]
    pub fn respond(self, url: &str, status: u16, body: &str) -> Self {
        self.route(
            url,
            Route::Respond {
                status,
                body: body.to_string(),
            },
        )
    }

    /// Redirects requests to `url` to `location`.
    #[must_use]
    pub fn redirect(self, url: &str, location: &str) -> Self {
        self.route(url, Route::Redirect(location.to_string()))
    }

    /// Makes requests to `url` fail as if the connection was refused.
    #[must_use]
    pub fn fail(self, url: &str, message: &str) -> Self {
        self.route(url, Route::Fail(message.to_string()))
    }

    /// Returns every request made so far, in order.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().clone()
    }

    fn route(self, url: &str, route: Route) -> Self {
        let key = Url::parse(url).map_or_else(|_| url.to_string(), String::from);
        self.routes.lock().insert(key, route);
        self
    }
}

impl DavClient for MockDavClient {
    fn propfind(
        &self,
        url: &Url,
        depth: Depth,
        _body: &str,
        credentials: &Credentials,
    ) -> DavResult<DavResponse> {
        let mut url = url.clone();
        for _ in 0..=MAX_REDIRECTS {
            self.requests.lock().push(RecordedRequest {
                url: url.to_string(),
                depth,
                username: credentials.username.clone(),
            });

            let route = self.routes.lock().get(url.as_str()).cloned();
            match route {
                Some(Route::Respond { status, body }) => {
                    return Ok(DavResponse::new(url, status, body))
                }
                Some(Route::Redirect(location)) => {
                    url = url
                        .join(&location)
                        .map_err(|e| DavError::invalid_url(e.to_string()))?;
                }
                Some(Route::Fail(message)) => return Err(DavError::transport(message)),
                None => return Ok(DavResponse::new(url, 404, "")),
            }
        }
        Err(DavError::transport(format!("too many redirects from {url}")))
    }
}
