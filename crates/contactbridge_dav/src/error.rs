//! Error types for address-book discovery.

use thiserror::Error;

/// Result type for discovery operations.
pub type DavResult<T> = Result<T, DavError>;

/// Errors that abort discovery.
#[derive(Error, Debug)]
pub enum DavError {
    /// The request never produced a response.
    #[error("transport error: {0}")]
    Transport(String),

    /// The server answered with a status other than 2xx.
    #[error("server returned status {status} for {url}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// URL the request was sent to.
        url: String,
    },

    /// A multistatus body could not be parsed.
    #[error("malformed XML response: {0}")]
    Xml(String),

    /// A URL could not be parsed or resolved.
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
}

impl DavError {
    /// Creates a transport error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    /// Creates an invalid URL error.
    pub fn invalid_url(message: impl Into<String>) -> Self {
        Self::InvalidUrl(message.into())
    }
}

impl From<roxmltree::Error> for DavError {
    fn from(err: roxmltree::Error) -> Self {
        Self::Xml(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_display_names_url() {
        let err = DavError::Status {
            status: 401,
            url: "https://dav.example.com/".into(),
        };
        assert_eq!(
            err.to_string(),
            "server returned status 401 for https://dav.example.com/"
        );
    }
}
