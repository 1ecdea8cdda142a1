//! # ContactBridge DAV
//!
//! Finds the CardDAV address books a user can reach on a server.
//!
//! Discovery follows the usual three-stage walk: principal, address-book
//! home, then a depth-1 listing of the home. Each stage falls back to the
//! previous URL when the server does not report the property, so servers
//! that skip principals still work.
//!
//! HTTP goes through the [`DavClient`] trait. [`HttpDavClient`] is the
//! blocking `reqwest` implementation and [`MockDavClient`] answers from a
//! table for tests.
//!
//! ## Example
//!
//! ```rust
//! use contactbridge_dav::{discover, normalize_server_url, Credentials, MockDavClient};
//!
//! let listing = r#"<d:multistatus xmlns:d="DAV:" xmlns:c="urn:ietf:params:xml:ns:carddav">
//!   <d:response>
//!     <d:href>/dav/contacts/</d:href>
//!     <d:propstat><d:prop>
//!       <d:resourcetype><d:collection/><c:addressbook/></d:resourcetype>
//!       <d:displayname>Contacts</d:displayname>
//!     </d:prop></d:propstat>
//!   </d:response>
//! </d:multistatus>"#;
//!
//! let client = MockDavClient::new()
//!     .respond("https://dav.example.com/dav/", 207, listing);
//! let url = normalize_server_url("https://dav.example.com/dav").unwrap();
//!
//! let books = discover(&client, &url, &Credentials::new("alice", "secret")).unwrap();
//! assert_eq!(books[0].name, "Contacts");
//! assert_eq!(books[0].url, "https://dav.example.com/dav/contacts/");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod client;
mod discovery;
mod error;
mod mock;
mod xml;

pub use client::{Credentials, DavClient, DavResponse, Depth, HttpDavClient, MAX_REDIRECTS};
pub use discovery::{
    discover, normalize_server_url, server_display_name, DiscoveredAddressBook, FALLBACK_NAME,
};
pub use error::{DavError, DavResult};
pub use mock::{MockDavClient, RecordedRequest};
pub use xml::{CARDDAV_NS, DAV_NS};

/// Re-exported so callers need not depend on `reqwest` for URLs.
pub use reqwest::Url;
