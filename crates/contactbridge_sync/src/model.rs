//! Servers, address books and run records.

use crate::state::BookState;
use serde::Serialize;
use sha1::{Digest, Sha1};
use std::fmt;

/// Length of the engine identifier derived from an address-book id.
pub const ENGINE_ID_LEN: usize = 7;

/// Length of a generated server id.
pub const SERVER_ID_LEN: usize = 8;

/// Returns the content-addressed id of the address book at `url`.
///
/// The same URL always yields the same id, so re-discovery is stable.
#[must_use]
pub fn address_book_id(url: &str) -> String {
    hex::encode(Sha1::digest(url.as_bytes()))
}

/// Returns the identifier the engine knows an address book by.
#[must_use]
pub fn engine_id(address_book_id: &str) -> &str {
    address_book_id
        .get(..ENGINE_ID_LEN)
        .unwrap_or(address_book_id)
}

/// Generates a short random server id.
#[must_use]
pub fn new_server_id() -> String {
    let mut id = uuid::Uuid::new_v4().simple().to_string();
    id.truncate(SERVER_ID_LEN);
    id
}

/// A saved DAV server.
#[derive(Clone, PartialEq, Eq)]
pub struct Server {
    /// Short random id.
    pub id: String,
    /// URL discovery started from.
    pub url: String,
    /// Login name.
    pub username: String,
    /// Login password.
    pub password: String,
    /// Host shown to the user.
    pub display_name: String,
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("id", &self.id)
            .field("url", &self.url)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("display_name", &self.display_name)
            .finish()
    }
}

/// An address book on a saved server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressBook {
    /// `hex(sha1(url))`.
    pub id: String,
    /// Owning server.
    pub server_id: String,
    /// Collection URL.
    pub url: String,
    /// Display name; empty if never recorded.
    pub name: String,
    /// Provisioning state derived from the stored flags.
    pub state: BookState,
    /// Outcome of the most recent run, if any.
    pub last_run: Option<LastRun>,
}

impl AddressBook {
    /// Returns whether the address book takes part in sync.
    #[must_use]
    pub const fn enabled(&self) -> bool {
        self.state.is_enabled()
    }

    /// Returns whether the next run provisions from scratch.
    #[must_use]
    pub fn first_run_pending(&self) -> bool {
        self.state == BookState::FirstRunPending
    }

    /// Returns the engine identifier.
    #[must_use]
    pub fn engine_id(&self) -> &str {
        engine_id(&self.id)
    }

    /// Returns the name, or the id when no name was recorded.
    #[must_use]
    pub fn label(&self) -> &str {
        if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        }
    }
}

/// Which path a run took.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunType {
    /// First-run provisioning.
    FirstTime,
    /// Steady-state two-way sync.
    Regular,
}

impl RunType {
    /// Returns the stored name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::FirstTime => "first_time",
            Self::Regular => "regular",
        }
    }

    /// Parses a stored name.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "first_time" => Some(Self::FirstTime),
            "regular" => Some(Self::Regular),
            _ => None,
        }
    }
}

impl fmt::Display for RunType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The outcome of the most recent run of one address book.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastRun {
    /// Unix seconds.
    pub time: i64,
    /// Path taken.
    pub run_type: RunType,
    /// Whether the run succeeded.
    pub success: bool,
    /// Engine output or failure description.
    pub message: String,
}

/// A `(success, message)` result, the shape every user-facing operation
/// reports in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OpResponse {
    /// Whether the operation succeeded.
    pub success: bool,
    /// Failure description, or informational output.
    pub message: String,
}

impl OpResponse {
    /// A success with an empty message.
    #[must_use]
    pub fn ok() -> Self {
        Self::ok_with(String::new())
    }

    /// A success carrying a message.
    pub fn ok_with(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    /// A failure.
    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

/// A row of the server list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerSummary {
    /// Server id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Number of address books saved for the server.
    pub address_book_count: usize,
}

/// A row of a server's address-book list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AddressBookSummary {
    /// Address-book id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Whether it takes part in sync.
    pub enabled: bool,
}

/// A row of a server's sync log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncLogEntry {
    /// Address-book name.
    pub address_book_name: String,
    /// Local time of the run, ISO-8601.
    pub time: String,
    /// Path taken.
    pub run_type: RunType,
    /// Whether the run succeeded.
    pub success: bool,
    /// Engine output or failure description.
    pub message: String,
}
