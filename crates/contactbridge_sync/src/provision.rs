//! First-run provisioning, steady-state sync and deprovisioning of one
//! address book.

use crate::engine::{ContactEngine, EngineOp, EngineOutput};
use crate::error::{EngineResult, SyncError, SyncResult};
use crate::model::{AddressBook, OpResponse, Server};
use tracing::{debug, info, warn};

/// What the engine needs to know to tear an address book down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineBook {
    /// Local database name; the address book's display name.
    pub database: String,
    /// 7-character engine identifier.
    pub engine_id: String,
}

impl EngineBook {
    /// Builds the handle, requiring a recorded name.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::MissingField`] if the address book has no name.
    pub fn new(book: &AddressBook) -> SyncResult<Self> {
        if book.name.is_empty() {
            return Err(SyncError::missing_field("address book", &book.id, "name"));
        }
        Ok(Self {
            database: book.name.clone(),
            engine_id: book.engine_id().to_string(),
        })
    }
}

/// Everything a first run needs, validated up front.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirstRunTarget {
    /// Database name and engine identifier.
    pub book: EngineBook,
    /// Collection URL.
    pub address_book_url: String,
    /// Server URL.
    pub server_url: String,
    /// Login name.
    pub username: String,
    /// Login password.
    pub password: String,
}

impl FirstRunTarget {
    /// Builds a target from a server and one of its address books.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::MissingField`] for the first empty required
    /// field, before any engine call can happen.
    pub fn new(server: &Server, book: &AddressBook) -> SyncResult<Self> {
        let required = |value: &str, entity, id: &str, field| {
            if value.is_empty() {
                Err(SyncError::missing_field(entity, id, field))
            } else {
                Ok(value.to_string())
            }
        };
        let book_handle = EngineBook::new(book)?;
        Ok(Self {
            address_book_url: required(&book.url, "address book", &book.id, "url")?,
            server_url: required(&server.url, "server", &server.id, "url")?,
            username: required(&server.username, "server", &server.id, "username")?,
            password: required(&server.password, "server", &server.id, "password")?,
            book: book_handle,
        })
    }

    /// Returns the six provisioning operations, in order.
    #[must_use]
    pub fn steps(&self) -> Vec<EngineOp> {
        let id = self.book.engine_id.clone();
        vec![
            EngineOp::CreateDatabase {
                database: self.book.database.clone(),
            },
            EngineOp::ConfigureServer {
                engine_id: id.clone(),
                username: self.username.clone(),
                password: self.password.clone(),
                server_url: self.server_url.clone(),
            },
            EngineOp::ConfigureAddressBook {
                engine_id: id.clone(),
                address_book_url: self.address_book_url.clone(),
            },
            EngineOp::ConfigureLocal {
                engine_id: id.clone(),
            },
            EngineOp::ConfigureTwoWay {
                database: self.book.database.clone(),
                engine_id: id.clone(),
            },
            EngineOp::RefreshFromRemote { engine_id: id },
        ]
    }
}

fn failure_message(op: &EngineOp, result: &EngineResult<EngineOutput>) -> String {
    let detail = match result {
        Ok(output) => output.output.clone(),
        Err(err) => err.to_string(),
    };
    format!("{} failed with error: {detail}", op.name())
}

/// Drives one engine through the provisioning paths.
#[derive(Debug)]
pub struct Provisioner<'e, E: ContactEngine + ?Sized> {
    engine: &'e E,
}

impl<'e, E: ContactEngine + ?Sized> Provisioner<'e, E> {
    /// Wraps an engine.
    pub fn new(engine: &'e E) -> Self {
        Self { engine }
    }

    /// Runs the six provisioning steps, stopping at the first failure.
    ///
    /// A failed step triggers [`Self::deprovision`] so no partial
    /// configuration is left behind; a cleanup failure is appended to the
    /// message. On success the message is the initial sync's output.
    pub fn first_run(&self, target: &FirstRunTarget) -> OpResponse {
        let id = target.book.engine_id.as_str();
        info!(engine_id = id, "provisioning address book");

        let mut last = String::new();
        for op in target.steps() {
            let result = self.engine.run(&op);
            match &result {
                Ok(output) if output.success() => {
                    debug!(engine_id = id, step = op.name(), "step succeeded");
                    last = output.output.clone();
                }
                _ => {
                    let mut message = failure_message(&op, &result);
                    warn!(engine_id = id, step = op.name(), "provisioning step failed, rolling back");
                    if let Err(err) = self.deprovision(&target.book) {
                        message.push_str(&format!("; cleanup failed: {err}"));
                    }
                    return OpResponse::fail(message);
                }
            }
        }
        info!(engine_id = id, "address book provisioned");
        OpResponse::ok_with(last)
    }

    /// Runs one two-way sync. Failures never deprovision.
    pub fn two_way(&self, engine_id: &str) -> OpResponse {
        let op = EngineOp::TwoWaySync {
            engine_id: engine_id.to_string(),
        };
        let result = self.engine.run(&op);
        match &result {
            Ok(output) if output.success() => OpResponse::ok_with(output.output.clone()),
            _ => OpResponse::fail(failure_message(&op, &result)),
        }
    }

    /// Removes the pairing, the server configuration and the local database.
    ///
    /// Output saying the item is already absent counts as success.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Cleanup`] on the first other failure; later
    /// steps are not attempted.
    pub fn deprovision(&self, book: &EngineBook) -> SyncResult<()> {
        // Reverse of creation: the pairing points at the server target
        // configuration, so it goes first and a stopped cleanup never leaves
        // a pairing whose target is gone.
        let steps = [
            EngineOp::RemovePairing {
                engine_id: book.engine_id.clone(),
            },
            EngineOp::RemoveServer {
                engine_id: book.engine_id.clone(),
            },
            EngineOp::RemoveDatabase {
                database: book.database.clone(),
            },
        ];

        for op in &steps {
            let cleanup_error = |output: String| SyncError::Cleanup {
                step: op.name(),
                engine_id: book.engine_id.clone(),
                output,
            };
            let output = self
                .engine
                .run(op)
                .map_err(|err| cleanup_error(err.to_string()))?;
            if output.success() {
                continue;
            }
            let absent = op
                .absent_marker()
                .is_some_and(|marker| output.output.to_lowercase().contains(marker));
            if !absent {
                return Err(cleanup_error(output.output));
            }
            warn!(engine_id = %book.engine_id, step = op.name(), "already absent");
        }
        debug!(engine_id = %book.engine_id, "address book deprovisioned");
        Ok(())
    }
}
