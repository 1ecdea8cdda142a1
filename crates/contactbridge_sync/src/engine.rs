//! The contact-sync engine boundary.
//!
//! The engine is an external tool that owns the local contact database and
//! the actual contact transfer. The orchestrator only drives it through the
//! fixed vocabulary in [`EngineOp`] and inspects `(status, output)`.

use crate::error::{EngineError, EngineResult};
use parking_lot::Mutex;

/// One operation the engine understands.
///
/// `engine_id` is the 7-character identifier of an address book; `database`
/// is the name of its local contact database.
#[derive(Clone, PartialEq, Eq)]
pub enum EngineOp {
    /// Create the local contact database.
    CreateDatabase {
        /// Local database name.
        database: String,
    },
    /// Configure credentials and URL of the remote server.
    ConfigureServer {
        /// Engine identifier.
        engine_id: String,
        /// Login name.
        username: String,
        /// Login password.
        password: String,
        /// Server URL.
        server_url: String,
    },
    /// Bind the remote address-book collection.
    ConfigureAddressBook {
        /// Engine identifier.
        engine_id: String,
        /// Collection URL.
        address_book_url: String,
    },
    /// Configure the local sync endpoint.
    ConfigureLocal {
        /// Engine identifier.
        engine_id: String,
    },
    /// Configure the two-way pairing between local and remote.
    ConfigureTwoWay {
        /// Local database name.
        database: String,
        /// Engine identifier.
        engine_id: String,
    },
    /// Replace local contacts with the remote ones.
    RefreshFromRemote {
        /// Engine identifier.
        engine_id: String,
    },
    /// Two-way sync of a provisioned address book.
    TwoWaySync {
        /// Engine identifier.
        engine_id: String,
    },
    /// Remove the sync pairing.
    RemovePairing {
        /// Engine identifier.
        engine_id: String,
    },
    /// Remove the remote server configuration.
    RemoveServer {
        /// Engine identifier.
        engine_id: String,
    },
    /// Remove the local contact database.
    RemoveDatabase {
        /// Local database name.
        database: String,
    },
}

impl EngineOp {
    /// Returns the stable operation name used in messages.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::CreateDatabase { .. } => "create_database",
            Self::ConfigureServer { .. } => "create_server_configuration",
            Self::ConfigureAddressBook { .. } => "create_addressbook_configuration",
            Self::ConfigureLocal { .. } => "create_local_configuration",
            Self::ConfigureTwoWay { .. } => "create_two_way_configuration",
            Self::RefreshFromRemote { .. } => "run_first_sync",
            Self::TwoWaySync { .. } => "two_way_sync",
            Self::RemovePairing { .. } => "remove_pairing",
            Self::RemoveServer { .. } => "remove_server_configuration",
            Self::RemoveDatabase { .. } => "remove_database",
        }
    }

    /// Returns the engine identifier the operation targets, if any.
    #[must_use]
    pub fn engine_id(&self) -> Option<&str> {
        match self {
            Self::ConfigureServer { engine_id, .. }
            | Self::ConfigureAddressBook { engine_id, .. }
            | Self::ConfigureLocal { engine_id }
            | Self::ConfigureTwoWay { engine_id, .. }
            | Self::RefreshFromRemote { engine_id }
            | Self::TwoWaySync { engine_id }
            | Self::RemovePairing { engine_id }
            | Self::RemoveServer { engine_id } => Some(engine_id),
            Self::CreateDatabase { .. } | Self::RemoveDatabase { .. } => None,
        }
    }

    /// For cleanup operations, the output fragment meaning "already absent".
    ///
    /// Matched case-insensitively.
    #[must_use]
    pub const fn absent_marker(&self) -> Option<&'static str> {
        match self {
            Self::RemovePairing { .. } | Self::RemoveServer { .. } => Some("no such configuration"),
            Self::RemoveDatabase { .. } => Some("database not found"),
            _ => None,
        }
    }
}

impl std::fmt::Debug for EngineOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ConfigureServer {
                engine_id,
                username,
                server_url,
                ..
            } => f
                .debug_struct("ConfigureServer")
                .field("engine_id", engine_id)
                .field("username", username)
                .field("password", &"<redacted>")
                .field("server_url", server_url)
                .finish(),
            other => {
                let mut s = f.debug_struct(other.name());
                if let Some(id) = other.engine_id() {
                    s.field("engine_id", &id);
                }
                match other {
                    Self::CreateDatabase { database }
                    | Self::ConfigureTwoWay { database, .. }
                    | Self::RemoveDatabase { database } => {
                        s.field("database", database);
                    }
                    Self::ConfigureAddressBook {
                        address_book_url, ..
                    } => {
                        s.field("address_book_url", address_book_url);
                    }
                    _ => {}
                }
                s.finish()
            }
        }
    }
}

/// Exit status and combined output of one engine invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineOutput {
    /// Process exit status; zero is success.
    pub status: i32,
    /// Combined stdout and stderr.
    pub output: String,
}

impl EngineOutput {
    /// A successful invocation.
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            status: 0,
            output: output.into(),
        }
    }

    /// A failed invocation.
    pub fn failed(status: i32, output: impl Into<String>) -> Self {
        Self {
            status,
            output: output.into(),
        }
    }

    /// Returns true if the status is zero.
    #[must_use]
    pub const fn success(&self) -> bool {
        self.status == 0
    }
}

/// Runs engine operations.
///
/// Invocations block until the engine finishes. `Err` means the engine
/// could not be invoked at all; a non-zero status is an `Ok` output.
pub trait ContactEngine: Send + Sync {
    /// Runs one operation.
    fn run(&self, op: &EngineOp) -> EngineResult<EngineOutput>;
}

impl<E: ContactEngine + ?Sized> ContactEngine for &E {
    fn run(&self, op: &EngineOp) -> EngineResult<EngineOutput> {
        (**self).run(op)
    }
}

#[derive(Debug, Clone)]
enum Scripted {
    Output(EngineOutput),
    Error(String),
}

#[derive(Debug, Clone)]
struct Rule {
    name: &'static str,
    engine_id: Option<String>,
    result: Scripted,
}

/// An engine that records every operation and answers from a script.
///
/// Operations with no matching rule succeed with empty output. When several
/// rules match, the most recently added wins.
#[derive(Debug, Default)]
pub struct ScriptedEngine {
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<EngineOp>>,
}

impl ScriptedEngine {
    /// Creates an engine where every operation succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, name: &'static str, engine_id: Option<&str>, result: Scripted) {
        self.rules.lock().push(Rule {
            name,
            engine_id: engine_id.map(str::to_string),
            result,
        });
    }

    /// Answers every operation called `name` with `output`.
    pub fn respond(&self, name: &'static str, output: EngineOutput) {
        self.push(name, None, Scripted::Output(output));
    }

    /// Answers operation `name` for one address book with `output`.
    pub fn respond_for(&self, name: &'static str, engine_id: &str, output: EngineOutput) {
        self.push(name, Some(engine_id), Scripted::Output(output));
    }

    /// Makes every operation called `name` fail to start.
    pub fn error(&self, name: &'static str, message: &str) {
        self.push(name, None, Scripted::Error(message.to_string()));
    }

    /// Returns every operation run so far, in order.
    pub fn calls(&self) -> Vec<EngineOp> {
        self.calls.lock().clone()
    }

    /// Returns the names of every operation run so far, in order.
    pub fn call_names(&self) -> Vec<&'static str> {
        self.calls.lock().iter().map(EngineOp::name).collect()
    }

    /// Forgets recorded calls, keeping the script.
    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }
}

impl ContactEngine for ScriptedEngine {
    fn run(&self, op: &EngineOp) -> EngineResult<EngineOutput> {
        self.calls.lock().push(op.clone());

        let rules = self.rules.lock();
        let rule = rules.iter().rev().find(|rule| {
            rule.name == op.name()
                && rule
                    .engine_id
                    .as_deref()
                    .map_or(true, |id| op.engine_id() == Some(id))
        });
        match rule.map(|r| &r.result) {
            Some(Scripted::Output(output)) => Ok(output.clone()),
            Some(Scripted::Error(message)) => Err(EngineError::Invocation(message.clone())),
            None => Ok(EngineOutput::ok("")),
        }
    }
}
