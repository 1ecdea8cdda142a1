//! [`ContactEngine`] backed by the `syncevolution` command-line tool.

use crate::engine::{ContactEngine, EngineOp, EngineOutput};
use crate::error::{EngineError, EngineResult};
use std::process::Command;
use tracing::debug;

/// Default program name.
pub const DEFAULT_PROGRAM: &str = "syncevolution";

const PASSWORD_ARG: &str = "password=";

/// Runs engine operations by spawning `syncevolution`.
#[derive(Debug, Clone)]
pub struct SyncEvolution {
    program: String,
}

impl Default for SyncEvolution {
    fn default() -> Self {
        Self::new(DEFAULT_PROGRAM)
    }
}

impl SyncEvolution {
    /// Uses `program` as the executable.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Returns the executable name.
    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }
}

/// Returns the argument vector for `op`, excluding the program name.
#[must_use]
pub fn command_args(op: &EngineOp) -> Vec<String> {
    let target = |id: &str| format!("target-config@{id}");
    match op {
        EngineOp::CreateDatabase { database } => vec![
            "--create-database".into(),
            "backend=evolution-contacts".into(),
            format!("database={database}"),
        ],
        EngineOp::ConfigureServer {
            engine_id,
            username,
            password,
            server_url,
        } => vec![
            "--configure".into(),
            "--template".into(),
            "webdav".into(),
            format!("username={username}"),
            format!("{PASSWORD_ARG}{password}"),
            format!("syncURL={server_url}"),
            target(engine_id),
        ],
        EngineOp::ConfigureAddressBook {
            engine_id,
            address_book_url,
        } => vec![
            "--configure".into(),
            "--template".into(),
            "webdav".into(),
            format!("database={address_book_url}"),
            "backend=carddav".into(),
            target(engine_id),
            engine_id.clone(),
        ],
        EngineOp::ConfigureLocal { engine_id } => vec![
            "--configure".into(),
            "--template".into(),
            "SyncEvolution_Client".into(),
            "sync=none".into(),
            format!("syncURL=local://@{engine_id}"),
            "username=".into(),
            PASSWORD_ARG.into(),
            engine_id.clone(),
        ],
        EngineOp::ConfigureTwoWay {
            database,
            engine_id,
        } => vec![
            "--configure".into(),
            "sync=two-way".into(),
            "backend=evolution-contacts".into(),
            format!("database={database}"),
            engine_id.clone(),
            engine_id.clone(),
        ],
        EngineOp::RefreshFromRemote { engine_id } => vec![
            "--sync".into(),
            "refresh-from-remote".into(),
            engine_id.clone(),
            engine_id.clone(),
        ],
        EngineOp::TwoWaySync { engine_id } => vec![
            "--sync".into(),
            "two-way".into(),
            engine_id.clone(),
            engine_id.clone(),
        ],
        EngineOp::RemovePairing { engine_id } => vec!["--remove".into(), engine_id.clone()],
        EngineOp::RemoveServer { engine_id } => vec!["--remove".into(), target(engine_id)],
        EngineOp::RemoveDatabase { database } => vec![
            "--remove-database".into(),
            "backend=evolution-contacts".into(),
            format!("database={database}"),
        ],
    }
}

/// Replaces non-empty password arguments for logging.
#[must_use]
pub fn redact(args: &[String]) -> Vec<String> {
    args.iter()
        .map(|arg| match arg.strip_prefix(PASSWORD_ARG) {
            Some(secret) if !secret.is_empty() => format!("{PASSWORD_ARG}<redacted>"),
            _ => arg.clone(),
        })
        .collect()
}

impl ContactEngine for SyncEvolution {
    fn run(&self, op: &EngineOp) -> EngineResult<EngineOutput> {
        let args = command_args(op);
        debug!(program = %self.program, args = ?redact(&args), "running engine");

        let output = Command::new(&self.program)
            .args(&args)
            .output()
            .map_err(|source| EngineError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));

        let status = output
            .status
            .code()
            .ok_or_else(|| EngineError::Terminated(format!("{} {}", self.program, op.name())))?;
        debug!(op = op.name(), status, "engine finished");
        Ok(EngineOutput {
            status,
            output: text,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_configuration_args() {
        let op = EngineOp::ConfigureServer {
            engine_id: "a9993e3".into(),
            username: "alice".into(),
            password: "hunter2".into(),
            server_url: "https://dav.example.com/.well-known/carddav".into(),
        };
        assert_eq!(
            command_args(&op),
            vec![
                "--configure",
                "--template",
                "webdav",
                "username=alice",
                "password=hunter2",
                "syncURL=https://dav.example.com/.well-known/carddav",
                "target-config@a9993e3",
            ]
        );
    }

    #[test]
    fn cleanup_args() {
        let id = "a9993e3".to_string();
        assert_eq!(
            command_args(&EngineOp::RemovePairing {
                engine_id: id.clone()
            }),
            vec!["--remove", "a9993e3"]
        );
        assert_eq!(
            command_args(&EngineOp::RemoveServer { engine_id: id }),
            vec!["--remove", "target-config@a9993e3"]
        );
        assert_eq!(
            command_args(&EngineOp::RemoveDatabase {
                database: "Personal".into()
            }),
            vec![
                "--remove-database",
                "backend=evolution-contacts",
                "database=Personal"
            ]
        );
    }

    #[test]
    fn sync_args_name_the_pairing_twice() {
        let op = EngineOp::TwoWaySync {
            engine_id: "a9993e3".into(),
        };
        assert_eq!(
            command_args(&op),
            vec!["--sync", "two-way", "a9993e3", "a9993e3"]
        );
    }

    #[test]
    fn redaction_keeps_empty_password() {
        let args = vec![
            "username=alice".to_string(),
            "password=hunter2".to_string(),
            "password=".to_string(),
        ];
        assert_eq!(
            redact(&args),
            vec!["username=alice", "password=<redacted>", "password="]
        );
    }

    #[test]
    fn missing_program_is_spawn_error() {
        let engine = SyncEvolution::new("contactbridge-no-such-program");
        let op = EngineOp::TwoWaySync {
            engine_id: "a9993e3".into(),
        };
        assert!(matches!(engine.run(&op), Err(EngineError::Spawn { .. })));
    }

    #[cfg(unix)]
    #[test]
    fn exit_status_and_output_are_captured() {
        // `false` ignores its arguments and exits 1.
        let engine = SyncEvolution::new("false");
        let op = EngineOp::TwoWaySync {
            engine_id: "a9993e3".into(),
        };
        let output = engine.run(&op).unwrap();
        assert!(!output.success());
    }
}
