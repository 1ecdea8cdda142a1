//! The sync run loop.
//!
//! One run takes the global lock, walks every server and every enabled
//! address book in order, runs the path its state calls for, records the
//! outcome, and releases the lock. Address books are processed one at a
//! time since they share the engine and the local contact store.

use crate::catalog::Catalog;
use crate::engine::ContactEngine;
use crate::error::{SyncError, SyncResult};
use crate::lock::SyncLockGuard;
use crate::model::{AddressBook, LastRun, OpResponse, RunType, Server};
use crate::provision::{FirstRunTarget, Provisioner};
use crate::state::BookState;
use contactbridge_kv::KvStore;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{error, info, warn};

/// Message returned when another run holds the lock.
pub const LOCK_HELD_MESSAGE: &str = "Another instance of sync server is running";

/// Runs the sync loop over a store and an engine.
pub struct SyncRunner<'a, E: ContactEngine + ?Sized> {
    store: &'a KvStore,
    engine: &'a E,
    lock_ttl: Duration,
}

/// Running tally of a loop.
#[derive(Debug, Default)]
struct Tally {
    ran: usize,
    failed: usize,
    last_failure: Option<String>,
}

impl Tally {
    fn failure(&mut self, message: String) {
        self.failed += 1;
        self.last_failure = Some(message);
    }
}

impl<'a, E: ContactEngine + ?Sized> SyncRunner<'a, E> {
    /// Creates a runner.
    pub fn new(store: &'a KvStore, engine: &'a E, lock_ttl: Duration) -> Self {
        Self {
            store,
            engine,
            lock_ttl,
        }
    }

    /// Runs the loop once.
    ///
    /// Succeeds only if every enabled address book succeeded; otherwise the
    /// message is the last failure's. Never returns an error: store failures
    /// become a failed response, and the lock is released either way.
    pub fn run(&self) -> OpResponse {
        let guard = match SyncLockGuard::acquire(self.store, self.lock_ttl) {
            Ok(Some(guard)) => guard,
            Ok(None) => {
                warn!("sync skipped: {LOCK_HELD_MESSAGE}");
                return OpResponse::fail(LOCK_HELD_MESSAGE);
            }
            Err(err) => return OpResponse::fail(format!("Failed to acquire sync lock: {err}")),
        };

        let result = self.run_locked();
        let released = guard.release();

        let response = match result {
            Ok(tally) => {
                info!(ran = tally.ran, failed = tally.failed, "sync run finished");
                match tally.last_failure {
                    None => OpResponse::ok(),
                    Some(message) => OpResponse::fail(message),
                }
            }
            Err(err) => {
                error!(error = %err, "sync run aborted");
                OpResponse::fail(format!("Sync failed: {err}"))
            }
        };

        match released {
            Err(err) if response.success => {
                OpResponse::fail(format!("Failed to release sync lock: {err}"))
            }
            _ => response,
        }
    }

    fn run_locked(&self) -> SyncResult<Tally> {
        let mut catalog = Catalog::open(self.store);
        let mut tally = Tally::default();

        // A server or address book that cannot be read is counted as a
        // failure and skipped; the rest of the run goes ahead.
        let mut servers = Vec::new();
        for sid in catalog.server_ids()? {
            let server = match catalog.server(&sid) {
                Ok(Some(server)) => server,
                Ok(None) => continue,
                Err(err) => {
                    error!(server = %sid, error = %err, "unreadable server skipped");
                    tally.failure(format!("Failed to load server {sid}: {err}"));
                    continue;
                }
            };
            let mut books = Vec::new();
            for (bid, book) in catalog.address_book_entries(&sid)? {
                match book {
                    Ok(book) => books.push(book),
                    Err(err) => {
                        error!(
                            server = %sid,
                            address_book = %bid,
                            error = %err,
                            "unreadable address book skipped"
                        );
                        tally.failure(format!("Failed to sync addressbook {bid}: {err}"));
                    }
                }
            }
            servers.push((server, books));
        }

        // Provisioned books own their engine identifiers already.
        let mut claimed: HashMap<String, String> = servers
            .iter()
            .flat_map(|(_, books)| books)
            .filter(|book| book.state == BookState::SteadyState)
            .map(|book| (book.engine_id().to_string(), book.id.clone()))
            .collect();

        for (server, books) in &servers {
            for book in books {
                let Some(run_type) = book.state.run_type() else {
                    continue;
                };
                let outcome = match run_type {
                    RunType::FirstTime => self.first_run(server, book, &mut claimed),
                    RunType::Regular => Provisioner::new(self.engine).two_way(book.engine_id()),
                };

                tally.ran += 1;
                if book.state.after_run(outcome.success) != book.state {
                    catalog.set_first_run_pending(&server.id, &book.id, false)?;
                }
                if !outcome.success {
                    error!(
                        server = %server.id,
                        address_book = %book.id,
                        message = %outcome.message,
                        "address book sync failed"
                    );
                    tally.failure(outcome.message.clone());
                }

                let run = LastRun {
                    time: self.store.clock().now_millis() / 1000,
                    run_type,
                    success: outcome.success,
                    message: outcome.message,
                };
                catalog.record_last_run(&server.id, &book.id, &run)?;
            }
        }

        catalog.close()?;
        Ok(tally)
    }

    fn first_run(
        &self,
        server: &Server,
        book: &AddressBook,
        claimed: &mut HashMap<String, String>,
    ) -> OpResponse {
        let target = match FirstRunTarget::new(server, book) {
            Ok(target) => target,
            Err(err @ SyncError::MissingField { .. }) => {
                warn!(address_book = %book.id, error = %err, "incomplete address book");
                return OpResponse::fail(format!("Failed to sync addressbook {}", book.label()));
            }
            Err(err) => return OpResponse::fail(err.to_string()),
        };

        let engine_id = target.book.engine_id.clone();
        if let Some(owner) = claimed.get(&engine_id).filter(|owner| **owner != book.id) {
            warn!(address_book = %book.id, other = %owner, engine_id = %engine_id, "engine identifier collision");
            return OpResponse::fail(format!(
                "Failed to sync addressbook {}: engine identifier {engine_id} is already used by another address book",
                book.label()
            ));
        }
        claimed.insert(engine_id, book.id.clone());

        Provisioner::new(self.engine).first_run(&target)
    }
}
