//! The application facade: every user-facing operation in one place.

use crate::catalog::Catalog;
use crate::config::BridgeConfig;
use crate::engine::ContactEngine;
use crate::error::{SyncError, SyncResult};
use crate::lock::SyncLockGuard;
use crate::model::{
    new_server_id, AddressBook, AddressBookSummary, OpResponse, Server, ServerSummary,
    SyncLogEntry,
};
use crate::provision::{EngineBook, Provisioner};
use crate::runner::{SyncRunner, LOCK_HELD_MESSAGE};
use crate::syncevolution::SyncEvolution;
use chrono::{DateTime, Local};
use contactbridge_dav::{
    discover, normalize_server_url, server_display_name, Credentials, DavClient, DavError,
    HttpDavClient,
};
use contactbridge_kv::KvStore;
use std::time::Duration;
use tracing::{error, info, warn};

/// Message returned when discovery succeeds but finds nothing.
pub const NO_ADDRESS_BOOKS_MESSAGE: &str = "Could not find any addressbooks from url";

/// Servers, address books and the sync loop over one store.
///
/// Operations that change engine configuration take the sync lock first,
/// so they never interleave with a run.
pub struct ContactBridge<D, E> {
    store: KvStore,
    dav: D,
    engine: E,
    lock_ttl: Duration,
}

impl ContactBridge<HttpDavClient, SyncEvolution> {
    /// Opens the store in `config.data_dir` with the production client and
    /// engine.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid, the store cannot be
    /// opened or the HTTP client cannot be built.
    pub fn open(config: &BridgeConfig) -> SyncResult<Self> {
        config.validate()?;
        let store = KvStore::open(config.data_dir(), config.kv.clone())?;
        let dav = HttpDavClient::new(config.dav_timeout)?;
        let engine = SyncEvolution::new(config.engine_program.clone());
        info!(data_dir = %config.data_dir().display(), "opened contact bridge");
        Ok(Self::with_parts(store, dav, engine, config.lock_ttl))
    }
}

impl<D: DavClient, E: ContactEngine> ContactBridge<D, E> {
    /// Assembles a bridge from its parts.
    pub fn with_parts(store: KvStore, dav: D, engine: E, lock_ttl: Duration) -> Self {
        Self {
            store,
            dav,
            engine,
            lock_ttl,
        }
    }

    /// Returns the underlying store.
    pub fn store(&self) -> &KvStore {
        &self.store
    }

    /// Returns the discovery client.
    pub fn dav(&self) -> &D {
        &self.dav
    }

    /// Returns the engine.
    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Discovers the address books behind `url` and saves the server with
    /// all of them, disabled.
    ///
    /// On success the message is the new server's id.
    pub fn save_server(&self, url: &str, username: &str, password: &str) -> OpResponse {
        let server_url = match normalize_server_url(url) {
            Ok(server_url) => server_url,
            Err(err) => return fetch_failed(&err),
        };
        let credentials = Credentials::new(username, password);
        let books = match discover(&self.dav, &server_url, &credentials) {
            Ok(books) => books,
            Err(err) => return fetch_failed(&err),
        };
        if books.is_empty() {
            return OpResponse::fail(NO_ADDRESS_BOOKS_MESSAGE);
        }

        let server = Server {
            id: new_server_id(),
            url: server_url.to_string(),
            username: username.to_string(),
            password: password.to_string(),
            display_name: server_display_name(&server_url),
        };
        let mut catalog = Catalog::open(&self.store);
        match catalog.save_server(&server, &books) {
            Ok(()) => {
                info!(server = %server.id, address_books = books.len(), "server saved");
                OpResponse::ok_with(server.id)
            }
            Err(err) => OpResponse::fail(format!("Failed to save server. Error: {err}")),
        }
    }

    /// Lists saved servers, sorted by id.
    pub fn list_servers(&self) -> SyncResult<Vec<ServerSummary>> {
        let catalog = Catalog::open(&self.store);
        let mut servers = Vec::new();
        for sid in catalog.server_ids()? {
            let Some(server) = catalog.server(&sid)? else {
                continue;
            };
            servers.push(ServerSummary {
                address_book_count: catalog.address_books(&sid)?.len(),
                id: server.id,
                name: server.display_name,
            });
        }
        Ok(servers)
    }

    /// Lists a server's address books, sorted by id.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NotFound`] for an unknown server.
    pub fn server_detail(&self, server_id: &str) -> SyncResult<Vec<AddressBookSummary>> {
        let catalog = Catalog::open(&self.store);
        if catalog.server(server_id)?.is_none() {
            return Err(SyncError::not_found("server", server_id));
        }
        Ok(catalog
            .address_books(server_id)?
            .into_iter()
            .map(|book| AddressBookSummary {
                enabled: book.enabled(),
                id: book.id,
                name: book.name,
            })
            .collect())
    }

    /// Enables or disables an address book.
    ///
    /// Enabling schedules a first run; enabling an enabled address book
    /// changes nothing. Disabling removes the address book's engine
    /// configuration first and fails without touching any flag if that is
    /// impossible.
    pub fn set_address_book_enabled(
        &self,
        server_id: &str,
        address_book_id: &str,
        enabled: bool,
    ) -> OpResponse {
        let result = self.with_lock(|| {
            let mut catalog = Catalog::open(&self.store);
            let book = find_book(&catalog, server_id, address_book_id)?;
            if enabled {
                if !book.enabled() {
                    catalog.enable(server_id, address_book_id)?;
                    info!(address_book = address_book_id, "address book enabled");
                }
            } else {
                let handle = EngineBook::new(&book)?;
                Provisioner::new(&self.engine).deprovision(&handle)?;
                catalog.disable(server_id, address_book_id)?;
                info!(address_book = address_book_id, "address book disabled");
            }
            Ok(())
        });
        self.respond(result, "Failed to update addressbook")
    }

    /// Deprovisions every address book of a server, then removes it.
    ///
    /// Nothing is removed unless every address book could be deprovisioned.
    /// Address books already torn down when a later one fails are scheduled
    /// for a fresh first run.
    pub fn delete_server(&self, server_id: &str) -> OpResponse {
        let result = self.with_lock(|| {
            let catalog = Catalog::open(&self.store);
            if catalog.server(server_id)?.is_none() {
                return Err(SyncError::not_found("server", server_id));
            }
            let books = catalog.address_books(server_id)?;
            let handles = books
                .iter()
                .map(EngineBook::new)
                .collect::<SyncResult<Vec<_>>>()?;

            let provisioner = Provisioner::new(&self.engine);
            for (done, handle) in handles.iter().enumerate() {
                if let Err(err) = provisioner.deprovision(handle) {
                    for book in &books[..done] {
                        catalog.set_first_run_pending(server_id, &book.id, true)?;
                    }
                    return Err(err);
                }
            }

            catalog.delete_server(server_id)?;
            info!(server = server_id, address_books = books.len(), "server deleted");
            Ok(())
        });
        self.respond(result, "Failed to delete server")
    }

    /// Runs the sync loop once.
    pub fn sync_servers(&self) -> OpResponse {
        SyncRunner::new(&self.store, &self.engine, self.lock_ttl).run()
    }

    /// Returns the last run of every address book of a server that has run.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NotFound`] for an unknown server.
    pub fn sync_log(&self, server_id: &str) -> SyncResult<Vec<SyncLogEntry>> {
        let catalog = Catalog::open(&self.store);
        if catalog.server(server_id)?.is_none() {
            return Err(SyncError::not_found("server", server_id));
        }
        Ok(catalog
            .address_books(server_id)?
            .into_iter()
            .filter_map(|book| {
                let run = book.last_run.as_ref()?;
                Some(SyncLogEntry {
                    address_book_name: book.label().to_string(),
                    time: local_time(run.time),
                    run_type: run.run_type,
                    success: run.success,
                    message: run.message.clone(),
                })
            })
            .collect())
    }

    fn with_lock(&self, f: impl FnOnce() -> SyncResult<()>) -> SyncResult<Option<()>> {
        let Some(guard) = SyncLockGuard::acquire(&self.store, self.lock_ttl)? else {
            return Ok(None);
        };
        let result = f();
        let released = guard.release();
        settle(result, released).map(Some)
    }

    fn respond(&self, result: SyncResult<Option<()>>, context: &str) -> OpResponse {
        match result {
            Ok(Some(())) => OpResponse::ok(),
            Ok(None) => OpResponse::fail(LOCK_HELD_MESSAGE),
            Err(err) => {
                error!(error = %err, "{context}");
                OpResponse::fail(format!("{context}: {err}"))
            }
        }
    }
}

/// Combines an operation's result with the lock release that followed it.
///
/// The operation's own error wins; a release error is only returned when
/// the operation succeeded.
fn settle(result: SyncResult<()>, released: SyncResult<()>) -> SyncResult<()> {
    match (result, released) {
        (Err(err), Err(release_err)) => {
            error!(error = %release_err, "failed to release sync lock");
            Err(err)
        }
        (result, released) => result.and(released),
    }
}

fn fetch_failed(err: &DavError) -> OpResponse {
    warn!(error = %err, "discovery failed");
    OpResponse::fail(format!("Failed to fetch server. Error: {err}"))
}

fn find_book(catalog: &Catalog<'_>, server_id: &str, address_book_id: &str) -> SyncResult<AddressBook> {
    if catalog.server(server_id)?.is_none() {
        return Err(SyncError::not_found("server", server_id));
    }
    catalog
        .address_book(server_id, address_book_id)?
        .ok_or_else(|| SyncError::not_found("address book", address_book_id))
}

/// Formats unix seconds as local ISO-8601.
fn local_time(secs: i64) -> String {
    DateTime::from_timestamp(secs, 0)
        .map(|utc| utc.with_timezone(&Local).to_rfc3339())
        .unwrap_or_else(|| secs.to_string())
}
