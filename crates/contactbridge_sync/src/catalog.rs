//! Servers and address books as stored in the KV store.
//!
//! ```text
//! server.<sid>.url
//! server.<sid>.username
//! server.<sid>.password
//! server.<sid>.name
//! server.<sid>.addressbook.<abid>.url
//! server.<sid>.addressbook.<abid>.name
//! server.<sid>.addressbook.<abid>.enabled           absent = never enabled
//! server.<sid>.addressbook.<abid>.first_run         absent = pending
//! server.<sid>.addressbook.<abid>.last_run.time
//! server.<sid>.addressbook.<abid>.last_run.type
//! server.<sid>.addressbook.<abid>.last_run.success
//! server.<sid>.addressbook.<abid>.last_run.message
//! sync.lock
//! ```
//!
//! Address-book keys live under their server's prefix, so deleting a server
//! prefix can never leave an orphaned address book behind.

use crate::error::{SyncError, SyncResult};
use crate::model::{address_book_id, AddressBook, LastRun, RunType, Server};
use crate::state::BookState;
use contactbridge_dav::DiscoveredAddressBook;
use contactbridge_kv::{KvError, KvSession, KvStore, Value};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Key of the global sync lock.
pub const LOCK_KEY: &str = "sync.lock";

const SERVERS: &str = "server";
const ADDRESS_BOOKS: &str = "addressbook";

fn server_prefix(sid: &str) -> String {
    format!("{SERVERS}.{sid}")
}

fn server_key(sid: &str, field: &str) -> String {
    format!("{SERVERS}.{sid}.{field}")
}

fn books_prefix(sid: &str) -> String {
    format!("{SERVERS}.{sid}.{ADDRESS_BOOKS}")
}

fn book_key(sid: &str, bid: &str, field: &str) -> String {
    format!("{SERVERS}.{sid}.{ADDRESS_BOOKS}.{bid}.{field}")
}

/// Rejects ids that would escape their key segment.
fn check_id(entity: &'static str, id: &str) -> SyncResult<()> {
    if id.is_empty() || id.contains('.') {
        return Err(SyncError::not_found(entity, id));
    }
    Ok(())
}

fn mismatch(key: &str, expected: &'static str, found: &Value) -> SyncError {
    KvError::TypeMismatch {
        key: key.to_string(),
        expected,
        found: found.type_name(),
    }
    .into()
}

fn text(key: &str, value: &Value) -> SyncResult<String> {
    value
        .as_text()
        .map(str::to_string)
        .ok_or_else(|| mismatch(key, "text", value))
}

fn boolean(key: &str, value: &Value) -> SyncResult<bool> {
    value.as_bool().ok_or_else(|| mismatch(key, "bool", value))
}

fn int(key: &str, value: &Value) -> SyncResult<i64> {
    value.as_int().ok_or_else(|| mismatch(key, "int", value))
}

#[derive(Default)]
struct BookFields {
    url: String,
    name: String,
    enabled: Option<bool>,
    first_run: Option<bool>,
    run_time: Option<i64>,
    run_type: Option<RunType>,
    run_success: Option<bool>,
    run_message: String,
    error: Option<SyncError>,
}

impl BookFields {
    fn apply(&mut self, key: &str, field: &str, value: &Value) -> SyncResult<()> {
        match field {
            "url" => self.url = text(key, value)?,
            "name" => self.name = text(key, value)?,
            "enabled" => self.enabled = Some(boolean(key, value)?),
            "first_run" => self.first_run = Some(boolean(key, value)?),
            "last_run.time" => self.run_time = Some(int(key, value)?),
            "last_run.type" => self.run_type = RunType::parse(&text(key, value)?),
            "last_run.success" => self.run_success = Some(boolean(key, value)?),
            "last_run.message" => self.run_message = text(key, value)?,
            _ => debug!(key = %key, "ignoring unknown address book field"),
        }
        Ok(())
    }

    fn into_address_book(mut self, server_id: &str, id: String) -> SyncResult<AddressBook> {
        if let Some(err) = self.error.take() {
            return Err(err);
        }
        let last_run = match (self.run_time, self.run_type, self.run_success) {
            (Some(time), Some(run_type), Some(success)) => Some(LastRun {
                time,
                run_type,
                success,
                message: self.run_message,
            }),
            _ => None,
        };
        Ok(AddressBook {
            id,
            server_id: server_id.to_string(),
            url: self.url,
            name: self.name,
            state: BookState::from_flags(self.enabled, self.first_run),
            last_run,
        })
    }
}

/// One address book as loaded: its id, and the book or why it is unreadable.
pub type BookEntry = (String, SyncResult<AddressBook>);

/// Groups the entries under `server.<sid>.addressbook` by address book.
///
/// A badly typed field fails only the address book it belongs to.
fn parse_books(sid: &str, entries: Vec<(String, Value)>) -> Vec<BookEntry> {
    let prefix = format!("{}.", books_prefix(sid));
    let mut books: BTreeMap<String, BookFields> = BTreeMap::new();

    for (key, value) in entries {
        let Some((bid, field)) = key
            .strip_prefix(&prefix)
            .and_then(|rest| rest.split_once('.'))
        else {
            continue;
        };
        let book = books.entry(bid.to_string()).or_default();
        if book.error.is_some() {
            continue;
        }
        if let Err(err) = book.apply(&key, field, &value) {
            book.error = Some(err);
        }
    }

    books
        .into_iter()
        .map(|(bid, fields)| {
            let book = fields.into_address_book(sid, bid.clone());
            (bid, book)
        })
        .collect()
}

/// Typed access to servers and address books through one [`KvSession`].
///
/// Multi-field writes are staged and committed as one batch, so readers see
/// either all of them or none.
pub struct Catalog<'a> {
    kv: KvSession<'a>,
}

impl<'a> Catalog<'a> {
    /// Opens a session on `store`.
    #[must_use]
    pub fn open(store: &'a KvStore) -> Self {
        Self {
            kv: store.session(),
        }
    }

    /// Returns every saved server id, sorted.
    pub fn server_ids(&self) -> SyncResult<Vec<String>> {
        let ids: BTreeSet<String> = self
            .kv
            .get_partial(SERVERS)?
            .into_iter()
            .filter_map(|(key, _)| key.split('.').nth(1).map(str::to_string))
            .collect();
        Ok(ids.into_iter().collect())
    }

    /// Loads a server, or `None` if nothing is stored under its id.
    ///
    /// Missing fields load as empty strings.
    pub fn server(&self, sid: &str) -> SyncResult<Option<Server>> {
        check_id("server", sid)?;
        let mut server = Server {
            id: sid.to_string(),
            url: String::new(),
            username: String::new(),
            password: String::new(),
            display_name: String::new(),
        };

        let prefix = server_prefix(sid);
        let entries = self.kv.get_partial(&prefix)?;
        if entries.is_empty() {
            return Ok(None);
        }
        for (key, value) in &entries {
            let Some((parent, field)) = key.rsplit_once('.') else {
                continue;
            };
            if parent != prefix {
                continue;
            }
            match field {
                "url" => server.url = text(key, value)?,
                "username" => server.username = text(key, value)?,
                "password" => server.password = text(key, value)?,
                "name" => server.display_name = text(key, value)?,
                _ => {}
            }
        }
        Ok(Some(server))
    }

    /// Loads every address book of a server, sorted by id.
    ///
    /// Fails if any of them holds a badly typed field.
    pub fn address_books(&self, sid: &str) -> SyncResult<Vec<AddressBook>> {
        self.address_book_entries(sid)?
            .into_iter()
            .map(|(_, book)| book)
            .collect()
    }

    /// Loads every address book of a server, sorted by id, keeping
    /// unreadable ones as errors next to their id.
    pub fn address_book_entries(&self, sid: &str) -> SyncResult<Vec<BookEntry>> {
        check_id("server", sid)?;
        Ok(parse_books(sid, self.kv.get_partial(&books_prefix(sid))?))
    }

    /// Loads one address book, or `None` if nothing is stored under its id.
    pub fn address_book(&self, sid: &str, bid: &str) -> SyncResult<Option<AddressBook>> {
        check_id("server", sid)?;
        check_id("address book", bid)?;
        let entries = self
            .kv
            .get_partial(&format!("{}.{bid}", books_prefix(sid)))?;
        parse_books(sid, entries)
            .into_iter()
            .next()
            .map(|(_, book)| book)
            .transpose()
    }

    /// Saves a server and its discovered address books in one batch.
    pub fn save_server(&mut self, server: &Server, books: &[DiscoveredAddressBook]) -> SyncResult<()> {
        check_id("server", &server.id)?;
        let sid = server.id.as_str();
        self.kv.put_cached(&server_key(sid, "url"), server.url.as_str())?;
        self.kv.put_cached(&server_key(sid, "username"), server.username.as_str())?;
        self.kv.put_cached(&server_key(sid, "password"), server.password.as_str())?;
        self.kv.put_cached(&server_key(sid, "name"), server.display_name.as_str())?;
        for book in books {
            let bid = address_book_id(&book.url);
            self.kv.put_cached(&book_key(sid, &bid, "url"), book.url.as_str())?;
            self.kv.put_cached(&book_key(sid, &bid, "name"), book.name.as_str())?;
        }
        self.kv.commit_cached()?;
        Ok(())
    }

    /// Enables an address book and schedules its first run.
    pub fn enable(&mut self, sid: &str, bid: &str) -> SyncResult<()> {
        self.kv.put_cached(&book_key(sid, bid, "enabled"), true)?;
        self.kv.put_cached(&book_key(sid, bid, "first_run"), true)?;
        self.kv.commit_cached()?;
        Ok(())
    }

    /// Disables an address book and clears its pending first run.
    pub fn disable(&mut self, sid: &str, bid: &str) -> SyncResult<()> {
        self.kv.put_cached(&book_key(sid, bid, "first_run"), false)?;
        self.kv.put_cached(&book_key(sid, bid, "enabled"), false)?;
        self.kv.commit_cached()?;
        Ok(())
    }

    /// Records whether the next run must provision from scratch.
    pub fn set_first_run_pending(&self, sid: &str, bid: &str, pending: bool) -> SyncResult<()> {
        self.kv.put(&book_key(sid, bid, "first_run"), pending)?;
        Ok(())
    }

    /// Overwrites the last-run record in one batch.
    pub fn record_last_run(&mut self, sid: &str, bid: &str, run: &LastRun) -> SyncResult<()> {
        self.kv.put_cached(&book_key(sid, bid, "last_run.time"), run.time)?;
        self.kv
            .put_cached(&book_key(sid, bid, "last_run.type"), run.run_type.as_str())?;
        self.kv.put_cached(&book_key(sid, bid, "last_run.success"), run.success)?;
        self.kv
            .put_cached(&book_key(sid, bid, "last_run.message"), run.message.as_str())?;
        self.kv.commit_cached()?;
        Ok(())
    }

    /// Removes a server and everything beneath it in one record.
    pub fn delete_server(&self, sid: &str) -> SyncResult<()> {
        check_id("server", sid)?;
        self.kv.delete_partial(&server_prefix(sid))?;
        Ok(())
    }

    /// Ends the session, committing anything still staged.
    pub fn close(self) -> SyncResult<()> {
        self.kv.close()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server(id: &str) -> Server {
        Server {
            id: id.into(),
            url: "https://dav.example.com/.well-known/carddav".into(),
            username: "alice".into(),
            password: "secret".into(),
            display_name: "dav.example.com".into(),
        }
    }

    fn discovered(name: &str, url: &str) -> DiscoveredAddressBook {
        DiscoveredAddressBook {
            name: name.into(),
            url: url.into(),
        }
    }

    #[test]
    fn save_and_load_server() {
        let store = KvStore::in_memory();
        let mut catalog = Catalog::open(&store);
        let books = [
            discovered("Personal", "https://dav.example.com/a/"),
            discovered("Work", "https://dav.example.com/b/"),
        ];
        catalog.save_server(&server("s1"), &books).unwrap();

        assert_eq!(catalog.server_ids().unwrap(), vec!["s1"]);
        assert_eq!(catalog.server("s1").unwrap(), Some(server("s1")));

        let loaded = catalog.address_books("s1").unwrap();
        assert_eq!(loaded.len(), 2);
        for book in &loaded {
            assert_eq!(book.id, address_book_id(&book.url));
            assert_eq!(book.server_id, "s1");
            assert_eq!(book.state, BookState::Unconfigured);
            assert_eq!(book.last_run, None);
        }
    }

    #[test]
    fn unknown_ids_are_absent() {
        let store = KvStore::in_memory();
        let catalog = Catalog::open(&store);
        assert_eq!(catalog.server("nope").unwrap(), None);
        assert_eq!(catalog.address_book("nope", "x").unwrap(), None);
        assert!(matches!(
            catalog.server("a.b"),
            Err(SyncError::NotFound { .. })
        ));
    }

    #[test]
    fn server_prefix_does_not_capture_longer_ids() {
        let store = KvStore::in_memory();
        let mut catalog = Catalog::open(&store);
        catalog.save_server(&server("ab"), &[]).unwrap();
        catalog
            .save_server(&server("abc"), &[discovered("X", "https://x/")])
            .unwrap();

        assert!(catalog.address_books("ab").unwrap().is_empty());
        catalog.delete_server("ab").unwrap();
        assert_eq!(catalog.server_ids().unwrap(), vec!["abc"]);
        assert_eq!(catalog.address_books("abc").unwrap().len(), 1);
    }

    #[test]
    fn enable_disable_flags() {
        let store = KvStore::in_memory();
        let mut catalog = Catalog::open(&store);
        let url = "https://dav.example.com/a/";
        catalog
            .save_server(&server("s1"), &[discovered("Personal", url)])
            .unwrap();
        let bid = address_book_id(url);

        catalog.enable("s1", &bid).unwrap();
        let book = catalog.address_book("s1", &bid).unwrap().unwrap();
        assert_eq!(book.state, BookState::FirstRunPending);
        assert!(book.enabled());

        catalog.set_first_run_pending("s1", &bid, false).unwrap();
        let book = catalog.address_book("s1", &bid).unwrap().unwrap();
        assert_eq!(book.state, BookState::SteadyState);

        catalog.disable("s1", &bid).unwrap();
        let book = catalog.address_book("s1", &bid).unwrap().unwrap();
        assert_eq!(book.state, BookState::Disabled);
        assert!(!book.first_run_pending());
    }

    #[test]
    fn last_run_round_trip() {
        let store = KvStore::in_memory();
        let mut catalog = Catalog::open(&store);
        let url = "https://dav.example.com/a/";
        catalog
            .save_server(&server("s1"), &[discovered("Personal", url)])
            .unwrap();
        let bid = address_book_id(url);
        let run = LastRun {
            time: 1_700_000_000,
            run_type: RunType::FirstTime,
            success: false,
            message: "create_database failed with error: boom".into(),
        };
        catalog.record_last_run("s1", &bid, &run).unwrap();
        let book = catalog.address_book("s1", &bid).unwrap().unwrap();
        assert_eq!(book.last_run, Some(run));
    }

    #[test]
    fn bad_field_only_fails_its_own_book() {
        let store = KvStore::in_memory();
        let mut catalog = Catalog::open(&store);
        let good = "https://dav.example.com/a/";
        let bad = "https://dav.example.com/b/";
        catalog
            .save_server(
                &server("s1"),
                &[discovered("Good", good), discovered("Bad", bad)],
            )
            .unwrap();
        let bad_id = address_book_id(bad);
        store
            .session()
            .put(
                &format!("server.s1.addressbook.{bad_id}.last_run.time"),
                "yesterday",
            )
            .unwrap();

        let entries = catalog.address_book_entries("s1").unwrap();
        assert_eq!(entries.len(), 2);
        for (bid, book) in &entries {
            if *bid == bad_id {
                assert!(matches!(
                    book,
                    Err(SyncError::Store(KvError::TypeMismatch { .. }))
                ));
            } else {
                assert_eq!(book.as_ref().unwrap().name, "Good");
            }
        }
        assert!(catalog.address_books("s1").is_err());
        assert!(catalog.address_book("s1", &address_book_id(good)).is_ok());
    }

    #[test]
    fn wrong_typed_flag_is_an_error() {
        let store = KvStore::in_memory();
        let catalog = Catalog::open(&store);
        store
            .session()
            .put("server.s1.addressbook.b1.enabled", "true")
            .unwrap();
        assert!(matches!(
            catalog.address_books("s1"),
            Err(SyncError::Store(KvError::TypeMismatch { .. }))
        ));
    }
}
