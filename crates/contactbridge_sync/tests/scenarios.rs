//! End-to-end scenarios through the application facade.

use contactbridge_dav::MockDavClient;
use contactbridge_kv::{KvConfig, KvStore, ManualClock};
use contactbridge_sync::{
    address_book_id, is_locked, AddressBook, BookState, BridgeConfig, Catalog, ContactBridge,
    EngineOp, EngineOutput, OpResponse, RunType, ScriptedEngine, DEFAULT_LOCK_TTL, LOCK_KEY,
    NO_ADDRESS_BOOKS_MESSAGE,
};
use std::sync::Arc;

const ROOT: &str = "https://dav.example.com/dav/";
const PRINCIPAL: &str = "https://dav.example.com/dav/principals/alice/";
const HOME: &str = "https://dav.example.com/dav/addressbooks/alice/";
const BOOK_A: &str = "https://dav.example.com/dav/addressbooks/alice/personal/";
const BOOK_B: &str = "https://dav.example.com/dav/addressbooks/alice/work/";

const NOW_SECS: i64 = 1_700_000_000;

const PRINCIPAL_BODY: &str = r#"<?xml version="1.0"?>
<d:multistatus xmlns:d="DAV:">
  <d:response><d:href>/dav/</d:href>
    <d:propstat><d:prop>
      <d:current-user-principal><d:href>/dav/principals/alice/</d:href></d:current-user-principal>
    </d:prop></d:propstat>
  </d:response>
</d:multistatus>"#;

const HOME_BODY: &str = r#"<?xml version="1.0"?>
<d:multistatus xmlns:d="DAV:" xmlns:card="urn:ietf:params:xml:ns:carddav">
  <d:response><d:href>/dav/principals/alice/</d:href>
    <d:propstat><d:prop>
      <card:addressbook-home-set><d:href>/dav/addressbooks/alice/</d:href></card:addressbook-home-set>
    </d:prop></d:propstat>
  </d:response>
</d:multistatus>"#;

const LISTING: &str = r#"<?xml version="1.0"?>
<d:multistatus xmlns:d="DAV:" xmlns:card="urn:ietf:params:xml:ns:carddav">
  <d:response>
    <d:href>/dav/addressbooks/alice/</d:href>
    <d:propstat><d:prop><d:resourcetype><d:collection/></d:resourcetype></d:prop></d:propstat>
  </d:response>
  <d:response>
    <d:href>/dav/addressbooks/alice/personal/</d:href>
    <d:propstat><d:prop>
      <d:resourcetype><d:collection/><card:addressbook/></d:resourcetype>
      <d:displayname>Personal</d:displayname>
    </d:prop></d:propstat>
  </d:response>
  <d:response>
    <d:href>/dav/addressbooks/alice/work/</d:href>
    <d:propstat><d:prop>
      <d:resourcetype><d:collection/><card:addressbook/></d:resourcetype>
      <d:displayname>Work</d:displayname>
    </d:prop></d:propstat>
  </d:response>
</d:multistatus>"#;

const EMPTY_LISTING: &str = r#"<?xml version="1.0"?>
<d:multistatus xmlns:d="DAV:">
  <d:response>
    <d:href>/dav/addressbooks/alice/</d:href>
    <d:propstat><d:prop><d:resourcetype><d:collection/></d:resourcetype></d:prop></d:propstat>
  </d:response>
</d:multistatus>"#;

const CLEANUP: [&str; 3] = [
    "remove_pairing",
    "remove_server_configuration",
    "remove_database",
];

const PROVISIONING: [&str; 6] = [
    "create_database",
    "create_server_configuration",
    "create_addressbook_configuration",
    "create_local_configuration",
    "create_two_way_configuration",
    "run_first_sync",
];

type Bridge = ContactBridge<MockDavClient, ScriptedEngine>;

fn dav_server(listing: &str) -> MockDavClient {
    MockDavClient::new()
        .respond(ROOT, 207, PRINCIPAL_BODY)
        .respond(PRINCIPAL, 207, HOME_BODY)
        .respond(HOME, 207, listing)
}

fn bridge_with(store: KvStore) -> Bridge {
    ContactBridge::with_parts(
        store,
        dav_server(LISTING),
        ScriptedEngine::new(),
        DEFAULT_LOCK_TTL,
    )
}

fn bridge() -> Bridge {
    let clock = ManualClock::new(NOW_SECS * 1000);
    bridge_with(KvStore::in_memory_with_clock(Arc::new(clock)))
}

/// Saves the two-book server and returns its id.
fn save(bridge: &Bridge) -> String {
    let outcome = bridge.save_server("https://dav.example.com/dav", "alice", "secret");
    assert!(outcome.success, "{}", outcome.message);
    outcome.message
}

fn book(bridge: &Bridge, sid: &str, url: &str) -> AddressBook {
    Catalog::open(bridge.store())
        .address_book(sid, &address_book_id(url))
        .unwrap()
        .unwrap()
}

fn count(calls: &[&str], name: &str) -> usize {
    calls.iter().filter(|call| **call == name).count()
}

#[test]
fn save_server_records_discovered_books() {
    let bridge = bridge();
    let sid = save(&bridge);

    let servers = bridge.list_servers().unwrap();
    assert_eq!(servers.len(), 1);
    assert_eq!(servers[0].id, sid);
    assert_eq!(servers[0].name, "dav.example.com");
    assert_eq!(servers[0].address_book_count, 2);

    let detail = bridge.server_detail(&sid).unwrap();
    let mut expected = vec![
        (address_book_id(BOOK_A), "Personal"),
        (address_book_id(BOOK_B), "Work"),
    ];
    expected.sort();
    let found: Vec<(String, &str)> = detail
        .iter()
        .map(|row| (row.id.clone(), row.name.as_str()))
        .collect();
    assert_eq!(found, expected);
    assert!(detail.iter().all(|row| !row.enabled));

    let server = Catalog::open(bridge.store()).server(&sid).unwrap().unwrap();
    assert_eq!(server.url, "https://dav.example.com/dav");
    assert_eq!(server.username, "alice");
}

#[test]
fn rediscovery_yields_the_same_ids() {
    let bridge = bridge();
    let first = save(&bridge);
    let second = save(&bridge);
    assert_ne!(first, second);

    let ids = |sid: &str| -> Vec<String> {
        bridge
            .server_detail(sid)
            .unwrap()
            .into_iter()
            .map(|row| row.id)
            .collect()
    };
    assert_eq!(ids(&first), ids(&second));
}

#[test]
fn empty_discovery_is_reported() {
    let bridge = ContactBridge::with_parts(
        KvStore::in_memory(),
        dav_server(EMPTY_LISTING),
        ScriptedEngine::new(),
        DEFAULT_LOCK_TTL,
    );
    let outcome = bridge.save_server("https://dav.example.com/dav", "alice", "secret");
    assert_eq!(outcome, OpResponse::fail(NO_ADDRESS_BOOKS_MESSAGE));
    assert!(bridge.list_servers().unwrap().is_empty());
}

#[test]
fn rejected_credentials_are_a_fetch_failure() {
    let bridge = ContactBridge::with_parts(
        KvStore::in_memory(),
        MockDavClient::new().respond(ROOT, 401, ""),
        ScriptedEngine::new(),
        DEFAULT_LOCK_TTL,
    );
    let outcome = bridge.save_server("https://dav.example.com/dav", "alice", "wrong");
    assert!(!outcome.success);
    assert!(outcome.message.starts_with("Failed to fetch server. Error: "));
    assert!(outcome.message.contains("401"));
    assert!(bridge.list_servers().unwrap().is_empty());
}

#[test]
fn enabled_book_goes_from_first_run_to_steady_state() {
    let bridge = bridge();
    let sid = save(&bridge);
    let a = address_book_id(BOOK_A);
    assert!(bridge.set_address_book_enabled(&sid, &a, true).success);

    let outcome = bridge.sync_servers();
    assert!(outcome.success, "{}", outcome.message);
    assert_eq!(bridge.engine().call_names(), PROVISIONING);
    assert!(bridge
        .engine()
        .calls()
        .iter()
        .filter_map(EngineOp::engine_id)
        .all(|id| id == &a[..7]));

    let book_a = book(&bridge, &sid, BOOK_A);
    assert_eq!(book_a.state, BookState::SteadyState);
    let run = book_a.last_run.unwrap();
    assert_eq!(run.run_type, RunType::FirstTime);
    assert!(run.success);
    assert_eq!(run.time, NOW_SECS);

    assert_eq!(book(&bridge, &sid, BOOK_B).last_run, None);
    assert!(!is_locked(bridge.store()).unwrap());
    assert_eq!(
        bridge.store().session().get_bool(LOCK_KEY).unwrap(),
        Some(false)
    );

    bridge.engine().clear_calls();
    assert!(bridge.sync_servers().success);
    assert_eq!(bridge.engine().call_names(), vec!["two_way_sync"]);
    let run = book(&bridge, &sid, BOOK_A).last_run.unwrap();
    assert_eq!(run.run_type, RunType::Regular);
}

#[test]
fn held_lock_rejects_the_run() {
    let bridge = bridge();
    let sid = save(&bridge);
    let a = address_book_id(BOOK_A);
    bridge.set_address_book_enabled(&sid, &a, true);
    assert!(bridge.sync_servers().success);
    let before = book(&bridge, &sid, BOOK_A);
    bridge.engine().clear_calls();

    bridge
        .store()
        .session()
        .put_with_ttl(LOCK_KEY, true, DEFAULT_LOCK_TTL)
        .unwrap();
    let outcome = bridge.sync_servers();

    assert!(!outcome.success);
    assert!(outcome.message.contains("Another instance"));
    assert!(bridge.engine().calls().is_empty());
    assert_eq!(book(&bridge, &sid, BOOK_A), before);
    assert!(is_locked(bridge.store()).unwrap());
}

#[test]
fn failed_binding_step_rolls_back_and_stays_pending() {
    let bridge = bridge();
    let sid = save(&bridge);
    let a = address_book_id(BOOK_A);
    bridge.set_address_book_enabled(&sid, &a, true);
    bridge.engine().respond(
        "create_addressbook_configuration",
        EngineOutput::failed(1, "collection not found"),
    );

    let outcome = bridge.sync_servers();
    assert!(!outcome.success);
    assert!(outcome.message.contains("collection not found"));

    let calls = bridge.engine().call_names();
    assert_eq!(&calls[..3], &PROVISIONING[..3]);
    assert_eq!(&calls[3..], &CLEANUP);
    for step in CLEANUP {
        assert_eq!(count(&calls, step), 1);
    }

    let book_a = book(&bridge, &sid, BOOK_A);
    assert_eq!(book_a.state, BookState::FirstRunPending);
    let run = book_a.last_run.unwrap();
    assert!(!run.success);
    assert_eq!(run.run_type, RunType::FirstTime);
    assert!(run.message.contains("collection not found"));
    assert!(!is_locked(bridge.store()).unwrap());

    // The next run starts over.
    bridge.engine().clear_calls();
    bridge.engine().respond(
        "create_addressbook_configuration",
        EngineOutput::ok(""),
    );
    assert!(bridge.sync_servers().success);
    assert_eq!(bridge.engine().call_names(), PROVISIONING);
}

#[test]
fn steady_state_failure_keeps_configuration() {
    let bridge = bridge();
    let sid = save(&bridge);
    let a = address_book_id(BOOK_A);
    bridge.set_address_book_enabled(&sid, &a, true);
    assert!(bridge.sync_servers().success);
    bridge.engine().clear_calls();

    bridge
        .engine()
        .respond("two_way_sync", EngineOutput::failed(1, "server unreachable"));
    let outcome = bridge.sync_servers();

    assert_eq!(
        outcome,
        OpResponse::fail("two_way_sync failed with error: server unreachable")
    );
    assert_eq!(bridge.engine().call_names(), vec!["two_way_sync"]);
    let book_a = book(&bridge, &sid, BOOK_A);
    assert_eq!(book_a.state, BookState::SteadyState);
    assert!(!book_a.last_run.unwrap().success);
}

#[test]
fn one_failure_does_not_stop_the_loop() {
    let bridge = bridge();
    let sid = save(&bridge);
    let a = address_book_id(BOOK_A);
    let b = address_book_id(BOOK_B);
    bridge.set_address_book_enabled(&sid, &a, true);
    bridge.set_address_book_enabled(&sid, &b, true);
    bridge.engine().respond_for(
        "run_first_sync",
        &a[..7],
        EngineOutput::failed(1, "quota exceeded"),
    );

    let outcome = bridge.sync_servers();
    assert!(!outcome.success);
    assert!(outcome.message.contains("quota exceeded"));

    assert_eq!(book(&bridge, &sid, BOOK_A).state, BookState::FirstRunPending);
    let book_b = book(&bridge, &sid, BOOK_B);
    assert_eq!(book_b.state, BookState::SteadyState);
    assert!(book_b.last_run.unwrap().success);
}

#[test]
fn unreadable_book_does_not_stop_the_loop() {
    let bridge = bridge();
    let sid = save(&bridge);
    let a = address_book_id(BOOK_A);
    let b = address_book_id(BOOK_B);
    bridge.set_address_book_enabled(&sid, &a, true);
    bridge.set_address_book_enabled(&sid, &b, true);
    assert!(bridge.sync_servers().success);
    bridge.engine().clear_calls();

    bridge
        .store()
        .session()
        .put(
            &format!("server.{sid}.addressbook.{a}.last_run.time"),
            "yesterday",
        )
        .unwrap();
    let outcome = bridge.sync_servers();

    assert!(!outcome.success);
    assert!(outcome.message.contains(&a), "{}", outcome.message);
    assert_eq!(bridge.engine().call_names(), vec!["two_way_sync"]);
    let book_b = book(&bridge, &sid, BOOK_B);
    let run = book_b.last_run.unwrap();
    assert_eq!(run.run_type, RunType::Regular);
    assert!(run.success);
    assert!(!is_locked(bridge.store()).unwrap());
}

#[test]
fn missing_password_fails_without_engine_calls() {
    let bridge = bridge();
    let sid = save(&bridge);
    let a = address_book_id(BOOK_A);
    bridge.set_address_book_enabled(&sid, &a, true);
    bridge
        .store()
        .session()
        .put(&format!("server.{sid}.password"), "")
        .unwrap();

    let outcome = bridge.sync_servers();
    assert_eq!(outcome, OpResponse::fail("Failed to sync addressbook Personal"));
    assert!(bridge.engine().calls().is_empty());

    let book_a = book(&bridge, &sid, BOOK_A);
    assert_eq!(book_a.state, BookState::FirstRunPending);
    assert_eq!(
        book_a.last_run.unwrap().message,
        "Failed to sync addressbook Personal"
    );
}

#[test]
fn disabling_a_nameless_book_fails_and_keeps_it_enabled() {
    let bridge = bridge();
    let sid = save(&bridge);
    let a = address_book_id(BOOK_A);
    bridge.set_address_book_enabled(&sid, &a, true);
    bridge
        .store()
        .session()
        .delete(&format!("server.{sid}.addressbook.{a}.name"))
        .unwrap();

    let outcome = bridge.set_address_book_enabled(&sid, &a, false);
    assert!(!outcome.success);
    assert!(outcome.message.contains("has no name"));
    assert!(bridge.engine().calls().is_empty());
    assert!(book(&bridge, &sid, BOOK_A).enabled());
}

#[test]
fn disabled_book_is_skipped_and_reenable_starts_over() {
    let bridge = bridge();
    let sid = save(&bridge);
    let a = address_book_id(BOOK_A);
    bridge.set_address_book_enabled(&sid, &a, true);
    assert!(bridge.sync_servers().success);

    assert!(bridge.set_address_book_enabled(&sid, &a, false).success);
    assert_eq!(book(&bridge, &sid, BOOK_A).state, BookState::Disabled);
    bridge.engine().clear_calls();
    assert!(bridge.sync_servers().success);
    assert!(bridge.engine().calls().is_empty());

    assert!(bridge.set_address_book_enabled(&sid, &a, true).success);
    assert_eq!(book(&bridge, &sid, BOOK_A).state, BookState::FirstRunPending);
    assert!(bridge.sync_servers().success);
    assert_eq!(bridge.engine().call_names(), PROVISIONING);
}

#[test]
fn delete_server_aborts_on_a_nameless_book() {
    let bridge = bridge();
    let sid = save(&bridge);
    let b = address_book_id(BOOK_B);
    bridge
        .store()
        .session()
        .put(&format!("server.{sid}.addressbook.{b}.name"), "")
        .unwrap();

    let outcome = bridge.delete_server(&sid);
    assert!(!outcome.success);
    assert!(bridge.engine().calls().is_empty());
    assert_eq!(bridge.list_servers().unwrap().len(), 1);
    assert_eq!(bridge.server_detail(&sid).unwrap().len(), 2);
}

#[test]
fn delete_server_keeps_everything_when_cleanup_fails() {
    let bridge = bridge();
    let sid = save(&bridge);
    let a = address_book_id(BOOK_A);
    let b = address_book_id(BOOK_B);
    bridge.set_address_book_enabled(&sid, &a, true);
    bridge.set_address_book_enabled(&sid, &b, true);
    assert!(bridge.sync_servers().success);

    // Fail the second address book's cleanup, whichever order they run in.
    let (first, second) = if a < b { (&a, &b) } else { (&b, &a) };
    bridge.engine().respond_for(
        "remove_pairing",
        &second[..7],
        EngineOutput::failed(1, "permission denied"),
    );
    let outcome = bridge.delete_server(&sid);

    assert!(!outcome.success);
    assert!(outcome.message.contains("permission denied"));
    assert_eq!(bridge.list_servers().unwrap().len(), 1);
    let catalog = Catalog::open(bridge.store());
    let torn_down = catalog.address_book(&sid, first).unwrap().unwrap();
    assert_eq!(torn_down.state, BookState::FirstRunPending);
    let untouched = catalog.address_book(&sid, second).unwrap().unwrap();
    assert_eq!(untouched.state, BookState::SteadyState);
}

#[test]
fn delete_server_removes_everything() {
    let bridge = bridge();
    let sid = save(&bridge);
    let a = address_book_id(BOOK_A);
    bridge.set_address_book_enabled(&sid, &a, true);
    assert!(bridge.sync_servers().success);
    bridge.engine().clear_calls();

    assert_eq!(bridge.delete_server(&sid), OpResponse::ok());
    let calls = bridge.engine().call_names();
    assert_eq!(calls.len(), 6);
    assert_eq!(count(&calls, "remove_database"), 2);
    assert!(bridge.list_servers().unwrap().is_empty());
    assert!(bridge
        .store()
        .session()
        .get_partial(&format!("server.{sid}"))
        .unwrap()
        .is_empty());
}

#[test]
fn sync_log_lists_books_that_ran() {
    let bridge = bridge();
    let sid = save(&bridge);
    let a = address_book_id(BOOK_A);
    bridge.set_address_book_enabled(&sid, &a, true);
    bridge
        .engine()
        .respond("run_first_sync", EngineOutput::ok("12 contacts received"));
    assert!(bridge.sync_servers().success);

    let log = bridge.sync_log(&sid).unwrap();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].address_book_name, "Personal");
    assert_eq!(log[0].run_type, RunType::FirstTime);
    assert!(log[0].success);
    assert_eq!(log[0].message, "12 contacts received");
    assert!(log[0].time.starts_with("2023-11-1"));
}

#[test]
fn state_survives_reopening_the_store() {
    let dir = tempfile::tempdir().unwrap();
    let config = KvConfig::new().sync_on_commit(false);
    let a = address_book_id(BOOK_A);

    let sid = {
        let bridge = bridge_with(KvStore::open(dir.path(), config.clone()).unwrap());
        let sid = save(&bridge);
        bridge.set_address_book_enabled(&sid, &a, true);
        assert!(bridge.sync_servers().success);
        sid
    };

    let bridge = bridge_with(KvStore::open(dir.path(), config).unwrap());
    let book_a = book(&bridge, &sid, BOOK_A);
    assert_eq!(book_a.state, BookState::SteadyState);
    assert_eq!(book_a.last_run.unwrap().run_type, RunType::FirstTime);
    assert!(!is_locked(bridge.store()).unwrap());

    assert!(bridge.sync_servers().success);
    assert_eq!(bridge.engine().call_names(), vec!["two_way_sync"]);
}

#[test]
fn open_with_platform_parts() {
    let dir = tempfile::tempdir().unwrap();
    let config = BridgeConfig::new(dir.path().join("data"));
    let bridge = ContactBridge::open(&config).unwrap();

    assert!(bridge.list_servers().unwrap().is_empty());
    // No servers, so the engine is never spawned.
    assert_eq!(bridge.sync_servers(), OpResponse::ok());
}
