//! Property tests comparing prefix operations against a naive model.

use contactbridge_kv::{KvStore, Value};
use proptest::prelude::*;
use std::collections::BTreeMap;

fn segment() -> impl Strategy<Value = String> {
    prop::sample::select(vec!["a", "ab", "abc", "b", "server", "x1"]).prop_map(str::to_string)
}

fn key() -> impl Strategy<Value = String> {
    prop::collection::vec(segment(), 1..4).prop_map(|segs| segs.join("."))
}

fn in_model(key: &str, prefix: &str) -> bool {
    key == prefix || key.starts_with(&format!("{prefix}."))
}

proptest! {
    #[test]
    fn get_partial_matches_model(
        keys in prop::collection::vec(key(), 0..24),
        prefix in key(),
    ) {
        let store = KvStore::in_memory();
        let kv = store.session();
        let mut model = BTreeMap::new();
        for (i, k) in keys.iter().enumerate() {
            let v = i64::try_from(i).unwrap();
            kv.put(k, v).unwrap();
            model.insert(k.clone(), Value::Int(v));
        }

        let expected: Vec<(String, Value)> = model
            .iter()
            .filter(|(k, _)| in_model(k, &prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        prop_assert_eq!(kv.get_partial(&prefix).unwrap(), expected);
    }

    #[test]
    fn delete_partial_matches_model(
        keys in prop::collection::vec(key(), 0..24),
        prefix in key(),
    ) {
        let store = KvStore::in_memory();
        let kv = store.session();
        let mut model = BTreeMap::new();
        for k in &keys {
            kv.put(k, true).unwrap();
            model.insert(k.clone(), Value::Bool(true));
        }

        kv.delete_partial(&prefix).unwrap();
        model.retain(|k, _| !in_model(k, &prefix));

        let remaining: Vec<String> = kv
            .get_partial("a")
            .unwrap()
            .into_iter()
            .chain(kv.get_partial("ab").unwrap())
            .chain(kv.get_partial("abc").unwrap())
            .chain(kv.get_partial("b").unwrap())
            .chain(kv.get_partial("server").unwrap())
            .chain(kv.get_partial("x1").unwrap())
            .map(|(k, _)| k)
            .collect();
        let mut remaining = remaining;
        remaining.sort();
        let expected: Vec<String> = model.into_keys().collect();
        prop_assert_eq!(remaining, expected);
    }
}
