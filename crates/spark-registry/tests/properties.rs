//! 基于 proptest 的性质测试：路径改写可逆、调度顺序稳定、链接改写与直接访问一致。

mod support;

use std::sync::Arc;

use proptest::prelude::*;
use spark_registry::{AnyFilter, MethodSet, OperationKind, Registry, Resource, path, properties};
use support::{Recorder, call_log, entries};

fn segment() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9]{0,6}"
}

fn absolute(max: usize) -> impl Strategy<Value = String> {
    prop::collection::vec(segment(), 1..=max).prop_map(|segments| format!("/{}", segments.join("/")))
}

const NAMES: [&str; 6] = ["h0", "h1", "h2", "h3", "h4", "h5"];

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn normalize_is_idempotent(raw in prop::collection::vec(prop_oneof![segment(), Just(String::new()), Just(".".to_owned())], 0..6)) {
        let candidate = format!("/{}/", raw.join("//"));
        let once = path::normalize(&candidate).unwrap();
        prop_assert_eq!(path::normalize(&once).unwrap(), once.clone());
        prop_assert!(once.starts_with('/'));
        prop_assert!(once == "/" || !once.ends_with('/'));
    }

    #[test]
    fn rebase_round_trips(from in absolute(3), to in absolute(3), tail in prop::collection::vec(segment(), 0..4), version in 0u32..3) {
        let mut original = from.clone();
        for segment in &tail {
            original = path::join(&original, segment);
        }
        if version > 0 {
            original.push_str(&format!(";version:{version}"));
        }
        let moved = path::rebase(&original, &from, &to).unwrap();
        prop_assert!(path::is_within(&moved, &to));
        prop_assert_eq!(path::rebase(&moved, &to, &from).unwrap(), original);
    }

    #[test]
    fn handlers_run_in_insertion_order(count in 1usize..=6, urgent in any::<bool>()) {
        let registry = Registry::in_memory("local");
        let log = call_log();
        let get = Some(MethodSet::of(&[OperationKind::Get]));
        for name in NAMES.iter().take(count) {
            registry.add_handler(get, Arc::new(AnyFilter), Recorder::new(name, &log).shared());
        }
        if urgent {
            registry.add_handler_with_priority(get, Arc::new(AnyFilter), Recorder::new("urgent", &log).shared());
        }

        registry.put("/a", Resource::new()).unwrap();
        registry.get("/a").unwrap();

        let mut expected: Vec<String> = Vec::new();
        if urgent {
            expected.push("urgent:GET".to_owned());
        }
        expected.extend(NAMES.iter().take(count).map(|name| format!("{name}:GET")));
        prop_assert_eq!(entries(&log), expected);
    }

    #[test]
    fn symlinked_reads_match_direct_reads(tail in prop::collection::vec(segment(), 1..4), content in "[ -~]{0,24}") {
        let registry = Registry::in_memory("local");
        registry.create_link("/link", "/real").unwrap();
        let mut direct = "/real".to_owned();
        let mut linked = "/link".to_owned();
        for segment in &tail {
            direct = path::join(&direct, segment);
            linked = path::join(&linked, segment);
        }
        registry.put(&direct, Resource::new().with_content(content.clone())).unwrap();

        let through_link = registry.get(&linked).unwrap();
        prop_assert_eq!(through_link.path(), linked.as_str());
        prop_assert_eq!(through_link.content(), content.as_bytes());
        prop_assert_eq!(through_link.property(properties::ACTUAL_PATH), Some(direct.as_str()));
    }
}
