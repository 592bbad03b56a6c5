use proptest::prelude::*;
use docforge_core::query::{split_alias, FieldPath, InsertValues, Operator};
use docforge_core::{CollectionName, Document, KeyType};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Strategies
// ---------------------------------------------------------------------------

fn segment_strategy() -> impl Strategy<Value = String> {
    "[a-z_][a-z0-9_]{0,10}"
}

fn collection_name_strategy() -> impl Strategy<Value = String> {
    "[A-Za-z_][A-Za-z0-9_-]{0,30}"
}

fn operator_strategy() -> impl Strategy<Value = Operator> {
    prop_oneof![
        Just(Operator::Eq),
        Just(Operator::Ne),
        Just(Operator::Lt),
        Just(Operator::Lte),
        Just(Operator::Gt),
        Just(Operator::Gte),
        Just(Operator::Like),
        Just(Operator::NotLike),
        Just(Operator::In),
        Just(Operator::NotIn),
        Just(Operator::RegexMatch),
        Just(Operator::RegexNotMatch),
    ]
}

fn document_strategy() -> impl Strategy<Value = Document> {
    prop::collection::btree_map(segment_strategy(), any::<i64>(), 0..6).prop_map(|entries| {
        // Reverse insertion order so sorting has something to do.
        entries
            .into_iter()
            .rev()
            .map(|(k, v)| (k, Value::from(v)))
            .collect()
    })
}

// ---------------------------------------------------------------------------
// FieldPath
// ---------------------------------------------------------------------------

proptest! {
    #[test]
    fn field_path_dotted_roundtrip(segments in prop::collection::vec(segment_strategy(), 1..5)) {
        let dotted = segments.join(".");
        let path = FieldPath::parse(&dotted).unwrap();
        prop_assert_eq!(path.segments(), segments.as_slice());
        prop_assert_eq!(path.as_dotted(), dotted);
        prop_assert_eq!(path.leaf(), segments.last().unwrap().as_str());
    }

    #[test]
    fn field_path_tail_drops_root(segments in prop::collection::vec(segment_strategy(), 2..5)) {
        let path = FieldPath::parse(&segments.join(".")).unwrap();
        let tail = path.tail().unwrap();
        prop_assert_eq!(tail.segments(), &segments[1..]);
    }
}

// ---------------------------------------------------------------------------
// CollectionName
// ---------------------------------------------------------------------------

proptest! {
    #[test]
    fn valid_collection_names_accepted(name in collection_name_strategy()) {
        let parsed = CollectionName::new(name.clone()).unwrap();
        prop_assert_eq!(parsed.as_str(), name.as_str());
    }

    #[test]
    fn prefix_is_prepended(name in collection_name_strategy(), prefix in "[a-z]{1,5}_") {
        let parsed = CollectionName::new(name.clone()).unwrap();
        let prefixed = parsed.with_prefix(&prefix).unwrap();
        prop_assert_eq!(prefixed.as_str(), format!("{prefix}{name}"));
    }

    #[test]
    fn names_with_spaces_rejected(a in "[a-z]{1,5}", b in "[a-z]{1,5}") {
        let name = format!("{} {}", a, b);
        prop_assert!(CollectionName::new(name).is_err());
    }
}

// ---------------------------------------------------------------------------
// Operator
// ---------------------------------------------------------------------------

proptest! {
    #[test]
    fn operator_symbol_parses_back(op in operator_strategy()) {
        let parsed: Operator = op.symbol().parse().unwrap();
        prop_assert_eq!(parsed, op);
    }

    #[test]
    fn operator_negation_is_involutive(op in operator_strategy()) {
        prop_assert_eq!(op.negate().negate(), op);
        prop_assert_ne!(op.negate(), op);
    }

    #[test]
    fn equality_never_renders_single_equals(op in operator_strategy()) {
        prop_assert_ne!(op.symbol(), "=");
    }
}

// ---------------------------------------------------------------------------
// InsertValues
// ---------------------------------------------------------------------------

proptest! {
    #[test]
    fn batch_records_have_sorted_keys(docs in prop::collection::vec(document_strategy(), 0..5)) {
        let batch = InsertValues::Records(docs.clone()).into_batch();
        prop_assert_eq!(batch.len(), docs.len());
        for record in &batch {
            let keys: Vec<&String> = record.keys().collect();
            let mut sorted = keys.clone();
            sorted.sort();
            prop_assert_eq!(keys, sorted);
        }
    }

    #[test]
    fn batch_field_order_is_stable(docs in prop::collection::vec(document_strategy(), 1..5)) {
        let first = InsertValues::Records(docs.clone()).into_batch();
        let second = InsertValues::Records(docs).into_batch();
        for (a, b) in first.iter().zip(&second) {
            prop_assert_eq!(a.keys().collect::<Vec<_>>(), b.keys().collect::<Vec<_>>());
        }
    }

    #[test]
    fn single_record_keeps_its_order(doc in document_strategy()) {
        let batch = InsertValues::Record(doc.clone()).into_batch();
        if doc.is_empty() {
            prop_assert!(batch.is_empty());
        } else {
            prop_assert_eq!(batch[0].keys().collect::<Vec<_>>(), doc.keys().collect::<Vec<_>>());
        }
    }
}

// ---------------------------------------------------------------------------
// Aliases and keys
// ---------------------------------------------------------------------------

proptest! {
    #[test]
    fn alias_split(name in segment_strategy(), alias in segment_strategy(), keyword in "(as|AS|As)") {
        let (parsed, parsed_alias) = split_alias(&format!("{name} {keyword} {alias}"));
        prop_assert_eq!(parsed, name);
        prop_assert_eq!(parsed_alias, Some(alias));
    }

    #[test]
    fn unaliased_names_pass_through(name in segment_strategy()) {
        prop_assert_eq!(split_alias(&name), (name.clone(), None));
    }

    #[test]
    fn integer_keys_roundtrip(key in any::<i64>()) {
        let stored = KeyType::Integer.normalize(&Value::from(key));
        let key_str = key.to_string();
        prop_assert_eq!(stored.as_str(), Some(key_str.as_str()));
        prop_assert_eq!(KeyType::Integer.denormalize(&stored), Value::from(key));
    }
}
