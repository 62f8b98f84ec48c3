//! Property tests
//!
//! - Entity blobs round-trip every field kind, with and without sealed fields
//! - After any sequence of puts and deletes, an equality index answers
//!   exactly what a scan of the stored entities would
//! - JSON-format entities go through the same write and index path

#[path = "../common/mod.rs"]
mod common;

use common::*;
use mosaicdb::core::FieldMap;
use mosaicdb::EntityCodec;
use proptest::prelude::*;
use std::collections::BTreeMap;
use std::sync::Arc;

fn field_value() -> impl Strategy<Value = FieldValue> {
    prop_oneof![
        Just(FieldValue::Null),
        any::<bool>().prop_map(FieldValue::Bool),
        any::<i64>().prop_map(FieldValue::Int),
        any::<f64>().prop_map(FieldValue::Double),
        ".{0,24}".prop_map(FieldValue::String),
        prop::collection::vec(any::<f32>(), 0..16).prop_map(FieldValue::Vector),
        prop::collection::vec(any::<u8>(), 0..32).prop_map(FieldValue::Binary),
    ]
}

fn field_map() -> impl Strategy<Value = FieldMap> {
    prop::collection::btree_map("[a-z_][a-z0-9_]{0,11}", field_value(), 0..12)
}

proptest! {
    #[test]
    fn blob_round_trip(fields in field_map()) {
        let e = BaseEntity::from_fields("pk", fields.clone());
        let back = BaseEntity::deserialize("pk", &e.serialize()).unwrap();
        prop_assert_eq!(back.fields().unwrap(), &fields);
    }

    #[test]
    fn sealed_round_trip(fields in field_map(), key in any::<u8>()) {
        let mut codec = EntityCodec::with_cipher(Arc::new(XorCipher(key)));
        for name in fields.keys().step_by(2) {
            codec = codec.encrypt_field("t", name.clone());
        }
        let e = BaseEntity::from_fields("pk", fields.clone());
        let blob = codec.encode("t", &e).unwrap();
        let back = codec.decode("t", "pk", &blob).unwrap();
        prop_assert_eq!(back.fields().unwrap(), &fields);
    }
}

#[derive(Debug, Clone)]
enum Op {
    Put(u8, u8),
    Delete(u8),
}

fn ops() -> impl Strategy<Value = Vec<Op>> {
    prop::collection::vec(
        prop_oneof![
            3 => (0u8..8, 0u8..3).prop_map(|(k, v)| Op::Put(k, v)),
            1 => (0u8..8).prop_map(Op::Delete),
        ],
        1..40,
    )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn equality_index_matches_model(ops in ops()) {
        let t = TestDb::new();
        t.db.create_index("items", "color", IndexKind::equality()).unwrap();
        let mut model: BTreeMap<String, String> = BTreeMap::new();

        for op in &ops {
            match op {
                Op::Put(k, v) => {
                    let pk = format!("k{}", k);
                    let color = format!("c{}", v);
                    t.db.put("items", &entity(&pk, &[("color", color.as_str().into())])).unwrap();
                    model.insert(pk, color);
                }
                Op::Delete(k) => {
                    let pk = format!("k{}", k);
                    t.db.delete("items", &pk).unwrap();
                    model.remove(&pk);
                }
            }
        }

        for v in 0..3 {
            let color = format!("c{}", v);
            let expected: Vec<String> = model
                .iter()
                .filter(|(_, c)| **c == color)
                .map(|(pk, _)| pk.clone())
                .collect();
            let found = t.db.scan_equal("items", "color", &color.as_str().into()).unwrap();
            prop_assert_eq!(found, expected);
        }
    }
}

#[test]
fn json_entities_store_and_index_like_binary_ones() {
    let t = TestDb::new();
    t.db.create_index("people", "age", IndexKind::Range).unwrap();
    let doc = serde_json::json!({ "name": "Ada", "age": 36, "score": 2.5, "tags": ["x", 1] });
    let e = BaseEntity::from_json("p1", &doc.to_string()).unwrap();
    assert_eq!(e.get_field_as_int("age").unwrap(), Some(36));
    t.db.put("people", &e).unwrap();

    let back = t.db.get("people", "p1").unwrap().unwrap();
    let json: serde_json::Value = serde_json::from_str(&back.to_json().unwrap()).unwrap();
    assert_eq!(json["name"], "Ada");
    assert_eq!(json["age"], 36);
    assert_eq!(json["score"], 2.5);
    assert_eq!(
        t.db.scan_range("people", "age", &mosaicdb::RangeQuery::between(30, 40)).unwrap(),
        vec!["p1"]
    );
}
