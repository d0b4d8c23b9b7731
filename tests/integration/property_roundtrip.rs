#![allow(missing_docs)]

use std::collections::BTreeMap;

use penumbra::{
    storage::{ArrayValue, Crs, Point, TemporalValue},
    Config, Database, NodeId, PropertyKeyId, Result, Value,
};
use proptest::prelude::*;
use tempfile::tempdir;

fn config() -> Config {
    Config::default()
        .page_size(4096)
        .page_cache_pages(64)
        .dynamic_record_data_size(60)
}

fn every_kind_of_value() -> Vec<Value> {
    vec![
        Value::Bool(false),
        Value::Byte(-7),
        Value::Short(1234),
        Value::Char('λ'),
        Value::Int(i32::MIN),
        Value::Long(i64::MAX),
        Value::Float(1.5),
        Value::Double(-0.25),
        Value::from("short"),
        Value::String("a longer string that spills into several dynamic records".repeat(4)),
        Value::Point(Point {
            crs: Crs::Wgs84,
            x: 12.5,
            y: -41.25,
        }),
        Value::Temporal(TemporalValue::DateTime {
            epoch_millis: 1_700_000_000_000,
            offset_seconds: 3600,
        }),
        Value::Temporal(TemporalValue::Date { epoch_day: 19_000 }),
        Value::Array(ArrayValue::Long((0..100).collect())),
        Value::Array(ArrayValue::String(vec!["x".into(), "yy".into(), String::new()])),
        Value::Array(ArrayValue::Bool(vec![true, false, true])),
    ]
}

#[test]
fn every_value_kind_round_trips_through_commit_and_reopen() -> Result<()> {
    let dir = tempdir()?;
    let values = every_kind_of_value();
    let (node, keys) = {
        let db = Database::open(dir.path(), config())?;
        let mut tx = db.begin_write()?;
        let node = tx.create_node()?;
        let mut keys = Vec::new();
        for (i, value) in values.iter().enumerate() {
            let key = tx.property_key(&format!("key{i}"))?;
            tx.set_node_property(node, key, value.clone())?;
            keys.push(key);
        }
        assert_eq!(tx.node_property(node, keys[9])?, Some(values[9].clone()));
        tx.commit()?;

        let tx = db.begin_read()?;
        for (key, value) in keys.iter().zip(&values) {
            assert_eq!(tx.node_property(node, *key)?.as_ref(), Some(value));
        }
        tx.rollback()?;
        (node, keys)
    };

    // Reopen without a checkpoint so the values come back through replay.
    let db = Database::open(dir.path(), config().checkpoint_on_close(false))?;
    let tx = db.begin_read()?;
    let read = tx.node_properties(node)?;
    assert_eq!(read.len(), values.len());
    for (key, value) in keys.iter().zip(&values) {
        assert_eq!(tx.node_property(node, *key)?.as_ref(), Some(value));
    }
    Ok(())
}

#[test]
fn replacing_long_values_frees_their_records() -> Result<()> {
    let dir = tempdir()?;
    let db = Database::open(dir.path(), config())?;
    let mut tx = db.begin_write()?;
    let node = tx.create_node()?;
    let key = tx.property_key("bio")?;
    tx.set_node_property(node, key, "z".repeat(1000))?;
    tx.commit()?;
    let strings = &db.engine().stores().strings;
    let used_after_long = strings.records().high_id();

    let mut tx = db.begin_write()?;
    tx.set_node_property(node, key, "tiny")?;
    tx.commit()?;
    let mut tx = db.begin_write()?;
    tx.set_node_property(node, key, "w".repeat(1000))?;
    tx.commit()?;
    assert_eq!(
        strings.records().high_id(),
        used_after_long,
        "the second long value reuses the freed string records"
    );

    let mut tx = db.begin_write()?;
    assert!(tx.remove_node_property(node, key)?);
    assert!(!tx.remove_node_property(node, key)?);
    tx.commit()?;
    assert!(db.begin_read()?.node_properties(node)?.is_empty());
    Ok(())
}

#[test]
fn relationship_properties_are_kept_apart_from_node_properties() -> Result<()> {
    let dir = tempdir()?;
    let db = Database::open(dir.path(), config())?;
    let mut tx = db.begin_write()?;
    let since = tx.property_key("since")?;
    let knows = tx.relationship_type("KNOWS")?;
    let a = tx.create_node()?;
    let b = tx.create_node()?;
    let rel = tx.create_relationship(knows, a, b)?;
    tx.set_relationship_property(rel, since, 2019)?;
    tx.set_node_property(a, since, "node value")?;
    tx.commit()?;

    let mut tx = db.begin_write()?;
    assert_eq!(tx.relationship_properties(rel)?, vec![(since, Value::Int(2019))]);
    assert!(tx.remove_relationship_property(rel, since)?);
    assert!(tx.relationship_properties(rel)?.is_empty());
    assert_eq!(tx.node_property(a, since)?, Some(Value::from("node value")));
    tx.commit()?;
    Ok(())
}

#[derive(Clone, Debug)]
enum Op {
    Set(u32, Value),
    Remove(u32),
    Commit,
}

fn arb_value() -> impl Strategy<Value = Value> {
    prop_oneof![
        any::<i32>().prop_map(Value::Int),
        any::<i64>().prop_map(Value::Long),
        any::<bool>().prop_map(Value::Bool),
        "[a-z]{0,12}".prop_map(Value::String),
        "[a-z]{60,200}".prop_map(Value::String),
        prop::collection::vec(any::<i64>(), 0..40).prop_map(|v| Value::Array(ArrayValue::Long(v))),
    ]
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (0u32..8, arb_value()).prop_map(|(key, value)| Op::Set(key, value)),
        2 => (0u32..8).prop_map(Op::Remove),
        1 => Just(Op::Commit),
    ]
}

fn run_ops(ops: &[Op]) -> Result<()> {
    let dir = tempdir()?;
    let db = Database::open(dir.path(), config())?;
    let mut tx = db.begin_write()?;
    let keys: Vec<PropertyKeyId> = (0..8)
        .map(|i| tx.property_key(&format!("p{i}")))
        .collect::<Result<_>>()?;
    let node: NodeId = tx.create_node()?;
    tx.commit()?;

    let mut model: BTreeMap<PropertyKeyId, Value> = BTreeMap::new();
    let mut tx = db.begin_write()?;
    for op in ops {
        match op {
            Op::Set(key, value) => {
                tx.set_node_property(node, keys[*key as usize], value.clone())?;
                model.insert(keys[*key as usize], value.clone());
            }
            Op::Remove(key) => {
                let removed = tx.remove_node_property(node, keys[*key as usize])?;
                assert_eq!(removed, model.remove(&keys[*key as usize]).is_some());
            }
            Op::Commit => {
                tx.commit()?;
                tx = db.begin_write()?;
            }
        }
        let expected: Vec<(PropertyKeyId, Value)> =
            model.iter().map(|(k, v)| (*k, v.clone())).collect();
        assert_eq!(tx.node_properties(node)?, expected);
    }
    tx.commit()?;
    db.close()?;

    let db = Database::open(dir.path(), config())?;
    let expected: Vec<(PropertyKeyId, Value)> = model.into_iter().collect();
    assert_eq!(db.begin_read()?.node_properties(node)?, expected);
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn property_chain_matches_a_map_model(ops in prop::collection::vec(arb_op(), 1..60)) {
        run_ops(&ops).unwrap();
    }
}
