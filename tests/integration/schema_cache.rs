#![allow(missing_docs)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use penumbra::{
    schema::{ConstraintType, SchemaDescriptor, SchemaRule},
    Config, Database, PenumbraError, Result, Value,
};
use tempfile::tempdir;

fn open(dir: &std::path::Path) -> Result<Database> {
    Database::open(dir, Config::default().page_size(4096).page_cache_pages(64))
}

#[test]
fn snapshots_stay_consistent_while_rules_change() -> Result<()> {
    let dir = tempdir()?;
    let db = open(dir.path())?;
    let mut tx = db.begin_write()?;
    let labels = (0..4)
        .map(|i| tx.label(&format!("L{i}")))
        .collect::<Result<Vec<_>>>()?;
    let keys = (0..3)
        .map(|i| tx.property_key(&format!("k{i}")))
        .collect::<Result<Vec<_>>>()?;
    tx.commit()?;

    let done = AtomicBool::new(false);
    thread::scope(|scope| -> Result<()> {
        for _ in 0..3 {
            scope.spawn(|| {
                let mut observed = 0usize;
                while !done.load(Ordering::Acquire) {
                    let snapshot = db.engine().schema().snapshot();
                    assert!(snapshot.is_consistent());
                    for index in snapshot.indexes() {
                        assert_eq!(
                            snapshot.rule(index.id).map(SchemaRule::name),
                            Some(index.name.as_str())
                        );
                    }
                    observed = observed.max(snapshot.len());
                }
                observed
            });
        }
        let written = (0..20).try_for_each(|round| -> Result<()> {
            let label = labels[round % labels.len()];
            let name = format!("idx_{round}");
            let mut tx = db.begin_write()?;
            tx.create_index(&name, SchemaDescriptor::for_label(label, &keys[..1 + round % 3]))?;
            tx.commit()?;
            let mut tx = db.begin_write()?;
            tx.drop_schema_rule(&name)?;
            tx.commit()?;
            Ok(())
        });
        done.store(true, Ordering::Release);
        written
    })?;
    assert!(db.engine().schema().snapshot().is_empty());
    Ok(())
}

#[test]
fn index_is_populated_from_existing_nodes() -> Result<()> {
    let dir = tempdir()?;
    let db = open(dir.path())?;
    let mut tx = db.begin_write()?;
    let person = tx.label("Person")?;
    let name = tx.property_key("name")?;
    for who in ["ada", "grace", "alan"] {
        let node = tx.create_node()?;
        tx.add_label(node, person)?;
        tx.set_node_property(node, name, who)?;
    }
    tx.commit()?;

    let mut tx = db.begin_write()?;
    let id = tx.create_index("person_name", SchemaDescriptor::for_label(person, &[name]))?;
    tx.commit()?;

    let indexes = db.engine().property_indexes();
    assert_eq!(indexes.entity_count(id), 3);
    assert_eq!(indexes.lookup(id, &[Value::from("grace")]).len(), 1);

    let mut tx = db.begin_write()?;
    let late = tx.create_node()?;
    tx.add_label(late, person)?;
    tx.set_node_property(late, name, "grace")?;
    tx.commit()?;
    assert_eq!(indexes.lookup(id, &[Value::from("grace")]).len(), 2);

    let mut tx = db.begin_write()?;
    let err = tx
        .create_index("again", SchemaDescriptor::for_label(person, &[name]))
        .unwrap_err();
    assert!(matches!(err, PenumbraError::ConstraintViolation(_)));
    Ok(())
}

#[test]
fn uniqueness_is_enforced_against_committed_and_pending_nodes() -> Result<()> {
    let dir = tempdir()?;
    let db = open(dir.path())?;
    let mut tx = db.begin_write()?;
    let user = tx.label("User")?;
    let email = tx.property_key("email")?;
    tx.create_constraint(
        "unique_email",
        SchemaDescriptor::for_label(user, &[email]),
        ConstraintType::Uniqueness,
    )?;
    tx.commit()?;
    let snapshot = db.engine().schema().snapshot();
    assert!(snapshot.rule_by_name("unique_email_index").is_some());

    let mut tx = db.begin_write()?;
    let first = tx.create_node()?;
    tx.add_label(first, user)?;
    tx.set_node_property(first, email, "a@example.com")?;
    tx.commit()?;
    let committed = db.last_committed_tx();

    let mut tx = db.begin_write()?;
    let second = tx.create_node()?;
    tx.add_label(second, user)?;
    tx.set_node_property(second, email, "a@example.com")?;
    let err = tx.commit().unwrap_err();
    assert!(matches!(err, PenumbraError::ConstraintViolation(_)), "{err}");
    assert_eq!(db.last_committed_tx(), committed, "nothing was persisted");

    // Moving the value off the first node frees it for another.
    let mut tx = db.begin_write()?;
    tx.set_node_property(first, email, "b@example.com")?;
    let third = tx.create_node()?;
    tx.add_label(third, user)?;
    tx.set_node_property(third, email, "a@example.com")?;
    tx.commit()?;
    Ok(())
}

#[test]
fn node_key_requires_properties_and_checks_existing_data() -> Result<()> {
    let dir = tempdir()?;
    let db = open(dir.path())?;
    let mut tx = db.begin_write()?;
    let item = tx.label("Item")?;
    let sku = tx.property_key("sku")?;
    let a = tx.create_node()?;
    tx.add_label(a, item)?;
    tx.set_node_property(a, sku, 1)?;
    let b = tx.create_node()?;
    tx.add_label(b, item)?;
    tx.commit()?;

    let mut tx = db.begin_write()?;
    tx.create_constraint(
        "item_key",
        SchemaDescriptor::for_label(item, &[sku]),
        ConstraintType::NodeKey,
    )?;
    assert!(matches!(tx.commit(), Err(PenumbraError::ConstraintViolation(_))));
    assert!(db.engine().schema().snapshot().is_empty());

    let mut tx = db.begin_write()?;
    tx.set_node_property(b, sku, 2)?;
    tx.commit()?;
    let mut tx = db.begin_write()?;
    tx.create_constraint(
        "item_key",
        SchemaDescriptor::for_label(item, &[sku]),
        ConstraintType::NodeKey,
    )?;
    tx.commit()?;

    let mut tx = db.begin_write()?;
    assert!(tx.remove_node_property(a, sku)?);
    assert!(matches!(tx.commit(), Err(PenumbraError::ConstraintViolation(_))));

    let mut tx = db.begin_write()?;
    let err = tx.drop_schema_rule("item_key_index").unwrap_err();
    assert!(matches!(err, PenumbraError::ConstraintViolation(_)));
    tx.drop_schema_rule("item_key")?;
    tx.commit()?;
    assert!(db.engine().schema().snapshot().is_empty());
    Ok(())
}

#[test]
fn schema_rules_survive_reopen() -> Result<()> {
    let dir = tempdir()?;
    {
        let db = open(dir.path())?;
        let mut tx = db.begin_write()?;
        let label = tx.label("Doc")?;
        let title = tx.property_key("title")?;
        tx.create_constraint(
            "doc_title",
            SchemaDescriptor::for_label(label, &[title]),
            ConstraintType::Existence,
        )?;
        tx.create_index("doc_title_lookup", SchemaDescriptor::for_label(label, &[title]))?;
        tx.commit()?;
        db.close()?;
    }
    let db = open(dir.path())?;
    let snapshot = db.engine().schema().snapshot();
    assert_eq!(snapshot.len(), 2);
    assert_eq!(snapshot.constraints().count(), 1);
    assert!(snapshot.is_consistent());

    let mut tx = db.begin_write()?;
    let label = tx.label("Doc")?;
    let node = tx.create_node()?;
    tx.add_label(node, label)?;
    assert!(matches!(tx.commit(), Err(PenumbraError::ConstraintViolation(_))));
    Ok(())
}
