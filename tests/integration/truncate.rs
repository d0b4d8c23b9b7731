#![allow(missing_docs)]

use penumbra::{
    schema::{ConstraintType, SchemaDescriptor},
    Config, Database, Result, TokenKind,
};
use tempfile::tempdir;

fn config() -> Config {
    Config::default().page_size(4096).page_cache_pages(64)
}

fn fill(db: &Database) -> Result<()> {
    let mut tx = db.begin_write()?;
    let label = tx.label("Thing")?;
    let key = tx.property_key("key")?;
    let rel = tx.relationship_type("NEXT")?;
    tx.create_constraint(
        "thing_key",
        SchemaDescriptor::for_label(label, &[key]),
        ConstraintType::Uniqueness,
    )?;
    tx.commit()?;

    let mut tx = db.begin_write()?;
    let mut previous = None;
    for i in 0..20 {
        let node = tx.create_node()?;
        tx.add_label(node, label)?;
        tx.set_node_property(node, key, i)?;
        if let Some(previous) = previous {
            tx.create_relationship(rel, previous, node)?;
        }
        previous = Some(node);
    }
    tx.commit()?;
    Ok(())
}

#[test]
fn truncate_empties_everything_and_keeps_ids_moving() -> Result<()> {
    let dir = tempdir()?;
    let db = Database::open(dir.path(), config())?;
    fill(&db)?;
    let before = db.last_committed_tx();

    db.truncate()?;
    assert_eq!(db.last_committed_tx(), before);
    assert_eq!(db.engine().counts().node_count(None), 0);
    assert!(db.engine().schema().snapshot().is_empty());
    assert!(db.engine().tokens().id_of(TokenKind::Label, "Thing").is_none());
    assert_eq!(db.log_files().segment_versions()?, vec![0]);

    fill(&db)?;
    assert!(db.last_committed_tx() > before);
    assert_eq!(db.engine().counts().node_count(None), 20);
    Ok(())
}

#[test]
fn truncate_twice_is_the_same_as_once() -> Result<()> {
    let dir = tempdir()?;
    let db = Database::open(dir.path(), config())?;
    fill(&db)?;
    db.truncate()?;
    let after_first = db.last_committed_tx();
    db.truncate()?;
    assert_eq!(db.last_committed_tx(), after_first);
    assert_eq!(db.engine().counts().relationship_count(None), 0);
    assert!(!db.begin_read()?.node_exists(penumbra::NodeId(0))?);
    Ok(())
}

#[test]
fn truncated_store_stays_empty_after_reopen() -> Result<()> {
    let dir = tempdir()?;
    let last = {
        let db = Database::open(dir.path(), config().checkpoint_on_close(false))?;
        fill(&db)?;
        db.truncate()?;
        db.last_committed_tx()
    };
    let db = Database::open(dir.path(), config())?;
    assert_eq!(db.last_committed_tx(), last);
    assert_eq!(db.engine().counts().node_count(None), 0);
    assert!(db.engine().schema().snapshot().is_empty());
    let tx = db.begin_read()?;
    assert!(!tx.node_exists(penumbra::NodeId(5))?);
    drop(tx);

    fill(&db)?;
    assert!(db.last_committed_tx() > last);
    Ok(())
}
