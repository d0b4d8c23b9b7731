#![allow(missing_docs)]

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use penumbra::{
    schema::SchemaDescriptor, Config, Database, NodeId, PenumbraError, Result, TxId, Value,
};
use tempfile::tempdir;

fn config() -> Config {
    Config::default().page_size(4096).page_cache_pages(64)
}

fn crash_config() -> Config {
    config().checkpoint_on_close(false)
}

fn active_segment(db: &Database) -> PathBuf {
    let log = db.log_files();
    log.segment_path(log.current_version().unwrap_or(0))
}

fn append_bytes(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut file = OpenOptions::new().append(true).open(path)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    Ok(())
}

/// Writes `count` named nodes and returns them with the last committed id.
fn populate(db: &Database, count: usize) -> Result<(Vec<NodeId>, TxId)> {
    let mut nodes = Vec::new();
    let mut tx = db.begin_write()?;
    let name = tx.property_key("name")?;
    for i in 0..count {
        let node = tx.create_node()?;
        tx.set_node_property(node, name, format!("node-{i}"))?;
        nodes.push(node);
    }
    tx.commit()?;
    Ok((nodes, db.last_committed_tx()))
}

#[test]
fn committed_work_is_replayed_without_a_checkpoint() -> Result<()> {
    let dir = tempdir()?;
    let (nodes, last, index) = {
        let db = Database::open(dir.path(), crash_config())?;
        let mut tx = db.begin_write()?;
        let label = tx.label("Named")?;
        let name = tx.property_key("name")?;
        let index = tx.create_index("named", SchemaDescriptor::for_label(label, &[name]))?;
        tx.commit()?;
        let (nodes, _) = populate(&db, 10)?;
        let mut tx = db.begin_write()?;
        for node in &nodes {
            tx.add_label(*node, label)?;
        }
        tx.commit()?;
        (nodes, db.last_committed_tx(), index)
    };

    for _ in 0..2 {
        let db = Database::open(dir.path(), crash_config())?;
        assert_eq!(db.last_committed_tx(), last);
        let mut tx = db.begin_read()?;
        let name = tx.property_key("name")?;
        assert_eq!(tx.node_property(nodes[3], name)?, Some(Value::from("node-3")));
        let label = tx.label("Named")?;
        assert_eq!(tx.nodes_with_label(label)?.len(), nodes.len());
        assert_eq!(
            db.engine()
                .property_indexes()
                .lookup(index, &[Value::from("node-7")]),
            vec![nodes[7].0]
        );
    }
    Ok(())
}

#[test]
fn truncated_tail_is_cut_and_appends_resume() -> Result<()> {
    let dir = tempdir()?;
    let (nodes, last, segment) = {
        let db = Database::open(dir.path(), crash_config())?;
        let (nodes, last) = populate(&db, 3)?;
        (nodes, last, active_segment(&db))
    };
    let clean_len = std::fs::metadata(&segment)?.len();
    append_bytes(&segment, &[1, 0, 0])?;

    {
        let db = Database::open(dir.path(), crash_config())?;
        assert_eq!(db.last_committed_tx(), last);
        assert_eq!(std::fs::metadata(&segment)?.len(), clean_len);
        assert!(db.begin_read()?.node_exists(nodes[2])?);
        populate(&db, 2)?;
    }
    let db = Database::open(dir.path(), crash_config())?;
    assert!(db.last_committed_tx() > last);
    Ok(())
}

#[test]
fn corrupt_tail_past_the_checkpoint_refuses_to_open() -> Result<()> {
    let dir = tempdir()?;
    let segment = {
        let db = Database::open(dir.path(), crash_config())?;
        populate(&db, 3)?;
        active_segment(&db)
    };
    // A complete entry frame whose checksum does not match its payload.
    append_bytes(&segment, &[1, 0, 0, 0, 1, 0xAA, 0, 0, 0, 0])?;

    let err = Database::open(dir.path(), crash_config()).map(|_| ()).unwrap_err();
    assert!(matches!(err, PenumbraError::CorruptionDetail(_)), "{err}");
    Ok(())
}

#[test]
fn corrupt_tail_covered_by_the_checkpoint_is_tolerated() -> Result<()> {
    let dir = tempdir()?;
    let (nodes, last, segment) = {
        let db = Database::open(dir.path(), config())?;
        let (nodes, last) = populate(&db, 3)?;
        let segment = active_segment(&db);
        db.close()?;
        (nodes, last, segment)
    };
    append_bytes(&segment, &[1, 0, 0, 0, 1, 0xAA, 0, 0, 0, 0])?;

    let db = Database::open(dir.path(), config())?;
    assert_eq!(db.last_committed_tx(), last);
    assert!(db.begin_read()?.node_exists(nodes[0])?);
    populate(&db, 1)?;
    db.close()?;
    Database::open(dir.path(), config())?;
    Ok(())
}

#[test]
fn checkpoint_moves_the_recovery_start() -> Result<()> {
    let dir = tempdir()?;
    let last = {
        let db = Database::open(dir.path(), crash_config())?;
        populate(&db, 2)?;
        let checkpointed = db.checkpoint()?;
        assert_eq!(checkpointed, db.last_committed_tx());
        assert_eq!(db.engine().stores().meta.last_closed_tx()?, checkpointed);
        populate(&db, 2)?.1
    };
    let db = Database::open(dir.path(), crash_config())?;
    assert_eq!(db.last_committed_tx(), last);
    assert_eq!(db.engine().stores().meta.last_closed_tx()?, last);
    Ok(())
}
