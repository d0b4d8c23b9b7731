#![allow(missing_docs)]

use penumbra::{
    command::{Change, Command},
    engine::{ApplyMode, CommandsToApply},
    storage::{
        record::{DynamicRecord, TokenRecord},
        TokenKind,
    },
    Config, Database, KernelVersion, PenumbraError, Result, TxId,
};
use tempfile::tempdir;

fn open(dir: &std::path::Path) -> Result<Database> {
    Database::open(dir, Config::default().page_size(4096).page_cache_pages(64))
}

#[test]
fn counts_follow_committed_changes() -> Result<()> {
    let dir = tempdir()?;
    let db = open(dir.path())?;
    let mut tx = db.begin_write()?;
    let person = tx.label("Person")?;
    let city = tx.label("City")?;
    let lives_in = tx.relationship_type("LIVES_IN")?;
    let paris = tx.create_node()?;
    tx.add_label(paris, city)?;
    let mut people = Vec::new();
    for _ in 0..4 {
        let node = tx.create_node()?;
        tx.add_label(node, person)?;
        tx.create_relationship(lives_in, node, paris)?;
        people.push(node);
    }
    tx.commit()?;

    let counts = db.engine().counts();
    assert_eq!(counts.node_count(None), 5);
    assert_eq!(counts.node_count(Some(person)), 4);
    assert_eq!(counts.node_count(Some(city)), 1);
    assert_eq!(counts.relationship_count(Some(lives_in)), 4);

    let mut tx = db.begin_write()?;
    for rel in tx.relationships(people[0], &penumbra::RelationshipSelection::all())? {
        tx.delete_relationship(rel.id)?;
    }
    tx.delete_node(people[0])?;
    assert!(tx.remove_label(people[1], person)?);
    assert!(!tx.remove_label(people[1], person)?);
    tx.commit()?;

    assert_eq!(counts.node_count(None), 4);
    assert_eq!(counts.node_count(Some(person)), 2);
    assert_eq!(counts.relationship_count(None), 3);

    let metrics = db.metrics();
    assert_eq!(metrics.nodes_created, 5);
    assert_eq!(metrics.nodes_deleted, 1);
    assert_eq!(metrics.relationships_deleted, 1);
    Ok(())
}

#[test]
fn label_index_sees_commits_not_pending_changes_of_others() -> Result<()> {
    let dir = tempdir()?;
    let db = open(dir.path())?;
    let mut tx = db.begin_write()?;
    let tag = tx.label("Tagged")?;
    let a = tx.create_node()?;
    let b = tx.create_node()?;
    tx.add_label(a, tag)?;
    tx.commit()?;
    assert_eq!(db.engine().label_index().nodes_with_label(tag), vec![a]);

    let mut writer = db.begin_write()?;
    writer.add_label(b, tag)?;
    writer.remove_label(a, tag)?;
    assert_eq!(writer.nodes_with_label(tag)?, vec![b]);
    let reader = db.begin_read()?;
    assert_eq!(reader.nodes_with_label(tag)?, vec![a]);
    reader.rollback()?;
    writer.commit()?;

    assert!(db.engine().label_index().contains(tag, b));
    assert!(!db.engine().label_index().contains(tag, a));
    Ok(())
}

#[test]
fn counts_and_labels_survive_reopen() -> Result<()> {
    let dir = tempdir()?;
    let label;
    {
        let db = open(dir.path())?;
        let mut tx = db.begin_write()?;
        label = tx.label("Kept")?;
        for _ in 0..7 {
            let node = tx.create_node()?;
            tx.add_label(node, label)?;
        }
        tx.commit()?;
        db.close()?;
    }
    let db = open(dir.path())?;
    assert_eq!(db.engine().counts().node_count(Some(label)), 7);
    assert_eq!(db.begin_read()?.nodes_with_label(label)?.len(), 7);
    Ok(())
}

#[test]
fn failed_apply_leaves_database_unhealthy() -> Result<()> {
    let dir = tempdir()?;
    let db = open(dir.path())?;
    let mut tx = db.begin_write()?;
    tx.create_node()?;
    tx.commit()?;
    let next = TxId(db.last_committed_tx().0 + 1);

    // A token whose name is not utf-8 cannot be cached.
    let bad_name = DynamicRecord {
        id: 500,
        in_use: true,
        start: true,
        next: u64::MAX,
        data: vec![0xff, 0xfe, 0xfd],
    };
    let before = TokenRecord {
        id: 300,
        in_use: false,
        name_id: 0,
        name_records: Vec::new(),
    };
    let after = TokenRecord {
        id: 300,
        in_use: true,
        name_id: 500,
        name_records: vec![bad_name],
    };
    let batch = [CommandsToApply {
        tx_id: next,
        kernel_version: KernelVersion::LATEST,
        commands: vec![Command::Token {
            kind: TokenKind::Label,
            change: Change::new(before, after),
        }],
    }];
    let err = db.engine().apply(&batch, ApplyMode::Internal).unwrap_err();
    assert!(matches!(err, PenumbraError::TransactionApply(_)), "{err}");

    let report = db.health();
    assert!(!report.is_healthy());
    assert!(report.cause.unwrap_or_default().contains("utf-8"));
    assert!(matches!(
        db.begin_write().map(|_| ()),
        Err(PenumbraError::DatabaseUnhealthy(_))
    ));
    assert!(matches!(
        db.begin_read().map(|_| ()),
        Err(PenumbraError::DatabaseUnhealthy(_))
    ));
    Ok(())
}
