#![allow(missing_docs)]

use penumbra::{
    storage::cursor::{
        NodeCursor, PropertyCursor, RelationshipScanCursor, RelationshipTraversalCursor, ScanMode,
    },
    Config, Database, Direction, NodeId, RelationshipId, RelationshipSelection, Result, Value,
};
use tempfile::tempdir;

fn open(dir: &std::path::Path) -> Result<Database> {
    Database::open(dir, Config::default().page_size(4096).page_cache_pages(64))
}

fn create_nodes(db: &Database, count: usize) -> Result<Vec<NodeId>> {
    let mut tx = db.begin_write()?;
    let nodes = (0..count)
        .map(|_| tx.create_node())
        .collect::<Result<Vec<_>>>()?;
    tx.commit()?;
    Ok(nodes)
}

#[test]
fn single_cursor_reads_one_record_once() -> Result<()> {
    let dir = tempdir()?;
    let db = open(dir.path())?;
    let nodes = create_nodes(&db, 3)?;

    let mut cursor = NodeCursor::new(db.engine().stores());
    assert_eq!(cursor.mode(), ScanMode::Idle);
    assert!(!cursor.next()?, "an idle cursor yields nothing");

    cursor.single(nodes[1]);
    assert!(cursor.next()?);
    assert_eq!(cursor.id(), nodes[1]);
    assert!(!cursor.next()?, "single reads exactly once");

    cursor.single(NodeId(10_000));
    assert!(!cursor.next()?, "unused ids are not found");
    cursor.close();
    assert_eq!(cursor.mode(), ScanMode::Idle);
    Ok(())
}

#[test]
fn scan_skips_deleted_records_and_sees_late_additions() -> Result<()> {
    let dir = tempdir()?;
    let config = Config::default()
        .page_size(4096)
        .page_cache_pages(64)
        .id_batch_size(1);
    let db = Database::open(dir.path(), config)?;
    let nodes = create_nodes(&db, 6)?;
    assert_eq!(nodes, (0..6).map(NodeId).collect::<Vec<_>>());

    let mut tx = db.begin_write()?;
    tx.delete_node(nodes[2])?;
    tx.delete_node(nodes[4])?;
    tx.commit()?;

    let mut cursor = NodeCursor::new(db.engine().stores());
    cursor.scan();
    let mut seen = Vec::new();
    for _ in 0..3 {
        assert!(cursor.next()?);
        seen.push(cursor.id());
    }
    assert_eq!(seen, vec![NodeId(0), NodeId(1), NodeId(3)]);

    let late = create_nodes(&db, 4)?;
    while cursor.next()? {
        seen.push(cursor.id());
    }
    cursor.close();

    assert!(!seen.contains(&NodeId(2)), "ids behind the scan position are not revisited");
    for node in late.iter().filter(|node| node.0 >= 4) {
        assert!(seen.contains(node), "{node} added ahead of the scan was observed");
    }
    assert!(late.iter().any(|node| node.0 >= 6), "the high id moved during the scan");
    Ok(())
}

#[test]
fn traversal_and_scan_agree_on_endpoints() -> Result<()> {
    let dir = tempdir()?;
    let db = open(dir.path())?;
    let mut tx = db.begin_write()?;
    let knows = tx.relationship_type("KNOWS")?;
    let likes = tx.relationship_type("LIKES")?;
    let a = tx.create_node()?;
    let b = tx.create_node()?;
    let c = tx.create_node()?;
    let ab = tx.create_relationship(knows, a, b)?;
    let ca = tx.create_relationship(likes, c, a)?;
    let aa = tx.create_relationship(knows, a, a)?;
    tx.commit()?;

    let stores = db.engine().stores();
    let mut scan = RelationshipScanCursor::new(stores);
    scan.scan();
    let mut scanned: Vec<(RelationshipId, NodeId, NodeId)> = Vec::new();
    while scan.next()? {
        scanned.push((scan.id(), scan.source(), scan.target()));
    }
    scan.close();
    scanned.sort();
    assert_eq!(scanned, vec![(ab, a, b), (ca, c, a), (aa, a, a)]);

    let mut node = NodeCursor::new(stores);
    node.single(a);
    assert!(node.next()?);
    let mut traversal = RelationshipTraversalCursor::new(stores);
    node.relationships(&mut traversal, RelationshipSelection::direction(Direction::Incoming));
    let mut incoming = Vec::new();
    while traversal.next()? {
        incoming.push((traversal.id(), traversal.other_node()));
    }
    traversal.close();
    node.close();
    incoming.sort();
    assert_eq!(incoming, vec![(ca, c), (aa, a)]);
    Ok(())
}

#[test]
fn property_cursor_walks_the_chain() -> Result<()> {
    let dir = tempdir()?;
    let db = open(dir.path())?;
    let mut tx = db.begin_write()?;
    let node = tx.create_node()?;
    let keys = ["name", "age", "score", "tags", "bio"]
        .iter()
        .map(|name| tx.property_key(name))
        .collect::<Result<Vec<_>>>()?;
    tx.set_node_property(node, keys[0], "Ada")?;
    tx.set_node_property(node, keys[1], 36)?;
    tx.set_node_property(node, keys[2], 9.5)?;
    tx.set_node_property(node, keys[3], true)?;
    tx.set_node_property(node, keys[4], "x".repeat(400))?;
    tx.commit()?;

    let stores = db.engine().stores();
    let mut cursor = NodeCursor::new(stores);
    cursor.single(node);
    assert!(cursor.next()?);
    let mut properties = PropertyCursor::new(stores);
    properties.init(cursor.properties_reference());
    cursor.close();
    let mut read = Vec::new();
    while properties.next()? {
        read.push((properties.property_key().unwrap(), properties.value()?.unwrap()));
    }
    properties.close();
    read.sort_by_key(|(key, _)| *key);
    assert_eq!(
        read,
        vec![
            (keys[0], Value::from("Ada")),
            (keys[1], Value::Int(36)),
            (keys[2], Value::Double(9.5)),
            (keys[3], Value::Bool(true)),
            (keys[4], Value::String("x".repeat(400))),
        ]
    );
    Ok(())
}
