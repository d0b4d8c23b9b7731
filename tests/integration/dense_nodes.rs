#![allow(missing_docs)]

use penumbra::{
    storage::cursor::{NodeCursor, RelationshipGroupCursor, RelationshipTraversalCursor},
    Config, Database, Direction, NodeId, RelTypeId, RelationshipSelection, Result,
};
use tempfile::tempdir;

fn config() -> Config {
    Config::default()
        .page_size(4096)
        .page_cache_pages(64)
        .dense_node_threshold(50)
}

/// Hub with 150 relationships over three types: 30 outgoing and 20 incoming
/// per type.
fn build_hub(db: &Database) -> Result<(NodeId, Vec<RelTypeId>)> {
    let mut tx = db.begin_write()?;
    let types = vec![
        tx.relationship_type("A")?,
        tx.relationship_type("B")?,
        tx.relationship_type("C")?,
    ];
    let hub = tx.create_node()?;
    for rel_type in &types {
        for i in 0..50 {
            let other = tx.create_node()?;
            if i < 30 {
                tx.create_relationship(*rel_type, hub, other)?;
            } else {
                tx.create_relationship(*rel_type, other, hub)?;
            }
        }
    }
    tx.commit()?;
    Ok((hub, types))
}

#[test]
fn hub_crosses_threshold_and_groups_count_per_type() -> Result<()> {
    let dir = tempdir()?;
    let db = Database::open(dir.path(), config())?;
    let (hub, types) = build_hub(&db)?;

    let stores = db.engine().stores();
    let mut node = NodeCursor::new(stores);
    node.single(hub);
    assert!(node.next()?);
    assert!(node.is_dense(), "150 relationships exceed the threshold of 50");

    let mut groups = RelationshipGroupCursor::new(stores);
    node.relationship_groups(&mut groups)?;
    let mut seen = Vec::new();
    while groups.next()? {
        seen.push(groups.rel_type());
        assert_eq!(groups.outgoing_count()?, 30);
        assert_eq!(groups.incoming_count()?, 20);
        assert_eq!(groups.loop_count()?, 0);
        assert_eq!(groups.total_count()?, 50);
    }
    groups.close();
    seen.sort();
    assert_eq!(seen, types);

    let mut traversal = RelationshipTraversalCursor::new(stores);
    node.relationships(&mut traversal, RelationshipSelection::typed(types[1], Direction::Outgoing));
    let mut outgoing = 0;
    while traversal.next()? {
        assert_eq!(traversal.rel_type(), types[1]);
        assert_eq!(traversal.source(), hub);
        outgoing += 1;
    }
    traversal.close();
    node.close();
    assert_eq!(outgoing, 30);
    assert_eq!(db.metrics().dense_conversions, 1);
    Ok(())
}

#[test]
fn degrees_match_traversals_before_and_after_changes() -> Result<()> {
    let dir = tempdir()?;
    let db = Database::open(dir.path(), config())?;
    let (hub, types) = build_hub(&db)?;

    let tx = db.begin_read()?;
    for direction in [Direction::Outgoing, Direction::Incoming, Direction::Both] {
        let selection = RelationshipSelection::typed(types[0], direction);
        let listed = tx.relationships(hub, &selection)?.len() as u64;
        assert_eq!(tx.degree(hub, &selection)?, listed);
    }
    assert_eq!(tx.degree(hub, &RelationshipSelection::all())?, 150);
    tx.rollback()?;

    let mut tx = db.begin_write()?;
    let removed = tx.relationships(hub, &RelationshipSelection::typed(types[2], Direction::Incoming))?;
    for relationship in removed.iter().take(5) {
        tx.delete_relationship(relationship.id)?;
    }
    let extra = tx.create_node()?;
    tx.create_relationship(types[0], hub, extra)?;
    let looped = tx.create_relationship(types[0], hub, hub)?;
    assert_eq!(
        tx.degree(hub, &RelationshipSelection::typed(types[2], Direction::Incoming))?,
        15
    );
    assert_eq!(
        tx.degree(hub, &RelationshipSelection::typed(types[0], Direction::Outgoing))?,
        32
    );
    tx.commit()?;

    let tx = db.begin_read()?;
    assert_eq!(tx.degree(hub, &RelationshipSelection::all())?, 147);
    assert_eq!(
        tx.degree(hub, &RelationshipSelection::typed(types[0], Direction::Incoming))?,
        21,
        "a loop counts in both directions"
    );
    assert_eq!(tx.relationship(looped)?.other_node(hub), hub);
    Ok(())
}

#[test]
fn dense_hub_survives_reopen() -> Result<()> {
    let dir = tempdir()?;
    let hub;
    {
        let db = Database::open(dir.path(), config())?;
        hub = build_hub(&db)?.0;
        db.close()?;
    }
    let db = Database::open(dir.path(), config())?;
    let tx = db.begin_read()?;
    assert_eq!(tx.degree(hub, &RelationshipSelection::direction(Direction::Outgoing))?, 90);
    assert_eq!(tx.degree(hub, &RelationshipSelection::direction(Direction::Incoming))?, 60);
    Ok(())
}

/// Ids of the committed relationships of a sparse node as seen by a
/// transaction that adds one more relationship to it.
fn committed_order_with_pending_change(limit: usize) -> Result<Vec<RelTypeId>> {
    let dir = tempdir()?;
    let db = Database::open(dir.path(), config().record_buffer_group_limit(limit))?;
    let mut tx = db.begin_write()?;
    let a = tx.relationship_type("A")?;
    let b = tx.relationship_type("B")?;
    let node = tx.create_node()?;
    for i in 0..6 {
        let other = tx.create_node()?;
        tx.create_relationship(if i % 2 == 0 { a } else { b }, node, other)?;
    }
    tx.commit()?;

    let mut tx = db.begin_write()?;
    let other = tx.create_node()?;
    let pending = tx.create_relationship(a, node, other)?;
    let seen = tx.relationships(node, &RelationshipSelection::all())?;
    assert_eq!(seen.len(), 7);
    assert_eq!(seen[6].id, pending);
    Ok(seen[..6].iter().map(|rel| rel.rel_type).collect())
}

#[test]
fn small_changed_chains_are_buffered_by_type() -> Result<()> {
    let buffered = committed_order_with_pending_change(6)?;
    assert!(
        buffered.windows(2).all(|pair| pair[0].0 <= pair[1].0),
        "buffered relationships come grouped by type: {buffered:?}"
    );

    let chained = committed_order_with_pending_change(5)?;
    assert!(
        chained.windows(2).all(|pair| pair[0] != pair[1]),
        "a chain longer than the limit is read in link order: {chained:?}"
    );
    Ok(())
}
