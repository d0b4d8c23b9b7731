use tracing::{debug, trace};

use crate::engine::CommandCreationContext;
use crate::primitives::locks::{LockClient, LockMode, ResourceId};
use crate::schema::{
    ConstraintDescriptor, ConstraintType, IndexDescriptor, IndexProvider, SchemaDescriptor,
    SchemaRule,
};
use crate::storage::cursor::RelationshipSelection;
use crate::storage::{TokenKind, Value};
use crate::txstate::{CreatedRelationship, TxState};
use crate::types::{
    LabelId, NodeId, PenumbraError, PropertyKeyId, RelTypeId, RelationshipId, Result, TxId,
};

use super::view::{RelationshipView, StateView};
use super::{Database, TransactionSlot};

/// Whether a transaction may write.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TransactionKind {
    /// Sees committed data only; write operations fail.
    Read,
    /// May change data and schema.
    Write,
}

/// A unit of work against a [`Database`].
///
/// Writes are collected in memory and become visible to others only when
/// [`Transaction::commit`] succeeds. Reads see committed data merged with
/// the transaction's own changes. Dropping an open transaction rolls it back.
///
/// ```no_run
/// use penumbra::{Config, Database};
///
/// let db = Database::open("graph", Config::default())?;
/// let mut tx = db.begin_write()?;
/// let person = tx.label("Person")?;
/// let alice = tx.create_node()?;
/// tx.add_label(alice, person)?;
/// tx.commit()?;
/// # Ok::<(), penumbra::PenumbraError>(())
/// ```
pub struct Transaction<'db> {
    db: &'db Database,
    kind: TransactionKind,
    state: TxState,
    context: Option<CommandCreationContext>,
    locks: LockClient,
    _slot: TransactionSlot<'db>,
    reserved_nodes: Vec<NodeId>,
    reserved_relationships: Vec<RelationshipId>,
    reserved_rules: Vec<u64>,
    upgrade_lock_taken: bool,
    open: bool,
}

impl<'db> Transaction<'db> {
    pub(crate) fn new(
        db: &'db Database,
        kind: TransactionKind,
        slot: TransactionSlot<'db>,
        locks: LockClient,
    ) -> Self {
        trace!(?kind, "tx.begin");
        Self {
            db,
            kind,
            state: TxState::default(),
            context: None,
            locks,
            _slot: slot,
            reserved_nodes: Vec::new(),
            reserved_relationships: Vec::new(),
            reserved_rules: Vec::new(),
            upgrade_lock_taken: false,
            open: true,
        }
    }

    /// Read or write.
    pub fn kind(&self) -> TransactionKind {
        self.kind
    }

    /// False once committed or rolled back.
    pub fn is_open(&self) -> bool {
        self.open
    }

    fn ensure_open(&self) -> Result<()> {
        if self.open {
            Ok(())
        } else {
            Err(PenumbraError::TransactionClosed)
        }
    }

    /// Every write first takes the upgrade lock shared, so an upgrade never
    /// runs while another transaction is mid-write.
    fn ensure_write(&mut self) -> Result<()> {
        self.ensure_open()?;
        if self.kind == TransactionKind::Read {
            return Err(PenumbraError::Invalid("read transactions cannot write"));
        }
        if !self.upgrade_lock_taken {
            self.locks.acquire(ResourceId::UPGRADE, LockMode::Shared)?;
            self.upgrade_lock_taken = true;
        }
        Ok(())
    }

    fn context(&mut self) -> &mut CommandCreationContext {
        let engine = self.db.engine();
        self.context
            .get_or_insert_with(|| engine.new_command_creation_context())
    }

    fn view(&self) -> StateView<'_> {
        StateView::new(self.db.engine(), &self.state)
    }

    fn lock_node(&mut self, node: NodeId) -> Result<()> {
        self.locks
            .acquire(ResourceId::node(node.0), LockMode::Exclusive)
    }

    // Tokens

    /// Id of an existing token.
    pub fn token_id(&self, kind: TokenKind, name: &str) -> Option<u32> {
        self.db.engine().tokens().id_of(kind, name)
    }

    /// Id of `name`, created in a transaction of its own when missing.
    pub fn get_or_create_token(&mut self, kind: TokenKind, name: &str) -> Result<u32> {
        self.ensure_open()?;
        if let Some(id) = self.token_id(kind, name) {
            return Ok(id);
        }
        self.locks
            .acquire(ResourceId::token(kind as u64), LockMode::Exclusive)?;
        let created = self.db.create_token(kind, name);
        self.locks
            .release(ResourceId::token(kind as u64), LockMode::Exclusive);
        created
    }

    /// Id of the label `name`, creating the token if needed.
    pub fn label(&mut self, name: &str) -> Result<LabelId> {
        self.get_or_create_token(TokenKind::Label, name).map(LabelId)
    }

    /// Id of the relationship type `name`, creating the token if needed.
    pub fn relationship_type(&mut self, name: &str) -> Result<RelTypeId> {
        self.get_or_create_token(TokenKind::RelationshipType, name)
            .map(RelTypeId)
    }

    /// Id of the property key `name`, creating the token if needed.
    pub fn property_key(&mut self, name: &str) -> Result<PropertyKeyId> {
        self.get_or_create_token(TokenKind::PropertyKey, name)
            .map(PropertyKeyId)
    }

    // Writes

    /// Creates a node and returns its id.
    pub fn create_node(&mut self) -> Result<NodeId> {
        self.ensure_write()?;
        let node = self.context().reserve_node();
        self.reserved_nodes.push(node);
        self.lock_node(node)?;
        self.state.node_do_create(node);
        Ok(node)
    }

    /// Deletes a node that has no relationships left.
    pub fn delete_node(&mut self, node: NodeId) -> Result<()> {
        self.ensure_write()?;
        self.lock_node(node)?;
        let degree = {
            let view = self.view();
            view.require_node(node)?;
            view.degree(node, &RelationshipSelection::all())?
        };
        if degree > 0 {
            return Err(PenumbraError::ConstraintViolation(format!(
                "cannot delete {node}: it still has {degree} relationships"
            )));
        }
        self.state.node_do_delete(node);
        Ok(())
    }

    /// Creates a relationship of `rel_type` from `start` to `end`.
    pub fn create_relationship(
        &mut self,
        rel_type: RelTypeId,
        start: NodeId,
        end: NodeId,
    ) -> Result<RelationshipId> {
        self.ensure_write()?;
        self.lock_node(start.min(end))?;
        self.lock_node(start.max(end))?;
        {
            let view = self.view();
            view.require_node(start)?;
            view.require_node(end)?;
        }
        let id = self.context().reserve_relationship();
        self.reserved_relationships.push(id);
        self.locks
            .acquire(ResourceId::relationship(id.0), LockMode::Exclusive)?;
        self.state.relationship_do_create(
            id,
            CreatedRelationship {
                rel_type,
                start,
                end,
            },
        );
        Ok(id)
    }

    /// Deletes a relationship.
    pub fn delete_relationship(&mut self, id: RelationshipId) -> Result<()> {
        self.ensure_write()?;
        let relationship = self.view().relationship(id)?;
        self.lock_node(relationship.start.min(relationship.end))?;
        self.lock_node(relationship.start.max(relationship.end))?;
        self.locks
            .acquire(ResourceId::relationship(id.0), LockMode::Exclusive)?;
        self.state.relationship_do_delete(id);
        Ok(())
    }

    /// Adds `label` to `node`. Returns false when it was already there.
    pub fn add_label(&mut self, node: NodeId, label: LabelId) -> Result<bool> {
        self.ensure_write()?;
        self.lock_node(node)?;
        if self.view().node_labels(node)?.contains(&label) {
            return Ok(false);
        }
        self.state.node_add_label(node, label);
        Ok(true)
    }

    /// Removes `label` from `node`. Returns false when it was not there.
    pub fn remove_label(&mut self, node: NodeId, label: LabelId) -> Result<bool> {
        self.ensure_write()?;
        self.lock_node(node)?;
        if !self.view().node_labels(node)?.contains(&label) {
            return Ok(false);
        }
        self.state.node_remove_label(node, label);
        Ok(true)
    }

    /// Sets a node property, replacing any previous value.
    pub fn set_node_property(
        &mut self,
        node: NodeId,
        key: PropertyKeyId,
        value: impl Into<Value>,
    ) -> Result<()> {
        self.ensure_write()?;
        self.lock_node(node)?;
        self.view().require_node(node)?;
        self.state.node_set_property(node, key, value.into());
        Ok(())
    }

    /// Removes a node property. Returns false when the node did not have it.
    pub fn remove_node_property(&mut self, node: NodeId, key: PropertyKeyId) -> Result<bool> {
        self.ensure_write()?;
        self.lock_node(node)?;
        if self.view().node_property(node, key)?.is_none() {
            return Ok(false);
        }
        self.state.node_remove_property(node, key);
        Ok(true)
    }

    /// Sets a relationship property, replacing any previous value.
    pub fn set_relationship_property(
        &mut self,
        id: RelationshipId,
        key: PropertyKeyId,
        value: impl Into<Value>,
    ) -> Result<()> {
        self.ensure_write()?;
        self.view().relationship(id)?;
        self.locks
            .acquire(ResourceId::relationship(id.0), LockMode::Exclusive)?;
        self.state.relationship_set_property(id, key, value.into());
        Ok(())
    }

    /// Removes a relationship property. Returns false when it was not set.
    pub fn remove_relationship_property(
        &mut self,
        id: RelationshipId,
        key: PropertyKeyId,
    ) -> Result<bool> {
        self.ensure_write()?;
        let present = self
            .view()
            .relationship_properties(id)?
            .iter()
            .any(|(existing, _)| *existing == key);
        if !present {
            return Ok(false);
        }
        self.locks
            .acquire(ResourceId::relationship(id.0), LockMode::Exclusive)?;
        self.state.relationship_remove_property(id, key);
        Ok(true)
    }

    // Reads

    /// Whether `node` exists for this transaction.
    pub fn node_exists(&self, node: NodeId) -> Result<bool> {
        self.ensure_open()?;
        self.view().node_exists(node)
    }

    /// Labels of `node`, sorted.
    pub fn node_labels(&self, node: NodeId) -> Result<Vec<LabelId>> {
        self.ensure_open()?;
        self.view().node_labels(node)
    }

    /// Properties of `node`, sorted by key.
    pub fn node_properties(&self, node: NodeId) -> Result<Vec<(PropertyKeyId, Value)>> {
        self.ensure_open()?;
        self.view().node_properties(node)
    }

    /// One property of `node`.
    pub fn node_property(&self, node: NodeId, key: PropertyKeyId) -> Result<Option<Value>> {
        self.ensure_open()?;
        self.view().node_property(node, key)
    }

    /// Endpoints and type of relationship `id`.
    pub fn relationship(&self, id: RelationshipId) -> Result<RelationshipView> {
        self.ensure_open()?;
        self.view().relationship(id)
    }

    /// Properties of relationship `id`, sorted by key.
    pub fn relationship_properties(
        &self,
        id: RelationshipId,
    ) -> Result<Vec<(PropertyKeyId, Value)>> {
        self.ensure_open()?;
        self.view().relationship_properties(id)
    }

    /// Relationships of `node` accepted by `selection`. Committed ones come
    /// first, then those created by this transaction. Committed ones are in
    /// chain order, except on a sparse node whose chain this transaction
    /// changed and whose degree is within `record_buffer_group_limit`: those
    /// are grouped by type.
    pub fn relationships(
        &self,
        node: NodeId,
        selection: &RelationshipSelection,
    ) -> Result<Vec<RelationshipView>> {
        self.ensure_open()?;
        self.view().relationships(node, selection)
    }

    /// Number of relationships of `node` accepted by `selection`.
    pub fn degree(&self, node: NodeId, selection: &RelationshipSelection) -> Result<u64> {
        self.ensure_open()?;
        self.view().degree(node, selection)
    }

    /// Nodes carrying `label`, in id order.
    pub fn nodes_with_label(&self, label: LabelId) -> Result<Vec<NodeId>> {
        self.ensure_open()?;
        self.view().nodes_with_label(label)
    }

    // Schema

    fn rule_named(&self, name: &str) -> Option<SchemaRule> {
        if let Some(rule) = self
            .state
            .added_schema_rules()
            .find(|rule| rule.name() == name)
        {
            return Some(rule.clone());
        }
        self.db
            .engine()
            .schema()
            .snapshot()
            .rule_by_name(name)
            .filter(|rule| !self.state.is_schema_rule_dropped(rule.id()))
            .cloned()
    }

    fn begin_schema_change(&mut self, name: &str) -> Result<()> {
        self.ensure_write()?;
        self.locks.acquire(ResourceId::SCHEMA, LockMode::Exclusive)?;
        if self.rule_named(name).is_some() {
            return Err(PenumbraError::ConstraintViolation(format!(
                "a schema rule named '{name}' already exists"
            )));
        }
        Ok(())
    }

    fn ensure_no_index_on(&self, schema: &SchemaDescriptor) -> Result<()> {
        let snapshot = self.db.engine().schema().snapshot();
        let committed = snapshot
            .index_for_schema(schema)
            .filter(|index| !self.state.is_schema_rule_dropped(index.id))
            .is_some();
        let added = self
            .state
            .added_schema_rules()
            .any(|rule| matches!(rule, SchemaRule::Index(index) if &index.schema == schema));
        if committed || added {
            return Err(PenumbraError::ConstraintViolation(format!(
                "an index on {schema} already exists"
            )));
        }
        Ok(())
    }

    fn add_rule(&mut self, rule: SchemaRule) -> Result<()> {
        rule.validate_new()?;
        self.state.schema_rule_do_add(rule);
        Ok(())
    }

    /// Creates an index, populated when the transaction commits.
    pub fn create_index(&mut self, name: &str, schema: SchemaDescriptor) -> Result<u64> {
        self.begin_schema_change(name)?;
        self.ensure_no_index_on(&schema)?;
        let id = self.context().reserve_schema_rule_id();
        self.reserved_rules.push(id);
        self.add_rule(SchemaRule::Index(IndexDescriptor {
            id,
            name: name.to_owned(),
            schema,
            provider: IndexProvider::default(),
            unique: false,
            owning_constraint: None,
        }))?;
        Ok(id)
    }

    /// Creates a constraint. Uniqueness and node key constraints get a unique
    /// index of their own named after them.
    ///
    /// Existing data is checked at commit; a violation fails the commit.
    pub fn create_constraint(
        &mut self,
        name: &str,
        schema: SchemaDescriptor,
        constraint_type: ConstraintType,
    ) -> Result<u64> {
        self.begin_schema_change(name)?;
        let index_name = format!("{name}_index");
        let owned_index = if constraint_type.requires_index() {
            if self.rule_named(&index_name).is_some() {
                return Err(PenumbraError::ConstraintViolation(format!(
                    "a schema rule named '{index_name}' already exists"
                )));
            }
            self.ensure_no_index_on(&schema)?;
            let index_id = self.context().reserve_schema_rule_id();
            self.reserved_rules.push(index_id);
            Some(index_id)
        } else {
            None
        };
        let id = self.context().reserve_schema_rule_id();
        self.reserved_rules.push(id);
        let constraint = SchemaRule::Constraint(ConstraintDescriptor {
            id,
            name: name.to_owned(),
            schema: schema.clone(),
            constraint_type,
            owned_index,
        });
        constraint.validate_new()?;
        if let Some(index_id) = owned_index {
            self.add_rule(SchemaRule::Index(IndexDescriptor {
                id: index_id,
                name: index_name,
                schema,
                provider: IndexProvider::default(),
                unique: true,
                owning_constraint: Some(id),
            }))?;
        }
        self.state.schema_rule_do_add(constraint);
        Ok(id)
    }

    /// Drops the index or constraint called `name`. Dropping a constraint
    /// drops its index too; an index owned by a constraint cannot be dropped
    /// on its own.
    pub fn drop_schema_rule(&mut self, name: &str) -> Result<()> {
        self.ensure_write()?;
        self.locks.acquire(ResourceId::SCHEMA, LockMode::Exclusive)?;
        let rule = self.rule_named(name).ok_or_else(|| {
            PenumbraError::ConstraintViolation(format!("no schema rule named '{name}'"))
        })?;
        match &rule {
            SchemaRule::Index(index) => {
                if let Some(owner) = index.owning_constraint {
                    let owner_alive = self
                        .state
                        .added_schema_rules()
                        .any(|rule| rule.id() == owner)
                        || (self.db.engine().schema().snapshot().rule(owner).is_some()
                            && !self.state.is_schema_rule_dropped(owner));
                    if owner_alive {
                        return Err(PenumbraError::ConstraintViolation(format!(
                            "index '{name}' belongs to a constraint"
                        )));
                    }
                }
            }
            SchemaRule::Constraint(constraint) => {
                if let Some(index_id) = constraint.owned_index {
                    let index = self
                        .state
                        .added_schema_rules()
                        .find(|rule| rule.id() == index_id)
                        .cloned()
                        .or_else(|| self.db.engine().schema().snapshot().rule(index_id).cloned());
                    if let Some(index) = index {
                        self.state.schema_rule_do_drop(index);
                    }
                }
            }
        }
        self.state.schema_rule_do_drop(rule);
        Ok(())
    }

    // Lifecycle

    /// Makes every change durable and visible. Returns the commit id, or
    /// `None` when the transaction changed nothing.
    pub fn commit(mut self) -> Result<Option<TxId>> {
        self.ensure_open()?;
        self.open = false;
        let result = match self.kind {
            TransactionKind::Read => Ok(None),
            TransactionKind::Write => {
                let db = self.db;
                let may_upgrade = self.upgrade_lock_taken;
                let engine = db.engine();
                let context = self
                    .context
                    .get_or_insert_with(|| engine.new_command_creation_context());
                db.commit_transaction(&self.state, context, &mut self.locks, may_upgrade)
            }
        };
        // Ids of a transaction that reached the log belong to it even if
        // applying it failed.
        let durable = matches!(result, Ok(Some(_)) | Err(PenumbraError::TransactionApply(_)));
        self.finish(durable);
        match &result {
            Ok(Some(tx_id)) => debug!(tx = %tx_id, "tx.committed"),
            Ok(None) => trace!("tx.committed_empty"),
            Err(err) => debug!(error = %err, "tx.commit_failed"),
        }
        result
    }

    /// Discards every change.
    pub fn rollback(mut self) -> Result<()> {
        self.ensure_open()?;
        self.open = false;
        self.finish(false);
        trace!("tx.rolled_back");
        Ok(())
    }

    /// Returns ids nothing committed and releases every lock.
    fn finish(&mut self, durable: bool) {
        let reserved_nodes = std::mem::take(&mut self.reserved_nodes);
        let reserved_relationships = std::mem::take(&mut self.reserved_relationships);
        let reserved_rules = std::mem::take(&mut self.reserved_rules);
        if let Some(context) = self.context.as_mut() {
            for node in reserved_nodes {
                if !(durable && self.state.is_node_created(node)) {
                    context.release_node(node);
                }
            }
            for id in reserved_relationships {
                if !(durable && self.state.is_relationship_created(id)) {
                    context.release_relationship(id);
                }
            }
            for id in reserved_rules {
                let committed = durable && self.state.added_schema_rules().any(|rule| rule.id() == id);
                if !committed {
                    context.release_schema_rule_id(id);
                }
            }
            context.close();
        }
        self.locks.release_all();
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if self.open {
            self.open = false;
            self.finish(false);
            debug!("tx.rolled_back_on_drop");
        }
    }
}
