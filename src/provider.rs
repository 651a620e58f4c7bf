//! Collaborator interfaces for the remote content-management backend. Every call is synchronous
//! and either succeeds completely or returns an error; providers never report partial success.
use serde::{Deserialize, Serialize};

use crate::{
    entity::{ContentSpecEntity, Tag, TopicEntity},
    error::SyncError,
    properties::{
        EdgeId, EntityId, EnumSet, NodeField, NodeId, PersistedNode, RelationshipKind, SpecId,
    },
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum NodeOperation {
    /// Write `fields` of `node` onto the stored node with the same id.
    Update {
        node: PersistedNode,
        fields: EnumSet<NodeField>,
    },
    Remove(NodeId),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EdgeOperation {
    Add {
        from: NodeId,
        to: NodeId,
        kind: RelationshipKind,
    },
    Remove {
        from: NodeId,
        edge: EdgeId,
    },
}

/// One atomic "update collection" call: node updates and removals plus related-edge changes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeBatch {
    pub nodes: Vec<NodeOperation>,
    pub edges: Vec<EdgeOperation>,
}

impl NodeBatch {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.edges.is_empty()
    }

    pub fn updates(&self) -> impl Iterator<Item = (&PersistedNode, EnumSet<NodeField>)> {
        self.nodes.iter().filter_map(|op| match op {
            NodeOperation::Update { node, fields } => Some((node, *fields)),
            NodeOperation::Remove(_) => None,
        })
    }

    pub fn removals(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.iter().filter_map(|op| match op {
            NodeOperation::Remove(id) => Some(*id),
            NodeOperation::Update { .. } => None,
        })
    }
}

pub trait NodeProvider: Sync {
    /// Create a bare node of `node.kind` and return it with its durable id assigned.
    fn create_node(&self, node: &PersistedNode) -> Result<PersistedNode, SyncError>;

    /// Every node owned by `spec`, each carrying its outgoing related-to edges.
    fn get_spec_nodes(&self, spec: SpecId) -> Result<Vec<PersistedNode>, SyncError>;

    fn update_nodes(&self, batch: &NodeBatch) -> Result<(), SyncError>;
}

pub trait TopicProvider: Sync {
    /// Fetch a topic entity, at `revision` or the latest revision when `None`.
    fn get_topic(&self, id: EntityId, revision: Option<i64>) -> Result<TopicEntity, SyncError>;

    /// Create every topic in one batch, returning them with ids and revisions assigned, in order.
    fn create_topics(&self, topics: &[TopicEntity]) -> Result<Vec<TopicEntity>, SyncError>;

    fn update_topics(&self, topics: &[TopicEntity]) -> Result<Vec<TopicEntity>, SyncError>;

    fn delete_topics(&self, ids: &[EntityId]) -> Result<(), SyncError>;
}

pub trait TagProvider: Sync {
    fn get_tags_by_name(&self, name: &str) -> Result<Vec<Tag>, SyncError>;
}

pub trait ContentSpecProvider: Sync {
    fn get_content_spec(&self, id: SpecId) -> Result<ContentSpecEntity, SyncError>;

    fn create_content_spec(&self, spec: &ContentSpecEntity) -> Result<ContentSpecEntity, SyncError>;

    fn update_content_spec(&self, spec: &ContentSpecEntity) -> Result<ContentSpecEntity, SyncError>;

    fn delete_content_spec(&self, id: SpecId) -> Result<(), SyncError>;
}

/// Everything a reconciliation run needs from the remote side.
pub trait Backend: NodeProvider + TopicProvider + TagProvider + ContentSpecProvider {
    /// When true, [Backend::rollback] undoes every write of the current run and no manual
    /// compensation is performed.
    fn is_rollback_supported(&self) -> bool {
        false
    }

    /// Make the current run's writes final. A no-op for backends without transactions.
    fn commit(&self) -> Result<(), SyncError> {
        Ok(())
    }

    fn rollback(&self) -> Result<(), SyncError> {
        Err(SyncError::backend("this backend does not support rollback"))
    }
}
