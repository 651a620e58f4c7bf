//! [MemoryBackend] implements every provider trait in process. It backs the test suite and
//! benchmarks, and serves as the reference for how a real backend is expected to behave: batched
//! calls are applied atomically, node removal cascades to descendants and their edges, and
//! failures can be injected per call kind.
use enumset::{EnumSet, EnumSetType};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};

use crate::{
    entity::{ContentSpecEntity, Tag, TopicEntity},
    error::SyncError,
    properties::{
        EdgeId, EntityId, NodeId, NodeKind, PersistedNode, RelatedEdge, RelatedNode,
        RelationshipKind, SpecId,
    },
    provider::{
        Backend, ContentSpecProvider, EdgeOperation, NodeBatch, NodeOperation, NodeProvider,
        TagProvider, TopicProvider,
    },
};

/// Calls that can be made to fail.
#[derive(Debug, Serialize, Deserialize, PartialOrd, Ord, Hash, EnumSetType)]
pub enum FailPoint {
    CreateNode,
    UpdateNodes,
    CreateTopics,
    UpdateTopics,
    DeleteTopics,
    CreateSpec,
    UpdateSpec,
    DeleteSpec,
}

/// Record of a call made against the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Call {
    CreateNode(NodeKind),
    /// Updated node ids, removed node ids, edge operation count
    UpdateNodes(Vec<NodeId>, Vec<NodeId>, usize),
    CreateTopics(usize),
    UpdateTopics(Vec<EntityId>),
    DeleteTopics(Vec<EntityId>),
    CreateSpec,
    UpdateSpec(SpecId),
    DeleteSpec(SpecId),
    Commit,
    Rollback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct StoredEdge {
    from: NodeId,
    to: NodeId,
    kind: RelationshipKind,
}

#[derive(Debug, Clone, Default)]
struct MemoryState {
    nodes: BTreeMap<NodeId, PersistedNode>,
    edges: BTreeMap<EdgeId, StoredEdge>,
    /// Every revision of every topic, oldest first
    topics: BTreeMap<EntityId, Vec<TopicEntity>>,
    tags: Vec<Tag>,
    specs: BTreeMap<SpecId, ContentSpecEntity>,
    next_id: i64,
}

impl MemoryState {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn remove_node_cascading(&mut self, id: NodeId) {
        let mut pending = vec![id];
        while let Some(id) = pending.pop() {
            if self.nodes.remove(&id).is_none() {
                continue;
            }
            pending.extend(
                self.nodes
                    .values()
                    .filter(|node| node.parent_id == Some(id))
                    .map(|node| node.id),
            );
            self.edges.retain(|_, edge| edge.from != id && edge.to != id);
        }
    }

    fn related_edges(&self, id: NodeId) -> Vec<RelatedEdge> {
        self.edges
            .iter()
            .filter(|(_, edge)| edge.from == id)
            .filter_map(|(edge_id, edge)| {
                self.nodes.get(&edge.to).map(|target| RelatedEdge {
                    id: *edge_id,
                    related: RelatedNode::from(target),
                    kind: edge.kind,
                })
            })
            .collect()
    }

    fn check_batch(&self, batch: &NodeBatch) -> Result<(), SyncError> {
        for op in batch.nodes.iter() {
            let id = match op {
                NodeOperation::Update { node, .. } => node.id,
                NodeOperation::Remove(id) => *id,
            };
            if !self.nodes.contains_key(&id) {
                return Err(SyncError::backend(format!("node {id} does not exist")));
            }
        }
        for op in batch.edges.iter() {
            match op {
                EdgeOperation::Add { from, to, .. } => {
                    for id in [from, to] {
                        if !self.nodes.contains_key(id) {
                            return Err(SyncError::backend(format!(
                                "edge endpoint {id} does not exist"
                            )));
                        }
                    }
                }
                EdgeOperation::Remove { from, edge } => {
                    if self.edges.get(edge).map(|e| e.from) != Some(*from) {
                        return Err(SyncError::backend(format!(
                            "edge {edge} does not belong to node {from}"
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryBackend {
    state: RwLock<MemoryState>,
    /// State as of the start of the open transaction
    snapshot: Mutex<Option<MemoryState>>,
    transactional: bool,
    failures: RwLock<EnumSet<FailPoint>>,
    calls: Mutex<Vec<Call>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// A backend that reports rollback support and undoes every write since the last commit on
    /// rollback.
    pub fn transactional() -> Self {
        MemoryBackend {
            transactional: true,
            ..Default::default()
        }
    }

    pub fn fail_on(&self, point: FailPoint) {
        self.failures.write().insert(point);
    }

    pub fn clear_failures(&self) {
        self.failures.write().clear();
    }

    fn check(&self, point: FailPoint) -> Result<(), SyncError> {
        if self.failures.read().contains(point) {
            return Err(SyncError::backend(format!("injected {point:?} failure")));
        }
        Ok(())
    }

    fn record(&self, call: Call) {
        debug!("memory backend: {call:?}");
        self.calls.lock().push(call);
    }

    /// Take the pre-transaction snapshot ahead of the first write.
    fn begin_write(&self) {
        if !self.transactional {
            return;
        }
        let mut snapshot = self.snapshot.lock();
        if snapshot.is_none() {
            *snapshot = Some(self.state.read().clone());
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    pub fn add_tag(&self, tag: Tag) {
        self.state.write().tags.push(tag);
    }

    /// Store a topic entity as-is and return its id, assigning one if missing.
    pub fn insert_topic(&self, mut topic: TopicEntity) -> EntityId {
        let mut state = self.state.write();
        let id = match topic.id {
            Some(id) => id,
            None => EntityId(state.next_id()),
        };
        topic.id = Some(id);
        topic.revision = topic.revision.or(Some(1));
        topic.tags.commit();
        state.topics.entry(id).or_default().push(topic);
        id
    }

    pub fn insert_spec(&self, mut spec: ContentSpecEntity) -> SpecId {
        let mut state = self.state.write();
        let id = match spec.id {
            Some(id) => id,
            None => SpecId(state.next_id()),
        };
        spec.id = Some(id);
        state.specs.insert(id, spec);
        id
    }

    /// Store a node as-is, assigning an id when it carries the default one.
    pub fn insert_node(&self, mut node: PersistedNode) -> NodeId {
        let mut state = self.state.write();
        if node.id == NodeId::default() {
            node.id = NodeId(state.next_id());
        }
        node.related_to.clear();
        node.clear_dirty();
        let id = node.id;
        state.nodes.insert(id, node);
        id
    }

    pub fn insert_edge(&self, from: NodeId, to: NodeId, kind: RelationshipKind) -> EdgeId {
        let mut state = self.state.write();
        let id = EdgeId(state.next_id());
        state.edges.insert(id, StoredEdge { from, to, kind });
        id
    }

    pub fn node(&self, id: NodeId) -> Option<PersistedNode> {
        let state = self.state.read();
        state.nodes.get(&id).map(|node| PersistedNode {
            related_to: state.related_edges(id),
            ..node.clone()
        })
    }

    pub fn topic(&self, id: EntityId) -> Option<TopicEntity> {
        self.state
            .read()
            .topics
            .get(&id)
            .and_then(|revisions| revisions.last().cloned())
    }

    pub fn topic_count(&self) -> usize {
        self.state.read().topics.len()
    }

    pub fn spec(&self, id: SpecId) -> Option<ContentSpecEntity> {
        self.state.read().specs.get(&id).cloned()
    }

    pub fn spec_count(&self) -> usize {
        self.state.read().specs.len()
    }

    pub fn node_count(&self) -> usize {
        self.state.read().nodes.len()
    }
}

impl NodeProvider for MemoryBackend {
    fn create_node(&self, node: &PersistedNode) -> Result<PersistedNode, SyncError> {
        self.check(FailPoint::CreateNode)?;
        self.begin_write();
        let mut state = self.state.write();
        let mut created = node.clone();
        created.id = NodeId(state.next_id());
        created.related_to.clear();
        created.clear_dirty();
        state.nodes.insert(created.id, created.clone());
        drop(state);
        self.record(Call::CreateNode(node.kind));
        Ok(created)
    }

    fn get_spec_nodes(&self, spec: SpecId) -> Result<Vec<PersistedNode>, SyncError> {
        let state = self.state.read();
        Ok(state
            .nodes
            .values()
            .filter(|node| node.spec_id == Some(spec))
            .map(|node| PersistedNode {
                related_to: state.related_edges(node.id),
                ..node.clone()
            })
            .collect())
    }

    fn update_nodes(&self, batch: &NodeBatch) -> Result<(), SyncError> {
        self.check(FailPoint::UpdateNodes)?;
        self.begin_write();
        let mut state = self.state.write();
        state.check_batch(batch)?;

        let mut updated = Vec::new();
        let mut removed = Vec::new();
        for op in batch.nodes.iter() {
            match op {
                NodeOperation::Update { node, fields } => {
                    if let Some(stored) = state.nodes.get_mut(&node.id) {
                        stored.apply_fields(node, *fields);
                        updated.push(node.id);
                    }
                }
                NodeOperation::Remove(id) => {
                    state.remove_node_cascading(*id);
                    removed.push(*id);
                }
            }
        }
        for op in batch.edges.iter() {
            match op {
                EdgeOperation::Add { from, to, kind } => {
                    let id = EdgeId(state.next_id());
                    state.edges.insert(
                        id,
                        StoredEdge {
                            from: *from,
                            to: *to,
                            kind: *kind,
                        },
                    );
                }
                EdgeOperation::Remove { edge, .. } => {
                    state.edges.remove(edge);
                }
            }
        }
        drop(state);
        self.record(Call::UpdateNodes(updated, removed, batch.edges.len()));
        Ok(())
    }
}

impl TopicProvider for MemoryBackend {
    fn get_topic(&self, id: EntityId, revision: Option<i64>) -> Result<TopicEntity, SyncError> {
        let state = self.state.read();
        let revisions = state
            .topics
            .get(&id)
            .ok_or_else(|| SyncError::NotFound(format!("topic {id}")))?;
        let found = match revision {
            None => revisions.last(),
            Some(rev) => revisions.iter().find(|t| t.revision == Some(rev)),
        };
        found
            .cloned()
            .ok_or_else(|| SyncError::NotFound(format!("topic {id} revision {revision:?}")))
    }

    fn create_topics(&self, topics: &[TopicEntity]) -> Result<Vec<TopicEntity>, SyncError> {
        self.check(FailPoint::CreateTopics)?;
        self.begin_write();
        let mut state = self.state.write();
        let created: Vec<TopicEntity> = topics
            .iter()
            .cloned()
            .map(|mut topic| {
                topic.id = Some(EntityId(state.next_id()));
                topic.revision = Some(1);
                topic.tags.commit();
                topic
            })
            .collect();
        for topic in created.iter() {
            if let Some(id) = topic.id {
                state.topics.insert(id, vec![topic.clone()]);
            }
        }
        drop(state);
        self.record(Call::CreateTopics(created.len()));
        Ok(created)
    }

    fn update_topics(&self, topics: &[TopicEntity]) -> Result<Vec<TopicEntity>, SyncError> {
        self.check(FailPoint::UpdateTopics)?;
        let mut ids = Vec::new();
        for topic in topics {
            match topic.id {
                Some(id) if self.state.read().topics.contains_key(&id) => ids.push(id),
                _ => return Err(SyncError::backend(format!("cannot update {topic}"))),
            }
        }
        self.begin_write();
        let mut state = self.state.write();
        let mut updated = Vec::new();
        for (topic, id) in topics.iter().zip(ids.iter()) {
            let revisions = state.topics.entry(*id).or_default();
            let mut next = topic.clone();
            next.revision = Some(revisions.len() as i64 + 1);
            next.tags.commit();
            revisions.push(next.clone());
            updated.push(next);
        }
        drop(state);
        self.record(Call::UpdateTopics(ids));
        Ok(updated)
    }

    fn delete_topics(&self, ids: &[EntityId]) -> Result<(), SyncError> {
        self.check(FailPoint::DeleteTopics)?;
        self.begin_write();
        let mut state = self.state.write();
        for id in ids {
            state.topics.remove(id);
        }
        drop(state);
        self.record(Call::DeleteTopics(ids.to_vec()));
        Ok(())
    }
}

impl TagProvider for MemoryBackend {
    fn get_tags_by_name(&self, name: &str) -> Result<Vec<Tag>, SyncError> {
        Ok(self
            .state
            .read()
            .tags
            .iter()
            .filter(|tag| tag.name == name)
            .cloned()
            .collect())
    }
}

impl ContentSpecProvider for MemoryBackend {
    fn get_content_spec(&self, id: SpecId) -> Result<ContentSpecEntity, SyncError> {
        self.spec(id)
            .ok_or_else(|| SyncError::NotFound(format!("content spec {id}")))
    }

    fn create_content_spec(&self, spec: &ContentSpecEntity) -> Result<ContentSpecEntity, SyncError> {
        self.check(FailPoint::CreateSpec)?;
        self.begin_write();
        let mut state = self.state.write();
        let mut created = spec.clone();
        let id = SpecId(state.next_id());
        created.id = Some(id);
        state.specs.insert(id, created.clone());
        drop(state);
        self.record(Call::CreateSpec);
        Ok(created)
    }

    fn update_content_spec(&self, spec: &ContentSpecEntity) -> Result<ContentSpecEntity, SyncError> {
        self.check(FailPoint::UpdateSpec)?;
        let id = spec
            .id
            .ok_or_else(|| SyncError::backend("cannot update a content spec without an id"))?;
        self.begin_write();
        let mut state = self.state.write();
        let stored = state
            .specs
            .get_mut(&id)
            .ok_or_else(|| SyncError::NotFound(format!("content spec {id}")))?;
        *stored = spec.clone();
        drop(state);
        self.record(Call::UpdateSpec(id));
        Ok(spec.clone())
    }

    fn delete_content_spec(&self, id: SpecId) -> Result<(), SyncError> {
        self.check(FailPoint::DeleteSpec)?;
        self.begin_write();
        let mut state = self.state.write();
        state.specs.remove(&id);
        let owned: Vec<NodeId> = state
            .nodes
            .values()
            .filter(|node| node.spec_id == Some(id))
            .map(|node| node.id)
            .collect();
        for node in owned {
            state.remove_node_cascading(node);
        }
        drop(state);
        self.record(Call::DeleteSpec(id));
        Ok(())
    }
}

impl Backend for MemoryBackend {
    fn is_rollback_supported(&self) -> bool {
        self.transactional
    }

    fn commit(&self) -> Result<(), SyncError> {
        if self.transactional {
            self.snapshot.lock().take();
            self.record(Call::Commit);
        }
        Ok(())
    }

    fn rollback(&self) -> Result<(), SyncError> {
        if !self.transactional {
            return Err(SyncError::backend("this backend does not support rollback"));
        }
        if let Some(snapshot) = self.snapshot.lock().take() {
            info!("memory backend: restoring pre-transaction state");
            *self.state.write() = snapshot;
        }
        self.record(Call::Rollback);
        Ok(())
    }
}
