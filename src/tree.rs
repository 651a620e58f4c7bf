//! Tree reconciliation: merges the parsed node tree into the persisted one, one parent at a time.
//!
//! For every parent the parsed children are walked in document order. Each child claims the first
//! unprocessed persisted sibling it [matches](crate::matcher::node_matches), or gets a bare
//! placeholder created on the backend so it owns a durable id before any sibling link points at
//! it. Fields are merged, previous/next links rewritten to follow document order, parent and spec
//! references set, and levels recursed into. Persisted children left unclaimed are queued for
//! removal.
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    content::{indexed_children, ContentSpec, NodeIndex, SpecNode},
    error::SyncError,
    event::{emit, SyncEvent},
    matcher::node_matches,
    merge::merge_fields,
    properties::{NodeId, PersistedNode, PersistedTree},
    provider::{EdgeOperation, NodeBatch, NodeOperation, NodeProvider},
};

/// Run-scoped mapping from parsed nodes to the persisted nodes they were merged into. Holds topics,
/// levels and comments; metadata entries have no identity worth referencing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityMap {
    map: BTreeMap<NodeIndex, NodeId>,
}

impl IdentityMap {
    pub fn insert(&mut self, parsed: NodeIndex, persisted: NodeId) {
        self.map.insert(parsed, persisted);
    }

    pub fn get(&self, parsed: NodeIndex) -> Option<NodeId> {
        self.map.get(&parsed).copied()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeIndex, NodeId)> + '_ {
        self.map.iter().map(|(idx, id)| (*idx, *id))
    }
}

/// Nodes touched by a merge and nodes queued for removal.
#[derive(Debug, Clone, Default)]
pub struct NodeChangeSet {
    touched: Vec<NodeId>,
    touched_set: BTreeSet<NodeId>,
    removals: Vec<NodeId>,
    created: Vec<NodeId>,
}

impl NodeChangeSet {
    pub fn touch(&mut self, id: NodeId) {
        if self.touched_set.insert(id) {
            self.touched.push(id);
        }
    }

    pub fn remove(&mut self, id: NodeId) {
        if !self.removals.contains(&id) {
            self.removals.push(id);
        }
    }

    pub fn removals(&self) -> &[NodeId] {
        &self.removals
    }

    /// Placeholders created during the merge.
    pub fn created(&self) -> &[NodeId] {
        &self.created
    }

    /// The update-collection payload: one update per touched node with pending writes, then the
    /// removals. Removed nodes never appear as updates.
    pub fn to_batch(&self, tree: &PersistedTree, edges: Vec<EdgeOperation>) -> NodeBatch {
        let removed: BTreeSet<&NodeId> = self.removals.iter().collect();
        let mut nodes: Vec<NodeOperation> = self
            .touched
            .iter()
            .filter(|id| !removed.contains(id))
            .filter_map(|id| tree.get(id))
            .filter(|node| node.is_dirty())
            .map(|node| NodeOperation::Update {
                node: node.clone(),
                fields: node.dirty_fields(),
            })
            .collect();
        nodes.extend(self.removals.iter().map(|id| NodeOperation::Remove(*id)));
        NodeBatch { nodes, edges }
    }
}

/// Result of a [TreeMerger] pass.
#[derive(Debug, Clone, Default)]
pub struct TreeMerge {
    pub identity: IdentityMap,
    pub changes: NodeChangeSet,
}

pub struct TreeMerger<'a, P: NodeProvider + ?Sized> {
    provider: &'a P,
    tree: &'a mut PersistedTree,
    events: Option<(&'a UnboundedSender<SyncEvent>, Uuid)>,
    processed: BTreeSet<NodeId>,
    result: TreeMerge,
}

impl<'a, P: NodeProvider + ?Sized> TreeMerger<'a, P> {
    pub fn new(provider: &'a P, tree: &'a mut PersistedTree) -> Self {
        TreeMerger {
            provider,
            tree,
            events: None,
            processed: BTreeSet::new(),
            result: TreeMerge::default(),
        }
    }

    pub fn with_events(mut self, tx: Option<&'a UnboundedSender<SyncEvent>>, run: Uuid) -> Self {
        self.events = tx.map(|tx| (tx, run));
        self
    }

    pub fn merge(mut self, spec: &ContentSpec) -> Result<TreeMerge, SyncError> {
        self.merge_children(spec.indexed_roots(), None)?;
        info!(
            "Tree merged: {} nodes mapped, {} created, {} queued for removal",
            self.result.identity.len(),
            self.result.changes.created.len(),
            self.result.changes.removals.len()
        );
        Ok(self.result)
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut PersistedNode, SyncError> {
        self.tree
            .get_mut(&id)
            .ok_or_else(|| SyncError::processing(format!("node {id} vanished from the tree")))
    }

    fn create_placeholder(&mut self, child: &SpecNode) -> Result<NodeId, SyncError> {
        let mut placeholder = PersistedNode::placeholder(child.kind());
        // Owned by the spec from the start, so deleting the spec also removes it
        placeholder.spec_id = Some(self.tree.spec_id());
        let created = self.provider.create_node(&placeholder)?;
        let id = created.id;
        debug!("line {}: created {}", child.line_number(), created);
        self.tree.insert(created);
        self.result.changes.created.push(id);
        if let Some((tx, run)) = self.events {
            emit(
                Some(tx),
                SyncEvent::NodeCreated(run, id, child.kind(), child.line_number()),
            );
        }
        Ok(id)
    }

    fn merge_children(
        &mut self,
        children: Vec<(NodeIndex, &SpecNode)>,
        parent: Option<NodeId>,
    ) -> Result<(), SyncError> {
        let persisted = self.tree.children_of(parent).to_vec();
        let spec_id = self.tree.spec_id();
        let mut previous: Option<NodeId> = None;

        for (idx, child) in children {
            let found = persisted.iter().copied().find(|id| {
                !self.processed.contains(id)
                    && self
                        .tree
                        .get(id)
                        .map(|node| node_matches(child, node))
                        .unwrap_or(false)
            });
            let id = match found {
                Some(id) => id,
                None => self.create_placeholder(child)?,
            };
            self.processed.insert(id);

            let node = self.node_mut(id)?;
            merge_fields(child, node);
            node.update_previous(previous);
            node.update_parent(parent);
            node.update_spec(Some(spec_id));
            if let Some(prev) = previous {
                self.node_mut(prev)?.update_next(Some(id));
            }
            self.result.changes.touch(id);

            if !matches!(child, SpecNode::MetaData(_)) {
                self.result.identity.insert(idx, id);
            }
            if let SpecNode::Level(level) = child {
                self.merge_children(
                    indexed_children(NodeIndex(idx.0 + 1), &level.children),
                    Some(id),
                )?;
            }
            previous = Some(id);
        }

        if let Some(last) = previous {
            self.node_mut(last)?.update_next(None);
        }
        for id in persisted {
            if !self.processed.contains(&id) {
                debug!("node {id} no longer in the spec, queued for removal");
                self.result.changes.remove(id);
            }
        }
        Ok(())
    }
}
