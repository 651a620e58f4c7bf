/// [crate::properties] holds the backend-side representation of a content spec: durable
/// identifiers, node kinds, persisted nodes with explicit sibling links, their outgoing related-to
/// edges, and the run-local [PersistedTree] arena they are loaded into.
pub use enumset::EnumSet;
use enumset::*;
use petgraph::{algo::is_cyclic_directed, graphmap::DiGraphMap};
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, BTreeSet},
    fmt::{Display, Formatter},
};

use crate::error::SyncError;

macro_rules! durable_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, Serialize, Deserialize, Hash, PartialEq, Eq, PartialOrd, Ord)]
        pub struct $name(pub i64);

        impl Display for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(id: i64) -> Self {
                $name(id)
            }
        }

        impl TryFrom<&str> for $name {
            type Error = SyncError;

            fn try_from(src: &str) -> Result<Self, Self::Error> {
                src.parse::<i64>().map($name).map_err(|e| {
                    SyncError::Serialization(format!(
                        "Invalid {}: '{src}' ({e})",
                        stringify!($name)
                    ))
                })
            }
        }
    };
}

durable_id!(
    /// Durable id of one persisted tree element.
    NodeId
);
durable_id!(
    /// Database id of the underlying topic entity a topic node points at.
    EntityId
);
durable_id!(
    /// Durable id of a content spec entity.
    SpecId
);
durable_id!(EdgeId);
durable_id!(TagId);
durable_id!(
    /// Id of a tag category; tags in the writer category name assigned writers.
    CategoryId
);

/// [NodeKind] is the node-type discriminator stored on every [PersistedNode]. Everything that is
/// not a topic, comment or metadata entry is one of the level kinds.
#[derive(Debug, Default, Serialize, Deserialize, PartialOrd, Ord, Hash, EnumSetType)]
#[enumset(serialize_repr = "list")]
pub enum NodeKind {
    #[default]
    Topic,
    Comment,
    MetaData,
    Chapter,
    Section,
    Appendix,
    Part,
    Process,
    Preface,
    InitialContent,
}

impl NodeKind {
    pub fn levels() -> EnumSet<NodeKind> {
        NodeKind::Chapter
            | NodeKind::Section
            | NodeKind::Appendix
            | NodeKind::Part
            | NodeKind::Process
            | NodeKind::Preface
            | NodeKind::InitialContent
    }

    pub fn is_level(&self) -> bool {
        NodeKind::levels().contains(*self)
    }
}

impl Display for NodeKind {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

impl TryFrom<&str> for NodeKind {
    type Error = SyncError;

    fn try_from(src: &str) -> Result<NodeKind, SyncError> {
        match &src.to_lowercase()[..] {
            "topic" => Ok(NodeKind::Topic),
            "comment" => Ok(NodeKind::Comment),
            "metadata" | "meta-data" => Ok(NodeKind::MetaData),
            "chapter" => Ok(NodeKind::Chapter),
            "section" => Ok(NodeKind::Section),
            "appendix" => Ok(NodeKind::Appendix),
            "part" => Ok(NodeKind::Part),
            "process" => Ok(NodeKind::Process),
            "preface" => Ok(NodeKind::Preface),
            "initial-content" | "initialcontent" => Ok(NodeKind::InitialContent),
            _ => Err(SyncError::Serialization(format!(
                "Invalid str for NodeKind. Received {src}"
            ))),
        }
    }
}

/// The relationship kinds a topic can declare towards another node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RelationshipKind {
    Refer,
    Prerequisite,
    LinkList,
    Next,
    Previous,
}

impl Display for RelationshipKind {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

impl From<RelationshipKind> for u32 {
    fn from(src: RelationshipKind) -> u32 {
        match src {
            RelationshipKind::Refer => 0,
            RelationshipKind::Prerequisite => 1,
            RelationshipKind::LinkList => 2,
            RelationshipKind::Next => 3,
            RelationshipKind::Previous => 4,
        }
    }
}

impl TryFrom<&str> for RelationshipKind {
    type Error = SyncError;

    fn try_from(src: &str) -> Result<RelationshipKind, SyncError> {
        match &src.to_lowercase()[..] {
            "refer" | "refer-to" | "related-to" => Ok(RelationshipKind::Refer),
            "prerequisite" => Ok(RelationshipKind::Prerequisite),
            "link-list" | "linklist" => Ok(RelationshipKind::LinkList),
            "next" => Ok(RelationshipKind::Next),
            "previous" | "prev" => Ok(RelationshipKind::Previous),
            _ => Err(SyncError::Serialization(format!(
                "Invalid str for RelationshipKind. Received {src}. Valid options: refer, prerequisite, link-list, next, previous"
            ))),
        }
    }
}

/// The scalar fields of a [PersistedNode] that a reconciliation run can write. A node's dirty set
/// is exactly the update payload sent to the backend for it.
#[derive(Debug, Serialize, Deserialize, PartialOrd, Ord, Hash, EnumSetType)]
#[enumset(serialize_repr = "list")]
pub enum NodeField {
    Title,
    TargetId,
    Condition,
    AdditionalText,
    EntityId,
    EntityRevision,
    PreviousNode,
    NextNode,
    Parent,
    ContentSpec,
}

/// Snapshot of the node on the far end of a [RelatedEdge], as reported by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelatedNode {
    pub id: NodeId,
    pub kind: NodeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<EntityId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_id: Option<String>,
}

impl From<&PersistedNode> for RelatedNode {
    fn from(node: &PersistedNode) -> Self {
        RelatedNode {
            id: node.id,
            kind: node.kind,
            entity_id: node.entity_id,
            target_id: node.target_id.clone(),
        }
    }
}

/// A directed related-to edge owned by a topic node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelatedEdge {
    pub id: EdgeId,
    pub related: RelatedNode,
    pub kind: RelationshipKind,
}

/// The backend's durable representation of one content spec tree element. Sibling order is kept
/// through `previous_node_id`/`next_node_id` and the hierarchy through `parent_id`; a node never
/// embeds other nodes.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct PersistedNode {
    pub id: NodeId,
    pub kind: NodeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<EntityId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_revision: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_node_id: Option<NodeId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_node_id: Option<NodeId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<NodeId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spec_id: Option<SpecId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub related_to: Vec<RelatedEdge>,
    /// Fields written since the node was loaded or created. Maintained by the `update_*` setters.
    #[serde(skip)]
    pub dirty: EnumSet<NodeField>,
}

impl Default for NodeId {
    fn default() -> Self {
        NodeId(0)
    }
}

fn write_if_changed<T: PartialEq>(
    slot: &mut T,
    value: T,
    field: NodeField,
    dirty: &mut EnumSet<NodeField>,
) -> bool {
    if *slot == value {
        return false;
    }
    *slot = value;
    dirty.insert(field);
    true
}

impl PersistedNode {
    /// A bare node of the given kind, used as the payload of a placeholder create call.
    pub fn placeholder(kind: NodeKind) -> Self {
        PersistedNode {
            kind,
            ..Default::default()
        }
    }

    pub fn dirty_fields(&self) -> EnumSet<NodeField> {
        self.dirty
    }

    pub fn is_dirty(&self) -> bool {
        !self.dirty.is_empty()
    }

    /// Forget pending writes, e.g. after the backend acknowledged them.
    pub fn clear_dirty(&mut self) {
        self.dirty.clear();
    }

    pub fn update_title(&mut self, title: Option<String>) -> bool {
        write_if_changed(&mut self.title, title, NodeField::Title, &mut self.dirty)
    }

    pub fn update_target_id(&mut self, target_id: Option<String>) -> bool {
        write_if_changed(
            &mut self.target_id,
            target_id,
            NodeField::TargetId,
            &mut self.dirty,
        )
    }

    pub fn update_condition(&mut self, condition: Option<String>) -> bool {
        write_if_changed(
            &mut self.condition,
            condition,
            NodeField::Condition,
            &mut self.dirty,
        )
    }

    pub fn update_additional_text(&mut self, text: Option<String>) -> bool {
        write_if_changed(
            &mut self.additional_text,
            text,
            NodeField::AdditionalText,
            &mut self.dirty,
        )
    }

    pub fn update_entity_id(&mut self, entity_id: Option<EntityId>) -> bool {
        write_if_changed(
            &mut self.entity_id,
            entity_id,
            NodeField::EntityId,
            &mut self.dirty,
        )
    }

    /// Writing `None` is the "revision removed" transition: the node follows the latest revision.
    pub fn update_entity_revision(&mut self, revision: Option<i64>) -> bool {
        write_if_changed(
            &mut self.entity_revision,
            revision,
            NodeField::EntityRevision,
            &mut self.dirty,
        )
    }

    pub fn update_previous(&mut self, previous: Option<NodeId>) -> bool {
        write_if_changed(
            &mut self.previous_node_id,
            previous,
            NodeField::PreviousNode,
            &mut self.dirty,
        )
    }

    pub fn update_next(&mut self, next: Option<NodeId>) -> bool {
        write_if_changed(
            &mut self.next_node_id,
            next,
            NodeField::NextNode,
            &mut self.dirty,
        )
    }

    pub fn update_parent(&mut self, parent: Option<NodeId>) -> bool {
        write_if_changed(&mut self.parent_id, parent, NodeField::Parent, &mut self.dirty)
    }

    pub fn update_spec(&mut self, spec: Option<SpecId>) -> bool {
        write_if_changed(
            &mut self.spec_id,
            spec,
            NodeField::ContentSpec,
            &mut self.dirty,
        )
    }

    /// Copy the fields named in `fields` from `other` onto self. Used by backends applying a
    /// partial update payload.
    pub fn apply_fields(&mut self, other: &PersistedNode, fields: EnumSet<NodeField>) {
        for field in fields.iter() {
            match field {
                NodeField::Title => self.title = other.title.clone(),
                NodeField::TargetId => self.target_id = other.target_id.clone(),
                NodeField::Condition => self.condition = other.condition.clone(),
                NodeField::AdditionalText => self.additional_text = other.additional_text.clone(),
                NodeField::EntityId => self.entity_id = other.entity_id,
                NodeField::EntityRevision => self.entity_revision = other.entity_revision,
                NodeField::PreviousNode => self.previous_node_id = other.previous_node_id,
                NodeField::NextNode => self.next_node_id = other.next_node_id,
                NodeField::Parent => self.parent_id = other.parent_id,
                NodeField::ContentSpec => self.spec_id = other.spec_id,
            }
        }
    }
}

impl Display for PersistedNode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}#{} '{}'",
            self.kind,
            self.id,
            self.title.as_deref().unwrap_or_default()
        )
    }
}

/// Order a set of sibling ids by following their previous/next links. Chains are started from
/// nodes whose previous link leaves the sibling set; anything not reachable that way (broken or
/// cyclic links) is appended in id order.
fn order_siblings(ids: &BTreeSet<NodeId>, nodes: &BTreeMap<NodeId, PersistedNode>) -> Vec<NodeId> {
    let mut ordered = Vec::with_capacity(ids.len());
    let mut visited = BTreeSet::new();
    let heads = ids.iter().filter(|id| {
        nodes[*id]
            .previous_node_id
            .map(|prev| !ids.contains(&prev))
            .unwrap_or(true)
    });
    for head in heads {
        let mut cursor = Some(*head);
        while let Some(id) = cursor {
            if !ids.contains(&id) || !visited.insert(id) {
                break;
            }
            ordered.push(id);
            cursor = nodes[&id].next_node_id;
        }
    }
    ordered.extend(ids.iter().filter(|id| !visited.contains(*id)));
    ordered
}

/// The run-local arena of every [PersistedNode] belonging to one content spec. Loaded once per
/// run; placeholders created during the run are inserted but never appear as persisted children.
#[derive(Debug, Clone)]
pub struct PersistedTree {
    spec_id: SpecId,
    nodes: BTreeMap<NodeId, PersistedNode>,
    children: BTreeMap<Option<NodeId>, Vec<NodeId>>,
}

impl PersistedTree {
    pub fn empty(spec_id: SpecId) -> Self {
        PersistedTree {
            spec_id,
            nodes: BTreeMap::new(),
            children: BTreeMap::new(),
        }
    }

    pub fn new(spec_id: SpecId, loaded: Vec<PersistedNode>) -> Self {
        let nodes: BTreeMap<NodeId, PersistedNode> =
            loaded.into_iter().map(|node| (node.id, node)).collect();
        let mut grouped: BTreeMap<Option<NodeId>, BTreeSet<NodeId>> = BTreeMap::new();
        for node in nodes.values() {
            grouped.entry(node.parent_id).or_default().insert(node.id);
        }
        let children = grouped
            .iter()
            .map(|(parent, ids)| (*parent, order_siblings(ids, &nodes)))
            .collect();
        PersistedTree {
            spec_id,
            nodes,
            children,
        }
    }

    pub fn spec_id(&self) -> SpecId {
        self.spec_id
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, id: &NodeId) -> Option<&PersistedNode> {
        self.nodes.get(id)
    }

    pub fn get_mut(&mut self, id: &NodeId) -> Option<&mut PersistedNode> {
        self.nodes.get_mut(id)
    }

    /// Insert a freshly created node. It is not registered as anyone's persisted child.
    pub fn insert(&mut self, node: PersistedNode) {
        self.nodes.insert(node.id, node);
    }

    /// The children of `parent` (the spec root when `None`) as loaded, in sibling order.
    pub fn children_of(&self, parent: Option<NodeId>) -> &[NodeId] {
        self.children
            .get(&parent)
            .map(|ids| ids.as_slice())
            .unwrap_or_default()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &PersistedNode> {
        self.nodes.values()
    }

    pub fn nodes_mut(&mut self) -> impl Iterator<Item = &mut PersistedNode> {
        self.nodes.values_mut()
    }

    /// Check the structural invariants of the tree and return a description of every violation.
    pub fn built_in_test(&self) -> Vec<String> {
        let mut errors = Vec::new();
        let mut parents = DiGraphMap::<NodeId, ()>::new();
        for node in self.nodes.values() {
            if let Some(spec) = node.spec_id {
                if spec != self.spec_id {
                    errors.push(format!(
                        "{node} belongs to spec {spec}, expected {}",
                        self.spec_id
                    ));
                }
            }
            if let Some(next) = node.next_node_id {
                match self.nodes.get(&next) {
                    Some(next_node) if next_node.previous_node_id != Some(node.id) => {
                        errors.push(format!(
                            "{node} links next to {next}, whose previous link is {:?}",
                            next_node.previous_node_id
                        ))
                    }
                    Some(next_node) if next_node.parent_id != node.parent_id => errors.push(
                        format!("{node} links next to {next}, which has a different parent"),
                    ),
                    None => errors.push(format!("{node} links next to missing node {next}")),
                    _ => {}
                }
            }
            if let Some(prev) = node.previous_node_id {
                match self.nodes.get(&prev) {
                    Some(prev_node) if prev_node.next_node_id != Some(node.id) => {
                        errors.push(format!(
                            "{node} links previous to {prev}, whose next link is {:?}",
                            prev_node.next_node_id
                        ))
                    }
                    None => errors.push(format!("{node} links previous to missing node {prev}")),
                    _ => {}
                }
            }
            parents.add_node(node.id);
            if let Some(parent) = node.parent_id {
                if !self.nodes.contains_key(&parent) {
                    errors.push(format!("{node} has missing parent {parent}"));
                }
                parents.add_edge(node.id, parent, ());
            }
        }
        if is_cyclic_directed(&parents) {
            errors.push("parent references form a cycle".to_string());
        }
        errors
    }
}
