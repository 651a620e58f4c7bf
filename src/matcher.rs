//! Identity predicates deciding whether a parsed node "is" a persisted node. A node re-parsed from
//! a persisted spec carries the durable id as its numeric unique id and is matched by identity;
//! freshly authored nodes fall back to the best semantic key available for their type.
//!
//! None of these functions mutate either side.
use crate::{
    content::{is_numeric_id, Level, Relationship, RelationshipVia, SpecNode, SpecTopic},
    properties::{NodeKind, PersistedNode, RelatedEdge},
};

pub fn topic_matches(topic: &SpecTopic, node: &PersistedNode) -> bool {
    if node.kind != NodeKind::Topic {
        return false;
    }
    if is_numeric_id(topic.unique_id.as_deref()) {
        return topic.unique_id.as_deref() == Some(node.id.to_string().as_str());
    }
    if let Some(revision) = topic.revision {
        if node.entity_revision != Some(revision) {
            return false;
        }
    }
    topic.db_id.is_some() && topic.db_id == node.entity_id
}

pub fn level_matches(level: &Level, node: &PersistedNode) -> bool {
    if !node.kind.is_level() {
        return false;
    }
    if let Some(unique_id) = &level.unique_id {
        return *unique_id == node.id.to_string();
    }
    if level.target_id.is_some() && level.target_id == node.target_id {
        return true;
    }
    node.title.as_deref() == Some(level.title.as_str())
}

/// Comments have no stronger identity than their kind; the first unclaimed one wins.
pub fn comment_matches(node: &PersistedNode) -> bool {
    node.kind == NodeKind::Comment
}

pub fn metadata_matches(node: &PersistedNode) -> bool {
    node.kind == NodeKind::MetaData
}

pub fn node_matches(parsed: &SpecNode, node: &PersistedNode) -> bool {
    match parsed {
        SpecNode::Topic(topic) => topic_matches(topic, node),
        SpecNode::Level(level) => level_matches(level, node),
        SpecNode::Comment(_) => comment_matches(node),
        SpecNode::MetaData(_) => metadata_matches(node),
    }
}

/// Whether an existing related-to edge represents `relationship`, whose target resolves to the
/// parsed node `target`.
///
/// Topic relationships only match edges pointing at topics. Target relationships may point at any
/// node carrying a target id, levels included.
pub fn relationship_matches(
    relationship: &Relationship,
    target: &SpecNode,
    edge: &RelatedEdge,
) -> bool {
    if edge.kind != relationship.kind {
        return false;
    }
    let related = &edge.related;
    match relationship.via {
        RelationshipVia::Topic if related.kind != NodeKind::Topic => return false,
        RelationshipVia::Target if !(related.kind == NodeKind::Topic || related.kind.is_level()) => {
            return false
        }
        RelationshipVia::Process => return false,
        _ => {}
    }
    if is_numeric_id(target.unique_id()) {
        return target.unique_id() == Some(related.id.to_string().as_str());
    }
    match (relationship.via, target) {
        (RelationshipVia::Topic, SpecNode::Topic(topic)) => {
            topic.db_id.is_some() && topic.db_id == related.entity_id
        }
        (RelationshipVia::Target, _) => {
            target.target_id().is_some() && target.target_id() == related.target_id.as_deref()
        }
        _ => false,
    }
}
