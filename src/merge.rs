//! Per-type field merge of a parsed node onto a persisted node (or a fresh placeholder). Only
//! fields whose value differs are written, so a node's dirty set is the minimal update payload.
use tracing::debug;

use crate::{
    content::{Comment, Level, MetaEntry, SpecNode, SpecTopic},
    properties::PersistedNode,
};

/// Merge a topic's scalar fields. Returns true when anything was written.
pub fn merge_topic(topic: &SpecTopic, node: &mut PersistedNode) -> bool {
    let mut changed = node.update_title(Some(topic.title.clone()));
    if !topic.target_id_internal {
        changed |= node.update_target_id(topic.target_id.clone());
    }
    changed |= node.update_condition(topic.condition.clone());
    changed |= node.update_entity_id(topic.db_id);
    changed |= node.update_entity_revision(topic.revision);
    changed
}

pub fn merge_level(level: &Level, node: &mut PersistedNode) -> bool {
    let mut changed = node.update_title(Some(level.title.clone()));
    if !level.target_id_internal {
        changed |= node.update_target_id(level.target_id.clone());
    }
    changed |= node.update_condition(level.condition.clone());
    changed
}

pub fn merge_comment(comment: &Comment, node: &mut PersistedNode) -> bool {
    node.update_additional_text(Some(comment.text.clone()))
}

pub fn merge_metadata(meta: &MetaEntry, node: &mut PersistedNode) -> bool {
    let mut changed = node.update_title(Some(meta.key.clone()));
    changed |= node.update_additional_text(Some(meta.value.clone()));
    changed
}

pub fn merge_fields(parsed: &SpecNode, node: &mut PersistedNode) -> bool {
    let changed = match parsed {
        SpecNode::Topic(topic) => merge_topic(topic, node),
        SpecNode::Level(level) => merge_level(level, node),
        SpecNode::Comment(comment) => merge_comment(comment, node),
        SpecNode::MetaData(meta) => merge_metadata(meta, node),
    };
    if changed {
        debug!(
            "line {}: {node} fields changed: {:?}",
            parsed.line_number(),
            node.dirty_fields()
        );
    }
    changed
}
