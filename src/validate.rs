//! Validation run before any reconciliation. Both phases must pass before the first backend write.
use std::collections::{BTreeMap, BTreeSet};
use tracing::error;

use crate::{
    content::{ContentSpec, RelationshipVia, SpecNode, TopicProvenance},
    entity::User,
    error::SyncError,
};

pub trait Validator {
    /// Checks that only need the parsed spec.
    fn pre_validate(&self, spec: &ContentSpec) -> Result<(), SyncError>;

    /// Checks that depend on who requested the run.
    fn post_validate(&self, spec: &ContentSpec, user: &User) -> Result<(), SyncError>;
}

fn report(problems: Vec<String>) -> Result<(), SyncError> {
    if problems.is_empty() {
        return Ok(());
    }
    for problem in problems.iter() {
        error!("{problem}");
    }
    Err(SyncError::Validation(problems.join("; ")))
}

/// Structural checks the reconciler relies on: well-formed topic ids, unique parser ids,
/// resolvable duplicates and relationship targets, and credited writers.
#[derive(Debug, Clone, Copy, Default)]
pub struct StructuralValidator;

impl Validator for StructuralValidator {
    fn pre_validate(&self, spec: &ContentSpec) -> Result<(), SyncError> {
        let preorder = spec.preorder();
        let mut problems = Vec::new();
        let mut unique_ids: BTreeMap<&str, usize> = BTreeMap::new();
        let topic_ids: BTreeSet<&str> =
            spec.topics().into_iter().map(|t| t.id.as_str()).collect();

        for node in preorder.iter() {
            if let Some(unique_id) = node.unique_id() {
                if let Some(first) = unique_ids.insert(unique_id, node.line_number()) {
                    problems.push(format!(
                        "Line {}: unique id '{unique_id}' was already used on line {first}",
                        node.line_number()
                    ));
                }
            }
            let topic = match node {
                SpecNode::Level(level) => {
                    if !level.kind.is_level() {
                        problems.push(format!(
                            "Line {}: '{}' is not a level kind",
                            level.line_number, level.kind
                        ));
                    }
                    continue;
                }
                SpecNode::Topic(topic) => topic,
                _ => continue,
            };
            let provenance = match topic.provenance() {
                Ok(provenance) => provenance,
                Err(e) => {
                    problems.push(e.to_string());
                    continue;
                }
            };
            if provenance.is_new_or_cloned() && topic.unique_id.is_none() {
                problems.push(format!("{topic}: new and cloned topics need a unique id"));
            }
            if provenance == TopicProvenance::New && topic.type_name.is_none() {
                problems.push(format!("{topic}: new topics must name a type"));
            }
            let counterpart = match provenance {
                TopicProvenance::Duplicate => Some(format!("N{}", &topic.id[1..])),
                TopicProvenance::ClonedDuplicate => Some(topic.id[1..].to_string()),
                _ => None,
            };
            if let Some(counterpart) = counterpart {
                if !topic_ids.contains(&counterpart.as_str()) {
                    problems.push(format!(
                        "{topic}: duplicate of '{counterpart}', which is not in this spec"
                    ));
                }
            }
            for relationship in topic.relationships.iter() {
                let Some(target) = preorder.get(relationship.target.0) else {
                    problems.push(format!(
                        "{topic}: relationship target {} does not exist",
                        relationship.target
                    ));
                    continue;
                };
                match relationship.via {
                    RelationshipVia::Topic if !matches!(target, SpecNode::Topic(_)) => problems
                        .push(format!(
                            "{topic}: relationship target {} is not a topic",
                            relationship.target
                        )),
                    RelationshipVia::Target if target.target_id().is_none() => {
                        problems.push(format!(
                            "{topic}: relationship target {} has no target id",
                            relationship.target
                        ))
                    }
                    _ => {}
                }
            }
        }
        report(problems)
    }

    fn post_validate(&self, spec: &ContentSpec, user: &User) -> Result<(), SyncError> {
        let mut problems = Vec::new();
        if spec.id.is_none() && user.username.trim().is_empty() {
            problems.push("a new content spec needs a requesting user".to_string());
        }
        let spec_writer = spec
            .assigned_writer
            .as_deref()
            .or(Some(user.username.as_str()).filter(|name| !name.trim().is_empty()));
        for topic in spec.topics() {
            let needs_writer = topic
                .provenance()
                .map(|p| p.is_new_or_cloned())
                .unwrap_or(false);
            if needs_writer && topic.effective_writer(spec_writer).is_none() {
                problems.push(format!("{topic}: no assigned writer"));
            }
        }
        report(problems)
    }
}
