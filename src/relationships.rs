//! Second reconciliation pass: once every parsed node owns a durable id, merge each topic's
//! authored relationships into its persisted related-to edges.
use tracing::{debug, warn};

use crate::{
    config::DanglingPolicy,
    content::{ContentSpec, RelationshipVia, SpecNode},
    error::SyncError,
    matcher::relationship_matches,
    properties::PersistedTree,
    provider::EdgeOperation,
    tree::IdentityMap,
};

fn describe(node: &SpecNode) -> String {
    match node {
        SpecNode::Topic(topic) => topic
            .target_id
            .clone()
            .unwrap_or_else(|| format!("[{}] {}", topic.id, topic.title)),
        SpecNode::Level(level) => level
            .target_id
            .clone()
            .unwrap_or_else(|| level.title.clone()),
        SpecNode::Comment(_) => "comment".to_string(),
        SpecNode::MetaData(meta) => meta.key.clone(),
    }
}

/// Compute the edge operations that make every mapped topic's related-to edges match its parsed
/// relationships. Each persisted edge is claimed by at most one relationship; unclaimed edges are
/// removed.
pub fn merge_relationships(
    spec: &ContentSpec,
    identity: &IdentityMap,
    tree: &PersistedTree,
    policy: DanglingPolicy,
) -> Result<Vec<EdgeOperation>, SyncError> {
    let preorder = spec.preorder();
    let mut operations = Vec::new();

    for (idx, node_id) in identity.iter() {
        let Some(SpecNode::Topic(topic)) = preorder.get(idx.0) else {
            continue;
        };
        let node = tree.get(&node_id).ok_or_else(|| {
            SyncError::processing(format!("{topic}: mapped node {node_id} is not in the tree"))
        })?;
        let mut claimed = vec![false; node.related_to.len()];

        for relationship in topic.relationships.iter() {
            if relationship.via == RelationshipVia::Process {
                continue;
            }
            let target = preorder.get(relationship.target.0).ok_or_else(|| {
                SyncError::processing(format!(
                    "{topic}: relationship target {} does not exist",
                    relationship.target
                ))
            })?;

            let mapped = identity.get(relationship.target);

            // An edge into a node this run replaced is stale even when it matches by content
            let hit = node.related_to.iter().zip(claimed.iter()).position(|(edge, taken)| {
                !*taken
                    && Some(edge.related.id) == mapped
                    && relationship_matches(relationship, target, edge)
            });
            if let Some(i) = hit {
                claimed[i] = true;
                continue;
            }

            match mapped {
                Some(to) => {
                    debug!("{topic}: new {} edge to node {to}", relationship.kind);
                    operations.push(EdgeOperation::Add {
                        from: node_id,
                        to,
                        kind: relationship.kind,
                    });
                }
                None => match policy {
                    DanglingPolicy::Fail => {
                        return Err(SyncError::DanglingRelationship {
                            line: topic.line_number,
                            target: describe(target),
                        })
                    }
                    DanglingPolicy::Skip => warn!(
                        "{topic}: skipping relationship to '{}', which was never merged",
                        describe(target)
                    ),
                },
            }
        }

        for (edge, claimed) in node.related_to.iter().zip(claimed) {
            if !claimed {
                debug!("{topic}: removing stale {} edge {}", edge.kind, edge.id);
                operations.push(EdgeOperation::Remove {
                    from: node_id,
                    edge: edge.id,
                });
            }
        }
    }
    Ok(operations)
}
