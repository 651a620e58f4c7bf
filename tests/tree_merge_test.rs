use cspec_sync::{
    config::DanglingPolicy,
    content::{
        Comment, ContentSpec, Level, MetaEntry, NodeIndex, Relationship, SpecNode, SpecTopic,
    },
    memory::MemoryBackend,
    properties::{
        EntityId, EnumSet, NodeField, NodeId, NodeKind, PersistedNode, PersistedTree,
        RelationshipKind, SpecId,
    },
    provider::{EdgeOperation, NodeProvider},
    relationships::merge_relationships,
    tree::TreeMerger,
};
use test_log::test;

const SPEC: SpecId = SpecId(9);

fn existing(entity: i64, title: &str) -> SpecNode {
    SpecNode::Topic(SpecTopic {
        db_id: Some(EntityId(entity)),
        ..SpecTopic::new(entity.to_string(), title)
    })
}

fn chapter(title: &str, children: Vec<SpecNode>) -> SpecNode {
    let mut level = Level::new(NodeKind::Chapter, title);
    level.children = children;
    SpecNode::Level(level)
}

fn spec_of(nodes: Vec<SpecNode>) -> ContentSpec {
    let mut spec = ContentSpec::new("Merge");
    spec.id = Some(SPEC);
    spec.nodes = nodes;
    spec
}

/// Run one full merge against `backend` and persist it. Returns the update, removal and edge
/// operation counts.
fn sync(backend: &MemoryBackend, spec: &ContentSpec) -> (usize, usize, usize) {
    let mut tree = PersistedTree::new(SPEC, backend.get_spec_nodes(SPEC).unwrap());
    let merge = TreeMerger::new(backend, &mut tree).merge(spec).unwrap();
    let edges = merge_relationships(spec, &merge.identity, &tree, DanglingPolicy::Fail).unwrap();
    let batch = merge.changes.to_batch(&tree, edges);
    let counts = (
        batch.updates().count(),
        batch.removals().count(),
        batch.edges.len(),
    );
    if !batch.is_empty() {
        backend.update_nodes(&batch).unwrap();
    }
    counts
}

fn stored(backend: &MemoryBackend) -> PersistedTree {
    PersistedTree::new(SPEC, backend.get_spec_nodes(SPEC).unwrap())
}

#[test]
fn test_second_merge_of_unchanged_spec_is_empty() {
    let backend = MemoryBackend::new();
    let mut target = SpecTopic::new("20", "Target");
    target.db_id = Some(EntityId(20));
    target.target_id = Some("T-20".into());
    let mut source = SpecTopic::new("10", "Source");
    source.db_id = Some(EntityId(10));
    source.relationships = vec![Relationship::to_target(
        RelationshipKind::Refer,
        NodeIndex(2),
    )];
    let spec = spec_of(vec![chapter(
        "Intro",
        vec![SpecNode::Topic(source), SpecNode::Topic(target)],
    )]);

    assert_eq!(sync(&backend, &spec), (3, 0, 1));
    assert_eq!(sync(&backend, &spec), (0, 0, 0));
    assert!(stored(&backend).built_in_test().is_empty());
}

#[test]
fn test_numeric_unique_id_wins_over_content() {
    let backend = MemoryBackend::new();
    let a = backend.insert_node(PersistedNode {
        kind: NodeKind::Topic,
        title: Some("Same".into()),
        entity_id: Some(EntityId(10)),
        spec_id: Some(SPEC),
        ..Default::default()
    });
    let b = backend.insert_node(PersistedNode {
        kind: NodeKind::Topic,
        title: Some("Something else".into()),
        entity_id: Some(EntityId(30)),
        previous_node_id: Some(a),
        spec_id: Some(SPEC),
        ..Default::default()
    });

    // Points at b by node id while carrying a's entity
    let mut topic = SpecTopic::new("10", "Same");
    topic.db_id = Some(EntityId(10));
    topic.unique_id = Some(b.to_string());
    let spec = spec_of(vec![SpecNode::Topic(topic)]);

    let (updates, removals, _) = sync(&backend, &spec);
    assert_eq!((updates, removals), (1, 1));
    let node = backend.node(b).unwrap();
    assert_eq!(node.entity_id, Some(EntityId(10)));
    assert_eq!(node.title.as_deref(), Some("Same"));
    assert!(backend.node(a).is_none());
}

#[test]
fn test_title_change_updates_only_title() {
    let backend = MemoryBackend::new();
    let spec = spec_of(vec![existing(10, "Before")]);
    sync(&backend, &spec);

    let renamed = spec_of(vec![existing(10, "After")]);
    let mut tree = stored(&backend);
    let merge = TreeMerger::new(&backend, &mut tree).merge(&renamed).unwrap();
    let batch = merge.changes.to_batch(&tree, Vec::new());
    let updates: Vec<_> = batch.updates().collect();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].1, EnumSet::only(NodeField::Title));
    assert_eq!(updates[0].0.entity_id, Some(EntityId(10)));
    assert_eq!(updates[0].0.entity_revision, None);
}

#[test]
fn test_any_persisted_order_becomes_document_order() {
    let backend = MemoryBackend::new();
    let parent = backend.insert_node(PersistedNode {
        kind: NodeKind::Chapter,
        title: Some("Intro".into()),
        spec_id: Some(SPEC),
        ..Default::default()
    });
    // Stored as B -> C -> A
    let ids: Vec<NodeId> = [("B", 20), ("C", 30), ("A", 10)]
        .into_iter()
        .map(|(title, entity)| {
            backend.insert_node(PersistedNode {
                kind: NodeKind::Topic,
                title: Some(title.into()),
                entity_id: Some(EntityId(entity)),
                parent_id: Some(parent),
                spec_id: Some(SPEC),
                ..Default::default()
            })
        })
        .collect();
    let (b, c, a) = (ids[0], ids[1], ids[2]);

    let spec = spec_of(vec![chapter(
        "Intro",
        vec![existing(10, "A"), existing(20, "B"), existing(30, "C")],
    )]);
    let (_, removals, _) = sync(&backend, &spec);
    assert_eq!(removals, 0);

    let tree = stored(&backend);
    assert_eq!(tree.children_of(Some(parent)), &[a, b, c]);
    let link = |id: NodeId| {
        let node = tree.get(&id).unwrap();
        (node.previous_node_id, node.next_node_id)
    };
    assert_eq!(link(a), (None, Some(b)));
    assert_eq!(link(b), (Some(a), Some(c)));
    assert_eq!(link(c), (Some(b), None));
}

#[test]
fn test_dropped_level_is_removed_with_its_children() {
    let backend = MemoryBackend::new();
    let spec = spec_of(vec![
        chapter("Keep", vec![existing(10, "A")]),
        chapter("Drop", vec![existing(20, "B"), existing(30, "C")]),
    ]);
    sync(&backend, &spec);
    assert_eq!(backend.get_spec_nodes(SPEC).unwrap().len(), 5);

    let trimmed = spec_of(vec![chapter("Keep", vec![existing(10, "A")])]);
    let mut tree = stored(&backend);
    let merge = TreeMerger::new(&backend, &mut tree).merge(&trimmed).unwrap();
    assert_eq!(merge.changes.removals().len(), 1);
    let batch = merge.changes.to_batch(&tree, Vec::new());
    backend.update_nodes(&batch).unwrap();
    assert_eq!(backend.get_spec_nodes(SPEC).unwrap().len(), 2);
}

#[test]
fn test_relationship_kind_change_replaces_edge() {
    let backend = MemoryBackend::new();
    let mut source = SpecTopic::new("10", "Source");
    source.db_id = Some(EntityId(10));
    source.relationships = vec![Relationship::to_topic(RelationshipKind::Refer, NodeIndex(1))];
    let mut spec = spec_of(vec![SpecNode::Topic(source), existing(20, "Target")]);
    assert_eq!(sync(&backend, &spec).2, 1);

    if let SpecNode::Topic(source) = &mut spec.nodes[0] {
        source.relationships[0].kind = RelationshipKind::Prerequisite;
    }
    let mut tree = stored(&backend);
    let merge = TreeMerger::new(&backend, &mut tree).merge(&spec).unwrap();
    let edges = merge_relationships(&spec, &merge.identity, &tree, DanglingPolicy::Fail).unwrap();
    assert_eq!(edges.len(), 2);
    assert!(edges
        .iter()
        .any(|op| matches!(op, EdgeOperation::Remove { .. })));
    assert!(edges.iter().any(|op| matches!(
        op,
        EdgeOperation::Add {
            kind: RelationshipKind::Prerequisite,
            ..
        }
    )));
    backend
        .update_nodes(&merge.changes.to_batch(&tree, edges))
        .unwrap();

    let source_id = merge.identity.get(NodeIndex(0)).unwrap();
    let related = backend.node(source_id).unwrap().related_to;
    assert_eq!(related.len(), 1);
    assert_eq!(related[0].kind, RelationshipKind::Prerequisite);
}

#[test]
fn test_identity_map_covers_comments_but_not_metadata() {
    let backend = MemoryBackend::new();
    let spec = spec_of(vec![
        SpecNode::MetaData(MetaEntry {
            key: "Product".into(),
            value: "Widget".into(),
            line_number: 1,
        }),
        SpecNode::Comment(Comment {
            text: "# review later".into(),
            line_number: 2,
        }),
        chapter("Intro", vec![existing(10, "A")]),
    ]);
    let mut tree = stored(&backend);
    let merge = TreeMerger::new(&backend, &mut tree).merge(&spec).unwrap();

    assert_eq!(merge.identity.get(NodeIndex(0)), None);
    let comment = merge.identity.get(NodeIndex(1)).unwrap();
    assert_eq!(tree.get(&comment).unwrap().kind, NodeKind::Comment);
    assert!(merge.identity.get(NodeIndex(2)).is_some());
    assert!(merge.identity.get(NodeIndex(3)).is_some());
    assert_eq!(merge.identity.len(), 3);
    // The metadata entry is still persisted
    assert_eq!(backend.get_spec_nodes(SPEC).unwrap().len(), 4);
}
