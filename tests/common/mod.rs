//! Shared test utilities for integration tests.
//!
//! Import from integration test files as:
//! ```ignore
//! mod common;
//! ```

use cspec_sync::{
    config::WRITER_CATEGORY,
    content::{ContentSpec, Level, MetaEntry, NodeIndex, Relationship, SpecNode, SpecTopic},
    entity::{Tag, TagCollection, TopicEntity, ADDED_BY_PROPERTY, CSP_PROPERTY_ID},
    memory::MemoryBackend,
    properties::{EntityId, NodeId, NodeKind, PersistedTree, RelationshipKind},
    provider::NodeProvider,
};

/// Entity id of the topic the guide clones.
#[allow(dead_code)]
pub const SOURCE_TOPIC: EntityId = EntityId(500);

/// Initialize tracing for tests, respecting RUST_LOG env var.
///
/// Safe to call multiple times; subsequent calls are no-ops.
#[allow(dead_code)]
pub fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init()
        .ok();
}

/// A backend holding the tags the guide uses and the topic it clones.
#[allow(dead_code)]
pub fn seeded_backend() -> MemoryBackend {
    let backend = MemoryBackend::new();
    seed(&backend);
    backend
}

#[allow(dead_code)]
pub fn seed(backend: &MemoryBackend) {
    backend.add_tag(Tag::new(1, "Concept"));
    backend.add_tag(Tag::new(2, "Task"));
    backend.add_tag(Tag::new(3, "Deprecated"));
    backend.add_tag(Tag::new(4, "asmith").in_category(WRITER_CATEGORY));
    backend.add_tag(Tag::new(5, "jdoe").in_category(WRITER_CATEGORY));

    let mut source = TopicEntity {
        id: Some(SOURCE_TOPIC),
        title: "Installing".into(),
        xml: "<section><title>Installing</title></section>".into(),
        locale: "en-US".into(),
        tags: TagCollection::from_existing([
            Tag::new(2, "Task"),
            Tag::new(3, "Deprecated"),
            Tag::new(5, "jdoe").in_category(WRITER_CATEGORY),
        ]),
        ..Default::default()
    };
    source.set_property(CSP_PROPERTY_ID, "L-old");
    source.set_property(ADDED_BY_PROPERTY, "jdoe");
    backend.insert_topic(source);
}

#[allow(dead_code)]
pub fn topic(id: &str, unique_id: &str, title: &str, line: usize) -> SpecTopic {
    let mut topic = SpecTopic::new(id, title);
    topic.unique_id = Some(unique_id.into());
    topic.line_number = line;
    topic
}

/// Preorder layout:
///
/// ```text
/// 0 Product = Widget
/// 1 Chapter: Intro
/// 2   N1 Overview          [T-overview]
/// 3   C500 Installing      remove Deprecated
/// 4   X1 Overview again    refer -> T-overview
/// 5 Chapter: Usage
/// 6   N2 Configure         prerequisite -> Overview
/// ```
#[allow(dead_code)]
pub fn guide_spec() -> ContentSpec {
    let mut overview = topic("N1", "L-3", "Overview", 3);
    overview.type_name = Some("Concept".into());
    overview.target_id = Some("T-overview".into());
    overview.condition = Some("beta".into());

    let mut installing = topic("C500", "L-4", "Installing", 4);
    installing.remove_tags = vec!["Deprecated".into()];

    let mut again = topic("X1", "L-5", "Overview again", 5);
    again.relationships = vec![Relationship::to_target(
        RelationshipKind::Refer,
        NodeIndex(2),
    )];

    let mut configure = topic("N2", "L-7", "Configure", 7);
    configure.type_name = Some("Task".into());
    configure.relationships = vec![Relationship::to_topic(
        RelationshipKind::Prerequisite,
        NodeIndex(2),
    )];

    let mut intro = Level::new(NodeKind::Chapter, "Intro");
    intro.line_number = 2;
    intro.children = vec![
        SpecNode::Topic(overview),
        SpecNode::Topic(installing),
        SpecNode::Topic(again),
    ];
    let mut usage = Level::new(NodeKind::Chapter, "Usage");
    usage.line_number = 6;
    usage.children = vec![SpecNode::Topic(configure)];

    let mut spec = ContentSpec::new("Widget Guide");
    spec.locale = Some("en-US".into());
    spec.nodes = vec![
        SpecNode::MetaData(MetaEntry {
            key: "Product".into(),
            value: "Widget".into(),
            line_number: 1,
        }),
        SpecNode::Level(intro),
        SpecNode::Level(usage),
    ];
    spec
}

/// What parsing the saved form of a processed spec yields: topics refer to their entities by id
/// and every topic and level carries its node id as unique id.
#[allow(dead_code)]
pub fn reparse(spec: &ContentSpec, backend: &MemoryBackend) -> ContentSpec {
    fn walk(nodes: &mut [SpecNode], tree: &PersistedTree, parent: Option<NodeId>) {
        let ids = tree.children_of(parent).to_vec();
        assert_eq!(ids.len(), nodes.len(), "persisted children of {parent:?}");
        for (node, id) in nodes.iter_mut().zip(ids) {
            match node {
                SpecNode::Topic(topic) => {
                    let entity = topic.db_id.expect("processed topics have an entity");
                    topic.id = entity.to_string();
                    topic.unique_id = Some(id.to_string());
                    topic.type_name = None;
                    topic.remove_tags.clear();
                }
                SpecNode::Level(level) => {
                    level.unique_id = Some(id.to_string());
                    walk(&mut level.children, tree, Some(id));
                }
                _ => {}
            }
        }
    }
    let spec_id = spec.id.expect("processed specs have an id");
    let tree = PersistedTree::new(spec_id, backend.get_spec_nodes(spec_id).unwrap());
    let mut reparsed = spec.clone();
    walk(&mut reparsed.nodes, &tree, None);
    reparsed
}
