//! Shared fixtures for unit tests.
use crate::{
    config::WRITER_CATEGORY,
    content::{ContentSpec, Level, SpecNode, SpecTopic},
    entity::Tag,
    memory::MemoryBackend,
    properties::NodeKind,
};

/// Initialize logging for tests
#[allow(dead_code)]
pub fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init()
        .ok();
}

/// Seed the type and writer tags the fixtures refer to.
pub fn concept_tags(backend: &MemoryBackend) {
    backend.add_tag(Tag::new(1, "Concept"));
    backend.add_tag(Tag::new(2, "Deprecated"));
    backend.add_tag(Tag::new(3, "asmith").in_category(WRITER_CATEGORY));
}

/// One chapter holding one new Concept topic.
pub fn new_topic_spec() -> ContentSpec {
    let mut topic = SpecTopic::new("N1", "Fresh");
    topic.unique_id = Some("L-3".into());
    topic.type_name = Some("Concept".into());
    topic.target_id = Some("T-fresh".into());
    topic.condition = Some("beta".into());
    topic.line_number = 3;
    let mut chapter = Level::new(NodeKind::Chapter, "Intro");
    chapter.line_number = 2;
    chapter.children = vec![SpecNode::Topic(topic)];
    let mut spec = ContentSpec::new("Guide");
    spec.nodes = vec![SpecNode::Level(chapter)];
    spec
}
