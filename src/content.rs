//! The parsed side of a reconciliation run: a [ContentSpec] tree of levels, topics, comments and
//! metadata entries as produced by the spec parser.
//!
//! Parsed nodes are immutable input for a run, with one exception: once the topic pool has saved
//! new and cloned topics, their database id (and pinned revision) are written back onto the
//! matching [SpecTopic] so the tree and relationship passes can reference them.
//!
//! Nodes are identified within a run by their [NodeIndex], the position of the node in a preorder
//! traversal of the spec. Relationship targets refer to other nodes through the same index.
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

use crate::{
    error::SyncError,
    properties::{EntityId, NodeKind, RelationshipKind, SpecId},
};

static NEW_TOPIC_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"^N\d*$").expect("valid regex"));
static CLONED_TOPIC_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"^C(\d+)$").expect("valid regex"));
static DUPLICATE_TOPIC_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^X(\d+)$").expect("valid regex"));
static CLONED_DUPLICATE_TOPIC_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^XC(\d+)$").expect("valid regex"));
static EXISTING_TOPIC_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d+$").expect("valid regex"));

/// Returns true when a parser-assigned unique id refers directly to a persisted node id.
pub fn is_numeric_id(unique_id: Option<&str>) -> bool {
    unique_id
        .and_then(|id| id.chars().next())
        .map(|c| c.is_ascii_digit())
        .unwrap_or(false)
}

/// Position of a node in the preorder traversal of its [ContentSpec].
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct NodeIndex(pub usize);

impl Display for NodeIndex {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// How a spec topic relates to the backend's topic entities, derived from its document id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TopicProvenance {
    /// `N` or `N<n>`: a topic entity is created this run.
    New,
    /// `C<n>`: a new topic entity is cloned from entity `<n>`.
    Cloned(EntityId),
    /// `X<n>`: reuses the entity created for `N<n>`.
    Duplicate,
    /// `XC<n>`: reuses the entity cloned for `C<n>`.
    ClonedDuplicate,
    /// `<n>`: references existing entity `<n>`.
    Existing(EntityId),
}

impl TopicProvenance {
    pub fn is_new_or_cloned(&self) -> bool {
        matches!(self, TopicProvenance::New | TopicProvenance::Cloned(_))
    }

    pub fn is_existing(&self) -> bool {
        matches!(self, TopicProvenance::Existing(_))
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(
            self,
            TopicProvenance::Duplicate | TopicProvenance::ClonedDuplicate
        )
    }
}

/// How a relationship reaches its target.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelationshipVia {
    /// Direct topic-to-topic reference by topic id.
    #[default]
    Topic,
    /// Symbolic reference through the target's target id.
    Target,
    /// Process bookkeeping. Never persisted.
    Process,
}

/// An outgoing relationship authored on a topic.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relationship {
    pub kind: RelationshipKind,
    pub target: NodeIndex,
    #[serde(default)]
    pub via: RelationshipVia,
}

impl Relationship {
    pub fn to_topic(kind: RelationshipKind, target: NodeIndex) -> Self {
        Relationship {
            kind,
            target,
            via: RelationshipVia::Topic,
        }
    }

    pub fn to_target(kind: RelationshipKind, target: NodeIndex) -> Self {
        Relationship {
            kind,
            target,
            via: RelationshipVia::Target,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SpecTopic {
    /// Parser-assigned unique id. Numeric when the topic was re-parsed from a persisted spec.
    #[serde(default)]
    pub unique_id: Option<String>,
    /// Document id: `N`, `N<n>`, `C<n>`, `X<n>`, `XC<n>` or a database id.
    pub id: String,
    #[serde(default)]
    pub db_id: Option<EntityId>,
    /// `None` follows the latest revision.
    #[serde(default)]
    pub revision: Option<i64>,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub type_name: Option<String>,
    #[serde(default)]
    pub assigned_writer: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub remove_tags: Vec<String>,
    #[serde(default)]
    pub source_urls: Vec<String>,
    #[serde(default)]
    pub relationships: Vec<Relationship>,
    #[serde(default)]
    pub target_id: Option<String>,
    /// The target id was generated by the parser rather than authored.
    #[serde(default)]
    pub target_id_internal: bool,
    #[serde(default)]
    pub condition: Option<String>,
    #[serde(default)]
    pub line_number: usize,
}

impl SpecTopic {
    pub fn new<S: Into<String>, T: Into<String>>(id: S, title: T) -> Self {
        SpecTopic {
            id: id.into(),
            title: title.into(),
            ..Default::default()
        }
    }

    pub fn provenance(&self) -> Result<TopicProvenance, SyncError> {
        let id = self.id.as_str();
        if NEW_TOPIC_ID.is_match(id) {
            Ok(TopicProvenance::New)
        } else if let Some(caps) = CLONED_TOPIC_ID.captures(id) {
            Ok(TopicProvenance::Cloned(EntityId::try_from(&caps[1])?))
        } else if DUPLICATE_TOPIC_ID.is_match(id) {
            Ok(TopicProvenance::Duplicate)
        } else if CLONED_DUPLICATE_TOPIC_ID.is_match(id) {
            Ok(TopicProvenance::ClonedDuplicate)
        } else if EXISTING_TOPIC_ID.is_match(id) {
            Ok(TopicProvenance::Existing(EntityId::try_from(id)?))
        } else {
            Err(SyncError::processing(format!(
                "Line {}: '{}' is not a valid topic id",
                self.line_number, self.id
            )))
        }
    }

    /// The writer to credit for this topic: its own, or the spec-level default.
    pub fn effective_writer<'a>(&'a self, spec_writer: Option<&'a str>) -> Option<&'a str> {
        self.assigned_writer.as_deref().or(spec_writer)
    }
}

impl Display for SpecTopic {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {} (line {})", self.id, self.title, self.line_number)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Level {
    pub kind: NodeKind,
    #[serde(default)]
    pub unique_id: Option<String>,
    pub title: String,
    #[serde(default)]
    pub target_id: Option<String>,
    #[serde(default)]
    pub target_id_internal: bool,
    #[serde(default)]
    pub condition: Option<String>,
    #[serde(default)]
    pub children: Vec<SpecNode>,
    #[serde(default)]
    pub line_number: usize,
}

impl Level {
    pub fn new<S: Into<String>>(kind: NodeKind, title: S) -> Self {
        Level {
            kind,
            unique_id: None,
            title: title.into(),
            target_id: None,
            target_id_internal: false,
            condition: None,
            children: Vec::new(),
            line_number: 0,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub text: String,
    #[serde(default)]
    pub line_number: usize,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaEntry {
    pub key: String,
    pub value: String,
    #[serde(default)]
    pub line_number: usize,
}

/// One element of the parsed tree.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum SpecNode {
    Level(Level),
    Topic(SpecTopic),
    Comment(Comment),
    MetaData(MetaEntry),
}

impl SpecNode {
    pub fn kind(&self) -> NodeKind {
        match self {
            SpecNode::Level(level) => level.kind,
            SpecNode::Topic(_) => NodeKind::Topic,
            SpecNode::Comment(_) => NodeKind::Comment,
            SpecNode::MetaData(_) => NodeKind::MetaData,
        }
    }

    pub fn line_number(&self) -> usize {
        match self {
            SpecNode::Level(level) => level.line_number,
            SpecNode::Topic(topic) => topic.line_number,
            SpecNode::Comment(comment) => comment.line_number,
            SpecNode::MetaData(meta) => meta.line_number,
        }
    }

    pub fn unique_id(&self) -> Option<&str> {
        match self {
            SpecNode::Level(level) => level.unique_id.as_deref(),
            SpecNode::Topic(topic) => topic.unique_id.as_deref(),
            _ => None,
        }
    }

    pub fn target_id(&self) -> Option<&str> {
        match self {
            SpecNode::Level(level) => level.target_id.as_deref(),
            SpecNode::Topic(topic) => topic.target_id.as_deref(),
            _ => None,
        }
    }

    pub fn children(&self) -> &[SpecNode] {
        match self {
            SpecNode::Level(level) => &level.children,
            _ => &[],
        }
    }

    /// Number of nodes in this subtree, self included.
    pub fn subtree_len(&self) -> usize {
        1 + self.children().iter().map(SpecNode::subtree_len).sum::<usize>()
    }
}

/// Pair each node of a sibling list with its preorder index, given the index of the first one.
pub fn indexed_children(first: NodeIndex, nodes: &[SpecNode]) -> Vec<(NodeIndex, &SpecNode)> {
    let mut next = first.0;
    nodes
        .iter()
        .map(|node| {
            let idx = NodeIndex(next);
            next += node.subtree_len();
            (idx, node)
        })
        .collect()
}

/// A parsed content spec. The root node list holds the spec's metadata entries followed by its
/// top-level levels, topics and comments.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ContentSpec {
    #[serde(default)]
    pub id: Option<SpecId>,
    pub title: String,
    #[serde(default)]
    pub locale: Option<String>,
    /// Default writer for topics that do not name one.
    #[serde(default)]
    pub assigned_writer: Option<String>,
    #[serde(default)]
    pub nodes: Vec<SpecNode>,
}

impl ContentSpec {
    pub fn new<S: Into<String>>(title: S) -> Self {
        ContentSpec {
            title: title.into(),
            ..Default::default()
        }
    }

    /// The root nodes paired with their preorder indices.
    pub fn indexed_roots(&self) -> Vec<(NodeIndex, &SpecNode)> {
        indexed_children(NodeIndex(0), &self.nodes)
    }

    /// Every node in preorder; a node's position in the result is its [NodeIndex].
    pub fn preorder(&self) -> Vec<&SpecNode> {
        fn walk<'a>(nodes: &'a [SpecNode], out: &mut Vec<&'a SpecNode>) {
            for node in nodes {
                out.push(node);
                walk(node.children(), out);
            }
        }
        let mut out = Vec::new();
        walk(&self.nodes, &mut out);
        out
    }

    pub fn topics(&self) -> Vec<&SpecTopic> {
        self.preorder()
            .into_iter()
            .filter_map(|node| match node {
                SpecNode::Topic(topic) => Some(topic),
                _ => None,
            })
            .collect()
    }

    pub fn topics_mut(&mut self) -> Vec<&mut SpecTopic> {
        fn walk<'a>(nodes: &'a mut [SpecNode], out: &mut Vec<&'a mut SpecTopic>) {
            for node in nodes.iter_mut() {
                match node {
                    SpecNode::Topic(topic) => out.push(topic),
                    SpecNode::Level(level) => walk(&mut level.children, out),
                    _ => {}
                }
            }
        }
        let mut out = Vec::new();
        walk(&mut self.nodes, &mut out);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    fn sample() -> ContentSpec {
        let mut chapter = Level::new(NodeKind::Chapter, "Intro");
        chapter
            .children
            .push(SpecNode::Topic(SpecTopic::new("N1", "First")));
        let mut section = Level::new(NodeKind::Section, "Details");
        section
            .children
            .push(SpecNode::Topic(SpecTopic::new("12", "Second")));
        chapter.children.push(SpecNode::Level(section));
        let mut spec = ContentSpec::new("Guide");
        spec.nodes.push(SpecNode::MetaData(MetaEntry {
            key: "Product".into(),
            value: "Widget".into(),
            line_number: 1,
        }));
        spec.nodes.push(SpecNode::Level(chapter));
        spec.nodes.push(SpecNode::Comment(Comment {
            text: "# trailing".into(),
            line_number: 9,
        }));
        spec
    }

    #[test]
    fn test_indexed_children_match_preorder() {
        let spec = sample();
        let preorder = spec.preorder();
        assert_eq!(preorder.len(), 6);

        let roots = spec.indexed_roots();
        assert_eq!(
            roots.iter().map(|(idx, _)| idx.0).collect::<Vec<_>>(),
            vec![0, 1, 5]
        );
        let (chapter_idx, chapter) = roots[1];
        let children = indexed_children(NodeIndex(chapter_idx.0 + 1), chapter.children());
        assert_eq!(
            children.iter().map(|(idx, _)| idx.0).collect::<Vec<_>>(),
            vec![2, 3]
        );
        for (idx, node) in children {
            assert_eq!(preorder.get(idx.0), Some(&node));
        }
    }

    #[test]
    fn test_topics_mut_visits_nested_topics() {
        let mut spec = sample();
        for topic in spec.topics_mut() {
            topic.condition = Some("beta".into());
        }
        assert!(spec
            .topics()
            .iter()
            .all(|t| t.condition.as_deref() == Some("beta")));
        assert_eq!(spec.topics().len(), 2);
    }

    #[test]
    fn test_provenance_from_document_id() {
        let cases = [
            ("N", TopicProvenance::New),
            ("N5", TopicProvenance::New),
            ("C12", TopicProvenance::Cloned(EntityId(12))),
            ("X5", TopicProvenance::Duplicate),
            ("XC12", TopicProvenance::ClonedDuplicate),
            ("340", TopicProvenance::Existing(EntityId(340))),
        ];
        for (id, expected) in cases {
            assert_eq!(SpecTopic::new(id, "t").provenance().unwrap(), expected, "{id}");
        }
        assert!(SpecTopic::new("Q7", "t").provenance().is_err());
    }

    #[test]
    fn test_numeric_unique_id() {
        assert!(is_numeric_id(Some("42")));
        assert!(is_numeric_id(Some("4-a")));
        assert!(!is_numeric_id(Some("L-3")));
        assert!(!is_numeric_id(None));
    }
}
