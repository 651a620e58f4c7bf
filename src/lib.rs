//! # cspec-sync
//!
//! Reconciles a parsed content specification against the node graph a content-management backend
//! persists for it.
//!
//! ## Overview
//!
//! A content spec is an authored, hierarchical document definition: levels (chapters, sections,
//! appendices, ...) containing topics, comments and metadata entries. The backend stores the same
//! structure as a graph of persisted nodes linked by parent, previous and next references plus
//! typed related-to edges. Given a freshly parsed spec, this crate computes and applies the
//! minimal set of writes that makes the persisted graph mirror it:
//!
//! - topic entities are created, cloned or re-tagged and saved as one batch
//! - duplicate topic references are resolved to the entity of their counterpart
//! - every parsed node is matched to the persisted node it "is", or given a fresh placeholder
//! - sibling chains are relinked in document order and stale nodes are removed
//! - authored relationships are merged into related-to edges
//!
//! Only fields whose value actually differs are written, so reconciling an unchanged spec a second
//! time sends nothing.
//!
//! ## Architecture
//!
//! - **[`content`]**: the parsed model (`ContentSpec`, `SpecNode`, `SpecTopic`)
//! - **[`properties`]**: the persisted model (`PersistedNode`, `PersistedTree`) and durable ids
//! - **[`entity`]**: remote topic, tag and content spec entities
//! - **[`provider`]**: the traits a backend implements, and the batch payloads sent to it
//! - **[`matcher`]**, **[`merge`]**: node identity and per-type field merge
//! - **[`tags`]**, **[`topic`]**, **[`pool`]**, **[`duplicates`]**: topic entity handling
//! - **[`tree`]**, **[`relationships`]**: the two reconciliation passes
//! - **[`processor`]**: the orchestrator tying the passes together with rollback
//! - **[`memory`]**: an in-process backend
//!
//! ## Quick Start
//!
//! ```rust
//! use cspec_sync::{
//!     config::ProcessingOptions,
//!     content::{ContentSpec, Level, SpecNode, SpecTopic},
//!     entity::{Tag, User},
//!     memory::MemoryBackend,
//!     processor::{ProcessingMode, Processor},
//!     properties::NodeKind,
//! };
//!
//! let backend = MemoryBackend::new();
//! backend.add_tag(Tag::new(1, "Concept"));
//! backend.add_tag(Tag::new(2, "asmith").in_category(cspec_sync::config::WRITER_CATEGORY));
//!
//! let mut topic = SpecTopic::new("N1", "Getting started");
//! topic.unique_id = Some("L-2".into());
//! topic.type_name = Some("Concept".into());
//! let mut chapter = Level::new(NodeKind::Chapter, "Introduction");
//! chapter.children.push(SpecNode::Topic(topic));
//! let mut spec = ContentSpec::new("User Guide");
//! spec.nodes.push(SpecNode::Level(chapter));
//!
//! let mut processor = Processor::new(&backend, ProcessingOptions::default());
//! processor.process(&mut spec, &User::new("asmith"), ProcessingMode::New)?;
//! assert!(spec.id.is_some());
//! # Ok::<(), cspec_sync::SyncError>(())
//! ```
//!
//! ## Cancellation
//!
//! A [`cancel::CancellationToken`] handed to the processor can be cancelled from any thread. The
//! run stops at its next checkpoint, unless it already started saving, in which case it finishes.
//! [`processor::Processor::is_shutdown`] tells a voluntary stop apart from a failure.

pub mod cancel;
pub mod config;
pub mod content;
pub mod duplicates;
pub mod entity;
pub mod error;
pub mod event;
pub mod matcher;
pub mod memory;
pub mod merge;
pub mod pool;
pub mod processor;
pub mod properties;
pub mod provider;
pub mod relationships;
pub mod tags;
#[cfg(test)]
mod tests;
pub mod topic;
pub mod tree;
pub mod validate;

pub use error::*;
