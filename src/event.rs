use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use tokio::sync::mpsc::UnboundedSender;
use uuid::Uuid;

use crate::properties::{NodeId, NodeKind, SpecId};

/// Lifecycle states of one reconciliation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessorState {
    Idle,
    Validating,
    BuildingTopics,
    SavingPool,
    SyncingDuplicates,
    MergingTree,
    MergingRelationships,
    Persisting,
    Done,
    Failed,
}

impl ProcessorState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProcessorState::Done | ProcessorState::Failed)
    }
}

impl Display for ProcessorState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Progress notifications of a reconciliation run. Every event carries the run id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SyncEvent {
    StateChanged(Uuid, ProcessorState),
    /// A placeholder node was created for the parsed node on the given line
    NodeCreated(Uuid, NodeId, NodeKind, usize),
    /// Created count, updated count
    TopicsSaved(Uuid, usize, usize),
    DuplicatesSynced(Uuid, usize),
    /// Spec, updated node count, removed node count, edge operation count
    NodesPersisted(Uuid, SpecId, usize, usize, usize),
    RolledBack(Uuid),
    ShutdownHonored(Uuid),
}

impl Display for SyncEvent {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncEvent::StateChanged(run, state) => write!(f, "[{run}] state -> {state}"),
            SyncEvent::NodeCreated(run, id, kind, line) => {
                write!(f, "[{run}] created {kind} node {id} for line {line}")
            }
            SyncEvent::TopicsSaved(run, created, updated) => {
                write!(f, "[{run}] topics saved: {created} created, {updated} updated")
            }
            SyncEvent::DuplicatesSynced(run, count) => {
                write!(f, "[{run}] {count} duplicate topics synced")
            }
            SyncEvent::NodesPersisted(run, spec, updated, removed, edges) => write!(
                f,
                "[{run}] spec {spec} persisted: {updated} updated, {removed} removed, {edges} edge changes"
            ),
            SyncEvent::RolledBack(run) => write!(f, "[{run}] rolled back"),
            SyncEvent::ShutdownHonored(run) => write!(f, "[{run}] shutdown honored"),
        }
    }
}

/// Send `event` if anyone listens. A closed channel only costs a log line.
pub(crate) fn emit(tx: Option<&UnboundedSender<SyncEvent>>, event: SyncEvent) {
    if let Some(tx) = tx {
        tracing::trace!("{event}");
        if let Err(e) = tx.send(event) {
            tracing::debug!("Event receiver dropped: {e}");
        }
    }
}
