//! The [Processor] drives one reconciliation run end to end:
//!
//! ```text
//! Idle -> Validating -> BuildingTopics -> SavingPool -> SyncingDuplicates -> MergingTree
//!      -> MergingRelationships -> Persisting -> Done
//! ```
//!
//! with `Failed` reachable from every non-terminal state. The cancellation token is polled on
//! every transition. From the pool save through the final node batch the run is inside a
//! [CriticalSection](crate::cancel::CriticalSection), so a shutdown request arriving there no
//! longer stops the run.
//!
//! On failure a transactional backend is asked to roll back. Otherwise the compensations
//! registered along the way run in reverse: pooled topics are deleted and a content spec created
//! by this run is removed.
use tokio::sync::mpsc::UnboundedSender;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    cancel::CancellationToken,
    config::ProcessingOptions,
    content::{ContentSpec, TopicProvenance},
    duplicates::sync_duplicates,
    entity::{ContentSpecEntity, User, ADDED_BY_PROPERTY},
    error::SyncError,
    event::{emit, ProcessorState, SyncEvent},
    pool::TopicPool,
    properties::{PersistedTree, SpecId},
    provider::Backend,
    relationships::merge_relationships,
    topic::{BuiltTopic, TopicBuilder},
    tree::TreeMerger,
    validate::{StructuralValidator, Validator},
};

/// Whether the run may create the content spec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingMode {
    /// A spec without an id is created.
    New,
    /// The spec must already exist.
    Edited,
}

/// Undo actions for a backend without transactions, run newest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Compensation {
    RollbackPool,
    DeleteContentSpec(SpecId),
}

pub struct Processor<'a, B: Backend + ?Sized> {
    backend: &'a B,
    options: ProcessingOptions,
    validator: Box<dyn Validator + Send + Sync>,
    cancel: CancellationToken,
    events: Option<UnboundedSender<SyncEvent>>,
    state: ProcessorState,
    run: Uuid,
    writes_started: bool,
}

impl<'a, B: Backend + ?Sized> Processor<'a, B> {
    pub fn new(backend: &'a B, options: ProcessingOptions) -> Self {
        Processor {
            backend,
            options,
            validator: Box::new(StructuralValidator),
            cancel: CancellationToken::new(),
            events: None,
            state: ProcessorState::Idle,
            run: Uuid::nil(),
            writes_started: false,
        }
    }

    pub fn with_validator<V: Validator + Send + Sync + 'static>(mut self, validator: V) -> Self {
        self.validator = Box::new(validator);
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_events(mut self, tx: UnboundedSender<SyncEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn state(&self) -> ProcessorState {
        self.state
    }

    /// Id of the current or most recent run.
    pub fn run_id(&self) -> Uuid {
        self.run
    }

    /// True when the last run stopped because a shutdown was requested.
    pub fn is_shutdown(&self) -> bool {
        self.cancel.was_honored()
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn set_state(&mut self, state: ProcessorState) {
        if self.state != state {
            info!("[{}] {} -> {}", self.run, self.state, state);
            self.state = state;
            emit(self.events.as_ref(), SyncEvent::StateChanged(self.run, state));
        }
    }

    /// Move to `state`, unless a shutdown request is pending outside a critical section.
    fn enter(&mut self, state: ProcessorState) -> Result<(), SyncError> {
        self.cancel.checkpoint()?;
        self.set_state(state);
        Ok(())
    }

    /// Reconcile `spec` against the backend on behalf of `user`. On success `spec.id` holds the
    /// content spec's id.
    pub fn process(
        &mut self,
        spec: &mut ContentSpec,
        user: &User,
        mode: ProcessingMode,
    ) -> Result<(), SyncError> {
        self.run = Uuid::new_v4();
        self.state = ProcessorState::Idle;
        self.writes_started = false;
        let mut pool = TopicPool::new();
        let mut compensations = Vec::new();

        match self.run_phases(spec, user, mode, &mut pool, &mut compensations) {
            Ok(saved) => {
                if saved.is_some() {
                    spec.id = saved;
                }
                self.set_state(ProcessorState::Done);
                Ok(())
            }
            Err(e) => {
                self.fail(&e, &mut pool, compensations);
                Err(e)
            }
        }
    }

    fn run_phases(
        &mut self,
        spec: &mut ContentSpec,
        user: &User,
        mode: ProcessingMode,
        pool: &mut TopicPool,
        compensations: &mut Vec<Compensation>,
    ) -> Result<Option<SpecId>, SyncError> {
        if let Some(locale) = &self.options.override_locale {
            spec.locale = Some(locale.clone());
        }

        self.enter(ProcessorState::Validating)?;
        self.validator.pre_validate(spec)?;
        self.validator.post_validate(spec, user)?;
        if spec.assigned_writer.is_none() && !user.username.trim().is_empty() {
            spec.assigned_writer = Some(user.username.clone());
        }
        if self.options.validate_only {
            info!("[{}] '{}' is valid, stopping before any writes", self.run, spec.title);
            return Ok(None);
        }

        self.enter(ProcessorState::BuildingTopics)?;
        self.build_topics(spec, pool)?;

        self.enter(ProcessorState::SavingPool)?;
        let _critical = self.cancel.critical_section();
        self.writes_started = true;
        compensations.push(Compensation::RollbackPool);
        pool.save_pool(self.backend)?;
        emit(
            self.events.as_ref(),
            SyncEvent::TopicsSaved(self.run, pool.created_ids().len(), pool.updated_len()),
        );

        self.enter(ProcessorState::SyncingDuplicates)?;
        for topic in spec.topics_mut() {
            pool.initialise_from_pool(topic);
            if let Ok(TopicProvenance::Existing(id)) = topic.provenance() {
                topic.db_id.get_or_insert(id);
            }
        }
        let synced = sync_duplicates(&mut spec.topics_mut())?;
        emit(
            self.events.as_ref(),
            SyncEvent::DuplicatesSynced(self.run, synced),
        );

        self.enter(ProcessorState::MergingTree)?;
        let spec_id = self.save_spec(spec, user, mode, compensations)?;
        let mut tree = PersistedTree::new(spec_id, self.backend.get_spec_nodes(spec_id)?);
        let merge = TreeMerger::new(self.backend, &mut tree)
            .with_events(self.events.as_ref(), self.run)
            .merge(spec)?;

        self.enter(ProcessorState::MergingRelationships)?;
        let edges = merge_relationships(
            spec,
            &merge.identity,
            &tree,
            self.options.dangling_relationships,
        )?;

        self.enter(ProcessorState::Persisting)?;
        let batch = merge.changes.to_batch(&tree, edges);
        let (updated, removed, edge_count) = (
            batch.updates().count(),
            batch.removals().count(),
            batch.edges.len(),
        );
        if batch.is_empty() {
            info!("[{}] spec {spec_id} already up to date", self.run);
        } else {
            self.backend.update_nodes(&batch)?;
        }
        self.backend.commit()?;
        emit(
            self.events.as_ref(),
            SyncEvent::NodesPersisted(self.run, spec_id, updated, removed, edge_count),
        );
        Ok(Some(spec_id))
    }

    fn build_topics(&self, spec: &ContentSpec, pool: &mut TopicPool) -> Result<(), SyncError> {
        let builder = TopicBuilder::new(self.backend, &self.options);
        let spec_writer = spec.assigned_writer.as_deref();
        for topic in spec.topics() {
            self.cancel.checkpoint()?;
            match builder.build(topic, spec_writer, &self.cancel)? {
                Some(BuiltTopic::New(entity)) => pool.add_new(entity),
                Some(BuiltTopic::Updated(entity)) => pool.add_updated(entity),
                None => {}
            }
        }
        info!("[{}] {} topic entities staged", self.run, pool.staged_len());
        Ok(())
    }

    /// Create or update the content spec entity, returning its id.
    fn save_spec(
        &self,
        spec: &ContentSpec,
        user: &User,
        mode: ProcessingMode,
        compensations: &mut Vec<Compensation>,
    ) -> Result<SpecId, SyncError> {
        match (spec.id, mode) {
            (None, ProcessingMode::Edited) => Err(SyncError::processing(format!(
                "'{}': unable to find the existing content spec",
                spec.title
            ))),
            (None, ProcessingMode::New) => {
                let mut entity = ContentSpecEntity {
                    id: None,
                    title: spec.title.clone(),
                    locale: spec.locale.clone(),
                    ..Default::default()
                };
                entity
                    .properties
                    .insert(ADDED_BY_PROPERTY, user.username.clone());
                let created = self.backend.create_content_spec(&entity)?;
                let id = created.id.ok_or_else(|| {
                    SyncError::backend("created content spec came back without an id")
                })?;
                compensations.push(Compensation::DeleteContentSpec(id));
                info!("[{}] created content spec {id}", self.run);
                Ok(id)
            }
            (Some(id), _) => {
                let mut entity = self.backend.get_content_spec(id)?;
                let mut changed = false;
                if entity.title != spec.title {
                    entity.title = spec.title.clone();
                    changed = true;
                }
                if spec.locale.is_some() && entity.locale != spec.locale {
                    entity.locale = spec.locale.clone();
                    changed = true;
                }
                if changed {
                    self.backend.update_content_spec(&entity)?;
                }
                Ok(id)
            }
        }
    }

    fn fail(&mut self, cause: &SyncError, pool: &mut TopicPool, compensations: Vec<Compensation>) {
        if cause.is_cancellation() {
            warn!("[{}] shutdown requested, stopping in {}", self.run, self.state);
        } else {
            error!("[{}] failed in {}: {cause}", self.run, self.state);
        }

        if self.writes_started {
            if self.backend.is_rollback_supported() {
                if let Err(e) = self.backend.rollback() {
                    error!("[{}] backend rollback failed: {e}", self.run);
                }
            } else {
                for compensation in compensations.into_iter().rev() {
                    let result = match compensation {
                        Compensation::RollbackPool => pool.rollback_pool(self.backend),
                        Compensation::DeleteContentSpec(id) => {
                            self.backend.delete_content_spec(id)
                        }
                    };
                    if let Err(e) = result {
                        warn!("[{}] {compensation:?} failed: {e}", self.run);
                    }
                }
            }
            emit(self.events.as_ref(), SyncEvent::RolledBack(self.run));
        }
        if cause.is_cancellation() {
            emit(self.events.as_ref(), SyncEvent::ShutdownHonored(self.run));
        }
        self.set_state(ProcessorState::Failed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        content::{SpecNode, SpecTopic},
        memory::{Call, FailPoint, MemoryBackend},
        provider::NodeProvider,
        tests::helpers::{concept_tags, new_topic_spec},
    };
    use test_log::test;
    use tokio::sync::mpsc::unbounded_channel;

    #[test]
    fn test_new_spec_is_created_and_persisted() {
        let backend = MemoryBackend::new();
        concept_tags(&backend);
        let mut spec = new_topic_spec();
        let (tx, mut rx) = unbounded_channel();
        let mut processor =
            Processor::new(&backend, ProcessingOptions::default()).with_events(tx);

        processor
            .process(&mut spec, &User::new("asmith"), ProcessingMode::New)
            .unwrap();
        assert_eq!(processor.state(), ProcessorState::Done);
        let spec_id = spec.id.unwrap();
        assert_eq!(
            backend.spec(spec_id).unwrap().added_by(),
            Some("asmith")
        );
        assert_eq!(backend.get_spec_nodes(spec_id).unwrap().len(), 2);

        let mut states = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let SyncEvent::StateChanged(_, state) = event {
                states.push(state);
            }
        }
        assert_eq!(states.first(), Some(&ProcessorState::Validating));
        assert_eq!(states.last(), Some(&ProcessorState::Done));
    }

    #[test]
    fn test_edited_mode_requires_an_existing_spec() {
        let backend = MemoryBackend::new();
        concept_tags(&backend);
        let mut spec = new_topic_spec();
        let mut processor = Processor::new(&backend, ProcessingOptions::default());

        let err = processor
            .process(&mut spec, &User::new("asmith"), ProcessingMode::Edited)
            .unwrap_err();
        assert!(matches!(err, SyncError::Processing(_)));
        assert_eq!(processor.state(), ProcessorState::Failed);
        // The topic created by the pool was compensated for
        assert_eq!(backend.topic_count(), 0);
    }

    #[test]
    fn test_validation_failure_writes_nothing() {
        let backend = MemoryBackend::new();
        let mut spec = ContentSpec::new("Broken");
        spec.nodes = vec![SpecNode::Topic(SpecTopic::new("Q1", "Bad id"))];
        let mut processor = Processor::new(&backend, ProcessingOptions::default());

        let err = processor
            .process(&mut spec, &User::new("asmith"), ProcessingMode::New)
            .unwrap_err();
        assert!(err.is_validation());
        assert!(backend.calls().is_empty());
    }

    #[test]
    fn test_node_failure_on_transactional_backend_rolls_back() {
        let backend = MemoryBackend::transactional();
        concept_tags(&backend);
        backend.fail_on(FailPoint::UpdateNodes);
        let mut spec = new_topic_spec();
        let mut processor = Processor::new(&backend, ProcessingOptions::default());

        assert!(processor
            .process(&mut spec, &User::new("asmith"), ProcessingMode::New)
            .is_err());
        assert_eq!(backend.calls().last(), Some(&Call::Rollback));
        assert_eq!(backend.topic_count(), 0);
        assert_eq!(backend.spec_count(), 0);
        assert_eq!(backend.node_count(), 0);
        assert_eq!(spec.id, None);
    }
}
