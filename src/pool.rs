//! [TopicPool] stages topic entity creates and updates so they reach the backend as one batch,
//! and can be compensated for when the backend has no transactions of its own.
use tracing::{debug, info, warn};

use crate::{
    content::SpecTopic,
    entity::TopicEntity,
    error::SyncError,
    properties::EntityId,
    provider::TopicProvider,
};

#[derive(Debug, Default)]
pub struct TopicPool {
    new_topics: Vec<TopicEntity>,
    updated_topics: Vec<TopicEntity>,
    /// Created entities, ids assigned, in staging order
    created: Vec<TopicEntity>,
    updated: Vec<TopicEntity>,
    initialised: bool,
}

impl TopicPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_new(&mut self, topic: TopicEntity) {
        self.new_topics.push(topic);
    }

    pub fn add_updated(&mut self, topic: TopicEntity) {
        self.updated_topics.push(topic);
    }

    pub fn is_empty(&self) -> bool {
        self.new_topics.is_empty() && self.updated_topics.is_empty()
    }

    pub fn staged_len(&self) -> usize {
        self.new_topics.len() + self.updated_topics.len()
    }

    pub fn is_initialised(&self) -> bool {
        self.initialised
    }

    pub fn updated_len(&self) -> usize {
        self.updated.len()
    }

    /// Ids of the entities this pool caused to be created.
    pub fn created_ids(&self) -> Vec<EntityId> {
        self.created.iter().filter_map(|topic| topic.id).collect()
    }

    fn clear(&mut self) {
        self.new_topics.clear();
        self.updated_topics.clear();
        self.created.clear();
        self.updated.clear();
        self.initialised = false;
    }

    /// Send every staged topic to the backend. On failure nothing the pool created survives (as far
    /// as a best-effort delete can ensure), the pool is emptied and stays uninitialised.
    pub fn save_pool<P: TopicProvider + ?Sized>(&mut self, provider: &P) -> Result<(), SyncError> {
        if self.initialised {
            return Ok(());
        }
        if !self.new_topics.is_empty() {
            match provider.create_topics(&self.new_topics) {
                Ok(created) => self.created = created,
                Err(e) => {
                    self.clear();
                    return Err(e);
                }
            }
        }
        if !self.updated_topics.is_empty() {
            match provider.update_topics(&self.updated_topics) {
                Ok(updated) => self.updated = updated,
                Err(e) => {
                    if let Err(cleanup) = self.rollback_pool(provider) {
                        warn!("Failed to remove topics created before the pool failed: {cleanup}");
                    }
                    self.clear();
                    return Err(e);
                }
            }
        }
        info!(
            "Topic pool saved: {} created, {} updated",
            self.created.len(),
            self.updated.len()
        );
        self.initialised = true;
        Ok(())
    }

    /// Copy the database id assigned to `topic`'s entity back onto it, and its revision when the
    /// topic is pinned to one. Topics the pool did not create are left untouched.
    pub fn initialise_from_pool(&self, topic: &mut SpecTopic) {
        if !self.initialised {
            return;
        }
        let Some(unique_id) = topic.unique_id.as_deref() else {
            return;
        };
        let Some(entity) = self
            .created
            .iter()
            .find(|entity| entity.unique_id_property() == Some(unique_id))
        else {
            return;
        };
        debug!("{topic} initialised from {entity}");
        topic.db_id = entity.id;
        if topic.revision.is_some() {
            topic.revision = entity.revision;
        }
    }

    /// Delete every entity the pool created. Used only against backends without transactions.
    pub fn rollback_pool<P: TopicProvider + ?Sized>(&mut self, provider: &P) -> Result<(), SyncError> {
        let ids = self.created_ids();
        self.clear();
        if ids.is_empty() {
            return Ok(());
        }
        info!("Rolling back {} pooled topics", ids.len());
        provider.delete_topics(&ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::CSP_PROPERTY_ID;
    use parking_lot::Mutex;
    use test_log::test;

    #[derive(Default)]
    struct Topics {
        next_id: Mutex<i64>,
        fail_updates: bool,
        deleted: Mutex<Vec<EntityId>>,
    }

    impl TopicProvider for Topics {
        fn get_topic(&self, id: EntityId, _: Option<i64>) -> Result<TopicEntity, SyncError> {
            Err(SyncError::NotFound(format!("topic {id}")))
        }

        fn create_topics(&self, topics: &[TopicEntity]) -> Result<Vec<TopicEntity>, SyncError> {
            let mut next = self.next_id.lock();
            Ok(topics
                .iter()
                .cloned()
                .map(|mut topic| {
                    *next += 1;
                    topic.id = Some(EntityId(100 + *next));
                    topic.revision = Some(1);
                    topic
                })
                .collect())
        }

        fn update_topics(&self, topics: &[TopicEntity]) -> Result<Vec<TopicEntity>, SyncError> {
            if self.fail_updates {
                return Err(SyncError::backend("update rejected"));
            }
            Ok(topics.to_vec())
        }

        fn delete_topics(&self, ids: &[EntityId]) -> Result<(), SyncError> {
            self.deleted.lock().extend_from_slice(ids);
            Ok(())
        }
    }

    fn staged(unique_id: &str) -> TopicEntity {
        let mut topic = TopicEntity {
            title: unique_id.to_string(),
            ..Default::default()
        };
        topic.set_property(CSP_PROPERTY_ID, unique_id);
        topic
    }

    #[test]
    fn test_save_and_initialise() {
        let provider = Topics::default();
        let mut pool = TopicPool::new();
        pool.add_new(staged("L-1"));
        pool.add_new(staged("L-2"));
        pool.save_pool(&provider).unwrap();
        assert!(pool.is_initialised());

        let mut topic = SpecTopic::new("N2", "Second");
        topic.unique_id = Some("L-2".into());
        pool.initialise_from_pool(&mut topic);
        assert_eq!(topic.db_id, Some(EntityId(102)));
        assert_eq!(topic.revision, None);

        let mut pinned = SpecTopic::new("N1", "First");
        pinned.unique_id = Some("L-1".into());
        pinned.revision = Some(0);
        pool.initialise_from_pool(&mut pinned);
        assert_eq!(pinned.revision, Some(1));
    }

    #[test]
    fn test_failed_save_empties_pool_and_removes_created() {
        let provider = Topics {
            fail_updates: true,
            ..Default::default()
        };
        let mut pool = TopicPool::new();
        pool.add_new(staged("L-1"));
        pool.add_updated(staged("L-9"));

        assert!(pool.save_pool(&provider).is_err());
        assert!(!pool.is_initialised());
        assert!(pool.is_empty());
        assert_eq!(*provider.deleted.lock(), vec![EntityId(101)]);
    }

    #[test]
    fn test_rollback_deletes_created_topics() {
        let provider = Topics::default();
        let mut pool = TopicPool::new();
        pool.add_new(staged("L-1"));
        pool.save_pool(&provider).unwrap();

        pool.rollback_pool(&provider).unwrap();
        assert!(!pool.is_initialised());
        assert_eq!(*provider.deleted.lock(), vec![EntityId(101)]);
    }
}
