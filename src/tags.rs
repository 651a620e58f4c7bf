//! Tag reconciliation for topic entities. The policy depends on where the topic came from:
//!
//! - new topics receive every requested tag;
//! - cloned topics gain missing tags, drop explicitly removed ones and always lose the writer tag
//!   inherited from their source;
//! - existing topics that follow the latest revision only ever gain tags, so tags set by other
//!   tooling survive;
//! - topics pinned to a revision are frozen and never reconciled.
use tracing::debug;

use crate::{
    content::{SpecTopic, TopicProvenance},
    entity::{SourceUrl, Tag, TopicEntity},
    error::SyncError,
    properties::CategoryId,
    provider::TagProvider,
};

pub struct TagReconciler<'a, P: TagProvider + ?Sized> {
    provider: &'a P,
    writer_category: CategoryId,
}

impl<'a, P: TagProvider + ?Sized> TagReconciler<'a, P> {
    pub fn new(provider: &'a P, writer_category: CategoryId) -> Self {
        TagReconciler {
            provider,
            writer_category,
        }
    }

    /// Resolve a tag name to exactly one tag entity.
    pub fn resolve(&self, name: &str, line: usize) -> Result<Tag, SyncError> {
        let mut tags = self.provider.get_tags_by_name(name)?;
        match tags.len() {
            1 => Ok(tags.remove(0)),
            0 => Err(SyncError::lookup(format!(
                "Line {line}: tag '{name}' does not exist"
            ))),
            n => Err(SyncError::lookup(format!(
                "Line {line}: tag name '{name}' is ambiguous ({n} tags match)"
            ))),
        }
    }

    fn resolve_all(&self, names: &[String], line: usize) -> Result<Vec<Tag>, SyncError> {
        names.iter().map(|name| self.resolve(name, line)).collect()
    }

    /// Apply the topic's tag changes to `entity`. Returns true when the entity changed.
    pub fn reconcile_tags(
        &self,
        topic: &SpecTopic,
        entity: &mut TopicEntity,
    ) -> Result<bool, SyncError> {
        let changed = match topic.provenance()? {
            TopicProvenance::New => {
                let add = self.resolve_all(&topic.tags, topic.line_number)?;
                let requested = !add.is_empty();
                for tag in add {
                    entity.tags.add_new(tag);
                }
                requested
            }
            TopicProvenance::Cloned(_) => self.reconcile_cloned(topic, entity)?,
            TopicProvenance::Existing(_) if topic.revision.is_none() => {
                let mut changed = false;
                for tag in self.resolve_all(&topic.tags, topic.line_number)? {
                    changed |= entity.tags.add_new(tag);
                }
                changed
            }
            _ => false,
        };
        if changed {
            debug!("{topic}: tags changed on {entity}");
        }
        Ok(changed)
    }

    fn reconcile_cloned(
        &self,
        topic: &SpecTopic,
        entity: &mut TopicEntity,
    ) -> Result<bool, SyncError> {
        let mut changed = false;
        for tag in self.resolve_all(&topic.tags, topic.line_number)? {
            changed |= entity.tags.add_new(tag);
        }
        for tag in self.resolve_all(&topic.remove_tags, topic.line_number)? {
            changed |= entity.tags.remove(tag.id);
        }
        // The source's writer is replaced by this topic's writer.
        let writer_tags = entity
            .tags
            .active()
            .filter(|tag| tag.contained_in_category(self.writer_category))
            .map(|tag| tag.id)
            .collect::<Vec<_>>();
        for id in writer_tags {
            changed |= entity.tags.remove(id);
        }
        Ok(changed)
    }

    /// Add the tag naming `writer` to a new or cloned topic entity.
    pub fn assign_writer(
        &self,
        topic: &SpecTopic,
        writer: &str,
        entity: &mut TopicEntity,
    ) -> Result<(), SyncError> {
        let tag = self.resolve(writer, topic.line_number).map_err(|_| {
            SyncError::lookup(format!(
                "Line {}: assigned writer '{writer}' must match exactly one tag",
                topic.line_number
            ))
        })?;
        entity.tags.add_new(tag);
        Ok(())
    }
}

/// Add one source URL per parsed URL not already present on the entity.
pub fn add_source_urls(topic: &SpecTopic, entity: &mut TopicEntity) -> bool {
    let mut changed = false;
    for url in topic.source_urls.iter() {
        if entity.source_urls.iter().any(|existing| existing.url == *url) {
            continue;
        }
        entity.source_urls.push(SourceUrl {
            url: url.clone(),
            title: None,
        });
        changed = true;
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{entity::TagCollection, properties::TagId};
    use test_log::test;

    struct Tags(Vec<Tag>);

    impl TagProvider for Tags {
        fn get_tags_by_name(&self, name: &str) -> Result<Vec<Tag>, SyncError> {
            Ok(self.0.iter().filter(|t| t.name == name).cloned().collect())
        }
    }

    const WRITERS: CategoryId = CategoryId(12);

    fn tags() -> Tags {
        Tags(vec![
            Tag::new(1, "Concept"),
            Tag::new(2, "Deprecated"),
            Tag::new(3, "Beta"),
            Tag::new(4, "jdoe").in_category(WRITERS),
            Tag::new(5, "asmith").in_category(WRITERS),
            Tag::new(6, "Twin"),
            Tag::new(7, "Twin"),
        ])
    }

    #[test]
    fn test_new_topic_adds_every_tag() {
        let provider = tags();
        let reconciler = TagReconciler::new(&provider, WRITERS);
        let mut topic = SpecTopic::new("N1", "Fresh");
        topic.tags = vec!["Concept".into(), "Beta".into()];
        let mut entity = TopicEntity::default();

        assert!(reconciler.reconcile_tags(&topic, &mut entity).unwrap());
        assert_eq!(entity.tags.added().count(), 2);
    }

    #[test]
    fn test_cloned_topic_removes_requested_and_writer_tags() {
        let provider = tags();
        let reconciler = TagReconciler::new(&provider, WRITERS);
        let mut topic = SpecTopic::new("C10", "Clone");
        topic.remove_tags = vec!["Deprecated".into()];
        let mut entity = TopicEntity {
            tags: TagCollection::from_existing([
                Tag::new(2, "Deprecated"),
                Tag::new(3, "Beta"),
                Tag::new(4, "jdoe").in_category(WRITERS),
            ]),
            ..Default::default()
        };

        assert!(reconciler.reconcile_tags(&topic, &mut entity).unwrap());
        assert!(entity.tags.is_removed("Deprecated"));
        assert!(entity.tags.is_removed("jdoe"));
        assert!(entity.tags.contains(TagId(3)));
    }

    #[test]
    fn test_existing_topic_is_additive_only() {
        let provider = tags();
        let reconciler = TagReconciler::new(&provider, WRITERS);
        let mut topic = SpecTopic::new("55", "Existing");
        topic.tags = vec!["Concept".into()];
        topic.remove_tags = vec!["Beta".into()];
        let mut entity = TopicEntity {
            tags: TagCollection::from_existing([Tag::new(3, "Beta")]),
            ..Default::default()
        };

        assert!(reconciler.reconcile_tags(&topic, &mut entity).unwrap());
        assert!(entity.tags.contains(TagId(3)));
        assert!(entity.tags.contains(TagId(1)));

        // Nothing new to add
        assert!(!reconciler.reconcile_tags(&topic, &mut entity).unwrap());
    }

    #[test]
    fn test_pinned_topic_is_frozen() {
        let provider = tags();
        let reconciler = TagReconciler::new(&provider, WRITERS);
        let mut topic = SpecTopic::new("55", "Pinned");
        topic.revision = Some(9);
        topic.tags = vec!["Concept".into()];
        let mut entity = TopicEntity::default();

        assert!(!reconciler.reconcile_tags(&topic, &mut entity).unwrap());
        assert_eq!(entity.tags.active().count(), 0);
    }

    #[test]
    fn test_unresolvable_or_ambiguous_tags_fail() {
        let provider = tags();
        let reconciler = TagReconciler::new(&provider, WRITERS);
        let mut topic = SpecTopic::new("N1", "Fresh");
        topic.tags = vec!["Missing".into()];
        let err = reconciler
            .reconcile_tags(&topic, &mut TopicEntity::default())
            .unwrap_err();
        assert!(matches!(err, SyncError::Lookup(_)));

        let err = reconciler
            .assign_writer(&topic, "Twin", &mut TopicEntity::default())
            .unwrap_err();
        assert!(matches!(err, SyncError::Lookup(_)));
    }

    #[test]
    fn test_writer_and_source_urls() {
        let provider = tags();
        let reconciler = TagReconciler::new(&provider, WRITERS);
        let mut topic = SpecTopic::new("N1", "Fresh");
        topic.source_urls = vec!["https://example.com/a".into()];
        let mut entity = TopicEntity::default();

        reconciler.assign_writer(&topic, "asmith", &mut entity).unwrap();
        assert!(entity.tags.contains_name("asmith"));
        assert!(add_source_urls(&topic, &mut entity));
        assert!(!add_source_urls(&topic, &mut entity));
        assert_eq!(entity.source_urls.len(), 1);
    }
}
