//! Builds the topic entity a spec topic needs written: a fresh entity for new topics, a copy of
//! the source for cloned topics, and the current entity for existing topics with tag changes.
use tracing::debug;

use crate::{
    cancel::CancellationToken,
    config::ProcessingOptions,
    content::{SpecTopic, TopicProvenance},
    entity::{TagCollection, TopicEntity, ADDED_BY_PROPERTY, CSP_PROPERTY_ID, DEFAULT_DOCTYPE},
    error::SyncError,
    properties::EntityId,
    provider::{TagProvider, TopicProvider},
    tags::{add_source_urls, TagReconciler},
};

/// What the pool should do with a built entity.
#[derive(Debug, Clone, PartialEq)]
pub enum BuiltTopic {
    New(TopicEntity),
    Updated(TopicEntity),
}

pub struct TopicBuilder<'a, B: TopicProvider + TagProvider + ?Sized> {
    backend: &'a B,
    options: &'a ProcessingOptions,
    tags: TagReconciler<'a, B>,
}

impl<'a, B: TopicProvider + TagProvider + ?Sized> TopicBuilder<'a, B> {
    pub fn new(backend: &'a B, options: &'a ProcessingOptions) -> Self {
        TopicBuilder {
            backend,
            options,
            tags: TagReconciler::new(backend, options.writer_category),
        }
    }

    /// Whether `topic` needs an entity built at all. Duplicates reuse their counterpart's entity
    /// and pinned or tag-less existing topics are frozen.
    pub fn needs_entity(topic: &SpecTopic) -> Result<bool, SyncError> {
        Ok(match topic.provenance()? {
            TopicProvenance::New | TopicProvenance::Cloned(_) => true,
            TopicProvenance::Existing(_) => topic.revision.is_none() && !topic.tags.is_empty(),
            TopicProvenance::Duplicate | TopicProvenance::ClonedDuplicate => false,
        })
    }

    /// Build the entity for `topic`, or `None` when nothing about it needs writing.
    pub fn build(
        &self,
        topic: &SpecTopic,
        spec_writer: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<Option<BuiltTopic>, SyncError> {
        if !Self::needs_entity(topic)? {
            return Ok(None);
        }
        let provenance = topic.provenance()?;
        let writer = topic.effective_writer(spec_writer);
        let mut entity = match provenance {
            TopicProvenance::New => self.new_entity(topic, writer)?,
            TopicProvenance::Cloned(source) => {
                let original = self.backend.get_topic(source, None)?;
                self.clone_entity(topic, &original, writer)
            }
            TopicProvenance::Existing(id) => self.existing_entity(topic, id)?,
            TopicProvenance::Duplicate | TopicProvenance::ClonedDuplicate => return Ok(None),
        };
        cancel.checkpoint()?;

        let mut changed = self.tags.reconcile_tags(topic, &mut entity)?;
        cancel.checkpoint()?;

        if provenance.is_new_or_cloned() {
            let writer = writer.ok_or_else(|| {
                SyncError::lookup(format!("{topic}: no assigned writer to credit"))
            })?;
            self.tags.assign_writer(topic, writer, &mut entity)?;
            add_source_urls(topic, &mut entity);
            changed = true;
        }

        if !changed {
            debug!("{topic}: entity unchanged");
            return Ok(None);
        }
        Ok(Some(if provenance.is_new_or_cloned() {
            BuiltTopic::New(entity)
        } else {
            BuiltTopic::Updated(entity)
        }))
    }

    fn new_entity(&self, topic: &SpecTopic, writer: Option<&str>) -> Result<TopicEntity, SyncError> {
        let type_name = topic.type_name.as_deref().ok_or_else(|| {
            SyncError::lookup(format!("{topic}: a new topic must name its type"))
        })?;
        let type_tag = self.tags.resolve(type_name, topic.line_number)?;
        let mut entity = TopicEntity {
            title: topic.title.clone(),
            description: topic.description.clone(),
            xml: String::new(),
            doctype: DEFAULT_DOCTYPE.to_string(),
            locale: self.options.default_locale.clone(),
            ..Default::default()
        };
        entity.tags.add_new(type_tag);
        if let Some(unique_id) = &topic.unique_id {
            entity.set_property(CSP_PROPERTY_ID, unique_id.clone());
        }
        if let Some(writer) = writer {
            entity.set_property(ADDED_BY_PROPERTY, writer);
        }
        Ok(entity)
    }

    fn clone_entity(
        &self,
        topic: &SpecTopic,
        original: &TopicEntity,
        writer: Option<&str>,
    ) -> TopicEntity {
        let mut tags = TagCollection::default();
        for tag in original.tags.active() {
            tags.add_new(tag.clone());
        }
        let mut entity = TopicEntity {
            id: None,
            revision: None,
            title: original.title.clone(),
            description: original.description.clone(),
            xml: original.xml.clone(),
            doctype: original.doctype.clone(),
            locale: original.locale.clone(),
            tags,
            source_urls: original.source_urls.clone(),
            properties: original
                .properties
                .iter()
                .filter(|(id, _)| **id != CSP_PROPERTY_ID && **id != ADDED_BY_PROPERTY)
                .map(|(id, value)| (*id, value.clone()))
                .collect(),
        };
        if let Some(unique_id) = &topic.unique_id {
            entity.set_property(CSP_PROPERTY_ID, unique_id.clone());
        }
        if let Some(writer) = writer {
            entity.set_property(ADDED_BY_PROPERTY, writer);
        }
        entity
    }

    fn existing_entity(
        &self,
        topic: &SpecTopic,
        id: EntityId,
    ) -> Result<TopicEntity, SyncError> {
        let mut entity = self.backend.get_topic(id, None)?;
        if let Some(unique_id) = &topic.unique_id {
            entity.set_property(CSP_PROPERTY_ID, unique_id.clone());
        }
        Ok(entity)
    }
}
