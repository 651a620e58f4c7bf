//! Remote entities the reconciler reads and writes besides tree nodes: topic entities with their
//! tag collections and properties, content spec entities and users.
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, BTreeSet},
    fmt::{Display, Formatter},
};

use crate::properties::{CategoryId, EntityId, SpecId, TagId};

pub type PropertyId = u32;

/// Property holding the parser unique id a topic entity was created or last synced for.
pub const CSP_PROPERTY_ID: PropertyId = 15;
/// Property naming the user that added an entity.
pub const ADDED_BY_PROPERTY: PropertyId = 14;

pub const DEFAULT_DOCTYPE: &str = "Docbook 4.5";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub id: TagId,
    pub name: String,
    #[serde(default)]
    pub categories: BTreeSet<CategoryId>,
}

impl Tag {
    pub fn new<S: Into<String>>(id: i64, name: S) -> Self {
        Tag {
            id: TagId(id),
            name: name.into(),
            categories: BTreeSet::new(),
        }
    }

    pub fn in_category(mut self, category: CategoryId) -> Self {
        self.categories.insert(category);
        self
    }

    pub fn contained_in_category(&self, category: CategoryId) -> bool {
        self.categories.contains(&category)
    }
}

impl Display for Tag {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.name, self.id)
    }
}

/// Pending state of a collection item relative to the stored entity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ItemState {
    Unchanged,
    Added,
    Removed,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagItem {
    pub tag: Tag,
    pub state: ItemState,
}

/// The tags of a topic entity together with the pending adds and removes of this run.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagCollection {
    items: Vec<TagItem>,
}

impl TagCollection {
    pub fn from_existing(tags: impl IntoIterator<Item = Tag>) -> Self {
        TagCollection {
            items: tags
                .into_iter()
                .map(|tag| TagItem {
                    tag,
                    state: ItemState::Unchanged,
                })
                .collect(),
        }
    }

    /// Stage `tag` for addition. Returns false when it is already present; re-adding a tag that
    /// was staged for removal cancels the removal.
    pub fn add_new(&mut self, tag: Tag) -> bool {
        match self.items.iter_mut().find(|item| item.tag.id == tag.id) {
            Some(item) if item.state == ItemState::Removed => {
                item.state = ItemState::Added;
                true
            }
            Some(_) => false,
            None => {
                self.items.push(TagItem {
                    tag,
                    state: ItemState::Added,
                });
                true
            }
        }
    }

    /// Stage the tag with `id` for removal. Returns false when it is not currently present.
    pub fn remove(&mut self, id: TagId) -> bool {
        match self
            .items
            .iter_mut()
            .find(|item| item.tag.id == id && item.state != ItemState::Removed)
        {
            Some(item) => {
                item.state = ItemState::Removed;
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, id: TagId) -> bool {
        self.items
            .iter()
            .any(|item| item.tag.id == id && item.state != ItemState::Removed)
    }

    pub fn contains_name(&self, name: &str) -> bool {
        self.active().any(|tag| tag.name == name)
    }

    /// Tags the entity carries once pending changes are applied.
    pub fn active(&self) -> impl Iterator<Item = &Tag> {
        self.items
            .iter()
            .filter(|item| item.state != ItemState::Removed)
            .map(|item| &item.tag)
    }

    pub fn added(&self) -> impl Iterator<Item = &Tag> {
        self.items
            .iter()
            .filter(|item| item.state == ItemState::Added)
            .map(|item| &item.tag)
    }

    pub fn removed(&self) -> impl Iterator<Item = &Tag> {
        self.items
            .iter()
            .filter(|item| item.state == ItemState::Removed)
            .map(|item| &item.tag)
    }

    pub fn is_removed(&self, name: &str) -> bool {
        self.removed().any(|tag| tag.name == name)
    }

    /// Fold pending changes into the stored state.
    pub fn commit(&mut self) {
        self.items.retain(|item| item.state != ItemState::Removed);
        for item in self.items.iter_mut() {
            item.state = ItemState::Unchanged;
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceUrl {
    pub url: String,
    #[serde(default)]
    pub title: Option<String>,
}

/// The backend's topic entity.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicEntity {
    #[serde(default)]
    pub id: Option<EntityId>,
    #[serde(default)]
    pub revision: Option<i64>,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub xml: String,
    #[serde(default)]
    pub doctype: String,
    #[serde(default)]
    pub locale: String,
    #[serde(default)]
    pub tags: TagCollection,
    #[serde(default)]
    pub source_urls: Vec<SourceUrl>,
    #[serde(default)]
    pub properties: BTreeMap<PropertyId, String>,
}

impl TopicEntity {
    pub fn property(&self, id: PropertyId) -> Option<&str> {
        self.properties.get(&id).map(String::as_str)
    }

    pub fn set_property<S: Into<String>>(&mut self, id: PropertyId, value: S) {
        self.properties.insert(id, value.into());
    }

    pub fn unique_id_property(&self) -> Option<&str> {
        self.property(CSP_PROPERTY_ID)
    }
}

impl Display for TopicEntity {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.id {
            Some(id) => write!(f, "topic {id} '{}'", self.title),
            None => write!(f, "unsaved topic '{}'", self.title),
        }
    }
}

/// The backend's content spec entity: the owner of every persisted node of one spec.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentSpecEntity {
    #[serde(default)]
    pub id: Option<SpecId>,
    pub title: String,
    #[serde(default)]
    pub locale: Option<String>,
    #[serde(default)]
    pub properties: BTreeMap<PropertyId, String>,
}

impl ContentSpecEntity {
    pub fn added_by(&self) -> Option<&str> {
        self.properties.get(&ADDED_BY_PROPERTY).map(String::as_str)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub username: String,
}

impl User {
    pub fn new<S: Into<String>>(username: S) -> Self {
        User {
            username: username.into(),
        }
    }
}
