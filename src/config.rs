use crate::{error::SyncError, properties::CategoryId};
use serde::{Deserialize, Serialize};
use std::{
    fs::{read_to_string, write},
    path::PathBuf,
};

pub const DEFAULT_LOCALE: &str = "en-US";
pub const WRITER_CATEGORY: CategoryId = CategoryId(12);

/// What to do with a relationship whose target was never merged into the node tree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DanglingPolicy {
    /// Abort the run with [SyncError::DanglingRelationship].
    #[default]
    Fail,
    /// Log a warning and leave the relationship out.
    Skip,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingOptions {
    /// Stop once validation passes, without any backend writes.
    pub validate_only: bool,
    /// Replaces the parsed locale before anything else is processed.
    pub override_locale: Option<String>,
    pub default_locale: String,
    /// Tags in this category name assigned writers.
    pub writer_category: CategoryId,
    pub dangling_relationships: DanglingPolicy,
}

impl Default for ProcessingOptions {
    fn default() -> Self {
        ProcessingOptions {
            validate_only: false,
            override_locale: None,
            default_locale: DEFAULT_LOCALE.to_string(),
            writer_category: WRITER_CATEGORY,
            dangling_relationships: DanglingPolicy::default(),
        }
    }
}

pub trait ConfigProvider: Send + Sync {
    fn get_options(&self) -> Result<ProcessingOptions, SyncError>;
    fn set_options(&self, options: &ProcessingOptions) -> Result<(), SyncError>;
}

/// Reads and writes [ProcessingOptions] under the `[options]` table of a TOML file.
#[derive(Debug, Serialize, Deserialize)]
pub struct TomlConfigProvider {
    path: PathBuf,
}

impl TomlConfigProvider {
    pub fn new(path: PathBuf) -> Self {
        TomlConfigProvider { path }
    }

    fn read_table(&self) -> Result<toml::Table, SyncError> {
        if !self.path.exists() {
            return Ok(toml::Table::new());
        }
        let content = read_to_string(&self.path)?;
        Ok(toml::from_str(&content)?)
    }
}

impl ConfigProvider for TomlConfigProvider {
    fn get_options(&self) -> Result<ProcessingOptions, SyncError> {
        tracing::debug!("Attempting to read options from: {:?}", &self.path);
        if !self.path.exists() {
            tracing::debug!("Config file not found, using default options.");
            return Ok(ProcessingOptions::default());
        }
        let mut table = self.read_table()?;
        match table.remove("options") {
            Some(value) => Ok(value.try_into()?),
            None => Ok(ProcessingOptions::default()),
        }
    }

    fn set_options(&self, options: &ProcessingOptions) -> Result<(), SyncError> {
        tracing::debug!("Attempting to write options to: {:?}", &self.path);
        let mut table = self.read_table()?;
        table.insert("options".to_string(), toml::Value::try_from(options)?);
        write(&self.path, toml::to_string(&table)?)?;
        Ok(())
    }
}
