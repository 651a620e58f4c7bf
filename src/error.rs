use std::{fmt, io};

use regex::Error as RegexError;
use serde::{Deserialize, Serialize};
use serde_json::Error as JsonError;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
pub enum SyncError {
    #[error("Remote backend error: {0}")]
    Backend(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Relationship on line {line} references '{target}', which was never merged into the node tree")]
    DanglingRelationship { line: usize, target: String },
    #[error("File System error: {0}")]
    Io(String),
    #[error("Lookup failed: {0}")]
    Lookup(String),
    #[error("Item Not Found: {0}")]
    NotFound(String),
    #[error("Shutdown requested")]
    OperationCancelled,
    #[error("Processing failed: {0}")]
    Processing(String),
    #[error("(De)Serialization error: {0}")]
    Serialization(String),
    #[error("Content spec failed validation: {0}")]
    Validation(String),
}

impl SyncError {
    /// True when the run ended because a shutdown was requested rather than because of a defect.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, SyncError::OperationCancelled)
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, SyncError::Validation(_))
    }

    pub fn processing<S: Into<String>>(msg: S) -> Self {
        SyncError::Processing(msg.into())
    }

    pub fn lookup<S: Into<String>>(msg: S) -> Self {
        SyncError::Lookup(msg.into())
    }

    pub fn backend<S: Into<String>>(msg: S) -> Self {
        SyncError::Backend(msg.into())
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(src: toml::de::Error) -> SyncError {
        SyncError::Serialization(format!("Toml deserialization error: {src}"))
    }
}

impl From<toml::ser::Error> for SyncError {
    fn from(src: toml::ser::Error) -> SyncError {
        SyncError::Serialization(format!("Toml serialization error: {src}"))
    }
}

impl From<JsonError> for SyncError {
    fn from(src: JsonError) -> SyncError {
        SyncError::Serialization(format!("JSON (de)serialization error: {src}"))
    }
}

impl From<io::Error> for SyncError {
    fn from(x: io::Error) -> Self {
        match x.kind() {
            io::ErrorKind::NotFound => SyncError::NotFound(format!("{x}")),
            _ => SyncError::Io(format!("IOError: {}", x.kind())),
        }
    }
}

impl From<fmt::Error> for SyncError {
    fn from(x: fmt::Error) -> Self {
        SyncError::Serialization(format!("{x}"))
    }
}

impl From<RegexError> for SyncError {
    fn from(x: RegexError) -> Self {
        SyncError::Config(format!("Regex parse failed: {x}"))
    }
}
