//! Resolves duplicate (`X<n>`) and cloned-duplicate (`XC<n>`) topics to the entity of their
//! counterpart. Must run after the topic pool assigned ids to new and cloned topics.
use tracing::debug;

use crate::{content::SpecTopic, error::SyncError};

/// Copy counterpart database ids onto every duplicate in `topics`. Returns how many were synced.
pub fn sync_duplicates(topics: &mut [&mut SpecTopic]) -> Result<usize, SyncError> {
    let mut resolved = Vec::new();
    for (idx, topic) in topics.iter().enumerate() {
        let counterpart = if let Some(n) = topic.id.strip_prefix("XC") {
            let suffix = format!("C{n}");
            topics
                .iter()
                .find(|other| other.id.ends_with(&suffix) && !other.id.starts_with('X'))
        } else if let Some(n) = topic.id.strip_prefix('X') {
            let new_id = format!("N{n}");
            topics.iter().find(|other| other.id == new_id)
        } else {
            continue;
        };
        let counterpart = counterpart.ok_or_else(|| {
            SyncError::processing(format!(
                "{topic}: no topic in this spec for the duplicate to refer to"
            ))
        })?;
        debug!("{topic} resolves to {counterpart} ({:?})", counterpart.db_id);
        resolved.push((idx, counterpart.db_id));
    }
    let count = resolved.len();
    for (idx, db_id) in resolved {
        topics[idx].db_id = db_id;
    }
    Ok(count)
}
