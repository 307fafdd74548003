use std::collections::HashMap;
use std::ffi::OsStr;
use std::fs;
use std::path::Path;
use std::sync::{Arc, RwLock};

use thiserror::Error;

use crate::schedule::{Channel, ChannelDoc, ScheduleError};

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to read catalog directory: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse channel document: {0}")]
    Parse(#[from] serde_json::Error),
    #[error(transparent)]
    Schedule(#[from] ScheduleError),
}

/// In-memory registry of published channels. Publication replaces the whole
/// channel behind an `Arc`, so readers either see the old sequence or the new
/// one, never a partial update; resolution against an already-fetched `Arc`
/// is untouched by a concurrent republish.
#[derive(Debug, Default)]
pub struct Catalog {
    channels: RwLock<HashMap<String, Arc<Channel>>>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads every `*.json` channel document in `dir`. Malformed or invalid
    /// files are skipped with a warning so one bad document cannot take the
    /// rest of the lineup down.
    pub fn from_dir(dir: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let catalog = Self::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension() != Some(OsStr::new("json")) {
                continue;
            }
            match load_channel(&path) {
                Ok(channel) => {
                    tracing::info!(
                        channel = %channel.id(),
                        entries = channel.entries().len(),
                        loop_secs = channel.loop_duration().as_secs_f64(),
                        "loaded channel"
                    );
                    catalog.publish(channel);
                }
                Err(err) => {
                    tracing::warn!(path = %path.display(), %err, "skipping invalid channel document");
                }
            }
        }
        Ok(catalog)
    }

    pub fn publish(&self, channel: Channel) {
        let mut channels = self.channels.write().expect("catalog lock poisoned");
        channels.insert(channel.id().to_string(), Arc::new(channel));
    }

    pub fn get(&self, id: &str) -> Option<Arc<Channel>> {
        let channels = self.channels.read().expect("catalog lock poisoned");
        channels.get(id).cloned()
    }

    pub fn ids(&self) -> Vec<String> {
        let channels = self.channels.read().expect("catalog lock poisoned");
        let mut ids: Vec<String> = channels.keys().cloned().collect();
        ids.sort();
        ids
    }
}

/// Parses and validates one channel document.
pub fn load_channel(path: &Path) -> Result<Channel, CatalogError> {
    let contents = fs::read_to_string(path)?;
    let doc: ChannelDoc = serde_json::from_str(&contents)?;
    Ok(Channel::from_doc(doc)?)
}
