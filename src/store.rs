use std::collections::HashMap;

use jiff::SignedDuration;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ContentStoreError {
    #[error("content '{0}' not found")]
    NotFound(String),
    #[error("content store unavailable: {0}")]
    Unavailable(String),
}

/// What the content catalog knows about a piece of content. The locator is
/// opaque to this crate; the duration hint bounds ad playback.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaResolution {
    pub media_locator: String,
    pub duration_hint: SignedDuration,
}

/// Narrow seam to the external content catalog. A miss is a non-fatal
/// per-item failure: ads are skipped, polls are retried.
pub trait ContentStore {
    fn resolve(&self, content_id: &str) -> Result<MediaResolution, ContentStoreError>;
}

/// Narrow seam to the subscription system, read once per poll tick.
pub trait SubscriberContext {
    fn is_premium_viewer(&self) -> bool;
}

#[derive(Debug, Default)]
pub struct InMemoryStore {
    items: HashMap<String, MediaResolution>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        &mut self,
        content_id: impl Into<String>,
        media_locator: impl Into<String>,
        duration_hint: SignedDuration,
    ) {
        self.items.insert(
            content_id.into(),
            MediaResolution {
                media_locator: media_locator.into(),
                duration_hint,
            },
        );
    }
}

impl ContentStore for InMemoryStore {
    fn resolve(&self, content_id: &str) -> Result<MediaResolution, ContentStoreError> {
        self.items
            .get(content_id)
            .cloned()
            .ok_or_else(|| ContentStoreError::NotFound(content_id.to_string()))
    }
}

/// Fixed subscriber tier, enough for tests and the demo binaries.
#[derive(Debug, Clone, Copy)]
pub struct StaticViewer(pub bool);

impl SubscriberContext for StaticViewer {
    fn is_premium_viewer(&self) -> bool {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory_store_hit_and_miss() {
        let mut store = InMemoryStore::new();
        store.insert("a", "media://a", SignedDuration::from_secs(600));
        let media = store.resolve("a").unwrap();
        assert_eq!(media.media_locator, "media://a");
        assert_eq!(
            store.resolve("missing").unwrap_err(),
            ContentStoreError::NotFound("missing".to_string())
        );
    }
}
