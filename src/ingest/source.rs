//! Snapshot source abstraction for upstream feeds.
//!
//! The core never talks to the network itself. A [`SnapshotSource`] hands
//! over raw JSON per feed; every call is bounded by a timeout and any
//! failure degrades to "data unavailable" for that feed only.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::{FeedKind, IngestError};

/// Trait abstracting where raw feed payloads come from.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    /// Fetch the raw payload of one feed.
    async fn fetch(&self, feed: FeedKind) -> Result<Value, IngestError>;

    /// Human-readable name for logging (e.g. "file", "static").
    fn source_name(&self) -> &str;
}

/// Fetch one feed, giving up after `timeout`.
pub async fn fetch_with_timeout(
    source: &dyn SnapshotSource,
    feed: FeedKind,
    timeout: Duration,
) -> Result<Value, IngestError> {
    match tokio::time::timeout(timeout, source.fetch(feed)).await {
        Ok(result) => result,
        Err(_) => Err(IngestError::Timeout {
            feed,
            secs: timeout.as_secs(),
        }),
    }
}

// ============================================================================
// File Source (data directory)
// ============================================================================

/// Reads `entities.json`, `samples.json`, `tickets.json` and `edges.json`
/// from a directory.
pub struct FileSource {
    dir: PathBuf,
}

impl FileSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[async_trait]
impl SnapshotSource for FileSource {
    async fn fetch(&self, feed: FeedKind) -> Result<Value, IngestError> {
        let path = self.dir.join(feed.file_name());
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|error| IngestError::Io { path, error })?;
        serde_json::from_slice(&bytes).map_err(|error| IngestError::Json { feed, error })
    }

    fn source_name(&self) -> &str {
        "file"
    }
}

// ============================================================================
// Static Source (pre-loaded payloads)
// ============================================================================

/// Serves pre-loaded payloads, with an optional artificial delay.
///
/// Missing feeds report [`IngestError::DataUnavailable`].
#[derive(Default)]
pub struct StaticSource {
    payloads: HashMap<FeedKind, Value>,
    delay: Option<Duration>,
}

impl StaticSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_feed(mut self, feed: FeedKind, payload: Value) -> Self {
        self.payloads.insert(feed, payload);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[async_trait]
impl SnapshotSource for StaticSource {
    async fn fetch(&self, feed: FeedKind) -> Result<Value, IngestError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.payloads
            .get(&feed)
            .cloned()
            .ok_or_else(|| IngestError::DataUnavailable(format!("no {feed} feed configured")))
    }

    fn source_name(&self) -> &str {
        "static"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_file_source_reads_feed() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("edges.json"), r#"[{"from":"a","to":"b","travel_time":1}]"#)
            .expect("write");

        let source = FileSource::new(dir.path());
        let value = source.fetch(FeedKind::Edges).await.expect("edges present");
        assert_eq!(value.as_array().map(Vec::len), Some(1));

        let missing = source.fetch(FeedKind::Samples).await;
        assert!(matches!(missing, Err(IngestError::Io { .. })));
    }

    #[tokio::test]
    async fn test_invalid_json_is_reported() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("tickets.json"), "{not json").expect("write");
        let result = FileSource::new(dir.path()).fetch(FeedKind::Tickets).await;
        assert!(matches!(result, Err(IngestError::Json { feed: FeedKind::Tickets, .. })));
    }

    #[tokio::test]
    async fn test_fetch_timeout() {
        let source = StaticSource::new()
            .with_feed(FeedKind::Samples, json!([]))
            .with_delay(Duration::from_millis(200));
        let result = fetch_with_timeout(&source, FeedKind::Samples, Duration::from_millis(10)).await;
        assert!(matches!(result, Err(IngestError::Timeout { feed: FeedKind::Samples, .. })));

        let fast = StaticSource::new().with_feed(FeedKind::Samples, json!([]));
        assert!(fetch_with_timeout(&fast, FeedKind::Samples, Duration::from_secs(1)).await.is_ok());
    }
}
