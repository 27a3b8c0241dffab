//! Score anchor store
//!
//! Keeps the time feature of correlation vectors bounded: a finding more
//! than one historical interval past the anchor moves the anchor up to
//! `timestamp - interval`, so the feature stays in `[0, interval]` seconds.
//! Writes are last-writer-wins; two ingestions racing on a stale anchor
//! may both advance it.

use std::sync::Arc;
use std::time::Duration;

use crate::error::{AppResult, CorrelationError};
use crate::models::ScoreAnchor;
use crate::store::CorrelationIndex;

use super::timed;

/// Time feature of one finding against the anchor in force
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeFeature {
    pub score_timestamp: i64,
    pub seconds: f32,
}

impl TimeFeature {
    pub fn new(anchor: &ScoreAnchor, timestamp: i64) -> Self {
        Self {
            score_timestamp: anchor.score_timestamp,
            seconds: anchor.time_feature(timestamp),
        }
    }
}

pub struct AnchorStore {
    index: Arc<dyn CorrelationIndex>,
    interval_ms: i64,
    timeout: Duration,
}

impl AnchorStore {
    pub fn new(index: Arc<dyn CorrelationIndex>, interval_ms: i64, timeout: Duration) -> Self {
        Self {
            index,
            interval_ms,
            timeout,
        }
    }

    /// Anchor in force, the unsaved root when none was written yet
    pub async fn current(&self) -> AppResult<ScoreAnchor> {
        let anchor = timed(self.timeout, self.index.latest_anchor())
            .await
            .map_err(|e| CorrelationError::store("score anchor lookup", e))?;
        Ok(anchor.unwrap_or_else(ScoreAnchor::root))
    }

    /// Anchor to use for a finding at `finding_timestamp`, advancing it
    /// when stale. A failed advance fails the caller.
    pub async fn get_or_advance(&self, finding_timestamp: i64) -> AppResult<ScoreAnchor> {
        let current = self.current().await?;
        let floor = finding_timestamp.saturating_sub(self.interval_ms);
        if floor <= current.score_timestamp {
            return Ok(current);
        }

        let advanced = ScoreAnchor::advanced(floor);
        timed(self.timeout, self.index.put_anchor(&advanced))
            .await
            .map_err(|e| CorrelationError::store("score anchor update", e))?;

        tracing::debug!(
            previous = current.score_timestamp,
            score_timestamp = advanced.score_timestamp,
            "Score anchor advanced"
        );
        Ok(advanced)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    const HOUR_MS: i64 = 3_600_000;

    async fn store_with_anchor(anchor: Option<i64>) -> (Arc<MemoryStore>, AnchorStore) {
        let index = Arc::new(MemoryStore::with_schema());
        if let Some(ts) = anchor {
            index.put_anchor(&ScoreAnchor::advanced(ts)).await.unwrap();
        }
        let anchors = AnchorStore::new(index.clone(), HOUR_MS, Duration::from_secs(1));
        (index, anchors)
    }

    #[tokio::test]
    async fn test_fresh_anchor_is_reused() {
        let (index, anchors) = store_with_anchor(Some(1_000)).await;

        let anchor = anchors.get_or_advance(1_000 + HOUR_MS).await.unwrap();

        assert_eq!(anchor.score_timestamp, 1_000);
        assert_eq!(index.anchors().await.len(), 2);
    }

    #[tokio::test]
    async fn test_stale_anchor_advances_to_floor() {
        let (index, anchors) = store_with_anchor(Some(1_000)).await;

        let anchor = anchors.get_or_advance(1_000 + HOUR_MS + 1).await.unwrap();

        assert_eq!(anchor.score_timestamp, 1_001);
        assert!(!anchor.root);
        // Previous anchor kept as history
        let stored = index.anchors().await;
        assert_eq!(stored.len(), 3);
        assert!(stored.iter().any(|a| a.score_timestamp == 1_000));
        assert_eq!(anchors.current().await.unwrap().score_timestamp, 1_001);
    }

    #[tokio::test]
    async fn test_anchor_is_monotonic() {
        let (_index, anchors) = store_with_anchor(None).await;
        let mut last = 0;

        for ts in [5 * HOUR_MS, 5 * HOUR_MS + 10, 7 * HOUR_MS, 6 * HOUR_MS, 9 * HOUR_MS] {
            let anchor = anchors.get_or_advance(ts).await.unwrap();
            assert!(anchor.score_timestamp >= last);
            last = anchors.current().await.unwrap().score_timestamp;
        }

        assert_eq!(last, 8 * HOUR_MS);
    }

    #[tokio::test]
    async fn test_time_feature_is_bounded_by_interval() {
        let (_index, anchors) = store_with_anchor(None).await;

        for ts in [2 * HOUR_MS, 2 * HOUR_MS + 30_000, 3 * HOUR_MS + 1] {
            let anchor = anchors.get_or_advance(ts).await.unwrap();
            let feature = TimeFeature::new(&anchor, ts);
            assert!(feature.seconds >= 0.0);
            assert!(feature.seconds <= (HOUR_MS / 1000) as f32);
        }
    }

    #[tokio::test]
    async fn test_missing_index_fails_advance() {
        let index = Arc::new(MemoryStore::new());
        let anchors = AnchorStore::new(index, HOUR_MS, Duration::from_secs(1));

        let err = anchors.get_or_advance(10 * HOUR_MS).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Internal);
    }
}
