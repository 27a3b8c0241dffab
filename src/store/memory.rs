//! In-memory correlation index

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    rank_candidates, CorrelationIndex, KnnHit, KnnProbe, PairExtension, PairMerge, SchemaStatus,
    StoreError, StoreResult,
};
use crate::models::{CorrelationAlert, CorrelationRecord, ScoreAnchor};

const HISTORY_INDEX: &str = "correlation-history";

#[derive(Default)]
struct Indices {
    /// Insertion order is kept so scans are index-natural
    records: Vec<CorrelationRecord>,
    anchors: Vec<ScoreAnchor>,
    alerts: HashMap<Uuid, CorrelationAlert>,
}

/// Correlation index kept in process memory
pub struct MemoryStore {
    inner: RwLock<Option<Indices>>,
}

impl MemoryStore {
    /// Store whose indices do not exist until `ensure_schema` runs
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(None),
        }
    }

    /// Store with the schema already applied and the root anchor seeded
    #[cfg(test)]
    pub fn with_schema() -> Self {
        Self {
            inner: RwLock::new(Some(Indices {
                anchors: vec![ScoreAnchor::root()],
                ..Default::default()
            })),
        }
    }

    #[cfg(test)]
    pub async fn record_count(&self) -> usize {
        self.inner
            .read()
            .await
            .as_ref()
            .map(|i| i.records.len())
            .unwrap_or(0)
    }

    #[cfg(test)]
    pub async fn anchors(&self) -> Vec<ScoreAnchor> {
        self.inner
            .read()
            .await
            .as_ref()
            .map(|i| i.anchors.clone())
            .unwrap_or_default()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn missing() -> StoreError {
    StoreError::IndexNotFound(HISTORY_INDEX.to_string())
}

#[async_trait]
impl CorrelationIndex for MemoryStore {
    async fn ensure_schema(&self) -> StoreResult<SchemaStatus> {
        let mut guard = self.inner.write().await;
        if guard.is_some() {
            return Ok(SchemaStatus::AlreadyPresent);
        }
        *guard = Some(Indices {
            anchors: vec![ScoreAnchor::root()],
            ..Default::default()
        });
        Ok(SchemaStatus::Created)
    }

    async fn latest_anchor(&self) -> StoreResult<Option<ScoreAnchor>> {
        let guard = self.inner.read().await;
        let indices = guard.as_ref().ok_or_else(missing)?;
        Ok(indices
            .anchors
            .iter()
            .max_by_key(|a| a.score_timestamp)
            .cloned())
    }

    async fn put_anchor(&self, anchor: &ScoreAnchor) -> StoreResult<()> {
        let mut guard = self.inner.write().await;
        let indices = guard.as_mut().ok_or_else(missing)?;
        indices.anchors.push(anchor.clone());
        Ok(())
    }

    async fn merge_pair(&self, fresh: &CorrelationRecord, extend: PairExtension<'_>) -> StoreResult<PairMerge> {
        let mut guard = self.inner.write().await;
        let indices = guard.as_mut().ok_or_else(missing)?;
        let key = fresh.pair_key();

        match indices
            .records
            .iter_mut()
            .find(|r| !r.is_orphan() && r.pair_key() == key)
        {
            Some(existing) => {
                let rule_added = extend(existing);
                Ok(PairMerge {
                    record: existing.clone(),
                    rule_added,
                })
            }
            None => {
                indices.records.push(fresh.clone());
                Ok(PairMerge {
                    record: fresh.clone(),
                    rule_added: true,
                })
            }
        }
    }

    async fn upsert_record(&self, record: &CorrelationRecord) -> StoreResult<()> {
        let mut guard = self.inner.write().await;
        let indices = guard.as_mut().ok_or_else(missing)?;
        match indices.records.iter_mut().find(|r| r.id == record.id) {
            Some(existing) => *existing = record.clone(),
            None => indices.records.push(record.clone()),
        }
        Ok(())
    }

    async fn records_for_finding(&self, finding_id: &str) -> StoreResult<Vec<CorrelationRecord>> {
        let guard = self.inner.read().await;
        let indices = guard.as_ref().ok_or_else(missing)?;
        Ok(indices
            .records
            .iter()
            .filter(|r| r.involves(finding_id))
            .cloned()
            .collect())
    }

    async fn scan_pairs(&self, start_timestamp: i64, end_timestamp: i64) -> StoreResult<Vec<CorrelationRecord>> {
        let guard = self.inner.read().await;
        let indices = guard.as_ref().ok_or_else(missing)?;
        Ok(indices
            .records
            .iter()
            .filter(|r| !r.is_orphan() && r.timestamp >= start_timestamp && r.timestamp <= end_timestamp)
            .cloned()
            .collect())
    }

    async fn multi_knn(&self, probes: &[KnnProbe]) -> StoreResult<Vec<StoreResult<Vec<KnnHit>>>> {
        let guard = self.inner.read().await;
        let indices = guard.as_ref().ok_or_else(missing)?;
        Ok(probes
            .iter()
            .map(|probe| Ok(rank_candidates(probe, &indices.records)))
            .collect())
    }

    async fn get_alert(&self, id: Uuid) -> StoreResult<Option<CorrelationAlert>> {
        let guard = self.inner.read().await;
        let indices = guard.as_ref().ok_or_else(missing)?;
        Ok(indices.alerts.get(&id).cloned())
    }

    async fn put_alert(&self, alert: &CorrelationAlert) -> StoreResult<()> {
        let mut guard = self.inner.write().await;
        let indices = guard.as_mut().ok_or_else(missing)?;
        indices.alerts.insert(alert.id, alert.clone());
        Ok(())
    }

    async fn list_alerts(&self, rule_id: Option<&str>) -> StoreResult<Vec<CorrelationAlert>> {
        let guard = self.inner.read().await;
        let indices = guard.as_ref().ok_or_else(missing)?;
        let mut alerts: Vec<CorrelationAlert> = indices
            .alerts
            .values()
            .filter(|a| rule_id.map_or(true, |id| a.correlation_rule_id == id))
            .cloned()
            .collect();
        alerts.sort_by(|a, b| b.start_time.cmp(&a.start_time).then_with(|| a.id.cmp(&b.id)));
        Ok(alerts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_schema_reports_index_not_found() {
        let store = MemoryStore::new();

        let err = store.records_for_finding("f1").await.unwrap_err();
        assert!(matches!(err, StoreError::IndexNotFound(_)));
    }

    #[tokio::test]
    async fn test_ensure_schema_is_idempotent() {
        let store = MemoryStore::new();

        assert_eq!(store.ensure_schema().await.unwrap(), SchemaStatus::Created);
        assert_eq!(store.ensure_schema().await.unwrap(), SchemaStatus::AlreadyPresent);

        // Root anchor seeded exactly once
        assert_eq!(store.anchors().await.len(), 1);
        let anchor = store.latest_anchor().await.unwrap().unwrap();
        assert!(anchor.root);
        assert_eq!(anchor.score_timestamp, 0);
    }

    fn pair(finding1: &str, finding2: &str, rule: &str) -> CorrelationRecord {
        CorrelationRecord {
            id: Uuid::new_v4(),
            finding1: finding1.to_string(),
            finding2: finding2.to_string(),
            log_type: "a-b".to_string(),
            corr_rules: [rule.to_string()].into(),
            timestamp: 1_000,
            counter: 1,
            corr_vector: vec![0.0],
            score_timestamp: 0,
            root: false,
        }
    }

    #[tokio::test]
    async fn test_merge_pair_matches_either_orientation() {
        let store = MemoryStore::with_schema();
        let add_r2 = |r: &mut CorrelationRecord| r.corr_rules.insert("r2".to_string());

        let first = store.merge_pair(&pair("f1", "f2", "r1"), &add_r2).await.unwrap();
        let second = store.merge_pair(&pair("f2", "f1", "r2"), &add_r2).await.unwrap();
        let again = store.merge_pair(&pair("f2", "f1", "r2"), &add_r2).await.unwrap();

        assert!(first.rule_added);
        assert!(second.rule_added);
        assert!(!again.rule_added);
        assert_eq!(second.record.id, first.record.id);
        assert_eq!(second.record.finding1, "f1");
        assert_eq!(store.record_count().await, 1);
    }

    #[tokio::test]
    async fn test_latest_anchor_is_highest_timestamp() {
        let store = MemoryStore::with_schema();
        store.put_anchor(&ScoreAnchor::advanced(5_000)).await.unwrap();
        store.put_anchor(&ScoreAnchor::advanced(3_000)).await.unwrap();

        let anchor = store.latest_anchor().await.unwrap().unwrap();
        assert_eq!(anchor.score_timestamp, 5_000);
        assert!(!anchor.root);
    }
}
