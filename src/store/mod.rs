//! Correlation history index - storage substrate
//!
//! Holds correlation records, score anchors and correlation alerts. Two
//! backends: in-memory (default, tests) and PostgreSQL.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use uuid::Uuid;

use crate::models::{CorrelationAlert, CorrelationRecord, ScoreAnchor};

pub use memory::MemoryStore;
pub use postgres::PgStore;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    #[error("index {0} does not exist")]
    IndexNotFound(String),

    #[error("document not found: {0}")]
    NotFound(String),

    #[error("storage call timed out after {0} ms")]
    Timeout(u64),

    #[error("storage backend error: {0}")]
    Backend(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => StoreError::NotFound("row".to_string()),
            sqlx::Error::PoolTimedOut => StoreError::Timeout(0),
            sqlx::Error::Database(db) if db.code().as_deref() == Some("42P01") => {
                StoreError::IndexNotFound(db.message().to_string())
            }
            other => StoreError::Backend(other.to_string()),
        }
    }
}

/// Outcome of an idempotent schema check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaStatus {
    Created,
    AlreadyPresent,
}

/// Filter applied before nearest-neighbour scoring
#[derive(Debug, Clone, PartialEq)]
pub struct RecordFilter {
    pub start_timestamp: i64,
    pub end_timestamp: i64,
    pub exclude_orphans: bool,
}

impl RecordFilter {
    pub fn accepts(&self, record: &CorrelationRecord) -> bool {
        !record.root
            && record.timestamp >= self.start_timestamp
            && record.timestamp <= self.end_timestamp
            && !(self.exclude_orphans && record.is_orphan())
    }
}

/// One query of a batched nearest-neighbour search
#[derive(Debug, Clone, PartialEq)]
pub struct KnnProbe {
    pub vector: Vec<f32>,
    pub k: usize,
    pub filter: RecordFilter,
}

/// Folds one more rule into an existing pair record; `false` when the
/// record already carries it
pub type PairExtension<'a> = &'a (dyn Fn(&mut CorrelationRecord) -> bool + Send + Sync);

/// Outcome of an atomic pair write
#[derive(Debug, Clone, PartialEq)]
pub struct PairMerge {
    pub record: CorrelationRecord,
    /// False when the pair already carried the rule
    pub rule_added: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct KnnHit {
    pub record: CorrelationRecord,
    pub score: f32,
}

#[async_trait]
pub trait CorrelationIndex: Send + Sync {
    /// Create the history, anchor and alert indices when missing and seed
    /// the root anchor. Safe to call any number of times.
    async fn ensure_schema(&self) -> StoreResult<SchemaStatus>;

    /// Authoritative anchor: the one with the highest score timestamp
    async fn latest_anchor(&self) -> StoreResult<Option<ScoreAnchor>>;

    async fn put_anchor(&self, anchor: &ScoreAnchor) -> StoreResult<()>;

    /// Insert `fresh` unless a record for the same unordered pair exists,
    /// in which case `extend` is applied to that record instead. Lookup and
    /// write are one atomic step, so a pair never gets two rows.
    async fn merge_pair(&self, fresh: &CorrelationRecord, extend: PairExtension<'_>) -> StoreResult<PairMerge>;

    /// Insert or replace by record id
    async fn upsert_record(&self, record: &CorrelationRecord) -> StoreResult<()>;

    /// Records with `finding1 == finding_id` or `finding2 == finding_id`
    async fn records_for_finding(&self, finding_id: &str) -> StoreResult<Vec<CorrelationRecord>>;

    /// Real pairs with `timestamp` in `[start, end]`, index order
    async fn scan_pairs(&self, start_timestamp: i64, end_timestamp: i64) -> StoreResult<Vec<CorrelationRecord>>;

    /// One round trip for many probes; one result per probe, same order
    async fn multi_knn(&self, probes: &[KnnProbe]) -> StoreResult<Vec<StoreResult<Vec<KnnHit>>>>;

    async fn get_alert(&self, id: Uuid) -> StoreResult<Option<CorrelationAlert>>;

    async fn put_alert(&self, alert: &CorrelationAlert) -> StoreResult<()>;

    /// Newest first
    async fn list_alerts(&self, rule_id: Option<&str>) -> StoreResult<Vec<CorrelationAlert>>;
}

/// L2 space similarity: `1 / (1 + d²)`. Missing trailing slots count as 0.
pub fn l2_score(a: &[f32], b: &[f32]) -> f32 {
    let len = a.len().max(b.len());
    let squared: f32 = (0..len)
        .map(|i| {
            let d = a.get(i).copied().unwrap_or(0.0) - b.get(i).copied().unwrap_or(0.0);
            d * d
        })
        .sum();
    1.0 / (1.0 + squared)
}

/// Score, filter and keep the best `k` candidates of one probe
pub fn rank_candidates<'a, I>(probe: &KnnProbe, candidates: I) -> Vec<KnnHit>
where
    I: IntoIterator<Item = &'a CorrelationRecord>,
{
    let mut hits: Vec<KnnHit> = candidates
        .into_iter()
        .filter(|r| probe.filter.accepts(r))
        .map(|r| KnnHit {
            score: l2_score(&probe.vector, &r.corr_vector),
            record: r.clone(),
        })
        .collect();

    hits.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| b.record.timestamp.cmp(&a.record.timestamp))
            .then_with(|| a.record.id.cmp(&b.record.id))
    });
    hits.truncate(probe.k);
    hits
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn record(finding1: &str, finding2: &str, timestamp: i64, vector: Vec<f32>) -> CorrelationRecord {
        CorrelationRecord {
            id: Uuid::new_v4(),
            finding1: finding1.to_string(),
            finding2: finding2.to_string(),
            log_type: "a-b".to_string(),
            corr_rules: BTreeSet::new(),
            timestamp,
            counter: 0,
            corr_vector: vector,
            score_timestamp: 0,
            root: false,
        }
    }

    #[test]
    fn test_l2_score_identical_vectors() {
        assert_eq!(l2_score(&[1.0, 2.0], &[1.0, 2.0]), 1.0);
        assert!((l2_score(&[0.0], &[1.0]) - 0.5).abs() < f32::EPSILON);
    }

    #[test]
    fn test_rank_filters_window_and_orphans() {
        let probe = KnnProbe {
            vector: vec![0.0, 0.0],
            k: 10,
            filter: RecordFilter {
                start_timestamp: 100,
                end_timestamp: 200,
                exclude_orphans: true,
            },
        };
        let records = vec![
            record("f1", "f2", 150, vec![0.0, 1.0]),
            record("f3", "", 150, vec![0.0, 0.0]),
            record("f4", "f5", 250, vec![0.0, 0.0]),
            record("f6", "f7", 100, vec![0.0, 0.0]),
        ];

        let hits = rank_candidates(&probe, &records);

        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].record.finding1, "f6");
        assert_eq!(hits[1].record.finding1, "f1");
    }

    #[test]
    fn test_rank_truncates_to_k() {
        let probe = KnnProbe {
            vector: vec![0.0],
            k: 1,
            filter: RecordFilter {
                start_timestamp: 0,
                end_timestamp: i64::MAX,
                exclude_orphans: false,
            },
        };
        let records = vec![record("a", "b", 1, vec![3.0]), record("c", "d", 1, vec![1.0])];

        let hits = rank_candidates(&probe, &records);

        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].record.finding1, "c");
    }
}
