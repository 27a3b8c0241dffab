//! Vector embeddings engine
//!
//! Turns join results into correlation records. Every record carries a
//! vector of `N + 1` slots: slot `i < N` is the centred occurrence count of
//! the rule dimension `i`, `(2 * count - 50) / 2`, and the last slot is the
//! time feature in seconds since the score anchor.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use super::anchor::TimeFeature;
use super::timed;
use crate::error::{AppResult, CorrelationError};
use crate::models::{compound_log_type, CorrelationRecord, CorrelationRule, Finding, ORPHAN_SENTINEL};
use crate::store::{CorrelationIndex, PairMerge};

/// Centre of the occurrence count scale
const COUNT_CENTER: f32 = 50.0;

pub fn encode_count(count: i64) -> f32 {
    (2.0 * count as f32 - COUNT_CENTER) / 2.0
}

pub fn decode_count(slot: f32) -> i64 {
    ((2.0 * slot + COUNT_CENTER) / 2.0).round() as i64
}

/// Build a correlation vector from per-dimension counts and a time feature
pub fn build_vector(counts: &[i64], time_feature: f32) -> Vec<f32> {
    counts
        .iter()
        .map(|&c| encode_count(c))
        .chain(std::iter::once(time_feature))
        .collect()
}

/// Per-dimension counts stored in a vector of `dimensions + 1` slots.
/// Short vectors are padded with zero counts.
pub fn counts_of(vector: &[f32], dimensions: usize) -> Vec<i64> {
    (0..dimensions)
        .map(|i| vector.get(i).map(|&v| decode_count(v)).unwrap_or(0))
        .collect()
}

/// Time feature slot of a stored vector
pub fn time_slot(vector: &[f32]) -> f32 {
    vector.last().copied().unwrap_or(0.0)
}

pub struct VectorEmbeddings {
    index: Arc<dyn CorrelationIndex>,
    dimensions: usize,
    timeout: Duration,
}

impl VectorEmbeddings {
    pub fn new(index: Arc<dyn CorrelationIndex>, dimensions: usize, timeout: Duration) -> Self {
        Self {
            index,
            dimensions,
            timeout,
        }
    }

    fn checked_dimension(&self, rule: &CorrelationRule) -> AppResult<usize> {
        if rule.dimension >= self.dimensions {
            return Err(CorrelationError::Validation(format!(
                "rule {} uses dimension {} but vectors have {}",
                rule.id, rule.dimension, self.dimensions
            )));
        }
        Ok(rule.dimension)
    }

    /// Record that `finding` correlates with `other` under `rule`.
    ///
    /// The pair keeps the orientation of its first observation: the finding
    /// already in the store is `finding1`, the triggering one `finding2`.
    /// Repeating a rule is a no-op; a new rule joins `corr_rules` and bumps
    /// the count of its dimension.
    pub async fn insert_correlated_findings(
        &self,
        detector_type: &str,
        finding: &Finding,
        other: &Finding,
        rule: &CorrelationRule,
        time: TimeFeature,
    ) -> AppResult<PairMerge> {
        let dimension = self.checked_dimension(rule)?;
        let dimensions = self.dimensions;

        let mut counts = vec![0; dimensions];
        counts[dimension] = 1;
        let fresh = CorrelationRecord {
            id: Uuid::new_v4(),
            finding1: other.id.clone(),
            finding2: finding.id.clone(),
            log_type: compound_log_type(&other.log_type, detector_type),
            corr_rules: BTreeSet::from([rule.id.clone()]),
            timestamp: finding.timestamp,
            counter: 1,
            corr_vector: build_vector(&counts, time.seconds),
            score_timestamp: time.score_timestamp,
            root: false,
        };

        let rule_id = rule.id.as_str();
        let extend = move |record: &mut CorrelationRecord| {
            if !record.corr_rules.insert(rule_id.to_string()) {
                return false;
            }
            let mut counts = counts_of(&record.corr_vector, dimensions);
            counts[dimension] += 1;
            record.counter = record.corr_rules.len() as i64;
            record.corr_vector = build_vector(&counts, time_slot(&record.corr_vector));
            true
        };

        let merged = timed(self.timeout, self.index.merge_pair(&fresh, &extend))
            .await
            .map_err(|e| CorrelationError::store("correlation record write", e))?;

        if merged.rule_added {
            tracing::debug!(
                finding1 = %merged.record.finding1,
                finding2 = %merged.record.finding2,
                rule = %rule.id,
                rules = merged.record.corr_rules.len(),
                "Correlation recorded"
            );
        }
        Ok(merged)
    }

    /// Record a finding that correlates with nothing yet. Existing orphan
    /// rows of the finding are reused.
    pub async fn insert_orphan_finding(
        &self,
        detector_type: &str,
        finding: &Finding,
        time: TimeFeature,
    ) -> AppResult<CorrelationRecord> {
        let rows = timed(self.timeout, self.index.records_for_finding(&finding.id))
            .await
            .map_err(|e| CorrelationError::store("orphan lookup", e))?;
        if let Some(orphan) = rows.into_iter().find(|r| r.is_orphan()) {
            return Ok(orphan);
        }

        let record = CorrelationRecord {
            id: Uuid::new_v4(),
            finding1: finding.id.clone(),
            finding2: ORPHAN_SENTINEL.to_string(),
            log_type: detector_type.to_string(),
            corr_rules: BTreeSet::new(),
            timestamp: finding.timestamp,
            counter: 0,
            corr_vector: build_vector(&vec![0; self.dimensions], time.seconds),
            score_timestamp: time.score_timestamp,
            root: false,
        };

        timed(self.timeout, self.index.upsert_record(&record))
            .await
            .map_err(|e| CorrelationError::store("orphan record write", e))?;

        tracing::debug!(finding = %finding.id, log_type = %detector_type, "Orphan finding recorded");
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{RuleQuery, ScoreAnchor};
    use crate::store::MemoryStore;

    fn finding(id: &str, log_type: &str, timestamp: i64) -> Finding {
        Finding {
            id: id.to_string(),
            monitor_id: format!("{log_type}-monitor"),
            timestamp,
            log_type: log_type.to_string(),
            related_fields: Default::default(),
        }
    }

    fn rule(id: &str, dimension: usize) -> CorrelationRule {
        CorrelationRule {
            id: id.to_string(),
            name: id.to_string(),
            dimension,
            time_window_ms: None,
            queries: vec![
                RuleQuery { log_type: "a".into(), field: None, conditions: vec![] },
                RuleQuery { log_type: "b".into(), field: None, conditions: vec![] },
            ],
            trigger: None,
        }
    }

    fn time() -> TimeFeature {
        TimeFeature::new(&ScoreAnchor::advanced(0), 1_050)
    }

    fn engine(index: Arc<MemoryStore>) -> VectorEmbeddings {
        VectorEmbeddings::new(index, 4, Duration::from_secs(1))
    }

    #[test]
    fn test_vector_is_deterministic() {
        let a = build_vector(&[1, 0, 2], 12.5);
        let b = build_vector(&[1, 0, 2], 12.5);

        assert_eq!(a, b);
        assert_eq!(a, vec![-24.0, -25.0, -23.0, 12.5]);
        assert_eq!(counts_of(&a, 3), vec![1, 0, 2]);
        assert_eq!(time_slot(&a), 12.5);
    }

    #[tokio::test]
    async fn test_pair_record_orientation() {
        let index = Arc::new(MemoryStore::with_schema());
        let vectors = engine(index.clone());
        let f1 = finding("f1", "a", 1_000);
        let f2 = finding("f2", "b", 1_050);

        let insert = vectors
            .insert_correlated_findings("b", &f2, &f1, &rule("r1", 0), time())
            .await
            .unwrap();

        let record = insert.record;
        assert_eq!(record.finding1, "f1");
        assert_eq!(record.finding2, "f2");
        assert_eq!(record.log_type, "a-b");
        assert_eq!(record.timestamp, 1_050);
        assert_eq!(record.corr_rules, BTreeSet::from(["r1".to_string()]));
        assert_eq!(record.corr_vector.len(), 5);
        assert_eq!(record.corr_vector[0], -24.0);
        assert_eq!(record.corr_vector[4], 1.05);
    }

    #[tokio::test]
    async fn test_same_rule_twice_is_idempotent() {
        let index = Arc::new(MemoryStore::with_schema());
        let vectors = engine(index.clone());
        let f1 = finding("f1", "a", 1_000);
        let f2 = finding("f2", "b", 1_050);
        let r1 = rule("r1", 0);

        vectors.insert_correlated_findings("b", &f2, &f1, &r1, time()).await.unwrap();
        let again = vectors.insert_correlated_findings("b", &f2, &f1, &r1, time()).await.unwrap();

        assert!(!again.rule_added);
        assert_eq!(again.record.corr_rules.len(), 1);
        assert_eq!(again.record.counter, 1);
        assert_eq!(index.record_count().await, 1);
    }

    #[tokio::test]
    async fn test_second_rule_extends_existing_pair() {
        let index = Arc::new(MemoryStore::with_schema());
        let vectors = engine(index.clone());
        let f1 = finding("f1", "a", 1_000);
        let f2 = finding("f2", "b", 1_050);

        let first = vectors
            .insert_correlated_findings("b", &f2, &f1, &rule("r1", 0), time())
            .await
            .unwrap();
        let second = vectors
            .insert_correlated_findings("b", &f2, &f1, &rule("r2", 2), time())
            .await
            .unwrap();

        assert!(second.rule_added);
        assert_eq!(second.record.id, first.record.id);
        assert_eq!(second.record.corr_rules.len(), 2);
        assert_eq!(second.record.counter, 2);
        assert_eq!(counts_of(&second.record.corr_vector, 4), vec![1, 0, 1, 0]);
        assert_eq!(index.record_count().await, 1);
    }

    #[tokio::test]
    async fn test_orphan_record_has_one_empty_side() {
        let index = Arc::new(MemoryStore::with_schema());
        let vectors = engine(index.clone());
        let f1 = finding("f1", "a", 1_000);

        let orphan = vectors.insert_orphan_finding("a", &f1, time()).await.unwrap();
        let again = vectors.insert_orphan_finding("a", &f1, time()).await.unwrap();

        assert!(orphan.is_orphan());
        assert_eq!(orphan.finding1, "f1");
        assert!(orphan.finding2.is_empty());
        assert!(orphan.corr_rules.is_empty());
        assert_eq!(again.id, orphan.id);
        assert_eq!(index.record_count().await, 1);
    }

    #[tokio::test]
    async fn test_rejects_dimension_outside_vector() {
        let index = Arc::new(MemoryStore::with_schema());
        let vectors = engine(index);
        let f1 = finding("f1", "a", 1_000);
        let f2 = finding("f2", "b", 1_050);

        let err = vectors
            .insert_correlated_findings("b", &f2, &f1, &rule("r9", 4), time())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Validation);
    }
}
