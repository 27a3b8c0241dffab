//! Correlation search / aggregator
//!
//! One probe per correlation row of the finding, all probes sent as a single
//! batch, then merged: best score per correlated finding, rule ids unioned.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use super::anchor::{AnchorStore, TimeFeature};
use super::timed;
use super::vector::{build_vector, counts_of};
use crate::error::{AppResult, CorrelationError};
use crate::models::{CorrelationRecord, Finding, FindingWithScore};
use crate::sources::FindingSource;
use crate::store::{CorrelationIndex, KnnHit, KnnProbe, RecordFilter, StoreError};

/// Accumulated evidence for one correlated finding
#[derive(Debug, Clone, PartialEq)]
struct Merged {
    score: f32,
    rules: BTreeSet<String>,
}

/// Merge probe hits into one entry per `(finding, log type)`, skipping the
/// searched finding itself and empty orphan sides.
pub fn merge_hits<'a, I>(finding_id: &str, hits: I) -> Vec<FindingWithScore>
where
    I: IntoIterator<Item = &'a KnnHit>,
{
    let mut merged: BTreeMap<(String, String), Merged> = BTreeMap::new();

    for hit in hits {
        let record = &hit.record;
        let (log_type1, log_type2) = record.log_types();
        for (other, log_type) in [(&record.finding1, log_type1), (&record.finding2, log_type2)] {
            if other.is_empty() || other == finding_id {
                continue;
            }
            merged
                .entry((other.clone(), log_type.to_string()))
                .and_modify(|m| {
                    m.score = m.score.max(hit.score);
                    m.rules.extend(record.corr_rules.iter().cloned());
                })
                .or_insert_with(|| Merged {
                    score: hit.score,
                    rules: record.corr_rules.clone(),
                });
        }
    }

    let mut findings: Vec<FindingWithScore> = merged
        .into_iter()
        .map(|((finding, detector_type), m)| FindingWithScore {
            finding,
            detector_type,
            score: m.score,
            rules: m.rules.into_iter().collect(),
        })
        .collect();
    findings.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.finding.cmp(&b.finding))
    });
    findings
}

pub struct Aggregator {
    index: Arc<dyn CorrelationIndex>,
    findings: Arc<dyn FindingSource>,
    anchors: Arc<AnchorStore>,
    dimensions: usize,
    timeout: Duration,
}

impl Aggregator {
    pub fn new(
        index: Arc<dyn CorrelationIndex>,
        findings: Arc<dyn FindingSource>,
        anchors: Arc<AnchorStore>,
        dimensions: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            index,
            findings,
            anchors,
            dimensions,
            timeout,
        }
    }

    async fn lookup_finding(&self, finding_id: &str) -> AppResult<Option<Finding>> {
        match timed(self.timeout, self.findings.get_finding(finding_id)).await {
            Ok(Some(finding)) => Ok(Some(finding)),
            Ok(None) => Err(CorrelationError::NotFound(format!("finding {finding_id}"))),
            Err(StoreError::IndexNotFound(_)) => Ok(None),
            Err(e) => Err(CorrelationError::store("finding lookup", e)),
        }
    }

    fn probe(&self, row: &CorrelationRecord, time: TimeFeature, filter: &RecordFilter, limit: usize) -> KnnProbe {
        let counts = counts_of(&row.corr_vector, self.dimensions);
        KnnProbe {
            vector: build_vector(&counts, time.seconds),
            k: limit,
            filter: filter.clone(),
        }
    }

    /// Findings correlated with `finding_id` within `time_window_ms` of it,
    /// best score first.
    pub async fn find_correlated(
        &self,
        finding_id: &str,
        detector_type: &str,
        time_window_ms: i64,
        limit: usize,
    ) -> AppResult<Vec<FindingWithScore>> {
        let Some(finding) = self.lookup_finding(finding_id).await? else {
            return Ok(Vec::new());
        };
        if finding.log_type != detector_type {
            return Err(CorrelationError::Validation(format!(
                "finding {finding_id} is of type {}, not {detector_type}",
                finding.log_type
            )));
        }

        let anchor = match self.anchors.current().await {
            Ok(anchor) => anchor,
            Err(CorrelationError::Store { source: StoreError::IndexNotFound(_), .. }) => {
                return Ok(Vec::new())
            }
            Err(e) => return Err(e),
        };

        let rows = match timed(self.timeout, self.index.records_for_finding(finding_id)).await {
            Ok(rows) => rows,
            Err(StoreError::IndexNotFound(_)) => return Ok(Vec::new()),
            Err(e) => return Err(CorrelationError::store("correlation history lookup", e)),
        };
        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let time = TimeFeature::new(&anchor, finding.timestamp);
        let filter = RecordFilter {
            start_timestamp: finding.timestamp.saturating_sub(time_window_ms),
            end_timestamp: finding.timestamp.saturating_add(time_window_ms),
            exclude_orphans: true,
        };
        let probes: Vec<KnnProbe> = rows.iter().map(|row| self.probe(row, time, &filter, limit)).collect();

        let responses = match timed(self.timeout, self.index.multi_knn(&probes)).await {
            Ok(responses) => responses,
            Err(StoreError::IndexNotFound(_)) => return Ok(Vec::new()),
            Err(e) => return Err(CorrelationError::store("correlation multi-search", e)),
        };

        let mut hits: Vec<KnnHit> = Vec::new();
        for (i, response) in responses.into_iter().enumerate() {
            match response {
                Ok(found) => hits.extend(found),
                Err(e @ StoreError::Timeout(_)) => {
                    return Err(CorrelationError::store("correlation multi-search", e));
                }
                Err(e) => {
                    tracing::warn!(finding = %finding_id, probe = i, "Correlation sub-query failed: {}", e);
                }
            }
        }

        let correlated = merge_hits(finding_id, &hits);
        tracing::debug!(
            finding = %finding_id,
            probes = probes.len(),
            hits = hits.len(),
            correlated = correlated.len(),
            "Correlation search finished"
        );
        Ok(correlated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn hit(finding1: &str, finding2: &str, log_type: &str, rules: &[&str], score: f32) -> KnnHit {
        KnnHit {
            record: CorrelationRecord {
                id: Uuid::new_v4(),
                finding1: finding1.to_string(),
                finding2: finding2.to_string(),
                log_type: log_type.to_string(),
                corr_rules: rules.iter().map(|r| r.to_string()).collect(),
                timestamp: 0,
                counter: rules.len() as i64,
                corr_vector: vec![],
                score_timestamp: 0,
                root: false,
            },
            score,
        }
    }

    #[test]
    fn test_merge_takes_max_score_and_rule_union() {
        let hits = vec![
            hit("x", "f", "b-a", &["r1"], 0.4),
            hit("f", "x", "a-b", &["r2"], 0.9),
        ];

        let merged = merge_hits("f", &hits);

        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].finding, "x");
        assert_eq!(merged[0].detector_type, "b");
        assert_eq!(merged[0].score, 0.9);
        assert_eq!(merged[0].rules, vec!["r1".to_string(), "r2".to_string()]);
    }

    #[test]
    fn test_merge_skips_self_and_orphan_sides() {
        let hits = vec![
            hit("f", "", "a", &[], 1.0),
            hit("y", "z", "b-c", &["r3"], 0.5),
            hit("f", "w", "a-d", &["r1"], 0.7),
        ];

        let merged = merge_hits("f", &hits);
        let ids: Vec<&str> = merged.iter().map(|m| m.finding.as_str()).collect();

        assert_eq!(ids, vec!["w", "y", "z"]);
        assert_eq!(merged[1].detector_type, "b");
        assert_eq!(merged[2].detector_type, "c");
    }

    #[test]
    fn test_merge_orders_by_score_then_id() {
        let hits = vec![
            hit("f", "b", "a-t", &["r1"], 0.5),
            hit("f", "a", "a-t", &["r1"], 0.5),
            hit("f", "c", "a-t", &["r1"], 0.8),
        ];

        let ids: Vec<String> = merge_hits("f", &hits).into_iter().map(|m| m.finding).collect();

        assert_eq!(ids, vec!["c", "a", "b"]);
    }
}
