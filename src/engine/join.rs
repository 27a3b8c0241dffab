//! Join engine
//!
//! Decides which other findings a new finding correlates with. Rules are
//! evaluated independently, so one finding may pair with several others
//! under different rules; the result stays keyed by rule id.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use super::timed;
use crate::error::{AppResult, CorrelationError};
use crate::models::{CorrelationRule, FieldCondition, Finding, FindingQuery, RuleQuery};
use crate::sources::{FindingSource, RuleSource};
use crate::store::StoreError;

/// Findings matched under one rule
#[derive(Debug, Clone, PartialEq)]
pub struct RuleMatch {
    pub rule: CorrelationRule,
    pub findings: Vec<Finding>,
}

/// Rule id to matched findings; an empty list is an orphan under that rule
pub type JoinResult = BTreeMap<String, RuleMatch>;

pub fn matched_ids(result: &JoinResult) -> BTreeMap<String, Vec<String>> {
    result
        .iter()
        .map(|(rule_id, m)| (rule_id.clone(), m.findings.iter().map(|f| f.id.clone()).collect()))
        .collect()
}

pub fn has_matches(result: &JoinResult) -> bool {
    result.values().any(|m| !m.findings.is_empty())
}

pub struct JoinEngine {
    findings: Arc<dyn FindingSource>,
    rules: Arc<dyn RuleSource>,
    default_window_ms: i64,
    timeout: Duration,
}

impl JoinEngine {
    pub fn new(
        findings: Arc<dyn FindingSource>,
        rules: Arc<dyn RuleSource>,
        default_window_ms: i64,
        timeout: Duration,
    ) -> Self {
        Self {
            findings,
            rules,
            default_window_ms,
            timeout,
        }
    }

    /// Detector type of the monitor that raised the finding. `None` when no
    /// detector owns the monitor or the detector index is missing.
    pub async fn detector_type(&self, monitor_id: &str) -> AppResult<Option<String>> {
        match timed(self.timeout, self.findings.get_detector_by_monitor_id(monitor_id)).await {
            Ok(detector) => Ok(detector.map(|d| d.detector_type)),
            Err(StoreError::IndexNotFound(_)) => Ok(None),
            Err(e) => Err(CorrelationError::store("detector lookup", e)),
        }
    }

    /// Match `finding` against every rule involving `detector_type`
    pub async fn match_finding(&self, finding: &Finding, detector_type: &str) -> AppResult<JoinResult> {
        let rules = timed(self.timeout, self.rules.list_rules(detector_type))
            .await
            .map_err(|e| CorrelationError::store("correlation rule lookup", e))?;

        let mut result = JoinResult::new();
        for rule in rules {
            let findings = self.match_rule(finding, detector_type, &rule).await?;
            tracing::debug!(
                finding = %finding.id,
                rule = %rule.id,
                matches = findings.len(),
                "Correlation rule evaluated"
            );
            result.insert(rule.id.clone(), RuleMatch { rule, findings });
        }
        Ok(result)
    }

    async fn match_rule(
        &self,
        finding: &Finding,
        detector_type: &str,
        rule: &CorrelationRule,
    ) -> AppResult<Vec<Finding>> {
        let window = rule.window_ms(self.default_window_ms);
        let mut matched: Vec<Finding> = Vec::new();

        for own in rule.queries.iter().filter(|q| q.log_type == detector_type) {
            if !own.accepts(finding) {
                continue;
            }
            for other in rule.other_queries(detector_type) {
                let Some(query) = candidate_query(finding, own, other, window) else {
                    continue;
                };
                let found = match timed(self.timeout, self.findings.search_findings(&query)).await {
                    Ok(found) => found,
                    Err(StoreError::IndexNotFound(index)) => {
                        tracing::debug!(index = %index, "Finding index missing, no candidates");
                        Vec::new()
                    }
                    Err(e) => return Err(CorrelationError::store("candidate finding search", e)),
                };
                for candidate in found {
                    if !matched.iter().any(|f| f.id == candidate.id) {
                        matched.push(candidate);
                    }
                }
            }
        }
        Ok(matched)
    }
}

/// Query for findings of `other.log_type` that pair with `finding`. `None`
/// when the join field is required but the finding does not carry it.
fn candidate_query(finding: &Finding, own: &RuleQuery, other: &RuleQuery, window_ms: i64) -> Option<FindingQuery> {
    let mut conditions = other.conditions.clone();

    if let (Some(own_field), Some(other_field)) = (&own.field, &other.field) {
        let value = finding.field(own_field)?;
        conditions.push(FieldCondition {
            field: other_field.clone(),
            value: value.to_string(),
        });
    }

    Some(FindingQuery {
        log_type: other.log_type.clone(),
        start_timestamp: finding.timestamp.saturating_sub(window_ms),
        end_timestamp: finding.timestamp.saturating_add(window_ms),
        conditions,
        exclude_id: Some(finding.id.clone()),
    })
}
