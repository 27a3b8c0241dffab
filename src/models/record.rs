//! Correlation history record model

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::rule::LOG_TYPE_SEPARATOR;

/// Empty side of an orphan record
pub const ORPHAN_SENTINEL: &str = "";

/// One row of the correlation history index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationRecord {
    pub id: Uuid,
    pub finding1: String,
    pub finding2: String,
    /// Compound `type1-type2` for pairs, the bare log type for orphans
    pub log_type: String,
    pub corr_rules: BTreeSet<String>,
    /// Triggering finding time, epoch milliseconds
    pub timestamp: i64,
    /// Number of distinct rules that justified the pairing
    pub counter: i64,
    pub corr_vector: Vec<f32>,
    /// Anchor the time feature was computed against
    pub score_timestamp: i64,
    pub root: bool,
}

impl CorrelationRecord {
    pub fn is_orphan(&self) -> bool {
        self.finding1.is_empty() || self.finding2.is_empty()
    }

    pub fn involves(&self, finding_id: &str) -> bool {
        self.finding1 == finding_id || self.finding2 == finding_id
    }

    /// Log types of `finding1` and `finding2`
    pub fn log_types(&self) -> (&str, &str) {
        match self.log_type.split_once(LOG_TYPE_SEPARATOR) {
            Some((first, second)) => (first, second),
            None => (self.log_type.as_str(), ""),
        }
    }

    /// Order-insensitive identity of the pair
    pub fn pair_key(&self) -> (String, String) {
        if self.finding1 <= self.finding2 {
            (self.finding1.clone(), self.finding2.clone())
        } else {
            (self.finding2.clone(), self.finding1.clone())
        }
    }

    pub fn summary(&self) -> CorrelationRecordSummary {
        let (log_type1, log_type2) = self.log_types();
        CorrelationRecordSummary {
            finding1: self.finding1.clone(),
            log_type1: log_type1.to_string(),
            finding2: self.finding2.clone(),
            log_type2: log_type2.to_string(),
            correlation_rules: self.corr_rules.iter().cloned().collect(),
            timestamp: self.timestamp,
        }
    }
}

pub fn compound_log_type(first: &str, second: &str) -> String {
    format!("{first}{LOG_TYPE_SEPARATOR}{second}")
}

/// Row of `listCorrelations`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationRecordSummary {
    pub finding1: String,
    pub log_type1: String,
    pub finding2: String,
    pub log_type2: String,
    pub correlation_rules: Vec<String>,
    pub timestamp: i64,
}

/// Row of `searchCorrelations`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FindingWithScore {
    pub finding: String,
    pub detector_type: String,
    pub score: f32,
    pub rules: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListCorrelationsQuery {
    pub start_timestamp: i64,
    pub end_timestamp: i64,
}

#[derive(Debug, Serialize)]
pub struct ListCorrelationsResponse {
    pub findings: Vec<CorrelationRecordSummary>,
}

#[derive(Debug, Deserialize)]
pub struct SearchCorrelationsQuery {
    pub finding: String,
    pub detector_type: String,
    pub time_window: Option<i64>,
    pub nearby_findings: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct SearchCorrelationsResponse {
    pub findings: Vec<FindingWithScore>,
}
