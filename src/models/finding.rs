//! Finding and detector models
//!
//! Findings are produced by the detection subsystem; the correlator only
//! reads them.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use validator::Validate;

/// A security finding raised against an ingested log event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub id: String,
    pub monitor_id: String,
    /// Absolute event time in epoch milliseconds
    pub timestamp: i64,
    pub log_type: String,
    /// Event attributes extracted by the detector (e.g. `source.ip`)
    #[serde(default)]
    pub related_fields: BTreeMap<String, String>,
}

impl Finding {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.related_fields.get(name).map(String::as_str)
    }
}

/// Detector owning one or more monitors
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detector {
    pub id: String,
    pub detector_type: String,
    pub monitor_ids: Vec<String>,
}

/// Request body for `POST /api/v1/findings`
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct PublishFindingRequest {
    #[validate(length(min = 1, message = "monitor_id must not be empty"))]
    pub monitor_id: String,
    #[validate(length(min = 1, message = "finding id must not be empty"))]
    pub id: String,
    #[validate(range(min = 0))]
    pub timestamp: i64,
    /// Declared log type, used when no detector owns the monitor
    pub log_type: Option<String>,
    #[serde(default)]
    pub related_fields: BTreeMap<String, String>,
}

/// Equality condition on a finding attribute
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldCondition {
    pub field: String,
    pub value: String,
}

impl FieldCondition {
    pub fn matches(&self, finding: &Finding) -> bool {
        finding.field(&self.field) == Some(self.value.as_str())
    }
}

/// Search over the finding store of a single log type
#[derive(Debug, Clone, PartialEq)]
pub struct FindingQuery {
    pub log_type: String,
    pub start_timestamp: i64,
    pub end_timestamp: i64,
    pub conditions: Vec<FieldCondition>,
    /// Finding to leave out of the result (the trigger itself)
    pub exclude_id: Option<String>,
}

impl FindingQuery {
    pub fn matches(&self, finding: &Finding) -> bool {
        finding.log_type == self.log_type
            && finding.timestamp >= self.start_timestamp
            && finding.timestamp <= self.end_timestamp
            && self.exclude_id.as_deref() != Some(finding.id.as_str())
            && self.conditions.iter().all(|c| c.matches(finding))
    }
}
