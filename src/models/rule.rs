//! Correlation rule model

use serde::{Deserialize, Serialize};

use super::{FieldCondition, Finding};

/// Separator of the compound `type1-type2` log type on correlation records
pub const LOG_TYPE_SEPARATOR: char = '-';

/// One side of a correlation rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleQuery {
    pub log_type: String,
    /// Join field: both findings must carry the same value for it
    #[serde(default)]
    pub field: Option<String>,
    #[serde(default)]
    pub conditions: Vec<FieldCondition>,
}

impl RuleQuery {
    pub fn accepts(&self, finding: &Finding) -> bool {
        finding.log_type == self.log_type && self.conditions.iter().all(|c| c.matches(finding))
    }
}

/// Alert raised when a rule produces a real pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleTrigger {
    pub name: String,
    #[serde(default = "default_severity")]
    pub severity: String,
}

fn default_severity() -> String {
    "medium".to_string()
}

/// Correlation rule: which log types may correlate and under what predicate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationRule {
    pub id: String,
    pub name: String,
    /// Counter slot of this rule in `corr_vector`
    pub dimension: usize,
    /// Join window override in milliseconds
    #[serde(default)]
    pub time_window_ms: Option<i64>,
    pub queries: Vec<RuleQuery>,
    #[serde(default)]
    pub trigger: Option<RuleTrigger>,
}

impl CorrelationRule {
    pub fn involves(&self, log_type: &str) -> bool {
        self.queries.iter().any(|q| q.log_type == log_type)
    }

    /// Queries on log types other than `log_type`
    pub fn other_queries<'a>(&'a self, log_type: &'a str) -> impl Iterator<Item = &'a RuleQuery> + 'a {
        self.queries.iter().filter(move |q| q.log_type != log_type)
    }

    pub fn window_ms(&self, default_ms: i64) -> i64 {
        self.time_window_ms.unwrap_or(default_ms)
    }
}
