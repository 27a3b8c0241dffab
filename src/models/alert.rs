//! Correlation alert model

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AlertState {
    Active,
    Acknowledged,
}

impl AlertState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertState::Active => "ACTIVE",
            AlertState::Acknowledged => "ACKNOWLEDGED",
        }
    }
}

impl fmt::Display for AlertState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown alert state '{0}'")]
pub struct UnknownAlertState(String);

impl TryFrom<String> for AlertState {
    type Error = UnknownAlertState;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "ACTIVE" => Ok(AlertState::Active),
            "ACKNOWLEDGED" => Ok(AlertState::Acknowledged),
            _ => Err(UnknownAlertState(value)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct CorrelationAlert {
    pub id: Uuid,
    pub correlation_rule_id: String,
    pub correlation_rule_name: String,
    pub finding_ids: Vec<String>,
    #[sqlx(try_from = "String")]
    pub state: AlertState,
    pub severity: String,
    pub start_time: DateTime<Utc>,
    pub acknowledged_at: Option<DateTime<Utc>>,
}

impl CorrelationAlert {
    pub fn new(rule_id: &str, rule_name: &str, finding_ids: Vec<String>, severity: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            correlation_rule_id: rule_id.to_string(),
            correlation_rule_name: rule_name.to_string(),
            finding_ids,
            state: AlertState::Active,
            severity: severity.to_string(),
            start_time: Utc::now(),
            acknowledged_at: None,
        }
    }

    pub fn acknowledge(&mut self) {
        self.state = AlertState::Acknowledged;
        self.acknowledged_at = Some(Utc::now());
    }

    /// Same rule over the same finding set
    pub fn covers(&self, rule_id: &str, finding_ids: &[String]) -> bool {
        self.correlation_rule_id == rule_id
            && self.finding_ids.len() == finding_ids.len()
            && finding_ids.iter().all(|f| self.finding_ids.contains(f))
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct AckAlertsRequest {
    #[validate(length(min = 1, message = "alert ids must not be empty"))]
    pub alert_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AckFailure {
    pub id: String,
    pub reason: String,
}

/// Per-id outcome of an acknowledge batch
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AckAlertsResponse {
    pub acknowledged: Vec<CorrelationAlert>,
    pub failed: Vec<AckFailure>,
}

#[derive(Debug, Deserialize, Default)]
pub struct AlertFilter {
    pub correlation_rule_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ListAlertsResponse {
    pub alerts: Vec<CorrelationAlert>,
    pub total_alerts: usize,
}
