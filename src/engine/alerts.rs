//! Correlation alerts: raising on new pairs, acknowledging, listing

use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use super::timed;
use crate::error::{AppResult, CorrelationError};
use crate::models::{AckAlertsResponse, AckFailure, AlertState, CorrelationAlert, CorrelationRule};
use crate::store::{CorrelationIndex, StoreError};

pub struct AlertService {
    index: Arc<dyn CorrelationIndex>,
    timeout: Duration,
}

impl AlertService {
    pub fn new(index: Arc<dyn CorrelationIndex>, timeout: Duration) -> Self {
        Self { index, timeout }
    }

    /// Raise an alert for a pair recorded under a rule with a trigger.
    /// At most one alert per rule and finding set.
    pub async fn raise_for_pair(
        &self,
        rule: &CorrelationRule,
        finding_ids: Vec<String>,
    ) -> AppResult<Option<CorrelationAlert>> {
        let Some(trigger) = &rule.trigger else {
            return Ok(None);
        };

        let existing = timed(self.timeout, self.index.list_alerts(Some(&rule.id)))
            .await
            .map_err(|e| CorrelationError::store("correlation alert lookup", e))?;
        if existing.iter().any(|a| a.covers(&rule.id, &finding_ids)) {
            return Ok(None);
        }

        let alert = CorrelationAlert::new(&rule.id, &trigger.name, finding_ids, &trigger.severity);
        timed(self.timeout, self.index.put_alert(&alert))
            .await
            .map_err(|e| CorrelationError::store("correlation alert write", e))?;

        tracing::info!(
            alert = %alert.id,
            rule = %rule.id,
            severity = %alert.severity,
            "Correlation alert raised"
        );
        Ok(Some(alert))
    }

    /// ACTIVE -> ACKNOWLEDGED for every id found. Unknown or malformed ids
    /// are per-id failures; only a timeout fails the whole batch.
    pub async fn acknowledge(&self, alert_ids: &[String]) -> AppResult<AckAlertsResponse> {
        if alert_ids.is_empty() {
            return Err(CorrelationError::Validation("alert ids must not be empty".to_string()));
        }

        let mut response = AckAlertsResponse::default();
        for raw_id in alert_ids {
            match self.acknowledge_one(raw_id).await {
                Ok(alert) => response.acknowledged.push(alert),
                Err(CorrelationError::Timeout { operation }) => {
                    return Err(CorrelationError::Timeout { operation });
                }
                Err(e) => {
                    tracing::warn!(alert = %raw_id, "Alert acknowledge failed: {}", e);
                    response.failed.push(AckFailure {
                        id: raw_id.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        tracing::info!(
            acknowledged = response.acknowledged.len(),
            failed = response.failed.len(),
            "Correlation alerts acknowledged"
        );
        Ok(response)
    }

    async fn acknowledge_one(&self, raw_id: &str) -> AppResult<CorrelationAlert> {
        let id = Uuid::parse_str(raw_id)
            .map_err(|_| CorrelationError::NotFound(format!("alert {raw_id}")))?;

        let alert = match timed(self.timeout, self.index.get_alert(id)).await {
            Ok(alert) => alert,
            Err(StoreError::IndexNotFound(_)) => None,
            Err(e) => return Err(CorrelationError::store("correlation alert lookup", e)),
        };
        let mut alert = alert.ok_or_else(|| CorrelationError::NotFound(format!("alert {raw_id}")))?;

        if alert.state == AlertState::Acknowledged {
            return Ok(alert);
        }
        alert.acknowledge();
        timed(self.timeout, self.index.put_alert(&alert))
            .await
            .map_err(|e| CorrelationError::store("correlation alert write", e))?;
        Ok(alert)
    }

    pub async fn list(&self, rule_id: Option<&str>) -> AppResult<Vec<CorrelationAlert>> {
        match timed(self.timeout, self.index.list_alerts(rule_id)).await {
            Ok(alerts) => Ok(alerts),
            Err(StoreError::IndexNotFound(_)) => Ok(Vec::new()),
            Err(e) => Err(CorrelationError::store("correlation alert list", e)),
        }
    }
}
