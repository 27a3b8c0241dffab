//! Correlation alert handlers

use axum::{extract::{State, Query}, Json};
use validator::Validate;

use crate::{AppState, AppResult};
use crate::models::{AckAlertsRequest, AckAlertsResponse, AlertFilter, ListAlertsResponse};

/// List correlation alerts, optionally for one rule
pub async fn list(
    State(state): State<AppState>,
    Query(filter): Query<AlertFilter>,
) -> AppResult<Json<ListAlertsResponse>> {
    let alerts = state
        .service
        .list_correlation_alerts(filter.correlation_rule_id.as_deref())
        .await?;
    Ok(Json(ListAlertsResponse {
        total_alerts: alerts.len(),
        alerts,
    }))
}

/// Acknowledge a batch of alerts
pub async fn acknowledge(
    State(state): State<AppState>,
    Json(req): Json<AckAlertsRequest>,
) -> AppResult<Json<AckAlertsResponse>> {
    req.validate()?;

    let response = state.service.acknowledge_correlation_alerts(&req.alert_ids).await?;
    Ok(Json(response))
}
