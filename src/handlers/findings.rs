//! Finding ingestion handler

use axum::{extract::State, Json};
use validator::Validate;

use crate::{AppState, AppResult, CorrelationError};
use crate::engine::IngestOutcome;
use crate::models::{Finding, PublishFindingRequest};

/// Publish a finding and correlate it
pub async fn publish(
    State(state): State<AppState>,
    Json(req): Json<PublishFindingRequest>,
) -> AppResult<Json<IngestOutcome>> {
    req.validate()?;

    let finding = Finding {
        id: req.id,
        monitor_id: req.monitor_id.clone(),
        timestamp: req.timestamp,
        log_type: req.log_type.unwrap_or_default(),
        related_fields: req.related_fields,
    };

    let outcome = state
        .service
        .on_finding_published(req.monitor_id, finding)
        .await
        .map_err(|e| CorrelationError::Internal(e.to_string()))??;

    Ok(Json(outcome))
}
