//! Correlation list / search handlers

use axum::{extract::{State, Query}, Json};

use crate::{AppState, AppResult};
use crate::models::{
    ListCorrelationsQuery, ListCorrelationsResponse,
    SearchCorrelationsQuery, SearchCorrelationsResponse,
};

/// List correlated pairs in a time range
pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<ListCorrelationsQuery>,
) -> AppResult<Json<ListCorrelationsResponse>> {
    let findings = state
        .service
        .list_correlations(query.start_timestamp, query.end_timestamp)
        .await?;
    Ok(Json(ListCorrelationsResponse { findings }))
}

/// Findings correlated with one finding
pub async fn search(
    State(state): State<AppState>,
    Query(query): Query<SearchCorrelationsQuery>,
) -> AppResult<Json<SearchCorrelationsResponse>> {
    let findings = state
        .service
        .search_correlations(
            &query.finding,
            &query.detector_type,
            query.time_window,
            query.nearby_findings,
        )
        .await?;
    Ok(Json(SearchCorrelationsResponse { findings }))
}
