//! Correlation service - entry points exposed to collaborators

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use uuid::Uuid;

use super::alerts::AlertService;
use super::anchor::{AnchorStore, TimeFeature};
use super::completion::{completion, Pending};
use super::join::{has_matches, matched_ids, JoinEngine};
use super::list::CorrelationLister;
use super::search::Aggregator;
use super::timed;
use super::vector::VectorEmbeddings;
use crate::config::EngineSettings;
use crate::error::{AppResult, CorrelationError};
use crate::models::{
    AckAlertsResponse, CorrelationAlert, CorrelationRecordSummary, Finding, FindingWithScore,
};
use crate::sources::{FindingSource, RuleSource};
use crate::store::{CorrelationIndex, SchemaStatus};

/// What one finding ingestion wrote
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestOutcome {
    pub finding: String,
    pub detector_type: String,
    pub orphan: bool,
    /// Rule id to correlated finding ids
    pub correlations: BTreeMap<String, Vec<String>>,
    pub records: Vec<Uuid>,
    pub alerts: Vec<Uuid>,
    pub score_timestamp: i64,
}

pub struct CorrelationService {
    index: Arc<dyn CorrelationIndex>,
    findings: Arc<dyn FindingSource>,
    anchors: Arc<AnchorStore>,
    join: JoinEngine,
    vectors: VectorEmbeddings,
    aggregator: Aggregator,
    lister: CorrelationLister,
    alerts: AlertService,
    settings: EngineSettings,
}

impl CorrelationService {
    pub fn new(
        index: Arc<dyn CorrelationIndex>,
        findings: Arc<dyn FindingSource>,
        rules: Arc<dyn RuleSource>,
        settings: EngineSettings,
    ) -> Self {
        let timeout = settings.storage_timeout;
        let anchors = Arc::new(AnchorStore::new(
            index.clone(),
            settings.historical_interval_ms(),
            timeout,
        ));

        Self {
            join: JoinEngine::new(findings.clone(), rules, settings.time_window_ms, timeout),
            vectors: VectorEmbeddings::new(index.clone(), settings.vector_dimensions, timeout),
            aggregator: Aggregator::new(
                index.clone(),
                findings.clone(),
                anchors.clone(),
                settings.vector_dimensions,
                timeout,
            ),
            lister: CorrelationLister::new(index.clone(), timeout),
            alerts: AlertService::new(index.clone(), timeout),
            index,
            findings,
            anchors,
            settings,
        }
    }

    /// Create the correlation indices when missing
    pub async fn ensure_schema(&self) -> AppResult<SchemaStatus> {
        let status = timed(self.settings.storage_timeout, self.index.ensure_schema())
            .await
            .map_err(|e| CorrelationError::store("schema check", e))?;
        if status == SchemaStatus::Created {
            tracing::info!("Correlation indices created");
        }
        Ok(status)
    }

    /// Entry point for a newly produced finding. The ingestion and its
    /// deadline race for the same completion; the caller sees exactly one
    /// outcome.
    pub fn on_finding_published(
        self: &Arc<Self>,
        monitor_id: String,
        finding: Finding,
    ) -> Pending<AppResult<IngestOutcome>> {
        let (done, pending) = completion();
        let finding_id = finding.id.clone();

        let deadline = self.settings.ingest_timeout;
        let watchdog_done = done.clone();
        let watchdog_finding = finding_id.clone();
        let watchdog = tokio::spawn(async move {
            tokio::time::sleep(deadline).await;
            if watchdog_done.complete(Err(CorrelationError::Timeout {
                operation: format!("ingestion of finding {watchdog_finding}"),
            })) {
                tracing::error!(finding = %watchdog_finding, "Finding ingestion exceeded its deadline");
            }
        });

        let service = Arc::clone(self);
        tokio::spawn(async move {
            let result = service.ingest(&monitor_id, finding).await;
            if let Err(e) = &result {
                tracing::error!(finding = %finding_id, "Finding ingestion failed: {}", e);
            }
            if done.complete(result) {
                watchdog.abort();
            } else {
                tracing::warn!(finding = %finding_id, "Ingestion finished after its deadline");
            }
        });

        pending
    }

    /// Join, anchor and record one finding
    pub async fn ingest(&self, monitor_id: &str, mut finding: Finding) -> AppResult<IngestOutcome> {
        self.ensure_schema().await?;

        let detector_type = self.join.detector_type(monitor_id).await?;
        let known_detector = detector_type.is_some();
        if let Some(detector_type) = detector_type {
            finding.log_type = detector_type;
        }
        if finding.log_type.is_empty() {
            return Err(CorrelationError::Validation(format!(
                "finding {} has no detector and no declared log type",
                finding.id
            )));
        }
        finding.monitor_id = monitor_id.to_string();
        let detector_type = finding.log_type.clone();

        let anchor = self.anchors.get_or_advance(finding.timestamp).await?;
        let time = TimeFeature::new(&anchor, finding.timestamp);

        // Not visible to other joins until the anchor step has succeeded
        timed(self.settings.storage_timeout, self.findings.publish_finding(&finding))
            .await
            .map_err(|e| CorrelationError::store("finding publish", e))?;

        let matches = if known_detector {
            self.join.match_finding(&finding, &detector_type).await?
        } else {
            tracing::debug!(monitor = %monitor_id, "No detector for monitor, finding is an orphan");
            Default::default()
        };

        let mut outcome = IngestOutcome {
            finding: finding.id.clone(),
            detector_type: detector_type.clone(),
            orphan: !has_matches(&matches),
            correlations: matched_ids(&matches),
            records: Vec::new(),
            alerts: Vec::new(),
            score_timestamp: anchor.score_timestamp,
        };

        if outcome.orphan {
            let record = self.vectors.insert_orphan_finding(&detector_type, &finding, time).await?;
            outcome.records.push(record.id);
            return Ok(outcome);
        }

        for rule_match in matches.values() {
            for other in &rule_match.findings {
                let insert = self
                    .vectors
                    .insert_correlated_findings(&detector_type, &finding, other, &rule_match.rule, time)
                    .await?;
                if !outcome.records.contains(&insert.record.id) {
                    outcome.records.push(insert.record.id);
                }
                if insert.rule_added {
                    let pair = vec![insert.record.finding1.clone(), insert.record.finding2.clone()];
                    if let Some(alert) = self.alerts.raise_for_pair(&rule_match.rule, pair).await? {
                        outcome.alerts.push(alert.id);
                    }
                }
            }
        }

        tracing::info!(
            finding = %outcome.finding,
            detector_type = %outcome.detector_type,
            records = outcome.records.len(),
            alerts = outcome.alerts.len(),
            "Finding correlated"
        );
        Ok(outcome)
    }

    pub async fn list_correlations(
        &self,
        start_timestamp: i64,
        end_timestamp: i64,
    ) -> AppResult<Vec<CorrelationRecordSummary>> {
        self.lister.list_correlated(start_timestamp, end_timestamp).await
    }

    pub async fn search_correlations(
        &self,
        finding_id: &str,
        detector_type: &str,
        time_window_ms: Option<i64>,
        limit: Option<usize>,
    ) -> AppResult<Vec<FindingWithScore>> {
        let window = time_window_ms.unwrap_or(self.settings.time_window_ms);
        if window < 0 {
            return Err(CorrelationError::Validation("time_window must not be negative".to_string()));
        }
        let limit = limit.unwrap_or(self.settings.search_limit);
        if limit == 0 {
            return Err(CorrelationError::Validation("nearby_findings must be positive".to_string()));
        }

        self.aggregator
            .find_correlated(finding_id, detector_type, window, limit)
            .await
    }

    pub async fn acknowledge_correlation_alerts(&self, alert_ids: &[String]) -> AppResult<AckAlertsResponse> {
        self.alerts.acknowledge(alert_ids).await
    }

    pub async fn list_correlation_alerts(&self, rule_id: Option<&str>) -> AppResult<Vec<CorrelationAlert>> {
        self.alerts.list(rule_id).await
    }
}
