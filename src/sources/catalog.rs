//! In-memory detector, rule and finding catalog
//!
//! Loaded from a JSON file (`CATALOG_PATH`):
//!
//! ```json
//! {
//!   "detectors": [{ "id": "d1", "detector_type": "network", "monitor_ids": ["m1"] }],
//!   "rules": [{
//!     "id": "r1", "name": "same source", "dimension": 0,
//!     "queries": [
//!       { "log_type": "network", "field": "source.ip" },
//!       { "log_type": "windows", "field": "source.ip" }
//!     ]
//!   }]
//! }
//! ```

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use super::{FindingSource, RuleSource};
use crate::models::{CorrelationRule, Detector, Finding, FindingQuery, LOG_TYPE_SEPARATOR};
use crate::store::StoreResult;

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerdeError(#[from] serde_json::Error),

    #[error("duplicate correlation rule id '{0}'")]
    DuplicateRule(String),

    #[error("rule '{rule}' uses dimension {dimension}, vectors only have {max} rule dimensions")]
    DimensionOutOfRange { rule: String, dimension: usize, max: usize },

    #[error("invalid log type '{0}': must be non-empty and must not contain '-'")]
    InvalidLogType(String),

    #[error("rule '{0}' needs at least two queries")]
    TooFewQueries(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogFile {
    #[serde(default)]
    pub detectors: Vec<Detector>,
    #[serde(default)]
    pub rules: Vec<CorrelationRule>,
}

fn valid_log_type(log_type: &str) -> bool {
    !log_type.is_empty() && !log_type.contains(LOG_TYPE_SEPARATOR)
}

impl CatalogFile {
    pub fn validate(&self, dimensions: usize) -> Result<(), CatalogError> {
        let mut seen = HashSet::new();
        for rule in &self.rules {
            if !seen.insert(rule.id.as_str()) {
                return Err(CatalogError::DuplicateRule(rule.id.clone()));
            }
            if rule.dimension >= dimensions {
                return Err(CatalogError::DimensionOutOfRange {
                    rule: rule.id.clone(),
                    dimension: rule.dimension,
                    max: dimensions,
                });
            }
            if rule.queries.len() < 2 {
                return Err(CatalogError::TooFewQueries(rule.id.clone()));
            }
            if let Some(q) = rule.queries.iter().find(|q| !valid_log_type(&q.log_type)) {
                return Err(CatalogError::InvalidLogType(q.log_type.clone()));
            }
        }

        match self.detectors.iter().find(|d| !valid_log_type(&d.detector_type)) {
            Some(d) => Err(CatalogError::InvalidLogType(d.detector_type.clone())),
            None => Ok(()),
        }
    }
}

/// Catalog serving detectors, rules and published findings from memory
pub struct Catalog {
    detectors: Vec<Detector>,
    rules: Vec<CorrelationRule>,
    findings: RwLock<Vec<Finding>>,
}

impl Catalog {
    pub fn new(file: CatalogFile, dimensions: usize) -> Result<Self, CatalogError> {
        file.validate(dimensions)?;
        Ok(Self {
            detectors: file.detectors,
            rules: file.rules,
            findings: RwLock::new(Vec::new()),
        })
    }

    pub fn empty() -> Self {
        Self {
            detectors: Vec::new(),
            rules: Vec::new(),
            findings: RwLock::new(Vec::new()),
        }
    }

    /// Load and validate a catalog file
    pub fn load(path: &Path, dimensions: usize) -> Result<Self, CatalogError> {
        let data = fs::read(path)?;
        let file: CatalogFile = serde_json::from_slice(&data)?;
        let catalog = Self::new(file, dimensions)?;

        tracing::info!(
            detectors = catalog.detectors.len(),
            rules = catalog.rules.len(),
            "Correlation catalog loaded from {}",
            path.display()
        );
        Ok(catalog)
    }

    #[cfg(test)]
    pub fn rules(&self) -> &[CorrelationRule] {
        &self.rules
    }
}

#[async_trait]
impl FindingSource for Catalog {
    async fn get_detector_by_monitor_id(&self, monitor_id: &str) -> StoreResult<Option<Detector>> {
        Ok(self
            .detectors
            .iter()
            .find(|d| d.monitor_ids.iter().any(|m| m == monitor_id))
            .cloned())
    }

    async fn get_finding(&self, id: &str) -> StoreResult<Option<Finding>> {
        Ok(self.findings.read().await.iter().find(|f| f.id == id).cloned())
    }

    async fn search_findings(&self, query: &FindingQuery) -> StoreResult<Vec<Finding>> {
        let mut found: Vec<Finding> = self
            .findings
            .read()
            .await
            .iter()
            .filter(|f| query.matches(f))
            .cloned()
            .collect();
        found.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
        Ok(found)
    }

    async fn publish_finding(&self, finding: &Finding) -> StoreResult<()> {
        let mut findings = self.findings.write().await;
        match findings.iter_mut().find(|f| f.id == finding.id) {
            Some(existing) => *existing = finding.clone(),
            None => findings.push(finding.clone()),
        }
        Ok(())
    }
}

#[async_trait]
impl RuleSource for Catalog {
    async fn list_rules(&self, log_type: &str) -> StoreResult<Vec<CorrelationRule>> {
        Ok(self.rules.iter().filter(|r| r.involves(log_type)).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RuleQuery;
    use std::io::Write;

    fn rule(id: &str, dimension: usize, types: &[&str]) -> CorrelationRule {
        CorrelationRule {
            id: id.to_string(),
            name: id.to_string(),
            dimension,
            time_window_ms: None,
            queries: types
                .iter()
                .map(|t| RuleQuery {
                    log_type: t.to_string(),
                    field: None,
                    conditions: vec![],
                })
                .collect(),
            trigger: None,
        }
    }

    #[test]
    fn test_rejects_duplicate_rule_ids() {
        let file = CatalogFile {
            detectors: vec![],
            rules: vec![rule("r1", 0, &["a", "b"]), rule("r1", 1, &["a", "c"])],
        };
        assert!(matches!(file.validate(4), Err(CatalogError::DuplicateRule(id)) if id == "r1"));
    }

    #[test]
    fn test_rejects_dimension_out_of_range() {
        let file = CatalogFile {
            detectors: vec![],
            rules: vec![rule("r1", 4, &["a", "b"])],
        };
        assert!(matches!(
            file.validate(4),
            Err(CatalogError::DimensionOutOfRange { dimension: 4, max: 4, .. })
        ));
    }

    #[test]
    fn test_rejects_separator_in_log_type() {
        let file = CatalogFile {
            detectors: vec![],
            rules: vec![rule("r1", 0, &["cloud-trail", "b"])],
        };
        assert!(matches!(file.validate(4), Err(CatalogError::InvalidLogType(t)) if t == "cloud-trail"));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.json");
        let mut file = fs::File::create(&path).unwrap();
        write!(
            file,
            r#"{{
                "detectors": [{{ "id": "d1", "detector_type": "network", "monitor_ids": ["m1"] }}],
                "rules": [{{
                    "id": "r1", "name": "same source", "dimension": 0,
                    "queries": [
                        {{ "log_type": "network", "field": "source.ip" }},
                        {{ "log_type": "windows", "field": "source.ip" }}
                    ],
                    "trigger": {{ "name": "lateral movement" }}
                }}]
            }}"#
        )
        .unwrap();

        let catalog = Catalog::load(&path, 10).unwrap();

        assert_eq!(catalog.rules().len(), 1);
        assert_eq!(catalog.rules()[0].trigger.as_ref().unwrap().severity, "medium");
        let detector = tokio_test::block_on(catalog.get_detector_by_monitor_id("m1")).unwrap();
        assert_eq!(detector.unwrap().detector_type, "network");
        let rules = tokio_test::block_on(catalog.list_rules("windows")).unwrap();
        assert_eq!(rules.len(), 1);
        assert!(tokio_test::block_on(catalog.list_rules("dns")).unwrap().is_empty());
    }
}
