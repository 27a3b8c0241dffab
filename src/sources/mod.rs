//! Collaborator interfaces consumed by the correlation engine
//!
//! Detector lookup, the finding store and rule configuration live outside
//! the correlator; these traits are the only way it reaches them.

pub mod catalog;

use async_trait::async_trait;

use crate::models::{CorrelationRule, Detector, Finding, FindingQuery};
use crate::store::StoreResult;

pub use catalog::{Catalog, CatalogError, CatalogFile};

#[async_trait]
pub trait FindingSource: Send + Sync {
    async fn get_detector_by_monitor_id(&self, monitor_id: &str) -> StoreResult<Option<Detector>>;

    async fn get_finding(&self, id: &str) -> StoreResult<Option<Finding>>;

    async fn search_findings(&self, query: &FindingQuery) -> StoreResult<Vec<Finding>>;

    async fn publish_finding(&self, finding: &Finding) -> StoreResult<()>;
}

#[async_trait]
pub trait RuleSource: Send + Sync {
    /// Rules with a query on `log_type`
    async fn list_rules(&self, log_type: &str) -> StoreResult<Vec<CorrelationRule>>;
}
