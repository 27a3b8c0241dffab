//! Correlation engine
//!
//! ```text
//!  finding ──► JoinEngine ──► VectorEmbeddings ──► correlation history
//!                  │                 ▲                     │
//!                  └── AnchorStore ──┘                     ▼
//!  search / list / ack ◄──────────── Aggregator, Lister, AlertService
//! ```

pub mod alerts;
pub mod anchor;
pub mod completion;
pub mod join;
pub mod list;
pub mod search;
pub mod service;
pub mod vector;


use std::future::Future;
use std::time::Duration;

use crate::store::{StoreError, StoreResult};

pub use service::{CorrelationService, IngestOutcome};

/// Run a storage call under its deadline
pub(crate) async fn timed<T, F>(deadline: Duration, call: F) -> StoreResult<T>
where
    F: Future<Output = StoreResult<T>>,
{
    match tokio::time::timeout(deadline, call).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Timeout(deadline.as_millis() as u64)),
    }
}
