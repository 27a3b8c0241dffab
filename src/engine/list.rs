//! Time-range listing of correlated pairs

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use super::timed;
use crate::error::{AppResult, CorrelationError};
use crate::models::{CorrelationRecord, CorrelationRecordSummary};
use crate::store::{CorrelationIndex, StoreError};

/// One summary per unordered pair; a later row for the same pair replaces
/// the earlier one in place.
pub fn dedup_pairs(records: Vec<CorrelationRecord>) -> Vec<CorrelationRecordSummary> {
    let mut positions: HashMap<(String, String), usize> = HashMap::new();
    let mut summaries: Vec<CorrelationRecordSummary> = Vec::new();

    for record in records {
        match positions.get(&record.pair_key()) {
            Some(&i) => summaries[i] = record.summary(),
            None => {
                positions.insert(record.pair_key(), summaries.len());
                summaries.push(record.summary());
            }
        }
    }
    summaries
}

pub struct CorrelationLister {
    index: Arc<dyn CorrelationIndex>,
    timeout: Duration,
}

impl CorrelationLister {
    pub fn new(index: Arc<dyn CorrelationIndex>, timeout: Duration) -> Self {
        Self { index, timeout }
    }

    pub async fn list_correlated(
        &self,
        start_timestamp: i64,
        end_timestamp: i64,
    ) -> AppResult<Vec<CorrelationRecordSummary>> {
        if start_timestamp > end_timestamp {
            return Err(CorrelationError::Validation(format!(
                "start_timestamp {start_timestamp} is after end_timestamp {end_timestamp}"
            )));
        }

        match timed(self.timeout, self.index.scan_pairs(start_timestamp, end_timestamp)).await {
            Ok(records) => Ok(dedup_pairs(records)),
            Err(StoreError::IndexNotFound(_)) => Ok(Vec::new()),
            Err(e) => Err(CorrelationError::store("correlation list", e)),
        }
    }
}
