//! Score anchor model

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Rolling zero point for the time feature of correlation vectors.
///
/// The bootstrap document is the `root` one (score timestamp 0). Every
/// advance writes a new document with `root = false`; the authoritative
/// anchor is the one with the highest `score_timestamp`, older ones are kept
/// as history for the rolling index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreAnchor {
    pub id: Uuid,
    /// Epoch milliseconds
    pub score_timestamp: i64,
    pub root: bool,
}

impl ScoreAnchor {
    pub fn root() -> Self {
        Self {
            id: Uuid::new_v4(),
            score_timestamp: 0,
            root: true,
        }
    }

    pub fn advanced(score_timestamp: i64) -> Self {
        Self {
            id: Uuid::new_v4(),
            score_timestamp,
            root: false,
        }
    }

    /// Seconds elapsed between the anchor and `timestamp`
    pub fn time_feature(&self, timestamp: i64) -> f32 {
        timestamp.saturating_sub(self.score_timestamp) as f32 / 1000.0
    }
}
