use serde::{Deserialize, Serialize};

use crate::error::NeedScoopError;

/// Where a cluster's result set sits in the analysis lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterState {
    Detected,
    Embedded,
    Clustered,
    Scored,
    Ranked,
    /// The corpus gained embeddings after this result was computed.
    Stale,
}

impl ClusterState {
    pub fn can_transition_to(self, next: ClusterState) -> bool {
        use ClusterState::*;
        matches!(
            (self, next),
            (Detected, Embedded)
                | (Embedded, Clustered)
                | (Clustered, Scored)
                | (Scored, Ranked)
                | (Embedded | Clustered | Scored | Ranked, Stale)
                | (Stale, Clustered)
        )
    }

    pub fn transition(self, next: ClusterState) -> Result<ClusterState, NeedScoopError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(NeedScoopError::Validation(format!(
                "illegal cluster state transition {self:?} -> {next:?}"
            )))
        }
    }
}
