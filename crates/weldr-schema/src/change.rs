use crate::blueprint::Blueprint;
use crate::types::CommitId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One committed version of a blueprint in its change log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Change {
    pub commit: CommitId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<CommitId>,
    pub message: String,
    #[serde(default)]
    pub revision: Option<u32>,
    pub timestamp: String,
    pub blueprint: Blueprint,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// The view of a [`Change`] returned by the changes route.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSummary {
    pub commit: CommitId,
    pub message: String,
    pub revision: Option<u32>,
    pub timestamp: String,
}

impl From<&Change> for ChangeSummary {
    fn from(change: &Change) -> Self {
        Self {
            commit: change.commit.clone(),
            message: change.message.clone(),
            revision: change.revision,
            timestamp: change.timestamp.clone(),
        }
    }
}
