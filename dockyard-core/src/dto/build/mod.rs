//! Build DTOs

use serde::{Deserialize, Serialize};

use crate::domain::build::BuildId;

/// Response to an accepted deploy request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployResponse {
    pub build_id: BuildId,
    pub message: String,
    /// Path to subscribe to the build's log stream
    pub logs_url: String,
}

impl DeployResponse {
    pub fn accepted(build_id: BuildId) -> Self {
        Self {
            build_id,
            message: "Deployment started".to_string(),
            logs_url: format!("/logs/{}", build_id),
        }
    }
}
