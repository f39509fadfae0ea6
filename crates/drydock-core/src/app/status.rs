//! Status - サービスの状態スナップショット

use serde::{Deserialize, Serialize};

use crate::app::lifecycle::LifecycleState;
use crate::domain::{Build, BuildStatus};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildCounts {
    pub queued: usize,
    pub building: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub canceled: usize,
}

impl BuildCounts {
    pub fn from_builds(builds: &[Build]) -> Self {
        let mut counts = Self::default();
        for build in builds {
            match build.status {
                BuildStatus::Queued => counts.queued += 1,
                BuildStatus::Building => counts.building += 1,
                BuildStatus::Succeeded => counts.succeeded += 1,
                BuildStatus::Failed => counts.failed += 1,
                BuildStatus::Canceled => counts.canceled += 1,
            }
        }
        counts
    }
}

/// ServiceStatus は運用者向けの説明
///
/// # 使用例
/// ```ignore
/// let status = service.status().await?;
/// println!("{}", serde_json::to_string_pretty(&status)?);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub lifecycle: LifecycleState,
    pub members: usize,
    pub self_index: Option<usize>,
    pub leader: bool,
    pub neighbors: Vec<String>,
    pub builds: BuildCounts,
}
