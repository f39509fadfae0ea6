//! Build record and its state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::application::Commit;
use super::ids::{AppId, BuildId};

/// Build status.
///
/// State transitions (forward only):
/// - Queued -> Building -> Succeeded | Failed | Canceled
/// - Queued -> Canceled (superseded before it started)
/// - Queued -> Failed (dispatch gave up on it)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildStatus {
    Queued,
    Building,
    Succeeded,
    Failed,
    Canceled,
}

impl BuildStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            BuildStatus::Succeeded | BuildStatus::Failed | BuildStatus::Canceled
        )
    }

    pub fn can_transition_to(self, next: BuildStatus) -> bool {
        match (self, next) {
            (BuildStatus::Queued, BuildStatus::Building) => true,
            (BuildStatus::Queued, BuildStatus::Canceled | BuildStatus::Failed) => true,
            (BuildStatus::Building, next) => next.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BuildStatus::Queued => "queued",
            BuildStatus::Building => "building",
            BuildStatus::Succeeded => "succeeded",
            BuildStatus::Failed => "failed",
            BuildStatus::Canceled => "canceled",
        };
        f.write_str(s)
    }
}

/// A build of one (application, commit, config hash) tuple.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Build {
    pub id: BuildId,
    pub app_id: AppId,
    pub commit: Commit,
    pub config_hash: String,
    pub status: BuildStatus,

    /// Set by an operator on a terminal build to permit one more attempt.
    pub retriable: bool,

    /// Artifact produced by a succeeded static build.
    pub artifact: Option<String>,

    pub queued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Build {
    pub fn queued(
        id: BuildId,
        app_id: AppId,
        commit: Commit,
        config_hash: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            app_id,
            commit,
            config_hash: config_hash.into(),
            status: BuildStatus::Queued,
            retriable: false,
            artifact: None,
            queued_at: now,
            started_at: None,
            updated_at: None,
            finished_at: None,
        }
    }

    /// Same (commit, config hash) as the given tuple.
    pub fn is_for(&self, commit: &Commit, config_hash: &str) -> bool {
        &self.commit == commit && self.config_hash == config_hash
    }

    /// Apply a status transition, stamping the matching timestamps.
    ///
    /// Returns false (and leaves the record untouched) for a backward or
    /// sideways transition.
    pub fn transition(&mut self, next: BuildStatus, now: DateTime<Utc>) -> bool {
        if !self.status.can_transition_to(next) {
            return false;
        }
        self.status = next;
        self.updated_at = Some(now);
        if next == BuildStatus::Building {
            self.started_at = Some(now);
        }
        if next.is_terminal() {
            self.finished_at = Some(now);
        }
        true
    }

    /// Last time the builder reported progress on this build.
    pub fn last_activity(&self) -> DateTime<Utc> {
        self.updated_at.or(self.started_at).unwrap_or(self.queued_at)
    }
}
