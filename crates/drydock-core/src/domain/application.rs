//! Application - デプロイ対象のアプリケーション
//!
//! 列は 2 つの所有者に分かれる。
//! - ビルド参照（`current_build`）: BuildScheduler だけが書く
//! - コンテナ状態（`container`, `container_message`）: DeploymentReconciler だけが書く

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::ids::{AppId, BuildId};

/// 解決済みの git commit hash
///
/// fetch がまだ終わっていない場合はゼロ埋めの番兵値になる。
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Commit(String);

impl Commit {
    pub const UNRESOLVED: &'static str = "0000000000000000000000000000000000000000";

    pub fn new(hash: impl Into<String>) -> Self {
        Self(hash.into())
    }

    pub fn unresolved() -> Self {
        Self(Self::UNRESOLVED.to_string())
    }

    pub fn is_resolved(&self) -> bool {
        !self.0.is_empty() && self.0 != Self::UNRESOLVED
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Commit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeployType {
    /// コンテナとして実行する
    Runtime,
    /// ビルド成果物を静的ホスティングで配信する
    Static,
}

/// バックエンドから観測したコンテナの状態
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerState {
    Missing,
    Starting,
    Running,
    Exited,
    Errored,
    Unknown,
}

impl fmt::Display for ContainerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ContainerState::Missing => "missing",
            ContainerState::Starting => "starting",
            ContainerState::Running => "running",
            ContainerState::Exited => "exited",
            ContainerState::Errored => "errored",
            ContainerState::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Application {
    pub id: AppId,
    pub name: String,
    pub running: bool,
    pub deploy_type: DeployType,

    /// Commit currently resolved for the tracked ref.
    pub commit: Commit,

    /// Hash of the build/runtime configuration.
    pub config_hash: String,

    pub current_build: Option<BuildId>,

    pub container: ContainerState,
    pub container_message: String,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Application {
    pub fn new(id: AppId, name: impl Into<String>, deploy_type: DeployType, now: DateTime<Utc>) -> Self {
        Self {
            id,
            name: name.into(),
            running: false,
            deploy_type,
            commit: Commit::unresolved(),
            config_hash: String::new(),
            current_build: None,
            container: ContainerState::Missing,
            container_message: String::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_running(mut self, running: bool) -> Self {
        self.running = running;
        self
    }

    pub fn with_commit(mut self, commit: Commit) -> Self {
        self.commit = commit;
        self
    }

    pub fn with_config_hash(mut self, config_hash: impl Into<String>) -> Self {
        self.config_hash = config_hash.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(Commit::unresolved(), false)]
    #[case(Commit::new(""), false)]
    #[case(Commit::new("abc123"), true)]
    fn commit_resolution(#[case] commit: Commit, #[case] resolved: bool) {
        assert_eq!(commit.is_resolved(), resolved);
    }

    #[test]
    fn container_state_serializes_snake_case() {
        let json = serde_json::to_string(&ContainerState::Errored).unwrap();
        assert_eq!(json, "\"errored\"");
        assert_eq!(ContainerState::Missing.to_string(), "missing");
    }
}
