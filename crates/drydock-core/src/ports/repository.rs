//! Repository ports - SQL ストアが実装する正本（source of truth）
//!
//! # 設計原則
//! - 読み取りは条件オブジェクト（各項目は AND で結合、None は無条件）
//! - 書き込みは条件付き更新。盲目的な上書きはしない
//! - 同じ (app, commit, config hash) の非終端ビルドは 1 つまで
//!   （`create_build` は重複を `CoreError::Conflict` で拒否する）

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};

use crate::domain::{
    AppId, Application, Build, BuildId, BuildStatus, Commit, CoreError, DeployType,
    ObservedState, Result,
};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplicationCondition {
    pub ids: Option<Vec<AppId>>,
    pub running: Option<bool>,
    pub deploy_type: Option<DeployType>,
    pub has_current_build: Option<bool>,
}

impl ApplicationCondition {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn id(id: AppId) -> Self {
        Self::ids(vec![id])
    }

    pub fn ids(ids: Vec<AppId>) -> Self {
        Self {
            ids: Some(ids),
            ..Self::default()
        }
    }

    pub fn running(mut self, running: bool) -> Self {
        self.running = Some(running);
        self
    }

    pub fn deploy_type(mut self, deploy_type: DeployType) -> Self {
        self.deploy_type = Some(deploy_type);
        self
    }

    pub fn has_current_build(mut self, has: bool) -> Self {
        self.has_current_build = Some(has);
        self
    }

    pub fn matches(&self, app: &Application) -> bool {
        if let Some(ids) = &self.ids
            && !ids.contains(&app.id)
        {
            return false;
        }
        if let Some(running) = self.running
            && app.running != running
        {
            return false;
        }
        if let Some(deploy_type) = self.deploy_type
            && app.deploy_type != deploy_type
        {
            return false;
        }
        if let Some(has) = self.has_current_build
            && app.current_build.is_some() != has
        {
            return false;
        }
        true
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildCondition {
    pub ids: Option<Vec<BuildId>>,
    pub app_id: Option<AppId>,
    pub commit: Option<Commit>,
    pub config_hash: Option<String>,
    pub statuses: Option<Vec<BuildStatus>>,
    pub retriable: Option<bool>,
    /// Last builder activity strictly before this instant.
    pub updated_before: Option<DateTime<Utc>>,
}

impl BuildCondition {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn id(id: BuildId) -> Self {
        Self::ids(vec![id])
    }

    pub fn ids(ids: Vec<BuildId>) -> Self {
        Self {
            ids: Some(ids),
            ..Self::default()
        }
    }

    pub fn app(app_id: AppId) -> Self {
        Self {
            app_id: Some(app_id),
            ..Self::default()
        }
    }

    pub fn status(self, status: BuildStatus) -> Self {
        self.statuses(vec![status])
    }

    pub fn statuses(mut self, statuses: Vec<BuildStatus>) -> Self {
        self.statuses = Some(statuses);
        self
    }

    pub fn commit(mut self, commit: Commit) -> Self {
        self.commit = Some(commit);
        self
    }

    pub fn config_hash(mut self, config_hash: impl Into<String>) -> Self {
        self.config_hash = Some(config_hash.into());
        self
    }

    pub fn retriable(mut self, retriable: bool) -> Self {
        self.retriable = Some(retriable);
        self
    }

    pub fn updated_before(mut self, before: DateTime<Utc>) -> Self {
        self.updated_before = Some(before);
        self
    }

    pub fn matches(&self, build: &Build) -> bool {
        if let Some(ids) = &self.ids
            && !ids.contains(&build.id)
        {
            return false;
        }
        if let Some(app_id) = self.app_id
            && build.app_id != app_id
        {
            return false;
        }
        if let Some(commit) = &self.commit
            && &build.commit != commit
        {
            return false;
        }
        if let Some(config_hash) = &self.config_hash
            && &build.config_hash != config_hash
        {
            return false;
        }
        if let Some(statuses) = &self.statuses
            && !statuses.contains(&build.status)
        {
            return false;
        }
        if let Some(retriable) = self.retriable
            && build.retriable != retriable
        {
            return false;
        }
        if let Some(before) = self.updated_before
            && build.last_activity() >= before
        {
            return false;
        }
        true
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildUpdate {
    /// Applied only where the transition is forward (see `BuildStatus::can_transition_to`).
    pub status: Option<BuildStatus>,
    pub retriable: Option<bool>,
    pub artifact: Option<String>,
}

impl BuildUpdate {
    pub fn status(status: BuildStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }
}

/// `current_build` の compare-and-set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CurrentBuildSwap {
    pub expected: Option<BuildId>,
    pub next: BuildId,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplicationUpdate {
    pub current_build: Option<CurrentBuildSwap>,
    pub container: Option<ObservedState>,
}

#[async_trait]
pub trait ApplicationRepository: Send + Sync {
    async fn get_applications(&self, cond: &ApplicationCondition) -> Result<Vec<Application>>;

    async fn get_application(&self, id: AppId) -> Result<Application> {
        self.get_applications(&ApplicationCondition::id(id))
            .await?
            .into_iter()
            .next()
            .ok_or(CoreError::AppNotFound(id))
    }

    /// Returns false when a compare-and-set precondition did not hold.
    async fn update_application(&self, id: AppId, update: ApplicationUpdate) -> Result<bool>;

    /// Write the observed container state of many applications in one call.
    async fn bulk_update_state(&self, states: HashMap<AppId, ObservedState>) -> Result<()>;
}

#[async_trait]
pub trait BuildRepository: Send + Sync {
    async fn get_builds(&self, cond: &BuildCondition) -> Result<Vec<Build>>;

    async fn create_build(&self, build: Build) -> Result<()>;

    /// Returns the number of builds actually updated.
    async fn update_builds(&self, cond: &BuildCondition, update: BuildUpdate) -> Result<u64>;
}

#[async_trait]
pub trait EnvironmentRepository: Send + Sync {
    async fn get_environments(
        &self,
        app_ids: &[AppId],
    ) -> Result<HashMap<AppId, BTreeMap<String, String>>>;
}
