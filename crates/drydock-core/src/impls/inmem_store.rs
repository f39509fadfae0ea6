//! InMemoryStore - 開発用・テスト用の正本
//!
//! # 学習ポイント
//! - 3 つの repository trait を 1 つの状態に対して実装する
//! - 条件付き更新（status の後退は書き込まない）
//! - 非終端ビルドの重複は `create_build` で拒否する

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::{
    AppId, Application, Build, BuildId, Commit, CoreError, ObservedState, Result,
};
use crate::ports::{
    ApplicationCondition, ApplicationRepository, ApplicationUpdate, BuildCondition,
    BuildRepository, BuildUpdate, Clock, EnvironmentRepository,
};

#[derive(Default)]
struct StoreState {
    apps: HashMap<AppId, Application>,
    builds: HashMap<BuildId, Build>,
    envs: HashMap<AppId, BTreeMap<String, String>>,
}

/// InMemoryStore は 3 つの repository をまとめて実装する
///
/// `set_unavailable(true)` で全操作を `CoreError::Storage` にできる（障害注入）。
pub struct InMemoryStore {
    state: Mutex<StoreState>,
    clock: Arc<dyn Clock>,
    unavailable: AtomicBool,
    bulk_writes: AtomicUsize,
}

impl InMemoryStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(StoreState::default()),
            clock,
            unavailable: AtomicBool::new(false),
            bulk_writes: AtomicUsize::new(0),
        }
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of `bulk_update_state` calls served so far.
    pub fn bulk_writes(&self) -> usize {
        self.bulk_writes.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(CoreError::Storage("store unavailable".into()));
        }
        Ok(())
    }

    pub async fn insert_application(&self, app: Application) {
        self.state.lock().await.apps.insert(app.id, app);
    }

    /// Seed a build as-is, bypassing the duplicate check.
    pub async fn insert_build(&self, build: Build) {
        self.state.lock().await.builds.insert(build.id, build);
    }

    pub async fn set_environment(&self, app_id: AppId, envs: BTreeMap<String, String>) {
        self.state.lock().await.envs.insert(app_id, envs);
    }

    /// Record a newly resolved commit (what a git fetch would write).
    pub async fn set_commit(&self, app_id: AppId, commit: Commit) -> Result<()> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        let app = state
            .apps
            .get_mut(&app_id)
            .ok_or(CoreError::AppNotFound(app_id))?;
        app.commit = commit;
        app.updated_at = now;
        Ok(())
    }

    pub async fn set_running(&self, app_id: AppId, running: bool) -> Result<()> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        let app = state
            .apps
            .get_mut(&app_id)
            .ok_or(CoreError::AppNotFound(app_id))?;
        app.running = running;
        app.updated_at = now;
        Ok(())
    }

    /// Operator action: allow one more attempt for a terminal build.
    pub async fn mark_retriable(&self, build_id: BuildId) -> Result<()> {
        let mut state = self.state.lock().await;
        let build = state
            .builds
            .get_mut(&build_id)
            .ok_or(CoreError::BuildNotFound(build_id))?;
        if !build.status.is_terminal() {
            return Err(CoreError::Conflict(format!(
                "build {build_id} is {} and cannot be retried",
                build.status
            )));
        }
        build.retriable = true;
        Ok(())
    }

    pub async fn application(&self, id: AppId) -> Option<Application> {
        self.state.lock().await.apps.get(&id).cloned()
    }

    pub async fn build(&self, id: BuildId) -> Option<Build> {
        self.state.lock().await.builds.get(&id).cloned()
    }
}

#[async_trait]
impl ApplicationRepository for InMemoryStore {
    async fn get_applications(&self, cond: &ApplicationCondition) -> Result<Vec<Application>> {
        self.check_available()?;
        let state = self.state.lock().await;
        let mut apps: Vec<Application> = state
            .apps
            .values()
            .filter(|app| cond.matches(app))
            .cloned()
            .collect();
        apps.sort_by_key(|app| app.id);
        Ok(apps)
    }

    async fn update_application(&self, id: AppId, update: ApplicationUpdate) -> Result<bool> {
        self.check_available()?;
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        let app = state.apps.get_mut(&id).ok_or(CoreError::AppNotFound(id))?;

        if let Some(swap) = update.current_build
            && app.current_build != swap.expected
        {
            return Ok(false);
        }
        if let Some(swap) = update.current_build {
            app.current_build = Some(swap.next);
        }
        if let Some(observed) = update.container {
            app.container = observed.state;
            app.container_message = observed.message;
        }
        app.updated_at = now;
        Ok(true)
    }

    async fn bulk_update_state(&self, states: HashMap<AppId, ObservedState>) -> Result<()> {
        self.check_available()?;
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        for (id, observed) in states {
            match state.apps.get_mut(&id) {
                Some(app) => {
                    app.container = observed.state;
                    app.container_message = observed.message;
                    app.updated_at = now;
                }
                None => tracing::warn!(app_id = %id, "bulk update for unknown application"),
            }
        }
        self.bulk_writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl BuildRepository for InMemoryStore {
    async fn get_builds(&self, cond: &BuildCondition) -> Result<Vec<Build>> {
        self.check_available()?;
        let state = self.state.lock().await;
        let mut builds: Vec<Build> = state
            .builds
            .values()
            .filter(|b| cond.matches(b))
            .cloned()
            .collect();
        builds.sort_by(|a, b| a.queued_at.cmp(&b.queued_at).then(a.id.cmp(&b.id)));
        Ok(builds)
    }

    async fn create_build(&self, build: Build) -> Result<()> {
        self.check_available()?;
        let mut state = self.state.lock().await;
        if state.builds.contains_key(&build.id) {
            return Err(CoreError::Conflict(format!("build {} already exists", build.id)));
        }
        let duplicate = state.builds.values().any(|b| {
            b.app_id == build.app_id
                && b.is_for(&build.commit, &build.config_hash)
                && !b.status.is_terminal()
        });
        if duplicate {
            return Err(CoreError::Conflict(format!(
                "non-terminal build already exists for {} at {}",
                build.app_id, build.commit
            )));
        }
        state.builds.insert(build.id, build);
        Ok(())
    }

    async fn update_builds(&self, cond: &BuildCondition, update: BuildUpdate) -> Result<u64> {
        self.check_available()?;
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        let mut affected = 0;
        for build in state.builds.values_mut().filter(|b| cond.matches(b)) {
            if let Some(next) = update.status
                && !build.transition(next, now)
            {
                continue;
            }
            if let Some(retriable) = update.retriable {
                build.retriable = retriable;
            }
            if let Some(artifact) = &update.artifact {
                build.artifact = Some(artifact.clone());
            }
            affected += 1;
        }
        Ok(affected)
    }
}

#[async_trait]
impl EnvironmentRepository for InMemoryStore {
    async fn get_environments(
        &self,
        app_ids: &[AppId],
    ) -> Result<HashMap<AppId, BTreeMap<String, String>>> {
        self.check_available()?;
        let state = self.state.lock().await;
        Ok(app_ids
            .iter()
            .filter_map(|id| state.envs.get(id).map(|envs| (*id, envs.clone())))
            .collect())
    }
}
