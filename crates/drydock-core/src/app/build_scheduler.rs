//! BuildScheduler - ビルドの登録・起動・クラッシュ検出
//!
//! # 状態遷移（(app, commit, config hash) ごと）
//! none → Queued → Building → {Succeeded | Failed | Canceled}
//!
//! # 学習ポイント
//! - すべての書き込みは条件付き更新（他レプリカ・ビルダーとの競合に負けても壊れない）
//! - 起動パス（start_builds）は Coalescer で 1 本にまとめる
//! - 起動パスはシャーディングしない（単一割り当ては dispatcher 側の責務）

use std::sync::Arc;

use crate::app::context::CoreContext;
use crate::coalesce::Coalescer;
use crate::domain::{AppId, Build, BuildId, BuildStatus, CoreError, ErrorKind, Result};
use crate::ports::{
    ApplicationCondition, ApplicationUpdate, BuildCondition, BuildUpdate, CurrentBuildSwap,
};
use crate::tasks::Shutdown;

/// Outcome of `register_build`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    Queued(BuildId),
    NotRunning,
    /// git fetch has not resolved a commit yet.
    CommitUnresolved,
    /// A non-retriable build already covers the tuple.
    AlreadyBuilt(BuildId),
    /// Another replica inserted the same build first.
    Raced,
}

pub struct BuildScheduler {
    ctx: CoreContext,
    scan: Coalescer,
    settle: Coalescer,
}

impl BuildScheduler {
    pub fn new(ctx: CoreContext) -> Arc<Self> {
        let scan = Coalescer::new("build-scan", {
            let ctx = ctx.clone();
            move || {
                let ctx = ctx.clone();
                async move { dispatch_queued(&ctx).await }
            }
        });
        let settle = Coalescer::new("build-settle", {
            let ctx = ctx.clone();
            move || {
                let ctx = ctx.clone();
                async move {
                    promote_current_builds(&ctx).await?;
                    register_all(&ctx).await.map(|_| ())
                }
            }
        });
        Arc::new(Self { ctx, scan, settle })
    }

    /// Register a build for the application's current (commit, config hash).
    ///
    /// Called whenever the commit or configuration may have changed.
    pub async fn register_build(&self, app_id: AppId) -> Result<Registration> {
        let registration = register(&self.ctx, app_id).await?;
        if matches!(registration, Registration::Queued(_)) {
            self.scan.trigger();
        }
        Ok(registration)
    }

    /// `register_build` for every running application.
    pub async fn register_all(&self) -> Result<usize> {
        let queued = register_all(&self.ctx).await?;
        if queued > 0 {
            self.scan.trigger();
        }
        Ok(queued)
    }

    /// Hand every queued build to the dispatcher (coalesced).
    pub async fn start_builds(&self) -> Result<()> {
        self.scan.run().await
    }

    pub fn trigger_scan(&self) {
        self.scan.trigger();
    }

    pub async fn serve_scan(&self, shutdown: Shutdown) {
        self.scan.serve(shutdown).await;
    }

    /// Reaction to a build reaching a terminal state (coalesced):
    /// advance current builds, then re-evaluate registrations.
    pub async fn settle(&self) -> Result<()> {
        self.settle.run().await?;
        self.scan.trigger();
        Ok(())
    }

    /// Wait for scan / settle executions still running after their triggers stopped.
    pub async fn wait_idle(&self) {
        self.settle.wait_idle().await;
        self.scan.wait_idle().await;
    }

    pub async fn detect_build_crash(&self) -> Result<Vec<BuildId>> {
        detect_build_crash(&self.ctx).await
    }

    pub async fn promote_current_builds(&self) -> Result<usize> {
        promote_current_builds(&self.ctx).await
    }
}

async fn register(ctx: &CoreContext, app_id: AppId) -> Result<Registration> {
    let app = ctx.apps.get_application(app_id).await?;
    if !app.running {
        tracing::debug!(app_id = %app_id, "application not running, skipping build");
        return Ok(Registration::NotRunning);
    }
    if !app.commit.is_resolved() {
        tracing::debug!(app_id = %app_id, "commit not resolved yet, skipping build");
        return Ok(Registration::CommitUnresolved);
    }

    // retriable なビルドは重複とみなさない（もう 1 回だけ試せる）
    let existing = ctx
        .builds
        .get_builds(
            &BuildCondition::app(app_id)
                .commit(app.commit.clone())
                .config_hash(app.config_hash.clone())
                .retriable(false),
        )
        .await?;
    if let Some(build) = existing.first() {
        tracing::debug!(app_id = %app_id, build_id = %build.id, status = %build.status, "build already exists");
        return Ok(Registration::AlreadyBuilt(build.id));
    }

    // 古い Queued は新しい要求で置き換える
    let canceled = ctx
        .builds
        .update_builds(
            &BuildCondition::app(app_id).status(BuildStatus::Queued),
            BuildUpdate::status(BuildStatus::Canceled),
        )
        .await?;
    if canceled > 0 {
        tracing::info!(app_id = %app_id, canceled, "superseded queued builds");
    }

    let build = Build::queued(
        ctx.ids.generate_build_id(),
        app_id,
        app.commit.clone(),
        app.config_hash.clone(),
        ctx.clock.now(),
    );
    let build_id = build.id;
    match ctx.builds.create_build(build).await {
        Ok(()) => {
            tracing::info!(app_id = %app_id, build_id = %build_id, commit = %app.commit, "build queued");
            Ok(Registration::Queued(build_id))
        }
        Err(e) if e.kind() == ErrorKind::Conflict => {
            tracing::debug!(app_id = %app_id, error = %e, "build registered concurrently");
            Ok(Registration::Raced)
        }
        Err(e) => Err(e),
    }
}

async fn register_all(ctx: &CoreContext) -> Result<usize> {
    let apps = ctx
        .apps
        .get_applications(&ApplicationCondition::all().running(true))
        .await?;
    let mut queued = 0;
    for app in apps {
        match register(ctx, app.id).await {
            Ok(Registration::Queued(_)) => queued += 1,
            Ok(_) => {}
            Err(e) if e.is_transient() => return Err(e),
            Err(e) => tracing::warn!(app_id = %app.id, error = %e, "failed to register build"),
        }
    }
    Ok(queued)
}

async fn dispatch_queued(ctx: &CoreContext) -> Result<()> {
    let mut queued = ctx
        .builds
        .get_builds(&BuildCondition::all().status(BuildStatus::Queued))
        .await?;
    if queued.is_empty() {
        tracing::trace!("no queued builds");
        return Ok(());
    }
    // best-effort FIFO
    queued.sort_by(|a, b| a.queued_at.cmp(&b.queued_at).then(a.id.cmp(&b.id)));
    let ids: Vec<BuildId> = queued.iter().map(|b| b.id).collect();

    ctx.dispatcher.start_builds(&ids).await?;
    tracing::info!(count = ids.len(), "dispatched queued builds");
    Ok(())
}

async fn detect_build_crash(ctx: &CoreContext) -> Result<Vec<BuildId>> {
    let threshold = chrono::Duration::from_std(ctx.config.crash_threshold())
        .map_err(|e| CoreError::Config(format!("crash threshold out of range: {e}")))?;
    let cutoff = ctx.clock.now() - threshold;

    let stale = ctx
        .builds
        .get_builds(
            &BuildCondition::all()
                .status(BuildStatus::Building)
                .updated_before(cutoff),
        )
        .await?;

    let mut crashed = Vec::new();
    for build in stale {
        // 書き込み時点でまだ Building かつ古い場合だけ Failed にする
        let cond = BuildCondition::id(build.id)
            .status(BuildStatus::Building)
            .updated_before(cutoff);
        let n = ctx
            .builds
            .update_builds(&cond, BuildUpdate::status(BuildStatus::Failed))
            .await?;
        if n > 0 {
            tracing::warn!(
                build_id = %build.id,
                app_id = %build.app_id,
                last_activity = %build.last_activity(),
                "builder went silent, marking build failed"
            );
            crashed.push(build.id);
        }
    }
    Ok(crashed)
}

async fn promote_current_builds(ctx: &CoreContext) -> Result<usize> {
    let apps = ctx
        .apps
        .get_applications(&ApplicationCondition::all().running(true))
        .await?;

    let mut promoted = 0;
    for app in apps {
        let succeeded = ctx
            .builds
            .get_builds(
                &BuildCondition::app(app.id)
                    .commit(app.commit.clone())
                    .config_hash(app.config_hash.clone())
                    .status(BuildStatus::Succeeded),
            )
            .await?;
        let Some(newest) = succeeded.iter().max_by_key(|b| (b.queued_at, b.id)) else {
            continue;
        };
        if app.current_build == Some(newest.id) {
            continue;
        }

        if let Some(current_id) = app.current_build {
            let current = ctx.builds.get_builds(&BuildCondition::id(current_id)).await?;
            match current.first() {
                Some(current) if newest.queued_at <= current.queued_at => continue,
                Some(_) => {}
                None => {
                    tracing::warn!(app_id = %app.id, build_id = %current_id, "current build row is missing");
                    continue;
                }
            }
        }

        let update = ApplicationUpdate {
            current_build: Some(CurrentBuildSwap {
                expected: app.current_build,
                next: newest.id,
            }),
            ..ApplicationUpdate::default()
        };
        match ctx.apps.update_application(app.id, update).await {
            Ok(true) => {
                tracing::info!(app_id = %app.id, build_id = %newest.id, "current build advanced");
                promoted += 1;
            }
            Ok(false) => {
                tracing::debug!(app_id = %app.id, "current build changed concurrently");
            }
            Err(e) if e.is_transient() => return Err(e),
            Err(e) => tracing::warn!(app_id = %app.id, error = %e, "failed to advance current build"),
        }
    }
    Ok(promoted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::test_support::{CONFIG_HASH, Harness};
    use crate::domain::Commit;
    use crate::ports::{ApplicationRepository, BuildRepository, Clock};
    use rstest::rstest;

    async fn builds_of(h: &Harness, app_id: AppId) -> Vec<Build> {
        h.store.get_builds(&BuildCondition::app(app_id)).await.unwrap()
    }

    async fn set_status(h: &Harness, id: BuildId, status: BuildStatus) {
        let n = h
            .store
            .update_builds(&BuildCondition::id(id), BuildUpdate::status(status))
            .await
            .unwrap();
        assert_eq!(n, 1);
    }

    #[tokio::test]
    async fn unresolved_commit_is_a_no_op() {
        let h = Harness::new();
        let scheduler = BuildScheduler::new(h.ctx.clone());
        let app = h.runtime_app("web", None).await;

        assert_eq!(
            scheduler.register_build(app).await.unwrap(),
            Registration::CommitUnresolved
        );
        assert!(builds_of(&h, app).await.is_empty());
    }

    #[tokio::test]
    async fn stopped_application_is_a_no_op() {
        let h = Harness::new();
        let scheduler = BuildScheduler::new(h.ctx.clone());
        let app = h.runtime_app("web", Some("c1")).await;
        h.store.set_running(app, false).await.unwrap();

        assert_eq!(scheduler.register_build(app).await.unwrap(), Registration::NotRunning);
        assert!(builds_of(&h, app).await.is_empty());
    }

    #[tokio::test]
    async fn unknown_application_is_data_inconsistency() {
        let h = Harness::new();
        let scheduler = BuildScheduler::new(h.ctx.clone());
        let err = scheduler
            .register_build(h.ids().generate_app_id())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DataInconsistency);
    }

    #[rstest]
    #[case::queued(None)]
    #[case::building(Some(BuildStatus::Building))]
    #[case::failed(Some(BuildStatus::Failed))]
    #[tokio::test]
    async fn second_registration_is_deduplicated(#[case] status: Option<BuildStatus>) {
        let h = Harness::new();
        let scheduler = BuildScheduler::new(h.ctx.clone());
        let app = h.runtime_app("web", Some("c1")).await;

        let Registration::Queued(first) = scheduler.register_build(app).await.unwrap() else {
            panic!("expected a queued build");
        };
        if let Some(status) = status {
            if status.is_terminal() {
                set_status(&h, first, BuildStatus::Building).await;
            }
            set_status(&h, first, status).await;
        }

        assert_eq!(
            scheduler.register_build(app).await.unwrap(),
            Registration::AlreadyBuilt(first)
        );
        assert_eq!(builds_of(&h, app).await.len(), 1);
    }

    #[tokio::test]
    async fn retriable_build_permits_one_more_attempt() {
        let h = Harness::new();
        let scheduler = BuildScheduler::new(h.ctx.clone());
        let app = h.runtime_app("web", Some("c1")).await;

        let Registration::Queued(first) = scheduler.register_build(app).await.unwrap() else {
            panic!("expected a queued build");
        };
        set_status(&h, first, BuildStatus::Building).await;
        set_status(&h, first, BuildStatus::Failed).await;
        h.store.mark_retriable(first).await.unwrap();

        let Registration::Queued(second) = scheduler.register_build(app).await.unwrap() else {
            panic!("expected a retry");
        };
        assert_ne!(first, second);
        assert_eq!(
            scheduler.register_build(app).await.unwrap(),
            Registration::AlreadyBuilt(second)
        );
    }

    #[tokio::test]
    async fn new_commit_supersedes_queued_build() {
        let h = Harness::new();
        let scheduler = BuildScheduler::new(h.ctx.clone());
        let app = h.runtime_app("web", Some("c1")).await;

        let Registration::Queued(b1) = scheduler.register_build(app).await.unwrap() else {
            panic!("expected a queued build");
        };
        h.advance_secs(1);
        h.store.set_commit(app, Commit::new("c2")).await.unwrap();
        let Registration::Queued(b2) = scheduler.register_build(app).await.unwrap() else {
            panic!("expected a queued build");
        };

        let b1 = h.store.build(b1).await.unwrap();
        let b2 = h.store.build(b2).await.unwrap();
        assert_eq!(b1.status, BuildStatus::Canceled);
        assert_eq!(b2.status, BuildStatus::Queued);
        assert_eq!(b2.commit, Commit::new("c2"));
        assert_eq!(b2.config_hash, CONFIG_HASH);
    }

    #[tokio::test]
    async fn building_build_is_not_superseded() {
        let h = Harness::new();
        let scheduler = BuildScheduler::new(h.ctx.clone());
        let app = h.runtime_app("web", Some("c1")).await;

        let Registration::Queued(b1) = scheduler.register_build(app).await.unwrap() else {
            panic!("expected a queued build");
        };
        set_status(&h, b1, BuildStatus::Building).await;
        h.store.set_commit(app, Commit::new("c2")).await.unwrap();
        scheduler.register_build(app).await.unwrap();

        assert_eq!(h.store.build(b1).await.unwrap().status, BuildStatus::Building);
    }

    #[tokio::test]
    async fn start_builds_dispatches_oldest_first() {
        let h = Harness::new();
        let scheduler = BuildScheduler::new(h.ctx.clone());
        let mut expected = Vec::new();
        for name in ["a", "b", "c"] {
            let app = h.runtime_app(name, Some("c1")).await;
            let Registration::Queued(id) = scheduler.register_build(app).await.unwrap() else {
                panic!("expected a queued build");
            };
            expected.push(id);
            h.advance_secs(1);
        }

        scheduler.start_builds().await.unwrap();
        assert_eq!(h.dispatcher.calls(), vec![expected]);
    }

    #[tokio::test]
    async fn start_builds_with_empty_queue_dispatches_nothing() {
        let h = Harness::new();
        let scheduler = BuildScheduler::new(h.ctx.clone());
        scheduler.start_builds().await.unwrap();
        assert!(h.dispatcher.calls().is_empty());
    }

    #[tokio::test]
    async fn dispatch_failure_is_reported() {
        let h = Harness::new();
        let scheduler = BuildScheduler::new(h.ctx.clone());
        let app = h.runtime_app("web", Some("c1")).await;
        scheduler.register_build(app).await.unwrap();

        h.dispatcher.set_unavailable(true);
        assert!(scheduler.start_builds().await.unwrap_err().is_transient());
    }

    #[tokio::test]
    async fn silent_builder_is_detected() {
        let h = Harness::new();
        let scheduler = BuildScheduler::new(h.ctx.clone());
        let stale_app = h.runtime_app("stale", Some("c1")).await;
        let fresh_app = h.runtime_app("fresh", Some("c1")).await;

        let Registration::Queued(stale) = scheduler.register_build(stale_app).await.unwrap() else {
            panic!("expected a queued build");
        };
        let Registration::Queued(fresh) = scheduler.register_build(fresh_app).await.unwrap() else {
            panic!("expected a queued build");
        };

        set_status(&h, stale, BuildStatus::Building).await;
        h.advance_secs(50);
        set_status(&h, fresh, BuildStatus::Building).await;
        h.advance_secs(20);

        // stale: 70s without update, fresh: 20s
        let crashed = scheduler.detect_build_crash().await.unwrap();
        assert_eq!(crashed, vec![stale]);
        assert_eq!(h.store.build(stale).await.unwrap().status, BuildStatus::Failed);
        assert_eq!(h.store.build(fresh).await.unwrap().status, BuildStatus::Building);
    }

    #[tokio::test]
    async fn crash_detection_ignores_settled_builds() {
        let h = Harness::new();
        let scheduler = BuildScheduler::new(h.ctx.clone());
        let app = h.runtime_app("web", Some("c1")).await;
        let Registration::Queued(id) = scheduler.register_build(app).await.unwrap() else {
            panic!("expected a queued build");
        };
        set_status(&h, id, BuildStatus::Building).await;
        set_status(&h, id, BuildStatus::Succeeded).await;
        h.advance_secs(600);

        assert!(scheduler.detect_build_crash().await.unwrap().is_empty());
        assert_eq!(h.store.build(id).await.unwrap().status, BuildStatus::Succeeded);
    }

    #[tokio::test]
    async fn current_build_only_moves_forward() {
        let h = Harness::new();
        let scheduler = BuildScheduler::new(h.ctx.clone());
        let app = h.runtime_app("web", Some("c1")).await;

        // 古いビルド（先に queue）と新しいビルドを用意し、新しい方が先に成功する
        let older = Build::queued(h.ids().generate_build_id(), app, Commit::new("c1"), CONFIG_HASH, h.clock.now());
        h.advance_secs(5);
        let newer = Build::queued(h.ids().generate_build_id(), app, Commit::new("c1"), CONFIG_HASH, h.clock.now());
        let (older_id, newer_id) = (older.id, newer.id);
        h.store.insert_build(older).await;
        h.store.insert_build(newer).await;

        set_status(&h, newer_id, BuildStatus::Building).await;
        set_status(&h, newer_id, BuildStatus::Succeeded).await;
        assert_eq!(scheduler.promote_current_builds().await.unwrap(), 1);
        assert_eq!(h.store.application(app).await.unwrap().current_build, Some(newer_id));

        // 遅れて成功した古いビルドには戻らない
        set_status(&h, older_id, BuildStatus::Building).await;
        set_status(&h, older_id, BuildStatus::Succeeded).await;
        assert_eq!(scheduler.promote_current_builds().await.unwrap(), 0);
        assert_eq!(h.store.application(app).await.unwrap().current_build, Some(newer_id));
    }

    #[tokio::test]
    async fn settle_promotes_and_re_registers() {
        let h = Harness::new();
        let scheduler = BuildScheduler::new(h.ctx.clone());
        let app = h.runtime_app("web", Some("c1")).await;
        let Registration::Queued(id) = scheduler.register_build(app).await.unwrap() else {
            panic!("expected a queued build");
        };
        set_status(&h, id, BuildStatus::Building).await;
        set_status(&h, id, BuildStatus::Succeeded).await;

        // settle 前に commit が進んだアプリは新しいビルドが登録される
        let other = h.runtime_app("other", Some("c9")).await;
        scheduler.settle().await.unwrap();

        assert_eq!(h.store.application(app).await.unwrap().current_build, Some(id));
        assert_eq!(builds_of(&h, other).await.len(), 1);
    }

    #[tokio::test]
    async fn storage_outage_aborts_the_pass() {
        let h = Harness::new();
        let scheduler = BuildScheduler::new(h.ctx.clone());
        let app = h.runtime_app("web", Some("c1")).await;
        h.store.set_unavailable(true);
        assert!(scheduler.register_build(app).await.unwrap_err().is_transient());
        assert!(scheduler.detect_build_crash().await.unwrap_err().is_transient());
        h.store.set_unavailable(false);
        assert!(matches!(
            scheduler.register_build(app).await.unwrap(),
            Registration::Queued(_)
        ));
        assert!(h.store.get_applications(&ApplicationCondition::all()).await.is_ok());
    }
}
