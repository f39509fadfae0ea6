//! CdService - BuildScheduler と DeploymentReconciler の結線
//!
//! # トリガー
//! | 起点                     | 動作                                   |
//! |--------------------------|----------------------------------------|
//! | ビルドスキャン間隔        | build-scan                             |
//! | builder idle             | build-scan                             |
//! | build settled            | settle（昇格 + 再登録）→ deploy-sync     |
//! | クラッシュ検出間隔        | detect_build_crash                     |
//! | デプロイ同期間隔          | deploy-sync                            |
//! | フルスキャン間隔          | container-full-scan                    |
//! | コンテナイベント          | container-refresh(app)                 |
//!
//! 全タスクは 1 つの TaskGroup に属し、`stop()` で停止と終了待ちを行う。
//! Coalescer の実行タスクは TaskGroup の外にあるので、`stop()` はその後で完了を待つ。

use std::sync::{Arc, Mutex};

use crate::app::build_scheduler::BuildScheduler;
use crate::app::context::CoreContext;
use crate::app::deploy::DeploymentReconciler;
use crate::app::lifecycle::{Lifecycle, LifecycleState};
use crate::app::reaper_loop::ReaperLoop;
use crate::app::status::{BuildCounts, ServiceStatus};
use crate::domain::Result;
use crate::ports::BuildCondition;
use crate::tasks::{TaskGroup, every, for_each_event};

pub struct CdService {
    ctx: CoreContext,
    scheduler: Arc<BuildScheduler>,
    reconciler: Arc<DeploymentReconciler>,
    lifecycle: Lifecycle,
    tasks: Mutex<Option<TaskGroup>>,
}

impl CdService {
    pub(crate) fn new(ctx: CoreContext) -> Self {
        Self {
            scheduler: BuildScheduler::new(ctx.clone()),
            reconciler: DeploymentReconciler::new(ctx.clone()),
            ctx,
            lifecycle: Lifecycle::new(),
            tasks: Mutex::new(None),
        }
    }

    pub fn context(&self) -> &CoreContext {
        &self.ctx
    }

    pub fn scheduler(&self) -> &Arc<BuildScheduler> {
        &self.scheduler
    }

    pub fn reconciler(&self) -> &Arc<DeploymentReconciler> {
        &self.reconciler
    }

    pub fn lifecycle(&self) -> LifecycleState {
        self.lifecycle.state()
    }

    /// Spawn every background task. Must be called inside a tokio runtime.
    ///
    /// Returns false (and does nothing) unless this call started the service.
    pub fn start(&self) -> bool {
        if !self.lifecycle.try_start() {
            tracing::debug!(state = ?self.lifecycle.state(), "start ignored");
            return false;
        }

        let config = Arc::clone(&self.ctx.config);
        let mut group = TaskGroup::new();

        group.spawn("cluster", Arc::clone(&self.ctx.cluster).run(group.shutdown()));

        // build scheduler
        let scheduler = Arc::clone(&self.scheduler);
        let shutdown = group.shutdown();
        group.spawn("build-scan", async move { scheduler.serve_scan(shutdown).await });

        let scheduler = Arc::clone(&self.scheduler);
        group.spawn(
            "build-scan-ticker",
            every("build-scan-ticker", config.build_scan_interval(), group.shutdown(), move || {
                scheduler.trigger_scan();
                async {}
            }),
        );

        let scheduler = Arc::clone(&self.scheduler);
        group.spawn(
            "builder-idle",
            for_each_event(
                "builder-idle",
                self.ctx.dispatcher.listen_builder_idle(),
                group.shutdown(),
                move |()| {
                    scheduler.trigger_scan();
                    async {}
                },
            ),
        );

        let scheduler = Arc::clone(&self.scheduler);
        let reconciler = Arc::clone(&self.reconciler);
        group.spawn(
            "build-settled",
            for_each_event(
                "build-settled",
                self.ctx.dispatcher.listen_build_settled(),
                group.shutdown(),
                move |()| {
                    let scheduler = Arc::clone(&scheduler);
                    let reconciler = Arc::clone(&reconciler);
                    async move {
                        if let Err(e) = scheduler.settle().await {
                            tracing::warn!(error = %e, "failed to settle builds");
                        }
                        reconciler.trigger_sync();
                    }
                },
            ),
        );

        group.spawn(
            "crash-reaper",
            ReaperLoop::new(Arc::clone(&self.scheduler), config.crash_check_interval())
                .run(group.shutdown()),
        );

        // deployment reconciler
        let reconciler = Arc::clone(&self.reconciler);
        let shutdown = group.shutdown();
        group.spawn("deploy-sync", async move { reconciler.serve_sync(shutdown).await });

        let reconciler = Arc::clone(&self.reconciler);
        group.spawn(
            "deploy-sync-ticker",
            every("deploy-sync-ticker", config.deploy_sync_interval(), group.shutdown(), move || {
                reconciler.trigger_sync();
                async {}
            }),
        );

        let reconciler = Arc::clone(&self.reconciler);
        let shutdown = group.shutdown();
        group.spawn("full-scan", async move { reconciler.serve_full_scan(shutdown).await });

        let reconciler = Arc::clone(&self.reconciler);
        group.spawn(
            "full-scan-ticker",
            every("full-scan-ticker", config.full_scan_interval(), group.shutdown(), move || {
                reconciler.trigger_full_scan();
                async {}
            }),
        );

        let reconciler = Arc::clone(&self.reconciler);
        let shutdown = group.shutdown();
        group.spawn("container-events", async move { reconciler.observe_events(shutdown).await });

        tracing::info!(tasks = group.len(), "cd service started");
        *self.tasks.lock().unwrap_or_else(|e| e.into_inner()) = Some(group);
        true
    }

    /// Stop every loop and wait for the tasks to finish. Idempotent.
    ///
    /// Backend calls already in flight run to completion before this returns.
    pub async fn stop(&self) {
        if !self.lifecycle.try_stop() {
            return;
        }
        let group = self.tasks.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(group) = group {
            group.shutdown_and_join().await;
        }
        self.scheduler.wait_idle().await;
        self.reconciler.wait_idle().await;
        tracing::info!("cd service stopped");
    }

    pub async fn status(&self) -> Result<ServiceStatus> {
        let builds = self.ctx.builds.get_builds(&BuildCondition::all()).await?;
        let membership = self.ctx.cluster.snapshot();
        Ok(ServiceStatus {
            lifecycle: self.lifecycle.state(),
            members: membership.as_ref().map_or(0, |m| m.len()),
            self_index: membership.as_ref().and_then(|m| m.self_index()),
            leader: membership.as_ref().is_some_and(|m| m.is_leader()),
            neighbors: membership.map(|m| m.neighbors()).unwrap_or_default(),
            builds: BuildCounts::from_builds(&builds),
        })
    }
}
