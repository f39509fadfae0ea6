//! DeploymentReconciler - 目標状態の push と実状態の pull
//!
//! # 主要コンポーネント
//! - **synchronizer**: ストレージ → 目標状態 → Backend::synchronize
//! - **observer**: Backend → 観測状態 → ストレージ
//!
//! 各パスは専用の Coalescer を持ち、同時に 1 本しか走らない。

pub mod observer;
pub mod synchronizer;

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::app::context::CoreContext;
use crate::coalesce::{Coalescer, KeyedCoalescer};
use crate::domain::{AppId, Result};
use crate::tasks::Shutdown;

pub struct DeploymentReconciler {
    ctx: CoreContext,
    sync: Coalescer,
    full_scan: Coalescer,
    refresh: KeyedCoalescer<AppId>,
}

impl DeploymentReconciler {
    pub fn new(ctx: CoreContext) -> Arc<Self> {
        let scan_lock = Arc::new(Mutex::new(()));

        let sync = Coalescer::new("deploy-sync", {
            let ctx = ctx.clone();
            move || {
                let ctx = ctx.clone();
                async move { synchronizer::synchronize(&ctx).await }
            }
        });
        let full_scan = Coalescer::new("container-full-scan", {
            let ctx = ctx.clone();
            let scan_lock = Arc::clone(&scan_lock);
            move || {
                let ctx = ctx.clone();
                let scan_lock = Arc::clone(&scan_lock);
                async move { observer::full_scan(&ctx, &scan_lock).await.map(|_| ()) }
            }
        });
        let refresh = KeyedCoalescer::new("container-refresh", {
            let ctx = ctx.clone();
            move |app_id: AppId| {
                let ctx = ctx.clone();
                let scan_lock = Arc::clone(&scan_lock);
                async move { observer::refresh_app(&ctx, &scan_lock, app_id).await }
            }
        });

        Arc::new(Self {
            ctx,
            sync,
            full_scan,
            refresh,
        })
    }

    /// Push the desired state (coalesced).
    pub async fn synchronize(&self) -> Result<()> {
        self.sync.run().await
    }

    pub fn trigger_sync(&self) {
        self.sync.trigger();
    }

    pub async fn serve_sync(&self, shutdown: Shutdown) {
        self.sync.serve(shutdown).await;
    }

    /// Reconcile observed state of the assigned applications (coalesced).
    pub async fn full_scan(&self) -> Result<()> {
        self.full_scan.run().await
    }

    pub fn trigger_full_scan(&self) {
        self.full_scan.trigger();
    }

    pub async fn serve_full_scan(&self, shutdown: Shutdown) {
        self.full_scan.serve(shutdown).await;
    }

    /// Re-fetch one application's container (coalesced per application).
    pub async fn refresh_app(&self, app_id: AppId) -> Result<()> {
        self.refresh.run(app_id).await
    }

    /// Turn backend container events into per-application refreshes until shutdown.
    ///
    /// A closed event stream is re-subscribed after the watch backoff.
    pub async fn observe_events(&self, mut shutdown: Shutdown) {
        let backoff = self.ctx.config.watch_backoff();
        let mut attempts: u32 = 0;
        'listen: loop {
            let mut events = self.ctx.backend.listen_container_events();
            loop {
                tokio::select! {
                    _ = shutdown.wait() => {
                        events.unsubscribe();
                        break 'listen;
                    }
                    event = events.next() => match event {
                        Some(event) => {
                            attempts = 0;
                            tracing::trace!(app_id = %event.app_id, state = %event.state, "container event");
                            self.refresh.trigger(event.app_id);
                        }
                        None => {
                            tracing::warn!("container event stream ended");
                            break;
                        }
                    },
                }
            }

            attempts = attempts.saturating_add(1);
            let delay = backoff.next_delay(attempts);
            tracing::debug!(attempts, delay_ms = delay.as_millis() as u64, "re-subscribing to container events");
            tokio::select! {
                _ = shutdown.wait() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }
        tracing::debug!("container event listener stopped");
    }

    /// Wait for executions still running after their triggers stopped.
    pub async fn wait_idle(&self) {
        self.sync.wait_idle().await;
        self.full_scan.wait_idle().await;
        self.refresh.wait_idle().await;
    }
}
