//! LocalDispatcher - プロセス内のビルド受け渡し
//!
//! # 動作モード
//! - `new()`: 受け取った id を記録するだけ（テスト用）
//! - `simulating()`: 簡易ビルダーとして Queued → Building → Succeeded を
//!   ストアへ書き戻し、idle / settled を通知する（デモ用）

use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::domain::{BuildId, BuildStatus, CoreError, Result};
use crate::ports::{BuildCondition, BuildDispatcher, BuildRepository, BuildUpdate, EventBus, Subscription};

struct Simulation {
    builds: Arc<dyn BuildRepository>,
    build_time: Duration,
}

pub struct LocalDispatcher {
    calls: Mutex<Vec<Vec<BuildId>>>,
    idle: Arc<EventBus<()>>,
    settled: Arc<EventBus<()>>,
    unavailable: AtomicBool,
    simulation: Option<Simulation>,
}

impl LocalDispatcher {
    pub fn new(event_capacity: usize) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            idle: Arc::new(EventBus::new(event_capacity)),
            settled: Arc::new(EventBus::new(event_capacity)),
            unavailable: AtomicBool::new(false),
            simulation: None,
        }
    }

    pub fn simulating(
        event_capacity: usize,
        builds: Arc<dyn BuildRepository>,
        build_time: Duration,
    ) -> Self {
        Self {
            simulation: Some(Simulation { builds, build_time }),
            ..Self::new(event_capacity)
        }
    }

    /// Every id list handed over so far, one entry per call.
    pub fn calls(&self) -> Vec<Vec<BuildId>> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn notify_idle(&self) {
        self.idle.publish(());
    }

    pub fn notify_settled(&self) {
        self.settled.publish(());
    }

    fn spawn_build(&self, sim: &Simulation, id: BuildId) {
        let builds = Arc::clone(&sim.builds);
        let build_time = sim.build_time;
        let idle = Arc::clone(&self.idle);
        let settled = Arc::clone(&self.settled);
        tokio::spawn(async move {
            if let Err(e) = simulate_build(builds.as_ref(), id, build_time).await {
                tracing::warn!(build_id = %id, error = %e, "simulated build failed");
            }
            settled.publish(());
            idle.publish(());
        });
    }
}

async fn simulate_build(builds: &dyn BuildRepository, id: BuildId, build_time: Duration) -> Result<()> {
    // Queued のままのものだけを引き受ける（二重起動しない）
    let claimed = builds
        .update_builds(
            &BuildCondition::id(id).status(BuildStatus::Queued),
            BuildUpdate::status(BuildStatus::Building),
        )
        .await?;
    if claimed == 0 {
        return Ok(());
    }
    tracing::info!(build_id = %id, "build started");
    tokio::time::sleep(build_time).await;

    let update = BuildUpdate {
        status: Some(BuildStatus::Succeeded),
        artifact: Some(format!("artifact-{id}")),
        ..BuildUpdate::default()
    };
    let done = builds
        .update_builds(&BuildCondition::id(id).status(BuildStatus::Building), update)
        .await?;
    if done == 0 {
        tracing::warn!(build_id = %id, "build was settled elsewhere before completing");
    } else {
        tracing::info!(build_id = %id, "build succeeded");
    }
    Ok(())
}

#[async_trait]
impl BuildDispatcher for LocalDispatcher {
    async fn start_builds(&self, ids: &[BuildId]) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(CoreError::Dispatch("no builder reachable".into()));
        }
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(ids.to_vec());

        if let Some(sim) = &self.simulation {
            for id in ids {
                self.spawn_build(sim, *id);
            }
        }
        Ok(())
    }

    fn listen_builder_idle(&self) -> Subscription<()> {
        self.idle.subscribe()
    }

    fn listen_build_settled(&self) -> Subscription<()> {
        self.settled.subscribe()
    }
}
