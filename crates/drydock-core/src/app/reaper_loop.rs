//! ReaperLoop - 応答の無いビルドの回収
//!
//! ビルダーが完了を報告せずに落ちると、ビルドは Building のまま残る。
//! 一定間隔でしきい値を超えたものを Failed に倒す。

use std::sync::Arc;
use std::time::Duration;

use crate::app::build_scheduler::BuildScheduler;
use crate::tasks::{Shutdown, every};

/// ReaperLoop は Building のまま止まったビルドを Failed にする
///
/// # フロー
/// 1. BuildScheduler::detect_build_crash() で期限切れを Failed へ
/// 2. 1 件でも回収したらビルドスキャンを起こす（空いたビルダーを埋める）
pub struct ReaperLoop {
    scheduler: Arc<BuildScheduler>,
    interval: Duration,
}

impl ReaperLoop {
    pub fn new(scheduler: Arc<BuildScheduler>, interval: Duration) -> Self {
        Self {
            scheduler,
            interval,
        }
    }

    pub async fn run(self, shutdown: Shutdown) {
        let scheduler = self.scheduler;
        every("crash-reaper", self.interval, shutdown, move || {
            let scheduler = Arc::clone(&scheduler);
            async move {
                match scheduler.detect_build_crash().await {
                    Ok(crashed) if !crashed.is_empty() => {
                        tracing::info!(count = crashed.len(), "reaped crashed builds");
                        scheduler.trigger_scan();
                    }
                    Ok(_) => {}
                    Err(e) => tracing::warn!(error = %e, "crash detection failed"),
                }
            }
        })
        .await;
    }
}
