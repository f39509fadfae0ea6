//! Coalescer - 冪等なアクションの同時実行を 1 本にまとめる
//!
//! # 保証
//! - `run()` は「呼び出し後に少なくとも 1 回実行が完了したこと」を保証する
//! - 「この呼び出し時点の最新入力で実行されたこと」は保証しない
//!
//! 実行は専用タスクで行うため、待機中の呼び出し側が drop されても実行は中断されない。
//! ロックは bookkeeping の間だけ保持し、await を跨がない。
//!
//! 実行タスクは TaskGroup の外で動く。停止時は `wait_idle()` で残りの実行を待つ。

mod keyed;

pub use keyed::KeyedCoalescer;

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use tokio::sync::{Notify, watch};

use crate::domain::{CoreError, Result};
use crate::tasks::Shutdown;

pub(crate) type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

/// 実行中の 1 回分の結果チャネル（None = 未完了）
pub(crate) type Flight = watch::Receiver<Option<Result<()>>>;

pub(crate) async fn await_flight(mut rx: Flight) -> Result<()> {
    match rx.wait_for(Option::is_some).await {
        Ok(outcome) => outcome.clone().unwrap_or(Err(CoreError::Aborted)),
        // 実行タスクが結果を送らずに終わった（panic など）
        Err(_) => Err(CoreError::Aborted),
    }
}

/// Clears an in-flight slot when the executing task ends, even by panic.
pub(crate) struct ClearOnDrop<F: FnMut()>(pub(crate) F);

impl<F: FnMut()> Drop for ClearOnDrop<F> {
    fn drop(&mut self) {
        (self.0)();
    }
}

pub struct Coalescer {
    name: &'static str,
    action: Arc<dyn Fn() -> BoxFuture<Result<()>> + Send + Sync>,
    inflight: Arc<Mutex<Option<Flight>>>,
    pending: Notify,
}

impl Coalescer {
    pub fn new<F, Fut>(name: &'static str, action: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        Self {
            name,
            action: Arc::new(move || -> BoxFuture<Result<()>> { Box::pin(action()) }),
            inflight: Arc::new(Mutex::new(None)),
            pending: Notify::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_running(&self) -> bool {
        self.inflight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    /// Start an execution, or join the one already in flight, and wait for its result.
    pub async fn run(&self) -> Result<()> {
        await_flight(self.join_or_start()).await
    }

    fn join_or_start(&self) -> Flight {
        let mut slot = self.inflight.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(flight) = slot.as_ref() {
            tracing::trace!(coalescer = self.name, "joining in-flight execution");
            return flight.clone();
        }

        let (tx, rx) = watch::channel(None);
        *slot = Some(rx.clone());
        drop(slot);

        let fut = (self.action)();
        let inflight = Arc::clone(&self.inflight);
        tokio::spawn(async move {
            let clear = ClearOnDrop(move || {
                inflight.lock().unwrap_or_else(|e| e.into_inner()).take();
            });
            let result = fut.await;
            // 結果を送る前に枠を空ける: 結果を見てから呼んだ run() は新しい実行を始める
            drop(clear);
            tx.send_replace(Some(result));
        });
        rx
    }

    /// Wait until no execution is in flight.
    pub async fn wait_idle(&self) {
        loop {
            let flight = self
                .inflight
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .clone();
            match flight {
                Some(flight) => {
                    let _ = await_flight(flight).await;
                }
                None => return,
            }
        }
    }

    /// Fire-and-forget request, served by `serve()`.
    ///
    /// Any number of triggers that arrive while an execution is running
    /// collapse into a single follow-up execution.
    pub fn trigger(&self) {
        self.pending.notify_one();
    }

    /// Serve `trigger()` requests until shutdown.
    pub async fn serve(&self, mut shutdown: Shutdown) {
        loop {
            tokio::select! {
                _ = shutdown.wait() => break,
                _ = self.pending.notified() => {}
            }
            if shutdown.is_triggered() {
                break;
            }
            if let Err(e) = self.run().await {
                tracing::warn!(coalescer = self.name, error = %e, "coalesced execution failed");
            }
        }
        tracing::debug!(coalescer = self.name, "trigger pump stopped");
    }
}
