//! Background task plumbing: one shutdown signal, many owned tasks.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::ports::Subscription;

/// Receiving side of the shutdown signal.
#[derive(Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once shutdown is requested (or the sender is gone).
    pub async fn wait(&mut self) {
        // sender が drop された場合も停止扱い
        let _ = self.rx.wait_for(|stop| *stop).await;
    }
}

/// Task group handle.
/// - `request_shutdown()` で全タスクに停止を通知
/// - `shutdown_and_join()` で全タスクの終了を待つ
///
/// Tasks are expected to stop taking new work on shutdown; work already
/// handed to a backend runs to completion.
pub struct TaskGroup {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<(&'static str, JoinHandle<()>)>,
}

impl TaskGroup {
    pub fn new() -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            shutdown_tx,
            joins: Vec::new(),
        }
    }

    pub fn shutdown(&self) -> Shutdown {
        Shutdown {
            rx: self.shutdown_tx.subscribe(),
        }
    }

    pub fn spawn<F>(&mut self, name: &'static str, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        tracing::debug!(task = name, "spawning background task");
        self.joins.push((name, tokio::spawn(fut)));
    }

    pub fn len(&self) -> usize {
        self.joins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.joins.is_empty()
    }

    pub fn request_shutdown(&self) {
        // send_replace: 受信者がいなくても値は更新される
        self.shutdown_tx.send_replace(true);
    }

    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        for (name, join) in self.joins {
            if let Err(e) = join.await {
                tracing::error!(task = name, error = %e, "background task ended abnormally");
            }
        }
    }
}

impl Default for TaskGroup {
    fn default() -> Self {
        Self::new()
    }
}

/// Run `tick` every `period` until shutdown. The first tick fires immediately.
///
/// A tick in progress is not interrupted by shutdown.
pub async fn every<F, Fut>(name: &'static str, period: Duration, mut shutdown: Shutdown, mut tick: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = shutdown.wait() => break,
            _ = interval.tick() => tick().await,
        }
    }
    tracing::debug!(task = name, "periodic task stopped");
}

/// Handle every item of `events` until shutdown or until the stream ends.
pub async fn for_each_event<T, F, Fut>(
    name: &'static str,
    mut events: Subscription<T>,
    mut shutdown: Shutdown,
    mut handle: F,
) where
    T: Clone,
    F: FnMut(T) -> Fut,
    Fut: Future<Output = ()>,
{
    loop {
        tokio::select! {
            _ = shutdown.wait() => break,
            item = events.next() => match item {
                Some(item) => handle(item).await,
                None => {
                    tracing::warn!(task = name, "event stream ended");
                    break;
                }
            },
        }
    }
    events.unsubscribe();
    tracing::debug!(task = name, "event listener stopped");
}
