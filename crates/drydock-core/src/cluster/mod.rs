//! Cluster - レプリカ間での作業の分担
//!
//! Discoverer からのスナップショットを検証して保持し、
//! 「このキーは自分の担当か」「自分はリーダーか」に答える。
//!
//! # 保証
//! - 不正なスナップショットは捨てる（直前の有効なスナップショットを保持）
//! - スナップショットを一度も受け取っていない間は何も担当しない（fail closed）
//! - watch が失敗・終了したらバックオフ付きで張り直す

mod backoff;
mod jump;
mod membership;

pub use backoff::Backoff;
pub use jump::{bucket_of, jump_hash, key_digest};
pub use membership::Membership;

use std::sync::{Arc, RwLock};

use crate::domain::{ClusterTarget, MembershipError};
use crate::ports::Discoverer;
use crate::tasks::Shutdown;

pub struct Cluster {
    discoverer: Arc<dyn Discoverer>,
    backoff: Backoff,
    view: RwLock<Option<Arc<Membership>>>,
}

impl Cluster {
    pub fn new(discoverer: Arc<dyn Discoverer>, backoff: Backoff) -> Self {
        Self {
            discoverer,
            backoff,
            view: RwLock::new(None),
        }
    }

    /// The latest valid snapshot, if any has been received.
    pub fn snapshot(&self) -> Option<Arc<Membership>> {
        self.view.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn is_leader(&self) -> bool {
        self.snapshot().is_some_and(|m| m.is_leader())
    }

    /// Whether this replica owns `key` under the current snapshot.
    pub fn assigned(&self, key: &str) -> bool {
        self.snapshot().is_some_and(|m| m.assigned(key))
    }

    /// Addresses of every other replica.
    pub fn all_neighbors(&self) -> Vec<String> {
        self.snapshot().map(|m| m.neighbors()).unwrap_or_default()
    }

    pub fn size(&self) -> usize {
        self.snapshot().map_or(0, |m| m.len())
    }

    pub fn self_index(&self) -> Option<usize> {
        self.snapshot().and_then(|m| m.self_index())
    }

    /// Validate `targets` and make them the current snapshot.
    ///
    /// On error the previous snapshot stays in effect.
    pub fn apply(&self, targets: Vec<ClusterTarget>) -> Result<(), MembershipError> {
        let next = Arc::new(Membership::new(targets)?);
        tracing::info!(
            members = next.len(),
            self_index = ?next.self_index(),
            leader = next.is_leader(),
            "membership updated"
        );
        *self.view.write().unwrap_or_else(|e| e.into_inner()) = Some(next);
        Ok(())
    }

    /// Follow the discoverer until shutdown, re-establishing the watch with
    /// backoff whenever it fails or ends.
    pub async fn run(self: Arc<Self>, mut shutdown: Shutdown) {
        let mut attempts: u32 = 0;
        loop {
            if shutdown.is_triggered() {
                break;
            }

            match self.discoverer.watch().await {
                Ok(mut sub) => loop {
                    tokio::select! {
                        _ = shutdown.wait() => {
                            tracing::debug!("membership watch stopped");
                            return;
                        }
                        next = sub.next() => match next {
                            Some(targets) => match self.apply(targets) {
                                Ok(()) => attempts = 0,
                                Err(e) => {
                                    tracing::warn!(error = %e, "discarding invalid membership snapshot");
                                }
                            },
                            None => {
                                tracing::warn!("membership stream ended");
                                break;
                            }
                        },
                    }
                },
                Err(e) => {
                    tracing::warn!(error = %e, "failed to watch membership");
                }
            }

            attempts = attempts.saturating_add(1);
            let delay = self.backoff.next_delay(attempts);
            tracing::debug!(attempts, delay_ms = delay.as_millis() as u64, "retrying membership watch");
            tokio::select! {
                _ = shutdown.wait() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }
        tracing::debug!("membership watch stopped");
    }
}
