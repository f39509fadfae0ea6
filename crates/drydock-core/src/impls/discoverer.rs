//! Discoverer implementations.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::watch;

use crate::cluster::Membership;
use crate::domain::{ClusterTarget, CoreError, MembershipError, Result};
use crate::ports::{Discoverer, Subscription};

/// Fixed membership. Emits one snapshot per watch and never changes.
pub struct StaticDiscoverer {
    targets: Vec<ClusterTarget>,
}

impl StaticDiscoverer {
    /// `self_address` is flagged self; it is added when missing from `peers`.
    pub fn new(peers: Vec<String>, self_address: &str) -> std::result::Result<Self, MembershipError> {
        let mut targets: Vec<ClusterTarget> = peers
            .into_iter()
            .filter(|addr| addr != self_address)
            .map(ClusterTarget::new)
            .collect();
        targets.push(ClusterTarget::this(self_address));
        let membership = Membership::new(targets)?;
        Ok(Self {
            targets: membership.targets().to_vec(),
        })
    }

    /// A one-replica cluster.
    pub fn single(self_address: &str) -> std::result::Result<Self, MembershipError> {
        Self::new(Vec::new(), self_address)
    }
}

#[async_trait]
impl Discoverer for StaticDiscoverer {
    async fn watch(&self) -> Result<Subscription<Vec<ClusterTarget>>> {
        Ok(Subscription::constant(self.targets.clone()))
    }
}

/// Membership pushed explicitly by the host process (or a test).
///
/// Watchers always converge on the latest snapshot: a burst of publishes may
/// skip intermediate snapshots but never the last one. New watchers first
/// receive the current snapshot.
pub struct ManualDiscoverer {
    latest: watch::Sender<Option<Vec<ClusterTarget>>>,
    unavailable: AtomicBool,
}

impl ManualDiscoverer {
    pub fn new() -> Self {
        Self {
            latest: watch::Sender::new(None),
            unavailable: AtomicBool::new(false),
        }
    }

    pub fn publish(&self, targets: Vec<ClusterTarget>) {
        self.latest.send_replace(Some(targets));
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }
}

impl Default for ManualDiscoverer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Discoverer for ManualDiscoverer {
    async fn watch(&self) -> Result<Subscription<Vec<ClusterTarget>>> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(CoreError::Discovery("membership source unreachable".into()));
        }
        Ok(Subscription::latest(self.latest.subscribe()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_discoverer_emits_a_sorted_snapshot() {
        let discoverer =
            StaticDiscoverer::new(vec!["10.0.0.3".into(), "10.0.0.1".into()], "10.0.0.2").unwrap();
        let mut sub = discoverer.watch().await.unwrap();
        let snapshot = sub.next().await.unwrap();

        let addrs: Vec<_> = snapshot.iter().map(|t| t.address.as_str()).collect();
        assert_eq!(addrs, ["10.0.0.1", "10.0.0.2", "10.0.0.3"]);
        assert!(snapshot[1].is_self);
    }

    #[test]
    fn static_discoverer_rejects_duplicates() {
        let err = StaticDiscoverer::new(vec!["a".into(), "a".into()], "b").err();
        assert_eq!(err, Some(MembershipError::DuplicateAddress("a".into())));
    }

    #[test]
    fn self_listed_among_peers_is_not_duplicated() {
        assert!(StaticDiscoverer::new(vec!["a".into(), "b".into()], "a").is_ok());
    }

    #[tokio::test]
    async fn manual_discoverer_replays_latest_to_new_watchers() {
        let discoverer = ManualDiscoverer::new();
        discoverer.publish(vec![ClusterTarget::this("a")]);

        let mut late = discoverer.watch().await.unwrap();
        assert_eq!(late.next().await.unwrap(), vec![ClusterTarget::this("a")]);

        discoverer.publish(vec![ClusterTarget::this("a"), ClusterTarget::new("b")]);
        assert_eq!(late.next().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn slow_watcher_still_sees_the_last_snapshot() {
        let discoverer = ManualDiscoverer::new();
        let mut sub = discoverer.watch().await.unwrap();
        for n in 1..=10 {
            let snapshot = (0..n).map(|i| ClusterTarget::new(format!("10.0.0.{i}"))).collect();
            discoverer.publish(snapshot);
        }
        assert_eq!(sub.next().await.unwrap().len(), 10);
    }

    #[tokio::test]
    async fn manual_discoverer_can_fail_watches() {
        let discoverer = ManualDiscoverer::new();
        discoverer.set_unavailable(true);
        assert!(discoverer.watch().await.is_err());
    }
}
