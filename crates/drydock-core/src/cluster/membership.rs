//! Validated membership snapshot.

use std::collections::HashSet;

use crate::cluster::jump;
use crate::domain::{ClusterTarget, MembershipError};

/// An immutable, validated view of the replica set.
///
/// Targets are sorted by address; at most one is flagged self. Every
/// question about ownership is answered from this value alone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Membership {
    targets: Vec<ClusterTarget>,
    self_index: Option<usize>,
}

impl Membership {
    pub fn new(mut targets: Vec<ClusterTarget>) -> Result<Self, MembershipError> {
        targets.sort_by(|a, b| a.address.cmp(&b.address));

        let mut seen = HashSet::with_capacity(targets.len());
        let mut self_index: Option<usize> = None;
        for (i, target) in targets.iter().enumerate() {
            if target.address.is_empty() {
                return Err(MembershipError::EmptyAddress);
            }
            if !seen.insert(target.address.as_str()) {
                return Err(MembershipError::DuplicateAddress(target.address.clone()));
            }
            if target.is_self {
                if let Some(prev) = self_index {
                    return Err(MembershipError::MultipleSelf(
                        targets[prev].address.clone(),
                        target.address.clone(),
                    ));
                }
                self_index = Some(i);
            }
        }

        Ok(Self {
            targets,
            self_index,
        })
    }

    pub fn targets(&self) -> &[ClusterTarget] {
        &self.targets
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn self_index(&self) -> Option<usize> {
        self.self_index
    }

    /// Lowest address wins.
    pub fn is_leader(&self) -> bool {
        self.self_index == Some(0)
    }

    pub fn neighbors(&self) -> Vec<String> {
        self.targets
            .iter()
            .filter(|t| !t.is_self)
            .map(|t| t.address.clone())
            .collect()
    }

    pub fn owner_of(&self, key: &str) -> Option<&ClusterTarget> {
        jump::bucket_of(key, self.targets.len()).map(|i| &self.targets[i])
    }

    /// False when this replica is not part of the snapshot.
    pub fn assigned(&self, key: &str) -> bool {
        match self.self_index {
            Some(me) => jump::bucket_of(key, self.targets.len()) == Some(me),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn view(addrs: &[&str], me: Option<&str>) -> Membership {
        let targets = addrs
            .iter()
            .map(|a| {
                if Some(*a) == me {
                    ClusterTarget::this(*a)
                } else {
                    ClusterTarget::new(*a)
                }
            })
            .collect();
        Membership::new(targets).unwrap()
    }

    #[test]
    fn snapshot_is_sorted_and_self_is_located() {
        let m = view(&["10.0.0.3", "10.0.0.1", "10.0.0.2"], Some("10.0.0.2"));
        let addrs: Vec<_> = m.targets().iter().map(|t| t.address.as_str()).collect();
        assert_eq!(addrs, ["10.0.0.1", "10.0.0.2", "10.0.0.3"]);
        assert_eq!(m.self_index(), Some(1));
        assert!(!m.is_leader());
        assert_eq!(m.neighbors(), ["10.0.0.1", "10.0.0.3"]);
    }

    #[test]
    fn lowest_address_is_leader() {
        let m = view(&["b", "a"], Some("a"));
        assert!(m.is_leader());
    }

    #[rstest]
    #[case(vec![ClusterTarget::new("a"), ClusterTarget::new("a")], MembershipError::DuplicateAddress("a".into()))]
    #[case(vec![ClusterTarget::this("a"), ClusterTarget::this("b")], MembershipError::MultipleSelf("a".into(), "b".into()))]
    #[case(vec![ClusterTarget::new("")], MembershipError::EmptyAddress)]
    fn invalid_snapshots_are_rejected(
        #[case] targets: Vec<ClusterTarget>,
        #[case] expected: MembershipError,
    ) {
        assert_eq!(Membership::new(targets).unwrap_err(), expected);
    }

    #[test]
    fn replica_outside_the_snapshot_owns_nothing() {
        let m = view(&["a", "b"], None);
        assert!(!m.assigned("app-1"));
        assert!(m.owner_of("app-1").is_some());
    }

    #[rstest]
    #[case(1)]
    #[case(3)]
    #[case(5)]
    fn exactly_one_replica_owns_each_key(#[case] n: usize) {
        let addrs: Vec<String> = (0..n).map(|i| format!("10.0.0.{i}")).collect();
        let replicas: Vec<Membership> = addrs
            .iter()
            .map(|me| {
                let refs: Vec<&str> = addrs.iter().map(String::as_str).collect();
                view(&refs, Some(me))
            })
            .collect();

        for k in 0..2_000 {
            let key = format!("app-{k}");
            let owners = replicas.iter().filter(|m| m.assigned(&key)).count();
            assert_eq!(owners, 1, "key {key}");
        }
    }
}
