//! InMemoryBackend - 開発用・テスト用のコンテナ実行基盤
//!
//! `synchronize` は差分だけを適用し、変化したコンテナごとにイベントを流す。
//! 同じ入力を繰り返し渡しても変化は起きない。

use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;

use crate::domain::{
    AppId, Container, ContainerEvent, ContainerState, CoreError, DesiredState, Result,
    RuntimeTarget, StaticSite,
};
use crate::ports::{Backend, EventBus, Subscription};

#[derive(Default)]
struct Fleet {
    deployed: BTreeMap<AppId, RuntimeTarget>,
    containers: BTreeMap<AppId, Container>,
    static_sites: Vec<StaticSite>,
}

pub struct InMemoryBackend {
    fleet: Mutex<Fleet>,
    inputs: Mutex<Vec<DesiredState>>,
    changes: AtomicUsize,
    events: EventBus<ContainerEvent>,
    unavailable: AtomicBool,
    failing_lookups: Mutex<HashSet<AppId>>,
}

impl InMemoryBackend {
    pub fn new(event_capacity: usize) -> Self {
        Self {
            fleet: Mutex::new(Fleet::default()),
            inputs: Mutex::new(Vec::new()),
            changes: AtomicUsize::new(0),
            events: EventBus::new(event_capacity),
            unavailable: AtomicBool::new(false),
            failing_lookups: Mutex::new(HashSet::new()),
        }
    }

    fn fleet(&self) -> std::sync::MutexGuard<'_, Fleet> {
        self.fleet.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(CoreError::Backend("backend unreachable".into()));
        }
        Ok(())
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Make `get_container` fail for one application.
    pub fn fail_lookup(&self, app_id: AppId, failing: bool) {
        let mut failing_lookups = self.failing_lookups.lock().unwrap_or_else(|e| e.into_inner());
        if failing {
            failing_lookups.insert(app_id);
        } else {
            failing_lookups.remove(&app_id);
        }
    }

    /// Every input `synchronize` has accepted, oldest first.
    pub fn sync_inputs(&self) -> Vec<DesiredState> {
        self.inputs.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Number of backend-visible changes applied so far.
    pub fn changes(&self) -> usize {
        self.changes.load(Ordering::SeqCst)
    }

    pub fn deployed(&self, app_id: AppId) -> Option<RuntimeTarget> {
        self.fleet().deployed.get(&app_id).cloned()
    }

    pub fn static_sites(&self) -> Vec<StaticSite> {
        self.fleet().static_sites.clone()
    }

    /// Simulate a container lifecycle change outside of `synchronize`.
    pub fn set_container_state(&self, app_id: AppId, state: ContainerState, message: &str) {
        self.fleet().containers.insert(
            app_id,
            Container {
                app_id,
                state,
                message: message.to_string(),
            },
        );
        self.events.publish(ContainerEvent { app_id, state });
    }

    /// Simulate the event connection dropping: every open event stream ends.
    pub fn close_event_streams(&self) {
        self.events.close();
    }

    pub fn event_subscribers(&self) -> usize {
        self.events.subscriber_count()
    }

    /// Simulate a container disappearing.
    pub fn remove_container(&self, app_id: AppId) {
        self.fleet().containers.remove(&app_id);
        self.events.publish(ContainerEvent {
            app_id,
            state: ContainerState::Missing,
        });
    }

    fn converge(&self, desired: &DesiredState) -> Vec<ContainerEvent> {
        let mut fleet = self.fleet();
        let mut events = Vec::new();

        let wanted: HashSet<AppId> = desired.runtime.iter().map(|t| t.app_id).collect();
        let stale: Vec<AppId> = fleet
            .deployed
            .keys()
            .filter(|id| !wanted.contains(id))
            .copied()
            .collect();
        for app_id in stale {
            fleet.deployed.remove(&app_id);
            fleet.containers.remove(&app_id);
            events.push(ContainerEvent {
                app_id,
                state: ContainerState::Missing,
            });
        }

        for target in &desired.runtime {
            if fleet.deployed.get(&target.app_id) == Some(target) {
                continue;
            }
            tracing::debug!(app_id = %target.app_id, image = %target.image(), "replacing container");
            fleet.deployed.insert(target.app_id, target.clone());
            fleet.containers.insert(
                target.app_id,
                Container {
                    app_id: target.app_id,
                    state: ContainerState::Running,
                    message: target.image(),
                },
            );
            events.push(ContainerEvent {
                app_id: target.app_id,
                state: ContainerState::Running,
            });
        }

        if fleet.static_sites != desired.static_sites {
            fleet.static_sites = desired.static_sites.clone();
            self.changes.fetch_add(1, Ordering::SeqCst);
        }
        self.changes.fetch_add(events.len(), Ordering::SeqCst);
        events
    }
}

#[async_trait]
impl Backend for InMemoryBackend {
    async fn synchronize(&self, desired: &DesiredState) -> Result<()> {
        self.check_available()?;
        self.inputs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(desired.clone());

        for event in self.converge(desired) {
            self.events.publish(event);
        }
        Ok(())
    }

    async fn get_container(&self, app_id: AppId) -> Result<Option<Container>> {
        self.check_available()?;
        if self
            .failing_lookups
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&app_id)
        {
            return Err(CoreError::Backend(format!("lookup of {app_id} failed")));
        }
        Ok(self.fleet().containers.get(&app_id).cloned())
    }

    async fn list_containers(&self) -> Result<Vec<Container>> {
        self.check_available()?;
        Ok(self.fleet().containers.values().cloned().collect())
    }

    fn listen_container_events(&self) -> Subscription<ContainerEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::BuildId;
    use ulid::Ulid;

    fn target(app_id: AppId, tag: &str) -> RuntimeTarget {
        RuntimeTarget {
            app_id,
            build_id: BuildId::from_ulid(Ulid::from_parts(1, 1)),
            image_name: "registry.local/app".into(),
            image_tag: tag.into(),
            envs: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn identical_input_changes_nothing() {
        let backend = InMemoryBackend::new(16);
        let mut events = backend.listen_container_events();
        let app_id = AppId::from_ulid(Ulid::new());
        let desired = DesiredState::new(vec![target(app_id, "t1")], vec![]);

        backend.synchronize(&desired).await.unwrap();
        assert_eq!(backend.changes(), 1);
        assert_eq!(events.next().await.unwrap().state, ContainerState::Running);

        backend.synchronize(&desired).await.unwrap();
        assert_eq!(backend.changes(), 1);
        assert_eq!(backend.sync_inputs().len(), 2);
    }

    #[tokio::test]
    async fn dropped_targets_are_removed() {
        let backend = InMemoryBackend::new(16);
        let a = AppId::from_ulid(Ulid::new());
        let b = AppId::from_ulid(Ulid::new());

        backend
            .synchronize(&DesiredState::new(vec![target(a, "t"), target(b, "t")], vec![]))
            .await
            .unwrap();
        backend
            .synchronize(&DesiredState::new(vec![target(a, "t")], vec![]))
            .await
            .unwrap();

        assert!(backend.get_container(a).await.unwrap().is_some());
        assert!(backend.get_container(b).await.unwrap().is_none());
        assert_eq!(backend.list_containers().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn static_sites_follow_the_input() {
        let backend = InMemoryBackend::new(16);
        let site = StaticSite {
            app_id: AppId::from_ulid(Ulid::new()),
            build_id: BuildId::from_ulid(Ulid::new()),
            artifact: "artifact-1".into(),
        };
        let desired = DesiredState::new(vec![], vec![site.clone()]);
        backend.synchronize(&desired).await.unwrap();
        backend.synchronize(&desired).await.unwrap();
        assert_eq!(backend.static_sites(), vec![site]);
        assert_eq!(backend.changes(), 1);
    }

    #[tokio::test]
    async fn failed_lookup_is_distinct_from_absence() {
        let backend = InMemoryBackend::new(16);
        let app_id = AppId::from_ulid(Ulid::new());
        assert!(backend.get_container(app_id).await.unwrap().is_none());

        backend.fail_lookup(app_id, true);
        assert!(backend.get_container(app_id).await.is_err());
    }
}
