//! In-memory wiring shared by the app-layer tests.

use std::sync::Arc;

use chrono::{TimeZone, Utc};

use crate::app::config::CoreConfig;
use crate::app::context::CoreContext;
use crate::cluster::{Backoff, Cluster};
use crate::domain::{AppId, Application, Commit, DeployType};
use crate::impls::{
    InMemoryBackend, InMemoryStore, LocalDispatcher, LoggingBroadcaster, ManualDiscoverer,
};
use crate::ports::{Clock, FixedClock, IdGenerator, UlidGenerator};

pub(crate) const CONFIG_HASH: &str = "h";

pub(crate) struct Harness {
    pub clock: Arc<FixedClock>,
    pub store: Arc<InMemoryStore>,
    pub backend: Arc<InMemoryBackend>,
    pub dispatcher: Arc<LocalDispatcher>,
    pub broadcaster: Arc<LoggingBroadcaster>,
    pub discoverer: Arc<ManualDiscoverer>,
    pub cluster: Arc<Cluster>,
    pub ctx: CoreContext,
}

impl Harness {
    /// Single replica that owns every key.
    pub fn new() -> Self {
        let h = Self::unjoined();
        h.cluster
            .apply(vec![crate::domain::ClusterTarget::this("10.0.0.1")])
            .unwrap();
        h
    }

    /// No membership snapshot yet.
    pub fn unjoined() -> Self {
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        ));
        let store = Arc::new(InMemoryStore::new(clock.clone()));
        let backend = Arc::new(InMemoryBackend::new(64));
        let dispatcher = Arc::new(LocalDispatcher::new(64));
        let broadcaster = Arc::new(LoggingBroadcaster::new());
        let discoverer = Arc::new(ManualDiscoverer::new());
        let cluster = Arc::new(Cluster::new(discoverer.clone(), Backoff::default()));
        let ctx = CoreContext {
            apps: store.clone(),
            builds: store.clone(),
            envs: store.clone(),
            backend: backend.clone(),
            dispatcher: dispatcher.clone(),
            broadcaster: broadcaster.clone(),
            cluster: cluster.clone(),
            clock: clock.clone(),
            ids: Arc::new(UlidGenerator::new(clock.clone())),
            config: Arc::new(CoreConfig::default()),
        };
        Self {
            clock,
            store,
            backend,
            dispatcher,
            broadcaster,
            discoverer,
            cluster,
            ctx,
        }
    }

    pub fn ids(&self) -> &dyn IdGenerator {
        self.ctx.ids.as_ref()
    }

    pub async fn app(&self, name: &str, deploy_type: DeployType, commit: Option<&str>) -> AppId {
        let app = Application::new(self.ids().generate_app_id(), name, deploy_type, self.clock.now())
            .with_running(true)
            .with_config_hash(CONFIG_HASH)
            .with_commit(commit.map(Commit::new).unwrap_or_else(Commit::unresolved));
        let id = app.id;
        self.store.insert_application(app).await;
        id
    }

    pub async fn runtime_app(&self, name: &str, commit: Option<&str>) -> AppId {
        self.app(name, DeployType::Runtime, commit).await
    }

    pub fn advance_secs(&self, secs: i64) {
        self.clock.advance(chrono::Duration::seconds(secs));
    }
}
