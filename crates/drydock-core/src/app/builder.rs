//! CdServiceBuilder - ports を集めて CdService を組み立てる
//!
//! 欠けている ports と不正な設定は build() の時点でまとめて報告する。

use std::sync::Arc;

use crate::app::config::CoreConfig;
use crate::app::context::CoreContext;
use crate::app::service::CdService;
use crate::cluster::Cluster;
use crate::domain::CoreError;
use crate::ports::{
    ApplicationRepository, Backend, BuildDispatcher, BuildRepository, Clock, Discoverer,
    EnvironmentRepository, IdGenerator, StaticSiteBroadcaster, SystemClock, UlidGenerator,
};

/// CdServiceBuilder は CdService を構築
///
/// # 使用例
/// ```ignore
/// let service = CdServiceBuilder::new()
///     .store(store)
///     .backend(backend)
///     .dispatcher(dispatcher)
///     .broadcaster(broadcaster)
///     .discoverer(discoverer)
///     .build()?;
/// ```
///
/// # Fail-fast 設計
/// - ports が 1 つでも欠けていれば build() が BuildError を返す
/// - 設定値も build() 時に検証する
/// - Clock / IdGenerator は省略時に SystemClock / UlidGenerator を使う
#[derive(Default)]
pub struct CdServiceBuilder {
    apps: Option<Arc<dyn ApplicationRepository>>,
    builds: Option<Arc<dyn BuildRepository>>,
    envs: Option<Arc<dyn EnvironmentRepository>>,
    backend: Option<Arc<dyn Backend>>,
    dispatcher: Option<Arc<dyn BuildDispatcher>>,
    broadcaster: Option<Arc<dyn StaticSiteBroadcaster>>,
    discoverer: Option<Arc<dyn Discoverer>>,
    clock: Option<Arc<dyn Clock>>,
    ids: Option<Arc<dyn IdGenerator>>,
    config: CoreConfig,
}

/// BuildError はサービス構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("Missing components: {0:?}. These ports must be provided before build().")]
    MissingComponents(Vec<&'static str>),

    #[error(transparent)]
    InvalidConfig(#[from] CoreError),
}

impl CdServiceBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// One store serving all three repositories.
    pub fn store<S>(self, store: Arc<S>) -> Self
    where
        S: ApplicationRepository + BuildRepository + EnvironmentRepository + 'static,
    {
        self.applications(store.clone())
            .builds(store.clone())
            .environments(store)
    }

    pub fn applications(mut self, apps: Arc<dyn ApplicationRepository>) -> Self {
        self.apps = Some(apps);
        self
    }

    pub fn builds(mut self, builds: Arc<dyn BuildRepository>) -> Self {
        self.builds = Some(builds);
        self
    }

    pub fn environments(mut self, envs: Arc<dyn EnvironmentRepository>) -> Self {
        self.envs = Some(envs);
        self
    }

    pub fn backend(mut self, backend: Arc<dyn Backend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn dispatcher(mut self, dispatcher: Arc<dyn BuildDispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    pub fn broadcaster(mut self, broadcaster: Arc<dyn StaticSiteBroadcaster>) -> Self {
        self.broadcaster = Some(broadcaster);
        self
    }

    pub fn discoverer(mut self, discoverer: Arc<dyn Discoverer>) -> Self {
        self.discoverer = Some(discoverer);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    pub fn config(mut self, config: CoreConfig) -> Self {
        self.config = config;
        self
    }

    /// # 検証
    /// - 必須 ports が全て設定されているかチェック
    /// - CoreConfig::validate()
    pub fn build(self) -> Result<CdService, BuildError> {
        let mut missing = Vec::new();
        if self.apps.is_none() {
            missing.push("applications");
        }
        if self.builds.is_none() {
            missing.push("builds");
        }
        if self.envs.is_none() {
            missing.push("environments");
        }
        if self.backend.is_none() {
            missing.push("backend");
        }
        if self.dispatcher.is_none() {
            missing.push("dispatcher");
        }
        if self.broadcaster.is_none() {
            missing.push("broadcaster");
        }
        if self.discoverer.is_none() {
            missing.push("discoverer");
        }

        let (
            Some(apps),
            Some(builds),
            Some(envs),
            Some(backend),
            Some(dispatcher),
            Some(broadcaster),
            Some(discoverer),
        ) = (
            self.apps,
            self.builds,
            self.envs,
            self.backend,
            self.dispatcher,
            self.broadcaster,
            self.discoverer,
        )
        else {
            return Err(BuildError::MissingComponents(missing));
        };
        self.config.validate()?;

        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let ids = self
            .ids
            .unwrap_or_else(|| Arc::new(UlidGenerator::new(Arc::clone(&clock))));
        let cluster = Arc::new(Cluster::new(discoverer, self.config.watch_backoff()));

        Ok(CdService::new(CoreContext {
            apps,
            builds,
            envs,
            backend,
            dispatcher,
            broadcaster,
            cluster,
            clock,
            ids,
            config: Arc::new(self.config),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::lifecycle::LifecycleState;
    use crate::impls::{
        InMemoryBackend, InMemoryStore, LocalDispatcher, LoggingBroadcaster, StaticDiscoverer,
    };

    fn complete() -> CdServiceBuilder {
        CdServiceBuilder::new()
            .store(Arc::new(InMemoryStore::new(Arc::new(SystemClock))))
            .backend(Arc::new(InMemoryBackend::new(16)))
            .dispatcher(Arc::new(LocalDispatcher::new(16)))
            .broadcaster(Arc::new(LoggingBroadcaster::new()))
            .discoverer(Arc::new(StaticDiscoverer::single("127.0.0.1:7000").unwrap()))
    }

    #[test]
    fn test_build_success() {
        let service = complete().build().unwrap();
        assert_eq!(service.lifecycle(), LifecycleState::NotStarted);
    }

    #[test]
    fn test_build_missing_components() {
        let result = CdServiceBuilder::new()
            .backend(Arc::new(InMemoryBackend::new(16)))
            .broadcaster(Arc::new(LoggingBroadcaster::new()))
            .build();
        assert!(matches!(
            result,
            Err(BuildError::MissingComponents(missing))
                if missing == vec!["applications", "builds", "environments", "dispatcher", "discoverer"]
        ));
    }

    #[test]
    fn test_build_invalid_config() {
        let result = complete()
            .config(CoreConfig {
                crash_threshold_secs: 0,
                ..CoreConfig::default()
            })
            .build();
        assert!(matches!(
            result,
            Err(BuildError::InvalidConfig(CoreError::Config(_)))
        ));
    }
}
