//! CoreContext - 各コンポーネントに渡す依存の束
//!
//! グローバル状態は持たない。`CdServiceBuilder` が一度だけ組み立て、
//! clone して各タスクへ渡す（中身はすべて `Arc`）。

use std::sync::Arc;

use crate::app::config::CoreConfig;
use crate::cluster::Cluster;
use crate::ports::{
    ApplicationRepository, Backend, BuildDispatcher, BuildRepository, Clock,
    EnvironmentRepository, IdGenerator, StaticSiteBroadcaster,
};

#[derive(Clone)]
pub struct CoreContext {
    pub apps: Arc<dyn ApplicationRepository>,
    pub builds: Arc<dyn BuildRepository>,
    pub envs: Arc<dyn EnvironmentRepository>,
    pub backend: Arc<dyn Backend>,
    pub dispatcher: Arc<dyn BuildDispatcher>,
    pub broadcaster: Arc<dyn StaticSiteBroadcaster>,
    pub cluster: Arc<Cluster>,
    pub clock: Arc<dyn Clock>,
    pub ids: Arc<dyn IdGenerator>,
    pub config: Arc<CoreConfig>,
}
