//! drydock - 開発用のシングルプロセス起動
//!
//! in-memory の ports で CdService を組み立て、デモ用のアプリを投入して
//! 定期的に状態を JSON で出力する。Ctrl-C で停止。

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use drydock_core::app::{CdService, CdServiceBuilder, CoreConfig};
use drydock_core::domain::{Application, Commit, DeployType};
use drydock_core::impls::{
    InMemoryBackend, InMemoryStore, LocalDispatcher, LoggingBroadcaster, StaticDiscoverer,
};
use drydock_core::ports::{Clock, IdGenerator, SystemClock, UlidGenerator};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "drydock", about = "Run a drydock control-plane replica in-process")]
struct Args {
    /// JSON file holding a CoreConfig; missing fields use defaults.
    #[arg(long, env = "DRYDOCK_CONFIG")]
    config: Option<PathBuf>,

    /// Address this replica is known by.
    #[arg(long, env = "DRYDOCK_ADDRESS", default_value = "127.0.0.1:7000")]
    address: String,

    /// Other replicas, comma separated.
    #[arg(long, env = "DRYDOCK_PEERS", value_delimiter = ',')]
    peers: Vec<String>,

    #[arg(long, default_value_t = 5)]
    status_interval_secs: u64,

    /// Simulated time a build takes.
    #[arg(long, default_value_t = 2)]
    build_secs: u64,
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<CoreConfig> {
    let Some(path) = path else {
        return Ok(CoreConfig::default());
    };
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))
}

async fn seed(store: &InMemoryStore, ids: &dyn IdGenerator, clock: &dyn Clock) {
    let api = Application::new(ids.generate_app_id(), "demo-api", DeployType::Runtime, clock.now())
        .with_running(true)
        .with_commit(Commit::new("abc123"))
        .with_config_hash("demo");
    let api_id = api.id;
    store.insert_application(api).await;
    store
        .set_environment(
            api_id,
            BTreeMap::from([("PORT".to_string(), "8080".to_string())]),
        )
        .await;

    let docs = Application::new(ids.generate_app_id(), "demo-docs", DeployType::Static, clock.now())
        .with_running(true)
        .with_commit(Commit::new("def456"))
        .with_config_hash("demo");
    store.insert_application(docs).await;

    tracing::info!(%api_id, "seeded demo applications");
}

async fn report(service: &CdService) {
    match service.status().await {
        Ok(status) => match serde_json::to_string(&status) {
            Ok(json) => println!("{json}"),
            Err(e) => tracing::warn!(error = %e, "failed to encode status"),
        },
        Err(e) => tracing::warn!(error = %e, "failed to read status"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let config = load_config(args.config.as_ref())?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let ids = UlidGenerator::new(Arc::clone(&clock));
    let store = Arc::new(InMemoryStore::new(Arc::clone(&clock)));
    let backend = Arc::new(InMemoryBackend::new(config.event_capacity));
    let dispatcher = Arc::new(LocalDispatcher::simulating(
        config.event_capacity,
        store.clone(),
        Duration::from_secs(args.build_secs),
    ));
    let discoverer = StaticDiscoverer::new(args.peers.clone(), &args.address)
        .context("invalid cluster membership")?;
    let status_every = Duration::from_secs(args.status_interval_secs.max(1));

    let service = CdServiceBuilder::new()
        .store(store.clone())
        .backend(backend)
        .dispatcher(dispatcher)
        .broadcaster(Arc::new(LoggingBroadcaster::new()))
        .discoverer(Arc::new(discoverer))
        .clock(Arc::clone(&clock))
        .config(config)
        .build()?;

    seed(&store, &ids, clock.as_ref()).await;

    service.start();
    let queued = service
        .scheduler()
        .register_all()
        .await
        .context("registering builds for the seeded applications")?;
    tracing::info!(address = %args.address, peers = args.peers.len(), queued, "drydock started");

    let mut ticker = tokio::time::interval(status_every);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        tokio::select! {
            _ = ticker.tick() => report(&service).await,
            res = &mut ctrl_c => {
                res.context("waiting for ctrl-c")?;
                break;
            }
        }
    }

    tracing::info!("shutting down");
    service.stop().await;
    report(&service).await;
    Ok(())
}
