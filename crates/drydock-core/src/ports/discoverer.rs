//! Discoverer port - コントロールプレーンのレプリカ一覧を監視する
//!
//! # 実装
//! - StaticDiscoverer: 固定のメンバー（単一ノード構成など）
//! - ManualDiscoverer: ホストプロセスやテストから明示的に流す

use async_trait::async_trait;

use crate::domain::{ClusterTarget, Result};
use crate::ports::Subscription;

/// メンバーシップのフルスナップショットを流す
///
/// 各スナップショットはアドレス順で、self は高々 1 つ。
/// 検証は受け取った Cluster 側でも行う。
#[async_trait]
pub trait Discoverer: Send + Sync {
    async fn watch(&self) -> Result<Subscription<Vec<ClusterTarget>>>;
}
