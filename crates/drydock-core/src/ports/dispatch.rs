//! BuildDispatcher port - ビルド実行サブシステムへの受け渡し
//!
//! 受け取った build id を 1 つのビルダーにだけ割り当てるのは dispatcher 側の責務。
//! 状態遷移（Building / Succeeded / Failed）は dispatcher がストアへ書き戻す。

use async_trait::async_trait;

use crate::domain::{BuildId, Result};
use crate::ports::Subscription;

#[async_trait]
pub trait BuildDispatcher: Send + Sync {
    /// 古い順に並んだ Queued ビルドを渡す
    async fn start_builds(&self, ids: &[BuildId]) -> Result<()>;

    /// ビルダーが空いたことの通知（中身のないトリガー）
    fn listen_builder_idle(&self) -> Subscription<()>;

    /// ビルドが終端状態になったことの通知（中身のないトリガー）
    fn listen_build_settled(&self) -> Subscription<()>;
}
