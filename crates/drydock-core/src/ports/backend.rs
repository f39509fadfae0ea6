//! Backend port - コンテナ実行基盤（Docker / Kubernetes ドライバ）
//!
//! # 設計原則
//! - `synchronize` は入力と完全に一致するまで実インフラを収束させる
//! - 同じ入力で繰り返し呼んでも追加の変更は起きない（冪等）
//! - 同時に 1 つしか呼ばれない前提（呼び出し側の Coalescer が保証する）

use async_trait::async_trait;

use crate::domain::{AppId, Container, ContainerEvent, DesiredState, Result};
use crate::ports::Subscription;

#[async_trait]
pub trait Backend: Send + Sync {
    async fn synchronize(&self, desired: &DesiredState) -> Result<()>;

    /// `Ok(None)` はコンテナが存在しないことを表す（失敗とは区別する）
    async fn get_container(&self, app_id: AppId) -> Result<Option<Container>>;

    async fn list_containers(&self) -> Result<Vec<Container>>;

    fn listen_container_events(&self) -> Subscription<ContainerEvent>;
}
