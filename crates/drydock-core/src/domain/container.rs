//! Container - バックエンドから観測した実状態

use serde::{Deserialize, Serialize};

use super::application::ContainerState;
use super::errors::CoreError;
use super::ids::AppId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Container {
    pub app_id: AppId,
    pub state: ContainerState,
    pub message: String,
}

/// コンテナのライフサイクル変化通知（中身は再取得のトリガーに過ぎない）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerEvent {
    pub app_id: AppId,
    pub state: ContainerState,
}

/// ストレージに書き込む観測結果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservedState {
    pub state: ContainerState,
    pub message: String,
}

impl ObservedState {
    pub fn missing() -> Self {
        Self {
            state: ContainerState::Missing,
            message: String::new(),
        }
    }
}

impl From<&Container> for ObservedState {
    fn from(c: &Container) -> Self {
        Self {
            state: c.state,
            message: c.message.clone(),
        }
    }
}

/// 1 アプリケーション分の観測結果（3 値）
///
/// `Unavailable` は「存在しない」とは区別する。問い合わせに失敗した場合に
/// Missing と決めつけて保存済みの状態を上書きしないため。
#[derive(Debug, Clone)]
pub enum Observation {
    Present(Container),
    Absent,
    Unavailable(CoreError),
}

impl Observation {
    pub fn from_lookup(result: Result<Option<Container>, CoreError>) -> Self {
        match result {
            Ok(Some(c)) => Observation::Present(c),
            Ok(None) => Observation::Absent,
            Err(e) => Observation::Unavailable(e),
        }
    }

    /// 書き込むべき状態。`Unavailable` なら None（書き込まない）
    pub fn to_state(&self) -> Option<ObservedState> {
        match self {
            Observation::Present(c) => Some(ObservedState::from(c)),
            Observation::Absent => Some(ObservedState::missing()),
            Observation::Unavailable(_) => None,
        }
    }
}
