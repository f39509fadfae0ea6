//! DesiredState - バックエンドに収束させる宣言的な目標状態
//!
//! 毎回ストレージから再計算され、永続化されない。
//! 同じ入力から同じバイト列になるよう、要素は id 順、環境変数は BTreeMap で保持する。

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::ids::{AppId, BuildId};

/// 1 つの runtime アプリケーションの目標
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeTarget {
    pub app_id: AppId,
    /// 現在のビルド。設定だけが変わった再ビルドでも値が変わる
    pub build_id: BuildId,
    pub image_name: String,
    /// 現在のビルドの commit
    pub image_tag: String,
    pub envs: BTreeMap<String, String>,
}

impl RuntimeTarget {
    pub fn image(&self) -> String {
        format!("{}:{}", self.image_name, self.image_tag)
    }
}

/// 配信中の静的サイト
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticSite {
    pub app_id: AppId,
    pub build_id: BuildId,
    pub artifact: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesiredState {
    pub runtime: Vec<RuntimeTarget>,
    pub static_sites: Vec<StaticSite>,
}

impl DesiredState {
    /// 要素を app id 順に並べて構築する
    pub fn new(mut runtime: Vec<RuntimeTarget>, mut static_sites: Vec<StaticSite>) -> Self {
        runtime.sort_by(|a, b| a.app_id.cmp(&b.app_id));
        static_sites.sort_by(|a, b| a.app_id.cmp(&b.app_id));
        Self {
            runtime,
            static_sites,
        }
    }

    pub fn runtime_target(&self, app_id: AppId) -> Option<&RuntimeTarget> {
        self.runtime.iter().find(|t| t.app_id == app_id)
    }

    pub fn is_empty(&self) -> bool {
        self.runtime.is_empty() && self.static_sites.is_empty()
    }
}
