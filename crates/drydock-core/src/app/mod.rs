//! App - アプリケーション層
//!
//! このモジュールは、ports を組み合わせてアプリケーションロジックを実装します。
//!
//! # 主要コンポーネント
//! - **CdServiceBuilder**: サービスの構築とワイヤリング
//! - **CdService**: トリガーの結線とライフサイクル
//! - **BuildScheduler**: ビルドの登録・起動・昇格
//! - **DeploymentReconciler**: 目標状態の push / 実状態の pull
//! - **ReaperLoop**: 応答の無いビルドの回収

pub mod build_scheduler;
pub mod builder;
pub mod config;
pub mod context;
pub mod deploy;
pub mod lifecycle;
pub mod reaper_loop;
pub mod service;
pub mod status;

#[cfg(test)]
pub(crate) mod test_support;

// 主要な型を再エクスポート
pub use self::build_scheduler::{BuildScheduler, Registration};
pub use self::builder::{BuildError, CdServiceBuilder};
pub use self::config::CoreConfig;
pub use self::context::CoreContext;
pub use self::deploy::DeploymentReconciler;
pub use self::lifecycle::{Lifecycle, LifecycleState};
pub use self::reaper_loop::ReaperLoop;
pub use self::service::CdService;
pub use self::status::{BuildCounts, ServiceStatus};
