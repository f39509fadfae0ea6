//! Impls - 実装（開発用・テスト用）
//!
//! このモジュールには ports の実装を含めます。
//!
//! # 含まれる実装
//! - **InMemoryStore**: 3 つの repository をまとめた正本
//! - **InMemoryBackend**: 差分適用するコンテナ基盤
//! - **LocalDispatcher**: プロセス内のビルド受け渡し（簡易ビルダー付き）
//! - **StaticDiscoverer / ManualDiscoverer**: メンバーシップの供給源
//! - **LoggingBroadcaster**: 静的ホスティングへの通知をログに残す
//!
//! # 本番用実装
//! SQL ストアや Docker / Kubernetes ドライバはホストプロセス側で ports を実装する。

pub mod broadcaster;
pub mod discoverer;
pub mod inmem_backend;
pub mod inmem_dispatch;
pub mod inmem_store;

pub use self::broadcaster::LoggingBroadcaster;
pub use self::discoverer::{ManualDiscoverer, StaticDiscoverer};
pub use self::inmem_backend::InMemoryBackend;
pub use self::inmem_dispatch::LocalDispatcher;
pub use self::inmem_store::InMemoryStore;
