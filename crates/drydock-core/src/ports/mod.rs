//! Ports - 抽象化レイヤー
//!
//! Hexagonal Architecture の「ポート」。コアはこの trait だけに依存し、
//! 具体的なストレージやバックエンドはホストプロセスが注入する。

pub mod backend;
pub mod broadcaster;
pub mod clock;
pub mod discoverer;
pub mod dispatch;
pub mod id_generator;
pub mod repository;
pub mod subscription;

pub use self::backend::Backend;
pub use self::broadcaster::StaticSiteBroadcaster;
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::discoverer::Discoverer;
pub use self::dispatch::BuildDispatcher;
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::repository::{
    ApplicationCondition, ApplicationRepository, ApplicationUpdate, BuildCondition,
    BuildRepository, BuildUpdate, CurrentBuildSwap, EnvironmentRepository,
};
pub use self::subscription::{EventBus, Subscription};
