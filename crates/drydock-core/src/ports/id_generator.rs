//! IdGenerator port - ID 生成の抽象化
//!
//! # 実装
//! - **UlidGenerator**: Clock の時刻を timestamp 部に使う ULID

use crate::domain::ids::{AppId, BuildId};
use crate::ports::Clock;
use ulid::Ulid;

/// IdGenerator は分散環境で衝突しない ID を生成
///
/// 複数のタスクから共有されるため `Send + Sync` を要求する。
pub trait IdGenerator: Send + Sync {
    fn generate_app_id(&self) -> AppId;

    fn generate_build_id(&self) -> BuildId;
}

/// UlidGenerator は ULID ベースの ID 生成器
///
/// FixedClock を渡すと timestamp 部が固定される（ランダム部は残る）。
pub struct UlidGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }

    fn next_ulid(&self) -> Ulid {
        let timestamp_ms = self.clock.now().timestamp_millis().max(0) as u64;
        Ulid::from_parts(timestamp_ms, rand::random())
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn generate_app_id(&self) -> AppId {
        AppId::from(self.next_ulid())
    }

    fn generate_build_id(&self) -> BuildId {
        BuildId::from(self.next_ulid())
    }
}
