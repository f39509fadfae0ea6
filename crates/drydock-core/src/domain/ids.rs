//! Domain identifiers (strongly-typed IDs).
//!
//! # ULID ベースの ID + Phantom type
//! - **時刻でソート可能**: 同じ Clock から作られた BuildId は発行順に並ぶ
//! - **分散生成可能**: レプリカ間で調整なしに発行できる
//! - `AppId` と `BuildId` は同じ表現だが、型として混同できない
//!
//! `Display` の出力はそのまま外部キー（シャーディングキー、ログのフィールド）として使う。

use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use std::str::FromStr;
use ulid::Ulid;

/// IdMarker は各 ID 型のマーカー trait
///
/// Display で使うプレフィックス（"app-", "build-"）を提供します。
pub trait IdMarker: Send + Sync + 'static {
    fn prefix() -> &'static str;
}

/// ジェネリック ID 型
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Id<T: IdMarker> {
    ulid: Ulid,
    #[serde(skip)]
    _marker: PhantomData<T>,
}

impl<T: IdMarker> Id<T> {
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self {
            ulid,
            _marker: PhantomData,
        }
    }

    pub fn as_ulid(&self) -> Ulid {
        self.ulid
    }
}

impl<T: IdMarker> From<Ulid> for Id<T> {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", T::prefix(), self.ulid)
    }
}

/// `Display` の逆変換（プレフィックス必須）
impl<T: IdMarker> FromStr for Id<T> {
    type Err = InvalidId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s
            .strip_prefix(T::prefix())
            .ok_or_else(|| InvalidId(s.to_string()))?;
        let ulid = Ulid::from_string(raw).map_err(|_| InvalidId(s.to_string()))?;
        Ok(Self::from_ulid(ulid))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid id: {0}")]
pub struct InvalidId(pub String);

// ========================================
// マーカー型の定義
// ========================================

/// Application のマーカー型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum App {}

impl IdMarker for App {
    fn prefix() -> &'static str {
        "app-"
    }
}

/// Build のマーカー型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Build {}

impl IdMarker for Build {
    fn prefix() -> &'static str {
        "build-"
    }
}

/// Identifier of an Application.
pub type AppId = Id<App>;

/// Identifier of a Build.
pub type BuildId = Id<Build>;
