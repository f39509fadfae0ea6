//! Errors - エラー型と分類
//!
//! ErrorKind は運用上の扱いを決める分類です。
//! - Transient: ストレージ / バックエンド到達不能。パスを中断し、次のトリガーで再試行
//! - DataInconsistency: 期待した行が無い。警告を出してその項目だけスキップ
//! - Configuration: メンバーシップや設定の不整合。構築時に致命的
//! - Conflict: 条件付き書き込みが競合に負けた。無害として扱う

use thiserror::Error;

use super::ids::{AppId, BuildId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transient,
    DataInconsistency,
    Configuration,
    Conflict,
}

/// CoreError はドメインエラー
///
/// Coalescer が 1 回の実行結果を複数の待機者へ配るため `Clone` を実装する。
#[derive(Debug, Clone, Error)]
pub enum CoreError {
    #[error("storage error: {0}")]
    Storage(String),

    #[error("backend error: {0}")]
    Backend(String),

    #[error("build dispatch error: {0}")]
    Dispatch(String),

    #[error("discoverer error: {0}")]
    Discovery(String),

    #[error("application not found: {0}")]
    AppNotFound(AppId),

    #[error("build not found: {0}")]
    BuildNotFound(BuildId),

    #[error("conflicting write: {0}")]
    Conflict(String),

    #[error("invalid membership: {0}")]
    Membership(#[from] MembershipError),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("execution aborted before producing a result")]
    Aborted,
}

impl CoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::Storage(_)
            | CoreError::Backend(_)
            | CoreError::Dispatch(_)
            | CoreError::Discovery(_)
            | CoreError::Aborted => ErrorKind::Transient,
            CoreError::AppNotFound(_) | CoreError::BuildNotFound(_) => {
                ErrorKind::DataInconsistency
            }
            CoreError::Membership(_) | CoreError::Config(_) => ErrorKind::Configuration,
            CoreError::Conflict(_) => ErrorKind::Conflict,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }
}

/// MembershipError はスナップショット検証エラー
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MembershipError {
    #[error("duplicate address in membership: {0}")]
    DuplicateAddress(String),

    #[error("more than one self entry in membership: {0} and {1}")]
    MultipleSelf(String, String),

    #[error("empty address in membership")]
    EmptyAddress,
}

pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(CoreError::Storage("down".into()), ErrorKind::Transient)]
    #[case(CoreError::Backend("timeout".into()), ErrorKind::Transient)]
    #[case(CoreError::Conflict("lost".into()), ErrorKind::Conflict)]
    #[case(CoreError::Config("bad".into()), ErrorKind::Configuration)]
    #[case(MembershipError::EmptyAddress.into(), ErrorKind::Configuration)]
    fn errors_are_classified(#[case] err: CoreError, #[case] kind: ErrorKind) {
        assert_eq!(err.kind(), kind);
    }

    #[test]
    fn missing_rows_are_data_inconsistency() {
        let err = CoreError::AppNotFound(AppId::from_ulid(ulid::Ulid::new()));
        assert_eq!(err.kind(), ErrorKind::DataInconsistency);
        assert!(!err.is_transient());
        assert!(err.to_string().contains("app-"));
    }
}
