//! StaticSiteBroadcaster port - 静的ホスティングへの再読み込み通知

/// 投げっぱなしの通知。失敗は実装側でログに残す
pub trait StaticSiteBroadcaster: Send + Sync {
    fn notify_reload(&self);
}
