//! Subscription - subscribe / unsubscribe のストリーム契約
//!
//! # 設計原則
//! - 遅延評価・終わらない可能性のあるイベント列
//! - 受け手は drop か `unsubscribe()` ですぐに購読をやめられる
//! - 送り手（EventBus）は閉じた購読者を次の publish で取り除く
//!
//! # 2 種類の流れ方
//! - **キュー**（`new` / EventBus）: トリガー用途。バッファが満杯なら取りこぼす
//! - **最新値**（`latest`）: スナップショット用途。読み遅れても最後の値だけは必ず届く

use std::sync::Mutex;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};

enum Source<T> {
    Queue {
        rx: mpsc::Receiver<T>,
        // constant() 用: 送信側を保持してストリームを開いたままにする
        _hold: Option<mpsc::Sender<T>>,
    },
    Latest(watch::Receiver<Option<T>>),
}

/// 購読側ハンドル
pub struct Subscription<T> {
    source: Source<T>,
}

impl<T> Subscription<T> {
    pub fn new(rx: mpsc::Receiver<T>) -> Self {
        Self {
            source: Source::Queue { rx, _hold: None },
        }
    }

    /// 1 件だけ流して、その後は購読解除まで何も流さないストリーム
    pub fn constant(item: T) -> Self {
        let (tx, rx) = mpsc::channel(1);
        let _ = tx.try_send(item);
        Self {
            source: Source::Queue {
                rx,
                _hold: Some(tx),
            },
        }
    }

    /// 最新値だけを流すストリーム
    ///
    /// 途中の値は飛ばされることがあるが、最後に送られた値は必ず届く。
    /// 購読時点ですでに値があれば、それが最初の 1 件になる。
    pub fn latest(mut rx: watch::Receiver<Option<T>>) -> Self {
        if rx.borrow().is_some() {
            rx.mark_changed();
        }
        Self {
            source: Source::Latest(rx),
        }
    }

    pub fn unsubscribe(self) {
        match self.source {
            Source::Queue { mut rx, .. } => rx.close(),
            Source::Latest(rx) => drop(rx),
        }
    }
}

impl<T: Clone> Subscription<T> {
    /// 次のイベント。送り手がいなくなったら None
    pub async fn next(&mut self) -> Option<T> {
        match &mut self.source {
            Source::Queue { rx, .. } => rx.recv().await,
            Source::Latest(rx) => loop {
                if rx.changed().await.is_err() {
                    return None;
                }
                if let Some(item) = rx.borrow_and_update().clone() {
                    return Some(item);
                }
            },
        }
    }
}

/// 複数購読者へのファンアウト（送信側）
pub struct EventBus<T> {
    subscribers: Mutex<Vec<mpsc::Sender<T>>>,
    capacity: usize,
}

impl<T: Clone> EventBus<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            capacity: capacity.max(1),
        }
    }

    pub fn subscribe(&self) -> Subscription<T> {
        let (tx, rx) = mpsc::channel(self.capacity);
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(tx);
        Subscription::new(rx)
    }

    /// 全購読者へ送る。バッファが満杯の購読者には届かない（トリガー用途では取りこぼしてよい）
    ///
    /// 取りこぼせない最新状態の配信には `Subscription::latest` を使う。
    ///
    /// Returns the number of subscribers that received the item.
    pub fn publish(&self, item: T) -> usize {
        let mut delivered = 0;
        let mut subscribers = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        subscribers.retain(|tx| match tx.try_send(item.clone()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(TrySendError::Full(_)) => {
                tracing::debug!("subscriber buffer full, dropping event");
                true
            }
            Err(TrySendError::Closed(_)) => false,
        });
        delivered
    }

    /// Drop every subscriber; their streams end after draining.
    pub fn close(&self) {
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    pub fn subscriber_count(&self) -> usize {
        let mut subscribers = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        subscribers.retain(|tx| !tx.is_closed());
        subscribers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn publish_fans_out_to_all_subscribers() {
        let bus = EventBus::new(4);
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();

        assert_eq!(bus.publish(7u32), 2);
        assert_eq!(a.next().await, Some(7));
        assert_eq!(b.next().await, Some(7));
    }

    #[tokio::test]
    async fn unsubscribe_releases_the_producer_side() {
        let bus = EventBus::new(4);
        let a = bus.subscribe();
        let _b = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        a.unsubscribe();
        assert_eq!(bus.publish(1u32), 1);
        assert_eq!(bus.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn full_buffer_drops_instead_of_blocking() {
        let bus = EventBus::new(1);
        let mut a = bus.subscribe();
        assert_eq!(bus.publish(1u32), 1);
        assert_eq!(bus.publish(2u32), 0);
        assert_eq!(a.next().await, Some(1));
    }

    #[tokio::test]
    async fn latest_stream_keeps_the_last_value_of_a_burst() {
        let (tx, rx) = watch::channel(None);
        let mut sub = Subscription::latest(rx);
        for n in 1..=10u32 {
            tx.send_replace(Some(n));
        }
        assert_eq!(sub.next().await, Some(10));

        let pending = tokio::time::timeout(Duration::from_millis(20), sub.next()).await;
        assert!(pending.is_err());
    }

    #[tokio::test]
    async fn latest_stream_starts_with_the_current_value() {
        let (tx, rx) = watch::channel(Some("seed"));
        let mut sub = Subscription::latest(rx);
        assert_eq!(sub.next().await, Some("seed"));

        drop(tx);
        assert_eq!(sub.next().await, None);
    }

    #[tokio::test]
    async fn constant_stream_yields_once_then_stays_open() {
        let mut sub = Subscription::constant("only");
        assert_eq!(sub.next().await, Some("only"));

        let pending = tokio::time::timeout(Duration::from_millis(50), sub.next()).await;
        assert!(pending.is_err());
    }
}
