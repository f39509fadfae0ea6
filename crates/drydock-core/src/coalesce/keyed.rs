//! KeyedCoalescer - キーごとに独立した Coalescer
//!
//! 異なるキーの実行は互いに待たない。同じキーの同時呼び出しだけがまとめられる。
//!
//! `trigger()` が実行中に届いた場合は、終了後にもう 1 回だけ実行する
//! （実行中の回はトリガー前の状態を読んでいるかもしれない）。

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::watch;

use super::{BoxFuture, Flight, await_flight};
use crate::domain::Result;

type Action<K> = Arc<dyn Fn(K) -> BoxFuture<Result<()>> + Send + Sync>;
type Slots<K> = Arc<Mutex<HashMap<K, Slot>>>;

struct Slot {
    flight: Flight,
    /// 実行中に trigger された: 終了後にもう 1 回
    rerun: bool,
}

pub struct KeyedCoalescer<K> {
    name: &'static str,
    action: Action<K>,
    slots: Slots<K>,
}

impl<K> KeyedCoalescer<K>
where
    K: Clone + Eq + Hash + Send + Sync + std::fmt::Display + 'static,
{
    pub fn new<F, Fut>(name: &'static str, action: F) -> Self
    where
        F: Fn(K) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        Self {
            name,
            action: Arc::new(move |key| -> BoxFuture<Result<()>> { Box::pin(action(key)) }),
            slots: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Number of keys with an execution running.
    pub fn in_flight(&self) -> usize {
        lock(&self.slots).len()
    }

    /// Start an execution for `key`, or join the one in flight, and wait for its result.
    pub async fn run(&self, key: K) -> Result<()> {
        let flight = {
            let mut slots = lock(&self.slots);
            match slots.get(&key) {
                Some(slot) => {
                    tracing::trace!(coalescer = self.name, key = %key, "joining in-flight execution");
                    slot.flight.clone()
                }
                None => self.start(&mut slots, key),
            }
        };
        await_flight(flight).await
    }

    /// Request an execution for `key` that begins after this call, without waiting.
    ///
    /// Triggers that arrive while `key` is running collapse into one follow-up run.
    pub fn trigger(&self, key: K) {
        let mut slots = lock(&self.slots);
        if let Some(slot) = slots.get_mut(&key) {
            tracing::trace!(coalescer = self.name, key = %key, "follow-up scheduled");
            slot.rerun = true;
            return;
        }
        drop(self.start(&mut slots, key));
    }

    /// Wait until no key has an execution running or scheduled.
    pub async fn wait_idle(&self) {
        loop {
            let flights: Vec<Flight> = lock(&self.slots).values().map(|s| s.flight.clone()).collect();
            if flights.is_empty() {
                return;
            }
            for flight in flights {
                let _ = await_flight(flight).await;
            }
        }
    }

    fn start(&self, slots: &mut HashMap<K, Slot>, key: K) -> Flight {
        let (tx, rx) = watch::channel(None);
        slots.insert(
            key.clone(),
            Slot {
                flight: rx.clone(),
                rerun: false,
            },
        );
        tokio::spawn(drive(
            self.name,
            Arc::clone(&self.action),
            Arc::clone(&self.slots),
            key,
            tx,
        ));
        rx
    }
}

fn lock<K>(slots: &Slots<K>) -> MutexGuard<'_, HashMap<K, Slot>> {
    slots.lock().unwrap_or_else(|e| e.into_inner())
}

/// Removes the key if the executing task dies without finishing normally.
struct SlotGuard<K: Eq + Hash> {
    slots: Slots<K>,
    key: Option<K>,
}

impl<K: Eq + Hash> Drop for SlotGuard<K> {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            lock(&self.slots).remove(&key);
        }
    }
}

/// Run `key` until no follow-up is pending, publishing each run's result.
async fn drive<K>(
    name: &'static str,
    action: Action<K>,
    slots: Slots<K>,
    key: K,
    mut tx: watch::Sender<Option<Result<()>>>,
) where
    K: Clone + Eq + Hash + std::fmt::Display,
{
    let mut guard = SlotGuard {
        slots: Arc::clone(&slots),
        key: Some(key.clone()),
    };
    loop {
        let result = action(key.clone()).await;

        // 判定と枠の削除は同じロックの中で行う（間に来た trigger を落とさない）
        let next = {
            let mut table = lock(&slots);
            match table.get_mut(&key) {
                Some(slot) if slot.rerun => {
                    let (next_tx, next_rx) = watch::channel(None);
                    slot.rerun = false;
                    slot.flight = next_rx;
                    Some(next_tx)
                }
                _ => {
                    table.remove(&key);
                    None
                }
            }
        };
        tx.send_replace(Some(result));

        match next {
            Some(next_tx) => {
                tracing::trace!(coalescer = name, key = %key, "running follow-up");
                tx = next_tx;
            }
            None => break,
        }
    }
    guard.key = None;
}
