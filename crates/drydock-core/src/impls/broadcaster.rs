use std::sync::atomic::{AtomicUsize, Ordering};

use crate::ports::StaticSiteBroadcaster;

/// Logs reload requests and counts them.
#[derive(Debug, Default)]
pub struct LoggingBroadcaster {
    reloads: AtomicUsize,
}

impl LoggingBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reloads(&self) -> usize {
        self.reloads.load(Ordering::SeqCst)
    }
}

impl StaticSiteBroadcaster for LoggingBroadcaster {
    fn notify_reload(&self) {
        let n = self.reloads.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::debug!(reloads = n, "static site reload requested");
    }
}
