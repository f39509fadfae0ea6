//! Lifecycle - NotStarted → Started → Stopped の一方向ガード

use std::sync::Mutex;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    NotStarted,
    Started,
    Stopped,
}

#[derive(Debug)]
pub struct Lifecycle {
    state: Mutex<LifecycleState>,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(LifecycleState::NotStarted),
        }
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// True only for the call that moves NotStarted to Started.
    pub fn try_start(&self) -> bool {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if *state != LifecycleState::NotStarted {
            return false;
        }
        *state = LifecycleState::Started;
        true
    }

    /// True only for the call that moves Started to Stopped.
    ///
    /// Stopping a service that never started marks it Stopped so it cannot
    /// be started later.
    pub fn try_stop(&self) -> bool {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let was = *state;
        *state = LifecycleState::Stopped;
        was == LifecycleState::Started
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}
