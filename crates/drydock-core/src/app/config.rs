//! CoreConfig - サービス全体の設定
//!
//! シリアライズ形式では時間を秒 / ミリ秒の整数で持ち、
//! 使う側には `Duration` を返すアクセサを用意する。

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cluster::Backoff;
use crate::domain::{CoreError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Building builds with no update for this long are forced to Failed.
    pub crash_threshold_secs: u64,
    pub crash_check_interval_secs: u64,

    /// Periodic build scan, in addition to builder-idle events.
    pub build_scan_interval_secs: u64,
    pub deploy_sync_interval_secs: u64,
    pub full_scan_interval_secs: u64,

    pub watch_backoff_base_ms: u64,
    pub watch_backoff_multiplier: f64,
    pub watch_backoff_max_ms: u64,

    pub image_registry: String,
    /// Runtime images are named `{image_registry}/{image_name_prefix}{app id}`.
    pub image_name_prefix: String,

    /// Buffer size of every in-process trigger / event stream.
    pub event_capacity: usize,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            crash_threshold_secs: 60,
            crash_check_interval_secs: 60,
            build_scan_interval_secs: 60,
            deploy_sync_interval_secs: 60,
            full_scan_interval_secs: 60,
            watch_backoff_base_ms: 500,
            watch_backoff_multiplier: 2.0,
            watch_backoff_max_ms: 30_000,
            image_registry: "registry.local".to_string(),
            image_name_prefix: "drydock-".to_string(),
            event_capacity: 64,
        }
    }
}

impl CoreConfig {
    /// Fail-fast: reject values that would stall or spin a loop.
    pub fn validate(&self) -> Result<()> {
        let intervals = [
            ("crash_threshold_secs", self.crash_threshold_secs),
            ("crash_check_interval_secs", self.crash_check_interval_secs),
            ("build_scan_interval_secs", self.build_scan_interval_secs),
            ("deploy_sync_interval_secs", self.deploy_sync_interval_secs),
            ("full_scan_interval_secs", self.full_scan_interval_secs),
            ("watch_backoff_base_ms", self.watch_backoff_base_ms),
        ];
        for (name, value) in intervals {
            if value == 0 {
                return Err(CoreError::Config(format!("{name} must be greater than zero")));
            }
        }
        if self.watch_backoff_max_ms < self.watch_backoff_base_ms {
            return Err(CoreError::Config(
                "watch_backoff_max_ms must not be below watch_backoff_base_ms".into(),
            ));
        }
        if !self.watch_backoff_multiplier.is_finite() || self.watch_backoff_multiplier < 1.0 {
            return Err(CoreError::Config(
                "watch_backoff_multiplier must be a finite value >= 1.0".into(),
            ));
        }
        if self.event_capacity == 0 {
            return Err(CoreError::Config("event_capacity must be greater than zero".into()));
        }
        if self.image_registry.is_empty() {
            return Err(CoreError::Config("image_registry must not be empty".into()));
        }
        Ok(())
    }

    pub fn crash_threshold(&self) -> Duration {
        Duration::from_secs(self.crash_threshold_secs)
    }

    pub fn crash_check_interval(&self) -> Duration {
        Duration::from_secs(self.crash_check_interval_secs)
    }

    pub fn build_scan_interval(&self) -> Duration {
        Duration::from_secs(self.build_scan_interval_secs)
    }

    pub fn deploy_sync_interval(&self) -> Duration {
        Duration::from_secs(self.deploy_sync_interval_secs)
    }

    pub fn full_scan_interval(&self) -> Duration {
        Duration::from_secs(self.full_scan_interval_secs)
    }

    pub fn watch_backoff(&self) -> Backoff {
        Backoff::new(
            Duration::from_millis(self.watch_backoff_base_ms),
            self.watch_backoff_multiplier,
            Duration::from_millis(self.watch_backoff_max_ms),
        )
    }

    pub fn image_name(&self, app_id: impl std::fmt::Display) -> String {
        format!("{}/{}{}", self.image_registry, self.image_name_prefix, app_id)
    }
}
