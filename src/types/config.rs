//! Configuration structures.
//!
//! All tunables the core used to treat as hardcoded constants (tick
//! resolution, default reschedule interval, destroy retry budget) live here
//! with explicit defaults.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Global core configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CoreConfig {
    /// Scheduler configuration.
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Destroy-time de-registration retry budget.
    #[serde(default)]
    pub destroy: DestroyConfig,

    /// Fixed-chunk memory pool configuration.
    #[serde(default)]
    pub memory: MemoryConfig,
}

/// Scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Resolution of the background dispatch loop.
    #[serde(with = "humantime_serde")]
    pub tick_interval: Duration,

    /// Default reschedule interval for states without an explicit one.
    #[serde(with = "humantime_serde")]
    pub default_reschedule: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(100),
            default_reschedule: Duration::from_secs(3),
        }
    }
}

/// Destroy-time retry budget.
///
/// This is the only retry in the core; it models "wait for an in-flight
/// monitor invocation to finish", not generic error recovery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DestroyConfig {
    /// Maximum de-registration attempts before the fatal path.
    pub retry_attempts: u32,

    /// Per-attempt wait on the scheduler's completion signal.
    #[serde(with = "humantime_serde")]
    pub retry_delay: Duration,
}

impl Default for DestroyConfig {
    fn default() -> Self {
        Self {
            retry_attempts: 10,
            retry_delay: Duration::from_millis(100),
        }
    }
}

/// Fixed-chunk memory pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Number of object chunks the pool can hand out.
    pub chunk_count: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self { chunk_count: 512 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = CoreConfig::default();
        assert_eq!(cfg.scheduler.tick_interval, Duration::from_millis(100));
        assert_eq!(cfg.scheduler.default_reschedule, Duration::from_secs(3));
        assert_eq!(cfg.destroy.retry_attempts, 10);
        assert_eq!(cfg.destroy.retry_delay, Duration::from_millis(100));
        assert_eq!(cfg.memory.chunk_count, 512);
    }

    #[test]
    fn durations_use_humantime() {
        let json = r#"{"scheduler":{"tick_interval":"50ms","default_reschedule":"1s"}}"#;
        let cfg: CoreConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.scheduler.tick_interval, Duration::from_millis(50));
        assert_eq!(cfg.scheduler.default_reschedule, Duration::from_secs(1));
        // Omitted sections fall back to defaults.
        assert_eq!(cfg.destroy.retry_attempts, 10);
    }
}
