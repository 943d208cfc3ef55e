//! Economy configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Reward parameters for Random sessions.
///
/// With the defaults a session pays nothing for its first five minutes,
/// then one coin per minute until it is an hour old. Revealing pays a
/// one-time bonus of 15 and stops the per-minute accrual.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EconomyConfig {
    /// Time after `Connected` before the first tick interval starts.
    pub quiet_period: Duration,
    /// Time between grants.
    pub tick_interval: Duration,
    /// Coins granted per tick.
    pub coins_per_tick: u64,
    /// Elapsed time since `Connected` after which ticks stop paying.
    pub max_duration: Duration,
    /// One-time grant on reveal.
    pub reveal_bonus: u64,
}

impl Default for EconomyConfig {
    fn default() -> Self {
        Self {
            quiet_period: Duration::from_secs(5 * 60),
            tick_interval: Duration::from_secs(60),
            coins_per_tick: 1,
            max_duration: Duration::from_secs(60 * 60),
            reveal_bonus: 15,
        }
    }
}

impl EconomyConfig {
    /// Delay from `Connected` to the first tick.
    pub fn first_tick_after(&self) -> Duration {
        self.quiet_period + self.tick_interval
    }

    /// Largest amount a concealed session can earn from ticks alone.
    pub fn max_accrual(&self) -> u64 {
        if self.tick_interval.is_zero() || self.max_duration <= self.quiet_period {
            return 0;
        }
        let paying = self.max_duration - self.quiet_period;
        // A tick exactly at the cap pays nothing.
        let ticks = paying.as_nanos().saturating_sub(1) / self.tick_interval.as_nanos();
        ticks as u64 * self.coins_per_tick
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = EconomyConfig::default();
        assert_eq!(cfg.quiet_period, Duration::from_secs(300));
        assert_eq!(cfg.tick_interval, Duration::from_secs(60));
        assert_eq!(cfg.coins_per_tick, 1);
        assert_eq!(cfg.max_duration, Duration::from_secs(3600));
        assert_eq!(cfg.reveal_bonus, 15);
        assert_eq!(cfg.first_tick_after(), Duration::from_secs(360));
    }

    #[test]
    fn test_max_accrual_with_defaults_is_54() {
        // Ticks at minutes 6..=59 pay; the one at 60 hits the cap.
        assert_eq!(EconomyConfig::default().max_accrual(), 54);
    }

    #[test]
    fn test_max_accrual_zero_interval_is_zero() {
        let cfg = EconomyConfig {
            tick_interval: Duration::ZERO,
            ..EconomyConfig::default()
        };
        assert_eq!(cfg.max_accrual(), 0);
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let cfg: EconomyConfig =
            serde_json::from_str(r#"{"reveal_bonus": 20}"#).unwrap();
        assert_eq!(cfg.reveal_bonus, 20);
        assert_eq!(cfg.coins_per_tick, 1);
    }
}
