//! Cancellable accrual timer.
//!
//! Built for a `tokio::select!` loop: [`AccrualSchedule::wait_for_tick`]
//! pends forever until the schedule is started, and again once it is
//! cancelled, so the branch simply never wins while the session is not
//! accruing.
//!
//! Time comes from `tokio::time`, so tests can run hour-long sessions
//! instantly with `#[tokio::test(start_paused = true)]`.

use std::time::Duration;

use tokio::time::{self, Instant};
use tracing::{debug, trace};

use crate::EconomyConfig;

/// One fired tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccrualTick {
    /// Monotonically increasing tick number (starts at 1).
    pub tick: u64,
    /// When the tick was due.
    pub at: Instant,
}

/// Per-session accrual timer.
#[derive(Debug)]
pub struct AccrualSchedule {
    first_delay: Duration,
    interval: Duration,
    next_tick: Option<Instant>,
    tick_count: u64,
    started: bool,
}

impl AccrualSchedule {
    /// Creates an idle schedule. Nothing fires until [`start`](Self::start).
    pub fn new(config: &EconomyConfig) -> Self {
        Self {
            first_delay: config.first_tick_after(),
            interval: config.tick_interval,
            next_tick: None,
            tick_count: 0,
            started: false,
        }
    }

    /// Arms the schedule relative to `connected_at`.
    ///
    /// The first tick is due after the quiet period plus one interval.
    /// Starting twice, or after a cancel, does nothing.
    pub fn start(&mut self, connected_at: Instant) {
        if self.started {
            return;
        }
        self.started = true;
        if self.interval.is_zero() {
            debug!("accrual interval is zero; schedule stays idle");
            return;
        }
        self.next_tick = Some(connected_at + self.first_delay);
        debug!(first_in = ?self.first_delay, "accrual schedule started");
    }

    /// Stops all further ticks. Idempotent.
    pub fn cancel(&mut self) {
        self.started = true;
        if self.next_tick.take().is_some() {
            debug!(ticks = self.tick_count, "accrual schedule cancelled");
        }
    }

    /// Waits for the next tick.
    ///
    /// Pends forever while the schedule is idle or cancelled. Ticks keep
    /// their original cadence: a late wake-up does not shift later ticks.
    pub async fn wait_for_tick(&mut self) -> AccrualTick {
        let Some(due) = self.next_tick else {
            std::future::pending::<()>().await;
            unreachable!()
        };

        time::sleep_until(due).await;

        self.tick_count += 1;
        self.next_tick = Some(due + self.interval);
        trace!(tick = self.tick_count, "accrual tick fired");

        AccrualTick {
            tick: self.tick_count,
            at: due,
        }
    }

    /// `true` once started and until cancelled.
    pub fn is_running(&self) -> bool {
        self.next_tick.is_some()
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> EconomyConfig {
        EconomyConfig::default()
    }

    #[test]
    fn test_new_schedule_is_idle() {
        let s = AccrualSchedule::new(&config());
        assert!(!s.is_running());
        assert_eq!(s.tick_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_schedule_never_fires() {
        let mut s = AccrualSchedule::new(&config());
        let result = time::timeout(Duration::from_secs(3 * 3600), s.wait_for_tick()).await;
        assert!(result.is_err(), "idle schedule should pend forever");
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_tick_after_quiet_period_plus_interval() {
        let mut s = AccrualSchedule::new(&config());
        let start = Instant::now();
        s.start(start);

        let tick = s.wait_for_tick().await;
        assert_eq!(tick.tick, 1);
        assert_eq!(tick.at, start + Duration::from_secs(360));
        assert!(Instant::now() >= start + Duration::from_secs(360));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticks_keep_cadence() {
        let mut s = AccrualSchedule::new(&config());
        let start = Instant::now();
        s.start(start);

        for n in 1..=3u64 {
            let tick = s.wait_for_tick().await;
            assert_eq!(tick.tick, n);
            assert_eq!(tick.at, start + Duration::from_secs(300 + 60 * n));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_ticks_and_restart_is_ignored() {
        let mut s = AccrualSchedule::new(&config());
        s.start(Instant::now());
        s.wait_for_tick().await;

        s.cancel();
        s.cancel();
        s.start(Instant::now());
        assert!(!s.is_running());

        let result = time::timeout(Duration::from_secs(3600), s.wait_for_tick()).await;
        assert!(result.is_err());
        assert_eq!(s.tick_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_select_loop_pattern() {
        let mut s = AccrualSchedule::new(&config());
        s.start(Instant::now());
        let (tx, mut rx) = tokio::sync::mpsc::channel::<&str>(1);

        tokio::spawn(async move {
            time::sleep(Duration::from_secs(8 * 60 + 30)).await;
            tx.send("stop").await.ok();
        });

        let mut fired = 0;
        loop {
            tokio::select! {
                Some(cmd) = rx.recv() => {
                    assert_eq!(cmd, "stop");
                    break;
                }
                _ = s.wait_for_tick() => fired += 1,
            }
        }

        assert_eq!(fired, 3);
    }
}
