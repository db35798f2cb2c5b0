//! ---
//! pw_section: "01-core-functionality"
//! pw_subsection: "module"
//! pw_type: "source"
//! pw_scope: "code"
//! pw_description: "Runtime helpers supporting the simulator and daemon."
//! pw_version: "v0.1.0"
//! pw_owner: "tbd"
//! ---
use std::time::Duration;

use anyhow::{anyhow, Result};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, warn};

/// One scheduled tick of a [`FixedRateTicker`].
#[derive(Debug, Clone, Copy)]
pub struct Tick {
    /// Zero-based tick number since the anchor.
    pub index: u64,
    /// Deadline `anchor + index * period`.
    pub scheduled: Instant,
    /// How far past its deadline the tick was observed.
    pub lateness: Duration,
}

/// Ticker whose deadlines are `anchor + k * period`.
///
/// Deadlines are computed from the anchor rather than from the previous
/// wake-up, so slow ticks do not push later ticks back. Missed deadlines
/// are delivered back to back until the schedule is caught up.
#[derive(Debug)]
pub struct FixedRateTicker {
    interval: tokio::time::Interval,
    period: Duration,
    next_index: u64,
}

impl FixedRateTicker {
    /// Ticker whose first deadline is now.
    pub fn new(period: Duration) -> Self {
        Self::anchored_at(Instant::now(), period)
    }

    pub fn anchored_at(anchor: Instant, period: Duration) -> Self {
        let mut interval = tokio::time::interval_at(anchor, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Burst);
        Self {
            interval,
            period,
            next_index: 0,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Wait for the next deadline. Cancel-safe.
    pub async fn tick(&mut self) -> Tick {
        let scheduled = self.interval.tick().await;
        let index = self.next_index;
        self.next_index += 1;
        Tick {
            index,
            scheduled,
            lateness: Instant::now().saturating_duration_since(scheduled),
        }
    }
}

/// Tracks long-running daemon services so shutdown can await all of them.
#[derive(Debug, Default)]
pub struct ServiceGroup {
    tasks: Vec<(&'static str, JoinHandle<Result<()>>)>,
}

impl ServiceGroup {
    pub fn spawn<F>(&mut self, name: &'static str, fut: F)
    where
        F: std::future::Future<Output = Result<()>> + Send + 'static,
    {
        debug!(service = name, "spawning service");
        self.tasks.push((name, tokio::spawn(fut)));
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Await every service; the first failure is returned after all have finished.
    pub async fn join(self) -> Result<()> {
        let mut first_error = None;
        for (name, task) in self.tasks {
            let outcome = match task.await {
                Ok(result) => result,
                Err(err) => Err(anyhow!("service {name} join failure: {err}")),
            };
            if let Err(err) = outcome {
                warn!(service = name, error = %err, "service exited with error");
                first_error.get_or_insert(err);
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn ticks_stay_on_the_anchor_grid() {
        let anchor = Instant::now();
        let mut ticker = FixedRateTicker::anchored_at(anchor, Duration::from_secs(1));
        for expected in 0..5u64 {
            let tick = ticker.tick().await;
            assert_eq!(tick.index, expected);
            assert_eq!(tick.scheduled, anchor + Duration::from_secs(expected));
            // Simulated work shorter than the period does not shift the grid.
            tokio::time::sleep(Duration::from_millis(300)).await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn missed_deadlines_are_caught_up() {
        let anchor = Instant::now();
        let mut ticker = FixedRateTicker::anchored_at(anchor, Duration::from_secs(1));
        ticker.tick().await;
        tokio::time::sleep(Duration::from_millis(3_500)).await;
        let late = ticker.tick().await;
        assert_eq!(late.index, 1);
        assert_eq!(late.scheduled, anchor + Duration::from_secs(1));
        assert!(late.lateness >= Duration::from_millis(2_500));
        let next = ticker.tick().await;
        assert_eq!(next.scheduled, anchor + Duration::from_secs(2));
    }

    #[tokio::test]
    async fn service_group_reports_failures() {
        let mut group = ServiceGroup::default();
        group.spawn("ok", async { Ok(()) });
        group.spawn("broken", async { Err(anyhow!("boom")) });
        assert_eq!(group.len(), 2);
        let err = group.join().await.unwrap_err();
        assert!(err.to_string().contains("boom"));
    }
}
