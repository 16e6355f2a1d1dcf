//! Scheduler loop — wakes on a fixed cadence and fires the fanout once per
//! day at the configured local time.
//! Uses tokio::interval for zero-overhead ticking (sleeps between checks).
//!
//! ```text
//!   Idle ──(local time == HH:MM && since last firing > guard)──▶ Firing
//!     ▲                                                            │
//!     └──────────────── record last_fired, back to Idle ◀──────────┘
//! ```
//!
//! The guard (≥ 60 s) keeps a 30 s poll from firing twice inside the same
//! trigger minute. Firings missed while the process was down are not
//! replayed.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Timelike, Utc};
use chrono_tz::Tz;
use festa_core::config::SchedulerConfig;
use festa_core::error::Result;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::fanout::{FanoutReport, NotificationFanout};

/// Source of "now". Swapped out in tests.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

pub fn system_clock() -> Clock {
    Arc::new(Utc::now)
}

/// When the daily firing happens.
#[derive(Debug, Clone, Copy)]
pub struct FireSchedule {
    pub hour: u32,
    pub minute: u32,
    pub timezone: Tz,
    pub guard: Duration,
}

impl FireSchedule {
    pub fn from_config(config: &SchedulerConfig) -> Result<Self> {
        Ok(Self {
            hour: config.fire_hour,
            minute: config.fire_minute,
            timezone: config.tz()?,
            guard: config.guard(),
        })
    }

    /// Whether `now` falls inside the trigger minute, in local time.
    pub fn is_trigger_minute(&self, now: DateTime<Utc>) -> bool {
        let local = now.with_timezone(&self.timezone);
        local.hour() == self.hour && local.minute() == self.minute
    }

    /// Calendar date of `now` in local time.
    pub fn local_date(&self, now: DateTime<Utc>) -> NaiveDate {
        now.with_timezone(&self.timezone).date_naive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Firing,
}

pub struct SchedulerLoop {
    schedule: FireSchedule,
    fanout: Arc<NotificationFanout>,
    poll_interval: Duration,
    clock: Clock,
    state: SchedulerState,
    last_fired: Option<DateTime<Utc>>,
    firings: u64,
}

impl SchedulerLoop {
    pub fn new(
        schedule: FireSchedule,
        fanout: Arc<NotificationFanout>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            schedule,
            fanout,
            poll_interval,
            clock: system_clock(),
            state: SchedulerState::Idle,
            last_fired: None,
            firings: 0,
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn last_fired(&self) -> Option<DateTime<Utc>> {
        self.last_fired
    }

    /// Number of firings since the loop was created.
    pub fn firing_count(&self) -> u64 {
        self.firings
    }

    /// Idle, inside the trigger minute, and past the guard window.
    pub fn should_fire(&self, now: DateTime<Utc>) -> bool {
        if self.state != SchedulerState::Idle || !self.schedule.is_trigger_minute(now) {
            return false;
        }
        match self.last_fired {
            None => true,
            Some(last) => (now - last)
                .to_std()
                .is_ok_and(|elapsed| elapsed > self.schedule.guard),
        }
    }

    /// One polling step. Fires the fanout when due and returns its report.
    ///
    /// The fanout runs on its own task so that a panic inside it is caught
    /// here instead of taking the loop down.
    pub async fn poll(&mut self, now: DateTime<Utc>) -> Option<FanoutReport> {
        if !self.should_fire(now) {
            return None;
        }

        self.state = SchedulerState::Firing;
        let today = self.schedule.local_date(now);
        tracing::info!(
            "⏰ Trigger time {:02}:{:02} ({}) reached — firing for {today}",
            self.schedule.hour,
            self.schedule.minute,
            self.schedule.timezone
        );

        let fanout = self.fanout.clone();
        let result = tokio::spawn(async move { fanout.fire(today).await }).await;

        self.last_fired = Some(now);
        self.firings += 1;
        self.state = SchedulerState::Idle;

        match result {
            Ok(report) => {
                tracing::info!(
                    "✅ Firing done: {} sent, {} transient failures, {} destinations dropped",
                    report.sent,
                    report.transient_failures,
                    report.deregistered.len()
                );
                Some(report)
            }
            Err(e) => {
                tracing::error!("❌ Firing for {today} aborted: {e}");
                None
            }
        }
    }

    /// Poll until `shutdown` flips to `true` (or its sender is dropped).
    /// The stop signal is only observed between polls, never mid-firing.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            "⏰ Scheduler started (fires at {:02}:{:02} {}, check every {}s)",
            self.schedule.hour,
            self.schedule.minute,
            self.schedule.timezone,
            self.poll_interval.as_secs()
        );

        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = interval.tick() => {
                    let now = (self.clock)();
                    self.poll(now).await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        tracing::info!("⏹️ Scheduler stopped after {} firings", self.firings);
    }
}
