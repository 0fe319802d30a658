//! Wall-clock aligned scheduling of cycles.
//!
//! A [`Scheduler`] owns one feed's loop: wait, fire, re-arm. Cycles run
//! inline in that loop, so two cycles of the same feed never overlap.
//!
//! ```text
//! Idle ──► Waiting(until) ──► Firing ──► Idle ──► ...
//!               │                           │
//!               └──────── stop() ──────────►└──► Stopped
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Timelike, Utc};
use chrono_tz::Tz;
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::models::{ScheduleConfig, ScheduleMode};
use crate::pipeline::cycle::CycleReport;

/// A grid delay shorter than this skips to the following boundary.
pub const MIN_GAP: Duration = Duration::from_secs(1);

const NANOS_PER_SEC: u64 = 1_000_000_000;

/// Delay from `now` until the next multiple of `grid` past local midnight in `tz`.
///
/// Exactly on a boundary, the next one is a full grid away. A delay below
/// [`MIN_GAP`] is pushed one more grid out.
pub fn delay_to_next_boundary(now: DateTime<Utc>, grid: Duration, tz: Tz) -> Duration {
    let grid_nanos = grid.as_nanos().min(u128::from(u64::MAX)) as u64;
    if grid_nanos == 0 {
        return MIN_GAP;
    }

    let local = now.with_timezone(&tz);
    // Leap seconds report nanosecond() >= 1e9
    let sub_second = u64::from(local.nanosecond()).min(NANOS_PER_SEC - 1);
    let since_midnight =
        u64::from(local.num_seconds_from_midnight()) * NANOS_PER_SEC + sub_second;

    let mut delay = Duration::from_nanos(grid_nanos - since_midnight % grid_nanos);
    if delay < MIN_GAP {
        delay += grid;
    }
    delay
}

/// Resolved schedule for one feed.
#[derive(Debug, Clone, PartialEq)]
pub struct SchedulePlan {
    pub mode: ScheduleMode,
    pub grid: Duration,
    pub tz: Tz,
    pub margin: Duration,
    pub floor: Duration,
    pub fallback: Duration,
}

impl SchedulePlan {
    pub fn from_config(config: &ScheduleConfig) -> Result<Self> {
        Ok(Self {
            mode: config.mode,
            grid: config.grid(),
            tz: config.tz()?,
            margin: config.margin(),
            floor: config.floor(),
            fallback: config.fallback(),
        })
    }

    /// Delay before the first cycle. Always grid aligned.
    pub fn initial_delay(&self, now: DateTime<Utc>) -> Duration {
        delay_to_next_boundary(now, self.grid, self.tz)
    }

    /// Delay after a cycle that reported `countdown`.
    pub fn next_delay(&self, now: DateTime<Utc>, countdown: Option<Duration>) -> Duration {
        match self.mode {
            ScheduleMode::Fixed => delay_to_next_boundary(now, self.grid, self.tz),
            ScheduleMode::Adaptive => match countdown {
                Some(countdown) => countdown.saturating_add(self.margin).max(self.floor),
                None => self.fallback,
            },
        }
    }
}

impl Default for SchedulePlan {
    fn default() -> Self {
        Self {
            mode: ScheduleMode::Fixed,
            grid: Duration::from_secs(300),
            tz: Tz::UTC,
            margin: Duration::from_secs(1),
            floor: Duration::from_secs(1),
            fallback: Duration::from_secs(60),
        }
    }
}

/// Source of wall-clock time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Runs one cycle when the scheduler fires.
#[async_trait]
pub trait CycleRunner: Send + Sync {
    async fn fire(&self) -> CycleReport;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Waiting { until: DateTime<Utc> },
    Firing,
    Stopped,
}

/// Result of [`SchedulerHandle::trigger`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOutcome {
    /// A cycle will start now
    Accepted,
    /// A cycle is already running; nothing extra is queued
    Deferred,
    /// The scheduler has been stopped
    Stopped,
}

struct Shared {
    name: String,
    state: watch::Sender<SchedulerState>,
    trigger: Notify,
    cancel: CancellationToken,
}

/// Cheap, cloneable control surface of a running [`Scheduler`].
#[derive(Clone)]
pub struct SchedulerHandle {
    shared: Arc<Shared>,
}

impl SchedulerHandle {
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn state(&self) -> SchedulerState {
        self.shared.state.borrow().clone()
    }

    /// Watch state transitions.
    pub fn subscribe(&self) -> watch::Receiver<SchedulerState> {
        self.shared.state.subscribe()
    }

    /// Ask for an immediate cycle.
    pub fn trigger(&self) -> TriggerOutcome {
        if self.shared.cancel.is_cancelled() {
            return TriggerOutcome::Stopped;
        }
        match *self.shared.state.borrow() {
            SchedulerState::Firing => TriggerOutcome::Deferred,
            SchedulerState::Stopped => TriggerOutcome::Stopped,
            SchedulerState::Idle | SchedulerState::Waiting { .. } => {
                self.shared.trigger.notify_one();
                TriggerOutcome::Accepted
            }
        }
    }

    /// Stop the scheduler. A cycle in flight finishes first.
    pub fn stop(&self) {
        self.shared.cancel.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.cancel.is_cancelled()
    }
}

pub struct Scheduler {
    plan: SchedulePlan,
    runner: Arc<dyn CycleRunner>,
    clock: Arc<dyn Clock>,
    shared: Arc<Shared>,
}

impl Scheduler {
    pub fn new(name: impl Into<String>, plan: SchedulePlan, runner: Arc<dyn CycleRunner>) -> Self {
        let (state, _) = watch::channel(SchedulerState::Idle);
        Self {
            plan,
            runner,
            clock: Arc::new(SystemClock),
            shared: Arc::new(Shared {
                name: name.into(),
                state,
                trigger: Notify::new(),
                cancel: CancellationToken::new(),
            }),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Stop together with `parent`. Call before [`Scheduler::handle`].
    pub fn with_parent_token(mut self, parent: &CancellationToken) -> Self {
        if let Some(shared) = Arc::get_mut(&mut self.shared) {
            shared.cancel = parent.child_token();
        }
        self
    }

    pub fn handle(&self) -> SchedulerHandle {
        SchedulerHandle {
            shared: self.shared.clone(),
        }
    }

    /// Run the loop on a new task.
    pub fn spawn(self) -> (SchedulerHandle, JoinHandle<()>) {
        let handle = self.handle();
        (handle, tokio::spawn(self.run()))
    }

    /// Run until stopped.
    pub async fn run(self) {
        let name = self.shared.name.clone();
        let cancel = self.shared.cancel.clone();
        let mut delay = self.plan.initial_delay(self.clock.now());

        log::info!(
            "[{name}] Scheduler started ({:?}, grid {}s, {})",
            self.plan.mode,
            self.plan.grid.as_secs(),
            self.plan.tz
        );

        loop {
            let now = self.clock.now();
            let until = TimeDelta::from_std(delay)
                .ok()
                .and_then(|d| now.checked_add_signed(d))
                .unwrap_or(now);
            self.set_state(SchedulerState::Waiting { until });
            log::debug!("[{name}] Next cycle in {}ms at {until}", delay.as_millis());

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = self.shared.trigger.notified() => {
                    log::info!("[{name}] Cycle triggered manually");
                }
                _ = tokio::time::sleep(delay) => {}
            }

            self.set_state(SchedulerState::Firing);
            let report = self.runner.fire().await;
            self.set_state(SchedulerState::Idle);

            if cancel.is_cancelled() {
                break;
            }
            delay = self.plan.next_delay(self.clock.now(), report.countdown());
        }

        self.set_state(SchedulerState::Stopped);
        log::info!("[{name}] Scheduler stopped");
    }

    fn set_state(&self, state: SchedulerState) {
        self.shared.state.send_replace(state);
    }
}
