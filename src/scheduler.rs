//! Adaptive polling loop.
//!
//! After a cycle that found something new the next wait is drawn from the
//! short regime, otherwise from the normal one; either way a random jitter is
//! added and the result is clamped to a floor. During quiet hours no cycle
//! runs and the loop sleeps until the window ends. A wait that would run into
//! the window is cut short at its start. The first tick honours quiet hours
//! as well.
//!
//! Listings whose notification failed and that are retried do not count as
//! new for the cadence, so an unreachable transport does not pin the loop to
//! the short regime.
use chrono::{Local, NaiveDateTime, NaiveTime, Timelike};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;
use tracing::{error, info};

use crate::config::Schedule;
use crate::cycle::{self, CycleReport, Pipeline};

/// Wall-clock window `[start, end)` in local hours. `start > end` wraps past
/// midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuietHours {
    start: NaiveTime,
    end: NaiveTime,
}

impl QuietHours {
    /// `None` for out-of-range hours or an empty window.
    pub fn new(start_hour: u32, end_hour: u32) -> Option<Self> {
        if start_hour == end_hour {
            return None;
        }
        Some(Self {
            start: NaiveTime::from_hms_opt(start_hour, 0, 0)?,
            end: NaiveTime::from_hms_opt(end_hour, 0, 0)?,
        })
    }

    pub fn start_hour(&self) -> u32 {
        self.start.hour()
    }

    pub fn end_hour(&self) -> u32 {
        self.end.hour()
    }

    pub fn contains(&self, t: NaiveTime) -> bool {
        if self.start < self.end {
            self.start <= t && t < self.end
        } else {
            t >= self.start || t < self.end
        }
    }

    /// Time from `now` until the next window end.
    pub fn remaining(&self, now: NaiveDateTime) -> Duration {
        let mut end = now.date().and_time(self.end);
        if end <= now {
            end += chrono::Duration::days(1);
        }
        (end - now).to_std().unwrap_or_default()
    }

    /// Time from `now` until the window next opens. A `now` exactly at the
    /// start counts as a full day away.
    pub fn until_start(&self, now: NaiveDateTime) -> Duration {
        let mut start = now.date().and_time(self.start);
        if start <= now {
            start += chrono::Duration::days(1);
        }
        (start - now).to_std().unwrap_or_default()
    }
}

/// Static cadence settings, derived from config once at startup.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleSettings {
    pub normal_interval: Duration,
    pub normal_jitter: Duration,
    pub short_interval: Duration,
    pub short_jitter: Duration,
    pub min_interval: Duration,
    pub quiet_hours: Option<QuietHours>,
}

impl ScheduleSettings {
    pub fn from_config(cfg: &Schedule) -> Self {
        let q = &cfg.quiet_hours;
        Self {
            normal_interval: Duration::from_secs(cfg.normal_interval_secs),
            normal_jitter: Duration::from_secs(cfg.normal_jitter_secs),
            short_interval: Duration::from_secs(cfg.short_interval_secs),
            short_jitter: Duration::from_secs(cfg.short_jitter_secs),
            min_interval: Duration::from_secs(cfg.min_interval_secs),
            quiet_hours: if q.enabled {
                QuietHours::new(q.start_hour, q.end_hour)
            } else {
                None
            },
        }
    }
}

/// Cadence state carried from one cycle to the next. Only the previous
/// cycle's outcome feeds into it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleState {
    pub base: Duration,
    pub jitter: Duration,
    pub found_new: bool,
}

impl ScheduleState {
    pub fn initial(settings: &ScheduleSettings) -> Self {
        Self::after_cycle(settings, false)
    }

    pub fn after_cycle(settings: &ScheduleSettings, found_new: bool) -> Self {
        let (base, jitter) = if found_new {
            (settings.short_interval, settings.short_jitter)
        } else {
            (settings.normal_interval, settings.normal_jitter)
        };
        Self {
            base,
            jitter,
            found_new,
        }
    }

    /// `base ± jitter`, never below `min`.
    pub fn draw_interval<R: Rng + ?Sized>(&self, rng: &mut R, min: Duration) -> Duration {
        let base = self.base.as_secs_f64();
        let jitter = self.jitter.as_secs_f64();
        let offset = if jitter > 0.0 {
            rng.gen_range(-jitter..=jitter)
        } else {
            0.0
        };
        Duration::try_from_secs_f64((base + offset).max(min.as_secs_f64()).max(0.0))
            .unwrap_or(Duration::MAX)
    }
}

/// What a tick did and how long to sleep afterwards.
#[derive(Debug, Clone, PartialEq)]
pub enum Tick {
    /// Inside quiet hours: nothing fetched.
    Quiet { wait: Duration },
    /// A cycle ran; `report` is `None` when the store failed.
    Ran {
        report: Option<CycleReport>,
        wait: Duration,
    },
}

impl Tick {
    pub fn wait(&self) -> Duration {
        match self {
            Tick::Quiet { wait } | Tick::Ran { wait, .. } => *wait,
        }
    }
}

/// Source of local wall-clock time.
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LocalClock;

impl Clock for LocalClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

pub struct Scheduler<'a> {
    pipeline: Pipeline<'a>,
    settings: ScheduleSettings,
    state: ScheduleState,
    rng: StdRng,
    /// Listings left unseen by the previous cycle after a failed send.
    retrying: HashSet<String>,
}

impl<'a> Scheduler<'a> {
    pub fn new(pipeline: Pipeline<'a>, settings: ScheduleSettings) -> Self {
        Self::with_rng(pipeline, settings, StdRng::from_entropy())
    }

    pub fn with_rng(pipeline: Pipeline<'a>, settings: ScheduleSettings, rng: StdRng) -> Self {
        let state = ScheduleState::initial(&settings);
        Self {
            pipeline,
            settings,
            state,
            rng,
            retrying: HashSet::new(),
        }
    }

    pub fn state(&self) -> ScheduleState {
        self.state
    }

    /// Run one cycle unless `now` falls inside quiet hours, and work out the
    /// next wait.
    pub async fn tick(&mut self, now: NaiveDateTime) -> Tick {
        if let Some(quiet) = self.settings.quiet_hours.filter(|q| q.contains(now.time())) {
            let wait = quiet.remaining(now).max(Duration::from_secs(1));
            info!(
                now = %now.format("%H:%M"),
                resume_at = %format!("{:02}:00", quiet.end_hour()),
                wait_secs = wait.as_secs(),
                "quiet hours active; skipping cycle"
            );
            return Tick::Quiet { wait };
        }

        let report = match cycle::run_cycle(&self.pipeline).await {
            Ok(report) => Some(report),
            Err(err) => {
                error!(%err, "cycle aborted by store failure");
                None
            }
        };
        let found_new = report.as_ref().is_some_and(|r| {
            r.new_ids.iter().any(|id| !self.retrying.contains(id))
        });
        if let Some(r) = &report {
            self.retrying = r.unsent_ids.iter().cloned().collect();
        }
        self.state = ScheduleState::after_cycle(&self.settings, found_new);
        let mut wait = self
            .state
            .draw_interval(&mut self.rng, self.settings.min_interval);
        if let Some(quiet) = self.settings.quiet_hours {
            let until_quiet = quiet.until_start(now).max(Duration::from_secs(1));
            if wait > until_quiet {
                info!(
                    wait_secs = until_quiet.as_secs(),
                    "next check moved to the start of quiet hours"
                );
                wait = until_quiet;
            }
        }
        if found_new {
            info!(wait_secs = wait.as_secs(), "new listings found; shortened interval");
        } else {
            info!(wait_secs = wait.as_secs(), "next check scheduled");
        }
        Tick::Ran { report, wait }
    }

    /// Tick, sleep, repeat until `shutdown` resolves. Shutdown only cuts a
    /// sleep short; a cycle in progress always completes. `shutdown` is not
    /// polled until the first cycle is over, so it must already be armed.
    pub async fn run<F>(&mut self, clock: &dyn Clock, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        loop {
            let wait = self.tick(clock.now()).await.wait();
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    info!("shutdown requested; stopping scheduler");
                    break;
                }
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }
}
