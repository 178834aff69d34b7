//! Tagged job scheduler.
//!
//! Jobs fire either once at a wall-clock instant or on a cron expression.
//! At most one job body runs at a time; a job whose trigger fires while
//! another body is running waits for it instead of being skipped.

use std::str::FromStr;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use cron::Schedule;
use futures::future::BoxFuture;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn, Instrument};

use crate::error::{PuaError, PuaResult};

/// Body of a job, invoked once per firing.
pub type JobFn = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    Once(DateTime<Utc>),
    Cron(String),
}

/// Read-only view of a registered job.
#[derive(Debug, Clone)]
pub struct JobHandle {
    id: u64,
    tag: String,
    trigger: Trigger,
    runs: Arc<AtomicU32>,
}

impl JobHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn trigger(&self) -> &Trigger {
        &self.trigger
    }

    /// Number of completed runs of the job body.
    pub fn finished_runs(&self) -> u32 {
        self.runs.load(Ordering::SeqCst)
    }
}

struct JobEntry {
    handle: JobHandle,
    cancel: CancellationToken,
}

enum Timing {
    Once(DateTime<Utc>),
    Cron(Box<Schedule>),
}

pub struct JobScheduler {
    jobs: Mutex<Vec<JobEntry>>,
    /// Held while a job body runs.
    run_lock: Arc<Mutex<()>>,
    root: CancellationToken,
    tracker: TaskTracker,
    next_id: AtomicU64,
}

impl Default for JobScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl JobScheduler {
    pub fn new() -> Self {
        Self {
            jobs: Mutex::new(Vec::new()),
            run_lock: Arc::new(Mutex::new(())),
            root: CancellationToken::new(),
            tracker: TaskTracker::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Run `job` once at `at`; an instant in the past fires immediately.
    pub async fn schedule_once(&self, tag: &str, at: DateTime<Utc>, job: JobFn) -> JobHandle {
        self.add(tag, Trigger::Once(at), Timing::Once(at), job).await
    }

    /// Run `job` on every occurrence of a five-field cron expression (UTC).
    pub async fn schedule_cron(&self, tag: &str, expr: &str, job: JobFn) -> PuaResult<JobHandle> {
        let invalid = |reason: String| PuaError::InvalidCron {
            expr: expr.to_string(),
            reason,
        };
        let normalized = normalize_cron(expr).map_err(invalid)?;
        let cron = Schedule::from_str(&normalized).map_err(|e| invalid(e.to_string()))?;
        let handle = self
            .add(tag, Trigger::Cron(expr.to_string()), Timing::Cron(Box::new(cron)), job)
            .await;
        Ok(handle)
    }

    async fn add(&self, tag: &str, trigger: Trigger, timing: Timing, job: JobFn) -> JobHandle {
        let handle = JobHandle {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            tag: tag.to_string(),
            trigger,
            runs: Arc::new(AtomicU32::new(0)),
        };
        let cancel = self.root.child_token();

        self.tracker.spawn(
            run_job(
                timing,
                job,
                handle.runs.clone(),
                cancel.clone(),
                self.root.clone(),
                self.run_lock.clone(),
            )
            .in_current_span(),
        );

        debug!(job_id = handle.id, %tag, trigger = ?handle.trigger, "job scheduled");
        self.jobs.lock().await.push(JobEntry {
            handle: handle.clone(),
            cancel,
        });
        handle
    }

    pub async fn find_by_tag(&self, tag: &str) -> Vec<JobHandle> {
        let jobs = self.jobs.lock().await;
        jobs.iter()
            .filter(|j| j.handle.tag == tag)
            .map(|j| j.handle.clone())
            .collect()
    }

    /// Remove every job carrying `tag`. Pending firings are cancelled; a
    /// body that is already running completes.
    pub async fn remove_by_tag(&self, tag: &str) -> usize {
        let mut jobs = self.jobs.lock().await;
        let before = jobs.len();
        jobs.retain(|j| {
            if j.handle.tag == tag {
                j.cancel.cancel();
                false
            } else {
                true
            }
        });
        let removed = before - jobs.len();
        if removed > 0 {
            debug!(%tag, removed, "jobs removed");
        }
        removed
    }

    pub async fn jobs(&self) -> Vec<JobHandle> {
        let jobs = self.jobs.lock().await;
        jobs.iter().map(|j| j.handle.clone()).collect()
    }

    pub async fn len(&self) -> usize {
        self.jobs.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.lock().await.is_empty()
    }

    /// Cancel every job, including running bodies, and wait for them to exit.
    pub async fn shutdown(&self) {
        self.root.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        self.jobs.lock().await.clear();
    }
}

async fn run_job(
    timing: Timing,
    job: JobFn,
    runs: Arc<AtomicU32>,
    cancel: CancellationToken,
    root: CancellationToken,
    run_lock: Arc<Mutex<()>>,
) {
    let mut last: Option<DateTime<Utc>> = None;

    loop {
        let at = match &timing {
            Timing::Once(at) => {
                if last.is_some() {
                    break;
                }
                *at
            }
            Timing::Cron(cron) => {
                // Never fire the same occurrence twice, even if the clock lags.
                let now = Utc::now();
                let from = match last {
                    Some(prev) if prev + TimeDelta::seconds(1) > now => prev + TimeDelta::seconds(1),
                    _ => now,
                };
                match cron.after(&from).next() {
                    Some(next) => next,
                    None => {
                        warn!("cron job has no next occurrence");
                        break;
                    }
                }
            }
        };

        let delay = (at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }

        let _guard = tokio::select! {
            _ = cancel.cancelled() => break,
            guard = run_lock.lock() => guard,
        };
        tokio::select! {
            _ = root.cancelled() => break,
            _ = job() => {}
        }
        runs.fetch_add(1, Ordering::SeqCst);
        last = Some(at);
    }
}

/// Turn a five-field cron expression into the seconds-first form parsed by
/// [`Schedule`], renumbering weekdays from 0-6 (Sunday = 0) to 1-7
/// (Sunday = 1).
fn normalize_cron(expr: &str) -> Result<String, String> {
    let fields: Vec<&str> = expr.split_whitespace().collect();
    let [minute, hour, dom, month, dow] = fields[..] else {
        return Err(format!("expected 5 fields, got {}", fields.len()));
    };

    let mut weekdays = String::with_capacity(dow.len());
    let mut chars = dow.chars().peekable();
    let mut after_step = false;
    while let Some(c) = chars.next() {
        if !c.is_ascii_digit() {
            after_step = c == '/';
            weekdays.push(c);
            continue;
        }
        let mut digits = String::from(c);
        while let Some(d) = chars.next_if(|d| d.is_ascii_digit()) {
            digits.push(d);
        }
        if after_step {
            weekdays.push_str(&digits);
        } else {
            let day: u32 = digits.parse().map_err(|_| format!("bad weekday {digits}"))?;
            if day > 7 {
                return Err(format!("weekday {day} out of range"));
            }
            weekdays.push_str(&(day % 7 + 1).to_string());
        }
        after_step = false;
    }
    Ok(format!("0 {minute} {hour} {dom} {month} {weekdays}"))
}
