//! Platform update agent state machine.
//!
//! The update agent hands every `PlatformUpdateStatusResponse` it receives to
//! `Pua::handle`. Schedules in those responses become jobs; each job run
//! moves the state to `STARTED`, waits the simulated update duration and
//! moves it to `UPDATED`. Every transition is published on the state
//! channel so the update agent can report it without waiting for its next
//! tick.

use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use regex::Regex;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use ensim_core::proto::{PlatformUpdateStatusResponse, RepeatedSchedule, SingleSchedule};
use ensim_core::{NodeLifecycle, UpdateStatus};

use crate::error::{PuaError, PuaResult};
use crate::jobs::{JobFn, JobScheduler};

pub const SINGLE_SCHEDULE_TAG: &str = "single-schedule";
pub const REPEATED_SCHEDULE_TAG: &str = "repeated-schedule";

const KERNEL_COMMAND_PATTERN: &str = r"^[A-Za-z0-9\-_=.,/ ]*$";

/// Update state shared with running job bodies.
struct UpdateState {
    current: StdMutex<UpdateStatus>,
    tx: mpsc::Sender<UpdateStatus>,
}

impl UpdateState {
    fn get(&self) -> UpdateStatus {
        *self.current.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Store `status` without publishing it.
    fn store(&self, status: UpdateStatus) {
        *self.current.lock().unwrap_or_else(|e| e.into_inner()) = status;
    }

    async fn set(&self, status: UpdateStatus) {
        self.store(status);
        debug!(%status, "update state changed");
        if self.tx.send(status).await.is_err() {
            debug!(%status, "update state receiver gone");
        }
    }
}

/// Schedules most recently accepted from the control plane.
#[derive(Debug, Default)]
struct ScheduleBook {
    single: Option<SingleSchedule>,
    single_finished: bool,
    repeated: Vec<RepeatedSchedule>,
}

pub struct Pua {
    state: Arc<UpdateState>,
    book: Mutex<ScheduleBook>,
    scheduler: JobScheduler,
    update_duration: Duration,
    kernel_command: Regex,
}

impl Pua {
    /// Create an agent in `UP_TO_DATE` publishing transitions on `state_tx`.
    pub fn new(state_tx: mpsc::Sender<UpdateStatus>) -> PuaResult<Self> {
        Ok(Self {
            state: Arc::new(UpdateState {
                current: StdMutex::new(UpdateStatus::UpToDate),
                tx: state_tx,
            }),
            book: Mutex::new(ScheduleBook {
                single_finished: true,
                ..ScheduleBook::default()
            }),
            scheduler: JobScheduler::new(),
            update_duration: Duration::from_secs(30),
            kernel_command: Regex::new(KERNEL_COMMAND_PATTERN)?,
        })
    }

    /// Override the simulated length of an update.
    pub fn with_update_duration(mut self, duration: Duration) -> Self {
        self.update_duration = duration;
        self
    }

    /// Spawn the response handling task on the node's lifecycle.
    ///
    /// The task exits on termination and shuts the job scheduler down.
    pub fn handle(
        self: &Arc<Self>,
        lifecycle: &NodeLifecycle,
        mut resp_rx: mpsc::Receiver<PlatformUpdateStatusResponse>,
    ) {
        let pua = Arc::clone(self);
        let cancel = lifecycle.token();
        lifecycle.spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    resp = resp_rx.recv() => {
                        let Some(resp) = resp else { break };
                        if resp.update_schedule.is_some() {
                            if let Err(e) = pua.handle_update_response(&resp).await {
                                warn!(error = %e, "update response rejected");
                            }
                        } else {
                            pua.cleanup_schedule().await;
                        }
                    }
                }
            }
            pua.scheduler.shutdown().await;
            debug!("update agent handler stopped");
        });
    }

    /// Apply the schedules of one control-plane response.
    ///
    /// Responses without update source or schedule are ignored. A kernel
    /// command outside the allowed character set rejects the whole response.
    pub async fn handle_update_response(&self, resp: &PlatformUpdateStatusResponse) -> PuaResult<()> {
        let (Some(source), Some(schedule)) = (&resp.update_source, &resp.update_schedule) else {
            debug!("response carries no update source or schedule");
            return Ok(());
        };

        if !self.kernel_command.is_match(&source.kernel_command) {
            return Err(PuaError::InvalidKernelCommand(source.kernel_command.clone()));
        }

        let mut book = self.book.lock().await;
        self.handle_single_schedule(&mut book, schedule.single_schedule.as_ref())
            .await;
        self.handle_repeated_schedules(&mut book, &schedule.repeated_schedules)
            .await;
        Ok(())
    }

    async fn handle_single_schedule(&self, book: &mut ScheduleBook, schedule: Option<&SingleSchedule>) {
        let Some(schedule) = schedule else {
            self.scheduler.remove_by_tag(SINGLE_SCHEDULE_TAG).await;
            book.single = None;
            book.single_finished = true;
            return;
        };

        let known = book.single.as_ref() == Some(schedule);
        if known && book.single_finished {
            return;
        }

        let mut jobs = self.scheduler.find_by_tag(SINGLE_SCHEDULE_TAG).await;
        if !known && !jobs.is_empty() {
            info!(
                start = schedule.start_seconds,
                end = schedule.end_seconds,
                "single schedule replaced"
            );
            self.scheduler.remove_by_tag(SINGLE_SCHEDULE_TAG).await;
            jobs.clear();
        }

        if let Some(job) = jobs.first() {
            if job.finished_runs() > 0 {
                self.scheduler.remove_by_tag(SINGLE_SCHEDULE_TAG).await;
                book.single_finished = true;
            }
            return;
        }

        let now = Utc::now().timestamp().max(0) as u64;
        if schedule.end_seconds != 0 && schedule.end_seconds < schedule.start_seconds {
            warn!(
                start = schedule.start_seconds,
                end = schedule.end_seconds,
                "single schedule ends before it starts"
            );
            book.single = Some(schedule.clone());
            book.single_finished = true;
            self.state.set(UpdateStatus::Failed).await;
            return;
        }
        if schedule.end_seconds != 0 && schedule.end_seconds <= now {
            debug!(end = schedule.end_seconds, "single schedule already expired");
            book.single = Some(schedule.clone());
            book.single_finished = true;
            return;
        }
        let Some(at) = i64::try_from(schedule.start_seconds)
            .ok()
            .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
        else {
            warn!(start = schedule.start_seconds, "single schedule start out of range");
            self.state.set(UpdateStatus::Failed).await;
            return;
        };

        self.scheduler
            .schedule_once(SINGLE_SCHEDULE_TAG, at, self.update_job())
            .await;
        info!(%at, "single schedule armed");
        book.single = Some(schedule.clone());
        book.single_finished = false;
    }

    async fn handle_repeated_schedules(&self, book: &mut ScheduleBook, schedules: &[RepeatedSchedule]) {
        let jobs = self.scheduler.find_by_tag(REPEATED_SCHEDULE_TAG).await;
        if !jobs.is_empty()
            && schedules.len() == book.repeated.len()
            && schedules.iter().all(|s| book.repeated.contains(s))
        {
            return;
        }

        self.scheduler.remove_by_tag(REPEATED_SCHEDULE_TAG).await;
        book.repeated.clear();

        // Every schedule is recorded, parsed or not, so an identical
        // resubmission is recognised.
        book.repeated = schedules.to_vec();
        let mut failed = false;
        for schedule in schedules {
            let expr = cron_schedule_to_string(schedule);
            match self
                .scheduler
                .schedule_cron(REPEATED_SCHEDULE_TAG, &expr, self.update_job())
                .await
            {
                Ok(_) => info!(cron = %expr, "repeated schedule armed"),
                Err(e) => {
                    warn!(error = %e, "repeated schedule rejected");
                    failed = true;
                }
            }
        }
        if failed {
            self.state.set(UpdateStatus::Failed).await;
        }
    }

    /// Drop every schedule and job.
    pub async fn cleanup_schedule(&self) {
        let mut book = self.book.lock().await;
        let removed = self.scheduler.remove_by_tag(SINGLE_SCHEDULE_TAG).await
            + self.scheduler.remove_by_tag(REPEATED_SCHEDULE_TAG).await;
        book.single = None;
        book.single_finished = true;
        book.repeated.clear();
        if removed > 0 {
            debug!(removed, "schedules cleaned up");
        }
    }

    pub fn state(&self) -> UpdateStatus {
        self.state.get()
    }

    /// Return to `UP_TO_DATE` once an `UPDATED` state has been reported.
    ///
    /// The reset is not published: the control plane already knows the
    /// update finished.
    pub fn up_to_date(&self) {
        self.state.store(UpdateStatus::UpToDate);
    }

    /// Jobs currently registered with the scheduler.
    pub async fn jobs(&self) -> Vec<crate::jobs::JobHandle> {
        self.scheduler.jobs().await
    }

    fn update_job(&self) -> JobFn {
        let state = self.state.clone();
        let duration = self.update_duration;
        Arc::new(move || {
            let state = state.clone();
            async move {
                state.set(UpdateStatus::Started).await;
                tokio::time::sleep(duration).await;
                state.set(UpdateStatus::Updated).await;
            }
            .boxed()
        })
    }
}

/// Render the cron fields of a repeated schedule as a five-field expression.
pub fn cron_schedule_to_string(schedule: &RepeatedSchedule) -> String {
    format!(
        "{} {} {} {} {}",
        schedule.cron_minutes,
        schedule.cron_hours,
        schedule.cron_day_month,
        schedule.cron_month,
        schedule.cron_day_week
    )
}
