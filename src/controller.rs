//! Submit and status-check use cases
//!
//! Every call opens its own remote session and closes it before returning, whatever the
//! outcome. The scheduler is the source of truth for job state; the ledger only remembers where
//! this process put each job's files.

use std::sync::Arc;

use chrono::Utc;
use log::{debug, info, warn};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::job::ledger::JobLedger;
use crate::job::spec::{JobHandle, JobSpec};
use crate::job::stage::JobStager;
use crate::job::status::{tail_lines, JobResult, JobStatus, StatusReport};
use crate::slurm::adapter::{is_valid_job_id, QueueState, SchedulerAdapter};
use crate::slurm::command;
use crate::ssh::session::{Connector, RemoteSession};

/// Written by the model's batch script when it finishes successfully
pub const OUTPUT_FILE: &str = "output.json";

pub struct JobController {
    connector: Arc<dyn Connector>,
    stager: JobStager,
    adapter: SchedulerAdapter,
    ledger: Arc<JobLedger>,
    log_tail_lines: usize,
}

impl JobController {
    pub fn new(
        connector: Arc<dyn Connector>,
        stager: JobStager,
        adapter: SchedulerAdapter,
        ledger: Arc<JobLedger>,
        log_tail_lines: usize,
    ) -> Self {
        JobController { connector, stager, adapter, ledger, log_tail_lines }
    }

    pub fn ledger(&self) -> &Arc<JobLedger> {
        &self.ledger
    }

    /// Stage and submit a job, then remember it
    ///
    /// Nothing is recorded unless the scheduler accepted the job.
    pub async fn submit(&self, spec: JobSpec) -> Result<JobHandle> {
        let session = self.connector.connect().await?;
        let outcome = self.stage_and_submit(session.as_ref(), &spec).await;
        session.close().await;
        let (job_id, work_dir) = outcome?;

        info!("Submitted {} job {} for {}", spec.model, job_id, spec.submitted_by);
        let handle = JobHandle { job_id, work_dir, spec, submitted_at: Utc::now() };
        self.ledger.record(handle.clone()).await;
        Ok(handle)
    }

    async fn stage_and_submit(&self, session: &dyn RemoteSession, spec: &JobSpec) -> Result<(String, String)> {
        let work_dir = self.stager.stage(session, spec).await?;
        let job_id = self.adapter.submit(session, &work_dir, spec.model).await?;
        Ok((job_id, work_dir))
    }

    /// Current status of a job, with its result once it has left the queue
    ///
    /// Only malformed input is an error. Anything that goes wrong on the remote side is
    /// reported as `Unknown` with the reason attached.
    pub async fn check_status(&self, job_id: &str, work_dir_hint: Option<&str>) -> Result<StatusReport> {
        if !is_valid_job_id(job_id) {
            return Err(Error::InvalidRequest(format!("invalid job id {job_id:?}")));
        }
        // a hint is only consulted, and only checked, when the ledger has no entry
        let known = self.ledger.get(job_id).await.map(|handle| handle.work_dir);
        let hint = match (&known, work_dir_hint) {
            (None, Some(hint)) => {
                self.check_job_folder(hint)?;
                Some(hint)
            }
            (Some(_), Some(hint)) => {
                debug!("Job {job_id} is in the ledger, ignoring job folder {hint:?}");
                None
            }
            (_, None) => None,
        };

        let session = match self.connector.connect().await {
            Ok(session) => session,
            Err(e) => {
                warn!("Can't open session to check job {job_id}: {e}");
                return Ok(StatusReport::unknown(job_id, describe(&e)));
            }
        };
        let outcome = self.resolve(session.as_ref(), job_id, known, hint).await;
        session.close().await;

        Ok(outcome.unwrap_or_else(|e| {
            warn!("Status of job {job_id} undetermined: {e}");
            StatusReport::unknown(job_id, describe(&e))
        }))
    }

    /// Work directories from outside the ledger must sit directly under the job root
    fn is_job_folder(&self, dir: &str) -> bool {
        let base = format!("{}/", self.stager.base_dir());
        dir.strip_prefix(&base)
            .is_some_and(|rest| !rest.is_empty() && !rest.contains('/') && rest != "." && rest != "..")
    }

    fn check_job_folder(&self, hint: &str) -> Result<()> {
        if self.is_job_folder(hint) {
            Ok(())
        } else {
            Err(Error::InvalidRequest(format!("job folder must be a directory in {}", self.stager.base_dir())))
        }
    }

    async fn resolve(
        &self,
        session: &dyn RemoteSession,
        job_id: &str,
        known: Option<String>,
        hint: Option<&str>,
    ) -> Result<StatusReport> {
        let scheduler_status = match self.adapter.query_state(session, job_id).await? {
            QueueState::Queued(state) if !state.status.is_terminal() => {
                debug!("Job {job_id} is {} ({})", state.status, state.raw);
                return Ok(StatusReport::new(job_id, state.status));
            }
            QueueState::Queued(state) => Some(state.status),
            QueueState::NotQueued => None,
        };

        let Some(work_dir) = self.work_dir(session, job_id, known, hint).await? else {
            return Ok(StatusReport::unknown(
                job_id,
                "job has left the queue and its work directory is unknown",
            ));
        };

        let log_tail = self.log_tail(session, &work_dir, job_id).await;
        let artifact = format!("{work_dir}/{OUTPUT_FILE}");

        let contents = session.read_file(&artifact).await.map_err(Error::into_query)?;
        let (mut status, payload, error) = match contents {
            Some(bytes) => match serde_json::from_slice::<Value>(&bytes) {
                Ok(payload) => (JobStatus::Completed, Some(payload), None),
                Err(e) => {
                    let err = Error::Parse(format!("{artifact}: {e}"));
                    warn!("Job {job_id}: {err}");
                    (JobStatus::Failed, None, Some(describe(&err)))
                }
            },
            None => (JobStatus::Failed, None, Some(format!("job left the queue without writing {artifact}"))),
        };

        if scheduler_status == Some(JobStatus::Failed) {
            status = JobStatus::Failed;
        }
        info!("Job {job_id} resolved as {status}");

        Ok(StatusReport {
            job_id: job_id.to_string(),
            status,
            result: Some(JobResult { payload, log_tail }),
            error,
        })
    }

    /// Ledger first, then the caller's hint, then scheduler accounting
    async fn work_dir(
        &self,
        session: &dyn RemoteSession,
        job_id: &str,
        known: Option<String>,
        hint: Option<&str>,
    ) -> Result<Option<String>> {
        if known.is_some() {
            return Ok(known);
        }
        if let Some(hint) = hint {
            debug!("Job {job_id} not in ledger, using caller's job folder");
            return Ok(Some(hint.to_string()));
        }
        warn!("Job {job_id} not in ledger and no job folder given, asking accounting");
        match self.adapter.work_dir(session, job_id).await? {
            Some(dir) if !self.is_job_folder(&dir) => Err(Error::Query(format!(
                "accounting places job {job_id} in {dir}, outside {}",
                self.stager.base_dir()
            ))),
            found => Ok(found),
        }
    }

    /// Best effort: a missing or unreadable log never changes the status
    async fn log_tail(&self, session: &dyn RemoteSession, work_dir: &str, job_id: &str) -> Option<Vec<String>> {
        if self.log_tail_lines == 0 {
            return None;
        }
        let path = command::log_path(work_dir, job_id);
        match session.exec(&command::tail(&path, self.log_tail_lines)).await {
            Ok(output) if output.success() => Some(tail_lines(&output.stdout, self.log_tail_lines)),
            Ok(output) => {
                debug!("No log for job {job_id}: {}", output.diagnostic());
                None
            }
            Err(e) => {
                warn!("Can't read log for job {job_id}: {e}");
                None
            }
        }
    }

    pub async fn cancel(&self, job_id: &str) -> Result<()> {
        if !is_valid_job_id(job_id) {
            return Err(Error::InvalidRequest(format!("invalid job id {job_id:?}")));
        }
        let session = self.connector.connect().await?;
        let outcome = self.adapter.cancel(session.as_ref(), job_id).await;
        session.close().await;
        outcome
    }
}

fn describe(err: &Error) -> String {
    format!("{}: {}", err.kind(), err)
}
