use log::{debug, info, warn};

use crate::error::{Error, Result};
use crate::job::spec::Model;
use crate::job::status::JobStatus;
use crate::slurm::command::{self, ScriptTemplate};
use crate::ssh::session::RemoteSession;

/// sbatch reports a successful submission as `Submitted batch job <id>`
pub const SUBMIT_PREFIX: &str = "Submitted batch job";

/// squeue's answer when a job has already been purged from the controller
const INVALID_JOB_ID: &str = "Invalid job id specified";

/// Scheduler state → normalised status. Anything else is `Unknown`
pub const STATE_TABLE: &[(&str, JobStatus)] = &[
    ("PENDING", JobStatus::Pending),
    ("RUNNING", JobStatus::Running),
    ("COMPLETED", JobStatus::Completed),
    ("FAILED", JobStatus::Failed),
    ("CANCELLED", JobStatus::Failed),
    ("TIMEOUT", JobStatus::Failed),
];

/// A state as reported by the scheduler and what it means here
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerState {
    pub raw: String,
    pub status: JobStatus,
}

/// Result of a queue query. Leaving the queue is normal flow, not an error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueState {
    Queued(SchedulerState),
    NotQueued,
}

/// Strip decorations such as `CANCELLED by 1000` or `FAILED+` and upper-case the state
pub fn normalise_state(raw: &str) -> String {
    raw.trim()
        .split(|c: char| c == '+' || c == ':' || c == '(' || c.is_whitespace())
        .next()
        .unwrap_or("")
        .to_ascii_uppercase()
}

pub fn map_state(raw: &str) -> JobStatus {
    let state = normalise_state(raw);
    STATE_TABLE
        .iter()
        .find(|(name, _)| *name == state)
        .map(|(_, status)| *status)
        .unwrap_or(JobStatus::Unknown)
}

/// Scheduler job ids: plain, array task (`123_4`) or step (`123.batch`)
pub fn is_valid_job_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 64
        && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
        && id.chars().next().is_some_and(|c| c.is_ascii_digit())
}

/// Find the job id in sbatch output
pub fn parse_job_id(stdout: &str) -> Option<String> {
    stdout
        .lines()
        .filter_map(|line| line.trim().strip_prefix(SUBMIT_PREFIX))
        .filter_map(|rest| rest.split_whitespace().next())
        .find(|id| is_valid_job_id(id))
        .map(str::to_string)
}

/// The first squeue line belonging to `job_id` (including its array tasks)
fn parse_queue_line(stdout: &str, job_id: &str) -> Option<String> {
    let task_prefix = format!("{job_id}_");
    stdout.lines().find_map(|line| {
        let mut fields = line.split_whitespace();
        let id = fields.next()?;
        let state = fields.next()?;
        (id == job_id || id.starts_with(&task_prefix)).then(|| state.to_string())
    })
}

/// Only an empty listing means the job has left the queue. Output that names no state for
/// the job is a query failure, never evidence that the job finished.
pub fn parse_queue_output(stdout: &str, job_id: &str) -> Result<QueueState> {
    if stdout.trim().is_empty() {
        return Ok(QueueState::NotQueued);
    }
    match parse_queue_line(stdout, job_id) {
        Some(raw) => {
            let status = map_state(&raw);
            Ok(QueueState::Queued(SchedulerState { raw, status }))
        }
        None => Err(Error::Query(format!(
            "no state for job {job_id} in squeue output {:?}",
            stdout.trim()
        ))),
    }
}

/// Submits, inspects and cancels SLURM jobs through a remote session
#[derive(Debug, Clone)]
pub struct SchedulerAdapter {
    script: ScriptTemplate,
}

impl SchedulerAdapter {
    pub fn new(script: ScriptTemplate) -> Self {
        SchedulerAdapter { script }
    }

    pub async fn submit(&self, session: &dyn RemoteSession, work_dir: &str, model: Model) -> Result<String> {
        let script = self.script.render(model)?;
        let cmd = command::sbatch(&script, work_dir);
        info!("Running sbatch for {model} in {work_dir}");
        let output = session.exec(&cmd).await?;

        if !output.success() {
            return Err(Error::Submission(format!(
                "sbatch exited with status {}: {}",
                output.exit_code,
                output.diagnostic()
            )));
        }

        parse_job_id(&output.stdout).ok_or_else(|| {
            Error::Submission(format!(
                "can't find job id in sbatch output (stdout: {:?}, stderr: {:?})",
                output.stdout.trim(),
                output.stderr.trim()
            ))
        })
    }

    pub async fn query_state(&self, session: &dyn RemoteSession, job_id: &str) -> Result<QueueState> {
        let output = session.exec(&command::squeue(job_id)).await?;

        if !output.success() {
            if output.stderr.contains(INVALID_JOB_ID) {
                debug!("squeue no longer knows job {job_id}");
                return Ok(QueueState::NotQueued);
            }
            return Err(Error::Query(format!(
                "squeue exited with status {}: {}",
                output.exit_code,
                output.diagnostic()
            )));
        }

        let state = parse_queue_output(&output.stdout, job_id)?;
        if let QueueState::Queued(SchedulerState { raw, status: JobStatus::Unknown }) = &state {
            warn!("Unrecognised scheduler state {raw:?} for job {job_id}");
        }
        Ok(state)
    }

    pub async fn cancel(&self, session: &dyn RemoteSession, job_id: &str) -> Result<()> {
        let output = session.exec(&command::scancel(job_id)).await?;
        if output.success() {
            info!("Cancelled job {job_id}");
            Ok(())
        } else {
            Err(Error::Cancel(format!(
                "scancel exited with status {}: {}",
                output.exit_code,
                output.diagnostic()
            )))
        }
    }

    /// Work directory from accounting; `None` if accounting is unavailable or has no record
    pub async fn work_dir(&self, session: &dyn RemoteSession, job_id: &str) -> Result<Option<String>> {
        let output = session.exec(&command::sacct_work_dir(job_id)).await?;
        if !output.success() {
            warn!("sacct failed for job {job_id}: {}", output.diagnostic());
            return Ok(None);
        }
        Ok(output
            .stdout
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .map(str::to_string))
    }
}
