use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Normalised job state, recomputed on every query
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Unknown,
}

impl JobStatus {
    /// Pending, running and unknown jobs carry no result
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

/// Output of a job that has left the queue
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    /// Parsed output artifact
    pub payload: Option<Value>,
    /// Last lines of the job log, oldest first
    pub log_tail: Option<Vec<String>>,
}

/// Everything known about a job at query time
#[derive(Debug, Clone, PartialEq)]
pub struct StatusReport {
    pub job_id: String,
    pub status: JobStatus,
    pub result: Option<JobResult>,
    pub error: Option<String>,
}

impl StatusReport {
    pub fn new(job_id: &str, status: JobStatus) -> Self {
        StatusReport { job_id: job_id.to_string(), status, result: None, error: None }
    }

    /// Status could not be determined
    pub fn unknown(job_id: &str, error: impl Into<String>) -> Self {
        StatusReport { error: Some(error.into()), ..StatusReport::new(job_id, JobStatus::Unknown) }
    }
}

/// Keep at most `limit` trailing lines
pub fn tail_lines(text: &str, limit: usize) -> Vec<String> {
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(limit);
    lines[start..].iter().map(|l| l.to_string()).collect()
}
