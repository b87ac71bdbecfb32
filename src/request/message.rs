use chrono::{DateTime, Utc};
use log::info;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::job::spec::{JobHandle, JobSpec, Model};
use crate::job::status::{JobStatus, StatusReport};
use crate::request::schema::RequestSchemas;

/// Body of `POST /run-job`
#[derive(Debug, Deserialize)]
pub struct RunJobRequest {
    pub model: String,
    pub parameters: Map<String, Value>,
    #[serde(default)]
    pub user_id: Option<String>,
}

impl RunJobRequest {
    /// Validate against the schema, then resolve the model
    pub fn parse(schemas: &RequestSchemas, body: Value) -> Result<JobSpec> {
        schemas.validate_run_job(&body)?;
        info!("Deserialising valid run-job request");
        let request: RunJobRequest =
            serde_json::from_value(body).map_err(|e| Error::InvalidRequest(e.to_string()))?;
        let model: Model = request.model.parse()?;
        Ok(JobSpec::new(model, request.parameters, request.user_id))
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RunJobResponse {
    pub job_id: String,
    pub job_folder: String,
    pub submitted_at: DateTime<Utc>,
    pub message: String,
}

impl From<JobHandle> for RunJobResponse {
    fn from(handle: JobHandle) -> Self {
        RunJobResponse {
            message: format!("{} job submitted", handle.spec.model),
            job_id: handle.job_id,
            job_folder: handle.work_dir,
            submitted_at: handle.submitted_at,
        }
    }
}

/// Body of `/check-job-status`; the id may also come from the path
#[derive(Debug, Default, Deserialize)]
pub struct CheckStatusRequest {
    #[serde(default)]
    pub job_id: Option<Value>,
    #[serde(default)]
    pub job_folder: Option<String>,
}

impl CheckStatusRequest {
    pub fn parse(schemas: &RequestSchemas, body: Value) -> Result<Self> {
        schemas.validate_check_job(&body)?;
        serde_json::from_value(body).map_err(|e| Error::InvalidRequest(e.to_string()))
    }

    /// Job ids arrive as strings or bare numbers
    pub fn job_id(&self) -> Option<String> {
        match self.job_id.as_ref()? {
            Value::String(s) => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub job_id: String,
    pub status: JobStatus,
    pub result: Option<Value>,
    pub logs: Option<Vec<String>>,
    pub error: Option<String>,
}

impl From<StatusReport> for StatusResponse {
    fn from(report: StatusReport) -> Self {
        let (result, logs) = match report.result {
            Some(r) => (r.payload, r.log_tail),
            None => (None, None),
        };
        StatusResponse { job_id: report.job_id, status: report.status, result, logs, error: report.error }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub kind: String,
}

impl From<&Error> for ErrorResponse {
    fn from(err: &Error) -> Self {
        ErrorResponse { error: err.to_string(), kind: err.kind().to_string() }
    }
}
