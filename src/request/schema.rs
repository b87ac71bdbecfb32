use jsonschema::JSONSchema;
use log::{info, warn};
use serde_json::Value;

use crate::error::{Error, Result};

static RUN_JOB: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/data/schema/run_job.json"));
static CHECK_JOB: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/data/schema/check_job.json"));

/// Compiled request schemas, built once at startup
pub struct RequestSchemas {
    run_job: JSONSchema,
    check_job: JSONSchema,
}

impl RequestSchemas {
    pub fn load() -> Result<Self> {
        Ok(RequestSchemas { run_job: compile(RUN_JOB)?, check_job: compile(CHECK_JOB)? })
    }

    pub fn validate_run_job(&self, body: &Value) -> Result<()> {
        validate(&self.run_job, body)
    }

    pub fn validate_check_job(&self, body: &Value) -> Result<()> {
        validate(&self.check_job, body)
    }
}

fn compile(source: &str) -> Result<JSONSchema> {
    let schema: Value = serde_json::from_str(source)
        .map_err(|e| Error::InvalidRequest(format!("request schema is not JSON: {e}")))?;
    info!("Compiling request schema {}", schema["title"]);
    JSONSchema::compile(&schema).map_err(|e| Error::InvalidRequest(format!("invalid request schema: {e}")))
}

fn validate(schema: &JSONSchema, body: &Value) -> Result<()> {
    schema.validate(body).map_err(|errors| {
        let reasons: Vec<String> = errors.map(|e| format!("{} at '{}'", e, e.instance_path)).collect();
        warn!("Request fails validation: {}", reasons.join("; "));
        Error::InvalidRequest(reasons.join("; "))
    })
}
