use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Error;

/// Models with a batch script installed on the cluster
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Model {
    Ats,
    Drn,
    Scepter,
}

impl Model {
    pub const ALL: [Model; 3] = [Model::Ats, Model::Drn, Model::Scepter];

    pub fn as_str(&self) -> &'static str {
        match self {
            Model::Ats => "ats",
            Model::Drn => "drn",
            Model::Scepter => "scepter",
        }
    }
}

impl fmt::Display for Model {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Model {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Model::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| Error::UnsupportedModel(s.to_string()))
    }
}

/// What to run, with which parameters, on whose behalf
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSpec {
    pub model: Model,
    pub parameters: Map<String, Value>,
    pub submitted_by: String,
}

impl JobSpec {
    pub const ANONYMOUS: &'static str = "anonymous";

    pub fn new(model: Model, parameters: Map<String, Value>, submitted_by: Option<String>) -> Self {
        let submitted_by = submitted_by
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| JobSpec::ANONYMOUS.to_string());
        JobSpec { model, parameters, submitted_by }
    }
}

/// A job accepted by the scheduler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobHandle {
    pub job_id: String,
    pub work_dir: String,
    pub spec: JobSpec,
    pub submitted_at: DateTime<Utc>,
}
