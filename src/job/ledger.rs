use std::collections::HashMap;

use log::info;
use tokio::sync::RwLock;

use crate::job::spec::JobHandle;

/// Jobs submitted by this process, keyed by scheduler job id
///
/// Only a cache for status queries: lost on restart and never consulted for the job state.
#[derive(Debug, Default)]
pub struct JobLedger {
    jobs: RwLock<HashMap<String, JobHandle>>,
}

impl JobLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record(&self, handle: JobHandle) {
        let mut jobs = self.jobs.write().await;
        jobs.insert(handle.job_id.clone(), handle);
    }

    pub async fn get(&self, job_id: &str) -> Option<JobHandle> {
        self.jobs.read().await.get(job_id).cloned()
    }

    /// All entries, oldest submission first
    pub async fn list(&self) -> Vec<JobHandle> {
        let mut handles: Vec<JobHandle> = self.jobs.read().await.values().cloned().collect();
        handles.sort_by(|a, b| a.submitted_at.cmp(&b.submitted_at).then_with(|| a.job_id.cmp(&b.job_id)));
        handles
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Forget every entry, returning how many there were
    pub async fn clear(&self) -> usize {
        let mut jobs = self.jobs.write().await;
        let n = jobs.len();
        jobs.clear();
        info!("Cleared {n} ledger entries");
        n
    }
}
