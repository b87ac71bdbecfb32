use std::sync::atomic::{AtomicI64, Ordering};

use chrono::Utc;
use log::info;

use crate::error::{Error, Result};
use crate::job::spec::JobSpec;
use crate::ssh::session::RemoteSession;

pub const PARAMETERS_FILE: &str = "parameters.json";

/// Creates one fresh work directory per job and writes its parameters into it
pub struct JobStager {
    base_dir: String,
    last_stamp: AtomicI64,
}

/// Submitter ids end up in a path, so only a conservative character set survives
fn path_safe(s: &str) -> String {
    s.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

impl JobStager {
    pub fn new(base_dir: impl Into<String>) -> Self {
        JobStager { base_dir: base_dir.into(), last_stamp: AtomicI64::new(0) }
    }

    pub fn base_dir(&self) -> &str {
        &self.base_dir
    }

    /// Wall clock milliseconds, bumped so no two calls return the same value
    fn next_stamp(&self) -> i64 {
        let now = Utc::now().timestamp_millis();
        let mut last = self.last_stamp.load(Ordering::SeqCst);
        loop {
            let next = now.max(last + 1);
            match self.last_stamp.compare_exchange(last, next, Ordering::SeqCst, Ordering::SeqCst) {
                Ok(_) => return next,
                Err(seen) => last = seen,
            }
        }
    }

    pub fn work_dir_for(&self, spec: &JobSpec, stamp: i64) -> String {
        format!("{}/{}-{}-{}", self.base_dir, spec.model, path_safe(&spec.submitted_by), stamp)
    }

    /// Create the work directory and write `parameters.json` into it over SFTP
    ///
    /// The parameters are written to a temporary name, checked for size and then renamed, so
    /// a truncated transfer is never mistaken for a staged job.
    pub async fn stage(&self, session: &dyn RemoteSession, spec: &JobSpec) -> Result<String> {
        let work_dir = self.work_dir_for(spec, self.next_stamp());
        info!("Staging {} job for {} in {}", spec.model, spec.submitted_by, work_dir);

        session.create_dir_all(&work_dir).await.map_err(Error::into_staging)?;

        let contents = serde_json::to_vec(&spec.parameters)
            .map_err(|e| Error::Staging(format!("can't serialise parameters: {e}")))?;
        let final_path = format!("{work_dir}/{PARAMETERS_FILE}");
        let partial_path = format!("{final_path}.partial");

        session.write_file(&partial_path, &contents).await.map_err(Error::into_staging)?;

        let expected = contents.len() as u64;
        match session.file_size(&partial_path).await.map_err(Error::into_staging)? {
            Some(size) if size == expected => {}
            Some(size) => {
                return Err(Error::Staging(format!(
                    "partial write to {partial_path}: expected {expected} bytes, found {size}"
                )))
            }
            None => return Err(Error::Staging(format!("{partial_path} missing after write"))),
        }

        session.rename(&partial_path, &final_path).await.map_err(Error::into_staging)?;
        info!("Wrote {} bytes of parameters to {}", expected, final_path);

        Ok(work_dir)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use serde_json::Map;

    use super::*;
    use crate::job::spec::Model;

    #[test]
    fn work_dir_combines_model_submitter_and_stamp() {
        let stager = JobStager::new("/scratch/alice/jobs");
        let spec = JobSpec::new(Model::Drn, Map::new(), Some("u1".to_string()));
        assert_eq!(stager.work_dir_for(&spec, 42), "/scratch/alice/jobs/drn-u1-42");
    }

    #[test]
    fn submitter_cannot_escape_base_dir() {
        let stager = JobStager::new("/jobs");
        let spec = JobSpec::new(Model::Ats, Map::new(), Some("../../etc; rm".to_string()));
        assert_eq!(stager.work_dir_for(&spec, 1), "/jobs/ats-______etc__rm-1");
    }

    #[test]
    fn stamps_never_repeat() {
        let stager = JobStager::new("/jobs");
        let stamps: HashSet<i64> = (0..1000).map(|_| stager.next_stamp()).collect();
        assert_eq!(stamps.len(), 1000);
    }
}
