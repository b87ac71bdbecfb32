use serde::Serialize;
use tinytemplate::TinyTemplate;

use crate::error::{Error, Result};
use crate::job::spec::Model;
use crate::ssh::session::RemoteCommand;

/// Rendering context for the batch script path
#[derive(Serialize)]
struct ScriptContext<'a> {
    script_dir: &'a str,
    model: &'a str,
}

/// Path of the batch script for each model, e.g. `{script_dir}/run_{model}_job.sh`
#[derive(Debug, Clone)]
pub struct ScriptTemplate {
    template: String,
    script_dir: String,
}

impl ScriptTemplate {
    /// Fails if the template doesn't render for every known model
    pub fn new(template: impl Into<String>, script_dir: impl Into<String>) -> Result<Self> {
        let script = ScriptTemplate { template: template.into(), script_dir: script_dir.into() };
        for model in Model::ALL {
            script.render(model)?;
        }
        Ok(script)
    }

    pub fn render(&self, model: Model) -> Result<String> {
        let mut tt = TinyTemplate::new();
        // paths must not be HTML escaped
        tt.set_default_formatter(&tinytemplate::format_unescaped);
        tt.add_template("script", &self.template)
            .map_err(|e| Error::Submission(format!("bad script template: {e}")))?;

        let context = ScriptContext { script_dir: &self.script_dir, model: model.as_str() };
        tt.render("script", &context)
            .map_err(|e| Error::Submission(format!("can't render script path: {e}")))
    }
}

/// `sbatch` run from the work directory, logging to `slurm-<id>.out` inside it
pub fn sbatch(script: &str, work_dir: &str) -> RemoteCommand {
    RemoteCommand::new("sbatch")
        .args(["--chdir", work_dir])
        .args(["--output".to_string(), format!("{work_dir}/slurm-%j.out")])
        .arg(script)
        .arg(work_dir)
}

/// One `<id> <STATE>` line per queued job (or array task)
pub fn squeue(job_id: &str) -> RemoteCommand {
    RemoteCommand::new("squeue").args(["--noheader", "--jobs", job_id, "--format", "%i %T"])
}

pub fn scancel(job_id: &str) -> RemoteCommand {
    RemoteCommand::new("scancel").arg(job_id)
}

/// Work directory recorded by accounting, for jobs this process has no record of
pub fn sacct_work_dir(job_id: &str) -> RemoteCommand {
    RemoteCommand::new("sacct").args([
        "--noheader",
        "--allocations",
        "--parsable2",
        "--jobs",
        job_id,
        "--format",
        "WorkDir",
    ])
}

pub fn tail(path: &str, lines: usize) -> RemoteCommand {
    RemoteCommand::new("tail").args(["-n".to_string(), lines.to_string(), "--".to_string(), path.to_string()])
}

/// Log file written by the `--output` pattern passed to sbatch
pub fn log_path(work_dir: &str, job_id: &str) -> String {
    format!("{work_dir}/slurm-{job_id}.out")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_template_renders_script_path() {
        let template = ScriptTemplate::new("{script_dir}/run_{model}_job.sh", "/home/alice/scripts").unwrap();
        assert_eq!(template.render(Model::Drn).unwrap(), "/home/alice/scripts/run_drn_job.sh");
    }

    #[test]
    fn broken_template_is_rejected_up_front() {
        assert!(ScriptTemplate::new("{script_dir/run.sh", "/x").is_err());
        assert!(ScriptTemplate::new("{nope}/run.sh", "/x").is_err());
    }

    #[test]
    fn sbatch_quotes_every_argument() {
        let cmd = sbatch("/s/run_drn_job.sh", "/jobs/drn-u1-1");
        assert_eq!(
            cmd.render(),
            "'sbatch' '--chdir' '/jobs/drn-u1-1' '--output' '/jobs/drn-u1-1/slurm-%j.out' \
             '/s/run_drn_job.sh' '/jobs/drn-u1-1'"
        );
    }

    #[test]
    fn squeue_is_scoped_to_one_job() {
        assert_eq!(
            squeue("12345").args,
            vec!["--noheader", "--jobs", "12345", "--format", "%i %T"]
        );
    }

    #[test]
    fn log_path_matches_output_pattern() {
        assert_eq!(log_path("/jobs/a", "12345"), "/jobs/a/slurm-12345.out");
    }
}
