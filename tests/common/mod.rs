//! An in-memory stand-in for the cluster login node
#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use slurmgate::controller::JobController;
use slurmgate::error::{Error, Result};
use slurmgate::job::ledger::JobLedger;
use slurmgate::job::stage::JobStager;
use slurmgate::slurm::adapter::SchedulerAdapter;
use slurmgate::slurm::command::ScriptTemplate;
use slurmgate::ssh::session::{Connector, ExecOutput, RemoteCommand, RemoteSession};

pub const JOB_ROOT: &str = "/scratch/alice/jobs";
pub const SCRIPT_DIR: &str = "/home/alice/scripts";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectFailure {
    Auth,
    Network,
}

#[derive(Default)]
pub struct ClusterState {
    pub files: HashMap<String, Vec<u8>>,
    pub dirs: HashSet<String>,
    /// job id -> scheduler state
    pub queue: HashMap<String, String>,
    /// job id -> work directory passed to --chdir
    pub accounting: HashMap<String, String>,
    pub next_job_id: u64,
    pub commands: Vec<RemoteCommand>,
    pub open_sessions: usize,
    pub sessions_opened: usize,
    pub connect_failure: Option<ConnectFailure>,
    pub sbatch_override: Option<ExecOutput>,
    pub squeue_override: Option<ExecOutput>,
    /// paths whose reads fail with a permission error
    pub unreadable: HashSet<String>,
    pub squeue_times_out: bool,
    pub truncate_writes: bool,
    pub accounting_enabled: bool,
}

/// Shared handle on the fake cluster, cloned into every connector
#[derive(Clone)]
pub struct FakeCluster {
    pub state: Arc<Mutex<ClusterState>>,
}

impl FakeCluster {
    pub fn new() -> Self {
        let state = ClusterState { next_job_id: 12345, accounting_enabled: true, ..Default::default() };
        FakeCluster { state: Arc::new(Mutex::new(state)) }
    }

    pub fn with<T>(&self, f: impl FnOnce(&mut ClusterState) -> T) -> T {
        f(&mut self.state.lock().unwrap())
    }

    pub fn connector(&self) -> Arc<dyn Connector> {
        Arc::new(FakeConnector { cluster: self.clone() })
    }

    pub fn set_state(&self, job_id: &str, state: &str) {
        self.with(|s| s.queue.insert(job_id.to_string(), state.to_string()));
    }

    /// The job leaves the queue, optionally leaving an output artifact behind
    pub fn finish(&self, job_id: &str, output: Option<&str>) {
        self.with(|s| {
            s.queue.remove(job_id);
            let work_dir = s.accounting.get(job_id).cloned().expect("job was submitted");
            if let Some(output) = output {
                s.files.insert(format!("{work_dir}/output.json"), output.as_bytes().to_vec());
            }
        });
    }

    pub fn write_log(&self, work_dir: &str, job_id: &str, text: &str) {
        self.with(|s| s.files.insert(format!("{work_dir}/slurm-{job_id}.out"), text.as_bytes().to_vec()));
    }

    pub fn programs_run(&self) -> Vec<String> {
        self.with(|s| s.commands.iter().map(|c| c.program.clone()).collect())
    }

    pub fn read(&self, path: &str) -> Option<Vec<u8>> {
        self.with(|s| s.files.get(path).cloned())
    }

    pub fn read_json(&self, path: &str) -> Option<Value> {
        self.read(path).map(|b| serde_json::from_slice(&b).expect("json file"))
    }
}

pub struct FakeConnector {
    cluster: FakeCluster,
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self) -> Result<Box<dyn RemoteSession>> {
        self.cluster.with(|s| match s.connect_failure {
            Some(ConnectFailure::Auth) => Err(Error::Auth("public key rejected for alice@fake".to_string())),
            Some(ConnectFailure::Network) => Err(Error::Network("connection refused".to_string())),
            None => {
                s.open_sessions += 1;
                s.sessions_opened += 1;
                Ok(())
            }
        })?;
        Ok(Box::new(FakeSession { cluster: self.cluster.clone() }))
    }
}

pub struct FakeSession {
    cluster: FakeCluster,
}

fn ok(stdout: impl Into<String>) -> ExecOutput {
    ExecOutput { stdout: stdout.into(), stderr: String::new(), exit_code: 0 }
}

fn fail(stderr: impl Into<String>) -> ExecOutput {
    ExecOutput { stdout: String::new(), stderr: stderr.into(), exit_code: 1 }
}

fn arg_after<'a>(cmd: &'a RemoteCommand, flag: &str) -> Option<&'a str> {
    let pos = cmd.args.iter().position(|a| a == flag)?;
    cmd.args.get(pos + 1).map(String::as_str)
}

#[async_trait]
impl RemoteSession for FakeSession {
    async fn exec(&self, command: &RemoteCommand) -> Result<ExecOutput> {
        self.cluster.with(|s| {
            s.commands.push(command.clone());
            match command.program.as_str() {
                "sbatch" => {
                    if let Some(out) = s.sbatch_override.clone() {
                        return Ok(out);
                    }
                    let id = s.next_job_id.to_string();
                    s.next_job_id += 1;
                    let work_dir = arg_after(command, "--chdir").expect("--chdir").to_string();
                    s.queue.insert(id.clone(), "RUNNING".to_string());
                    s.accounting.insert(id.clone(), work_dir);
                    Ok(ok(format!("Submitted batch job {id}\n")))
                }
                "squeue" => {
                    if let Some(out) = s.squeue_override.clone() {
                        return Ok(out);
                    }
                    if s.squeue_times_out {
                        return Err(Error::Timeout { operation: "squeue".to_string(), limit: Duration::from_secs(30) });
                    }
                    let id = arg_after(command, "--jobs").expect("--jobs");
                    match s.queue.get(id) {
                        Some(state) => Ok(ok(format!("{id} {state}\n"))),
                        None if s.accounting.contains_key(id) => Ok(ok("")),
                        None => Ok(fail("slurm_load_jobs error: Invalid job id specified")),
                    }
                }
                "scancel" => {
                    let id = &command.args[0];
                    match s.queue.remove(id) {
                        Some(_) => Ok(ok("")),
                        None => Ok(fail(format!("scancel: error: Kill job error on job id {id}: Invalid job id specified"))),
                    }
                }
                "sacct" => {
                    if !s.accounting_enabled {
                        return Ok(fail("sacct: error: Slurm accounting storage is disabled"));
                    }
                    let id = arg_after(command, "--jobs").expect("--jobs");
                    Ok(ok(s.accounting.get(id).map(|d| format!("{d}\n")).unwrap_or_default()))
                }
                "tail" => {
                    let n: usize = arg_after(command, "-n").expect("-n").parse().expect("line count");
                    let path = command.args.last().expect("path");
                    match s.files.get(path) {
                        Some(bytes) => {
                            let text = String::from_utf8_lossy(bytes).into_owned();
                            let lines: Vec<&str> = text.lines().collect();
                            let start = lines.len().saturating_sub(n);
                            Ok(ok(lines[start..].join("\n")))
                        }
                        None => Ok(fail(format!("tail: cannot open '{path}' for reading: No such file or directory"))),
                    }
                }
                other => Ok(fail(format!("{other}: command not found"))),
            }
        })
    }

    async fn create_dir_all(&self, path: &str) -> Result<()> {
        self.cluster.with(|s| {
            if s.files.contains_key(path) {
                return Err(Error::RemoteFs { path: path.to_string(), message: "not a directory".to_string() });
            }
            s.dirs.insert(path.to_string());
            Ok(())
        })
    }

    async fn write_file(&self, path: &str, contents: &[u8]) -> Result<()> {
        self.cluster.with(|s| {
            let parent = path.rsplit_once('/').map(|(p, _)| p).unwrap_or("");
            if !s.dirs.contains(parent) {
                return Err(Error::RemoteFs { path: path.to_string(), message: "No such file".to_string() });
            }
            let stored = if s.truncate_writes { &contents[..contents.len() / 2] } else { contents };
            s.files.insert(path.to_string(), stored.to_vec());
            Ok(())
        })
    }

    async fn read_file(&self, path: &str) -> Result<Option<Vec<u8>>> {
        if self.cluster.with(|s| s.unreadable.contains(path)) {
            return Err(Error::RemoteFs { path: path.to_string(), message: "Permission denied".to_string() });
        }
        Ok(self.cluster.read(path))
    }

    async fn file_size(&self, path: &str) -> Result<Option<u64>> {
        Ok(self.cluster.read(path).map(|b| b.len() as u64))
    }

    async fn rename(&self, from: &str, to: &str) -> Result<()> {
        self.cluster.with(|s| match s.files.remove(from) {
            Some(bytes) => {
                s.files.insert(to.to_string(), bytes);
                Ok(())
            }
            None => Err(Error::RemoteFs { path: from.to_string(), message: "No such file".to_string() }),
        })
    }

    async fn close(&self) {
        self.cluster.with(|s| s.open_sessions -= 1);
    }
}

pub fn controller(cluster: &FakeCluster) -> JobController {
    let script = ScriptTemplate::new("{script_dir}/run_{model}_job.sh", SCRIPT_DIR).expect("template");
    JobController::new(
        cluster.connector(),
        JobStager::new(JOB_ROOT),
        SchedulerAdapter::new(script),
        Arc::new(JobLedger::new()),
        20,
    )
}
