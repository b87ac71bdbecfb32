//! Command line and environment configuration

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use clap::Parser;

/// Submit model jobs to a remote SLURM cluster over SSH and report their progress
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Address of the cluster login node
    #[arg(long, env = "REMOTE_HOST")]
    pub host: String,

    /// Account used to log in to the cluster
    #[arg(long, env = "REMOTE_USER")]
    pub user: String,

    /// Private key material (not a path). Literal "\n" sequences are accepted
    #[arg(long, env = "SSH_PRIVATE_KEY", hide_env_values = true)]
    pub private_key: String,

    /// SSH port of the login node
    #[arg(long, env = "REMOTE_SSH_PORT", default_value_t = 22)]
    pub ssh_port: u16,

    /// Port the HTTP API listens on
    #[arg(long, env = "PORT", default_value_t = 10000)]
    pub port: u16,

    /// Address the HTTP API binds to
    #[arg(long, env = "BIND_ADDRESS", default_value = "0.0.0.0")]
    pub bind: IpAddr,

    /// Remote directory holding one work directory per job [default: /scratch/<user>/jobs]
    #[arg(long, env = "JOB_ROOT")]
    pub job_root: Option<String>,

    /// Remote directory holding the per-model batch scripts [default: /home/<user>/scripts]
    #[arg(long, env = "SCRIPT_DIR")]
    pub script_dir: Option<String>,

    /// Template for the batch script path, rendered with {script_dir} and {model}
    #[arg(long, env = "SCRIPT_TEMPLATE", default_value = "{script_dir}/run_{model}_job.sh")]
    pub script_template: String,

    /// Seconds before a remote command or file transfer is abandoned
    #[arg(long, env = "COMMAND_TIMEOUT_SECS", default_value_t = 30)]
    pub command_timeout: u64,

    /// Seconds allowed for the SSH handshake and authentication
    #[arg(long, env = "CONNECT_TIMEOUT_SECS", default_value_t = 15)]
    pub connect_timeout: u64,

    /// Maximum number of job log lines returned with a finished job
    #[arg(long, env = "LOG_TAIL_LINES", default_value_t = 50)]
    pub log_tail_lines: usize,

    /// Expected SHA256 fingerprint of the login node host key
    #[arg(long, env = "HOST_KEY_FINGERPRINT")]
    pub host_key_fingerprint: Option<String>,
}

/// Resolved settings shared by the SSH connector, stager and scheduler adapter
#[derive(Debug, Clone)]
pub struct Settings {
    pub host: String,
    pub ssh_port: u16,
    pub user: String,
    pub listen: SocketAddr,
    pub job_root: String,
    pub script_dir: String,
    pub script_template: String,
    pub command_timeout: Duration,
    pub connect_timeout: Duration,
    pub log_tail_lines: usize,
    pub host_key_fingerprint: Option<String>,
}

impl From<&Args> for Settings {
    fn from(args: &Args) -> Self {
        let job_root = args
            .job_root
            .clone()
            .unwrap_or_else(|| format!("/scratch/{}/jobs", args.user));
        let script_dir = args
            .script_dir
            .clone()
            .unwrap_or_else(|| format!("/home/{}/scripts", args.user));

        Settings {
            host: args.host.clone(),
            ssh_port: args.ssh_port,
            user: args.user.clone(),
            listen: SocketAddr::new(args.bind, args.port),
            job_root: job_root.trim_end_matches('/').to_string(),
            script_dir: script_dir.trim_end_matches('/').to_string(),
            script_template: args.script_template.clone(),
            command_timeout: Duration::from_secs(args.command_timeout),
            connect_timeout: Duration::from_secs(args.connect_timeout),
            log_tail_lines: args.log_tail_lines,
            host_key_fingerprint: args.host_key_fingerprint.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(extra: &[&str]) -> Args {
        let mut argv = vec!["slurmgate", "--host", "login.example.org", "--user", "alice", "--private-key", "k"];
        argv.extend_from_slice(extra);
        Args::try_parse_from(argv).expect("valid arguments")
    }

    #[test]
    fn defaults_derive_from_user() {
        let settings = Settings::from(&parse(&[]));
        assert_eq!(settings.job_root, "/scratch/alice/jobs");
        assert_eq!(settings.script_dir, "/home/alice/scripts");
        assert_eq!(settings.listen.port(), 10000);
        assert_eq!(settings.ssh_port, 22);
        assert_eq!(settings.command_timeout, Duration::from_secs(30));
        assert_eq!(settings.log_tail_lines, 50);
        assert!(settings.host_key_fingerprint.is_none());
    }

    #[test]
    fn explicit_paths_lose_trailing_slash() {
        let settings = Settings::from(&parse(&["--job-root", "/data/jobs/", "--port", "5000"]));
        assert_eq!(settings.job_root, "/data/jobs");
        assert_eq!(settings.listen.port(), 5000);
    }

    #[test]
    fn missing_credentials_are_rejected() {
        let result = Args::try_parse_from(["slurmgate", "--host", "h", "--user", "u"]);
        assert!(result.is_err());
    }
}
