use std::fmt;

use async_trait::async_trait;

use crate::error::Result;

/// Quote a single argument for a POSIX shell
pub fn sh_escape(arg: &str) -> String {
    let mut out = String::from("'");
    out.push_str(&arg.replace('\'', r"'\''"));
    out.push('\'');
    out
}

/// A remote program and its arguments
///
/// SSH exec only carries a command string, so every argument is quoted when the command is
/// rendered. Callers never build shell strings themselves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl RemoteCommand {
    pub fn new(program: impl Into<String>) -> Self {
        RemoteCommand { program: program.into(), args: Vec::new() }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn render(&self) -> String {
        std::iter::once(&self.program)
            .chain(self.args.iter())
            .map(|a| sh_escape(a))
            .collect::<Vec<String>>()
            .join(" ")
    }
}

impl fmt::Display for RemoteCommand {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.render())
    }
}

/// Captured result of a remote command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// stderr if present, otherwise stdout, for error messages
    pub fn diagnostic(&self) -> String {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            self.stdout.trim().to_string()
        } else {
            stderr.to_string()
        }
    }
}

/// One authenticated connection to the execution host
///
/// Every operation is bounded by the session's timeout.
#[async_trait]
pub trait RemoteSession: Send + Sync {
    async fn exec(&self, command: &RemoteCommand) -> Result<ExecOutput>;

    /// Create a directory and its parents; an existing directory is not an error
    async fn create_dir_all(&self, path: &str) -> Result<()>;

    async fn write_file(&self, path: &str, contents: &[u8]) -> Result<()>;

    /// Returns `None` when the file does not exist
    async fn read_file(&self, path: &str) -> Result<Option<Vec<u8>>>;

    /// Returns `None` when the file does not exist
    async fn file_size(&self, path: &str) -> Result<Option<u64>>;

    /// Replace `to` with `from`
    async fn rename(&self, from: &str, to: &str) -> Result<()>;

    /// Close the file transfer channel and the connection
    async fn close(&self);
}

/// Opens fresh sessions to the execution host
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn RemoteSession>>;
}
