use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};
use russh::client::{self, AuthResult, Config, Handle};
use russh::keys::ssh_key::{HashAlg, PrivateKey, PublicKey};
use russh::keys::PrivateKeyWithHashAlg;
use russh::{ChannelMsg, Disconnect};
use russh_sftp::client::error::Error as SftpError;
use russh_sftp::client::SftpSession;
use russh_sftp::protocol::StatusCode;
use tokio::io::AsyncWriteExt;
use tokio::sync::OnceCell;

use crate::config::Settings;
use crate::error::{Error, Result};
use crate::ssh::session::{Connector, ExecOutput, RemoteCommand, RemoteSession};

/// Run `fut`, failing with `Error::Timeout` once `limit` has passed
pub(crate) async fn with_timeout<T, F>(operation: &str, limit: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(Error::Timeout { operation: operation.to_string(), limit }),
    }
}

/// Accepts any host key unless a SHA256 fingerprint is pinned
#[derive(Clone, Debug)]
struct ClientHandler {
    expected_fingerprint: Option<String>,
}

impl client::Handler for ClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        let Some(expected) = &self.expected_fingerprint else {
            return Ok(true);
        };
        let actual = server_public_key.fingerprint(HashAlg::Sha256).to_string();
        if &actual == expected {
            Ok(true)
        } else {
            warn!("Host key fingerprint {actual} does not match pinned {expected}");
            Ok(false)
        }
    }
}

fn handshake_error(err: russh::Error) -> Error {
    match err {
        russh::Error::IO(e) => Error::Network(e.to_string()),
        russh::Error::Disconnect | russh::Error::HUP => Error::Network("connection closed by remote host".to_string()),
        russh::Error::UnknownKey => Error::Auth("host key rejected".to_string()),
        other => Error::Auth(other.to_string()),
    }
}

fn channel_error(err: russh::Error) -> Error {
    Error::Network(err.to_string())
}

fn is_not_found(err: &SftpError) -> bool {
    matches!(err, SftpError::Status(status) if matches!(status.status_code, StatusCode::NoSuchFile))
}

fn sftp_error(path: &str, err: SftpError) -> Error {
    match err {
        SftpError::Status(status) => Error::RemoteFs {
            path: path.to_string(),
            message: format!("{} ({:?})", status.error_message, status.status_code),
        },
        other => Error::Network(format!("sftp {path}: {other}")),
    }
}

/// Every ancestor of `path` followed by `path` itself
fn dir_prefixes(path: &str) -> Vec<String> {
    let absolute = path.starts_with('/');
    let mut current = String::new();
    let mut prefixes = Vec::new();
    for part in path.split('/').filter(|p| !p.is_empty()) {
        if absolute || !current.is_empty() {
            current.push('/');
        }
        current.push_str(part);
        prefixes.push(current.clone());
    }
    prefixes
}

/// Returns true when the channel is finished
fn handle_capture_message(
    msg: &ChannelMsg,
    out: &mut Vec<u8>,
    err: &mut Vec<u8>,
    code: &mut Option<i32>,
) -> bool {
    match msg {
        ChannelMsg::Data { data } => {
            out.extend_from_slice(data);
            false
        }
        ChannelMsg::ExtendedData { data, ext: 1 } => {
            err.extend_from_slice(data);
            false
        }
        ChannelMsg::ExitStatus { exit_status } => {
            *code = Some(*exit_status as i32);
            false
        }
        ChannelMsg::Close => true,
        _ => false,
    }
}

/// Opens one russh connection per call, authenticated with the configured key
pub struct SshConnector {
    host: String,
    port: u16,
    user: String,
    key: Arc<PrivateKey>,
    config: Arc<Config>,
    connect_timeout: Duration,
    command_timeout: Duration,
    expected_fingerprint: Option<String>,
}

impl SshConnector {
    pub fn new(settings: &Settings, key: PrivateKey) -> Self {
        let config = Config {
            inactivity_timeout: Some(settings.command_timeout * 4),
            ..Default::default()
        };
        SshConnector {
            host: settings.host.clone(),
            port: settings.ssh_port,
            user: settings.user.clone(),
            key: Arc::new(key),
            config: Arc::new(config),
            connect_timeout: settings.connect_timeout,
            command_timeout: settings.command_timeout,
            expected_fingerprint: settings.host_key_fingerprint.clone(),
        }
    }

    async fn handshake(&self) -> Result<Handle<ClientHandler>> {
        let handler = ClientHandler { expected_fingerprint: self.expected_fingerprint.clone() };
        let mut handle = client::connect(self.config.clone(), (self.host.as_str(), self.port), handler)
            .await
            .map_err(handshake_error)?;

        let hash = handle.best_supported_rsa_hash().await.map_err(handshake_error)?.flatten();
        let key = PrivateKeyWithHashAlg::new(self.key.clone(), hash);
        let result = handle
            .authenticate_publickey(self.user.clone(), key)
            .await
            .map_err(handshake_error)?;

        match result {
            AuthResult::Success => Ok(handle),
            AuthResult::Failure { remaining_methods, .. } => {
                debug!("Public key rejected, server offers {:?}", remaining_methods);
                Err(Error::Auth(format!("public key rejected for {}@{}", self.user, self.host)))
            }
        }
    }
}

#[async_trait]
impl Connector for SshConnector {
    async fn connect(&self) -> Result<Box<dyn RemoteSession>> {
        let handle = with_timeout("ssh connect", self.connect_timeout, self.handshake()).await?;
        info!("Opened session {}@{}:{}", self.user, self.host, self.port);
        Ok(Box::new(SshSession {
            handle,
            sftp: OnceCell::new(),
            timeout: self.command_timeout,
        }))
    }
}

/// A live connection; the SFTP subsystem is opened on first use
pub struct SshSession {
    handle: Handle<ClientHandler>,
    sftp: OnceCell<SftpSession>,
    timeout: Duration,
}

impl SshSession {
    async fn sftp(&self) -> Result<&SftpSession> {
        let open = self.sftp.get_or_try_init(|| async {
            let channel = self.handle.channel_open_session().await.map_err(channel_error)?;
            channel.request_subsystem(true, "sftp").await.map_err(channel_error)?;
            SftpSession::new(channel.into_stream())
                .await
                .map_err(|e| Error::Network(format!("sftp subsystem: {e}")))
        });
        with_timeout("sftp open", self.timeout, open).await
    }

    async fn ensure_dir(&self, sftp: &SftpSession, dir: &str) -> Result<()> {
        match sftp.metadata(dir).await {
            Ok(meta) if meta.is_dir() => Ok(()),
            Ok(_) => Err(Error::RemoteFs {
                path: dir.to_string(),
                message: "exists but is not a directory".to_string(),
            }),
            Err(e) if is_not_found(&e) => {
                debug!("creating remote directory {dir}");
                match sftp.create_dir(dir).await {
                    Ok(()) => Ok(()),
                    // lost a race with another creator
                    Err(e) => match sftp.metadata(dir).await {
                        Ok(meta) if meta.is_dir() => Ok(()),
                        _ => Err(sftp_error(dir, e)),
                    },
                }
            }
            Err(e) => Err(sftp_error(dir, e)),
        }
    }
}

#[async_trait]
impl RemoteSession for SshSession {
    async fn exec(&self, command: &RemoteCommand) -> Result<ExecOutput> {
        let line = command.render();
        debug!("executing {line}");
        let run = async {
            let mut chan = self.handle.channel_open_session().await.map_err(channel_error)?;
            chan.exec(true, line.as_str()).await.map_err(channel_error)?;

            let mut out = Vec::new();
            let mut err = Vec::new();
            let mut code = None;
            while let Some(msg) = chan.wait().await {
                if handle_capture_message(&msg, &mut out, &mut err, &mut code) {
                    break;
                }
            }
            if let Err(e) = chan.close().await {
                debug!("error closing exec channel: {e}");
            }

            Ok(ExecOutput {
                stdout: String::from_utf8_lossy(&out).into_owned(),
                stderr: String::from_utf8_lossy(&err).into_owned(),
                // no exit status means the remote process was killed by a signal
                exit_code: code.unwrap_or(-1),
            })
        };
        with_timeout(&command.program, self.timeout, run).await
    }

    async fn create_dir_all(&self, path: &str) -> Result<()> {
        let sftp = self.sftp().await?;
        let create = async {
            for dir in dir_prefixes(path) {
                self.ensure_dir(sftp, &dir).await?;
            }
            Ok(())
        };
        with_timeout("create directory", self.timeout, create).await
    }

    async fn write_file(&self, path: &str, contents: &[u8]) -> Result<()> {
        let sftp = self.sftp().await?;
        let write = async {
            let mut file = sftp.create(path).await.map_err(|e| sftp_error(path, e))?;
            let io_error = |e: std::io::Error| Error::RemoteFs { path: path.to_string(), message: e.to_string() };
            file.write_all(contents).await.map_err(io_error)?;
            file.flush().await.map_err(io_error)?;
            file.shutdown().await.map_err(io_error)?;
            Ok(())
        };
        with_timeout("write file", self.timeout, write).await
    }

    async fn read_file(&self, path: &str) -> Result<Option<Vec<u8>>> {
        let sftp = self.sftp().await?;
        let read = async {
            match sftp.read(path).await {
                Ok(bytes) => Ok(Some(bytes)),
                Err(e) if is_not_found(&e) => Ok(None),
                Err(e) => Err(sftp_error(path, e)),
            }
        };
        with_timeout("read file", self.timeout, read).await
    }

    async fn file_size(&self, path: &str) -> Result<Option<u64>> {
        let sftp = self.sftp().await?;
        let stat = async {
            match sftp.metadata(path).await {
                Ok(meta) => Ok(Some(meta.size.unwrap_or(0))),
                Err(e) if is_not_found(&e) => Ok(None),
                Err(e) => Err(sftp_error(path, e)),
            }
        };
        with_timeout("stat file", self.timeout, stat).await
    }

    async fn rename(&self, from: &str, to: &str) -> Result<()> {
        let sftp = self.sftp().await?;
        let rename = async { sftp.rename(from, to).await.map_err(|e| sftp_error(to, e)) };
        with_timeout("rename file", self.timeout, rename).await
    }

    async fn close(&self) {
        let shutdown = async {
            if let Some(sftp) = self.sftp.get() {
                if let Err(e) = sftp.close().await {
                    debug!("error closing sftp channel: {e}");
                }
            }
            if let Err(e) = self.handle.disconnect(Disconnect::ByApplication, "", "en").await {
                debug!("error disconnecting: {e}");
            }
            Ok(())
        };
        if with_timeout("disconnect", self.timeout, shutdown).await.is_err() {
            warn!("Timed out closing SSH session, dropping it");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use russh::CryptoVec;

    #[test]
    fn handle_capture_message_accumulates_output() {
        let mut out = Vec::new();
        let mut err = Vec::new();
        let mut code = None;

        let msg = ChannelMsg::Data { data: CryptoVec::from_slice(b"Submitted batch job 7\n") };
        assert!(!handle_capture_message(&msg, &mut out, &mut err, &mut code));
        assert_eq!(out, b"Submitted batch job 7\n");

        let msg = ChannelMsg::ExtendedData { data: CryptoVec::from_slice(b"warn"), ext: 1 };
        assert!(!handle_capture_message(&msg, &mut out, &mut err, &mut code));
        assert_eq!(err, b"warn");

        let msg = ChannelMsg::ExitStatus { exit_status: 3 };
        assert!(!handle_capture_message(&msg, &mut out, &mut err, &mut code));
        assert_eq!(code, Some(3));

        assert!(handle_capture_message(&ChannelMsg::Close, &mut out, &mut err, &mut code));
    }

    #[test]
    fn dir_prefixes_walk_down_from_root() {
        assert_eq!(
            dir_prefixes("/scratch/alice/jobs/"),
            vec!["/scratch", "/scratch/alice", "/scratch/alice/jobs"]
        );
        assert_eq!(dir_prefixes("jobs/a"), vec!["jobs", "jobs/a"]);
    }

    #[tokio::test]
    async fn with_timeout_reports_operation() {
        let slow = async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        };
        let err = with_timeout("squeue", Duration::from_millis(10), slow).await.unwrap_err();
        assert!(matches!(err, Error::Timeout { ref operation, .. } if operation == "squeue"));
        assert_eq!(err.to_string(), "squeue timed out after 10ms");
    }
}
