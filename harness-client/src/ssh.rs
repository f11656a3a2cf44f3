//! Remote commands on client hosts.
//!
//! Runs the system `ssh` binary. Key-based login must already work:
//! `BatchMode=yes` turns a password prompt into an immediate failure.

use crate::exec::{self, ExecResult};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure running a remote command.
#[derive(Debug, Error)]
pub enum SshError {
    /// `ssh` could not be spawned.
    #[error("failed to spawn ssh: {0}")]
    Spawn(#[from] std::io::Error),

    /// The remote command exited non-zero.
    #[error("{host}: remote command exited {exit_code}: {stderr}")]
    CommandFailed {
        /// Host the command ran on.
        host: String,
        /// Remote exit status.
        exit_code: i32,
        /// Trimmed stderr.
        stderr: String,
    },
}

/// A host reachable over SSH.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SshTarget {
    /// Host name or address.
    pub host: String,
    /// SSH username; the local user when `None`.
    #[serde(default)]
    pub user: Option<String>,
}

impl SshTarget {
    /// Target `host` as the local user.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            user: None,
        }
    }

    /// Set the SSH username.
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// `user@host` or `host`.
    pub fn destination(&self) -> String {
        match &self.user {
            Some(user) => format!("{}@{}", user, self.host),
            None => self.host.clone(),
        }
    }

    /// Arguments passed to `ssh` for `cmd`.
    pub fn to_ssh_args(&self, cmd: &str) -> Vec<String> {
        vec![
            "-o".into(),
            "StrictHostKeyChecking=no".into(),
            "-o".into(),
            "ConnectTimeout=30".into(),
            "-o".into(),
            "BatchMode=yes".into(),
            self.destination(),
            cmd.into(),
        ]
    }

    /// Run `cmd` on the host. A non-zero exit is returned, not raised.
    pub async fn exec(&self, cmd: &str) -> Result<ExecResult, SshError> {
        let args = self.to_ssh_args(cmd);
        Ok(exec::run("ssh", &args).await?)
    }

    /// Run `cmd` on the host and fail unless it exits zero.
    pub async fn exec_ok(&self, cmd: &str) -> Result<ExecResult, SshError> {
        let result = self.exec(cmd).await?;
        if result.success() {
            Ok(result)
        } else {
            Err(SshError::CommandFailed {
                host: self.host.clone(),
                exit_code: result.exit_code,
                stderr: result.stderr.trim().to_string(),
            })
        }
    }
}
