//! Local process execution.

use tokio::process::Command;

/// Result of running a command.
#[derive(Debug, Clone)]
pub struct ExecResult {
    /// Standard output.
    pub stdout: String,
    /// Standard error.
    pub stderr: String,
    /// Exit code (0 = success, -1 if killed by a signal).
    pub exit_code: i32,
}

impl ExecResult {
    /// Returns true if the command succeeded (exit code 0).
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Best available failure description: stderr, else stdout, else the
    /// exit code.
    pub fn failure_detail(&self) -> String {
        let stderr = self.stderr.trim();
        if !stderr.is_empty() {
            return stderr.to_string();
        }
        let stdout = self.stdout.trim();
        if !stdout.is_empty() {
            return stdout.to_string();
        }
        format!("exit code {}", self.exit_code)
    }
}

/// Run `program` with `args` and capture its output.
///
/// Does NOT fail on non-zero exit; inspect [`ExecResult::success`].
pub async fn run<S: AsRef<str>>(program: &str, args: &[S]) -> std::io::Result<ExecResult> {
    tracing::debug!(
        "exec: {} {}",
        program,
        args.iter().map(|a| a.as_ref()).collect::<Vec<_>>().join(" ")
    );
    let output = Command::new(program)
        .args(args.iter().map(|a| a.as_ref()))
        .output()
        .await?;

    Ok(ExecResult {
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        exit_code: output.status.code().unwrap_or(-1),
    })
}
