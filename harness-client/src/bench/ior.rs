//! IOR command builder and `mpirun` launcher.

use super::{BenchError, BenchInvocation, BenchOutput, Benchmark};
use crate::exec;
use async_trait::async_trait;
use std::time::Instant;

/// IOR arguments for one invocation against a DFS container.
#[derive(Debug, Clone, Default)]
pub struct IorCommand {
    /// Raw flags, split on whitespace.
    pub flags: String,
    /// Pool label.
    pub pool: String,
    /// Container label.
    pub container: String,
    /// Object class for files (and directories).
    pub oclass: Option<String>,
    /// Transfer size.
    pub transfer_size: Option<String>,
    /// Block size.
    pub block_size: Option<String>,
    /// Test file path inside the container.
    pub test_file: String,
}

impl IorCommand {
    /// Command for a pool/container pair with the default test file.
    pub fn new(pool: &str, container: &str) -> Self {
        Self {
            pool: pool.into(),
            container: container.into(),
            test_file: "/testfile".into(),
            ..Default::default()
        }
    }

    /// Set the flags.
    pub fn flags(mut self, flags: &str) -> Self {
        self.flags = flags.into();
        self
    }

    /// Set the object class.
    pub fn oclass(mut self, oclass: &str) -> Self {
        self.oclass = Some(oclass.into());
        self
    }

    /// Set the transfer size.
    pub fn transfer_size(mut self, size: &str) -> Self {
        self.transfer_size = Some(size.into());
        self
    }

    /// Set the block size.
    pub fn block_size(mut self, size: &str) -> Self {
        self.block_size = Some(size.into());
        self
    }

    /// Build from an invocation.
    pub fn from_invocation(invocation: &BenchInvocation) -> Self {
        let mut cmd = Self::new(invocation.pool.as_str(), invocation.container.as_str())
            .flags(&invocation.flags);
        cmd.oclass = invocation.oclass.clone();
        cmd.transfer_size = invocation.transfer_size.clone();
        cmd.block_size = invocation.block_size.clone();
        cmd
    }

    /// Build the `ior` argument list.
    pub fn to_ior_args(&self) -> Vec<String> {
        let mut args = vec!["-a".to_string(), "DFS".to_string()];
        args.extend(self.flags.split_whitespace().map(String::from));

        if let Some(block) = &self.block_size {
            args.push("-b".into());
            args.push(block.clone());
        }
        if let Some(transfer) = &self.transfer_size {
            args.push("-t".into());
            args.push(transfer.clone());
        }

        args.push("--dfs.pool".into());
        args.push(self.pool.clone());
        args.push("--dfs.cont".into());
        args.push(self.container.clone());

        if let Some(oclass) = &self.oclass {
            args.push("--dfs.oclass".into());
            args.push(oclass.clone());
            args.push("--dfs.dir_oclass".into());
            args.push(oclass.clone());
        }

        args.push("-o".into());
        args.push(self.test_file.clone());
        args
    }

    /// Build the full command string (for logging/debugging).
    pub fn to_command(&self) -> String {
        format!("ior {}", self.to_ior_args().join(" "))
    }
}

/// Runs IOR under `mpirun`.
#[derive(Debug, Clone)]
pub struct IorBenchmark {
    /// `mpirun` executable.
    pub mpirun_path: String,
    /// `ior` executable.
    pub ior_path: String,
    /// Optional MPI hostfile listing the client hosts.
    pub hostfile: Option<String>,
}

impl IorBenchmark {
    /// Create a launcher.
    pub fn new(mpirun_path: &str, ior_path: &str, hostfile: Option<String>) -> Self {
        Self {
            mpirun_path: mpirun_path.into(),
            ior_path: ior_path.into(),
            hostfile,
        }
    }

    /// Full `mpirun` argument list for an invocation.
    pub fn to_mpirun_args(&self, invocation: &BenchInvocation) -> Vec<String> {
        let mut args = vec!["-np".to_string(), invocation.processes.max(1).to_string()];
        if let Some(hostfile) = &self.hostfile {
            args.push("--hostfile".into());
            args.push(hostfile.clone());
        }
        args.push(self.ior_path.clone());
        args.extend(IorCommand::from_invocation(invocation).to_ior_args());
        args
    }
}

#[async_trait]
impl Benchmark for IorBenchmark {
    async fn run(&self, invocation: &BenchInvocation) -> Result<BenchOutput, BenchError> {
        let start = Instant::now();
        let result = exec::run(&self.mpirun_path, &self.to_mpirun_args(invocation)).await?;
        if !result.success() {
            return Err(BenchError::Failed {
                mode: invocation.mode,
                container: invocation.container.clone(),
                exit_code: result.exit_code,
                detail: result.failure_detail(),
            });
        }
        Ok(BenchOutput {
            stdout: result.stdout,
            elapsed: start.elapsed(),
        })
    }
}
