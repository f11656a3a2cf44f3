//! Control plane backed by the `dmg` and `daos` command-line tools.
//!
//! Both tools are run with `-j` and print a JSON envelope:
//!
//! ```json
//! {"response": {...}, "error": null, "status": 0}
//! ```
//!
//! A non-zero `status` becomes [`ControlPlaneError::Status`] carrying that
//! code. Client agents are stopped and started over SSH.

use super::ControlPlane;
use crate::exec::{self, ExecResult};
use crate::ssh::SshTarget;
use async_trait::async_trait;
use harness_types::{
    ContainerLabel, ControlPlaneError, OperationResult, PoolHandle, PoolLabel, PoolStatus, Rank,
    RebuildStatus,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Paths and hosts used by [`DmgControlPlane`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DmgConfig {
    /// `dmg` executable.
    pub dmg_path: String,
    /// `daos` executable.
    pub daos_path: String,
    /// Optional `dmg` configuration file (`-o`).
    pub dmg_config: Option<String>,
    /// Hosts running client agents.
    pub client_hosts: Vec<SshTarget>,
    /// Command run on each client host to stop its agent.
    pub agent_stop_cmd: String,
    /// Command run on each client host to start its agent.
    pub agent_start_cmd: String,
}

impl Default for DmgConfig {
    fn default() -> Self {
        Self {
            dmg_path: "dmg".into(),
            daos_path: "daos".into(),
            dmg_config: None,
            client_hosts: Vec::new(),
            agent_stop_cmd: "sudo systemctl stop daos_agent".into(),
            agent_start_cmd: "sudo systemctl start daos_agent".into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    response: Value,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    status: i32,
}

#[derive(Debug, Deserialize)]
struct PoolQueryResponse {
    version: u64,
    #[serde(default)]
    tier_stats: Vec<TierStats>,
    rebuild: RebuildStatus,
}

#[derive(Debug, Deserialize)]
struct TierStats {
    total: u64,
    free: u64,
}

#[derive(Debug, Deserialize)]
struct PoolCreateResponse {
    #[serde(default)]
    svc_reps: Vec<u32>,
}

#[derive(Debug, Deserialize)]
struct PropertyEntry {
    name: String,
    value: Value,
}

#[derive(Debug, Default, Deserialize)]
struct SystemResponse {
    #[serde(default)]
    results: Vec<RankResult>,
}

#[derive(Debug, Deserialize)]
struct RankResult {
    #[serde(default)]
    rank: u32,
    #[serde(default)]
    errored: bool,
    #[serde(default)]
    msg: String,
}

/// Unwrap a `-j` envelope, turning failures into typed errors.
fn parse_envelope(operation: &str, result: &ExecResult) -> Result<Value, ControlPlaneError> {
    match serde_json::from_str::<Envelope>(result.stdout.trim()) {
        Ok(envelope) if envelope.status != 0 => Err(ControlPlaneError::status(
            operation,
            envelope.status,
            envelope.error.unwrap_or_default(),
        )),
        Ok(envelope) if !result.success() => Err(ControlPlaneError::command(
            operation,
            envelope.error.unwrap_or_else(|| result.failure_detail()),
        )),
        Ok(envelope) => Ok(envelope.response),
        Err(_) if !result.success() => Err(ControlPlaneError::command(
            operation,
            result.failure_detail(),
        )),
        Err(e) => Err(ControlPlaneError::Parse {
            operation: operation.to_string(),
            message: e.to_string(),
        }),
    }
}

/// Build an [`OperationResult`] without failing on a non-zero status; the
/// caller inspects it.
fn operation_result(operation: &str, result: &ExecResult) -> OperationResult {
    match serde_json::from_str::<Envelope>(result.stdout.trim()) {
        Ok(envelope) => OperationResult {
            operation: operation.to_string(),
            status: if envelope.status == 0 && !result.success() {
                result.exit_code
            } else {
                envelope.status
            },
            error: envelope.error,
            output: result.stdout.clone(),
        },
        Err(_) => OperationResult {
            operation: operation.to_string(),
            status: result.exit_code,
            error: (!result.success()).then(|| result.failure_detail()),
            output: result.stdout.clone(),
        },
    }
}

fn parse_pool_status(operation: &str, response: Value) -> Result<PoolStatus, ControlPlaneError> {
    let query: PoolQueryResponse =
        serde_json::from_value(response).map_err(|e| ControlPlaneError::Parse {
            operation: operation.to_string(),
            message: e.to_string(),
        })?;
    Ok(PoolStatus {
        version: query.version,
        total_space: query.tier_stats.iter().map(|t| t.total).sum(),
        free_space: query.tier_stats.iter().map(|t| t.free).sum(),
        rebuild: query.rebuild,
    })
}

fn parse_pool_create(response: Value) -> Result<PoolCreateResponse, ControlPlaneError> {
    serde_json::from_value(response).map_err(|e| ControlPlaneError::Parse {
        operation: "pool create".to_string(),
        message: e.to_string(),
    })
}

fn parse_property(
    operation: &str,
    name: &str,
    response: Value,
) -> Result<String, ControlPlaneError> {
    let entries: Vec<PropertyEntry> =
        serde_json::from_value(response).map_err(|e| ControlPlaneError::Parse {
            operation: operation.to_string(),
            message: e.to_string(),
        })?;
    let entry = entries
        .into_iter()
        .find(|p| p.name == name)
        .ok_or_else(|| ControlPlaneError::Parse {
            operation: operation.to_string(),
            message: format!("property {} missing from output", name),
        })?;
    Ok(match entry.value {
        Value::String(s) => s,
        other => other.to_string(),
    })
}

fn rank_errors(operation: &str, response: Value) -> Result<Vec<String>, ControlPlaneError> {
    let system: SystemResponse = match response {
        Value::Null => SystemResponse::default(),
        other => serde_json::from_value(other).map_err(|e| ControlPlaneError::Parse {
            operation: operation.to_string(),
            message: e.to_string(),
        })?,
    };
    Ok(system
        .results
        .into_iter()
        .filter(|r| r.errored)
        .map(|r| format!("rank {}: {}", r.rank, r.msg))
        .collect())
}

fn join_targets(targets: &[u32]) -> String {
    targets
        .iter()
        .map(|t| t.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

/// [`ControlPlane`] that shells out to `dmg` and `daos`.
#[derive(Debug, Clone)]
pub struct DmgControlPlane {
    config: DmgConfig,
}

impl DmgControlPlane {
    /// Create a control plane from its configuration.
    pub fn new(config: DmgConfig) -> Self {
        Self { config }
    }

    /// Full `dmg` argument list for `args`.
    pub fn dmg_args(&self, args: &[String]) -> Vec<String> {
        let mut full = vec!["-j".to_string()];
        if let Some(path) = &self.config.dmg_config {
            full.push("-o".into());
            full.push(path.clone());
        }
        full.extend(args.iter().cloned());
        full
    }

    /// Full `daos` argument list for `args`.
    pub fn daos_args(&self, args: &[String]) -> Vec<String> {
        let mut full = vec!["-j".to_string()];
        full.extend(args.iter().cloned());
        full
    }

    async fn dmg(&self, args: Vec<String>) -> Result<ExecResult, ControlPlaneError> {
        Ok(exec::run(&self.config.dmg_path, &self.dmg_args(&args)).await?)
    }

    async fn daos(&self, args: Vec<String>) -> Result<ExecResult, ControlPlaneError> {
        Ok(exec::run(&self.config.daos_path, &self.daos_args(&args)).await?)
    }

    async fn dmg_response(
        &self,
        operation: &str,
        args: Vec<String>,
    ) -> Result<Value, ControlPlaneError> {
        let result = self.dmg(args).await?;
        parse_envelope(operation, &result)
    }

    async fn daos_response(
        &self,
        operation: &str,
        args: Vec<String>,
    ) -> Result<Value, ControlPlaneError> {
        let result = self.daos(args).await?;
        parse_envelope(operation, &result)
    }

    async fn on_clients(&self, cmd: &str) -> Vec<String> {
        let mut errors = Vec::new();
        for host in &self.config.client_hosts {
            if let Err(e) = host.exec_ok(cmd).await {
                errors.push(format!("{}: {}", host.host, e));
            }
        }
        errors
    }

    fn membership_args(
        verb: &str,
        pool: &PoolLabel,
        rank: Rank,
        targets: Option<&[u32]>,
    ) -> Vec<String> {
        let mut args = vec![
            "pool".to_string(),
            verb.into(),
            pool.to_string(),
            format!("--rank={}", rank),
        ];
        if let Some(targets) = targets {
            args.push(format!("--target-idx={}", join_targets(targets)));
        }
        args
    }

    fn container_args(verb: &str, pool: &PoolLabel, label: &ContainerLabel) -> Vec<String> {
        vec![
            "container".into(),
            verb.into(),
            pool.to_string(),
            label.to_string(),
        ]
    }
}

#[async_trait]
impl ControlPlane for DmgControlPlane {
    async fn create_pool(
        &self,
        label: &PoolLabel,
        size: &str,
        properties: &BTreeMap<String, String>,
    ) -> Result<PoolHandle, ControlPlaneError> {
        let mut args = vec![
            "pool".to_string(),
            "create".into(),
            label.to_string(),
            format!("--size={}", size),
        ];
        if !properties.is_empty() {
            let props = properties
                .iter()
                .map(|(k, v)| format!("{}:{}", k, v))
                .collect::<Vec<_>>()
                .join(",");
            args.push(format!("--properties={}", props));
        }
        let response = self.dmg_response("pool create", args).await?;
        let created = parse_pool_create(response)?;
        Ok(PoolHandle {
            label: label.clone(),
            svc_ranks: created.svc_reps.into_iter().map(Rank::new).collect(),
            properties: properties.clone(),
        })
    }

    async fn destroy_pool(&self, pool: &PoolLabel) -> Result<(), ControlPlaneError> {
        let args = vec![
            "pool".to_string(),
            "destroy".into(),
            pool.to_string(),
            "--force".into(),
        ];
        self.dmg_response("pool destroy", args).await?;
        Ok(())
    }

    async fn query_pool(&self, pool: &PoolLabel) -> Result<PoolStatus, ControlPlaneError> {
        let args = vec!["pool".to_string(), "query".into(), pool.to_string()];
        let response = self.dmg_response("pool query", args).await?;
        parse_pool_status("pool query", response)
    }

    async fn set_property(
        &self,
        pool: &PoolLabel,
        name: &str,
        value: &str,
    ) -> Result<(), ControlPlaneError> {
        let args = vec![
            "pool".to_string(),
            "set-prop".into(),
            pool.to_string(),
            format!("{}:{}", name, value),
        ];
        self.dmg_response("pool set-prop", args).await?;
        Ok(())
    }

    async fn get_property(
        &self,
        pool: &PoolLabel,
        name: &str,
    ) -> Result<String, ControlPlaneError> {
        let args = vec![
            "pool".to_string(),
            "get-prop".into(),
            pool.to_string(),
            name.to_string(),
        ];
        let response = self.dmg_response("pool get-prop", args).await?;
        parse_property("pool get-prop", name, response)
    }

    async fn stop_ranks(&self, ranks: &[Rank], force: bool) -> Result<(), ControlPlaneError> {
        let mut args = vec![
            "system".to_string(),
            "stop".into(),
            format!("--ranks={}", Rank::join(ranks)),
        ];
        if force {
            args.push("--force".into());
        }
        let response = self.dmg_response("system stop", args).await?;
        let errors = rank_errors("system stop", response)?;
        if !errors.is_empty() {
            return Err(ControlPlaneError::command("system stop", errors.join("; ")));
        }
        Ok(())
    }

    async fn exclude(
        &self,
        pool: &PoolLabel,
        ranks: &[Rank],
    ) -> Result<OperationResult, ControlPlaneError> {
        let args = vec![
            "pool".to_string(),
            "exclude".into(),
            pool.to_string(),
            format!("--rank={}", Rank::join(ranks)),
        ];
        let result = self.dmg(args).await?;
        Ok(operation_result("pool exclude", &result))
    }

    async fn drain(
        &self,
        pool: &PoolLabel,
        rank: Rank,
        targets: Option<&[u32]>,
    ) -> Result<OperationResult, ControlPlaneError> {
        let result = self
            .dmg(Self::membership_args("drain", pool, rank, targets))
            .await?;
        Ok(operation_result("pool drain", &result))
    }

    async fn reintegrate(
        &self,
        pool: &PoolLabel,
        rank: Rank,
        targets: Option<&[u32]>,
    ) -> Result<OperationResult, ControlPlaneError> {
        let result = self
            .dmg(Self::membership_args("reintegrate", pool, rank, targets))
            .await?;
        Ok(operation_result("pool reintegrate", &result))
    }

    async fn create_container(
        &self,
        pool: &PoolLabel,
        label: &ContainerLabel,
    ) -> Result<(), ControlPlaneError> {
        self.daos_response("container create", Self::container_args("create", pool, label))
            .await?;
        Ok(())
    }

    async fn destroy_container(
        &self,
        pool: &PoolLabel,
        label: &ContainerLabel,
    ) -> Result<(), ControlPlaneError> {
        self.daos_response(
            "container destroy",
            Self::container_args("destroy", pool, label),
        )
        .await?;
        Ok(())
    }

    async fn cycle_container_handle(
        &self,
        pool: &PoolLabel,
        label: &ContainerLabel,
    ) -> Result<(), ControlPlaneError> {
        // `daos container query` opens a handle, queries, and closes it.
        self.daos_response(
            "container open/close",
            Self::container_args("query", pool, label),
        )
        .await?;
        Ok(())
    }

    async fn create_snapshot(
        &self,
        pool: &PoolLabel,
        label: &ContainerLabel,
    ) -> Result<u64, ControlPlaneError> {
        let response = self
            .daos_response(
                "container create-snap",
                Self::container_args("create-snap", pool, label),
            )
            .await?;
        response
            .get("epoch")
            .and_then(Value::as_u64)
            .ok_or_else(|| ControlPlaneError::Parse {
                operation: "container create-snap".into(),
                message: "missing epoch".into(),
            })
    }

    async fn check_container(
        &self,
        pool: &PoolLabel,
        label: &ContainerLabel,
    ) -> Result<(), ControlPlaneError> {
        self.daos_response("container check", Self::container_args("check", pool, label))
            .await?;
        Ok(())
    }

    async fn stop_agents(&self) -> Result<Vec<String>, ControlPlaneError> {
        Ok(self.on_clients(&self.config.agent_stop_cmd).await)
    }

    async fn restart_servers(&self) -> Result<Vec<String>, ControlPlaneError> {
        let mut errors = Vec::new();
        for verb in ["stop", "start"] {
            let args = vec!["system".to_string(), verb.into()];
            let result = self.dmg(args).await?;
            let operation = format!("system {}", verb);
            match parse_envelope(&operation, &result)
                .and_then(|response| rank_errors(&operation, response))
            {
                Ok(failed) => errors.extend(failed),
                Err(e) => errors.push(e.to_string()),
            }
            if !errors.is_empty() {
                break;
            }
        }
        Ok(errors)
    }

    async fn start_agents(&self) -> Result<Vec<String>, ControlPlaneError> {
        Ok(self.on_clients(&self.config.agent_start_cmd).await)
    }
}
