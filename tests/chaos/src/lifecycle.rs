//! Container creation and destruction.
//!
//! [`ResourceLifecycleManager`] creates and destroys containers in a pool and
//! records every outcome in the pool's [`ContainerRegistry`]. Create errors
//! are classified by return code:
//!
//! - `DER_NOSPACE` becomes [`CreateError::NoSpace`], which the caller may
//!   retry or use to end a loop.
//! - Anything else becomes [`CreateError::Unexpected`] and must end the
//!   scenario.

use crate::error::ScenarioError;
use harness_client::ControlPlane;
use harness_core::{ContainerRegistry, RegistryError};
use harness_types::{ContainerLabel, ControlPlaneError};
use std::sync::Arc;
use thiserror::Error;

/// A failed container create.
#[derive(Debug, Error)]
pub enum CreateError {
    /// The pool's metadata store is full.
    #[error("no space: {0}")]
    NoSpace(#[source] ControlPlaneError),

    /// Any other control plane failure.
    #[error("unexpected create failure: {0}")]
    Unexpected(#[source] ControlPlaneError),

    /// Registry bookkeeping failed.
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl CreateError {
    /// Classify a control plane error by its return code.
    pub fn classify(err: ControlPlaneError) -> Self {
        if err.is_no_space() {
            Self::NoSpace(err)
        } else {
            Self::Unexpected(err)
        }
    }

    /// True for [`CreateError::NoSpace`].
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::NoSpace(_))
    }
}

impl From<CreateError> for ScenarioError {
    fn from(err: CreateError) -> Self {
        match err {
            CreateError::NoSpace(_) => ScenarioError::CapacityExhausted {
                operation: "container create".to_string(),
            },
            CreateError::Unexpected(source) => {
                ScenarioError::unexpected("container create", source)
            }
            CreateError::Registry(err) => ScenarioError::Registry(err),
        }
    }
}

/// Result of [`ResourceLifecycleManager::create_up_to`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateOutcome {
    /// Containers created by this call, in order.
    pub created: Vec<ContainerLabel>,
    /// Create attempts made.
    pub attempts: u64,
    /// True if the loop ended on a no-space error.
    pub hit_no_space: bool,
    /// True if `limit` containers were created without running out of space.
    pub reached_limit: bool,
    /// Whether the created count matched the expected count, when one was
    /// given.
    pub matches_expected: Option<bool>,
}

/// Result of a best-effort destroy pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestroyOutcome {
    /// Containers destroyed.
    pub destroyed: Vec<ContainerLabel>,
    /// Live containers left in the registry.
    pub remaining: Vec<ContainerLabel>,
    /// One message per failed destroy.
    pub errors: Vec<String>,
}

/// Creates and destroys containers.
pub struct ResourceLifecycleManager {
    control: Arc<dyn ControlPlane>,
}

impl ResourceLifecycleManager {
    /// Create a manager.
    pub fn new(control: Arc<dyn ControlPlane>) -> Self {
        Self { control }
    }

    /// Create one container under a fresh label.
    pub async fn create_one(
        &self,
        registry: &mut ContainerRegistry,
    ) -> Result<ContainerLabel, CreateError> {
        let label = registry.reserve();
        self.create_reserved(registry, label).await
    }

    /// Create a container under a label already in the `Requested` state.
    pub async fn create_reserved(
        &self,
        registry: &mut ContainerRegistry,
        label: ContainerLabel,
    ) -> Result<ContainerLabel, CreateError> {
        let pool = registry.pool().clone();
        match self.control.create_container(&pool, &label).await {
            Ok(()) => {
                registry.mark_created(&label)?;
                Ok(label)
            }
            Err(err) => {
                let err = CreateError::classify(err);
                registry.mark_failed(&label, err.is_recoverable())?;
                Err(err)
            }
        }
    }

    /// Create containers until `limit` were created or the first no-space
    /// error. Any other error is returned immediately.
    pub async fn create_up_to(
        &self,
        registry: &mut ContainerRegistry,
        limit: u64,
        expected: Option<u64>,
    ) -> Result<CreateOutcome, CreateError> {
        let mut created = Vec::new();
        let mut attempts = 0u64;
        let mut hit_no_space = false;

        while (created.len() as u64) < limit {
            attempts += 1;
            match self.create_one(registry).await {
                Ok(label) => created.push(label),
                Err(err) if err.is_recoverable() => {
                    tracing::info!(
                        pool = %registry.pool(),
                        created = created.len(),
                        "Container create ran out of space"
                    );
                    hit_no_space = true;
                    break;
                }
                Err(err) => {
                    tracing::error!(
                        pool = %registry.pool(),
                        attempt = attempts,
                        error = %err,
                        "Unexpected container create failure"
                    );
                    return Err(err);
                }
            }
        }

        let reached_limit = !hit_no_space;
        if reached_limit {
            tracing::warn!(
                pool = %registry.pool(),
                limit,
                "Created too many containers without running out of space; the limit may be too low"
            );
        }

        let matches_expected = expected.map(|n| n == created.len() as u64);
        if matches_expected == Some(false) {
            tracing::warn!(
                pool = %registry.pool(),
                created = created.len(),
                expected = ?expected,
                "Created container count differs from expected"
            );
        }

        Ok(CreateOutcome {
            created,
            attempts,
            hit_no_space,
            reached_limit,
            matches_expected,
        })
    }

    /// Destroy one container.
    pub async fn destroy_one(
        &self,
        registry: &mut ContainerRegistry,
        label: &ContainerLabel,
    ) -> Result<(), ScenarioError> {
        let pool = registry.pool().clone();
        self.control
            .destroy_container(&pool, label)
            .await
            .map_err(|e| ScenarioError::unexpected("container destroy", e))?;
        registry.mark_destroyed(label)?;
        Ok(())
    }

    /// Destroy the first `count` live containers. Failures are collected and
    /// do not stop the pass.
    pub async fn destroy_subset(
        &self,
        registry: &mut ContainerRegistry,
        count: usize,
    ) -> DestroyOutcome {
        let targets: Vec<ContainerLabel> = registry.live().take(count).cloned().collect();
        self.destroy_labels(registry, targets).await
    }

    /// Destroy every live container, best effort.
    pub async fn destroy_all(&self, registry: &mut ContainerRegistry) -> DestroyOutcome {
        let targets: Vec<ContainerLabel> = registry.live().cloned().collect();
        self.destroy_labels(registry, targets).await
    }

    async fn destroy_labels(
        &self,
        registry: &mut ContainerRegistry,
        targets: Vec<ContainerLabel>,
    ) -> DestroyOutcome {
        let mut destroyed = Vec::with_capacity(targets.len());
        let mut errors = Vec::new();

        for label in targets {
            match self.destroy_one(registry, &label).await {
                Ok(()) => destroyed.push(label),
                Err(err) => {
                    tracing::error!(
                        pool = %registry.pool(),
                        container = %label,
                        error = %err,
                        "Container destroy failed"
                    );
                    errors.push(format!("{}: {}", label, err));
                }
            }
        }

        DestroyOutcome {
            destroyed,
            remaining: registry.live().cloned().collect(),
            errors,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use harness_client::MockCluster;
    use harness_core::ContainerState;
    use harness_types::{PoolLabel, DER_INVAL, DER_NOSPACE};
    use std::collections::BTreeMap;

    async fn setup(cluster: MockCluster) -> (MockCluster, ResourceLifecycleManager, ContainerRegistry) {
        let pool = PoolLabel::new("life");
        cluster
            .create_pool(&pool, "1G", &BTreeMap::new())
            .await
            .unwrap();
        let manager = ResourceLifecycleManager::new(Arc::new(cluster.clone()));
        (cluster, manager, ContainerRegistry::new(pool, "cont"))
    }

    #[test]
    fn classification_uses_return_code() {
        let no_space = CreateError::classify(ControlPlaneError::status(
            "container create",
            DER_NOSPACE,
            "whatever the text says",
        ));
        assert!(no_space.is_recoverable());

        let other = CreateError::classify(ControlPlaneError::status(
            "container create",
            DER_INVAL,
            "No space on storage target",
        ));
        assert!(!other.is_recoverable());
        assert!(matches!(
            ScenarioError::from(other),
            ScenarioError::UnexpectedOperation { .. }
        ));
    }

    #[tokio::test]
    async fn create_up_to_stops_at_first_no_space() {
        let (cluster, manager, mut registry) =
            setup(MockCluster::new().with_container_quota(95)).await;
        let outcome = manager
            .create_up_to(&mut registry, 100, Some(95))
            .await
            .unwrap();
        assert_eq!(outcome.created.len(), 95);
        assert_eq!(outcome.attempts, 96);
        assert!(outcome.hit_no_space);
        assert!(!outcome.reached_limit);
        assert_eq!(outcome.matches_expected, Some(true));
        assert_eq!(cluster.create_attempts(), 96);
        assert_eq!(registry.count_in(ContainerState::FailedNoSpace), 1);
    }

    #[tokio::test]
    async fn create_up_to_reports_reaching_limit() {
        let (_cluster, manager, mut registry) = setup(MockCluster::new()).await;
        let outcome = manager
            .create_up_to(&mut registry, 10, Some(12))
            .await
            .unwrap();
        assert_eq!(outcome.created.len(), 10);
        assert!(outcome.reached_limit);
        assert_eq!(outcome.matches_expected, Some(false));
    }

    #[tokio::test]
    async fn unexpected_error_aborts_loop() {
        let (cluster, manager, mut registry) = setup(MockCluster::new()).await;
        cluster.fail_create_on_attempt(4, DER_INVAL);
        let err = manager
            .create_up_to(&mut registry, 10, None)
            .await
            .unwrap_err();
        assert!(!err.is_recoverable());
        assert_eq!(cluster.create_attempts(), 4);
        assert_eq!(registry.live_count(), 3);
        assert_eq!(registry.count_in(ContainerState::FailedUnexpected), 1);
    }

    #[tokio::test]
    async fn destroy_subset_keeps_tail() {
        let (cluster, manager, mut registry) =
            setup(MockCluster::new().with_container_quota(950)).await;
        manager
            .create_up_to(&mut registry, 1000, None)
            .await
            .unwrap();
        let created: Vec<ContainerLabel> = registry.live().cloned().collect();
        assert_eq!(created.len(), 950);

        let outcome = manager.destroy_subset(&mut registry, 400).await;
        assert!(outcome.errors.is_empty());
        assert_eq!(outcome.destroyed, created[..400].to_vec());
        assert_eq!(outcome.remaining, created[400..].to_vec());
        assert_eq!(cluster.containers(registry.pool()).len(), 550);
    }

    #[tokio::test]
    async fn destroy_errors_do_not_stop_the_pass() {
        let (cluster, manager, mut registry) = setup(MockCluster::new()).await;
        manager.create_up_to(&mut registry, 5, None).await.unwrap();
        let busy = registry.live().nth(1).unwrap().clone();
        cluster.fail_destroy(&busy);

        let outcome = manager.destroy_all(&mut registry).await;
        assert_eq!(outcome.destroyed.len(), 4);
        assert_eq!(outcome.remaining, vec![busy.clone()]);
        assert_eq!(outcome.errors.len(), 1);
        assert!(outcome.errors[0].starts_with(busy.as_str()));
    }

    #[tokio::test]
    async fn create_destroy_cycles_restore_space() {
        let (cluster, manager, mut registry) = setup(MockCluster::new()).await;
        let control: Arc<dyn ControlPlane> = Arc::new(cluster.clone());
        let pool = registry.pool().clone();
        let start = control.total_space(&pool).await.unwrap();

        for _ in 0..20 {
            let label = manager.create_one(&mut registry).await.unwrap();
            manager.destroy_one(&mut registry, &label).await.unwrap();
        }

        let end = control.total_space(&pool).await.unwrap();
        assert_eq!(start, end);
        assert_eq!(registry.len(), 20);
        assert_eq!(registry.count_in(ContainerState::Destroyed), 20);
    }
}
