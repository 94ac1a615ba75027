//! Shoot status persistence: flow progress, task errors, conditions and the
//! last operation.
//!
//! Every write is a read-modify-write of the latest shoot, retried on
//! optimistic-concurrency conflicts.

use super::Operation;
use crate::constants::{DEFAULT_STATUS_UPDATE_ATTEMPTS, FIELD_MANAGER};
use crate::controller::condition::{determine_error_codes, merge_conditions};
use crate::controller::flow::{ErrorCleaner, ProgressReporter, Stats, TaskFailure, TaskId};
use crate::crd::{Condition, LastError, LastOperation, LastOperationState, LastOperationType, Shoot, ShootStatus};
use crate::error::{Error, Result};
use async_trait::async_trait;
use kube::api::{Api, Patch, PatchParams};
use kube::Client;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, warn};

/// Reads shoots and writes their status
#[async_trait]
pub trait ShootStatusClient: Send + Sync {
    async fn get(&self, namespace: &str, name: &str) -> Result<Shoot>;

    /// Persist `shoot.status`; fails with a conflict when `shoot` is not the latest version
    async fn update_status(&self, shoot: &Shoot) -> Result<Shoot>;
}

#[derive(Clone)]
pub struct KubeShootStatusClient {
    client: Client,
}

impl KubeShootStatusClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ShootStatusClient for KubeShootStatusClient {
    async fn get(&self, namespace: &str, name: &str) -> Result<Shoot> {
        Api::<Shoot>::namespaced(self.client.clone(), namespace)
            .get(name)
            .await
            .map_err(|e| Error::kube("Shoot", namespace, name, e))
    }

    async fn update_status(&self, shoot: &Shoot) -> Result<Shoot> {
        let namespace = shoot.namespace();
        let name = shoot.name();
        let status = shoot.status.clone().unwrap_or_default();
        // Lists are written in full so that removed entries disappear
        let patch = json!({
            "metadata": { "resourceVersion": shoot.metadata.resource_version },
            "status": {
                "lastOperation": status.last_operation,
                "lastErrors": status.last_errors,
                "conditions": status.conditions,
            }
        });
        Api::<Shoot>::namespaced(self.client.clone(), namespace)
            .patch_status(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await
            .map_err(|e| Error::kube("Shoot", namespace, name, e))
    }
}

/// Apply `mutate` to the latest shoot and persist its status
///
/// Conflicts are retried up to `attempts` times; an error from `mutate` aborts
/// without writing.
pub async fn try_update_shoot_status<F>(
    client: &dyn ShootStatusClient,
    namespace: &str,
    name: &str,
    attempts: u32,
    mut mutate: F,
) -> Result<Shoot>
where
    F: FnMut(&mut Shoot) -> Result<()> + Send,
{
    let attempts = attempts.max(1);
    for attempt in 1..=attempts {
        let mut shoot = client.get(namespace, name).await?;
        mutate(&mut shoot)?;
        match client.update_status(&shoot).await {
            Ok(updated) => return Ok(updated),
            Err(e) if e.is_conflict() => {
                debug!(namespace, name, attempt, "Conflict updating shoot status, retrying");
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            Err(e) => return Err(e),
        }
    }
    Err(Error::Conflict {
        kind: "Shoot",
        namespace: namespace.to_string(),
        name: name.to_string(),
        attempts,
    })
}

/// `Execution finished` at 100 %, otherwise the running task names
pub fn make_description(stats: &Stats) -> String {
    stats.description()
}

fn status_mut(shoot: &mut Shoot) -> &mut ShootStatus {
    shoot.status.get_or_insert_with(ShootStatus::default)
}

impl Operation {
    async fn update_shoot_status<F>(&self, mutate: F) -> Result<()>
    where
        F: FnMut(&mut Shoot) -> Result<()> + Send,
    {
        let current = self.shoot();
        let updated = try_update_shoot_status(
            self.status_client.as_ref(),
            current.namespace(),
            current.name(),
            DEFAULT_STATUS_UPDATE_ATTEMPTS,
            mutate,
        )
        .await?;
        self.set_shoot(updated);
        Ok(())
    }

    /// Persist the flow's description and progress on the last operation
    ///
    /// Fails when the shoot has no last operation or another writer advanced it
    /// past this write's timestamp.
    pub async fn report_shoot_progress(&self, stats: &Stats) -> Result<()> {
        let description = make_description(stats);
        let progress = stats.progress_percent();
        let last_update_time = self.clock().now();

        self.update_shoot_status(|shoot| {
            let namespace = shoot.namespace().to_string();
            let name = shoot.name().to_string();
            let last_operation = status_mut(shoot)
                .last_operation
                .as_mut()
                .ok_or(Error::LastOperationUnset {
                    namespace: namespace.clone(),
                    name: name.clone(),
                })?;
            if last_operation.last_update_time > last_update_time {
                return Err(Error::MidAirUpdate { namespace, name });
            }
            last_operation.description = description.clone();
            last_operation.progress = progress;
            last_operation.last_update_time = last_update_time;
            Ok(())
        })
        .await
    }

    /// Remove the last error recorded for `task`
    pub async fn clean_shoot_task_error(&self, task: &str) -> Result<()> {
        if !self
            .shoot()
            .last_errors()
            .iter()
            .any(|e| e.task_id.as_deref() == Some(task))
        {
            return Ok(());
        }
        self.update_shoot_status(|shoot| {
            status_mut(shoot)
                .last_errors
                .retain(|e| e.task_id.as_deref() != Some(task));
            Ok(())
        })
        .await
    }

    /// Record failed tasks as last errors, replacing older errors of the same tasks
    pub async fn record_task_errors(&self, failures: &[TaskFailure]) -> Result<()> {
        let now = self.clock().now();
        let errors: Vec<LastError> = failures
            .iter()
            .map(|failure| LastError {
                description: failure.message.clone(),
                task_id: Some(failure.task.as_str().to_string()),
                codes: determine_error_codes(&failure.message),
                last_update_time: Some(now),
            })
            .collect();
        self.update_shoot_status(|shoot| {
            let status = status_mut(shoot);
            status
                .last_errors
                .retain(|existing| !errors.iter().any(|e| e.task_id == existing.task_id));
            status.last_errors.extend(errors.iter().cloned());
            Ok(())
        })
        .await
    }

    /// Merge `conditions` into the shoot's conditions by type
    pub async fn update_shoot_conditions(&self, conditions: &[Condition]) -> Result<()> {
        self.update_shoot_status(|shoot| {
            let status = status_mut(shoot);
            status.conditions = merge_conditions(&status.conditions, conditions.iter().cloned());
            Ok(())
        })
        .await
    }

    /// Mark the start of a reconciliation
    ///
    /// The operation is a `Create` until the shoot has been reconciled successfully once.
    pub async fn start_last_operation(&self) -> Result<()> {
        let now = self.clock().now();
        self.update_shoot_status(|shoot| {
            let status = status_mut(shoot);
            let r#type = match &status.last_operation {
                None => LastOperationType::Create,
                Some(op) if op.r#type == LastOperationType::Create && op.state != LastOperationState::Succeeded => {
                    LastOperationType::Create
                }
                Some(_) => LastOperationType::Reconcile,
            };
            let mut last_operation = LastOperation::new(r#type, LastOperationState::Processing, now);
            last_operation.description = format!("{:?} of Shoot cluster in progress.", r#type);
            status.last_operation = Some(last_operation);
            Ok(())
        })
        .await
    }

    /// Mark the end of a reconciliation
    pub async fn finish_last_operation(&self, state: LastOperationState, description: impl Into<String>) -> Result<()> {
        let now = self.clock().now();
        let description = description.into();
        self.update_shoot_status(|shoot| {
            let namespace = shoot.namespace().to_string();
            let name = shoot.name().to_string();
            let status = status_mut(shoot);
            let last_operation = status
                .last_operation
                .as_mut()
                .ok_or(Error::LastOperationUnset { namespace, name })?;
            last_operation.state = state;
            last_operation.description = description.clone();
            last_operation.last_update_time = now;
            if state == LastOperationState::Succeeded {
                last_operation.progress = 100;
                status.last_errors.clear();
            }
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl ProgressReporter for Operation {
    async fn report(&self, stats: &Stats) -> Result<()> {
        self.report_shoot_progress(stats).await
    }
}

#[async_trait]
impl ErrorCleaner for Operation {
    async fn clean(&self, task: &TaskId) -> Result<()> {
        if let Err(e) = self.clean_shoot_task_error(task.as_str()).await {
            warn!(task = %task, error = %e, "Could not clean shoot task error");
            return Err(e);
        }
        Ok(())
    }
}
