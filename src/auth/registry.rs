//! 权限注册表
//!
//! In-process view of the permission catalog. Reads go through a lock-free
//! set; `register` serialises writers so two reconciliations of the same
//! subsystem cannot race on the diff.

use dashmap::DashSet;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::info;

use super::permission::{Permission, Permissions};
use crate::models::permission::RegisterOutcome;
use crate::repository::{PermissionRepository, StorageError};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("empty permission set")]
    EmptySet,

    #[error("empty subsystem")]
    EmptySubsystem,

    #[error("permissions span more than one subsystem")]
    MixedSubsystems,

    #[error(transparent)]
    Storage(#[from] StorageError),
}

pub struct PermissionRegistry {
    repository: Arc<dyn PermissionRepository>,
    known: DashSet<Permission>,
    lock: Mutex<()>,
}

impl PermissionRegistry {
    pub fn new(repository: Arc<dyn PermissionRepository>) -> Self {
        Self {
            repository,
            known: DashSet::new(),
            lock: Mutex::new(()),
        }
    }

    /// Reconciles the persisted partition of the declared set's subsystem
    /// with the declared set.
    pub async fn register(&self, declared: &Permissions) -> Result<RegisterOutcome, RegistryError> {
        let subsystem = declared
            .iter()
            .next()
            .map(|p| p.subsystem().to_string())
            .ok_or(RegistryError::EmptySet)?;

        if subsystem.is_empty() {
            return Err(RegistryError::EmptySubsystem);
        }
        if declared.iter().any(|p| p.subsystem() != subsystem) {
            return Err(RegistryError::MixedSubsystems);
        }

        let _guard = self.lock.lock().await;

        let outcome = self.repository.register(&subsystem, declared).await?;

        self.known.retain(|p| p.subsystem() != subsystem);
        for permission in declared.iter() {
            self.known.insert(permission.clone());
        }

        info!(
            subsystem = %subsystem,
            created = outcome.created,
            untouched = outcome.untouched,
            removed = outcome.removed,
            "Permissions registered"
        );

        Ok(outcome)
    }

    /// Whether the permission was declared by a registration made through
    /// this registry.
    pub fn exists(&self, permission: &Permission) -> bool {
        self.known.contains(permission)
    }
}
