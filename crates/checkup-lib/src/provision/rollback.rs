//! Compensating actions for a partially provisioned workspace

use crate::disposal::delete_and_wait_all;
use crate::store::{ObjectKey, ResourceKind, ResourceStore};
use crate::wait::{PollSettings, Shutdown};
use tracing::{info, warn};

/// Undo entry for one created object
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Compensation {
    /// Deleting the namespace reclaims everything inside it
    Namespace(String),
    ClusterRoleBinding(String),
}

impl Compensation {
    fn target(&self) -> (ResourceKind, ObjectKey) {
        match self {
            Compensation::Namespace(name) => {
                (ResourceKind::Namespace, ObjectKey::cluster(name.as_str()))
            }
            Compensation::ClusterRoleBinding(name) => {
                (ResourceKind::ClusterRoleBinding, ObjectKey::cluster(name.as_str()))
            }
        }
    }
}

/// Stack of compensations, unwound newest first
#[derive(Debug, Default)]
pub struct Rollback {
    entries: Vec<Compensation>,
}

impl Rollback {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, compensation: Compensation) {
        self.entries.push(compensation);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Run every compensation in reverse order, collecting every failure
    ///
    /// Deletions are waited on until disposed. Unwinding is never cancelled:
    /// a half-built workspace is not left behind on shutdown.
    pub async fn unwind<S>(self, store: &S, settings: PollSettings) -> Result<(), Vec<String>>
    where
        S: ResourceStore + ?Sized,
    {
        info!(steps = self.entries.len(), "rolling back partially provisioned workspace");
        let shutdown = Shutdown::never();
        let mut errors = Vec::new();

        for compensation in self.entries.into_iter().rev() {
            let (kind, key) = compensation.target();
            if let Err(e) = delete_and_wait_all(store, kind, &[key], settings, &shutdown).await {
                warn!(kind = %kind, error = %e, "rollback step failed");
                errors.push(e.to_string());
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
