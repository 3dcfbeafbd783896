//! Disposal waiter
//!
//! A delete request only starts removal; a resource counts as disposed once
//! a lookup reports it as not found.

use crate::store::{ObjectKey, ResourceKind, ResourceStore};
use crate::wait::{poll_until, PollSettings, Shutdown, WaitError};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DisposalError {
    #[error("timed out after {timeout:?} waiting for {kind} {key:?} to be disposed")]
    Timeout {
        kind: ResourceKind,
        key: String,
        timeout: Duration,
    },

    #[error("wait for disposal cancelled")]
    Cancelled,

    #[error("resources not disposed: {}", .0.join(", "))]
    Dangling(Vec<String>),
}

fn dangling_entry(key: &ObjectKey, reason: impl std::fmt::Display) -> String {
    format!("name: {} reason: {}", key, reason)
}

/// Wait until `key` is no longer found in the store
pub async fn wait_for_deletion<S>(
    store: &S,
    kind: ResourceKind,
    key: &ObjectKey,
    settings: PollSettings,
    shutdown: &Shutdown,
) -> Result<(), DisposalError>
where
    S: ResourceStore + ?Sized,
{
    let outcome = poll_until(
        move || async move {
            match store.get(kind, key).await {
                Err(e) if e.is_not_found() => Some(()),
                Ok(_) => {
                    debug!(kind = %kind, key = %key, "still present");
                    None
                }
                Err(e) => {
                    warn!(
                        kind = %kind,
                        key = %key,
                        error = %e,
                        "lookup failed while waiting for disposal"
                    );
                    None
                }
            }
        },
        settings,
        shutdown,
    )
    .await;

    match outcome {
        Ok(()) => {
            debug!(kind = %kind, key = %key, "disposed");
            Ok(())
        }
        Err(WaitError::Timeout(timeout)) => Err(DisposalError::Timeout {
            kind,
            key: key.to_string(),
            timeout,
        }),
        Err(WaitError::Cancelled) => Err(DisposalError::Cancelled),
    }
}

/// Wait for every key under one shared deadline, reporting all that remain
pub async fn wait_for_all_deletions<S>(
    store: &S,
    kind: ResourceKind,
    keys: &[ObjectKey],
    settings: PollSettings,
    shutdown: &Shutdown,
) -> Result<(), DisposalError>
where
    S: ResourceStore + ?Sized,
{
    let deadline = Instant::now() + settings.timeout;
    let mut dangling = Vec::new();

    for key in keys {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if let Err(e) =
            wait_for_deletion(store, kind, key, settings.with_timeout(remaining), shutdown).await
        {
            dangling.push(dangling_entry(key, e));
        }
    }

    if dangling.is_empty() {
        Ok(())
    } else {
        Err(DisposalError::Dangling(dangling))
    }
}

/// Delete every key, then wait for the deleted ones to disappear
///
/// A key that is already gone counts as disposed. Delete and wait failures
/// are reported together.
pub async fn delete_and_wait_all<S>(
    store: &S,
    kind: ResourceKind,
    keys: &[ObjectKey],
    settings: PollSettings,
    shutdown: &Shutdown,
) -> Result<(), DisposalError>
where
    S: ResourceStore + ?Sized,
{
    let mut dangling = Vec::new();
    let mut deleted = Vec::with_capacity(keys.len());

    for key in keys {
        match store.delete(kind, key).await {
            Ok(()) => deleted.push(key.clone()),
            Err(e) if e.is_not_found() => debug!(kind = %kind, key = %key, "already gone"),
            Err(e) => {
                warn!(kind = %kind, key = %key, error = %e, "delete failed");
                dangling.push(dangling_entry(key, e));
            }
        }
    }

    if !deleted.is_empty() {
        info!(kind = %kind, count = deleted.len(), "waiting for deleted resources to be disposed");
    }
    if let Err(e) = wait_for_all_deletions(store, kind, &deleted, settings, shutdown).await {
        match e {
            DisposalError::Dangling(entries) => dangling.extend(entries),
            other => dangling.push(other.to_string()),
        }
    }

    if dangling.is_empty() {
        Ok(())
    } else {
        Err(DisposalError::Dangling(dangling))
    }
}
