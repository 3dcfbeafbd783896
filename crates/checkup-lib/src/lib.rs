//! Checkup launcher library
//!
//! This crate provides the orchestration core for running one diagnostic
//! checkup inside a cluster:
//! - Loading and validating the checkup record
//! - Provisioning an isolated workspace with rollback on partial failure
//! - Running the checkup image as a batch Job
//! - Bounded, cancellable waits for Job completion and resource disposal
//! - Additive status reporting back into the record

pub mod checkup;
pub mod config;
pub mod disposal;
pub mod launcher;
pub mod models;
pub mod observability;
pub mod provision;
pub mod reporter;
pub mod store;
pub mod wait;

pub use checkup::{Checkup, CheckupPhase, CheckupSettings, RunError, Workload};
pub use config::{ConfigError, ConfigLoader, LoadedConfig};
pub use disposal::DisposalError;
pub use launcher::{Launcher, LauncherError};
pub use models::*;
pub use observability::StructuredLogger;
pub use provision::{ProvisionError, Provisioner, TeardownError, Workspace, WorkspaceNames};
pub use reporter::{RecordReporter, ReportError, Reporter};
pub use store::{
    KubeStore, MemoryStore, ObjectKey, PodLog, Resource, ResourceKind, ResourceStore, StoreError,
};
pub use wait::{shutdown_channel, PollSettings, Shutdown, ShutdownTrigger, WaitError};
