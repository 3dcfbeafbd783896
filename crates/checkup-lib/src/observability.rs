//! Structured lifecycle logging
//!
//! One event per launcher phase transition plus a final outcome event, all
//! carrying the checkup record they belong to. Output format is decided by
//! the subscriber the binary installs.

use crate::models::CheckupSpec;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{error, info, warn};

/// Launcher phases as they appear in log events
pub mod phases {
    pub const SETUP: &str = "setup";
    pub const RUN: &str = "run";
    pub const TEARDOWN: &str = "teardown";
    pub const REPORT: &str = "report";
}

/// Structured logger for checkup lifecycle events
#[derive(Debug, Clone)]
pub struct StructuredLogger {
    record: String,
}

impl StructuredLogger {
    pub fn new(record: impl Into<String>) -> Self {
        Self {
            record: record.into(),
        }
    }

    /// Log launcher startup
    pub fn log_startup(&self, version: &str) {
        info!(
            event = "launcher_started",
            record = %self.record,
            launcher_version = %version,
            "Checkup launcher started"
        );
    }

    /// Log the accepted checkup configuration
    pub fn log_config_loaded(&self, spec: &CheckupSpec) {
        info!(
            event = "config_loaded",
            record = %self.record,
            image = %spec.image,
            timeout_secs = spec.timeout.as_secs(),
            service_account = %spec.service_account_name,
            cluster_roles = spec.cluster_role_names.len(),
            roles = spec.role_names.len(),
            params = spec.params.len(),
            "Checkup configuration loaded"
        );
    }

    pub fn log_config_rejected(&self, reason: &str) {
        error!(
            event = "config_rejected",
            record = %self.record,
            reason = %reason,
            "Checkup configuration rejected"
        );
    }

    pub fn log_phase_started(&self, phase: &str) {
        info!(event = "phase_started", record = %self.record, phase = %phase, "Phase started");
    }

    /// Log the end of a phase; failures are logged as warnings
    pub fn log_phase_finished(&self, phase: &str, elapsed: Duration, failure: Option<&str>) {
        match failure {
            None => info!(
                event = "phase_finished",
                record = %self.record,
                phase = %phase,
                elapsed_ms = elapsed.as_millis() as u64,
                "Phase finished"
            ),
            Some(reason) => warn!(
                event = "phase_failed",
                record = %self.record,
                phase = %phase,
                elapsed_ms = elapsed.as_millis() as u64,
                reason = %reason,
                "Phase failed"
            ),
        }
    }

    /// Log the final outcome of the run, with the checkup results as JSON
    pub fn log_outcome(
        &self,
        succeeded: bool,
        failure_reason: &str,
        results: &BTreeMap<String, String>,
    ) {
        let results = serde_json::to_string(results).unwrap_or_default();
        if succeeded {
            info!(
                event = "checkup_finished",
                record = %self.record,
                succeeded = true,
                results = %results,
                "Checkup finished successfully"
            );
        } else {
            warn!(
                event = "checkup_finished",
                record = %self.record,
                succeeded = false,
                failure_reason = %failure_reason,
                results = %results,
                "Checkup finished with failures"
            );
        }
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "shutdown_requested",
            record = %self.record,
            reason = %reason,
            "Checkup launcher shutting down"
        );
    }
}
