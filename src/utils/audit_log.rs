use tracing::{info, warn};

/// Emits one structured event per dispatch decision on the `audit` target.
#[derive(Debug, Clone, Default)]
pub struct AuditLogger;

impl AuditLogger {
    pub fn new() -> Self {
        Self
    }

    pub fn command_dispatched(&self, mac: &str, command: &str) {
        info!(target: "audit", event = "command_dispatched", mac, command);
    }

    pub fn command_completed(&self, mac: &str, command: &str, results: usize, failures: usize) {
        info!(target: "audit", event = "command_completed", mac, command, results, failures);
    }

    pub fn command_skipped(&self, mac: &str, command: &str) {
        info!(target: "audit", event = "command_skipped", mac, command, reason = "ledger");
    }

    pub fn batch_unchanged(&self, mac: &str, size: usize) {
        info!(target: "audit", event = "batch_unchanged", mac, size);
    }

    pub fn batch_rejected(&self, mac: &str, reason: &str) {
        warn!(target: "audit", event = "batch_rejected", mac, reason);
    }

    pub fn results_discarded(&self, produced_for: u64, current: u64) {
        warn!(target: "audit", event = "results_discarded", produced_for, current);
    }
}
