use anyhow::{Context, Result};
use serde_json::Value;
use tracing::{info, warn};

use crate::commands::executor::CommandExecutor;
use crate::commands::ledger::Ledger;
use crate::commands::result::{ErrorReport, ExecutionResult};
use crate::utils::audit_log::AuditLogger;

/// What became of one inbound push.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// One entry per produced result; may be empty when the ledger skipped everything
    Results(Vec<ExecutionResult>),
    /// Identical to the previously dispatched batch, nothing ran
    Unchanged,
    /// The payload was unusable and is answered with an error report
    Rejected(ErrorReport),
}

impl DispatchOutcome {
    /// The text frame to send back, if any. Empty result arrays are not sent.
    pub fn to_frame(&self) -> Result<Option<String>> {
        match self {
            Self::Results(results) if results.is_empty() => Ok(None),
            Self::Results(results) => serde_json::to_string(results)
                .map(Some)
                .context("serializing results"),
            Self::Unchanged => Ok(None),
            Self::Rejected(report) => serde_json::to_string(report)
                .map(Some)
                .context("serializing error report"),
        }
    }
}

/// Drives the executor over a batch, sequentially, consulting the ledger first.
pub struct BatchDispatcher {
    executor: CommandExecutor,
    ledger: Ledger,
    last_batch: Option<Vec<String>>,
    audit: AuditLogger,
}

impl BatchDispatcher {
    pub fn new(executor: CommandExecutor, ledger: Ledger) -> Self {
        Self {
            executor,
            ledger,
            last_batch: None,
            audit: AuditLogger::new(),
        }
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Entry point for a raw inbound text frame.
    pub async fn handle_message(&mut self, text: &str, mac: &str) -> DispatchOutcome {
        match serde_json::from_str::<Value>(text) {
            Ok(payload) => self.dispatch_payload(&payload, mac).await,
            Err(e) => {
                self.audit.batch_rejected(mac, "invalid JSON");
                DispatchOutcome::Rejected(ErrorReport::new(mac, e.to_string()))
            }
        }
    }

    /// Validate the `commands` field and dispatch it.
    pub async fn dispatch_payload(&mut self, payload: &Value, mac: &str) -> DispatchOutcome {
        let Some(commands) = payload.get("commands").and_then(Value::as_array) else {
            warn!(commands = ?payload.get("commands"), "received commands is not an array");
            self.audit.batch_rejected(mac, ErrorReport::NOT_AN_ARRAY);
            return DispatchOutcome::Rejected(ErrorReport::new(mac, ErrorReport::NOT_AN_ARRAY));
        };

        let batch: Vec<String> = commands
            .iter()
            .filter_map(|v| match v.as_str() {
                Some(s) => Some(s.to_string()),
                None => {
                    warn!(element = %v, "skipping non-string command");
                    None
                }
            })
            .collect();

        if self.is_repeat(&batch) {
            info!(size = batch.len(), "commands unchanged, skipping execution");
            self.audit.batch_unchanged(mac, batch.len());
            return DispatchOutcome::Unchanged;
        }

        DispatchOutcome::Results(self.dispatch(&batch, mac).await)
    }

    fn is_repeat(&self, batch: &[String]) -> bool {
        self.last_batch.as_deref() == Some(batch)
    }

    /// Run every command the ledger allows, in order, and collect the results.
    /// A batch equal to the previous one yields nothing.
    pub async fn dispatch(&mut self, batch: &[String], mac: &str) -> Vec<ExecutionResult> {
        if self.is_repeat(batch) {
            self.audit.batch_unchanged(mac, batch.len());
            return Vec::new();
        }

        let mut results = Vec::new();
        for raw in batch {
            let blocked = self
                .ledger
                .seen(raw)
                .filter(|entry| entry.blocks_execution())
                .map(|entry| entry.executed);

            if let Some(executed) = blocked {
                self.audit.command_skipped(mac, raw);
                if let Err(e) = self.ledger.record(raw, executed, false).await {
                    warn!(error = %e, "failed to persist ledger");
                }
                continue;
            }

            self.audit.command_dispatched(mac, raw);
            let produced = self.executor.execute(raw, mac).await;
            let failures = produced.iter().filter(|r| !r.status()).count();
            self.audit
                .command_completed(mac, raw, produced.len(), failures);
            results.extend(produced);

            if let Err(e) = self.ledger.record(raw, true, false).await {
                warn!(error = %e, "failed to persist ledger");
            }
        }

        self.last_batch = Some(batch.to_vec());
        results
    }
}
