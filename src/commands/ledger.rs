use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Per-command execution record, keyed by the exact command text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEntry {
    pub command: String,
    pub executed: bool,
    pub should_repeat: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_seen: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_dispatched: Option<DateTime<Utc>>,
}

impl LedgerEntry {
    /// The dispatcher must not hand this command to the executor.
    pub fn blocks_execution(&self) -> bool {
        !self.should_repeat
    }
}

/// Persistent record of which command strings were already executed.
///
/// Fully loaded at start-up and fully rewritten on every mutation. Entries are
/// never removed.
#[derive(Debug, Default)]
pub struct Ledger {
    path: Option<PathBuf>,
    entries: Vec<LedgerEntry>,
}

impl Ledger {
    /// Load from disk. A missing, unreadable or corrupt file means "nothing known yet".
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = match read_entries(&path) {
            Ok(entries) => entries,
            Err(e) => {
                if path.exists() {
                    warn!(path = %path.display(), error = %e, "ledger unreadable, starting empty");
                } else {
                    debug!(path = %path.display(), "no ledger yet");
                }
                Vec::new()
            }
        };
        Self {
            path: Some(path),
            entries,
        }
    }

    /// A ledger that never touches disk.
    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn seen(&self, command: &str) -> Option<&LedgerEntry> {
        self.entries.iter().find(|e| e.command == command)
    }

    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }

    /// Create or update the entry and rewrite the backing file. The in-memory
    /// state is updated even when persisting fails.
    pub async fn record(&mut self, command: &str, executed: bool, should_repeat: bool) -> Result<()> {
        let now = Utc::now();
        match self.entries.iter_mut().find(|e| e.command == command) {
            Some(entry) => {
                entry.executed = executed;
                entry.should_repeat = should_repeat;
                if executed {
                    entry.last_dispatched = Some(now);
                }
            }
            None => self.entries.push(LedgerEntry {
                command: command.to_string(),
                executed,
                should_repeat,
                first_seen: Some(now),
                last_dispatched: executed.then_some(now),
            }),
        }
        self.persist().await
    }

    async fn persist(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("creating {}", parent.display()))?;
        }

        let body = serde_json::to_vec_pretty(&self.entries).context("serializing ledger")?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, body)
            .await
            .with_context(|| format!("writing {}", tmp.display()))?;
        tokio::fs::rename(&tmp, path)
            .await
            .with_context(|| format!("replacing {}", path.display()))?;
        Ok(())
    }
}

fn read_entries(path: &Path) -> Result<Vec<LedgerEntry>> {
    let raw = std::fs::read_to_string(path).context("reading ledger file")?;
    serde_json::from_str(&raw).context("parsing ledger JSON")
}
