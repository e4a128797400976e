//! The append-only usage ledger.
//!
//! One [`UsageLedgerEntry`] per completed billable call. Entries are
//! immutable and survive in-memory window rollovers; the quota counters
//! are a derived, reconstructable cache over this audit trail.

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use cd_domain::error::{Error, Result};

/// Audit record for one completed provider call (or one whole run;
/// the orchestrator sums its calls and records once).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageLedgerEntry {
    pub entry_id: Uuid,
    pub tenant_id: String,
    pub actor_id: String,
    pub model_id: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    pub cost_usd: f64,
    pub recorded_at: DateTime<Utc>,
}

/// Durable append-only sink for usage entries.
///
/// Appends are best-effort from the quota manager's point of view: a
/// failed append is logged, never allowed to lose the in-memory counter
/// update that already happened.
pub trait UsageLedger: Send + Sync {
    fn append(&self, entry: &UsageLedgerEntry) -> Result<()>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// JSONL file ledger
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One JSON object per line, opened in append mode.
pub struct JsonlLedger {
    path: PathBuf,
    file: Mutex<std::fs::File>,
}

impl JsonlLedger {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;
        Ok(Self { path, file: Mutex::new(file) })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl UsageLedger for JsonlLedger {
    fn append(&self, entry: &UsageLedgerEntry) -> Result<()> {
        let line = serde_json::to_string(entry)?;
        let mut file = self.file.lock();
        writeln!(file, "{line}").map_err(Error::Io)?;
        file.flush().map_err(Error::Io)?;
        Ok(())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// In-memory ledger
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// In-memory ledger for tests and hosts that wire their own persistence.
#[derive(Default)]
pub struct MemoryLedger {
    entries: Mutex<Vec<UsageLedgerEntry>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all entries, oldest first.
    pub fn entries(&self) -> Vec<UsageLedgerEntry> {
        self.entries.lock().clone()
    }
}

impl UsageLedger for MemoryLedger {
    fn append(&self, entry: &UsageLedgerEntry) -> Result<()> {
        self.entries.lock().push(entry.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(tenant: &str, total: u64) -> UsageLedgerEntry {
        UsageLedgerEntry {
            entry_id: Uuid::new_v4(),
            tenant_id: tenant.into(),
            actor_id: "user-1".into(),
            model_id: "claude-sonnet-4-20250514".into(),
            input_tokens: total / 2,
            output_tokens: total - total / 2,
            total_tokens: total,
            cost_usd: 0.01,
            recorded_at: Utc::now(),
        }
    }

    #[test]
    fn jsonl_ledger_appends_parseable_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("usage.jsonl");
        let ledger = JsonlLedger::open(&path).unwrap();

        ledger.append(&entry("acme", 100)).unwrap();
        ledger.append(&entry("acme", 250)).unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = raw.lines().collect();
        assert_eq!(lines.len(), 2);

        let parsed: UsageLedgerEntry = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(parsed.total_tokens, 250);
        assert_eq!(parsed.tenant_id, "acme");
    }

    #[test]
    fn jsonl_ledger_reopens_and_keeps_appending() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("usage.jsonl");

        JsonlLedger::open(&path).unwrap().append(&entry("acme", 10)).unwrap();
        JsonlLedger::open(&path).unwrap().append(&entry("acme", 20)).unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert_eq!(raw.lines().count(), 2);
    }

    #[test]
    fn memory_ledger_preserves_order() {
        let ledger = MemoryLedger::new();
        ledger.append(&entry("acme", 1)).unwrap();
        ledger.append(&entry("globex", 2)).unwrap();

        let entries = ledger.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].tenant_id, "acme");
        assert_eq!(entries[1].tenant_id, "globex");
    }
}
