use super::{AuditEntry, SCHEMA_VERSION};
use anyhow::{Context, Result};
use chrono::Utc;
use fs2::FileExt;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Append-only JSON-lines audit log.
///
/// Writes are serialized in-process by a mutex and across processes by an
/// exclusive advisory lock on the log file.
pub struct AuditLogger {
    path: PathBuf,
    write_lock: Arc<Mutex<()>>,
}

impl AuditLogger {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append an entry. Failures are reported through `tracing` and never
    /// returned to the caller.
    ///
    /// Blocks on file I/O and the advisory lock; use [`record`](Self::record)
    /// from async code.
    pub fn log(&self, entry: AuditEntry) {
        let action = entry.action();
        if let Err(e) = self.append(entry) {
            self.warn_failed(action, &e);
        }
    }

    /// Like [`log`](Self::log), but the write runs on the blocking pool. The
    /// entry is on disk when the returned future completes.
    pub async fn record(&self, entry: AuditEntry) {
        let action = entry.action();
        let path = self.path.clone();
        let write_lock = Arc::clone(&self.write_lock);
        let written =
            tokio::task::spawn_blocking(move || append_to(&path, &write_lock, entry)).await;
        match written {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => self.warn_failed(action, &e),
            Err(e) => self.warn_failed(action, &anyhow::Error::new(e)),
        }
    }

    fn warn_failed(&self, action: &str, error: &anyhow::Error) {
        tracing::warn!(
            path = %self.path.display(),
            action,
            "audit write failed: {:#}",
            error
        );
    }

    /// Append an entry and return it as written.
    pub fn append(&self, entry: AuditEntry) -> Result<AuditEntry> {
        append_to(&self.path, &self.write_lock, entry)
    }

    /// Entries in write order, optionally restricted to one incident.
    ///
    /// Returns an empty list when the log doesn't exist yet. Lines that fail
    /// to parse are skipped.
    pub fn history(&self, incident_id: Option<&str>) -> Result<Vec<AuditEntry>> {
        let entries = self.read_all()?;
        Ok(match incident_id {
            Some(id) => entries
                .into_iter()
                .filter(|e| e.incident_id.as_deref() == Some(id))
                .collect(),
            None => entries,
        })
    }

    /// Entries written by a single pipeline run.
    pub fn history_for_run(&self, run_id: Uuid) -> Result<Vec<AuditEntry>> {
        Ok(self
            .read_all()?
            .into_iter()
            .filter(|e| e.run_id == Some(run_id))
            .collect())
    }

    fn read_all(&self) -> Result<Vec<AuditEntry>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e).context("Failed to read audit log"),
        };

        let entries = content
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .filter_map(|(idx, line)| match serde_json::from_str::<AuditEntry>(line) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    tracing::warn!(line = idx + 1, "skipping unreadable audit record: {}", e);
                    None
                }
            })
            .collect();

        Ok(entries)
    }
}

fn append_to(path: &Path, write_lock: &Mutex<()>, mut entry: AuditEntry) -> Result<AuditEntry> {
    if entry.timestamp.is_none() {
        entry.timestamp = Some(Utc::now());
    }
    entry.schema_version = SCHEMA_VERSION;

    let mut line = serde_json::to_string(&entry).context("Failed to serialize audit entry")?;
    line.push('\n');

    let _guard = write_lock.lock().unwrap_or_else(|e| e.into_inner());

    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).context("Failed to create audit directory")?;
    }

    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .context("Failed to open audit log")?;
    file.lock_exclusive().context("Failed to lock audit log")?;

    let written = file
        .write_all(line.as_bytes())
        .and_then(|_| file.sync_data())
        .context("Failed to write audit entry");
    let _ = FileExt::unlock(&file);
    written?;

    Ok(entry)
}
