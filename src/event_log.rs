//! Append-only newline-delimited JSON journal of triage decisions.
//!
//! Callers must serialize their own `append` calls; the log itself makes no
//! ordering guarantee under concurrent writers.

use crate::error::Result;
use crate::model::{Epoch, EventLogEntry};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::warn;

const MAX_ENTRIES: usize = 10_000;
const MAX_AGE_DAYS: f64 = 30.0;

#[derive(Debug, Clone)]
pub struct EventLog {
    path: PathBuf,
}

impl EventLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub async fn append(&self, entry: &EventLogEntry) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');
        let mut file = fs::OpenOptions::new().create(true).append(true).open(&self.path).await?;
        file.write_all(line.as_bytes()).await?;
        Ok(())
    }

    pub async fn read_all(&self) -> Result<Vec<EventLogEntry>> {
        read_entries(&self.path).await
    }

    pub async fn read_since(&self, since: Epoch) -> Result<Vec<EventLogEntry>> {
        Ok(read_entries(&self.path).await?.into_iter().filter(|e| e.timestamp >= since).collect())
    }

    /// No-op if the log holds 10,000 entries or fewer. Otherwise drops
    /// entries older than 30 days, caps the remainder to the most recent
    /// 10,000, and rewrites the file wholesale. Returns the number dropped.
    ///
    /// Not crash-atomic: a crash mid-rewrite can lose the log's tail, which
    /// is acceptable for best-effort history (see SPEC_FULL.md §9).
    pub async fn rotate(&self, now: Epoch) -> Result<usize> {
        let entries = read_entries(&self.path).await?;
        if entries.len() <= MAX_ENTRIES {
            return Ok(0);
        }
        let cutoff = now - MAX_AGE_DAYS * 86_400.0;
        let mut kept: Vec<EventLogEntry> = entries.iter().filter(|e| e.timestamp >= cutoff).cloned().collect();
        if kept.len() > MAX_ENTRIES {
            let drop_count = kept.len() - MAX_ENTRIES;
            kept.drain(0..drop_count);
        }
        let dropped = entries.len() - kept.len();

        let mut buf = String::new();
        for entry in &kept {
            buf.push_str(&serde_json::to_string(entry)?);
            buf.push('\n');
        }
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&self.path, buf).await?;
        Ok(dropped)
    }
}

async fn read_entries(path: &Path) -> Result<Vec<EventLogEntry>> {
    let contents = match fs::read_to_string(path).await {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let mut entries = Vec::with_capacity(contents.lines().count());
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<EventLogEntry>(line) {
            Ok(entry) => entries.push(entry),
            Err(e) => warn!("skipping malformed event log line: {e}"),
        }
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Decision, DeviceEvent};
    use std::collections::HashMap;
    use tempfile::tempdir;

    fn entry(timestamp: Epoch) -> EventLogEntry {
        EventLogEntry {
            event: DeviceEvent {
                subscription_id: "default.battery-low".into(),
                source: "device.battery".into(),
                data: HashMap::new(),
                metadata: None,
                fired_at: timestamp,
            },
            decision: Decision::Push,
            reason: "test".into(),
            timestamp,
        }
    }

    #[tokio::test]
    async fn append_and_read_back() {
        let dir = tempdir().unwrap();
        let log = EventLog::new(dir.path().join("events.jsonl"));
        log.append(&entry(100.0)).await.unwrap();
        log.append(&entry(200.0)).await.unwrap();
        let all = log.read_all().await.unwrap();
        assert_eq!(all.len(), 2);
        let since = log.read_since(150.0).await.unwrap();
        assert_eq!(since.len(), 1);
        assert_eq!(since[0].timestamp, 200.0);
    }

    #[tokio::test]
    async fn rotate_is_noop_under_budget() {
        let dir = tempdir().unwrap();
        let log = EventLog::new(dir.path().join("events.jsonl"));
        for i in 0..10 {
            log.append(&entry(i as f64)).await.unwrap();
        }
        let dropped = log.rotate(1_000.0).await.unwrap();
        assert_eq!(dropped, 0);
        assert_eq!(log.read_all().await.unwrap().len(), 10);
    }

    #[tokio::test]
    async fn rotate_caps_to_ten_thousand_and_drops_stale() {
        let dir = tempdir().unwrap();
        let log = EventLog::new(dir.path().join("events.jsonl"));
        let now = 100_000_000.0;
        // 500 entries older than 30 days, then 10_200 recent ones.
        for i in 0..500 {
            log.append(&entry(now - 40.0 * 86_400.0 + i as f64)).await.unwrap();
        }
        for i in 0..10_200 {
            log.append(&entry(now - 1.0 * 86_400.0 + i as f64)).await.unwrap();
        }
        let dropped = log.rotate(now).await.unwrap();
        assert!(dropped > 0);
        let remaining = log.read_all().await.unwrap();
        assert!(remaining.len() <= 10_000);
        let cutoff = now - 30.0 * 86_400.0;
        assert!(remaining.iter().all(|e| e.timestamp >= cutoff));
    }

    #[tokio::test]
    async fn read_all_tolerates_blank_and_malformed_lines() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        fs::create_dir_all(dir.path()).await.unwrap();
        fs::write(&path, "\n{not json}\n{\"bad\":true}\n\n").await.unwrap();
        let log = EventLog::new(path);
        let all = log.read_all().await.unwrap();
        assert!(all.is_empty());
    }
}
