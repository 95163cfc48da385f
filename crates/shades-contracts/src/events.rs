use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{anyhow, Context};
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

pub type EventPayload = Map<String, Value>;

const RESERVED_KEYS: [&str; 3] = ["type", "session_id", "ts"];

/// Append-only JSONL record of mention outcomes and cycle summaries.
///
/// The file is opened once and every row is flushed as it is written.
#[derive(Debug)]
pub struct Journal {
    path: PathBuf,
    session_id: String,
    file: Mutex<File>,
}

#[derive(Serialize)]
struct Row<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    session_id: &'a str,
    ts: String,
    #[serde(flatten)]
    fields: EventPayload,
}

impl Journal {
    pub fn open(path: impl Into<PathBuf>, session_id: impl Into<String>) -> anyhow::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("failed to open journal {}", path.display()))?;
        Ok(Self {
            path,
            session_id: session_id.into(),
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Writes one row. Payload keys that collide with the envelope are dropped.
    pub fn emit(&self, kind: &str, mut fields: EventPayload) -> anyhow::Result<()> {
        fields.retain(|key, _| !RESERVED_KEYS.contains(&key.as_str()));
        let row = Row {
            kind,
            session_id: &self.session_id,
            ts: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            fields,
        };
        let mut line = serde_json::to_vec(&row).context("failed to encode journal row")?;
        line.push(b'\n');

        let mut file = self
            .file
            .lock()
            .map_err(|_| anyhow!("journal lock poisoned"))?;
        file.write_all(&line)
            .with_context(|| format!("failed to append to {}", self.path.display()))?;
        file.flush()
            .with_context(|| format!("failed to flush {}", self.path.display()))
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use chrono::DateTime;
    use serde_json::json;

    use super::*;

    fn rows(path: &Path) -> anyhow::Result<Vec<Value>> {
        let content = fs::read_to_string(path)?;
        content
            .lines()
            .map(|line| serde_json::from_str(line).map_err(anyhow::Error::from))
            .collect()
    }

    #[test]
    fn each_emit_appends_one_row() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("logs").join("events.jsonl");
        let journal = Journal::open(&path, "session-1")?;

        let mut fields = EventPayload::new();
        fields.insert("mention_id".to_string(), json!("100"));
        journal.emit("mention_replied", fields)?;
        journal.emit("cycle_completed", EventPayload::new())?;

        let rows = rows(&path)?;
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["type"], json!("mention_replied"));
        assert_eq!(rows[0]["session_id"], json!("session-1"));
        assert_eq!(rows[0]["mention_id"], json!("100"));
        DateTime::parse_from_rfc3339(rows[0]["ts"].as_str().unwrap_or(""))?;
        assert_eq!(rows[1]["type"], json!("cycle_completed"));
        Ok(())
    }

    #[test]
    fn envelope_keys_cannot_be_overridden() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("events.jsonl");
        let journal = Journal::open(&path, "session-1")?;
        let mut fields = EventPayload::new();
        fields.insert("session_id".to_string(), json!("forged"));
        fields.insert("type".to_string(), json!("forged"));
        journal.emit("mention_skipped", fields)?;

        let rows = rows(&path)?;
        assert_eq!(rows[0]["session_id"], json!("session-1"));
        assert_eq!(rows[0]["type"], json!("mention_skipped"));
        Ok(())
    }

    #[test]
    fn reopening_appends_rather_than_truncates() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("events.jsonl");
        Journal::open(&path, "first")?.emit("cycle_completed", EventPayload::new())?;
        Journal::open(&path, "second")?.emit("cycle_completed", EventPayload::new())?;

        let rows = rows(&path)?;
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1]["session_id"], json!("second"));
        Ok(())
    }
}
