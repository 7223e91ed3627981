//! Append-only log of raw agent exchanges.
//!
//! One JSON object per line. The file is never rotated or truncated; appends within the
//! process are serialized so concurrent requests cannot interleave partial lines.
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::error::CommonError;

pub const DEFAULT_LOG_PATH: &str = "logs/agent-responses.log";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseLogEntry {
    pub timestamp: DateTime<Utc>,
    pub document_id: String,
    pub agent: String,
    pub agent_id: String,
    pub session_id: String,
    pub ok: bool,
    /// Raw agent payload on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub struct ResponseLog {
    path: PathBuf,
    lock: Mutex<()>,
}

impl ResponseLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one entry, creating the parent directory on first use.
    pub async fn append(&self, entry: &ResponseLogEntry) -> Result<(), CommonError> {
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');

        let _guard = self.lock.lock().await;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(document_id: &str, ok: bool) -> ResponseLogEntry {
        ResponseLogEntry {
            timestamp: Utc::now(),
            document_id: document_id.to_string(),
            agent: "scoring".to_string(),
            agent_id: "agent-1".to_string(),
            session_id: format!("session_{document_id}_0"),
            ok,
            response: ok.then(|| json!({"response": "Total Quality Score: 24/32"})),
            error: (!ok).then(|| "agent call aborted after 60000ms timeout".to_string()),
        }
    }

    #[tokio::test]
    async fn appends_one_line_per_entry() {
        let dir = tempfile::tempdir().unwrap();
        let log = ResponseLog::new(dir.path().join("logs").join("agent-responses.log"));

        log.append(&entry("doc_1", true)).await.unwrap();
        log.append(&entry("doc_2", false)).await.unwrap();

        let content = tokio::fs::read_to_string(log.path()).await.unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["documentId"], "doc_1");
        assert_eq!(first["ok"], true);
        assert_eq!(first["response"]["response"], "Total Quality Score: 24/32");

        let second: Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second["ok"], false);
        assert!(second.get("response").is_none());
        assert!(second["error"].as_str().unwrap().contains("timeout"));
    }

    #[tokio::test]
    async fn concurrent_appends_do_not_interleave() {
        let dir = tempfile::tempdir().unwrap();
        let log = std::sync::Arc::new(ResponseLog::new(dir.path().join("agent.log")));

        let mut handles = Vec::new();
        for i in 0..16 {
            let log = std::sync::Arc::clone(&log);
            handles.push(tokio::spawn(async move {
                log.append(&entry(&format!("doc_{i}"), true)).await.unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let content = tokio::fs::read_to_string(log.path()).await.unwrap();
        assert_eq!(content.lines().count(), 16);
        for line in content.lines() {
            serde_json::from_str::<Value>(line).expect("every line is a full JSON object");
        }
    }
}
