use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::Value;

/// One submission-lifecycle event. The variant name becomes the line's
/// `type` tag, so the log stays greppable by event name.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    SubmissionStarted {
        model_key: String,
    },
    SubmissionCompleted {
        model_key: String,
        chars: usize,
    },
    SubmissionFailed {
        model_key: String,
        error: String,
    },
    /// Complete stream fragments that failed to parse. Diagnostic only;
    /// the decoded text was still delivered.
    MalformedFragments {
        provider: String,
        count: u64,
    },
}

/// Append-only JSONL log of submission activity. Each line is one
/// [`SessionEvent`] plus `session_id` and a `ts` stamped at write time.
/// The file is opened on the first record and held for the session.
#[derive(Debug, Clone)]
pub struct SessionLog {
    inner: Arc<SessionLogInner>,
}

#[derive(Debug)]
struct SessionLogInner {
    path: PathBuf,
    session_id: String,
    file: Mutex<Option<File>>,
}

impl SessionLog {
    pub fn new(path: impl Into<PathBuf>, session_id: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(SessionLogInner {
                path: path.into(),
                session_id: session_id.into(),
                file: Mutex::new(None),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn session_id(&self) -> &str {
        &self.inner.session_id
    }

    pub fn record(&self, event: &SessionEvent) -> Result<()> {
        let mut line = serde_json::to_value(event).context("event serialization failed")?;
        let fields = line
            .as_object_mut()
            .context("event did not serialize to an object")?;
        fields.insert(
            "session_id".to_string(),
            Value::String(self.inner.session_id.clone()),
        );
        fields.insert(
            "ts".to_string(),
            Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)),
        );

        let mut guard = self
            .inner
            .file
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let file = match guard.as_mut() {
            Some(file) => file,
            None => {
                if let Some(parent) = self.inner.path.parent() {
                    std::fs::create_dir_all(parent)
                        .with_context(|| format!("failed to create {}", parent.display()))?;
                }
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&self.inner.path)
                    .with_context(|| format!("failed to open {}", self.inner.path.display()))?;
                guard.insert(file)
            }
        };
        serde_json::to_writer(&mut *file, &line)?;
        file.write_all(b"\n")?;
        Ok(())
    }
}
