use super::*;
use std::time::{SystemTime, UNIX_EPOCH};

/// Session recording granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
pub enum SessionRecordLevel {
    /// Disable recording.
    Off,
    /// Record lifecycle and command events only.
    KeyEventsOnly,
    /// Also record the raw output of every command.
    #[default]
    Full,
}

/// A single recorded event.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SessionRecordEntry {
    pub ts_ms: u128,
    pub event: SessionEvent,
}

/// Options for normalizing JSONL recordings into stable fixtures.
#[derive(Debug, Clone, Copy)]
pub struct NormalizeOptions {
    /// Keep raw output events.
    pub keep_raw_output: bool,
    /// Keep connect-failure events.
    pub keep_connect_failures: bool,
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self {
            keep_raw_output: false,
            keep_connect_failures: true,
        }
    }
}

/// Supported recorded event types.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SessionEvent {
    SessionOpened {
        session_id: SessionId,
        host: String,
    },
    ConnectFailed {
        host: String,
        reason: String,
    },
    SessionClosed {
        session_id: SessionId,
        host: String,
        #[serde(default)]
        close_error: Option<String>,
    },
    CommandSent {
        session_id: SessionId,
        command: String,
    },
    CommandCompleted {
        session_id: SessionId,
        command: String,
        lines: Vec<String>,
    },
    CommandFailed {
        session_id: SessionId,
        command: String,
        reason: String,
    },
    RawOutput {
        session_id: SessionId,
        data: String,
    },
}

/// In-memory event recorder shared by every session of a registry.
#[derive(Debug, Clone)]
pub struct SessionRecorder {
    level: SessionRecordLevel,
    entries: Arc<Mutex<Vec<SessionRecordEntry>>>,
}

impl SessionRecorder {
    pub fn new(level: SessionRecordLevel) -> Self {
        Self {
            level,
            entries: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn level(&self) -> SessionRecordLevel {
        self.level
    }

    /// Record a key-level event.
    pub fn record_event(&self, event: SessionEvent) -> Result<(), ConnectError> {
        if self.level == SessionRecordLevel::Off {
            return Ok(());
        }
        let mut guard = self
            .entries
            .lock()
            .map_err(|e| ConnectError::InternalServerError(format!("record lock error: {e}")))?;
        guard.push(SessionRecordEntry {
            ts_ms: now_ms(),
            event,
        });
        Ok(())
    }

    /// Record the raw output of a command when the level is [`SessionRecordLevel::Full`].
    pub fn record_raw_output(
        &self,
        session_id: SessionId,
        data: String,
    ) -> Result<(), ConnectError> {
        if self.level != SessionRecordLevel::Full {
            return Ok(());
        }
        self.record_event(SessionEvent::RawOutput { session_id, data })
    }

    /// Snapshot all records.
    pub fn entries(&self) -> Result<Vec<SessionRecordEntry>, ConnectError> {
        let guard = self
            .entries
            .lock()
            .map_err(|e| ConnectError::InternalServerError(format!("record lock error: {e}")))?;
        Ok(guard.clone())
    }

    /// Events of one session, in recording order.
    pub fn session_events(&self, session_id: SessionId) -> Result<Vec<SessionEvent>, ConnectError> {
        Ok(self
            .entries()?
            .into_iter()
            .map(|entry| entry.event)
            .filter(|event| event.session_id() == Some(session_id))
            .collect())
    }

    pub fn clear(&self) -> Result<(), ConnectError> {
        let mut guard = self
            .entries
            .lock()
            .map_err(|e| ConnectError::InternalServerError(format!("record lock error: {e}")))?;
        guard.clear();
        Ok(())
    }

    /// Export records as JSONL.
    pub fn to_jsonl(&self) -> Result<String, ConnectError> {
        let entries = self.entries()?;
        let mut lines = Vec::with_capacity(entries.len());
        for entry in entries {
            let line = serde_json::to_string(&entry).map_err(|e| {
                ConnectError::InternalServerError(format!("record encode error: {e}"))
            })?;
            lines.push(line);
        }
        Ok(lines.join("\n"))
    }

    /// Restore a recorder from JSONL lines.
    pub fn from_jsonl(jsonl: &str) -> Result<Self, ConnectError> {
        let mut parsed = Vec::new();
        for line in jsonl.lines() {
            if line.trim().is_empty() {
                continue;
            }
            let entry: SessionRecordEntry = serde_json::from_str(line).map_err(|e| {
                ConnectError::InternalServerError(format!("record decode error: {e}"))
            })?;
            parsed.push(entry);
        }

        Ok(Self {
            level: SessionRecordLevel::Full,
            entries: Arc::new(Mutex::new(parsed)),
        })
    }

    /// Normalize JSONL recording content into a stable fixture representation.
    ///
    /// Sorts events by timestamp (stable for equal timestamps) and drops the
    /// event kinds `options` excludes.
    pub fn normalize_jsonl(jsonl: &str, options: NormalizeOptions) -> Result<String, ConnectError> {
        let mut indexed = Self::from_jsonl(jsonl)?
            .entries()?
            .into_iter()
            .enumerate()
            .collect::<Vec<(usize, SessionRecordEntry)>>();

        indexed
            .sort_by(|(idx_a, a), (idx_b, b)| a.ts_ms.cmp(&b.ts_ms).then_with(|| idx_a.cmp(idx_b)));

        let filtered = indexed
            .into_iter()
            .filter_map(|(_, entry)| match &entry.event {
                SessionEvent::RawOutput { .. } if !options.keep_raw_output => None,
                SessionEvent::ConnectFailed { .. } if !options.keep_connect_failures => None,
                _ => Some(entry),
            })
            .collect::<Vec<_>>();

        let normalized = SessionRecorder {
            level: SessionRecordLevel::Full,
            entries: Arc::new(Mutex::new(filtered)),
        };
        normalized.to_jsonl()
    }
}

impl Default for SessionRecorder {
    fn default() -> Self {
        Self::new(SessionRecordLevel::Full)
    }
}

impl SessionEvent {
    /// Session the event belongs to; `None` for failed connection attempts.
    pub fn session_id(&self) -> Option<SessionId> {
        match self {
            SessionEvent::ConnectFailed { .. } => None,
            SessionEvent::SessionOpened { session_id, .. }
            | SessionEvent::SessionClosed { session_id, .. }
            | SessionEvent::CommandSent { session_id, .. }
            | SessionEvent::CommandCompleted { session_id, .. }
            | SessionEvent::CommandFailed { session_id, .. }
            | SessionEvent::RawOutput { session_id, .. } => Some(*session_id),
        }
    }
}

fn now_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}
