use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};

pub type EventPayload = Map<String, Value>;

/// Structured event log for one session.
///
/// - default fields are `type`, `session_id`, `ts`
/// - caller payload is merged last and can override defaults
/// - file sinks get one compact JSON object per line
#[derive(Debug, Clone)]
pub struct EventWriter {
    inner: Arc<EventWriterInner>,
}

#[derive(Debug)]
struct EventWriterInner {
    session_id: String,
    sink: EventSink,
}

#[derive(Debug)]
enum EventSink {
    File { path: PathBuf, lock: Mutex<()> },
    Memory(Mutex<Vec<Value>>),
    Disabled,
}

impl EventWriter {
    pub fn to_file(path: impl Into<PathBuf>, session_id: impl Into<String>) -> Self {
        Self::with_sink(
            session_id,
            EventSink::File {
                path: path.into(),
                lock: Mutex::new(()),
            },
        )
    }

    pub fn in_memory(session_id: impl Into<String>) -> Self {
        Self::with_sink(session_id, EventSink::Memory(Mutex::new(Vec::new())))
    }

    pub fn disabled() -> Self {
        Self::with_sink(String::new(), EventSink::Disabled)
    }

    fn with_sink(session_id: impl Into<String>, sink: EventSink) -> Self {
        Self {
            inner: Arc::new(EventWriterInner {
                session_id: session_id.into(),
                sink,
            }),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        match &self.inner.sink {
            EventSink::File { path, .. } => Some(path.as_path()),
            _ => None,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.inner.session_id
    }

    pub fn emit(&self, event_type: &str, payload: EventPayload) -> anyhow::Result<Value> {
        let mut event = Map::new();
        event.insert("type".to_string(), Value::String(event_type.to_string()));
        event.insert(
            "session_id".to_string(),
            Value::String(self.inner.session_id.clone()),
        );
        event.insert("ts".to_string(), Value::String(now_utc_iso()));
        for (key, value) in payload {
            event.insert(key, value);
        }
        let event = Value::Object(event);

        match &self.inner.sink {
            EventSink::File { path, lock } => {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                let line = serde_json::to_string(&event)?;
                let _guard = lock
                    .lock()
                    .map_err(|_| anyhow::anyhow!("event writer lock poisoned"))?;
                let mut file = OpenOptions::new().create(true).append(true).open(path)?;
                file.write_all(line.as_bytes())?;
                file.write_all(b"\n")?;
            }
            EventSink::Memory(events) => {
                events
                    .lock()
                    .map_err(|_| anyhow::anyhow!("event buffer lock poisoned"))?
                    .push(event.clone());
            }
            EventSink::Disabled => {}
        }

        Ok(event)
    }

    /// Buffered events, oldest first. Empty for file and disabled sinks.
    pub fn recorded(&self) -> Vec<Value> {
        match &self.inner.sink {
            EventSink::Memory(events) => events
                .lock()
                .map(|events| events.clone())
                .unwrap_or_default(),
            _ => Vec::new(),
        }
    }

    pub fn recorded_types(&self) -> Vec<String> {
        self.recorded()
            .iter()
            .filter_map(|event| event.get("type").and_then(Value::as_str))
            .map(str::to_string)
            .collect()
    }
}

fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use chrono::DateTime;

    use super::*;

    #[test]
    fn file_sink_writes_compact_jsonl_line() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("logs").join("events.jsonl");
        let writer = EventWriter::to_file(&path, "session-123");

        let mut payload = EventPayload::new();
        payload.insert("category".to_string(), Value::String("story".to_string()));
        let emitted = writer.emit("category_started", payload)?;

        let content = fs::read_to_string(&path)?;
        let line = content.lines().next().unwrap_or("");
        let parsed: Value = serde_json::from_str(line)?;

        assert_eq!(parsed, emitted);
        assert_eq!(parsed["type"], Value::String("category_started".to_string()));
        assert_eq!(parsed["session_id"], Value::String("session-123".to_string()));
        assert_eq!(parsed["category"], Value::String("story".to_string()));

        let ts = parsed["ts"].as_str().unwrap_or("");
        DateTime::parse_from_rfc3339(ts)?;
        Ok(())
    }

    #[test]
    fn payload_can_override_default_keys() -> anyhow::Result<()> {
        let writer = EventWriter::in_memory("session-123");

        let mut payload = EventPayload::new();
        payload.insert("type".to_string(), Value::String("override".to_string()));
        let emitted = writer.emit("run_started", payload)?;

        assert_eq!(emitted["type"], Value::String("override".to_string()));
        assert_eq!(writer.recorded_types(), vec!["override".to_string()]);
        Ok(())
    }

    #[test]
    fn file_sink_appends_lines() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("events.jsonl");
        let writer = EventWriter::to_file(&path, "session-123");

        writer.emit("one", EventPayload::new())?;
        writer.emit("two", EventPayload::new())?;

        let content = fs::read_to_string(&path)?;
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let second: Value = serde_json::from_str(lines[1])?;
        assert_eq!(second["type"], Value::String("two".to_string()));
        assert!(writer.recorded().is_empty());
        Ok(())
    }

    #[test]
    fn disabled_sink_still_returns_event() -> anyhow::Result<()> {
        let writer = EventWriter::disabled();
        let emitted = writer.emit("source_selected", EventPayload::new())?;
        assert_eq!(emitted["type"], Value::String("source_selected".to_string()));
        assert!(writer.path().is_none());
        assert!(writer.recorded().is_empty());
        Ok(())
    }
}
