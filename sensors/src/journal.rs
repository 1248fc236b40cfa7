//! Event journal
//!
//! Persists dispatched payloads per session:
//!
//! ```text
//! <base>/<session id>/session.json     session metadata
//! <base>/<session id>/payloads.jsonl   one JournalEntry per line
//! ```

use crate::dispatch::{DispatchKind, DispatchReport};
use crate::payload::AlarmPayload;
use crate::{EngineError, EngineObserver, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{create_dir_all, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use vigil_hal::{InstanceId, SensorId};

const PAYLOAD_FILE: &str = "payloads.jsonl";
const SESSION_FILE: &str = "session.json";

/// Journal session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalSession {
    pub id: String,
    pub name: String,
    /// Engine the payloads came from
    pub source: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub payload_count: usize,
    pub alarm_count: usize,
    pub notes: Vec<String>,
}

impl JournalSession {
    pub fn new(name: &str, source: &str) -> Self {
        let now = Utc::now();

        Self {
            id: format!("session_{}", now.format("%Y%m%d_%H%M%S_%3f")),
            name: name.to_string(),
            source: source.to_string(),
            start_time: now,
            end_time: None,
            payload_count: 0,
            alarm_count: 0,
            notes: Vec::new(),
        }
    }

    pub fn add_note(&mut self, note: &str) {
        self.notes.push(format!("[{}] {}", Utc::now().format("%H:%M:%S"), note));
    }

    pub fn end(&mut self) {
        self.end_time = Some(Utc::now());
    }

    pub fn duration(&self) -> chrono::Duration {
        let end = self.end_time.unwrap_or_else(Utc::now);
        end - self.start_time
    }
}

/// One dispatched payload with its delivery result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub recorded_at: DateTime<Utc>,
    pub reset: bool,
    pub delivered: Vec<InstanceId>,
    pub failed: Vec<InstanceId>,
    pub payload: AlarmPayload,
}

#[derive(Default)]
struct JournalInner {
    session: Option<JournalSession>,
    writer: Option<BufWriter<File>>,
}

/// Payload journal
pub struct EventJournal {
    base_path: PathBuf,
    inner: Mutex<JournalInner>,
}

impl EventJournal {
    /// Create journal rooted at `base_path`
    pub fn new(base_path: &Path) -> Result<Self> {
        create_dir_all(base_path)
            .map_err(|e| EngineError::Journal(format!("Failed to create directory: {}", e)))?;

        Ok(Self {
            base_path: base_path.to_path_buf(),
            inner: Mutex::new(JournalInner::default()),
        })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, JournalInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start new session, ending the current one first
    pub fn start_session(&self, name: &str, source: &str) -> Result<String> {
        self.end_session()?;

        let session = JournalSession::new(name, source);
        let session_path = self.base_path.join(&session.id);

        create_dir_all(&session_path)
            .map_err(|e| EngineError::Journal(format!("Failed to create session dir: {}", e)))?;

        let payload_file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(session_path.join(PAYLOAD_FILE))
            .map_err(|e| EngineError::Journal(format!("Failed to create payload file: {}", e)))?;

        self.write_metadata(&session)?;

        let id = session.id.clone();
        let mut inner = self.lock();
        inner.writer = Some(BufWriter::new(payload_file));
        inner.session = Some(session);

        tracing::info!("Journal session started: {} ({})", name, id);

        Ok(id)
    }

    /// End current session
    pub fn end_session(&self) -> Result<Option<JournalSession>> {
        let (session, writer) = {
            let mut inner = self.lock();
            (inner.session.take(), inner.writer.take())
        };

        let Some(mut session) = session else {
            return Ok(None);
        };

        if let Some(mut writer) = writer {
            writer.flush().ok();
        }

        session.end();
        self.write_metadata(&session)?;

        tracing::info!(
            "Journal session ended: {} ({} payloads, {} alarms)",
            session.name,
            session.payload_count,
            session.alarm_count
        );

        Ok(Some(session))
    }

    pub fn current_session(&self) -> Option<JournalSession> {
        self.lock().session.clone()
    }

    /// Record a dispatched payload; no-op without an open session
    pub fn record(&self, payload: &AlarmPayload, report: &DispatchReport) -> Result<()> {
        let mut inner = self.lock();
        let JournalInner { session, writer } = &mut *inner;

        let (Some(session), Some(writer)) = (session.as_mut(), writer.as_mut()) else {
            return Ok(());
        };

        let entry = JournalEntry {
            recorded_at: Utc::now(),
            reset: report.kind == DispatchKind::Reset || payload.is_reset(),
            delivered: report.delivered.clone(),
            failed: report.failed.iter().map(|f| f.target).collect(),
            payload: payload.clone(),
        };

        let json = serde_json::to_string(&entry)?;
        writeln!(writer, "{}", json)
            .map_err(|e| EngineError::Journal(format!("Write error: {}", e)))?;
        writer
            .flush()
            .map_err(|e| EngineError::Journal(format!("Flush error: {}", e)))?;

        session.payload_count += 1;
        if !entry.reset {
            session.alarm_count += 1;
        }

        Ok(())
    }

    /// Add note to current session
    pub fn add_note(&self, note: &str) {
        if let Some(session) = self.lock().session.as_mut() {
            session.add_note(note);
        }
    }

    fn write_metadata(&self, session: &JournalSession) -> Result<()> {
        let path = self.base_path.join(&session.id).join(SESSION_FILE);
        let json = serde_json::to_string_pretty(session)?;

        std::fs::write(&path, json)
            .map_err(|e| EngineError::Journal(format!("Failed to write metadata: {}", e)))
    }

    /// List all sessions, newest first
    pub fn list_sessions(&self) -> Result<Vec<JournalSession>> {
        let mut sessions = Vec::new();

        let entries = std::fs::read_dir(&self.base_path)
            .map_err(|e| EngineError::Journal(format!("Read dir error: {}", e)))?;

        for entry in entries {
            let entry = entry.map_err(|e| EngineError::Journal(format!("Entry error: {}", e)))?;
            let metadata_path = entry.path().join(SESSION_FILE);
            if !metadata_path.exists() {
                continue;
            }

            let content = std::fs::read_to_string(&metadata_path)
                .map_err(|e| EngineError::Journal(format!("Read error: {}", e)))?;

            match serde_json::from_str::<JournalSession>(&content) {
                Ok(session) => sessions.push(session),
                Err(e) => tracing::debug!("Skipping unreadable session {:?}: {}", metadata_path, e),
            }
        }

        sessions.sort_by(|a, b| b.start_time.cmp(&a.start_time));

        Ok(sessions)
    }

    /// Load entries of a session, skipping lines that do not parse
    pub fn load_entries(&self, session_id: &str) -> Result<Vec<JournalEntry>> {
        let path = self.base_path.join(session_id).join(PAYLOAD_FILE);

        let file = File::open(&path)
            .map_err(|e| EngineError::Journal(format!("Open error: {}", e)))?;

        let mut entries = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line.map_err(|e| EngineError::Journal(format!("Read error: {}", e)))?;
            if line.trim().is_empty() {
                continue;
            }

            match serde_json::from_str::<JournalEntry>(&line) {
                Ok(entry) => entries.push(entry),
                Err(e) => tracing::debug!("Skipping journal line: {}", e),
            }
        }

        Ok(entries)
    }

    /// Export a session (metadata and entries) as one JSON document
    pub fn export_session(&self, session_id: &str, output_path: &Path) -> Result<()> {
        let metadata_path = self.base_path.join(session_id).join(SESSION_FILE);
        let content = std::fs::read_to_string(&metadata_path)
            .map_err(|e| EngineError::Journal(format!("Read error: {}", e)))?;
        let session: JournalSession = serde_json::from_str(&content)?;

        let export = SessionExport {
            session,
            entries: self.load_entries(session_id)?,
            exported_at: Utc::now(),
            version: "1.0".to_string(),
        };

        let json = serde_json::to_string_pretty(&export)?;
        std::fs::write(output_path, json)
            .map_err(|e| EngineError::Journal(format!("Write error: {}", e)))?;

        tracing::info!("Exported session {} to {:?}", session_id, output_path);

        Ok(())
    }
}

impl EngineObserver for EventJournal {
    fn on_payload(&self, payload: &AlarmPayload, report: &DispatchReport) {
        if let Err(e) = self.record(payload, report) {
            tracing::warn!("Failed to journal payload {}: {}", payload.event_id, e);
        }
    }

    fn on_status_changed(&self, active: bool) {
        self.add_note(if active { "Alarm raised" } else { "Alarm cleared" });
    }

    fn on_sabotage_changed(&self, active: bool, tripped: &[SensorId]) {
        if active {
            self.add_note(&format!("Sabotage on {:?}", tripped));
        } else {
            self.add_note("Sabotage cleared");
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct SessionExport {
    session: JournalSession,
    entries: Vec<JournalEntry>,
    exported_at: DateTime<Utc>,
    version: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("vigil-journal-{}-{}", name, std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn records_and_reloads_a_session() {
        let dir = scratch_dir("roundtrip");
        let journal = EventJournal::new(&dir).unwrap();

        // nothing is written without a session
        let reset = AlarmPayload::reset(1, "Engine", 10, false);
        journal.record(&reset, &DispatchReport::skipped()).unwrap();

        let id = journal.start_session("night", "Engine").unwrap();
        let mut alarm = AlarmPayload::reset(1, "Engine", 20, false);
        alarm.active_groups = vec!["Perimeter".to_string()];
        journal.on_payload(&alarm, &DispatchReport::skipped());
        journal.on_status_changed(true);
        journal.on_payload(&reset, &DispatchReport::skipped());

        let ended = journal.end_session().unwrap().unwrap();
        assert_eq!(ended.payload_count, 2);
        assert_eq!(ended.alarm_count, 1);
        assert_eq!(ended.notes.len(), 1);

        let sessions = journal.list_sessions().unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].id, id);

        let entries = journal.load_entries(&id).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].payload.active_groups, vec!["Perimeter".to_string()]);
        assert!(entries[1].reset);

        let export = dir.join("export.json");
        journal.export_session(&id, &export).unwrap();
        let exported: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&export).unwrap()).unwrap();
        assert_eq!(exported["entries"].as_array().unwrap().len(), 2);

        let _ = std::fs::remove_dir_all(&dir);
    }
}
