//! Audit sink: every event goes to `tracing`, and optionally to a JSONL file.

use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use tessera_core::audit::AuditEvent;

#[derive(Default)]
pub struct AuditLog {
    file: Option<Mutex<std::fs::File>>,
}

impl AuditLog {
    /// Log to `tracing` only.
    pub fn tracing_only() -> Self {
        Self::default()
    }

    /// Also append JSON lines to `path`.
    pub fn open(path: &Path) -> std::io::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        Ok(Self {
            file: Some(Mutex::new(file)),
        })
    }

    pub fn record(&self, event: AuditEvent) {
        let json = match serde_json::to_string(&event) {
            Ok(json) => json,
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize audit event");
                return;
            }
        };
        tracing::info!(target: "tessera::audit", action = ?event.action, event = %json, "audit");

        if let Some(file) = &self.file {
            let Ok(mut file) = file.lock() else {
                tracing::error!("Audit log lock poisoned");
                return;
            };
            if let Err(e) = writeln!(file, "{json}") {
                tracing::error!(error = %e, "Failed to append audit event");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_core::audit::{AuditAction, AuditTarget};

    #[test]
    fn test_events_appended_as_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs/audit.jsonl");
        let log = AuditLog::open(&path).unwrap();

        log.record(AuditEvent::new(AuditAction::JanitorSwept, AuditTarget::Store));
        log.record(
            AuditEvent::new(AuditAction::Deleted, AuditTarget::Prefix("ab".into()))
                .with_metadata("count", "2"),
        );

        let content = std::fs::read_to_string(&path).unwrap();
        let events: Vec<AuditEvent> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].action, AuditAction::Deleted);
        assert_eq!(events[1].metadata["count"], "2");
    }
}
