use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::io::Write;
use std::sync::Mutex;

/// Sentinel replacing the value of any sensitive metadata key.
pub const REDACTED: &str = "***REDACTED***";

const SENSITIVE_KEYS: [&str; 4] = ["api_key", "password", "token", "secret"];

/// One audit record, serialized as a single JSON line.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub tenant_id: String,
    pub actor_id: String,
    /// Method + path.
    pub action: String,
    pub resource: String,
    pub status: u16,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

/// Redacts any metadata value whose key, lowercased, contains a sensitive
/// substring. Runs before serialization so the original value never reaches
/// the sink.
pub fn redact_metadata(metadata: &mut Map<String, Value>) {
    for (key, value) in metadata.iter_mut() {
        let lower = key.to_lowercase();
        if SENSITIVE_KEYS.iter().any(|s| lower.contains(s)) {
            *value = Value::String(REDACTED.to_string());
        }
    }
}

/// Writes audit entries to a line-oriented byte sink, one JSON object per
/// line, newline-terminated. Writes are best-effort: failures are reported
/// to the diagnostic log and the pipeline continues.
pub struct AuditLogger {
    sink: Mutex<Box<dyn Write + Send>>,
}

impl AuditLogger {
    pub fn new(sink: Box<dyn Write + Send>) -> Self {
        Self {
            sink: Mutex::new(sink),
        }
    }

    pub fn stdout() -> Self {
        Self::new(Box::new(std::io::stdout()))
    }

    pub fn log(&self, mut entry: AuditEntry) {
        redact_metadata(&mut entry.metadata);

        let line = match serde_json::to_string(&entry) {
            Ok(line) => line,
            Err(e) => {
                tracing::error!(error = %e, "audit entry serialization failed");
                return;
            }
        };

        let mut sink = self.sink.lock().expect("audit sink lock poisoned");
        if let Err(e) = writeln!(sink, "{}", line) {
            tracing::error!(error = %e, "audit sink write failed");
        }
    }
}
