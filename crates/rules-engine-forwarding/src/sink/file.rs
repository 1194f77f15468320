// rules-engine-forwarding/src/sink/file.rs
// ============================================================================
// Module: File Sink
// Description: Append-only NDJSON sink for local debugging and audit trails.
// Purpose: Persist every published subject/payload pair without dispatching
//          it anywhere external.
// Dependencies: rules-engine-core, serde_json, std::fs
// ============================================================================

//! ## Overview
//! [`FileSink`] writes one JSON record per [`Publisher::publish`] call and
//! never fails the engine's point-processing loop for I/O errors it can't
//! recover from: an unwritable file surfaces as [`PublishError::Unavailable`],
//! which the action dispatcher already treats as a non-fatal, per-action
//! failure.

use std::fs::File;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use rules_engine_core::Clock;
use rules_engine_core::SystemClock;
use rules_engine_core::forward::PublishError;
use rules_engine_core::forward::Publisher;
use serde_json::json;

/// Append-only NDJSON sink: one `{subject, payload, published_at}` record
/// per publish.
pub struct FileSink {
    file: Mutex<File>,
    clock: Arc<dyn Clock>,
}

impl FileSink {
    /// Opens (creating if absent) `path` in append mode.
    ///
    /// # Errors
    ///
    /// Returns [`PublishError::Unavailable`] when the file cannot be opened.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, PublishError> {
        Self::open_with_clock(path, Arc::new(SystemClock))
    }

    /// Like [`Self::open`] but with an injectable clock, for deterministic
    /// tests.
    ///
    /// # Errors
    ///
    /// Returns [`PublishError::Unavailable`] when the file cannot be opened.
    pub fn open_with_clock(path: impl AsRef<Path>, clock: Arc<dyn Clock>) -> Result<Self, PublishError> {
        let file = OpenOptions::new().create(true).append(true).open(path.as_ref()).map_err(|err| PublishError::Unavailable {
            subject: path.as_ref().display().to_string(),
            message: err.to_string(),
        })?;
        Ok(Self { file: Mutex::new(file), clock })
    }
}

impl Publisher for FileSink {
    fn publish(&self, subject: &str, bytes: &[u8]) -> Result<(), PublishError> {
        let record = json!({
            "subject": subject,
            "payload": String::from_utf8_lossy(bytes),
            "published_at": self.clock.now_unix_secs(),
        });
        let mut guard = self.file.lock();
        serde_json::to_writer(&mut *guard, &record).map_err(|err| PublishError::Unavailable { subject: subject.to_string(), message: err.to_string() })?;
        guard.write_all(b"\n").map_err(|err| PublishError::Unavailable { subject: subject.to_string(), message: err.to_string() })
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    #[test]
    fn publish_appends_one_ndjson_line() {
        let dir = tempfile::tempdir().expect("tempdir creation never fails on a clean runner");
        let path = dir.path().join("out.ndjson");
        let sink = FileSink::open(&path).expect("file opens for append");

        sink.publish("transformed.d1.temperature", b"{\"value\":1}").expect("publish succeeds");
        sink.publish("transformed.d1.temperature", b"{\"value\":2}").expect("publish succeeds");

        let contents = fs::read_to_string(&path).expect("file is readable after publish");
        assert_eq!(contents.lines().count(), 2);
        assert!(contents.contains("transformed.d1.temperature"));
    }

    #[test]
    fn opening_an_unwritable_path_is_a_publish_error() {
        let result = FileSink::open("/nonexistent-directory-for-rules-engine-tests/out.ndjson");
        assert!(result.is_err());
    }
}
