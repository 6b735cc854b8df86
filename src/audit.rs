//! Append-only audit sink.
//!
//! One summary record is written per completed request, as a JSON line
//! appended to `~/.tandem/audit.jsonl`. Writes happen on a dedicated
//! thread behind an unbounded channel: recording never blocks the
//! coordination loop, and a failed write never fails the request.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::thread::JoinHandle;
use std::time::Duration;

use chrono::{DateTime, Utc};
use crossbeam_channel::Sender;
use serde::{Deserialize, Serialize};

use crate::core::outcome::{FinalOutcome, OverallStatus};
use crate::orchestration::RequestId;
use crate::{tlog_debug, tlog_warn};

/// Summary of one completed request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub timestamp: DateTime<Utc>,
    pub request_id: RequestId,
    pub status: OverallStatus,
    pub tasks_total: usize,
    pub tasks_succeeded: usize,
    pub tasks_failed: usize,
    pub tasks_skipped: usize,
    pub conflicts: usize,
    pub duration_ms: u64,
}

impl AuditRecord {
    /// Build a record summarizing a finished request.
    pub fn for_outcome(request_id: RequestId, outcome: &FinalOutcome, duration: Duration) -> Self {
        Self {
            timestamp: Utc::now(),
            request_id,
            status: outcome.status,
            tasks_total: outcome.task_count(),
            tasks_succeeded: outcome.succeeded_count(),
            tasks_failed: outcome.failed_count(),
            tasks_skipped: outcome.skipped_count(),
            conflicts: outcome.conflicts.len(),
            duration_ms: duration.as_millis() as u64,
        }
    }
}

/// Fire-and-forget writer for audit records.
///
/// `record` enqueues and returns immediately. `close` drains the queue
/// and joins the writer thread, which tests use to observe the file
/// deterministically.
pub struct AuditSink {
    tx: Option<Sender<AuditRecord>>,
    handle: Option<JoinHandle<()>>,
}

impl AuditSink {
    /// Open a sink appending to the given path.
    ///
    /// The writer thread opens the file once; if that fails, every
    /// record is silently dropped.
    pub fn open(path: &Path) -> Self {
        let (tx, rx) = crossbeam_channel::unbounded::<AuditRecord>();
        let path = path.to_path_buf();

        let handle = std::thread::spawn(move || {
            let mut file = match OpenOptions::new().create(true).append(true).open(&path) {
                Ok(file) => file,
                Err(e) => {
                    tlog_warn!("[audit] Cannot open {}: {}", path.display(), e);
                    return;
                }
            };

            for record in rx {
                let line = match serde_json::to_string(&record) {
                    Ok(line) => line,
                    Err(e) => {
                        tlog_warn!("[audit] Cannot serialize record: {}", e);
                        continue;
                    }
                };
                if let Err(e) = writeln!(file, "{}", line) {
                    tlog_warn!("[audit] Write failed: {}", e);
                    continue;
                }
                let _ = file.flush();
                tlog_debug!("[audit] Recorded request {}", record.request_id);
            }
        });

        Self {
            tx: Some(tx),
            handle: Some(handle),
        }
    }

    /// Create a sink that discards everything.
    pub fn disabled() -> Self {
        Self {
            tx: None,
            handle: None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.tx.is_some()
    }

    /// Enqueue a record. Never blocks, never fails.
    pub fn record(&self, record: AuditRecord) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(record);
        }
    }

    /// Drain pending records and join the writer thread.
    pub fn close(mut self) {
        self.tx.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
