//! File-backed recorder.
//!
//! Every committed transaction is appended as one JSON line to
//! `<base_dir>/transactions.jsonl` and synced before the commit returns.
//! Opening a recorder replays the log into memory.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use uuid::Uuid;

use crate::error::StoreError;
use crate::event::{Notification, StoredEvent};
use crate::recorder::{
    DeadLetter, EventQuery, Ledger, Recorder, Transaction, TransactionRecord, lock,
};

const LOG_FILE: &str = "transactions.jsonl";

#[derive(Debug)]
struct LogFile {
    ledger: Ledger,
    file: File,
    /// Length of the file up to the last complete line.
    len: u64,
}

/// A durable recorder writing a JSON-lines transaction log.
///
/// ```text
/// <base_dir>/
///     transactions.jsonl   -- one committed transaction per line
/// ```
#[derive(Debug)]
pub struct FileRecorder {
    path: PathBuf,
    log: Mutex<LogFile>,
}

impl FileRecorder {
    /// Open (or create) the transaction log under `base_dir`.
    ///
    /// A trailing line left incomplete by a crash is logged and truncated.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::StorageUnavailable`] if the directory cannot be
    /// created, the log cannot be read, or a line other than the last is
    /// corrupt.
    pub fn open(base_dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let base_dir = base_dir.as_ref();
        fs::create_dir_all(base_dir)?;
        let path = base_dir.join(LOG_FILE);

        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };

        let mut ledger = Ledger::default();
        let mut valid_len = 0usize;
        let mut transactions = 0usize;
        let mut lines = bytes.split_inclusive(|b| *b == b'\n').peekable();
        while let Some(line) = lines.next() {
            let complete = line.ends_with(b"\n");
            let body = line.strip_suffix(b"\n").unwrap_or(line);
            if body.iter().all(u8::is_ascii_whitespace) && complete {
                valid_len += line.len();
                continue;
            }
            let is_last = lines.peek().is_none();
            match serde_json::from_slice::<TransactionRecord>(body) {
                Ok(record) if complete => {
                    ledger.apply(record);
                    valid_len += line.len();
                    transactions += 1;
                }
                Err(e) if !is_last => {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("corrupt transaction log {}: {e}", path.display()),
                    )
                    .into());
                }
                // Only the last line can lack its newline.
                _ => {
                    tracing::warn!(
                        path = %path.display(),
                        bytes = line.len(),
                        "ignoring torn trailing line in transaction log"
                    );
                    break;
                }
            }
        }

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let len = valid_len as u64;
        if len < bytes.len() as u64 {
            file.set_len(len)?;
        }

        tracing::info!(path = %path.display(), transactions, "transaction log opened");

        Ok(Self {
            path,
            log: Mutex::new(LogFile { ledger, file, len }),
        })
    }

    /// Path of the transaction log file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Recorder for FileRecorder {
    fn commit(&self, tx: Transaction) -> Result<Vec<u64>, StoreError> {
        let mut log = lock(&self.log)?;
        let record = log.ledger.prepare(tx)?;

        let mut line = serde_json::to_vec(&record).map_err(io::Error::from)?;
        line.push(b'\n');

        let written = log.file.write_all(&line).and_then(|()| log.file.sync_data());
        if let Err(e) = written {
            // Drop any partial line so the next append starts clean.
            let len = log.len;
            if let Err(truncate) = log.file.set_len(len) {
                tracing::error!(
                    path = %self.path.display(),
                    error = %truncate,
                    "failed to truncate partial transaction line"
                );
            }
            return Err(e.into());
        }
        log.len += line.len() as u64;

        Ok(log.ledger.apply(record))
    }

    fn read(&self, originator_id: Uuid, query: &EventQuery) -> Result<Vec<StoredEvent>, StoreError> {
        Ok(lock(&self.log)?.ledger.read(originator_id, query))
    }

    fn owner(&self, originator_id: Uuid) -> Result<Option<String>, StoreError> {
        Ok(lock(&self.log)?.ledger.owner(originator_id))
    }

    fn next_position(&self, application: &str) -> Result<u64, StoreError> {
        Ok(lock(&self.log)?.ledger.next_position(application))
    }

    fn notifications(
        &self,
        application: &str,
        start: u64,
        limit: usize,
    ) -> Result<Vec<Notification>, StoreError> {
        Ok(lock(&self.log)?.ledger.notifications(application, start, limit))
    }

    fn last_tracked(&self, application: &str, upstream: &str) -> Result<Option<u64>, StoreError> {
        Ok(lock(&self.log)?.ledger.last_tracked(application, upstream))
    }

    fn dead_letters(&self, application: &str) -> Result<Vec<DeadLetter>, StoreError> {
        Ok(lock(&self.log)?.ledger.dead_letters(application))
    }
}
