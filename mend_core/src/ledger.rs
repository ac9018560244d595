//! Append-only ledger of record ids.
//!
//! Every id the store hands out is appended to a JSONL (JSON Lines) file under
//! an exclusive file lock, and purges are appended as tombstones. Nothing is
//! ever removed from the ledger, which is what keeps ids from being reissued
//! after a record is deleted.
//!
//! Each `IdLedger` remembers the ids it has already read and how far into the
//! file it got. Under the lock it only reads what other handles (or other
//! processes) appended since.

use crate::Result;
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use uuid::Uuid;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LedgerEvent {
    Issued,
    Purged,
}

/// One line of the ledger
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct LedgerEntry {
    pub id: Uuid,
    pub event: LedgerEvent,
    pub at: DateTime<Utc>,
}

/// Ids folded in from the file so far
#[derive(Default)]
struct Known {
    /// Always at a line boundary
    offset: u64,
    ids: HashSet<Uuid>,
    /// Lines that failed to parse; a torn write can still name an id
    fragments: Vec<String>,
}

impl Known {
    fn contains(&self, id: Uuid, tail: Option<&str>) -> bool {
        if self.ids.contains(&id) {
            return true;
        }
        let text = id.to_string();
        self.fragments
            .iter()
            .map(String::as_str)
            .chain(tail)
            .any(|fragment| fragment.contains(&text))
    }

    /// Read complete lines past `offset`. Returns an unterminated last line.
    fn catch_up(&mut self, file: &File) -> Result<Option<String>> {
        if file.metadata()?.len() < self.offset {
            tracing::warn!("Id ledger shrank since it was last read; rescanning");
            *self = Known::default();
        }

        let mut reader = BufReader::new(file);
        reader.seek(SeekFrom::Start(self.offset))?;
        let mut line = String::new();

        loop {
            line.clear();
            let read = reader.read_line(&mut line)?;
            if read == 0 {
                return Ok(None);
            }
            if !line.ends_with('\n') {
                // Re-read once a later append terminates it
                return Ok(Some(line.trim().to_string()).filter(|t| !t.is_empty()));
            }
            self.offset += read as u64;

            let text = line.trim();
            if text.is_empty() {
                continue;
            }
            match serde_json::from_str::<LedgerEntry>(text) {
                Ok(entry) => {
                    self.ids.insert(entry.id);
                }
                Err(e) => {
                    tracing::warn!("Unreadable id ledger line: {}", e);
                    self.fragments.push(text.to_string());
                }
            }
        }
    }
}

/// JSONL-backed id ledger with file locking
pub struct IdLedger {
    path: PathBuf,
    known: Mutex<Known>,
}

impl IdLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            known: Mutex::new(Known::default()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn ensure_parent_dir(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(())
    }

    /// Run `f` with the ledger exclusively locked and `known` caught up
    fn locked<T>(
        &self,
        f: impl FnOnce(&File, &mut Known, Option<String>) -> Result<T>,
    ) -> Result<T> {
        self.ensure_parent_dir()?;

        let mut known = self.known.lock().unwrap_or_else(PoisonError::into_inner);
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.path)?;
        file.lock_exclusive()?;

        let result = known
            .catch_up(&file)
            .and_then(|tail| f(&file, &mut *known, tail));

        file.unlock()?;
        result
    }

    /// Record `id` as issued unless it has ever been issued before.
    ///
    /// The check and the append happen under one exclusive lock, so two
    /// processes can never both claim the same id.
    pub fn reserve(&self, id: Uuid, at: DateTime<Utc>) -> Result<bool> {
        let issued = self.locked(|file, known, tail| {
            if known.contains(id, tail.as_deref()) {
                return Ok(false);
            }
            let entry = LedgerEntry {
                id,
                event: LedgerEvent::Issued,
                at,
            };
            write_entry(file, &entry, tail.is_some())?;
            Ok(true)
        })?;

        if issued {
            tracing::debug!("Issued record id {}", id);
        }
        Ok(issued)
    }

    /// Append a tombstone for a purged record.
    pub fn record_purge(&self, id: Uuid, at: DateTime<Utc>) -> Result<()> {
        self.locked(|file, _, tail| {
            let entry = LedgerEntry {
                id,
                event: LedgerEvent::Purged,
                at,
            };
            write_entry(file, &entry, tail.is_some())
        })?;
        tracing::debug!("Recorded purge of {} in ledger", id);
        Ok(())
    }
}

fn write_entry(file: &File, entry: &LedgerEntry, torn_tail: bool) -> Result<()> {
    let mut writer = std::io::BufWriter::new(file);
    if torn_tail {
        // Start on a fresh line so the torn fragment stays isolated
        writer.write_all(b"\n")?;
    }
    let line = serde_json::to_string(entry)?;
    writer.write_all(line.as_bytes())?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    Ok(())
}
