//! Durable session records: one JSON file per thread.
//!
//! The store is a convenience cache — the agent server remains the durable
//! source of truth for conversation state — so callers decide how fatal a
//! store error is. Writes go through a temp file and rename, keeping a
//! record file either the old or the new version, never a torn one.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::debug;

use super::models::SessionRecord;

/// File-per-thread session persistence under one directory.
#[derive(Debug, Clone)]
pub struct SessionStore {
    dir: PathBuf,
}

impl SessionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Create the backing directory if needed.
    pub fn ensure_dir(&self) -> io::Result<()> {
        fs::create_dir_all(&self.dir)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, thread_id: &str) -> PathBuf {
        self.dir.join(format!("{thread_id}.json"))
    }

    /// Read a record. `Ok(None)` when no file exists; a file that cannot be
    /// read or parsed is an error for the caller to classify.
    pub fn load(&self, thread_id: &str) -> io::Result<Option<SessionRecord>> {
        let path = self.path_for(thread_id);
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err),
        };
        let record = serde_json::from_slice(&data)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
        debug!("loaded session file, thread_id={thread_id}");
        Ok(Some(record))
    }

    /// Write a record atomically. Only serialized fields reach the file.
    pub fn save(&self, record: &SessionRecord) -> io::Result<()> {
        self.ensure_dir()?;
        let path = self.path_for(&record.thread_id);
        let tmp = path.with_extension("json.tmp");

        let data = serde_json::to_vec_pretty(record)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
        fs::write(&tmp, data)?;
        fs::rename(&tmp, &path)?;
        debug!("saved session file, thread_id={}", record.thread_id);
        Ok(())
    }

    /// Delete a record's file. Deleting a nonexistent file is not an error.
    pub fn delete(&self, thread_id: &str) -> io::Result<()> {
        match fs::remove_file(self.path_for(thread_id)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err),
        }
    }
}
