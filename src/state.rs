use crate::error::StateStoreError;
use crate::timecode::serde_timecode;

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A frame that has been posted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRecord {
    pub episode: u32,
    #[serde(with = "serde_timecode")]
    pub offset: Duration,
    pub posted_at: DateTime<Utc>,
}

impl RunRecord {
    /// Offsets are kept with millisecond precision, the precision of the state file.
    pub fn new(episode: u32, offset: Duration, posted_at: DateTime<Utc>) -> Self {
        Self {
            episode,
            offset: Duration::from_millis(offset.as_millis() as u64),
            posted_at,
        }
    }

    fn key(&self) -> (u32, Duration) {
        (self.episode, self.offset)
    }
}

/// History of posted frames, backed by a JSON file.
#[derive(Debug)]
pub struct RunStateStore {
    path: PathBuf,
    records: BTreeMap<(u32, Duration), RunRecord>,
}

impl RunStateStore {
    /// Loads the history at `path`.
    ///
    /// A missing file is a fresh history. An unreadable or corrupt file is
    /// logged and treated as a fresh history as well; it gets replaced on the
    /// next [`persist`](Self::persist).
    pub fn load<P: Into<PathBuf>>(path: P) -> Self {
        let path = path.into();
        let records = match read_records(&path) {
            Ok(records) => records,
            Err(err) => {
                log::warn!("{}, starting with an empty history", describe(&err));
                Vec::new()
            }
        };
        let mut store = Self {
            path,
            records: BTreeMap::new(),
        };
        for record in records {
            store.append(record);
        }
        log::debug!(
            "Loaded {} run records from '{}'",
            store.len(),
            store.path.display()
        );
        store
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn records(&self) -> impl Iterator<Item = &RunRecord> {
        self.records.values()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn contains(&self, episode: u32, offset: Duration) -> bool {
        self.records.contains_key(&(episode, offset))
    }

    /// Offsets already posted from `episode`.
    pub fn offsets_for(&self, episode: u32) -> impl Iterator<Item = Duration> + '_ {
        self.records
            .range((episode, Duration::ZERO)..=(episode, Duration::MAX))
            .map(|(_, r)| r.offset)
    }

    /// Adds `record` unless a record for the same frame exists already.
    /// Returns whether it was added.
    pub fn append(&mut self, record: RunRecord) -> bool {
        let key = record.key();
        if self.records.contains_key(&key) {
            return false;
        }
        self.records.insert(key, record);
        true
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    /// Writes the full history back to disk, replacing the previous file in one
    /// step. Records are written in (episode, offset) order, so an unchanged
    /// history always produces the same bytes.
    pub fn persist(&self) -> Result<(), StateStoreError> {
        let write_err = |source| StateStoreError::Write {
            path: self.path.clone(),
            source,
        };

        let mut staged = StagedFile::create(&self.path).map_err(write_err)?;
        let records: Vec<&RunRecord> = self.records.values().collect();
        serde_json::to_writer_pretty(staged.writer(), &records)
            .map_err(|e| write_err(io::Error::new(io::ErrorKind::Other, e)))?;
        staged.writer().write_all(b"\n").map_err(write_err)?;
        staged.commit().map_err(write_err)?;

        log::debug!(
            "Persisted {} run records to '{}'",
            self.len(),
            self.path.display()
        );
        Ok(())
    }
}

fn describe(err: &StateStoreError) -> String {
    match std::error::Error::source(err) {
        Some(cause) => format!("{}: {}", err, cause),
        None => err.to_string(),
    }
}

fn read_records(path: &Path) -> Result<Vec<RunRecord>, StateStoreError> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => {
            return Err(StateStoreError::Read {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(&raw).map_err(|source| StateStoreError::Corrupt {
        path: path.to_path_buf(),
        source,
    })
}

/// A file written next to its final location and moved over it on
/// [`commit`](Self::commit). Dropping it uncommitted removes the partial file
/// and leaves the target untouched.
struct StagedFile {
    target: PathBuf,
    staging: PathBuf,
    writer: Option<BufWriter<File>>,
}

impl StagedFile {
    fn create(target: &Path) -> io::Result<Self> {
        if let Some(parent) = target.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let mut name = target
            .file_name()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "state path has no file name"))?
            .to_os_string();
        name.push(".tmp");
        let staging = target.with_file_name(name);
        let file = File::create(&staging)?;
        Ok(Self {
            target: target.to_path_buf(),
            staging,
            writer: Some(BufWriter::new(file)),
        })
    }

    fn writer(&mut self) -> &mut BufWriter<File> {
        self.writer
            .as_mut()
            .expect("the writer is only taken by commit, which consumes the file")
    }

    fn commit(mut self) -> io::Result<()> {
        if let Some(writer) = self.writer.take() {
            let file = writer.into_inner().map_err(|e| e.into_error())?;
            file.sync_all()?;
        }
        std::fs::rename(&self.staging, &self.target)?;
        // Nothing left to clean up.
        self.staging = PathBuf::new();
        Ok(())
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        if self.staging.as_os_str().is_empty() {
            return;
        }
        // Close before removing, Windows refuses to remove open files.
        drop(self.writer.take());
        if let Err(err) = std::fs::remove_file(&self.staging) {
            log::warn!(
                "Failed to remove staging file '{}': {}",
                self.staging.display(),
                err
            );
        }
    }
}
