use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FramebotError {
    #[error("{0}")]
    Parse(#[from] ParseError),
    #[error("no eligible frame left in {duration:?} with an exclusion window of {window:?}")]
    NoEligibleFrame { duration: Duration, window: Duration },
    #[error(transparent)]
    StateStore(#[from] StateStoreError),
    #[error("invalid timecode '{0}'")]
    Timecode(String),
    #[error("invalid configuration: {0}")]
    Config(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("malformed subtitle data: {0}")]
    Malformed(String),
    #[error("entry {entry} ends before it starts")]
    EndBeforeStart { entry: usize },
    #[error("entry {entry} starts before the entry preceding it")]
    OutOfOrder { entry: usize },
    #[error("entry {entry} overlaps the entry preceding it")]
    Overlap { entry: usize },
}

#[derive(Debug, Error)]
pub enum StateStoreError {
    #[error("failed to read run state at '{}'", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("run state at '{}' is corrupt", path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to write run state to '{}'", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
