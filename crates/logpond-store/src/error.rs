use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(
        "store {0} is locked by another writer (remove the LOCK file if no other logpond process is running)"
    )]
    Locked(PathBuf),

    #[error("corrupt segment {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("write task failed: {0}")]
    Task(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;
