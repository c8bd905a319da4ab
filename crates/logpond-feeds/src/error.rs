use thiserror::Error;

/// Reasons a watcher terminates on its own.
///
/// Only the watcher that hit the error stops; the supervisor reports the
/// termination and every other watcher keeps running.
#[derive(Error, Debug)]
pub enum WatcherError {
    #[error("source for {filename} is no longer readable at offset {offset}: {source}")]
    SourceClosed {
        filename: String,
        offset: u64,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, WatcherError>;
