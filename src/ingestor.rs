//! Ingestor: supervises one [`FileWatcher`] task per monitored file.
//!
//! The ingestor opens each file, spawns its watcher on a [`JoinSet`] and
//! keeps the sending half of the watcher's command channel. A watcher that
//! terminates on its own (a permanently unreadable file, or a panic) is
//! reported and logged; the remaining watchers keep running.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use logpond_core::{EventSink, FieldExtractor, IndexedFileConfig};
use logpond_feeds::{FileWatcher, WatcherCommand, WatcherError, WatcherExit};

/// Commands queued per watcher before `send` waits.
const COMMAND_BUFFER: usize = 8;

/// How a watcher task ended.
#[derive(Debug)]
pub enum WatcherReport {
    /// Returned normally after `Stop` or after its command channel closed.
    Exited(WatcherExit),
    /// Gave up on its source.
    Failed(WatcherError),
    /// Panicked or was aborted.
    Crashed(String),
}

/// Supervisor of the running watchers.
pub struct Ingestor<S> {
    extractor: Arc<FieldExtractor>,
    sink: S,
    watchers: JoinSet<Result<WatcherExit, WatcherError>>,
    commands: Vec<(String, mpsc::Sender<WatcherCommand>)>,
}

impl<S> Ingestor<S>
where
    S: EventSink + Clone,
{
    pub fn new(extractor: Arc<FieldExtractor>, sink: S) -> Self {
        Self {
            extractor,
            sink,
            watchers: JoinSet::new(),
            commands: Vec::new(),
        }
    }

    /// Open `file` and start tailing it from the beginning.
    pub async fn watch_file(&mut self, file: Arc<IndexedFileConfig>) -> anyhow::Result<()> {
        let source = tokio::fs::File::open(&file.filename)
            .await
            .with_context(|| format!("failed to open {}", file.filename))?;
        self.spawn_watcher(file, source);
        Ok(())
    }

    /// Start a watcher over an already-open source.
    pub fn spawn_watcher<R>(&mut self, file: Arc<IndexedFileConfig>, source: R)
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        info!(file = %file.filename, "starting file watcher");

        self.commands.push((file.filename.clone(), tx));
        let watcher = FileWatcher::new(file, rx, self.sink.clone(), self.extractor.clone(), source);
        self.watchers.spawn(watcher.run());
    }

    /// Number of watcher tasks not yet reaped.
    pub fn running(&self) -> usize {
        self.watchers.len()
    }

    /// Send `command` to the watcher of `filename`. Returns false when no
    /// such watcher is still listening.
    pub async fn send(&self, filename: &str, command: WatcherCommand) -> bool {
        for (name, tx) in &self.commands {
            if name == filename && tx.send(command).await.is_ok() {
                return true;
            }
        }
        false
    }

    /// Send `command` to every watcher still listening.
    pub async fn broadcast(&self, command: WatcherCommand) {
        for (_, tx) in &self.commands {
            let _ = tx.send(command).await;
        }
    }

    /// Wait for the next watcher to terminate and log how it ended.
    ///
    /// Returns `None` once no watcher is left.
    pub async fn next_exit(&mut self) -> Option<WatcherReport> {
        let joined = self.watchers.join_next().await?;
        Some(report(joined))
    }

    /// Stop every watcher and wait up to `timeout` for them to finish;
    /// watchers still running after that are aborted.
    pub async fn stop(mut self, timeout: Duration) -> Vec<WatcherReport> {
        self.broadcast(WatcherCommand::Stop).await;
        self.commands.clear();

        let deadline = tokio::time::Instant::now() + timeout;
        let mut reports = Vec::with_capacity(self.watchers.len());
        loop {
            match tokio::time::timeout_at(deadline, self.watchers.join_next()).await {
                Ok(Some(joined)) => reports.push(report(joined)),
                Ok(None) => break,
                Err(_) => {
                    warn!(
                        remaining = self.watchers.len(),
                        "watchers did not stop in time, aborting"
                    );
                    self.watchers.abort_all();
                    while let Some(joined) = self.watchers.join_next().await {
                        reports.push(report(joined));
                    }
                    break;
                }
            }
        }
        reports
    }
}

fn report(
    joined: Result<Result<WatcherExit, WatcherError>, tokio::task::JoinError>,
) -> WatcherReport {
    match joined {
        Ok(Ok(exit)) => {
            info!(
                file = %exit.filename,
                reason = ?exit.reason,
                offset = exit.state.offset,
                events = exit.published,
                "file watcher exited"
            );
            WatcherReport::Exited(exit)
        }
        Ok(Err(err)) => {
            error!(error = %err, "file watcher terminated");
            WatcherReport::Failed(err)
        }
        Err(err) => {
            error!(error = %err, "file watcher task crashed");
            WatcherReport::Crashed(err.to_string())
        }
    }
}
