//! File watcher: tails one file and publishes every complete event in it.
//!
//! A [`FileWatcher`] owns an already-open byte source for its file. On every
//! poll tick it reads whatever was appended since the last tick, appends it
//! to the pending remainder of the previous tick and splits the result on
//! the file's delimiter. Each terminated span is run through the field
//! extractor and handed to the sink straight away; the unterminated tail
//! stays pending until a later tick completes it, so an event is never cut
//! at a read boundary.
//!
//! Control is cooperative. [`WatcherCommand`]s arrive on a per-watcher
//! channel and are looked at only between reads: a read in progress always
//! finishes before a `Stop` takes effect. Dropping every sender has the same
//! effect as `Stop`.
//!
//! The unterminated tail is bounded by `max_event_bytes`. Once it grows past
//! that (a file that never contains its delimiter, say) it is emitted as one
//! event and a warning is logged.
//!
//! Rotation and truncation are not detected. The offset only ever grows and
//! is not persisted, so a restart reads the file from the start again.

use chrono::Utc;
use std::io;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, trace, warn};

use logpond_core::{EventSink, FieldExtractor, IndexedFileConfig, RawEvent};

use crate::error::{Result, WatcherError};
use crate::split::split_events;

/// Control messages accepted by a running watcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherCommand {
    Stop,
    /// Stop reading until `Resume`; the watcher keeps ticking.
    Pause,
    Resume,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Running,
    Paused,
    Stopped,
}

/// Progress of a watcher through its file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatcherState {
    /// Bytes consumed from the source, including the pending remainder.
    pub offset: u64,
    /// Trailing bytes not yet terminated by a delimiter.
    pub pending: Vec<u8>,
    pub run_state: RunState,
}

impl WatcherState {
    fn new() -> Self {
        Self {
            offset: 0,
            pending: Vec::new(),
            run_state: RunState::Running,
        }
    }
}

/// Why a watcher returned normally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// A `Stop` command was received.
    Stopped,
    /// Every command sender was dropped.
    CommandsClosed,
}

/// Final report of a watcher that shut down cleanly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatcherExit {
    pub filename: String,
    pub reason: ExitReason,
    pub state: WatcherState,
    /// Events handed to the sink over the watcher's lifetime.
    pub published: u64,
}

/// Tails a single file. See the module docs.
pub struct FileWatcher<R, S> {
    config: Arc<IndexedFileConfig>,
    extractor: Arc<FieldExtractor>,
    commands: mpsc::Receiver<WatcherCommand>,
    sink: S,
    source: R,
    state: WatcherState,
    published: u64,
    read_buf: Vec<u8>,
}

impl<R, S> FileWatcher<R, S>
where
    R: AsyncRead + Unpin + Send,
    S: EventSink,
{
    pub fn new(
        config: Arc<IndexedFileConfig>,
        commands: mpsc::Receiver<WatcherCommand>,
        sink: S,
        extractor: Arc<FieldExtractor>,
        source: R,
    ) -> Self {
        Self {
            config,
            extractor,
            commands,
            sink,
            source,
            state: WatcherState::new(),
            published: 0,
            read_buf: Vec::new(),
        }
    }

    pub fn state(&self) -> &WatcherState {
        &self.state
    }

    /// Run until stopped or until the source fails permanently.
    ///
    /// Transient read errors are logged and retried on the next tick. A
    /// non-transient error, or more than `max_consecutive_read_errors`
    /// transient ones in a row, ends the watcher with
    /// [`WatcherError::SourceClosed`]. The source is dropped on return.
    pub async fn run(mut self) -> Result<WatcherExit> {
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut consecutive_errors = 0u32;

        info!(file = %self.config.filename, "watcher started");

        loop {
            tokio::select! {
                biased;
                command = self.commands.recv() => match command {
                    Some(WatcherCommand::Stop) => return Ok(self.exit(ExitReason::Stopped)),
                    Some(command) => {
                        self.apply(command);
                        continue;
                    }
                    None => return Ok(self.exit(ExitReason::CommandsClosed)),
                },
                _ = ticker.tick() => {}
            }

            if self.state.run_state == RunState::Paused {
                continue;
            }

            match self.poll_once().await {
                Ok(published) => {
                    consecutive_errors = 0;
                    if published > 0 {
                        debug!(
                            file = %self.config.filename,
                            offset = self.state.offset,
                            events = published,
                            "published events"
                        );
                    }
                }
                Err(err) => {
                    consecutive_errors += 1;
                    if is_transient(&err)
                        && consecutive_errors <= self.config.max_consecutive_read_errors
                    {
                        warn!(
                            file = %self.config.filename,
                            offset = self.state.offset,
                            attempt = consecutive_errors,
                            error = %err,
                            "read failed, retrying next tick"
                        );
                        continue;
                    }
                    error!(
                        file = %self.config.filename,
                        offset = self.state.offset,
                        error = %err,
                        "source unreadable, watcher terminating"
                    );
                    return Err(WatcherError::SourceClosed {
                        filename: self.config.filename.clone(),
                        offset: self.state.offset,
                        source: err,
                    });
                }
            }
        }
    }

    fn apply(&mut self, command: WatcherCommand) {
        let next = match command {
            WatcherCommand::Pause => RunState::Paused,
            WatcherCommand::Resume => RunState::Running,
            WatcherCommand::Stop => RunState::Stopped,
        };
        if next != self.state.run_state {
            debug!(file = %self.config.filename, from = ?self.state.run_state, to = ?next, "watcher state change");
            self.state.run_state = next;
        }
    }

    fn exit(mut self, reason: ExitReason) -> WatcherExit {
        self.state.run_state = RunState::Stopped;
        info!(
            file = %self.config.filename,
            offset = self.state.offset,
            published = self.published,
            ?reason,
            "watcher stopped"
        );
        WatcherExit {
            filename: self.config.filename.clone(),
            reason,
            state: self.state,
            published: self.published,
        }
    }

    /// Read everything appended since the last tick (up to
    /// `max_read_bytes`) and publish the events it completes.
    ///
    /// Bytes read before an error are still consumed, so they are neither
    /// lost nor read twice.
    async fn poll_once(&mut self) -> io::Result<usize> {
        self.read_buf.clear();
        let limit = self.config.max_read_bytes as u64;
        let result = (&mut self.source)
            .take(limit)
            .read_to_end(&mut self.read_buf)
            .await;

        let published = if self.read_buf.is_empty() {
            0
        } else {
            self.consume_read().await
        };
        result.map(|_| published)
    }

    async fn consume_read(&mut self) -> usize {
        let read_at = Utc::now();
        self.state.offset += self.read_buf.len() as u64;
        self.state.pending.extend_from_slice(&self.read_buf);

        let (mut texts, consumed) = {
            let split = split_events(&self.config.delimiter, &self.state.pending);
            let texts: Vec<String> = split
                .events
                .iter()
                .filter(|span| !span.is_empty())
                .map(|span| String::from_utf8_lossy(span).into_owned())
                .collect();
            (texts, split.consumed)
        };
        self.state.pending.drain(..consumed);

        if self.state.pending.len() > self.config.max_event_bytes {
            warn!(
                file = %self.config.filename,
                offset = self.state.offset,
                pending = self.state.pending.len(),
                limit = self.config.max_event_bytes,
                "no delimiter within max_event_bytes, emitting pending bytes as one event"
            );
            let oversize = std::mem::take(&mut self.state.pending);
            texts.push(String::from_utf8_lossy(&oversize).into_owned());
        }
        trace!(
            file = %self.config.filename,
            read = self.read_buf.len(),
            pending = self.state.pending.len(),
            "read tick"
        );

        let count = texts.len();
        for text in texts {
            let raw = RawEvent::new(text, self.config.filename.as_str(), read_at);
            let event = self.extractor.extract(raw, &self.config.time_layout);
            self.sink.publish(event).await;
        }
        self.published += count as u64;
        count
    }
}

/// Errors worth retrying on the next tick.
pub fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::TimedOut
            | io::ErrorKind::NotFound
            | io::ErrorKind::PermissionDenied
            | io::ErrorKind::UnexpectedEof
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
