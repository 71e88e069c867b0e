//! The read loop behind a [`Tail`](crate::Tail).
//!
//! One engine runs per tail on its own task. It reads lines from a buffered
//! reader until the end of the data, then blocks on the watcher's change
//! signals and either resumes reading the same file or reopens the path.
//! A partial line at the end of the data is never delivered while following:
//! the reader is rewound to the start of the fragment and it is read again
//! once its terminator has been written.

use crate::changes::{Change, ChangeNotifier};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::lifecycle::Lifecycle;
use crate::line::Line;
use crate::watch::{FileId, FileWatcher, Watcher};
use std::io::SeekFrom;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, BufReader};
use tokio::sync::mpsc;

/// Position of the engine in the current file, shared with [`Tail::tell`](crate::Tail::tell).
#[derive(Debug, Default)]
pub(crate) struct Cursor {
    /// Bytes consumed from the open file, excluding anything still buffered.
    offset: u64,
    /// A second handle on the open file, used to bound the offset by its size.
    file: Option<std::fs::File>,
    pipe: bool,
}

pub(crate) type SharedCursor = Arc<Mutex<Cursor>>;

impl Cursor {
    pub(crate) fn new(pipe: bool) -> Self {
        Self {
            pipe,
            ..Self::default()
        }
    }

    pub(crate) fn tell(&self) -> u64 {
        match &self.file {
            None => 0,
            Some(_) if self.pipe => self.offset,
            Some(file) => file
                .metadata()
                .map_or(self.offset, |metadata| self.offset.min(metadata.len())),
        }
    }

    /// Identity of the open file, used to tell it apart from a replacement at the same path.
    fn file_id(&self) -> Option<FileId> {
        self.file.as_ref().and_then(FileId::of)
    }
}

pub(crate) fn lock_cursor(cursor: &SharedCursor) -> MutexGuard<'_, Cursor> {
    cursor.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Opening,
    Reading,
    AwaitingChange,
    Reopening,
    Terminated,
}

enum ReadOutcome {
    /// A complete line, terminator stripped.
    Line(Vec<u8>),
    /// End of data, with whatever followed the last terminator.
    Eof(Vec<u8>),
}

pub(crate) struct Engine {
    path: PathBuf,
    config: Config,
    watcher: Watcher,
    lifecycle: Lifecycle,
    lines: mpsc::Sender<Line>,
    cursor: SharedCursor,
    reader: Option<BufReader<File>>,
    changes: Option<ChangeNotifier>,
    // Unterminated bytes already taken out of a named pipe.
    partial: Vec<u8>,
}

impl Engine {
    pub(crate) fn new(
        path: PathBuf,
        config: Config,
        watcher: Watcher,
        lifecycle: Lifecycle,
        lines: mpsc::Sender<Line>,
        cursor: SharedCursor,
    ) -> Self {
        Self {
            path,
            config,
            watcher,
            lifecycle,
            lines,
            cursor,
            reader: None,
            changes: None,
            partial: Vec::new(),
        }
    }

    /// Runs the loop to completion. `file` is the already opened file when it
    /// had to exist at start.
    pub(crate) async fn run(mut self, file: Option<File>) {
        let lifecycle = self.lifecycle.clone();
        tracing::debug!(path = %self.path.display(), "tail started");

        match self.tail(file).await {
            Ok(()) => {}
            Err(Error::Stop) => {
                tracing::debug!(path = %self.path.display(), "file removed, tail stopped");
            }
            Err(e) => {
                tracing::warn!(path = %self.path.display(), err = %e, "tail failed");
                lifecycle.kill(Some(e));
            }
        }

        self.close_file();
        // Dropping the engine closes the line channel before waiters are released.
        drop(self);
        lifecycle.finish();
    }

    async fn tail(&mut self, file: Option<File>) -> Result<()> {
        let mut state = match file {
            Some(file) => {
                self.open_reader(file).await?;
                self.seek_initial().await?;
                State::Reading
            }
            None => State::Opening,
        };

        loop {
            state = match state {
                State::Opening => match self.reopen().await? {
                    State::Reading => {
                        self.seek_initial().await?;
                        State::Reading
                    }
                    state => state,
                },
                State::Reading => self.read().await?,
                State::AwaitingChange => self.wait_for_changes().await?,
                State::Reopening => self.reopen().await?,
                State::Terminated => return Ok(()),
            };

            if self.lifecycle.is_dying() {
                return Ok(());
            }
        }
    }

    /// Closes the current file and opens the path again, waiting for it to exist.
    /// Terminates instead if the tail is stopped while waiting.
    async fn reopen(&mut self) -> Result<State> {
        self.close_file();
        loop {
            match File::open(&self.path).await {
                Ok(file) => {
                    self.open_reader(file).await?;
                    return Ok(State::Reading);
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    tracing::debug!(path = %self.path.display(), "waiting for file to appear");
                    match self.watcher.block_until_exists(&self.lifecycle).await {
                        Ok(()) => {}
                        Err(Error::Stop) => return Ok(State::Terminated),
                        Err(e) => return Err(e),
                    }
                }
                Err(e) => return Err(Error::file_open(self.path.display(), e)),
            }
        }
    }

    async fn open_reader(&mut self, file: File) -> Result<()> {
        let file = file.into_std().await;
        let shadow = file
            .try_clone()
            .map_err(|e| Error::file_open(self.path.display(), e))?;

        {
            let mut cursor = lock_cursor(&self.cursor);
            cursor.offset = 0;
            cursor.file = Some(shadow);
        }
        self.reader = Some(BufReader::new(File::from_std(file)));
        self.partial.clear();
        Ok(())
    }

    fn close_file(&mut self) {
        self.changes = None;
        self.reader = None;
        let mut cursor = lock_cursor(&self.cursor);
        cursor.offset = 0;
        cursor.file = None;
    }

    /// Applies the configured start position. Only done on the first open.
    async fn seek_initial(&mut self) -> Result<()> {
        let Some(location) = self.config.location else {
            return Ok(());
        };
        let target = location
            .to_seek_from()
            .map_err(|e| Error::seek(self.path.display(), e))?;
        self.seek(target).await
    }

    // The buffered reader drops its buffer on seek, keeping it in step with the file.
    async fn seek(&mut self, target: SeekFrom) -> Result<()> {
        let reader = self.reader.as_mut().ok_or_else(|| no_file(&self.path))?;
        let offset = reader
            .seek(target)
            .await
            .map_err(|e| Error::seek(self.path.display(), e))?;
        lock_cursor(&self.cursor).offset = offset;
        Ok(())
    }

    fn offset(&self) -> u64 {
        lock_cursor(&self.cursor).offset
    }

    async fn read(&mut self) -> Result<State> {
        // Where the line starts, in case it has to be read again.
        let start = (!self.config.pipe).then(|| self.offset());

        match self.read_line().await? {
            ReadOutcome::Line(bytes) => self.send_line(bytes).await,
            ReadOutcome::Eof(fragment) if !self.config.follow => {
                if !fragment.is_empty() {
                    self.send_line(fragment).await?;
                }
                Ok(State::Terminated)
            }
            ReadOutcome::Eof(fragment) => {
                if !fragment.is_empty() {
                    match start {
                        Some(start) => self.seek(SeekFrom::Start(start)).await?,
                        None => self.partial = fragment,
                    }
                }
                Ok(State::AwaitingChange)
            }
        }
    }

    async fn read_line(&mut self) -> Result<ReadOutcome> {
        let mut buf = std::mem::take(&mut self.partial);
        let reader = self.reader.as_mut().ok_or_else(|| no_file(&self.path))?;
        let read = reader
            .read_until(b'\n', &mut buf)
            .await
            .map_err(|e| Error::read(self.path.display(), e))?;
        lock_cursor(&self.cursor).offset += read as u64;

        if buf.last() == Some(&b'\n') {
            buf.pop();
            Ok(ReadOutcome::Line(buf))
        } else {
            Ok(ReadOutcome::Eof(buf))
        }
    }

    /// Delivers a line, waiting for the consumer unless the tail starts dying.
    async fn send_line(&mut self, bytes: Vec<u8>) -> Result<State> {
        let line = Line::from_bytes(bytes);
        let lines = match self.config.max_line_size {
            Some(max) => line.split(max),
            None => vec![line],
        };

        for line in lines {
            tokio::select! {
                biased;
                _ = self.lifecycle.dying() => return Ok(State::Terminated),
                sent = self.lines.send(line) => {
                    if sent.is_err() {
                        tracing::debug!(path = %self.path.display(), "line consumer dropped");
                        self.lifecycle.kill(None);
                        return Ok(State::Terminated);
                    }
                }
            }
        }
        Ok(State::Reading)
    }

    /// Waits until the file is appended to, truncated, removed or renamed.
    /// Truncated files are always reopened; removed ones only if configured.
    async fn wait_for_changes(&mut self) -> Result<State> {
        let changes = match self.changes.take() {
            Some(changes) => changes,
            None => {
                let (offset, opened) = {
                    let cursor = lock_cursor(&self.cursor);
                    (cursor.offset, cursor.file_id())
                };
                self.watcher.change_events(&self.lifecycle, offset, opened)?
            }
        };

        let change = tokio::select! {
            biased;
            _ = self.lifecycle.dying() => return Ok(State::Terminated),
            change = changes.next() => change,
        };

        match change {
            Change::Modified => {
                self.changes = Some(changes);
                Ok(State::Reading)
            }
            Change::Truncated => {
                tracing::debug!(path = %self.path.display(), "file truncated, reopening");
                Ok(State::Reopening)
            }
            Change::Deleted if self.config.reopen => {
                tracing::debug!(path = %self.path.display(), "file removed, reopening");
                Ok(State::Reopening)
            }
            Change::Deleted => Err(Error::Stop),
        }
    }
}

fn no_file(path: &std::path::Path) -> Error {
    Error::read(
        path.display(),
        std::io::Error::new(std::io::ErrorKind::NotConnected, "no open file"),
    )
}
