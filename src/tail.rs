//! The public handle on a running tail.

use crate::config::Config;
use crate::engine::{Cursor, Engine, SharedCursor, lock_cursor};
use crate::error::{Error, Result};
use crate::lifecycle::{Lifecycle, LifecycleState};
use crate::line::Line;
use crate::watch::{WatchRegistry, Watcher};
use futures::Stream;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;

/// A file being tailed. Yields lines as a [`Stream`] in file order.
///
/// The stream ends when the tail terminates: at the end of the file when not
/// following, when the file is removed and reopening is off, on a fatal
/// error, or after a stop. [`Tail::wait`] tells these apart. Dropping the
/// handle stops the tail.
pub struct Tail {
    path: PathBuf,
    lines: ReceiverStream<Line>,
    lifecycle: Lifecycle,
    cursor: SharedCursor,
    registry: WatchRegistry,
}

impl Tail {
    /// Starts tailing `path`, sharing OS watches through the process registry.
    pub async fn new<P: AsRef<Path>>(path: P, config: Config) -> Result<Self> {
        Self::with_registry(path, config, WatchRegistry::process()).await
    }

    /// Starts tailing `path` with watches kept in `registry`.
    ///
    /// Fails immediately on an invalid configuration, or when the file must
    /// exist and cannot be opened. Later failures end the stream and are
    /// reported by [`Tail::wait`].
    pub async fn with_registry<P: AsRef<Path>>(
        path: P,
        config: Config,
        registry: WatchRegistry,
    ) -> Result<Self> {
        config.validate()?;
        let path = path.as_ref().to_path_buf();

        let file = if config.must_exist {
            let file = tokio::fs::File::open(&path)
                .await
                .map_err(|e| Error::file_open(path.display(), e))?;
            Some(file)
        } else {
            None
        };

        let (tx, rx) = mpsc::channel(1);
        let lifecycle = Lifecycle::new();
        let cursor = Arc::new(Mutex::new(Cursor::new(config.pipe)));
        let watcher = Watcher::new(&path, &config, &registry);
        let engine = Engine::new(
            path.clone(),
            config,
            watcher,
            lifecycle.clone(),
            tx,
            cursor.clone(),
        );
        tokio::spawn(engine.run(file));

        Ok(Self {
            path,
            lines: ReceiverStream::new(rx),
            lifecycle,
            cursor,
            registry,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Next line, or `None` once the tail has terminated.
    pub async fn next_line(&mut self) -> Option<Line> {
        self.lines.next().await
    }

    /// Offset in the current file up to which lines have been read.
    ///
    /// Only an estimate while a read is in flight, and zero when no file is open.
    pub fn tell(&self) -> u64 {
        lock_cursor(&self.cursor).tell()
    }

    /// Stops the tail and waits for it to terminate.
    pub async fn stop(&self) -> Result<()> {
        self.lifecycle.kill(None);
        self.wait().await
    }

    /// Waits for the tail to terminate, returning the error that ended it, if any.
    pub async fn wait(&self) -> Result<()> {
        self.lifecycle.wait().await
    }

    /// A handle that can stop this tail from elsewhere.
    pub fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    pub fn state(&self) -> LifecycleState {
        self.lifecycle.state()
    }

    /// Removes the OS watch registered for this tail's path.
    ///
    /// Applies to every tail on the path sharing this tail's registry.
    pub fn cleanup(&self) {
        self.registry.cleanup(&self.path)
    }
}

impl std::fmt::Debug for Tail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tail")
            .field("path", &self.path)
            .field("state", &self.state())
            .finish()
    }
}

impl Stream for Tail {
    type Item = Line;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.lines).poll_next(cx)
    }
}

impl Drop for Tail {
    fn drop(&mut self) {
        self.lifecycle.kill(None);
    }
}
