//! Change detection for a tailed file.
//!
//! Two strategies produce the same [`ChangeNotifier`] signals:
//! - **Event driven** ([`InotifyFileWatcher`]): subscribes to filesystem
//!   notifications for the file's directory through a shared [`WatchRegistry`].
//! - **Polling** ([`PollingFileWatcher`]): stats the file on a fixed interval,
//!   for filesystems without native notifications.
//!
//! Both compare successive [`FileState`] snapshots to decide which change happened.

mod inotify;
mod polling;
mod registry;

pub use inotify::InotifyFileWatcher;
pub use polling::PollingFileWatcher;
pub use registry::{WatchRegistry, cleanup};

use crate::changes::{Change, ChangeNotifier};
use crate::config::Config;
use crate::error::Result;
use crate::lifecycle::Lifecycle;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Capability to detect a file's creation and subsequent changes.
pub trait FileWatcher {
    /// Waits until the file exists. Resolves to [`Error::Stop`](crate::Error::Stop)
    /// if the lifecycle starts dying first.
    fn block_until_exists(&self, lifecycle: &Lifecycle) -> impl Future<Output = Result<()>> + Send;

    /// Starts watching the open file identified by `opened`, treating `offset`
    /// bytes as already seen. A different file behind the name is reported as
    /// [`Change::Deleted`]. Without an identity, whatever file the path names
    /// when the watch starts is taken to be the open one.
    fn change_events(
        &self,
        lifecycle: &Lifecycle,
        offset: u64,
        opened: Option<FileId>,
    ) -> Result<ChangeNotifier>;
}

/// The watcher selected by a tail's configuration.
#[derive(Debug, Clone)]
pub enum Watcher {
    Inotify(InotifyFileWatcher),
    Polling(PollingFileWatcher),
}

impl Watcher {
    pub fn new(path: &Path, config: &Config, registry: &WatchRegistry) -> Self {
        if config.poll {
            Watcher::Polling(PollingFileWatcher::new(path, config.poll_interval))
        } else {
            Watcher::Inotify(InotifyFileWatcher::new(path, registry.clone()))
        }
    }
}

impl FileWatcher for Watcher {
    async fn block_until_exists(&self, lifecycle: &Lifecycle) -> Result<()> {
        match self {
            Watcher::Inotify(w) => w.block_until_exists(lifecycle).await,
            Watcher::Polling(w) => w.block_until_exists(lifecycle).await,
        }
    }

    fn change_events(
        &self,
        lifecycle: &Lifecycle,
        offset: u64,
        opened: Option<FileId>,
    ) -> Result<ChangeNotifier> {
        match self {
            Watcher::Inotify(w) => w.change_events(lifecycle, offset, opened),
            Watcher::Polling(w) => w.change_events(lifecycle, offset, opened),
        }
    }
}

/// Identity of the file behind a name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileId {
    dev: u64,
    ino: u64,
}

impl FileId {
    /// Identity of an open file, if the platform exposes one.
    pub fn of(file: &std::fs::File) -> Option<FileId> {
        file.metadata().ok().and_then(|metadata| file_id(&metadata))
    }
}

/// What a stat of the watched path showed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FileState {
    pub(crate) len: u64,
    pub(crate) modified: Option<SystemTime>,
    pub(crate) id: Option<FileId>,
}

impl FileState {
    pub(crate) fn from_metadata(metadata: &std::fs::Metadata) -> Self {
        Self {
            len: metadata.len(),
            modified: metadata.modified().ok(),
            id: file_id(metadata),
        }
    }

    /// Stats `path`, returning `None` if nothing is there.
    pub(crate) async fn of(path: &Path) -> io::Result<Option<Self>> {
        match tokio::fs::metadata(path).await {
            Ok(metadata) => Ok(Some(Self::from_metadata(&metadata))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[cfg(unix)]
fn file_id(metadata: &std::fs::Metadata) -> Option<FileId> {
    use std::os::unix::fs::MetadataExt;
    Some(FileId {
        dev: metadata.dev(),
        ino: metadata.ino(),
    })
}

// Without inode numbers, rotation is only detected through size changes.
#[cfg(not(unix))]
fn file_id(_metadata: &std::fs::Metadata) -> Option<FileId> {
    None
}

/// Decides which change, if any, separates two snapshots of the same path.
pub(crate) fn classify(prev: &FileState, current: Option<&FileState>) -> Option<Change> {
    let current = match current {
        Some(current) => current,
        None => return Some(Change::Deleted),
    };

    if current.id != prev.id {
        Some(Change::Deleted)
    } else if current.len < prev.len {
        Some(Change::Truncated)
    } else if current.len > prev.len || current.modified != prev.modified {
        Some(Change::Modified)
    } else {
        None
    }
}

/// Tracks the last seen state of a path for one [`ChangeNotifier`].
#[derive(Debug)]
pub(crate) struct ChangeTracker {
    path: PathBuf,
    prev: FileState,
}

impl ChangeTracker {
    /// Snapshots `path`, counting only the first `offset` bytes of the
    /// `opened` file as seen. Returns `None` if the file is already gone.
    ///
    /// The baseline identity is the open file's, so a rotation that happened
    /// before the watch started shows up as a deletion on the first check.
    pub(crate) async fn start(
        path: PathBuf,
        offset: u64,
        opened: Option<FileId>,
    ) -> io::Result<Option<Self>> {
        Ok(FileState::of(&path).await?.map(|state| Self {
            path,
            prev: FileState {
                len: offset,
                id: opened.or(state.id),
                ..state
            },
        }))
    }

    /// Re-stats the path and reports what changed since the last check.
    pub(crate) async fn check(&mut self) -> io::Result<Option<Change>> {
        let current = FileState::of(&self.path).await?;
        let change = classify(&self.prev, current.as_ref());
        if let Some(current) = current {
            self.prev = current;
        }
        Ok(change)
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }
}
