//! Shared filesystem-notification subscriptions.
//!
//! A [`WatchRegistry`] owns one `notify` watcher and watches the parent
//! directory of every subscribed file, non-recursively. Directory watches are
//! reference counted per file, so any number of tails on the same path share a
//! single OS watch; events are fanned out per directory and filtered by file
//! name on the receiving side.

use crate::error::{Error, Result};
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashMap;
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;

const EVENT_CAPACITY: usize = 128;

type Routes = Arc<Mutex<HashMap<PathBuf, broadcast::Sender<DirEvent>>>>;

/// What a subscriber sees from its directory.
#[derive(Debug, Clone)]
enum DirEvent {
    Event(Event),
    /// The backend reported an error, so events may have been lost.
    Missed,
}

/// A notification relevant to one subscribed file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Notice {
    Event(notify::EventKind),
    Missed,
}

/// Process-scoped bookkeeping of OS watch subscriptions.
///
/// Cloning yields another handle to the same registry. Most programs use
/// [`WatchRegistry::process`]; separate registries are independent and each
/// holds its own OS watcher.
#[derive(Clone, Default)]
pub struct WatchRegistry {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    // Shared with the notify callback, which must never take `state`.
    routes: Routes,
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    watcher: Option<RecommendedWatcher>,
    dirs: HashMap<PathBuf, HashMap<OsString, FileRefs>>,
    next_generation: u64,
}

#[derive(Debug, Clone)]
struct FileRefs {
    count: usize,
    generation: u64,
    // Cancelled when the registration is cleaned up.
    removed: CancellationToken,
}

impl std::fmt::Debug for WatchRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = lock(&self.inner.state);
        f.debug_struct("WatchRegistry")
            .field("dirs", &state.dirs.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl WatchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The registry shared by every tail in this process that was not given its own.
    pub fn process() -> WatchRegistry {
        static PROCESS: OnceLock<WatchRegistry> = OnceLock::new();
        PROCESS.get_or_init(WatchRegistry::new).clone()
    }

    /// Subscribes to events for `path`. The file need not exist, but its directory must.
    pub(crate) fn subscribe(&self, path: &Path) -> Result<Subscription> {
        let (dir, name) = split_path(path)?;
        let mut state = lock(&self.inner.state);

        let receiver = lock(&self.inner.routes)
            .entry(dir.clone())
            .or_insert_with(|| broadcast::channel(EVENT_CAPACITY).0)
            .subscribe();

        if !state.dirs.contains_key(&dir) {
            if let Err(e) = self.watch_dir(&mut state, &dir) {
                lock(&self.inner.routes).remove(&dir);
                return Err(e);
            }
            tracing::debug!(dir = %dir.display(), "watching directory");
        }

        let generation = state.next_generation;
        let refs = state
            .dirs
            .entry(dir.clone())
            .or_default()
            .entry(name.clone())
            .or_insert_with(|| FileRefs {
                count: 0,
                generation,
                removed: CancellationToken::new(),
            });
        refs.count += 1;
        let generation = refs.generation;
        let removed = refs.removed.clone();
        state.next_generation += 1;

        Ok(Subscription {
            registry: self.clone(),
            dir,
            name,
            generation,
            removed,
            receiver,
        })
    }

    fn watch_dir(&self, state: &mut State, dir: &Path) -> Result<()> {
        let watcher = match &mut state.watcher {
            Some(watcher) => watcher,
            slot => slot.insert(create_watcher(self.inner.routes.clone())?),
        };
        watcher.watch(dir, RecursiveMode::NonRecursive)?;
        Ok(())
    }

    /// Removes this process's registration for `path`, whoever holds it.
    ///
    /// Outstanding subscriptions for the path are closed and stop counting; the
    /// directory is unwatched once no other file in it is subscribed.
    pub fn cleanup<P: AsRef<Path>>(&self, path: P) {
        let Ok((dir, name)) = split_path(path.as_ref()) else {
            return;
        };
        let mut state = lock(&self.inner.state);
        if let Some(files) = state.dirs.get_mut(&dir) {
            if let Some(refs) = files.remove(&name) {
                refs.removed.cancel();
                tracing::debug!(path = %path.as_ref().display(), "removed watch");
            }
        }
        self.prune(&mut state, &dir);
    }

    fn release(&self, dir: &Path, name: &OsStr, generation: u64) {
        let mut state = lock(&self.inner.state);
        if let Some(files) = state.dirs.get_mut(dir) {
            if let Some(refs) = files.get_mut(name) {
                if refs.generation == generation {
                    refs.count -= 1;
                    if refs.count == 0 {
                        files.remove(name);
                    }
                }
            }
        }
        self.prune(&mut state, dir);
    }

    // Unwatches `dir` once no file in it is subscribed.
    fn prune(&self, state: &mut State, dir: &Path) {
        if !state.dirs.get(dir).is_some_and(|files| files.is_empty()) {
            return;
        }
        state.dirs.remove(dir);
        if let Some(watcher) = state.watcher.as_mut() {
            if let Err(e) = watcher.unwatch(dir) {
                tracing::debug!(dir = %dir.display(), err = %e, "failed to unwatch directory");
            }
        }
        lock(&self.inner.routes).remove(dir);
        tracing::debug!(dir = %dir.display(), "stopped watching directory");
    }

    /// Whether `path` currently has a registration in this registry.
    pub fn is_watching<P: AsRef<Path>>(&self, path: P) -> bool {
        self.subscriber_count(path) > 0
    }

    /// Number of live subscriptions for `path`.
    pub fn subscriber_count<P: AsRef<Path>>(&self, path: P) -> usize {
        let Ok((dir, name)) = split_path(path.as_ref()) else {
            return 0;
        };
        lock(&self.inner.state)
            .dirs
            .get(&dir)
            .and_then(|files| files.get(&name))
            .map_or(0, |refs| refs.count)
    }
}

/// Removes any OS watch registered for `path` by the process registry.
///
/// Meant for a process's exit path; the kernel may otherwise keep watches
/// alive longer than intended.
pub fn cleanup<P: AsRef<Path>>(path: P) {
    WatchRegistry::process().cleanup(path)
}

/// One file's share of a directory watch. Releases its reference on drop.
pub(crate) struct Subscription {
    registry: WatchRegistry,
    dir: PathBuf,
    name: OsString,
    generation: u64,
    removed: CancellationToken,
    receiver: broadcast::Receiver<DirEvent>,
}

impl Subscription {
    /// Next notification for the subscribed file, or `None` once the
    /// registration has been cleaned up.
    pub(crate) async fn recv(&mut self) -> Option<Notice> {
        loop {
            let received = tokio::select! {
                biased;
                _ = self.removed.cancelled() => return None,
                received = self.receiver.recv() => received,
            };
            match received {
                Ok(DirEvent::Event(event)) => {
                    if is_event_relevant_to_file(&event, &self.dir, &self.name) {
                        return Some(Notice::Event(event.kind));
                    }
                }
                Ok(DirEvent::Missed) | Err(RecvError::Lagged(_)) => return Some(Notice::Missed),
                Err(RecvError::Closed) => return None,
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.registry.release(&self.dir, &self.name, self.generation);
    }
}

fn create_watcher(routes: Routes) -> notify::Result<RecommendedWatcher> {
    RecommendedWatcher::new(
        move |res: notify::Result<Event>| dispatch(&routes, res),
        notify::Config::default(),
    )
}

// Runs on the notify backend's thread.
fn dispatch(routes: &Routes, res: notify::Result<Event>) {
    let routes = lock(routes);
    match res {
        Ok(event) => {
            let mut sent: Vec<&Path> = Vec::new();
            for dir in event.paths.iter().filter_map(|p| p.parent()) {
                if sent.contains(&dir) {
                    continue;
                }
                if let Some(tx) = routes.get(dir) {
                    let _ = tx.send(DirEvent::Event(event.clone()));
                }
                sent.push(dir);
            }
        }
        Err(e) => {
            tracing::warn!(err = %e, "file watcher error");
            for tx in routes.values() {
                let _ = tx.send(DirEvent::Missed);
            }
        }
    }
}

/// Check if a notify event concerns the file `name` inside `dir`.
fn is_event_relevant_to_file(event: &Event, dir: &Path, name: &OsStr) -> bool {
    event
        .paths
        .iter()
        .any(|path| path.file_name() == Some(name) && path.parent() == Some(dir))
}

/// Splits a path into its canonical parent directory and file name.
fn split_path(path: &Path) -> Result<(PathBuf, OsString)> {
    let absolute = std::path::absolute(path)?;
    let name = absolute
        .file_name()
        .ok_or_else(|| Error::InvalidPath {
            message: format!("{} has no file name", path.display()),
        })?
        .to_os_string();
    let parent = absolute.parent().ok_or_else(|| Error::InvalidPath {
        message: format!("{} has no parent directory", path.display()),
    })?;
    Ok((parent.canonicalize()?, name))
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
