//! Change detection from filesystem notifications.

use super::registry::{Notice, Subscription, WatchRegistry};
use super::{ChangeTracker, FileId, FileWatcher};
use crate::changes::{self, Change, ChangeNotifier, ChangeSender};
use crate::error::{Error, Result};
use crate::lifecycle::Lifecycle;
use notify::EventKind;
use notify::event::ModifyKind;
use std::path::{Path, PathBuf};

/// Detects changes through OS notifications on the file's directory.
#[derive(Debug, Clone)]
pub struct InotifyFileWatcher {
    path: PathBuf,
    registry: WatchRegistry,
}

impl InotifyFileWatcher {
    pub fn new<P: AsRef<Path>>(path: P, registry: WatchRegistry) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            registry,
        }
    }

    fn subscribe(&self) -> Result<Subscription> {
        self.registry.subscribe(&self.path)
    }
}

impl FileWatcher for InotifyFileWatcher {
    async fn block_until_exists(&self, lifecycle: &Lifecycle) -> Result<()> {
        // Subscribe before looking, so a creation in between is not missed.
        let mut subscription = self.subscribe().map_err(|e| {
            Error::file_open(self.path.display(), std::io::Error::other(e.to_string()))
        })?;

        loop {
            match tokio::fs::metadata(&self.path).await {
                Ok(_) => return Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(Error::file_open(self.path.display(), e)),
            }

            tokio::select! {
                _ = lifecycle.dying() => return Err(Error::Stop),
                notice = subscription.recv() => {
                    if notice.is_none() {
                        return Err(Error::file_open(
                            self.path.display(),
                            std::io::Error::other("watch removed while waiting for file"),
                        ));
                    }
                }
            }
        }
    }

    fn change_events(
        &self,
        lifecycle: &Lifecycle,
        offset: u64,
        opened: Option<FileId>,
    ) -> Result<ChangeNotifier> {
        let subscription = self.subscribe()?;
        let (sender, notifier) = changes::channel(lifecycle.child_token());
        tokio::spawn(forward_changes(
            self.path.clone(),
            offset,
            opened,
            subscription,
            sender,
            lifecycle.clone(),
        ));
        Ok(notifier)
    }
}

/// Whether an event on the file's name means the open file is no longer behind it.
fn is_removal(kind: &EventKind) -> bool {
    matches!(kind, EventKind::Remove(_) | EventKind::Modify(ModifyKind::Name(_)))
}

async fn forward_changes(
    path: PathBuf,
    offset: u64,
    opened: Option<FileId>,
    mut subscription: Subscription,
    sender: ChangeSender,
    lifecycle: Lifecycle,
) {
    let mut tracker = match ChangeTracker::start(path, offset, opened).await {
        Ok(Some(tracker)) => tracker,
        Ok(None) => {
            sender.notify(Change::Deleted);
            return;
        }
        Err(e) => {
            tracing::error!(err = %e, "failed to stat watched file");
            lifecycle.kill(Some(e.into()));
            return;
        }
    };

    // Anything written between the last read and the subscription.
    let mut pending = true;

    while !sender.is_closed() {
        let change = if pending {
            pending = false;
            tracker.check().await
        } else {
            let notice = tokio::select! {
                _ = sender.closed() => return,
                notice = subscription.recv() => notice,
            };
            match notice {
                Some(Notice::Event(kind)) if is_removal(&kind) => Ok(Some(Change::Deleted)),
                Some(_) => tracker.check().await,
                None => {
                    tracing::debug!(path = %tracker.path().display(), "watch removed");
                    return;
                }
            }
        };

        match change {
            Ok(Some(Change::Deleted)) => {
                sender.notify(Change::Deleted);
                return;
            }
            Ok(Some(change)) => sender.notify(change),
            Ok(None) => {}
            Err(e) => {
                tracing::error!(path = %tracker.path().display(), err = %e, "failed to stat watched file");
                lifecycle.kill(Some(e.into()));
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::TempLogFile;
    use notify::event::{CreateKind, DataChange, RemoveKind, RenameMode};
    use std::time::Duration;

    const TIMEOUT: Duration = Duration::from_secs(2);

    async fn next_change(notifier: &ChangeNotifier) -> Option<Change> {
        tokio::time::timeout(TIMEOUT, notifier.next()).await.ok()
    }

    #[test]
    fn test_is_removal() {
        assert!(is_removal(&EventKind::Remove(RemoveKind::File)));
        assert!(is_removal(&EventKind::Modify(ModifyKind::Name(RenameMode::From))));
        assert!(is_removal(&EventKind::Modify(ModifyKind::Name(RenameMode::Both))));
        assert!(!is_removal(&EventKind::Modify(ModifyKind::Data(DataChange::Content))));
        assert!(!is_removal(&EventKind::Create(CreateKind::File)));
    }

    #[tokio::test]
    async fn test_block_until_exists_waits_for_creation() {
        let registry = WatchRegistry::new();
        let file = TempLogFile::new().unwrap();
        file.remove().unwrap();
        let watcher = InotifyFileWatcher::new(file.path(), registry.clone());

        let path = file.path().to_path_buf();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            std::fs::write(path, "hello\n").unwrap();
        });

        let result = tokio::time::timeout(TIMEOUT, watcher.block_until_exists(&Lifecycle::new())).await;
        assert!(matches!(result, Ok(Ok(()))));
        assert!(!registry.is_watching(file.path()));
    }

    #[tokio::test]
    async fn test_block_until_exists_is_cancellable() {
        let file = TempLogFile::new().unwrap();
        file.remove().unwrap();
        let watcher = InotifyFileWatcher::new(file.path(), WatchRegistry::new());
        let lifecycle = Lifecycle::new();

        let killer = lifecycle.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            killer.kill(None);
        });

        let result = tokio::time::timeout(TIMEOUT, watcher.block_until_exists(&lifecycle)).await;
        assert!(matches!(result, Ok(Err(Error::Stop))));
    }

    #[tokio::test]
    async fn test_block_until_exists_without_directory() {
        let watcher = InotifyFileWatcher::new("/definitely/not/here/app.log", WatchRegistry::new());
        let result = watcher.block_until_exists(&Lifecycle::new()).await;
        assert!(matches!(result, Err(Error::FileOpen { .. })));
    }

    #[tokio::test]
    async fn test_reports_append_and_delete() {
        let file = TempLogFile::with_content("first\n").unwrap();
        let watcher = InotifyFileWatcher::new(file.path(), WatchRegistry::new());
        let notifier = watcher.change_events(&Lifecycle::new(), 6, None).unwrap();

        file.append_line("second").unwrap();
        assert_eq!(next_change(&notifier).await, Some(Change::Modified));

        file.remove().unwrap();
        // a late modification event may still be pending
        let mut change = next_change(&notifier).await;
        if change == Some(Change::Modified) {
            change = next_change(&notifier).await;
        }
        assert_eq!(change, Some(Change::Deleted));
    }

    #[tokio::test]
    async fn test_reports_truncation() {
        let file = TempLogFile::with_content("first\nsecond\n").unwrap();
        let watcher = InotifyFileWatcher::new(file.path(), WatchRegistry::new());
        let notifier = watcher.change_events(&Lifecycle::new(), 13, None).unwrap();

        file.truncate().unwrap();
        assert_eq!(next_change(&notifier).await, Some(Change::Truncated));
    }

    #[tokio::test]
    async fn test_reports_data_written_before_watch() {
        let file = TempLogFile::with_content("seen\nunseen\n").unwrap();
        let watcher = InotifyFileWatcher::new(file.path(), WatchRegistry::new());
        let notifier = watcher.change_events(&Lifecycle::new(), 5, None).unwrap();

        assert_eq!(next_change(&notifier).await, Some(Change::Modified));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_rotation_before_watch_is_deleted() {
        let file = TempLogFile::with_content("old\n").unwrap();
        let opened = std::fs::File::open(file.path()).unwrap();
        file.rotate("new and longer\n").unwrap();

        let watcher = InotifyFileWatcher::new(file.path(), WatchRegistry::new());
        let notifier = watcher
            .change_events(&Lifecycle::new(), 4, FileId::of(&opened))
            .unwrap();

        assert_eq!(next_change(&notifier).await, Some(Change::Deleted));
    }

    #[tokio::test]
    async fn test_dropping_notifier_releases_watch() {
        let registry = WatchRegistry::new();
        let file = TempLogFile::with_content("first\n").unwrap();
        let watcher = InotifyFileWatcher::new(file.path(), registry.clone());

        let notifier = watcher.change_events(&Lifecycle::new(), 6, None).unwrap();
        assert!(registry.is_watching(file.path()));

        drop(notifier);
        let mut released = false;
        for _ in 0..100 {
            if !registry.is_watching(file.path()) {
                released = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(released);
    }
}
