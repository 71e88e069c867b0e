//! Change detection by periodically stating the file.

use super::{ChangeTracker, FileId, FileWatcher};
use crate::changes::{self, Change, ChangeNotifier, ChangeSender};
use crate::error::{Error, Result};
use crate::lifecycle::Lifecycle;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::MissedTickBehavior;

/// Detects changes by comparing stats taken every `interval`.
#[derive(Debug, Clone)]
pub struct PollingFileWatcher {
    path: PathBuf,
    interval: Duration,
}

impl PollingFileWatcher {
    pub fn new<P: AsRef<Path>>(path: P, interval: Duration) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            interval,
        }
    }
}

impl FileWatcher for PollingFileWatcher {
    async fn block_until_exists(&self, lifecycle: &Lifecycle) -> Result<()> {
        loop {
            match tokio::fs::metadata(&self.path).await {
                Ok(_) => return Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(Error::file_open(self.path.display(), e)),
            }

            tokio::select! {
                _ = lifecycle.dying() => return Err(Error::Stop),
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
    }

    fn change_events(
        &self,
        lifecycle: &Lifecycle,
        offset: u64,
        opened: Option<FileId>,
    ) -> Result<ChangeNotifier> {
        let (sender, notifier) = changes::channel(lifecycle.child_token());
        tokio::spawn(poll_changes(
            self.path.clone(),
            self.interval,
            offset,
            opened,
            sender,
            lifecycle.clone(),
        ));
        Ok(notifier)
    }
}

async fn poll_changes(
    path: PathBuf,
    interval: Duration,
    offset: u64,
    opened: Option<FileId>,
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

    // The first tick fires immediately, catching data appended before the watch began.
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = sender.closed() => return,
            _ = ticker.tick() => {}
        }

        match tracker.check().await {
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

    const INTERVAL: Duration = Duration::from_millis(10);
    const TIMEOUT: Duration = Duration::from_secs(2);

    async fn next_change(notifier: &ChangeNotifier) -> Option<Change> {
        tokio::time::timeout(TIMEOUT, notifier.next()).await.ok()
    }

    #[tokio::test]
    async fn test_block_until_exists_returns_for_existing_file() {
        let file = TempLogFile::new().unwrap();
        let watcher = PollingFileWatcher::new(file.path(), INTERVAL);

        let result = watcher.block_until_exists(&Lifecycle::new()).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_block_until_exists_waits_for_creation() {
        let file = TempLogFile::new().unwrap();
        file.remove().unwrap();
        let watcher = PollingFileWatcher::new(file.path(), INTERVAL);

        let path = file.path().to_path_buf();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            std::fs::write(path, "hello\n").unwrap();
        });

        let result = tokio::time::timeout(TIMEOUT, watcher.block_until_exists(&Lifecycle::new())).await;
        assert!(matches!(result, Ok(Ok(()))));
    }

    #[tokio::test]
    async fn test_block_until_exists_is_cancellable() {
        let file = TempLogFile::new().unwrap();
        file.remove().unwrap();
        let watcher = PollingFileWatcher::new(file.path(), INTERVAL);
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
    async fn test_reports_append_truncate_delete() {
        let file = TempLogFile::with_content("first\n").unwrap();
        let watcher = PollingFileWatcher::new(file.path(), INTERVAL);
        let lifecycle = Lifecycle::new();
        let notifier = watcher.change_events(&lifecycle, 6, None).unwrap();

        file.append_line("second").unwrap();
        assert_eq!(next_change(&notifier).await, Some(Change::Modified));

        file.truncate().unwrap();
        assert_eq!(next_change(&notifier).await, Some(Change::Truncated));

        file.remove().unwrap();
        assert_eq!(next_change(&notifier).await, Some(Change::Deleted));
    }

    #[tokio::test]
    async fn test_reports_data_written_before_watch() {
        let file = TempLogFile::with_content("seen\nunseen\n").unwrap();
        let watcher = PollingFileWatcher::new(file.path(), INTERVAL);
        let notifier = watcher.change_events(&Lifecycle::new(), 5, None).unwrap();

        assert_eq!(next_change(&notifier).await, Some(Change::Modified));
    }

    #[tokio::test]
    async fn test_replaced_file_is_deleted() {
        let file = TempLogFile::with_content("old\n").unwrap();
        let watcher = PollingFileWatcher::new(file.path(), INTERVAL);
        let notifier = watcher.change_events(&Lifecycle::new(), 4, None).unwrap();

        file.rotate("new\n").unwrap();
        assert_eq!(next_change(&notifier).await, Some(Change::Deleted));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_rotation_before_watch_is_deleted() {
        let file = TempLogFile::with_content("old\n").unwrap();
        let opened = std::fs::File::open(file.path()).unwrap();
        file.rotate("new and longer\n").unwrap();

        let watcher = PollingFileWatcher::new(file.path(), INTERVAL);
        let notifier = watcher
            .change_events(&Lifecycle::new(), 4, FileId::of(&opened))
            .unwrap();

        assert_eq!(next_change(&notifier).await, Some(Change::Deleted));
    }

    #[tokio::test]
    async fn test_missing_file_is_deleted_immediately() {
        let file = TempLogFile::new().unwrap();
        file.remove().unwrap();
        let watcher = PollingFileWatcher::new(file.path(), INTERVAL);
        let notifier = watcher.change_events(&Lifecycle::new(), 0, None).unwrap();

        assert_eq!(next_change(&notifier).await, Some(Change::Deleted));
    }
}
