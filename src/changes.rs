//! Edge-triggered change signals between a watcher and the tail engine.
//!
//! Every signal holds at most one pending notification. Raising a signal that
//! has not been observed yet is a no-op, so a slow engine only ever learns that
//! something changed since it last looked, never how many times.

use std::sync::Arc;
use tokio::sync::Notify;
use tokio_util::sync::{CancellationToken, DropGuard};

/// A kind of change observed on the watched file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
    Modified,
    Truncated,
    Deleted,
}

/// A single-slot, coalescing wake-up.
#[derive(Debug, Clone, Default)]
pub(crate) struct Signal(Arc<Notify>);

impl Signal {
    /// Raises the signal, or does nothing if a notification is already pending.
    pub(crate) fn raise(&self) {
        self.0.notify_one();
    }

    pub(crate) async fn raised(&self) {
        self.0.notified().await
    }
}

/// The engine's side of a watch: waits for the next change of one open file.
///
/// Dropping it stops the watcher task feeding it.
#[derive(Debug)]
pub struct ChangeNotifier {
    modified: Signal,
    truncated: Signal,
    deleted: Signal,
    _watch: DropGuard,
}

/// The watcher's side of a watch.
#[derive(Debug, Clone)]
pub(crate) struct ChangeSender {
    modified: Signal,
    truncated: Signal,
    deleted: Signal,
    closed: CancellationToken,
}

/// Creates a connected notifier/sender pair. `watch` is cancelled when the
/// notifier is dropped.
pub(crate) fn channel(watch: CancellationToken) -> (ChangeSender, ChangeNotifier) {
    let sender = ChangeSender {
        modified: Signal::default(),
        truncated: Signal::default(),
        deleted: Signal::default(),
        closed: watch.clone(),
    };
    let notifier = ChangeNotifier {
        modified: sender.modified.clone(),
        truncated: sender.truncated.clone(),
        deleted: sender.deleted.clone(),
        _watch: watch.drop_guard(),
    };
    (sender, notifier)
}

impl ChangeNotifier {
    /// Waits for the next change. When several are pending, modification is
    /// reported first so data written before a rotation is still read.
    pub async fn next(&self) -> Change {
        tokio::select! {
            biased;
            _ = self.modified.raised() => Change::Modified,
            _ = self.truncated.raised() => Change::Truncated,
            _ = self.deleted.raised() => Change::Deleted,
        }
    }
}

impl ChangeSender {
    pub(crate) fn notify(&self, change: Change) {
        tracing::trace!(?change, "file change");
        match change {
            Change::Modified => self.modified.raise(),
            Change::Truncated => self.truncated.raise(),
            Change::Deleted => self.deleted.raise(),
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Resolves once the notifier is dropped or the tail is dying.
    pub(crate) async fn closed(&self) {
        self.closed.cancelled().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_pending, assert_ready_eq, task};

    #[test]
    fn test_signal_coalesces_repeated_raises() {
        let signal = Signal::default();
        signal.raise();
        signal.raise();
        signal.raise();

        let mut first = task::spawn(signal.raised());
        assert_ready_eq!(first.poll(), ());
        drop(first);

        let mut second = task::spawn(signal.raised());
        assert_pending!(second.poll());
    }

    #[test]
    fn test_raise_wakes_pending_waiter() {
        let signal = Signal::default();
        let mut waiter = task::spawn(signal.raised());
        assert_pending!(waiter.poll());

        signal.raise();
        assert!(waiter.is_woken());
        assert_ready_eq!(waiter.poll(), ());
    }

    #[test]
    fn test_next_reports_each_kind() {
        let (sender, notifier) = channel(CancellationToken::new());

        for change in [Change::Modified, Change::Truncated, Change::Deleted] {
            sender.notify(change);
            let mut next = task::spawn(notifier.next());
            assert_ready_eq!(next.poll(), change);
        }
    }

    #[test]
    fn test_next_prefers_modified() {
        let (sender, notifier) = channel(CancellationToken::new());
        sender.notify(Change::Deleted);
        sender.notify(Change::Modified);

        let mut next = task::spawn(notifier.next());
        assert_ready_eq!(next.poll(), Change::Modified);
        drop(next);

        let mut next = task::spawn(notifier.next());
        assert_ready_eq!(next.poll(), Change::Deleted);
    }

    #[test]
    fn test_signals_are_independent() {
        let (sender, notifier) = channel(CancellationToken::new());
        sender.notify(Change::Truncated);
        sender.notify(Change::Truncated);
        sender.notify(Change::Deleted);

        let mut next = task::spawn(notifier.next());
        assert_ready_eq!(next.poll(), Change::Truncated);
        drop(next);
        let mut next = task::spawn(notifier.next());
        assert_ready_eq!(next.poll(), Change::Deleted);
        drop(next);
        let mut next = task::spawn(notifier.next());
        assert_pending!(next.poll());
    }

    #[test]
    fn test_dropping_notifier_closes_sender() {
        let token = CancellationToken::new();
        let (sender, notifier) = channel(token);
        assert!(!sender.is_closed());

        drop(notifier);
        assert!(sender.is_closed());
    }
}
