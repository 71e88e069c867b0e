//! Cooperative cancellation shared between a tail's engine, its watcher and callers.
//!
//! A [`Lifecycle`] moves one way through three states: running, dying once a
//! stop is requested (by a caller or by a fatal error inside the engine), and
//! done once the engine has released its resources. The reason passed to the
//! first [`Lifecycle::kill`] becomes the terminal error reported by
//! [`Lifecycle::wait`].

use crate::error::{Error, Result};
use std::sync::{Arc, OnceLock};
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

/// Observable phase of a [`Lifecycle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Running,
    Dying,
    Done,
}

/// A cloneable handle to one tail's cancellation and terminal result.
#[derive(Debug, Clone, Default)]
pub struct Lifecycle {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    dying: CancellationToken,
    done: CancellationToken,
    reason: OnceLock<Option<Error>>,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> LifecycleState {
        if self.inner.done.is_cancelled() {
            LifecycleState::Done
        } else if self.inner.dying.is_cancelled() {
            LifecycleState::Dying
        } else {
            LifecycleState::Running
        }
    }

    /// Requests a stop. Only the first call decides the terminal error.
    pub fn kill(&self, reason: Option<Error>) {
        let _ = self.inner.reason.set(reason);
        self.inner.dying.cancel();
    }

    pub fn is_dying(&self) -> bool {
        self.inner.dying.is_cancelled()
    }

    /// Resolves once a stop has been requested.
    pub fn dying(&self) -> WaitForCancellationFuture<'_> {
        self.inner.dying.cancelled()
    }

    /// A token cancelled when this lifecycle starts dying, or earlier if cancelled directly.
    pub(crate) fn child_token(&self) -> CancellationToken {
        self.inner.dying.child_token()
    }

    /// Marks the engine as terminated. Implies dying.
    pub(crate) fn finish(&self) {
        self.kill(None);
        self.inner.done.cancel();
    }

    pub fn is_done(&self) -> bool {
        self.inner.done.is_cancelled()
    }

    /// Waits for termination and returns the terminal error, if any.
    pub async fn wait(&self) -> Result<()> {
        self.inner.done.cancelled().await;
        self.err().map_or(Ok(()), Err)
    }

    /// The terminal error recorded so far, if any.
    pub fn err(&self) -> Option<Error> {
        self.inner.reason.get().cloned().flatten()
    }
}
