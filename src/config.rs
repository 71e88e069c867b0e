//! Tail configuration.

use crate::error::{Error, Result};
use std::io::SeekFrom;
use std::time::Duration;

/// Default interval between stats when polling for changes.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Reference point for a [`SeekInfo`] offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Whence {
    #[default]
    Start,
    Current,
    End,
}

/// Where to position the file before the first read, as for a file seek.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeekInfo {
    pub offset: i64,
    pub whence: Whence,
}

impl SeekInfo {
    pub fn start(offset: u64) -> Self {
        Self {
            offset: offset as i64,
            whence: Whence::Start,
        }
    }

    /// Position at the current end of the file, so only new data is read.
    pub fn end() -> Self {
        Self {
            offset: 0,
            whence: Whence::End,
        }
    }

    /// Converts into a [`SeekFrom`], rejecting negative absolute offsets.
    pub fn to_seek_from(self) -> std::io::Result<SeekFrom> {
        match self.whence {
            Whence::Start => u64::try_from(self.offset).map(SeekFrom::Start).map_err(|_| {
                std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "negative offset from start of file",
                )
            }),
            Whence::Current => Ok(SeekFrom::Current(self.offset)),
            Whence::End => Ok(SeekFrom::End(self.offset)),
        }
    }
}

/// Specifies how a file must be tailed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Seek to this location before the first read.
    pub location: Option<SeekInfo>,
    /// Reopen the file when it is deleted or renamed (`tail -F`).
    pub reopen: bool,
    /// Fail at start if the file does not exist.
    pub must_exist: bool,
    /// Poll for changes instead of subscribing to filesystem events.
    pub poll: bool,
    /// The file is a named pipe and must never be seeked.
    pub pipe: bool,
    /// Keep waiting for new lines once the end of the file is reached (`tail -f`).
    pub follow: bool,
    /// Interval between stats for the polling watcher.
    pub poll_interval: Duration,
    /// Split delivered lines longer than this many bytes.
    pub max_line_size: Option<usize>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            location: None,
            reopen: false,
            must_exist: false,
            poll: false,
            pipe: false,
            follow: false,
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_line_size: None,
        }
    }
}

impl Config {
    /// Configuration equivalent to `tail -f`.
    pub fn follow() -> Self {
        Self {
            follow: true,
            ..Self::default()
        }
    }

    /// Configuration equivalent to `tail -F`.
    pub fn follow_retry() -> Self {
        Self {
            follow: true,
            reopen: true,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.reopen && !self.follow {
            return Err(Error::InvalidConfig("reopen requires follow"));
        }
        if self.poll && self.poll_interval.is_zero() {
            return Err(Error::InvalidConfig("poll interval must be non-zero"));
        }
        if self.max_line_size == Some(0) {
            return Err(Error::InvalidConfig("max line size must be non-zero"));
        }
        Ok(())
    }
}
