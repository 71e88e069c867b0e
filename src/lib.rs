//! A `tail -f` engine: streams the lines of a file as it grows.
//!
//! A [`Tail`] reads a file from a configurable position and emits each line
//! as an async stream. When following, it waits for the file to change
//! and survives truncation and, optionally, deletion and recreation (log
//! rotation). Changes are detected from filesystem notifications or by
//! polling.
//!
//! # Example
//!
//! ```rust,no_run
//! use log_tail::{Config, tail_file};
//! use tokio_stream::StreamExt;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut tail = tail_file("app.log", Config::follow_retry()).await?;
//!
//!     while let Some(line) = tail.next().await {
//!         match line.err {
//!             None => println!("{}", line.text),
//!             Some(e) => eprintln!("Warning: {}", e),
//!         }
//!     }
//!
//!     tail.wait().await?;
//!     Ok(())
//! }
//! ```

mod changes;
mod config;
mod engine;
mod error;
mod lifecycle;
mod line;
mod tail;
mod watch;

#[cfg(test)]
mod test_helpers;

// Public API exports
pub use changes::{Change, ChangeNotifier};
pub use config::{Config, DEFAULT_POLL_INTERVAL, SeekInfo, Whence};
pub use error::{Error, Result};
pub use lifecycle::{Lifecycle, LifecycleState};
pub use line::Line;
pub use tail::Tail;
pub use watch::{FileId, FileWatcher, InotifyFileWatcher, PollingFileWatcher, WatchRegistry, Watcher, cleanup};

use std::path::Path;

/// Starts tailing a file.
///
/// # Arguments
///
/// * `path` - File path to tail
/// * `config` - Start position, follow and reopen behavior, watcher selection
///
/// # Example
///
/// ```rust,no_run
/// use log_tail::{Config, SeekInfo, tail_file};
/// use tokio_stream::StreamExt;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = Config {
///         location: Some(SeekInfo::end()),
///         ..Config::follow()
///     };
///     let mut tail = tail_file("app.log", config).await?;
///
///     while let Some(line) = tail.next().await {
///         println!("{}", line);
///     }
///
///     Ok(())
/// }
/// ```
pub async fn tail_file<P: AsRef<Path>>(path: P, config: Config) -> Result<Tail> {
    Tail::new(path, config).await
}
