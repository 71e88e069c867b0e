//! Test utilities for creating and mutating temporary log files.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// A log file in its own temporary directory, removed on drop.
pub struct TempLogFile {
    pub path: PathBuf,
    temp_dir: tempfile::TempDir,
}

impl TempLogFile {
    /// Create a new, empty temporary log file for testing
    pub fn new() -> std::io::Result<Self> {
        let temp_dir = tempfile::tempdir()?;
        let path = temp_dir.path().join("test.log");

        File::create(&path)?;

        Ok(Self { path, temp_dir })
    }

    /// Create a temporary log file holding exactly `content`
    pub fn with_content(content: &str) -> std::io::Result<Self> {
        let temp_file = Self::new()?;
        temp_file.append(content)?;
        Ok(temp_file)
    }

    /// Append raw bytes, without a trailing newline
    pub fn append(&self, content: &str) -> std::io::Result<()> {
        let mut file = OpenOptions::new().append(true).open(&self.path)?;
        file.write_all(content.as_bytes())?;
        file.flush()
    }

    /// Append one complete line in a single write
    pub fn append_line(&self, line: &str) -> std::io::Result<()> {
        self.append(&format!("{}\n", line))
    }

    /// Truncate the file in place
    pub fn truncate(&self) -> std::io::Result<()> {
        File::create(&self.path)?;
        Ok(())
    }

    pub fn remove(&self) -> std::io::Result<()> {
        std::fs::remove_file(&self.path)
    }

    /// Move the file aside and start a new one at the same path (log rotation)
    pub fn rotate(&self, content: &str) -> std::io::Result<()> {
        std::fs::rename(&self.path, self.path.with_extension("log.1"))?;
        std::fs::write(&self.path, content)
    }

    /// Current size of the file at the path, zero if it is missing
    pub fn len(&self) -> u64 {
        std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn dir(&self) -> &Path {
        self.temp_dir.path()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_temp_log_file_creation() {
        let temp_file = TempLogFile::new().unwrap();
        assert!(temp_file.path().exists());
        assert_eq!(temp_file.len(), 0);
        assert_eq!(temp_file.path().parent(), Some(temp_file.dir()));
    }

    #[test]
    fn test_with_content_is_raw() {
        let temp_file = TempLogFile::with_content("a\nb").unwrap();

        let content = std::fs::read_to_string(temp_file.path()).unwrap();
        assert_eq!(content, "a\nb");
    }

    #[test]
    fn test_append_line() {
        let temp_file = TempLogFile::new().unwrap();
        temp_file.append_line("line 1").unwrap();
        temp_file.append("line ").unwrap();
        temp_file.append_line("2").unwrap();

        let content = std::fs::read_to_string(temp_file.path()).unwrap();
        assert_eq!(content, "line 1\nline 2\n");
        assert_eq!(temp_file.len(), 14);
    }

    #[test]
    fn test_truncate() {
        let temp_file = TempLogFile::with_content("initial content").unwrap();
        temp_file.truncate().unwrap();

        let content = std::fs::read_to_string(temp_file.path()).unwrap();
        assert!(content.is_empty());
    }

    #[test]
    fn test_rotate_keeps_old_file() {
        let temp_file = TempLogFile::with_content("old\n").unwrap();
        temp_file.rotate("new\n").unwrap();

        assert_eq!(std::fs::read_to_string(temp_file.path()).unwrap(), "new\n");
        let rotated = temp_file.dir().join("test.log.1");
        assert_eq!(std::fs::read_to_string(rotated).unwrap(), "old\n");
    }

    #[test]
    fn test_remove() {
        let temp_file = TempLogFile::with_content("gone\n").unwrap();
        temp_file.remove().unwrap();
        assert!(!temp_file.path().exists());
        assert_eq!(temp_file.len(), 0);
    }
}
