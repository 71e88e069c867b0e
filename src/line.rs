//! Lines delivered by a tail.

use crate::error::Error;
use std::time::SystemTime;

/// A line read from the file, with the time it was read.
#[derive(Debug, Clone)]
pub struct Line {
    pub text: String,
    pub time: SystemTime,
    /// Set when the line could not be delivered verbatim.
    pub err: Option<Error>,
}

impl Line {
    /// Creates a line stamped with the current time.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            time: SystemTime::now(),
            err: None,
        }
    }

    /// Decodes raw bytes, flagging the line if they were not valid UTF-8.
    pub(crate) fn from_bytes(bytes: Vec<u8>) -> Self {
        match String::from_utf8(bytes) {
            Ok(text) => Self::new(text),
            Err(err) => Self {
                text: String::from_utf8_lossy(err.as_bytes()).into_owned(),
                time: SystemTime::now(),
                err: Some(Error::Utf8(err)),
            },
        }
    }

    /// Splits this line into chunks of at most `max` bytes without breaking characters.
    pub(crate) fn split(self, max: usize) -> Vec<Line> {
        if self.text.len() <= max {
            return vec![self];
        }

        let mut chunks = Vec::new();
        let mut rest = self.text.as_str();
        while !rest.is_empty() {
            let mut end = max.min(rest.len());
            while !rest.is_char_boundary(end) {
                end -= 1;
            }
            // A single character wider than `max` still has to go somewhere.
            if end == 0 {
                end = rest.chars().next().map(char::len_utf8).unwrap_or(rest.len());
            }
            let (head, tail) = rest.split_at(end);
            chunks.push(Line {
                text: head.to_string(),
                time: self.time,
                err: self.err.clone(),
            });
            rest = tail;
        }
        chunks
    }
}

impl std::fmt::Display for Line {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.text)
    }
}
