use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, TimeZone};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// Append-only chat history backed by a flat text file.
///
/// Every operation takes the lock for the duration of the file access only,
/// so lines from concurrent sessions interleave but never tear.
pub struct HistoryStore {
    path: Mutex<PathBuf>,
}

impl HistoryStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: Mutex::new(path.as_ref().to_path_buf()),
        }
    }

    /// Appends one line, creating the file if needed.
    pub async fn append(&self, line: &[u8]) -> Result<()> {
        let path = self.path.lock().await;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&*path)
            .await
            .with_context(|| format!("opening history file {}", path.display()))?;
        file.write_all(line)
            .await
            .with_context(|| format!("appending to history file {}", path.display()))?;
        file.flush().await?;
        Ok(())
    }

    /// Returns the full log. A log that was never written is empty.
    pub async fn read_all(&self) -> Result<Vec<u8>> {
        let path = self.path.lock().await;
        match fs::read(&*path).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => {
                Err(e).with_context(|| format!("reading history file {}", path.display()))
            }
        }
    }
}

// ─── Log line shapes ───────────────────────────────────────────────────────

// Names and text are written through byte for byte.
fn line_of(parts: &[&[u8]]) -> Vec<u8> {
    parts.concat()
}

pub fn joined_line(name: &[u8]) -> Vec<u8> {
    line_of(&[b"*** ", name, b" joined the chat ***\n"])
}

pub fn renamed_line(old: &[u8], new: &[u8]) -> Vec<u8> {
    line_of(&[b"*** ", old, b" changed their name to ", new, b" ***\n"])
}

pub fn left_line(name: &[u8]) -> Vec<u8> {
    line_of(&[b"*** ", name, b" has left the chat ***\n"])
}

/// `text` is expected to carry its own trailing newline.
pub fn message_line<Tz>(at: &DateTime<Tz>, name: &[u8], text: &[u8]) -> Vec<u8>
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    let stamp = at.format("[%Y-%m-%d][%H:%M:%S]").to_string();
    line_of(&[stamp.as_bytes(), b"[", name, b"]: ", text])
}
