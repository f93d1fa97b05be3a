use crate::context::{History, Message};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Persists the conversation history as a pretty-printed JSON array.
pub struct MemoryStore {
    path: PathBuf,
}

impl MemoryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the saved history. A missing or unreadable file starts a
    /// fresh conversation rather than failing.
    pub fn load(&self) -> History {
        if !self.path.exists() {
            return History::new();
        }
        match fs::read_to_string(&self.path) {
            Ok(raw) => match serde_json::from_str::<Vec<Message>>(&raw) {
                Ok(messages) => History::from_messages(messages),
                Err(e) => {
                    tracing::warn!(
                        "Could not parse {}, starting fresh: {}",
                        self.path.display(),
                        e
                    );
                    History::new()
                }
            },
            Err(e) => {
                tracing::warn!("Error reading {}: {}", self.path.display(), e);
                History::new()
            }
        }
    }

    /// Writes through a sibling temp file so a crash mid-save never
    /// leaves a truncated memory file behind.
    pub fn save(&self, history: &History) -> io::Result<()> {
        let raw = serde_json::to_string_pretty(history.messages())?;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, raw)?;
        fs::rename(&tmp, &self.path)
    }
}
