use catalog_storage::SqliteStore;
use serde::{Deserialize, Serialize};
use tempfile::TempDir;

/// Form values of the lesson editor, used across the form tests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LessonDraft {
    pub title: String,
    pub summary: String,
    pub duration_minutes: u32,
    pub tags: Vec<String>,
}

impl Default for LessonDraft {
    fn default() -> Self {
        Self {
            title: "Untitled lesson".into(),
            summary: String::new(),
            duration_minutes: 15,
            tags: Vec::new(),
        }
    }
}

/// A SQLite store in a fresh temp directory. Keep the `TempDir` alive for as
/// long as the store is used.
pub fn temp_sqlite() -> Result<(TempDir, SqliteStore), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("recovery.db");
    let store = SqliteStore::open(&path.to_string_lossy())?;
    Ok((dir, store))
}
