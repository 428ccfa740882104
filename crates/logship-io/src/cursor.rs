//! File-backed cursor store.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use anyhow::{Context, Result};
use logship_core::{Cursor, CursorStore};

/// Durable single-cursor store backed by one small file, rewritten in
/// place.
///
/// File format: the raw bytes of the cursor, no header, no trailing
/// newline, truncated to exact length. An empty (or freshly created)
/// file means "start from the beginning".
pub struct FileCursorStore {
    file: File,
    current: Cursor,
}

impl FileCursorStore {
    /// Opens the cursor file, creating it if needed, and loads the
    /// stored cursor.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)
            .with_context(|| format!("opening cursor file at {}", path.display()))?;
        let mut raw = String::new();
        file.read_to_string(&mut raw)
            .with_context(|| format!("reading cursor file at {}", path.display()))?;
        Ok(Self {
            file,
            current: Cursor::new(raw),
        })
    }
}

impl CursorStore for FileCursorStore {
    fn cursor(&self) -> Cursor {
        self.current.clone()
    }

    /// Seek to the start, write the cursor bytes, truncate to their
    /// exact length, and fsync. Once this returns the file holds exactly
    /// the new cursor, whatever happens to the process afterwards.
    fn set(&mut self, cursor: &Cursor) -> Result<()> {
        self.file
            .seek(SeekFrom::Start(0))
            .context("seeking to start of cursor file")?;
        self.file
            .write_all(cursor.as_str().as_bytes())
            .context("writing cursor")?;
        self.file
            .set_len(cursor.as_str().len() as u64)
            .context("truncating cursor file")?;
        self.file.sync_all().context("syncing cursor file")?;
        self.current = cursor.clone();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_file_means_start_from_beginning() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cursor");
        let store = FileCursorStore::open(&path).unwrap();
        assert!(store.cursor().is_empty());
        assert!(path.exists());
    }

    #[test]
    fn set_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cursor");

        let mut store = FileCursorStore::open(&path).unwrap();
        store.set(&Cursor::from("s=abcd;i=12ef")).unwrap();
        assert_eq!(store.cursor().as_str(), "s=abcd;i=12ef");
        drop(store);

        let reopened = FileCursorStore::open(&path).unwrap();
        assert_eq!(reopened.cursor().as_str(), "s=abcd;i=12ef");
    }

    #[test]
    fn file_holds_exactly_the_last_cursor() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cursor");

        let mut store = FileCursorStore::open(&path).unwrap();
        store.set(&Cursor::from("a-much-longer-cursor-value")).unwrap();
        store.set(&Cursor::from("short")).unwrap();

        // the shorter write must truncate the longer one, with no
        // header and no trailing newline
        let raw = std::fs::read(&path).unwrap();
        assert_eq!(raw, b"short");
    }

    #[test]
    fn empty_cursor_empties_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cursor");

        let mut store = FileCursorStore::open(&path).unwrap();
        store.set(&Cursor::from("something")).unwrap();
        store.set(&Cursor::default()).unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"");
    }
}
