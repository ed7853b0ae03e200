//! Spill directory and backing files.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tempfile::TempPath;

/// Directory in which every tile gets its own uniquely named backing file.
#[derive(Debug, Clone)]
pub struct SpillDirectory {
    root: PathBuf,
}

impl SpillDirectory {
    /// Open (creating if needed) the spill directory at `root`.
    pub fn open(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create a new empty backing file.
    pub fn create(&self) -> io::Result<BackingFile> {
        let path = tempfile::Builder::new()
            .prefix("tile-")
            .suffix(".raw")
            .tempfile_in(&self.root)?
            .into_temp_path();
        Ok(BackingFile { path })
    }
}

/// On-disk copy of one tile's buffer.
///
/// The file is deleted when the handle is dropped; [`BackingFile::delete`]
/// does the same but reports failures.
#[derive(Debug)]
pub struct BackingFile {
    path: TempPath,
}

impl BackingFile {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn delete(self) -> io::Result<()> {
        self.path.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_open_creates_nested_directory() {
        let dir = TempDir::new().unwrap();
        let spill = SpillDirectory::open(dir.path().join("a/b/spill")).unwrap();
        assert!(spill.root().is_dir());
    }

    #[test]
    fn test_backing_files_are_unique() {
        let dir = TempDir::new().unwrap();
        let spill = SpillDirectory::open(dir.path()).unwrap();
        let a = spill.create().unwrap();
        let b = spill.create().unwrap();
        assert_ne!(a.path(), b.path());
        assert!(a.path().starts_with(dir.path()));
        assert!(a.path().file_name().unwrap().to_str().unwrap().starts_with("tile-"));
    }

    #[test]
    fn test_delete_removes_file() {
        let dir = TempDir::new().unwrap();
        let spill = SpillDirectory::open(dir.path()).unwrap();
        let file = spill.create().unwrap();
        let path = file.path().to_path_buf();
        assert!(path.exists());
        file.delete().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_drop_removes_file() {
        let dir = TempDir::new().unwrap();
        let spill = SpillDirectory::open(dir.path()).unwrap();
        let path = {
            let file = spill.create().unwrap();
            file.path().to_path_buf()
        };
        assert!(!path.exists());
    }
}
