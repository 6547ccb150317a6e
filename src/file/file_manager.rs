use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use super::error::{FileError, FileResult};
use super::BLOCK_SIZE;

/// Identifier for an open file, resolved through the manager's handle table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileId(usize);

impl FileId {
    pub fn as_usize(&self) -> usize {
        self.0
    }
}

struct OpenFile {
    file: File,
    path: PathBuf,
}

/// Owns every open file and performs whole-block reads and writes.
///
/// Block N of a file occupies bytes `[N * 4096, (N + 1) * 4096)`; there is
/// no file header. Frames refer to files by `FileId` only, never by a
/// direct reference.
pub struct FileManager {
    open_files: HashMap<FileId, OpenFile>,
    path_to_id: HashMap<PathBuf, FileId>,
    next_id: usize,
    max_open_files: usize,
}

impl FileManager {
    pub fn new() -> Self {
        Self::with_max_files(128)
    }

    pub fn with_max_files(max_open_files: usize) -> Self {
        Self {
            open_files: HashMap::new(),
            path_to_id: HashMap::new(),
            next_id: 0,
            max_open_files,
        }
    }

    /// Create a new empty file, along with any missing parent directories
    pub fn create_file<P: AsRef<Path>>(&mut self, path: P) -> FileResult<()> {
        let path = path.as_ref();

        if path.exists() {
            return Err(FileError::FileAlreadyExists(path.display().to_string()));
        }

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        File::create(path)?;
        Ok(())
    }

    /// Open an existing file, returning the existing id if already open
    pub fn open_file<P: AsRef<Path>>(&mut self, path: P) -> FileResult<FileId> {
        let path_ref = path.as_ref();
        let path = path_ref
            .canonicalize()
            .map_err(|_| FileError::FileNotFound(path_ref.display().to_string()))?;

        if let Some(&id) = self.path_to_id.get(&path) {
            return Ok(id);
        }

        if self.open_files.len() >= self.max_open_files {
            return Err(FileError::TooManyOpenFiles);
        }

        let file = OpenOptions::new().read(true).write(true).open(&path)?;

        let id = FileId(self.next_id);
        self.next_id += 1;

        self.open_files.insert(
            id,
            OpenFile {
                file,
                path: path.clone(),
            },
        );
        self.path_to_id.insert(path, id);

        Ok(id)
    }

    /// Close a file
    pub fn close_file(&mut self, id: FileId) -> FileResult<()> {
        let entry = self
            .open_files
            .remove(&id)
            .ok_or(FileError::InvalidHandle(id.0))?;

        self.path_to_id.remove(&entry.path);
        Ok(())
    }

    /// Delete a file from disk, closing it first if open
    pub fn remove_file<P: AsRef<Path>>(&mut self, path: P) -> FileResult<()> {
        let path = path.as_ref();

        if let Ok(canonical) = path.canonicalize()
            && let Some(&id) = self.path_to_id.get(&canonical)
        {
            self.close_file(id)?;
        }

        std::fs::remove_file(path)?;
        Ok(())
    }

    /// Read block `block_num` into `buf` (exactly `BLOCK_SIZE` bytes).
    /// Reading past the end of the file yields zeros.
    pub fn read_block(&mut self, id: FileId, block_num: i32, buf: &mut [u8]) -> FileResult<()> {
        debug_assert_eq!(buf.len(), BLOCK_SIZE);
        if block_num < 0 {
            return Err(FileError::InvalidBlockNum(block_num));
        }

        let entry = self
            .open_files
            .get_mut(&id)
            .ok_or(FileError::InvalidHandle(id.0))?;

        let offset = block_num as u64 * BLOCK_SIZE as u64;
        entry.file.seek(SeekFrom::Start(offset))?;

        let mut read = 0;
        while read < BLOCK_SIZE {
            let n = entry.file.read(&mut buf[read..])?;
            if n == 0 {
                break;
            }
            read += n;
        }
        buf[read..].fill(0);

        Ok(())
    }

    /// Write block `block_num` from `buf`, extending the file if needed
    pub fn write_block(&mut self, id: FileId, block_num: i32, buf: &[u8]) -> FileResult<()> {
        debug_assert_eq!(buf.len(), BLOCK_SIZE);
        if block_num < 0 {
            return Err(FileError::InvalidBlockNum(block_num));
        }

        let entry = self
            .open_files
            .get_mut(&id)
            .ok_or(FileError::InvalidHandle(id.0))?;

        let offset = block_num as u64 * BLOCK_SIZE as u64;
        entry.file.seek(SeekFrom::Start(offset))?;
        entry.file.write_all(buf)?;

        Ok(())
    }

    /// Sync every open file to disk
    pub fn sync_all(&mut self) -> FileResult<()> {
        for entry in self.open_files.values_mut() {
            entry.file.sync_data()?;
        }
        Ok(())
    }

    pub fn is_open(&self, id: FileId) -> bool {
        self.open_files.contains_key(&id)
    }

    pub fn open_file_count(&self) -> usize {
        self.open_files.len()
    }
}

impl Default for FileManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_create_and_open() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("t.records");
        let mut fm = FileManager::new();

        fm.create_file(&path).unwrap();
        assert!(path.exists());

        let id = fm.open_file(&path).unwrap();
        assert!(fm.is_open(id));

        // Opening twice yields the same id
        let id2 = fm.open_file(&path).unwrap();
        assert_eq!(id, id2);
        assert_eq!(fm.open_file_count(), 1);
    }

    #[test]
    fn test_create_existing_fails() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("t.records");
        let mut fm = FileManager::new();

        fm.create_file(&path).unwrap();
        assert!(matches!(
            fm.create_file(&path),
            Err(FileError::FileAlreadyExists(_))
        ));
    }

    #[test]
    fn test_open_missing_fails() {
        let dir = TempDir::new().unwrap();
        let mut fm = FileManager::new();

        let result = fm.open_file(dir.path().join("missing.records"));
        assert!(matches!(result, Err(FileError::FileNotFound(_))));
    }

    #[test]
    fn test_block_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("t.records");
        let mut fm = FileManager::new();
        fm.create_file(&path).unwrap();
        let id = fm.open_file(&path).unwrap();

        let mut buf = vec![0u8; BLOCK_SIZE];
        buf[0] = 7;
        buf[BLOCK_SIZE - 1] = 9;
        fm.write_block(id, 3, &buf).unwrap();

        let mut read = vec![0u8; BLOCK_SIZE];
        fm.read_block(id, 3, &mut read).unwrap();
        assert_eq!(read, buf);
    }

    #[test]
    fn test_read_past_end_is_zeros() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("t.records");
        let mut fm = FileManager::new();
        fm.create_file(&path).unwrap();
        let id = fm.open_file(&path).unwrap();

        let mut buf = vec![1u8; BLOCK_SIZE];
        fm.read_block(id, 42, &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_negative_block_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("t.records");
        let mut fm = FileManager::new();
        fm.create_file(&path).unwrap();
        let id = fm.open_file(&path).unwrap();

        let mut buf = vec![0u8; BLOCK_SIZE];
        assert!(matches!(
            fm.read_block(id, -1, &mut buf),
            Err(FileError::InvalidBlockNum(-1))
        ));
    }

    #[test]
    fn test_max_open_files() {
        let dir = TempDir::new().unwrap();
        let mut fm = FileManager::with_max_files(1);

        let a = dir.path().join("a.records");
        let b = dir.path().join("b.records");
        fm.create_file(&a).unwrap();
        fm.create_file(&b).unwrap();

        fm.open_file(&a).unwrap();
        assert!(matches!(fm.open_file(&b), Err(FileError::TooManyOpenFiles)));
    }

    #[test]
    fn test_remove_open_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("t.records");
        let mut fm = FileManager::new();
        fm.create_file(&path).unwrap();
        let id = fm.open_file(&path).unwrap();

        fm.remove_file(&path).unwrap();
        assert!(!path.exists());
        assert!(!fm.is_open(id));
    }
}
