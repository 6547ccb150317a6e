use lru::LruCache;
use std::num::NonZeroUsize;

use super::error::FileResult;
use super::file_manager::{FileId, FileManager};
use super::{BLOCK_SIZE, CACHE_CAPACITY};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct FrameKey {
    file: FileId,
    block_num: i32,
}

struct Frame {
    data: Box<[u8]>,
    dirty: bool,
}

/// Bounded pool of in-memory block frames shared by every open file.
///
/// Frames are owned by the cache; callers borrow a frame only until the
/// next cache call, which may evict it. Eviction picks the least recently
/// used frame and writes it back first when dirty — the same policy the
/// age-counter scheme expresses, with O(1) hit accounting.
pub struct BlockCache {
    file_manager: FileManager,
    frames: LruCache<FrameKey, Frame>,
    capacity: usize,
}

impl BlockCache {
    pub fn new(file_manager: FileManager) -> Self {
        Self::with_capacity(file_manager, CACHE_CAPACITY)
    }

    pub fn with_capacity(file_manager: FileManager, capacity: usize) -> Self {
        Self {
            file_manager,
            frames: LruCache::new(NonZeroUsize::new(capacity).unwrap()),
            capacity,
        }
    }

    pub fn file_manager(&self) -> &FileManager {
        &self.file_manager
    }

    pub fn file_manager_mut(&mut self) -> &mut FileManager {
        &mut self.file_manager
    }

    /// Borrow the current contents of a block, reading it in on a miss
    pub fn get_block(&mut self, file: FileId, block_num: i32) -> FileResult<&[u8]> {
        let key = FrameKey { file, block_num };

        if self.frames.peek(&key).is_none() {
            self.load(key)?;
        }

        Ok(&self.frames.get(&key).unwrap().data)
    }

    /// Borrow a block mutably; the frame is marked dirty
    pub fn get_block_mut(&mut self, file: FileId, block_num: i32) -> FileResult<&mut [u8]> {
        let key = FrameKey { file, block_num };

        if self.frames.peek(&key).is_none() {
            self.load(key)?;
        }

        let frame = self.frames.get_mut(&key).unwrap();
        frame.dirty = true;
        Ok(&mut frame.data)
    }

    /// Write every dirty frame back and sync the underlying files
    pub fn flush_all(&mut self) -> FileResult<()> {
        let dirty: Vec<FrameKey> = self
            .frames
            .iter()
            .filter(|(_, f)| f.dirty)
            .map(|(k, _)| *k)
            .collect();

        for key in dirty {
            // peek_mut keeps the recency order untouched
            if let Some(frame) = self.frames.peek_mut(&key)
                && frame.dirty
            {
                self.file_manager
                    .write_block(key.file, key.block_num, &frame.data)?;
                frame.dirty = false;
            }
        }

        self.file_manager.sync_all()?;
        Ok(())
    }

    /// Delete a file from disk, dropping its cached frames first so no
    /// later flush writes into a dead handle
    pub fn remove_file(&mut self, path: &std::path::Path) -> FileResult<()> {
        if path.exists() {
            let id = self.file_manager.open_file(path)?;
            self.discard_file(id);
            self.file_manager.remove_file(path)?;
        }
        Ok(())
    }

    /// Drop a file's frames without writing them back. Used when the file
    /// itself is being deleted.
    pub fn discard_file(&mut self, file: FileId) {
        let stale: Vec<FrameKey> = self
            .frames
            .iter()
            .filter(|(k, _)| k.file == file)
            .map(|(k, _)| *k)
            .collect();
        for key in stale {
            self.frames.pop(&key);
        }
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    pub fn dirty_count(&self) -> usize {
        self.frames.iter().filter(|(_, f)| f.dirty).count()
    }

    pub fn is_cached(&self, file: FileId, block_num: i32) -> bool {
        self.frames.contains(&FrameKey { file, block_num })
    }

    fn load(&mut self, key: FrameKey) -> FileResult<()> {
        while self.frames.len() >= self.capacity {
            self.evict_lru()?;
        }

        let mut data = vec![0u8; BLOCK_SIZE].into_boxed_slice();
        self.file_manager
            .read_block(key.file, key.block_num, &mut data)?;

        self.frames.put(key, Frame { data, dirty: false });
        Ok(())
    }

    fn evict_lru(&mut self) -> FileResult<()> {
        if let Some((key, frame)) = self.frames.pop_lru() {
            if frame.dirty {
                log::debug!(
                    "evicting dirty frame file={} block={}",
                    key.file.as_usize(),
                    key.block_num
                );
                self.file_manager
                    .write_block(key.file, key.block_num, &frame.data)?;
            }
        }
        Ok(())
    }
}

impl Drop for BlockCache {
    fn drop(&mut self) {
        let _ = self.flush_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, BlockCache, FileId) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("t.records");

        let mut fm = FileManager::new();
        fm.create_file(&path).unwrap();
        let id = fm.open_file(&path).unwrap();

        (dir, BlockCache::new(fm), id)
    }

    #[test]
    fn test_miss_loads_from_disk() {
        let (_dir, mut cache, id) = setup();

        let mut buf = vec![0u8; BLOCK_SIZE];
        buf[0] = 42;
        cache.file_manager_mut().write_block(id, 0, &buf).unwrap();

        let block = cache.get_block(id, 0).unwrap();
        assert_eq!(block[0], 42);
        assert_eq!(cache.frame_count(), 1);
    }

    #[test]
    fn test_mutation_marks_dirty() {
        let (_dir, mut cache, id) = setup();

        cache.get_block_mut(id, 0).unwrap()[0] = 99;
        assert_eq!(cache.dirty_count(), 1);

        cache.flush_all().unwrap();
        assert_eq!(cache.dirty_count(), 0);

        let mut buf = vec![0u8; BLOCK_SIZE];
        cache.file_manager_mut().read_block(id, 0, &mut buf).unwrap();
        assert_eq!(buf[0], 99);
    }

    #[test]
    fn test_lru_eviction_order() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("t.records");
        let mut fm = FileManager::new();
        fm.create_file(&path).unwrap();
        let id = fm.open_file(&path).unwrap();
        let mut cache = BlockCache::with_capacity(fm, 3);

        cache.get_block(id, 0).unwrap();
        cache.get_block(id, 1).unwrap();
        cache.get_block(id, 2).unwrap();

        // Touch block 0 so block 1 is now the oldest
        cache.get_block(id, 0).unwrap();
        cache.get_block(id, 3).unwrap();

        assert!(cache.is_cached(id, 0));
        assert!(!cache.is_cached(id, 1));
        assert!(cache.is_cached(id, 2));
        assert!(cache.is_cached(id, 3));
        assert_eq!(cache.frame_count(), 3);
    }

    #[test]
    fn test_dirty_frame_survives_eviction() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("t.records");
        let mut fm = FileManager::new();
        fm.create_file(&path).unwrap();
        let id = fm.open_file(&path).unwrap();
        let mut cache = BlockCache::with_capacity(fm, 2);

        cache.get_block_mut(id, 0).unwrap()[0] = 77;

        // Force block 0 out of the pool
        cache.get_block(id, 1).unwrap();
        cache.get_block(id, 2).unwrap();
        assert!(!cache.is_cached(id, 0));

        let block = cache.get_block(id, 0).unwrap();
        assert_eq!(block[0], 77);
    }

    #[test]
    fn test_drop_flushes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("t.records");

        {
            let mut fm = FileManager::new();
            fm.create_file(&path).unwrap();
            let id = fm.open_file(&path).unwrap();
            let mut cache = BlockCache::new(fm);
            cache.get_block_mut(id, 0).unwrap()[0] = 88;
        }

        let mut fm = FileManager::new();
        let id = fm.open_file(&path).unwrap();
        let mut buf = vec![0u8; BLOCK_SIZE];
        fm.read_block(id, 0, &mut buf).unwrap();
        assert_eq!(buf[0], 88);
    }

    #[test]
    fn test_frames_are_per_file() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a.records");
        let b = dir.path().join("b.records");
        let mut fm = FileManager::new();
        fm.create_file(&a).unwrap();
        fm.create_file(&b).unwrap();
        let ida = fm.open_file(&a).unwrap();
        let idb = fm.open_file(&b).unwrap();
        let mut cache = BlockCache::new(fm);

        cache.get_block_mut(ida, 0).unwrap()[0] = 11;
        cache.get_block_mut(idb, 0).unwrap()[0] = 22;

        assert_eq!(cache.get_block(ida, 0).unwrap()[0], 11);
        assert_eq!(cache.get_block(idb, 0).unwrap()[0], 22);
    }
}
