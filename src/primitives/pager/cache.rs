use std::{
    path::Path,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Weak,
    },
};

use lru::LruCache;
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::primitives::io::{FileIo, StdFileIo};
use crate::types::{PenumbraError, Result};

use super::frame::Frame;

/// Counters describing page cache behaviour.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PagerStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses.
    pub misses: u64,
    /// Number of page evictions from cache.
    pub evictions: u64,
    /// Number of dirty pages written back.
    pub dirty_writebacks: u64,
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    dirty_writebacks: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> PagerStats {
        PagerStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            dirty_writebacks: self.dirty_writebacks.load(Ordering::Relaxed),
        }
    }
}

/// Shared page cache. Every store file is mapped through it.
pub struct PageCache {
    page_size: usize,
    pages_per_file: usize,
    files: Mutex<Vec<Weak<PagedFile>>>,
}

impl PageCache {
    /// Creates a cache holding at most `pages_per_file` unpinned frames for each mapped file.
    pub fn new(page_size: usize, pages_per_file: usize) -> Self {
        Self {
            page_size,
            pages_per_file: pages_per_file.max(1),
            files: Mutex::new(Vec::new()),
        }
    }

    /// Page size in bytes.
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Maps a file on disk, creating it when absent.
    pub fn map(&self, path: &Path) -> Result<Arc<PagedFile>> {
        let io = StdFileIo::open(path)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.map_io(name, Arc::new(io))
    }

    /// Maps an arbitrary file implementation.
    pub fn map_io(&self, name: impl Into<String>, io: Arc<dyn FileIo>) -> Result<Arc<PagedFile>> {
        let len = io.len()?;
        let page_size = self.page_size as u64;
        let file = Arc::new(PagedFile {
            name: name.into(),
            io,
            page_size: self.page_size,
            state: Mutex::new(PagedFileState {
                frames: LruCache::unbounded(),
                capacity: self.pages_per_file,
                page_count: len.div_ceil(page_size),
            }),
            counters: Counters::default(),
        });
        let mut files = self.files.lock();
        files.retain(|weak| weak.strong_count() > 0);
        files.push(Arc::downgrade(&file));
        debug!(file = %file.name, pages = len.div_ceil(page_size), "pager.map");
        Ok(file)
    }

    /// Writes every dirty page of every mapped file and forces it to disk.
    pub fn flush_and_force(&self) -> Result<()> {
        let files: Vec<Arc<PagedFile>> = self.files.lock().iter().filter_map(Weak::upgrade).collect();
        for file in files {
            file.flush_and_force()?;
        }
        Ok(())
    }

    /// Aggregated statistics over all mapped files.
    pub fn stats(&self) -> PagerStats {
        let files = self.files.lock();
        files
            .iter()
            .filter_map(Weak::upgrade)
            .fold(PagerStats::default(), |mut acc, file| {
                let s = file.stats();
                acc.hits += s.hits;
                acc.misses += s.misses;
                acc.evictions += s.evictions;
                acc.dirty_writebacks += s.dirty_writebacks;
                acc
            })
    }
}

struct PagedFileState {
    frames: LruCache<u64, Arc<Frame>>,
    capacity: usize,
    page_count: u64,
}

/// A single file mapped through the page cache.
pub struct PagedFile {
    name: String,
    io: Arc<dyn FileIo>,
    page_size: usize,
    state: Mutex<PagedFileState>,
    counters: Counters,
}

impl PagedFile {
    /// File name used in logs.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Page size in bytes.
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Number of pages that exist on disk or have been written through the cache.
    pub fn page_count(&self) -> u64 {
        self.state.lock().page_count
    }

    /// Cache statistics for this file.
    pub fn stats(&self) -> PagerStats {
        self.counters.snapshot()
    }

    pub(crate) fn pin(&self, page_id: u64, grow: bool) -> Result<Option<Arc<Frame>>> {
        let mut state = self.state.lock();
        if let Some(frame) = state.frames.get(&page_id) {
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(Some(Arc::clone(frame)));
        }
        if page_id >= state.page_count && !grow {
            return Ok(None);
        }
        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        if state.frames.len() >= state.capacity {
            self.evict_one(&mut state)?;
        }
        let mut buf = vec![0u8; self.page_size].into_boxed_slice();
        let offset = page_id
            .checked_mul(self.page_size as u64)
            .ok_or(PenumbraError::Invalid("page offset overflow"))?;
        self.io.read_at_or_zero(offset, &mut buf)?;
        let frame = Arc::new(Frame::new(page_id, buf));
        state.frames.put(page_id, Arc::clone(&frame));
        if page_id >= state.page_count {
            state.page_count = page_id + 1;
        }
        trace!(file = %self.name, page_id, "pager.page_in");
        Ok(Some(frame))
    }

    fn evict_one(&self, state: &mut PagedFileState) -> Result<()> {
        let victim = state
            .frames
            .iter()
            .rev()
            .find(|(_, frame)| Arc::strong_count(frame) == 1)
            .map(|(page_id, _)| *page_id);
        let Some(page_id) = victim else {
            // every frame is pinned; run over capacity until cursors let go
            return Ok(());
        };
        if let Some(frame) = state.frames.pop(&page_id) {
            self.write_back(&frame)?;
            self.counters.evictions.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }

    fn write_back(&self, frame: &Frame) -> Result<()> {
        if frame.take_dirty() {
            let buf = frame.buf.read();
            self.io
                .write_at(frame.page_id * self.page_size as u64, &buf)?;
            self.counters
                .dirty_writebacks
                .fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }

    /// Writes every dirty page and syncs the file.
    pub fn flush_and_force(&self) -> Result<()> {
        let state = self.state.lock();
        let mut dirty: Vec<&Arc<Frame>> = state
            .frames
            .iter()
            .map(|(_, frame)| frame)
            .filter(|frame| frame.is_dirty())
            .collect();
        dirty.sort_by_key(|frame| frame.page_id);
        for frame in dirty {
            self.write_back(frame)?;
        }
        self.io.sync_all()
    }

    /// Drops every cached page and empties the file.
    pub fn truncate(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.frames.clear();
        state.page_count = 0;
        self.io.truncate(0)?;
        self.io.sync_all()
    }
}
