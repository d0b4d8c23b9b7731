use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;

/// A resident page. Holding an `Arc<Frame>` pins it against eviction.
pub struct Frame {
    /// Page number within the file.
    pub page_id: u64,
    /// Page contents.
    pub buf: RwLock<Box<[u8]>>,
    dirty: AtomicBool,
}

impl Frame {
    /// A clean frame over `buf`.
    pub fn new(page_id: u64, buf: Box<[u8]>) -> Self {
        Self {
            page_id,
            buf: RwLock::new(buf),
            dirty: AtomicBool::new(false),
        }
    }

    /// Marks the page as needing a write-back.
    pub fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }

    /// Whether the page has unflushed changes.
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// Clears the dirty flag and reports whether it was set.
    pub fn take_dirty(&self) -> bool {
        self.dirty.swap(false, Ordering::AcqRel)
    }
}
