use std::sync::Arc;

use crate::types::{PenumbraError, Result};

use super::cache::PagedFile;
use super::frame::Frame;

/// Whether a cursor may modify the pages it visits.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PageAccess {
    /// Shared read access; pages past the end of file are reported as missing.
    Read,
    /// Write access; visiting a page past the end of file grows the file.
    Write,
}

/// Positions over one page at a time and keeps that page pinned.
pub struct PageCursor {
    file: Arc<PagedFile>,
    access: PageAccess,
    current: Option<Arc<Frame>>,
}

impl PageCursor {
    /// Opens an unpositioned cursor.
    pub fn new(file: Arc<PagedFile>, access: PageAccess) -> Self {
        Self {
            file,
            access,
            current: None,
        }
    }

    /// Moves to `page_id`. Returns `false` when a read cursor asks for a page that does not exist.
    pub fn next(&mut self, page_id: u64) -> Result<bool> {
        if self
            .current
            .as_ref()
            .is_some_and(|frame| frame.page_id == page_id)
        {
            return Ok(true);
        }
        self.current = None;
        self.current = self
            .file
            .pin(page_id, self.access == PageAccess::Write)?;
        Ok(self.current.is_some())
    }

    /// Page the cursor is positioned on.
    pub fn page_id(&self) -> Option<u64> {
        self.current.as_ref().map(|frame| frame.page_id)
    }

    /// Releases the pinned page.
    pub fn close(&mut self) {
        self.current = None;
    }

    fn frame(&self) -> Result<&Arc<Frame>> {
        self.current
            .as_ref()
            .ok_or(PenumbraError::Invalid("page cursor is not positioned"))
    }

    fn check_bounds(&self, offset: usize, len: usize) -> Result<()> {
        match offset.checked_add(len) {
            Some(end) if end <= self.file.page_size() => Ok(()),
            _ => Err(PenumbraError::Invalid("page access out of bounds")),
        }
    }

    /// Copies bytes out of the current page.
    pub fn get_bytes(&self, offset: usize, dst: &mut [u8]) -> Result<()> {
        self.check_bounds(offset, dst.len())?;
        let frame = self.frame()?;
        let buf = frame.buf.read();
        dst.copy_from_slice(&buf[offset..offset + dst.len()]);
        Ok(())
    }

    /// Copies bytes into the current page and marks it dirty.
    pub fn put_bytes(&mut self, offset: usize, src: &[u8]) -> Result<()> {
        if self.access != PageAccess::Write {
            return Err(PenumbraError::Invalid("write through a read cursor"));
        }
        self.check_bounds(offset, src.len())?;
        let frame = self.frame()?;
        let mut buf = frame.buf.write();
        buf[offset..offset + src.len()].copy_from_slice(src);
        frame.mark_dirty();
        Ok(())
    }

    /// Reads one byte.
    pub fn get_u8(&self, offset: usize) -> Result<u8> {
        let mut raw = [0u8; 1];
        self.get_bytes(offset, &mut raw)?;
        Ok(raw[0])
    }

    /// Reads a big-endian u64.
    pub fn get_u64(&self, offset: usize) -> Result<u64> {
        let mut raw = [0u8; 8];
        self.get_bytes(offset, &mut raw)?;
        Ok(u64::from_be_bytes(raw))
    }

    /// Writes one byte.
    pub fn put_u8(&mut self, offset: usize, value: u8) -> Result<()> {
        self.put_bytes(offset, &[value])
    }

    /// Writes a big-endian u64.
    pub fn put_u64(&mut self, offset: usize, value: u64) -> Result<()> {
        self.put_bytes(offset, &value.to_be_bytes())
    }
}
