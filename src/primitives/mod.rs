//! Low-level primitives for building the storage engine.
//!
//! Includes byte utilities, positioned file I/O, the page cache, the lock
//! manager, and the segmented transaction log.

/// Byte-level utilities and encoding/decoding.
pub mod bytes;

/// Positioned file I/O.
pub mod io;

/// Entity lock manager.
pub mod locks;

/// Segmented transaction log.
pub mod log;

/// Page cache and page cursors.
pub mod pager;
