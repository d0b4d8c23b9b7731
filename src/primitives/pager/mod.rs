#![forbid(unsafe_code)]

mod cache;
mod cursor;
mod frame;

pub use cache::{PageCache, PagedFile, PagerStats};
pub use cursor::{PageAccess, PageCursor};
