//! Reusable cursors over the record stores.
//!
//! A cursor is initialised with `single` or `scan` (or a traversal-specific
//! init), advanced with `next`, and released with `close`. Cursors hold a
//! record value plus positioning state; the record fields are exposed through
//! accessors. Closing releases the page cursor; a closed cursor yields nothing
//! until it is initialised again.

mod group;
mod node;
mod property;
mod relationship;
mod traversal;

pub use group::{BufferedGroup, RelationshipGroupCursor};
pub use node::NodeCursor;
pub use property::PropertyCursor;
pub use relationship::RelationshipScanCursor;
pub use traversal::{RelationshipTraversalCursor, TraversalState};

use crate::primitives::pager::{PageAccess, PageCursor};
use crate::types::{RelTypeId, Result};

use super::record::{Record, RecordLoad, RelationshipRecord};
use super::store::RecordStore;

/// Direction of relationships relative to a node.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Direction {
    /// The node is the start node.
    Outgoing,
    /// The node is the end node.
    Incoming,
    /// Either.
    Both,
}

impl Direction {
    /// Whether a relationship between `first` and `second` matches from `node`'s side.
    /// Self-loops match every direction.
    pub fn matches(self, node: u64, first: u64, second: u64) -> bool {
        match self {
            Direction::Both => true,
            _ if first == second => true,
            Direction::Outgoing => first == node,
            Direction::Incoming => second == node,
        }
    }
}

/// Which relationships a traversal yields.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RelationshipSelection {
    /// Accepted types; `None` accepts every type.
    pub types: Option<Vec<RelTypeId>>,
    /// Accepted direction.
    pub direction: Direction,
}

impl RelationshipSelection {
    /// Every relationship.
    pub fn all() -> Self {
        Self {
            types: None,
            direction: Direction::Both,
        }
    }

    /// Relationships in `direction` of any type.
    pub fn direction(direction: Direction) -> Self {
        Self {
            types: None,
            direction,
        }
    }

    /// Relationships of `rel_type` in `direction`.
    pub fn typed(rel_type: RelTypeId, direction: Direction) -> Self {
        Self {
            types: Some(vec![rel_type]),
            direction,
        }
    }

    /// Whether `rel_type` is accepted.
    pub fn accepts_type(&self, rel_type: u32) -> bool {
        self.types
            .as_ref()
            .map_or(true, |types| types.contains(&RelTypeId(rel_type)))
    }

    /// Whether `record` is accepted as seen from `node`.
    pub fn accepts(&self, node: u64, record: &RelationshipRecord) -> bool {
        self.accepts_type(record.rel_type)
            && self
                .direction
                .matches(node, record.first_node, record.second_node)
    }
}

/// Positioning of a store cursor.
///
/// A single cursor visits exactly one id and never consults the high mark. A
/// scan cursor visits ids up to its high mark and re-reads the store's high id
/// when it gets there, so records added during the scan may be observed.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ScanMode {
    /// Not initialised, or closed.
    Idle,
    /// Reading exactly one id.
    Single {
        /// The id to read.
        id: u64,
        /// Whether `next` already ran.
        consumed: bool,
    },
    /// Reading every in-use record.
    Scan {
        /// Next id to read.
        next: u64,
        /// Store high id observed so far.
        high_mark: u64,
    },
}

/// Shared state for cursors that walk one store by id.
pub(crate) struct StoreCursor<'a, R: Record> {
    store: &'a RecordStore<R>,
    page: Option<PageCursor>,
    mode: ScanMode,
    pub(crate) record: R,
}

impl<'a, R: Record> StoreCursor<'a, R> {
    pub(crate) fn new(store: &'a RecordStore<R>) -> Self {
        Self {
            store,
            page: None,
            mode: ScanMode::Idle,
            record: R::new(0),
        }
    }

    pub(crate) fn single(&mut self, id: u64) {
        self.mode = ScanMode::Single {
            id,
            consumed: false,
        };
        self.record.clear();
    }

    pub(crate) fn scan(&mut self) {
        self.mode = ScanMode::Scan {
            next: 0,
            high_mark: self.store.high_id(),
        };
        self.record.clear();
    }

    pub(crate) fn mode(&self) -> ScanMode {
        self.mode
    }

    fn read(&mut self, id: u64) -> Result<()> {
        let store = self.store;
        let page = self
            .page
            .get_or_insert_with(|| store.open_cursor(PageAccess::Read));
        store.read_record(id, &mut self.record, RecordLoad::Check, page)
    }

    pub(crate) fn next(&mut self) -> Result<bool> {
        match self.mode {
            ScanMode::Idle => Ok(false),
            ScanMode::Single { id, consumed } => {
                if consumed {
                    return Ok(false);
                }
                self.mode = ScanMode::Single { id, consumed: true };
                self.read(id)?;
                Ok(self.record.in_use())
            }
            ScanMode::Scan {
                mut next,
                mut high_mark,
            } => loop {
                if next >= high_mark {
                    let current = self.store.high_id();
                    if current <= high_mark {
                        self.mode = ScanMode::Scan { next, high_mark };
                        self.record.clear();
                        return Ok(false);
                    }
                    high_mark = current;
                }
                let id = next;
                next += 1;
                self.read(id)?;
                if self.record.in_use() {
                    self.mode = ScanMode::Scan { next, high_mark };
                    return Ok(true);
                }
            },
        }
    }

    pub(crate) fn close(&mut self) {
        if let Some(mut page) = self.page.take() {
            page.close();
        }
        self.mode = ScanMode::Idle;
        self.record.clear();
    }
}
