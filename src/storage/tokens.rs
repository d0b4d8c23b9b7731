//! Token name caches.

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tracing::debug;

use crate::types::{PenumbraError, Result};

use super::record::{Record, RecordLoad, TokenRecord};
use super::stores::RecordStores;

/// The three token namespaces.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TokenKind {
    /// Node labels.
    Label,
    /// Relationship types.
    RelationshipType,
    /// Property keys.
    PropertyKey,
}

impl TokenKind {
    /// All kinds in a fixed order.
    pub const ALL: [TokenKind; 3] = [
        TokenKind::Label,
        TokenKind::RelationshipType,
        TokenKind::PropertyKey,
    ];

    pub(crate) fn code(self) -> u8 {
        match self {
            TokenKind::Label => 0,
            TokenKind::RelationshipType => 1,
            TokenKind::PropertyKey => 2,
        }
    }

    pub(crate) fn from_code(code: u8) -> Result<Self> {
        match code {
            0 => Ok(TokenKind::Label),
            1 => Ok(TokenKind::RelationshipType),
            2 => Ok(TokenKind::PropertyKey),
            _ => Err(PenumbraError::Corruption("unknown token kind")),
        }
    }

    fn index(self) -> usize {
        self.code() as usize
    }
}

#[derive(Default)]
struct Holder {
    by_name: FxHashMap<String, u32>,
    by_id: FxHashMap<u32, String>,
}

/// In-memory name/id maps for every token kind.
#[derive(Default)]
pub struct TokenHolders {
    holders: [RwLock<Holder>; 3],
}

impl TokenHolders {
    /// Id of `name`, if the token exists.
    pub fn id_of(&self, kind: TokenKind, name: &str) -> Option<u32> {
        self.holders[kind.index()].read().by_name.get(name).copied()
    }

    /// Name of token `id`.
    pub fn name_of(&self, kind: TokenKind, id: u32) -> Option<String> {
        self.holders[kind.index()].read().by_id.get(&id).cloned()
    }

    /// Registers a token. Re-adding the same pair is a no-op.
    pub fn add(&self, kind: TokenKind, id: u32, name: &str) {
        let mut holder = self.holders[kind.index()].write();
        holder.by_name.insert(name.to_owned(), id);
        holder.by_id.insert(id, name.to_owned());
    }

    /// Every token of `kind`, ordered by id.
    pub fn all(&self, kind: TokenKind) -> Vec<(u32, String)> {
        let holder = self.holders[kind.index()].read();
        let mut out: Vec<(u32, String)> = holder
            .by_id
            .iter()
            .map(|(id, name)| (*id, name.clone()))
            .collect();
        out.sort_unstable();
        out
    }

    /// Forgets every token.
    pub fn clear(&self) {
        for holder in &self.holders {
            *holder.write() = Holder::default();
        }
    }

    /// Reloads every token from the token stores.
    pub fn load(&self, stores: &RecordStores) -> Result<()> {
        self.clear();
        for kind in TokenKind::ALL {
            let store = stores.token_store(kind);
            let mut record = TokenRecord::new(0);
            let mut loaded = 0usize;
            for id in 0..store.high_id() {
                store.get_record(id, &mut record, RecordLoad::Check)?;
                if !record.in_use() {
                    continue;
                }
                let raw = stores.token_names.read_chain(record.name_id)?;
                let name = String::from_utf8(raw)
                    .map_err(|_| PenumbraError::Corruption("token name is not utf-8"))?;
                self.add(kind, id as u32, &name);
                loaded += 1;
            }
            debug!(?kind, loaded, "tokens.loaded");
        }
        Ok(())
    }
}
