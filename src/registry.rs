// src/registry.rs
//
// Owns the per-instrument books, the security-definition metadata and the
// dirty set driving conflation. Books are created lazily on first sighting;
// the dispatch loop borrows them one at a time.

use hashbrown::{HashMap, HashSet};
use smallvec::SmallVec;

use crate::book::OrderBook;
use crate::protocol::{self, IncrementalEntry, SecurityDefinition, SnapshotEntry};

#[derive(Debug, Clone, Copy)]
pub struct InstrumentMeta {
    pub symbol: [u8; 8],
    pub min_price_increment: i64,
    pub display_factor: u32,
    pub trading_status: u8,
}

#[derive(Debug, Default)]
pub struct InstrumentRegistry {
    books: HashMap<u32, OrderBook>,
    meta: HashMap<u32, InstrumentMeta>,
    dirty: HashSet<u32>,
}

impl InstrumentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn book_mut(&mut self, security_id: u32) -> &mut OrderBook {
        self.books
            .entry(security_id)
            .or_insert_with(|| OrderBook::new(security_id))
    }

    pub fn book(&self, security_id: u32) -> Option<&OrderBook> {
        self.books.get(&security_id)
    }

    pub fn has_book(&self, security_id: u32) -> bool {
        self.books.contains_key(&security_id)
    }

    /// Applies one gated incremental entry and marks the instrument dirty.
    pub fn apply_incremental(&mut self, entry: &IncrementalEntry) {
        self.book_mut(entry.security_id).apply_update(entry);
        self.dirty.insert(entry.security_id);
    }

    /// Wholesale book replacement from a snapshot at `rpt_seq`.
    pub fn apply_snapshot<I>(&mut self, security_id: u32, entries: I, rpt_seq: u32)
    where
        I: IntoIterator<Item = SnapshotEntry>,
    {
        let book = self.book_mut(security_id);
        book.apply_snapshot(entries);
        book.set_last_rpt_seq(rpt_seq);
        self.dirty.insert(security_id);
    }

    /// Records wire metadata for an instrument, creating its book if needed.
    pub fn upsert_definition(&mut self, def: &SecurityDefinition) {
        let mut symbol = [0u8; 8];
        let n = def
            .symbol
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(def.symbol.len())
            .min(8);
        symbol[..n].copy_from_slice(&def.symbol[..n]);

        self.meta.insert(
            def.security_id,
            InstrumentMeta {
                symbol,
                min_price_increment: def.min_price_increment,
                display_factor: def.display_factor,
                trading_status: def.trading_status,
            },
        );
        self.book_mut(def.security_id);
    }

    /// Published symbol for an instrument: wire definition first, the static
    /// catalog as fallback, "UNKNOWN" otherwise. NUL-padded to 8 bytes.
    pub fn symbol_bytes(&self, security_id: u32) -> [u8; 8] {
        if let Some(meta) = self.meta.get(&security_id) {
            return meta.symbol;
        }
        let name = protocol::catalog_symbol(security_id).unwrap_or("UNKNOWN");
        let mut symbol = [0u8; 8];
        let n = name.len().min(8);
        symbol[..n].copy_from_slice(&name.as_bytes()[..n]);
        symbol
    }

    pub fn meta(&self, security_id: u32) -> Option<&InstrumentMeta> {
        self.meta.get(&security_id)
    }

    #[inline]
    pub fn mark_dirty(&mut self, security_id: u32) {
        self.dirty.insert(security_id);
    }

    /// Returns the dirty ids and atomically empties the set.
    pub fn drain_dirty(&mut self) -> SmallVec<[u32; 16]> {
        let ids = self.dirty.iter().copied().collect();
        self.dirty.clear();
        ids
    }

    #[inline]
    pub fn dirty_len(&self) -> usize {
        self.dirty.len()
    }

    /// Channel reset: ladders emptied in place, dirty set dropped. Books and
    /// metadata survive so the instruments are still known.
    pub fn reset_books(&mut self) {
        for book in self.books.values_mut() {
            book.clear();
        }
        self.dirty.clear();
    }

    pub fn len(&self) -> usize {
        self.books.len()
    }

    pub fn is_empty(&self) -> bool {
        self.books.is_empty()
    }

    pub fn security_ids(&self) -> SmallVec<[u32; 16]> {
        self.books.keys().copied().collect()
    }
}
