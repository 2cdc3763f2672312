// src/book.rs
//
// Depth-capped L2 ladder per instrument. Both sides are fixed arrays indexed
// by depth position (wire levels are 1-based, slots are 0-based); the first
// `count` slots are occupied and everything past them stays zeroed. The book
// applies whatever the feed says -- it does not gate on sequence numbers,
// that is the recovery layer's job.

use crate::codec::{BookSnapshot, SnapshotLevel, MAX_LEVELS};
use crate::protocol::{IncrementalEntry, MdEntryType, MdUpdateAction, SnapshotEntry};

pub const MAX_DEPTH: usize = MAX_LEVELS;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PriceLevel {
    pub price: i64,
    pub quantity: i32,
    pub order_count: u8,
}

impl PriceLevel {
    #[inline]
    pub fn new(price: i64, quantity: i32, order_count: u8) -> Self {
        Self {
            price,
            quantity,
            order_count,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OrderBook {
    security_id: u32,
    last_rpt_seq: u32,
    bids: [PriceLevel; MAX_DEPTH],
    asks: [PriceLevel; MAX_DEPTH],
    bid_count: u8,
    ask_count: u8,
    last_trade_price: i64,
    last_trade_qty: i32,
    total_volume: u64,
}

impl OrderBook {
    pub fn new(security_id: u32) -> Self {
        Self {
            security_id,
            last_rpt_seq: 0,
            bids: [PriceLevel::default(); MAX_DEPTH],
            asks: [PriceLevel::default(); MAX_DEPTH],
            bid_count: 0,
            ask_count: 0,
            last_trade_price: 0,
            last_trade_qty: 0,
            total_volume: 0,
        }
    }

    #[inline]
    pub fn security_id(&self) -> u32 {
        self.security_id
    }

    #[inline]
    pub fn last_rpt_seq(&self) -> u32 {
        self.last_rpt_seq
    }

    pub fn set_last_rpt_seq(&mut self, seq: u32) {
        self.last_rpt_seq = seq;
    }

    #[inline]
    pub fn bid_count(&self) -> u8 {
        self.bid_count
    }

    #[inline]
    pub fn ask_count(&self) -> u8 {
        self.ask_count
    }

    #[inline]
    pub fn bids(&self) -> &[PriceLevel; MAX_DEPTH] {
        &self.bids
    }

    #[inline]
    pub fn asks(&self) -> &[PriceLevel; MAX_DEPTH] {
        &self.asks
    }

    #[inline]
    pub fn total_volume(&self) -> u64 {
        self.total_volume
    }

    /// Empties both ladders; the trade tape survives a clear.
    pub fn clear(&mut self) {
        self.bids = [PriceLevel::default(); MAX_DEPTH];
        self.asks = [PriceLevel::default(); MAX_DEPTH];
        self.bid_count = 0;
        self.ask_count = 0;
    }

    /// Applies one incremental entry. Trade entries feed the tape; bid/offer
    /// entries (implied included) mutate the matching ladder.
    pub fn apply_update(&mut self, entry: &IncrementalEntry) {
        let action = MdUpdateAction::from_u8(entry.update_action);
        match MdEntryType::from_u8(entry.entry_type) {
            Some(t) if t.is_bid() => {
                if let Some(action) = action {
                    apply_level(
                        &mut self.bids,
                        &mut self.bid_count,
                        entry.price_level,
                        action,
                        PriceLevel::new(entry.price, entry.quantity, entry.num_orders),
                    );
                }
            }
            Some(t) if t.is_offer() => {
                if let Some(action) = action {
                    apply_level(
                        &mut self.asks,
                        &mut self.ask_count,
                        entry.price_level,
                        action,
                        PriceLevel::new(entry.price, entry.quantity, entry.num_orders),
                    );
                }
            }
            Some(MdEntryType::Trade) => {
                self.record_trade(entry.price, entry.quantity);
            }
            _ => {}
        }

        if entry.rpt_seq > self.last_rpt_seq {
            self.last_rpt_seq = entry.rpt_seq;
        }
    }

    pub fn record_trade(&mut self, price: i64, quantity: i32) {
        self.last_trade_price = price;
        self.last_trade_qty = quantity;
        self.total_volume += quantity.max(0) as u64;
    }

    /// Replaces the book wholesale from snapshot entries. The caller sets
    /// `last_rpt_seq` to the snapshot's sequence afterwards.
    pub fn apply_snapshot<I>(&mut self, entries: I)
    where
        I: IntoIterator<Item = SnapshotEntry>,
    {
        self.clear();
        for entry in entries {
            if entry.price_level == 0 || entry.price_level as usize > MAX_DEPTH {
                continue;
            }
            let idx = (entry.price_level - 1) as usize;
            let level = PriceLevel::new(entry.price, entry.quantity, entry.num_orders);
            match MdEntryType::from_u8(entry.entry_type) {
                Some(t) if t.is_bid() => {
                    self.bids[idx] = level;
                    self.bid_count = self.bid_count.max(entry.price_level);
                }
                Some(t) if t.is_offer() => {
                    self.asks[idx] = level;
                    self.ask_count = self.ask_count.max(entry.price_level);
                }
                _ => {}
            }
        }
    }

    /// Converts to the normalized output form (prices rescaled to 4-decimal
    /// fixed point). Negative and zero quantities are never published.
    pub fn to_snapshot(&self, symbol: [u8; 8]) -> BookSnapshot {
        let mut snap = BookSnapshot {
            symbol,
            last_price: crate::codec::price_from_wire(self.last_trade_price),
            last_quantity: self.last_trade_qty.max(0) as u32,
            total_volume: self.total_volume,
            ..Default::default()
        };

        let mut n = 0;
        for lvl in self.bids.iter().take(self.bid_count as usize) {
            if lvl.quantity <= 0 {
                continue;
            }
            snap.bids[n] = SnapshotLevel {
                price: crate::codec::price_from_wire(lvl.price),
                quantity: lvl.quantity as u32,
                order_count: lvl.order_count,
            };
            n += 1;
        }
        snap.bid_count = n as u8;

        let mut n = 0;
        for lvl in self.asks.iter().take(self.ask_count as usize) {
            if lvl.quantity <= 0 {
                continue;
            }
            snap.asks[n] = SnapshotLevel {
                price: crate::codec::price_from_wire(lvl.price),
                quantity: lvl.quantity as u32,
                order_count: lvl.order_count,
            };
            n += 1;
        }
        snap.ask_count = n as u8;

        snap
    }
}

/// Core ladder mutation shared by both sides. `level` is the 1-based wire
/// position; anything outside [1, MAX_DEPTH] is ignored.
fn apply_level(
    levels: &mut [PriceLevel; MAX_DEPTH],
    count: &mut u8,
    level: u8,
    action: MdUpdateAction,
    new: PriceLevel,
) {
    if level == 0 || level as usize > MAX_DEPTH {
        return;
    }
    let idx = (level - 1) as usize;

    match action {
        MdUpdateAction::New => {
            // Shift deeper levels down; the tail falls off.
            for i in (idx + 1..MAX_DEPTH).rev() {
                levels[i] = levels[i - 1];
            }
            levels[idx] = new;
            if (*count as usize) < MAX_DEPTH {
                *count += 1;
            }
        }
        MdUpdateAction::Change => {
            levels[idx] = new;
        }
        MdUpdateAction::Delete => {
            for i in idx..MAX_DEPTH - 1 {
                levels[i] = levels[i + 1];
            }
            levels[MAX_DEPTH - 1] = PriceLevel::default();
            *count = count.saturating_sub(1);
        }
        MdUpdateAction::DeleteThru => {
            // Everything at or better than this level is gone; the feed
            // re-seeds the side, so the whole ladder is zeroed.
            *levels = [PriceLevel::default(); MAX_DEPTH];
            *count = 0;
        }
        MdUpdateAction::DeleteFrom => {
            for slot in levels[idx..].iter_mut() {
                *slot = PriceLevel::default();
            }
            *count = level - 1;
        }
        MdUpdateAction::Overlay => {
            levels[idx] = new;
            *count = (*count).max(level);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{MdEntryType, MdUpdateAction};

    fn entry(
        action: MdUpdateAction,
        entry_type: MdEntryType,
        level: u8,
        price: i64,
        qty: i32,
        orders: u8,
        rpt_seq: u32,
    ) -> IncrementalEntry {
        IncrementalEntry {
            price,
            quantity: qty,
            security_id: 1001,
            rpt_seq,
            entry_type: entry_type.as_u8(),
            update_action: action.as_u8(),
            price_level: level,
            num_orders: orders,
        }
    }

    fn zeroed_past_count(levels: &[PriceLevel; MAX_DEPTH], count: u8) -> bool {
        levels[count as usize..]
            .iter()
            .all(|l| *l == PriceLevel::default())
    }

    #[test]
    fn new_change_delete_sequence() {
        let mut book = OrderBook::new(1001);
        use MdEntryType::Bid;
        use MdUpdateAction::*;

        book.apply_update(&entry(New, Bid, 1, 45_000_000_000, 10, 3, 1));
        book.apply_update(&entry(New, Bid, 2, 44_997_500_000, 5, 2, 2));
        book.apply_update(&entry(Change, Bid, 1, 45_000_000_000, 12, 4, 3));
        book.apply_update(&entry(Delete, Bid, 2, 0, 0, 0, 4));

        assert_eq!(book.bid_count(), 1);
        assert_eq!(
            book.bids()[0],
            PriceLevel::new(45_000_000_000, 12, 4)
        );
        assert_eq!(book.last_rpt_seq(), 4);
        assert!(zeroed_past_count(book.bids(), book.bid_count()));
    }

    #[test]
    fn new_shifts_deeper_levels() {
        let mut book = OrderBook::new(1);
        use MdEntryType::Bid;
        use MdUpdateAction::New;

        book.apply_update(&entry(New, Bid, 1, 100, 1, 1, 1));
        book.apply_update(&entry(New, Bid, 2, 90, 2, 1, 2));
        // Insert a better level on top; both existing levels move deeper.
        book.apply_update(&entry(New, Bid, 1, 110, 3, 1, 3));

        assert_eq!(book.bid_count(), 3);
        assert_eq!(book.bids()[0].price, 110);
        assert_eq!(book.bids()[1].price, 100);
        assert_eq!(book.bids()[2].price, 90);
    }

    #[test]
    fn new_at_full_depth_discards_tail() {
        let mut book = OrderBook::new(1);
        use MdEntryType::Offer;
        use MdUpdateAction::New;

        for i in 0..MAX_DEPTH as u8 {
            book.apply_update(&entry(New, Offer, i + 1, 100 + i64::from(i), 1, 1, 1));
        }
        assert_eq!(book.ask_count(), MAX_DEPTH as u8);
        let old_last = book.asks()[MAX_DEPTH - 1];

        book.apply_update(&entry(New, Offer, 1, 99, 9, 9, 2));
        assert_eq!(book.ask_count(), MAX_DEPTH as u8);
        assert_eq!(book.asks()[0].price, 99);
        assert_ne!(book.asks()[MAX_DEPTH - 1], old_last);
    }

    #[test]
    fn overlay_extends_count() {
        let mut book = OrderBook::new(1);
        book.apply_update(&entry(
            MdUpdateAction::Overlay,
            MdEntryType::Offer,
            3,
            100,
            7,
            1,
            1,
        ));
        assert_eq!(book.ask_count(), 3);
        assert_eq!(book.asks()[0], PriceLevel::default());
        assert_eq!(book.asks()[1], PriceLevel::default());
        assert_eq!(book.asks()[2], PriceLevel::new(100, 7, 1));
    }

    #[test]
    fn delete_thru_clears_side() {
        let mut book = OrderBook::new(1);
        use MdEntryType::Bid;
        for i in 0..5u8 {
            book.apply_update(&entry(
                MdUpdateAction::New,
                Bid,
                i + 1,
                100 - i64::from(i),
                1,
                1,
                u32::from(i) + 1,
            ));
        }
        book.apply_update(&entry(MdUpdateAction::DeleteThru, Bid, 2, 0, 0, 0, 6));
        assert_eq!(book.bid_count(), 0);
        assert!(zeroed_past_count(book.bids(), 0));
    }

    #[test]
    fn delete_from_truncates_side() {
        let mut book = OrderBook::new(1);
        use MdEntryType::Bid;
        for i in 0..5u8 {
            book.apply_update(&entry(
                MdUpdateAction::New,
                Bid,
                i + 1,
                100 - i64::from(i),
                1,
                1,
                u32::from(i) + 1,
            ));
        }
        book.apply_update(&entry(MdUpdateAction::DeleteFrom, Bid, 3, 0, 0, 0, 6));
        assert_eq!(book.bid_count(), 2);
        assert_eq!(book.bids()[0].price, 100);
        assert_eq!(book.bids()[1].price, 99);
        assert!(zeroed_past_count(book.bids(), 2));
    }

    #[test]
    fn out_of_range_level_is_ignored() {
        let mut book = OrderBook::new(1);
        book.apply_update(&entry(
            MdUpdateAction::New,
            MdEntryType::Bid,
            0,
            100,
            1,
            1,
            1,
        ));
        book.apply_update(&entry(
            MdUpdateAction::New,
            MdEntryType::Bid,
            11,
            100,
            1,
            1,
            2,
        ));
        assert_eq!(book.bid_count(), 0);
        // Sequence still advances; the entry was consumed, just not bookable.
        assert_eq!(book.last_rpt_seq(), 2);
    }

    #[test]
    fn implied_entries_hit_the_ladders() {
        let mut book = OrderBook::new(1);
        book.apply_update(&entry(
            MdUpdateAction::New,
            MdEntryType::ImpliedBid,
            1,
            100,
            1,
            1,
            1,
        ));
        book.apply_update(&entry(
            MdUpdateAction::New,
            MdEntryType::ImpliedOffer,
            1,
            101,
            2,
            1,
            2,
        ));
        assert_eq!(book.bid_count(), 1);
        assert_eq!(book.ask_count(), 1);
    }

    #[test]
    fn trades_feed_the_tape_not_the_ladders() {
        let mut book = OrderBook::new(1);
        book.apply_update(&entry(
            MdUpdateAction::New,
            MdEntryType::Trade,
            1,
            45_000_000_000,
            5,
            0,
            1,
        ));
        assert_eq!(book.bid_count(), 0);
        assert_eq!(book.ask_count(), 0);
        assert_eq!(book.total_volume(), 5);

        book.apply_update(&entry(
            MdUpdateAction::New,
            MdEntryType::Trade,
            1,
            45_001_000_000,
            3,
            0,
            2,
        ));
        assert_eq!(book.total_volume(), 8);
        let snap = book.to_snapshot(*b"ESH26\0\0\0");
        assert_eq!(snap.last_quantity, 3);
        assert_eq!(snap.last_price, 4_500_100);
    }

    #[test]
    fn rpt_seq_is_monotonic() {
        let mut book = OrderBook::new(1);
        book.apply_update(&entry(
            MdUpdateAction::New,
            MdEntryType::Bid,
            1,
            100,
            1,
            1,
            5,
        ));
        book.apply_update(&entry(
            MdUpdateAction::Change,
            MdEntryType::Bid,
            1,
            100,
            2,
            1,
            3,
        ));
        assert_eq!(book.last_rpt_seq(), 5);
    }

    #[test]
    fn snapshot_replaces_book() {
        let mut book = OrderBook::new(1);
        book.apply_update(&entry(
            MdUpdateAction::New,
            MdEntryType::Bid,
            1,
            1,
            1,
            1,
            1,
        ));

        let entries = vec![
            SnapshotEntry {
                price: 200,
                quantity: 10,
                entry_type: MdEntryType::Bid.as_u8(),
                price_level: 1,
                num_orders: 2,
            },
            SnapshotEntry {
                price: 190,
                quantity: 5,
                entry_type: MdEntryType::Bid.as_u8(),
                price_level: 2,
                num_orders: 1,
            },
            SnapshotEntry {
                price: 210,
                quantity: 7,
                entry_type: MdEntryType::Offer.as_u8(),
                price_level: 1,
                num_orders: 3,
            },
            // Bogus level is skipped without touching anything.
            SnapshotEntry {
                price: 1,
                quantity: 1,
                entry_type: MdEntryType::Offer.as_u8(),
                price_level: 12,
                num_orders: 1,
            },
        ];
        book.apply_snapshot(entries);
        book.set_last_rpt_seq(10);

        assert_eq!(book.bid_count(), 2);
        assert_eq!(book.ask_count(), 1);
        assert_eq!(book.bids()[0], PriceLevel::new(200, 10, 2));
        assert_eq!(book.asks()[0], PriceLevel::new(210, 7, 3));
        assert_eq!(book.last_rpt_seq(), 10);
        assert!(zeroed_past_count(book.bids(), 2));
        assert!(zeroed_past_count(book.asks(), 1));
    }

    #[test]
    fn zero_qty_levels_are_not_published() {
        let mut book = OrderBook::new(1);
        book.apply_update(&entry(
            MdUpdateAction::Overlay,
            MdEntryType::Bid,
            1,
            100_000,
            0,
            1,
            1,
        ));
        book.apply_update(&entry(
            MdUpdateAction::Overlay,
            MdEntryType::Bid,
            2,
            99_000,
            4,
            1,
            1,
        ));
        let snap = book.to_snapshot([0u8; 8]);
        assert_eq!(snap.bid_count, 1);
        assert_eq!(snap.bids[0].quantity, 4);
    }
}
