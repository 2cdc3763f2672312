// src/protocol.rs
//
// Input wire format for the exchange feed: a packet header followed by
// back-to-back SBE messages, all little-endian, packed. The decoder hands out
// borrowed views over the datagram; every field read is bounds-checked and a
// short read aborts the rest of the datagram. Unknown templates are skipped
// via header + block_length so schema extensions do not desynchronise the
// walk.

use thiserror::Error;

// Default multicast endpoints
pub const INCREMENTAL_GROUP: &str = "239.2.1.1";
pub const SNAPSHOT_GROUP: &str = "239.2.1.2";
pub const OUTPUT_GROUP: &str = "239.2.1.3";
pub const INCREMENTAL_PORT: u16 = 40001;
pub const SNAPSHOT_PORT: u16 = 40002;
pub const OUTPUT_PORT: u16 = 40003;

// Template ids
pub const TEMPLATE_CHANNEL_RESET: u16 = 4;
pub const TEMPLATE_HEARTBEAT: u16 = 12;
pub const TEMPLATE_SECURITY_DEFINITION: u16 = 27;
pub const TEMPLATE_INCREMENTAL_REFRESH: u16 = 32;
pub const TEMPLATE_SNAPSHOT_FULL_REFRESH: u16 = 38;

pub const PACKET_HEADER_LEN: usize = 12;
pub const SBE_HEADER_LEN: usize = 8;
pub const GROUP_HEADER_LEN: usize = 3;
pub const INCREMENTAL_ENTRY_LEN: usize = 24;
pub const SNAPSHOT_ENTRY_LEN: usize = 16;
pub const SECURITY_DEFINITION_LEN: usize = 37;
pub const INCREMENTAL_ROOT_LEN: usize = 8;
pub const SNAPSHOT_ROOT_LEN: usize = 20;

// Fixed catalog for the test universe; definitions received on the wire
// extend it at runtime.
pub const SECURITY_ID_ESH26: u32 = 1001;
pub const SECURITY_ID_NQM26: u32 = 1002;
pub const SECURITY_ID_CLK26: u32 = 1003;
pub const SECURITY_ID_GCZ26: u32 = 1004;

pub fn catalog_symbol(security_id: u32) -> Option<&'static str> {
    match security_id {
        SECURITY_ID_ESH26 => Some("ESH26"),
        SECURITY_ID_NQM26 => Some("NQM26"),
        SECURITY_ID_CLK26 => Some("CLK26"),
        SECURITY_ID_GCZ26 => Some("GCZ26"),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MdEntryType {
    Bid,
    Offer,
    Trade,
    ImpliedBid,
    ImpliedOffer,
}

impl MdEntryType {
    #[inline]
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Bid),
            1 => Some(Self::Offer),
            2 => Some(Self::Trade),
            b'E' => Some(Self::ImpliedBid),
            b'F' => Some(Self::ImpliedOffer),
            _ => None,
        }
    }

    #[inline]
    pub fn as_u8(self) -> u8 {
        match self {
            Self::Bid => 0,
            Self::Offer => 1,
            Self::Trade => 2,
            Self::ImpliedBid => b'E',
            Self::ImpliedOffer => b'F',
        }
    }

    /// Implied entries hit the same ladder as their outright counterpart.
    #[inline]
    pub fn is_bid(self) -> bool {
        matches!(self, Self::Bid | Self::ImpliedBid)
    }

    #[inline]
    pub fn is_offer(self) -> bool {
        matches!(self, Self::Offer | Self::ImpliedOffer)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MdUpdateAction {
    New,
    Change,
    Delete,
    DeleteThru,
    DeleteFrom,
    Overlay,
}

impl MdUpdateAction {
    #[inline]
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::New),
            1 => Some(Self::Change),
            2 => Some(Self::Delete),
            3 => Some(Self::DeleteThru),
            4 => Some(Self::DeleteFrom),
            5 => Some(Self::Overlay),
            _ => None,
        }
    }

    #[inline]
    pub fn as_u8(self) -> u8 {
        match self {
            Self::New => 0,
            Self::Change => 1,
            Self::Delete => 2,
            Self::DeleteThru => 3,
            Self::DeleteFrom => 4,
            Self::Overlay => 5,
        }
    }
}

/// Datagram was truncated mid-header, mid-root or mid-group. The rest of the
/// datagram cannot be trusted and is discarded by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("malformed frame at offset {offset}")]
pub struct FrameError {
    pub offset: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub packet_seq: u32,
    pub sending_time: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct SecurityDefinition {
    pub security_id: u32,
    pub symbol: [u8; 20],
    pub min_price_increment: i64,
    pub display_factor: u32,
    pub trading_status: u8,
}

impl SecurityDefinition {
    /// Symbol with trailing NULs stripped, lossy on non-ASCII garbage.
    pub fn symbol_str(&self) -> String {
        let end = self.symbol.iter().position(|&b| b == 0).unwrap_or(20);
        String::from_utf8_lossy(&self.symbol[..end]).into_owned()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IncrementalEntry {
    pub price: i64,
    pub quantity: i32,
    pub security_id: u32,
    pub rpt_seq: u32,
    pub entry_type: u8,
    pub update_action: u8,
    pub price_level: u8,
    pub num_orders: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotEntry {
    pub price: i64,
    pub quantity: i32,
    pub entry_type: u8,
    pub price_level: u8,
    pub num_orders: u8,
}

// ---------------------------------------------------------------------------
// Bounds-checked little-endian reads

#[inline]
fn read_fixed<'a, const N: usize>(b: &'a [u8], off: &mut usize) -> Option<&'a [u8; N]> {
    if *off + N <= b.len() {
        let s = &b[*off..*off + N];
        *off += N;
        Some(s.try_into().unwrap())
    } else {
        None
    }
}

#[inline]
fn read_u8(b: &[u8], off: &mut usize) -> Option<u8> {
    read_fixed::<1>(b, off).map(|v| v[0])
}
#[inline]
fn read_u16(b: &[u8], off: &mut usize) -> Option<u16> {
    read_fixed::<2>(b, off).map(|v| u16::from_le_bytes(*v))
}
#[inline]
fn read_u32(b: &[u8], off: &mut usize) -> Option<u32> {
    read_fixed::<4>(b, off).map(|v| u32::from_le_bytes(*v))
}
#[inline]
fn read_u64(b: &[u8], off: &mut usize) -> Option<u64> {
    read_fixed::<8>(b, off).map(|v| u64::from_le_bytes(*v))
}
#[inline]
fn read_i32(b: &[u8], off: &mut usize) -> Option<i32> {
    read_fixed::<4>(b, off).map(|v| i32::from_le_bytes(*v))
}
#[inline]
fn read_i64(b: &[u8], off: &mut usize) -> Option<i64> {
    read_fixed::<8>(b, off).map(|v| i64::from_le_bytes(*v))
}

// ---------------------------------------------------------------------------
// Message views

/// Borrowed view over one incremental-refresh message.
#[derive(Debug, Clone, Copy)]
pub struct IncrementalView<'a> {
    pub transact_time: u64,
    entry_stride: usize,
    num_entries: u8,
    entries: &'a [u8],
}

impl<'a> IncrementalView<'a> {
    pub fn entries(&self) -> EntryIter<'a, IncrementalEntry> {
        EntryIter {
            buf: self.entries,
            stride: self.entry_stride,
            remaining: self.num_entries,
            off: 0,
            parse: parse_incremental_entry,
        }
    }

    #[inline]
    pub fn num_entries(&self) -> u8 {
        self.num_entries
    }
}

/// Borrowed view over one snapshot-full-refresh message.
#[derive(Debug, Clone, Copy)]
pub struct SnapshotView<'a> {
    pub last_incr_seq: u32,
    pub security_id: u32,
    pub rpt_seq: u32,
    pub transact_time: u64,
    entry_stride: usize,
    num_entries: u8,
    entries: &'a [u8],
}

impl<'a> SnapshotView<'a> {
    pub fn entries(&self) -> EntryIter<'a, SnapshotEntry> {
        EntryIter {
            buf: self.entries,
            stride: self.entry_stride,
            remaining: self.num_entries,
            off: 0,
            parse: parse_snapshot_entry,
        }
    }

    #[inline]
    pub fn num_entries(&self) -> u8 {
        self.num_entries
    }
}

/// Group entries share a stride declared by the group header; the slice was
/// length-checked when the view was built, so iteration is infallible.
pub struct EntryIter<'a, T> {
    buf: &'a [u8],
    stride: usize,
    remaining: u8,
    off: usize,
    parse: fn(&[u8]) -> T,
}

impl<'a, T> Iterator for EntryIter<'a, T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        if self.remaining == 0 {
            return None;
        }
        let item = (self.parse)(&self.buf[self.off..self.off + self.stride]);
        self.off += self.stride;
        self.remaining -= 1;
        Some(item)
    }
}

fn parse_incremental_entry(b: &[u8]) -> IncrementalEntry {
    let mut off = 0;
    IncrementalEntry {
        price: read_i64(b, &mut off).unwrap(),
        quantity: read_i32(b, &mut off).unwrap(),
        security_id: read_u32(b, &mut off).unwrap(),
        rpt_seq: read_u32(b, &mut off).unwrap(),
        entry_type: read_u8(b, &mut off).unwrap(),
        update_action: read_u8(b, &mut off).unwrap(),
        price_level: read_u8(b, &mut off).unwrap(),
        num_orders: read_u8(b, &mut off).unwrap(),
    }
}

fn parse_snapshot_entry(b: &[u8]) -> SnapshotEntry {
    let mut off = 0;
    SnapshotEntry {
        price: read_i64(b, &mut off).unwrap(),
        quantity: read_i32(b, &mut off).unwrap(),
        entry_type: read_u8(b, &mut off).unwrap(),
        price_level: read_u8(b, &mut off).unwrap(),
        num_orders: read_u8(b, &mut off).unwrap(),
        // one padding byte follows
    }
}

#[derive(Debug)]
pub enum Message<'a> {
    ChannelReset { transact_time: u64 },
    Heartbeat { last_msg_seq: u64 },
    SecurityDefinition(SecurityDefinition),
    IncrementalRefresh(IncrementalView<'a>),
    SnapshotFullRefresh(SnapshotView<'a>),
}

/// Splits a datagram into its packet header and a message iterator.
pub fn parse_packet(datagram: &[u8]) -> Result<(PacketHeader, MessageIter<'_>), FrameError> {
    let mut off = 0;
    let packet_seq = read_u32(datagram, &mut off).ok_or(FrameError { offset: 0 })?;
    let sending_time = read_u64(datagram, &mut off).ok_or(FrameError { offset: off })?;
    Ok((
        PacketHeader {
            packet_seq,
            sending_time,
        },
        MessageIter {
            buf: datagram,
            off: PACKET_HEADER_LEN,
        },
    ))
}

/// Walks the SBE messages in a datagram. Yields `Err` once and then stops if
/// a message would read past the datagram end.
pub struct MessageIter<'a> {
    buf: &'a [u8],
    off: usize,
}

impl<'a> MessageIter<'a> {
    fn group(&mut self, entry_len: usize) -> Option<(usize, u8, &'a [u8])> {
        let b = self.buf;
        let stride = read_u16(b, &mut self.off)? as usize;
        let count = read_u8(b, &mut self.off)?;
        if stride < entry_len {
            return None;
        }
        let total = stride.checked_mul(count as usize)?;
        if self.off + total > b.len() {
            return None;
        }
        let entries = &b[self.off..self.off + total];
        self.off += total;
        Some((stride, count, entries))
    }

    fn next_inner(&mut self) -> Option<Result<Message<'a>, FrameError>> {
        let b = self.buf;
        loop {
            if self.off >= b.len() {
                return None;
            }
            let start = self.off;
            let fail = |offset| Some(Err(FrameError { offset }));

            if self.off + SBE_HEADER_LEN > b.len() {
                return fail(start);
            }
            let block_length = read_u16(b, &mut self.off).unwrap() as usize;
            let template_id = read_u16(b, &mut self.off).unwrap();
            let _schema_id = read_u16(b, &mut self.off).unwrap();
            let _version = read_u16(b, &mut self.off).unwrap();

            let root_end = self.off + block_length;
            if root_end > b.len() {
                return fail(start);
            }

            let msg = match template_id {
                TEMPLATE_CHANNEL_RESET => {
                    if block_length < 8 {
                        return fail(start);
                    }
                    let transact_time = read_u64(b, &mut self.off).unwrap();
                    self.off = root_end;
                    Message::ChannelReset { transact_time }
                }
                TEMPLATE_HEARTBEAT => {
                    if block_length < 8 {
                        return fail(start);
                    }
                    let last_msg_seq = read_u64(b, &mut self.off).unwrap();
                    self.off = root_end;
                    Message::Heartbeat { last_msg_seq }
                }
                TEMPLATE_SECURITY_DEFINITION => {
                    if block_length < SECURITY_DEFINITION_LEN {
                        return fail(start);
                    }
                    let security_id = read_u32(b, &mut self.off).unwrap();
                    let symbol = *read_fixed::<20>(b, &mut self.off).unwrap();
                    let min_price_increment = read_i64(b, &mut self.off).unwrap();
                    let display_factor = read_u32(b, &mut self.off).unwrap();
                    let trading_status = read_u8(b, &mut self.off).unwrap();
                    self.off = root_end;
                    Message::SecurityDefinition(SecurityDefinition {
                        security_id,
                        symbol,
                        min_price_increment,
                        display_factor,
                        trading_status,
                    })
                }
                TEMPLATE_INCREMENTAL_REFRESH => {
                    if block_length < INCREMENTAL_ROOT_LEN {
                        return fail(start);
                    }
                    let transact_time = read_u64(b, &mut self.off).unwrap();
                    self.off = root_end;
                    let (entry_stride, num_entries, entries) =
                        match self.group(INCREMENTAL_ENTRY_LEN) {
                            Some(g) => g,
                            None => return fail(start),
                        };
                    Message::IncrementalRefresh(IncrementalView {
                        transact_time,
                        entry_stride,
                        num_entries,
                        entries,
                    })
                }
                TEMPLATE_SNAPSHOT_FULL_REFRESH => {
                    if block_length < SNAPSHOT_ROOT_LEN {
                        return fail(start);
                    }
                    let last_incr_seq = read_u32(b, &mut self.off).unwrap();
                    let security_id = read_u32(b, &mut self.off).unwrap();
                    let rpt_seq = read_u32(b, &mut self.off).unwrap();
                    let transact_time = read_u64(b, &mut self.off).unwrap();
                    self.off = root_end;
                    let (entry_stride, num_entries, entries) =
                        match self.group(SNAPSHOT_ENTRY_LEN) {
                            Some(g) => g,
                            None => return fail(start),
                        };
                    Message::SnapshotFullRefresh(SnapshotView {
                        last_incr_seq,
                        security_id,
                        rpt_seq,
                        transact_time,
                        entry_stride,
                        num_entries,
                        entries,
                    })
                }
                _ => {
                    // Unknown template: header + block_length skips the root.
                    // A template we don't know cannot carry a group we can
                    // size, so a root-only skip is the forward-compatible
                    // move.
                    self.off = root_end;
                    continue;
                }
            };

            return Some(Ok(msg));
        }
    }
}

impl<'a> Iterator for MessageIter<'a> {
    type Item = Result<Message<'a>, FrameError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_inner() {
            Some(Err(e)) => {
                // Poison the iterator: nothing after a truncated message is
                // trustworthy.
                self.off = self.buf.len();
                Some(Err(e))
            }
            other => other,
        }
    }
}

// ---------------------------------------------------------------------------
// Packet builder (simulator + tests)

/// Builds an input-format datagram: packet header followed by messages.
pub struct PacketBuilder {
    buf: Vec<u8>,
}

impl PacketBuilder {
    pub fn new(packet_seq: u32, sending_time: u64) -> Self {
        let mut buf = Vec::with_capacity(512);
        buf.extend_from_slice(&packet_seq.to_le_bytes());
        buf.extend_from_slice(&sending_time.to_le_bytes());
        Self { buf }
    }

    fn sbe_header(&mut self, block_length: u16, template_id: u16) {
        self.buf.extend_from_slice(&block_length.to_le_bytes());
        self.buf.extend_from_slice(&template_id.to_le_bytes());
        self.buf.extend_from_slice(&1u16.to_le_bytes()); // schema id
        self.buf.extend_from_slice(&9u16.to_le_bytes()); // schema version
    }

    fn group_header(&mut self, block_length: u16, num_in_group: u8) {
        self.buf.extend_from_slice(&block_length.to_le_bytes());
        self.buf.push(num_in_group);
    }

    pub fn channel_reset(&mut self, transact_time: u64) -> &mut Self {
        self.sbe_header(8, TEMPLATE_CHANNEL_RESET);
        self.buf.extend_from_slice(&transact_time.to_le_bytes());
        self
    }

    pub fn heartbeat(&mut self, last_msg_seq: u64) -> &mut Self {
        self.sbe_header(8, TEMPLATE_HEARTBEAT);
        self.buf.extend_from_slice(&last_msg_seq.to_le_bytes());
        self
    }

    pub fn security_definition(&mut self, def: &SecurityDefinition) -> &mut Self {
        self.sbe_header(SECURITY_DEFINITION_LEN as u16, TEMPLATE_SECURITY_DEFINITION);
        self.buf.extend_from_slice(&def.security_id.to_le_bytes());
        self.buf.extend_from_slice(&def.symbol);
        self.buf
            .extend_from_slice(&def.min_price_increment.to_le_bytes());
        self.buf.extend_from_slice(&def.display_factor.to_le_bytes());
        self.buf.push(def.trading_status);
        self
    }

    pub fn incremental_refresh(
        &mut self,
        transact_time: u64,
        entries: &[IncrementalEntry],
    ) -> &mut Self {
        self.sbe_header(INCREMENTAL_ROOT_LEN as u16, TEMPLATE_INCREMENTAL_REFRESH);
        self.buf.extend_from_slice(&transact_time.to_le_bytes());
        self.group_header(INCREMENTAL_ENTRY_LEN as u16, entries.len() as u8);
        for e in entries {
            self.buf.extend_from_slice(&e.price.to_le_bytes());
            self.buf.extend_from_slice(&e.quantity.to_le_bytes());
            self.buf.extend_from_slice(&e.security_id.to_le_bytes());
            self.buf.extend_from_slice(&e.rpt_seq.to_le_bytes());
            self.buf.push(e.entry_type);
            self.buf.push(e.update_action);
            self.buf.push(e.price_level);
            self.buf.push(e.num_orders);
        }
        self
    }

    pub fn snapshot_full_refresh(
        &mut self,
        last_incr_seq: u32,
        security_id: u32,
        rpt_seq: u32,
        transact_time: u64,
        entries: &[SnapshotEntry],
    ) -> &mut Self {
        self.sbe_header(SNAPSHOT_ROOT_LEN as u16, TEMPLATE_SNAPSHOT_FULL_REFRESH);
        self.buf.extend_from_slice(&last_incr_seq.to_le_bytes());
        self.buf.extend_from_slice(&security_id.to_le_bytes());
        self.buf.extend_from_slice(&rpt_seq.to_le_bytes());
        self.buf.extend_from_slice(&transact_time.to_le_bytes());
        self.group_header(SNAPSHOT_ENTRY_LEN as u16, entries.len() as u8);
        for e in entries {
            self.buf.extend_from_slice(&e.price.to_le_bytes());
            self.buf.extend_from_slice(&e.quantity.to_le_bytes());
            self.buf.push(e.entry_type);
            self.buf.push(e.price_level);
            self.buf.push(e.num_orders);
            self.buf.push(0); // padding
        }
        self
    }

    pub fn finish(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn entry(security_id: u32, rpt_seq: u32, level: u8) -> IncrementalEntry {
        IncrementalEntry {
            price: 45_000_000_000,
            quantity: 10,
            security_id,
            rpt_seq,
            entry_type: MdEntryType::Bid.as_u8(),
            update_action: MdUpdateAction::New.as_u8(),
            price_level: level,
            num_orders: 3,
        }
    }

    #[test]
    fn packet_header_round_trip() {
        let pkt = PacketBuilder::new(7, 1_000_000).heartbeat(42).finish();
        let (hdr, mut msgs) = parse_packet(&pkt).unwrap();
        assert_eq!(hdr.packet_seq, 7);
        assert_eq!(hdr.sending_time, 1_000_000);
        match msgs.next() {
            Some(Ok(Message::Heartbeat { last_msg_seq })) => assert_eq!(last_msg_seq, 42),
            other => panic!("unexpected: {other:?}"),
        }
        assert!(msgs.next().is_none());
    }

    #[test]
    fn incremental_entries_round_trip() {
        let entries = [entry(1001, 1, 1), entry(1001, 1, 2)];
        let pkt = PacketBuilder::new(1, 0)
            .incremental_refresh(555, &entries)
            .finish();
        let (_, mut msgs) = parse_packet(&pkt).unwrap();
        match msgs.next() {
            Some(Ok(Message::IncrementalRefresh(view))) => {
                assert_eq!(view.transact_time, 555);
                let got: Vec<_> = view.entries().collect();
                assert_eq!(got, entries);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn snapshot_round_trip() {
        let entries = [
            SnapshotEntry {
                price: 100,
                quantity: 5,
                entry_type: MdEntryType::Bid.as_u8(),
                price_level: 1,
                num_orders: 2,
            },
            SnapshotEntry {
                price: 110,
                quantity: 6,
                entry_type: MdEntryType::Offer.as_u8(),
                price_level: 1,
                num_orders: 1,
            },
        ];
        let pkt = PacketBuilder::new(1, 0)
            .snapshot_full_refresh(9, 1002, 10, 777, &entries)
            .finish();
        let (_, mut msgs) = parse_packet(&pkt).unwrap();
        match msgs.next() {
            Some(Ok(Message::SnapshotFullRefresh(view))) => {
                assert_eq!(view.last_incr_seq, 9);
                assert_eq!(view.security_id, 1002);
                assert_eq!(view.rpt_seq, 10);
                let got: Vec<_> = view.entries().collect();
                assert_eq!(got, entries);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn multiple_messages_per_packet() {
        let pkt = PacketBuilder::new(3, 0)
            .heartbeat(1)
            .channel_reset(2)
            .incremental_refresh(3, &[entry(1001, 5, 1)])
            .finish();
        let (_, msgs) = parse_packet(&pkt).unwrap();
        let kinds: Vec<_> = msgs.map(|m| m.unwrap()).collect();
        assert_eq!(kinds.len(), 3);
        assert!(matches!(kinds[0], Message::Heartbeat { .. }));
        assert!(matches!(kinds[1], Message::ChannelReset { .. }));
        assert!(matches!(kinds[2], Message::IncrementalRefresh(_)));
    }

    #[test]
    fn unknown_template_skipped_by_block_length() {
        let mut pkt = PacketBuilder::new(1, 0);
        // A template we do not know, 16-byte root.
        pkt.sbe_header(16, 999);
        pkt.buf.extend_from_slice(&[0xAA; 16]);
        pkt.heartbeat(77);
        let pkt = pkt.finish();

        let (_, mut msgs) = parse_packet(&pkt).unwrap();
        match msgs.next() {
            Some(Ok(Message::Heartbeat { last_msg_seq })) => assert_eq!(last_msg_seq, 77),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn truncated_group_fails_closed() {
        let pkt = PacketBuilder::new(1, 0)
            .incremental_refresh(0, &[entry(1001, 1, 1), entry(1001, 1, 2)])
            .finish();
        // Chop the tail of the last entry.
        let cut = &pkt[..pkt.len() - 5];
        let (_, mut msgs) = parse_packet(cut).unwrap();
        assert!(matches!(msgs.next(), Some(Err(FrameError { .. }))));
        assert!(msgs.next().is_none());
    }

    #[test]
    fn truncated_header_fails_closed() {
        let pkt = PacketBuilder::new(1, 0).heartbeat(1).finish();
        let cut = &pkt[..PACKET_HEADER_LEN + 3];
        let (_, mut msgs) = parse_packet(cut).unwrap();
        assert!(matches!(msgs.next(), Some(Err(FrameError { .. }))));
    }

    #[test]
    fn short_datagram_has_no_header() {
        assert!(parse_packet(&[0u8; 11]).is_err());
    }

    #[test]
    fn entry_type_codes() {
        assert_eq!(MdEntryType::from_u8(0), Some(MdEntryType::Bid));
        assert_eq!(MdEntryType::from_u8(1), Some(MdEntryType::Offer));
        assert_eq!(MdEntryType::from_u8(2), Some(MdEntryType::Trade));
        assert_eq!(MdEntryType::from_u8(0x45), Some(MdEntryType::ImpliedBid));
        assert_eq!(MdEntryType::from_u8(0x46), Some(MdEntryType::ImpliedOffer));
        assert_eq!(MdEntryType::from_u8(7), None);
        assert!(MdEntryType::ImpliedBid.is_bid());
        assert!(MdEntryType::ImpliedOffer.is_offer());
    }

    proptest! {
        #[test]
        fn parse_random_input_does_not_panic(payload in proptest::collection::vec(any::<u8>(), 0..2048)) {
            if let Ok((_, msgs)) = parse_packet(&payload) {
                for msg in msgs {
                    match msg {
                        Ok(Message::IncrementalRefresh(v)) => { let _ = v.entries().count(); }
                        Ok(Message::SnapshotFullRefresh(v)) => { let _ = v.entries().count(); }
                        _ => {}
                    }
                }
            }
        }
    }
}
