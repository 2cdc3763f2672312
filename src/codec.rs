// src/codec.rs
//
// Published feed wire format (little-endian, schema 1 version 1):
//
//   MessageHeader  (8)   block_length, template_id, schema_id, version
//   L2SnapshotRoot (46)  symbol[8], timestamp, sequence, last_trade_price,
//                        last_trade_qty, total_volume, bid_count, ask_count
//   GroupHeader    (3)   block_length, num_in_group   -- bids, then asks
//   PriceLevelEntry(15)  level, price, quantity, num_orders
//
// Internal book state holds prices at 4 implied decimals; the wire carries 7.
// One datagram per instrument; worst case (10+10 levels) is 360 bytes.

use smallvec::SmallVec;
use thiserror::Error;

pub const SCHEMA_ID: u16 = 1;
pub const SCHEMA_VERSION: u16 = 1;

pub const TEMPLATE_HEARTBEAT: u16 = 1;
pub const TEMPLATE_L2_SNAPSHOT: u16 = 2;

pub const MAX_LEVELS: usize = 10;

pub const MESSAGE_HEADER_LEN: usize = 8;
pub const GROUP_HEADER_LEN: usize = 3;
pub const PRICE_LEVEL_ENTRY_LEN: usize = 15;
pub const L2_SNAPSHOT_ROOT_LEN: usize = 46;
pub const HEARTBEAT_ROOT_LEN: usize = 16;

pub const HEARTBEAT_LEN: usize = MESSAGE_HEADER_LEN + HEARTBEAT_ROOT_LEN;
pub const MAX_L2_SNAPSHOT_LEN: usize = MESSAGE_HEADER_LEN
    + L2_SNAPSHOT_ROOT_LEN
    + 2 * (GROUP_HEADER_LEN + MAX_LEVELS * PRICE_LEVEL_ENTRY_LEN);

#[inline]
pub fn l2_snapshot_len(num_bids: usize, num_asks: usize) -> usize {
    MESSAGE_HEADER_LEN
        + L2_SNAPSHOT_ROOT_LEN
        + GROUP_HEADER_LEN
        + num_bids * PRICE_LEVEL_ENTRY_LEN
        + GROUP_HEADER_LEN
        + num_asks * PRICE_LEVEL_ENTRY_LEN
}

// ---------------------------------------------------------------------------
// Price scaling: internal fixed point is 4 implied decimals, wire is 7.

#[inline]
pub fn price_to_wire(price4: u32) -> i64 {
    i64::from(price4) * 1000
}

#[inline]
pub fn price_from_wire(wire: i64) -> u32 {
    (wire / 1000) as u32
}

#[inline]
pub fn wire_price_to_f64(wire: i64) -> f64 {
    wire as f64 / 10_000_000.0
}

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("encode buffer too small: need {required}, have {available}")]
    BufferTooSmall { required: usize, available: usize },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("message truncated: need {required}, have {available}")]
    Truncated { required: usize, available: usize },
    #[error("schema mismatch: expected {expected}, got {actual}")]
    SchemaMismatch { expected: u16, actual: u16 },
    #[error("unexpected template {actual}")]
    UnexpectedTemplate { actual: u16 },
}

/// One published depth level, 1-based from best.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PriceLevelEntry {
    pub level: u8,
    pub price: i64,
    pub quantity: u32,
    pub num_orders: u16,
}

/// Normalized per-instrument book state handed to the encoder. Prices here
/// are 4-decimal fixed point; the encoder rescales to the wire.
#[derive(Debug, Clone, Copy, Default)]
pub struct BookSnapshot {
    pub symbol: [u8; 8],
    pub timestamp: u64,
    pub sequence: u64,
    pub last_price: u32,
    pub last_quantity: u32,
    pub total_volume: u64,
    pub bid_count: u8,
    pub ask_count: u8,
    pub bids: [SnapshotLevel; MAX_LEVELS],
    pub asks: [SnapshotLevel; MAX_LEVELS],
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SnapshotLevel {
    pub price: u32,
    pub quantity: u32,
    pub order_count: u8,
}

// ---------------------------------------------------------------------------
// Encoding

#[inline]
fn put_u16(buf: &mut [u8], off: &mut usize, v: u16) {
    buf[*off..*off + 2].copy_from_slice(&v.to_le_bytes());
    *off += 2;
}
#[inline]
fn put_u32(buf: &mut [u8], off: &mut usize, v: u32) {
    buf[*off..*off + 4].copy_from_slice(&v.to_le_bytes());
    *off += 4;
}
#[inline]
fn put_u64(buf: &mut [u8], off: &mut usize, v: u64) {
    buf[*off..*off + 8].copy_from_slice(&v.to_le_bytes());
    *off += 8;
}
#[inline]
fn put_i64(buf: &mut [u8], off: &mut usize, v: i64) {
    buf[*off..*off + 8].copy_from_slice(&v.to_le_bytes());
    *off += 8;
}

fn put_group(buf: &mut [u8], off: &mut usize, levels: &[SnapshotLevel]) {
    put_u16(buf, off, PRICE_LEVEL_ENTRY_LEN as u16);
    buf[*off] = levels.len() as u8;
    *off += 1;
    for (i, lvl) in levels.iter().enumerate() {
        buf[*off] = (i + 1) as u8;
        *off += 1;
        put_i64(buf, off, price_to_wire(lvl.price));
        put_u32(buf, off, lvl.quantity);
        put_u16(buf, off, u16::from(lvl.order_count));
    }
}

/// Encodes an L2 snapshot into `buf`, returning the encoded length.
pub fn encode_snapshot(snap: &BookSnapshot, buf: &mut [u8]) -> Result<usize, EncodeError> {
    let num_bids = (snap.bid_count as usize).min(MAX_LEVELS);
    let num_asks = (snap.ask_count as usize).min(MAX_LEVELS);
    let required = l2_snapshot_len(num_bids, num_asks);
    if buf.len() < required {
        return Err(EncodeError::BufferTooSmall {
            required,
            available: buf.len(),
        });
    }

    let mut off = 0;
    put_u16(buf, &mut off, L2_SNAPSHOT_ROOT_LEN as u16);
    put_u16(buf, &mut off, TEMPLATE_L2_SNAPSHOT);
    put_u16(buf, &mut off, SCHEMA_ID);
    put_u16(buf, &mut off, SCHEMA_VERSION);

    buf[off..off + 8].copy_from_slice(&snap.symbol);
    off += 8;
    put_u64(buf, &mut off, snap.timestamp);
    put_u64(buf, &mut off, snap.sequence);
    put_i64(buf, &mut off, price_to_wire(snap.last_price));
    put_u32(buf, &mut off, snap.last_quantity);
    put_u64(buf, &mut off, snap.total_volume);
    buf[off] = num_bids as u8;
    buf[off + 1] = num_asks as u8;
    off += 2;

    put_group(buf, &mut off, &snap.bids[..num_bids]);
    put_group(buf, &mut off, &snap.asks[..num_asks]);

    debug_assert_eq!(off, required);
    Ok(off)
}

/// Encodes a heartbeat into `buf`, returning the encoded length.
pub fn encode_heartbeat(
    timestamp: u64,
    sequence: u64,
    buf: &mut [u8],
) -> Result<usize, EncodeError> {
    if buf.len() < HEARTBEAT_LEN {
        return Err(EncodeError::BufferTooSmall {
            required: HEARTBEAT_LEN,
            available: buf.len(),
        });
    }
    let mut off = 0;
    put_u16(buf, &mut off, HEARTBEAT_ROOT_LEN as u16);
    put_u16(buf, &mut off, TEMPLATE_HEARTBEAT);
    put_u16(buf, &mut off, SCHEMA_ID);
    put_u16(buf, &mut off, SCHEMA_VERSION);
    put_u64(buf, &mut off, timestamp);
    put_u64(buf, &mut off, sequence);
    Ok(off)
}

// ---------------------------------------------------------------------------
// Decoding

#[inline]
fn get_u16(buf: &[u8], off: &mut usize) -> u16 {
    let v = u16::from_le_bytes(buf[*off..*off + 2].try_into().unwrap());
    *off += 2;
    v
}
#[inline]
fn get_u32(buf: &[u8], off: &mut usize) -> u32 {
    let v = u32::from_le_bytes(buf[*off..*off + 4].try_into().unwrap());
    *off += 4;
    v
}
#[inline]
fn get_u64(buf: &[u8], off: &mut usize) -> u64 {
    let v = u64::from_le_bytes(buf[*off..*off + 8].try_into().unwrap());
    *off += 8;
    v
}
#[inline]
fn get_i64(buf: &[u8], off: &mut usize) -> i64 {
    let v = i64::from_le_bytes(buf[*off..*off + 8].try_into().unwrap());
    *off += 8;
    v
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    pub block_length: u16,
    pub template_id: u16,
    pub schema_id: u16,
    pub version: u16,
}

pub fn decode_header(buf: &[u8]) -> Result<MessageHeader, DecodeError> {
    if buf.len() < MESSAGE_HEADER_LEN {
        return Err(DecodeError::Truncated {
            required: MESSAGE_HEADER_LEN,
            available: buf.len(),
        });
    }
    let mut off = 0;
    let hdr = MessageHeader {
        block_length: get_u16(buf, &mut off),
        template_id: get_u16(buf, &mut off),
        schema_id: get_u16(buf, &mut off),
        version: get_u16(buf, &mut off),
    };
    if hdr.schema_id != SCHEMA_ID {
        return Err(DecodeError::SchemaMismatch {
            expected: SCHEMA_ID,
            actual: hdr.schema_id,
        });
    }
    Ok(hdr)
}

/// Decoded L2 snapshot (owned; sized for the depth cap without allocating).
#[derive(Debug, Clone)]
pub struct L2Snapshot {
    pub symbol: [u8; 8],
    pub timestamp: u64,
    pub sequence: u64,
    pub last_trade_price: i64,
    pub last_trade_qty: u32,
    pub total_volume: u64,
    pub bid_count: u8,
    pub ask_count: u8,
    pub bids: SmallVec<[PriceLevelEntry; MAX_LEVELS]>,
    pub asks: SmallVec<[PriceLevelEntry; MAX_LEVELS]>,
}

impl L2Snapshot {
    /// Symbol with trailing NULs stripped.
    pub fn symbol_str(&self) -> String {
        let end = self.symbol.iter().position(|&b| b == 0).unwrap_or(8);
        String::from_utf8_lossy(&self.symbol[..end]).into_owned()
    }
}

fn decode_group(
    buf: &[u8],
    off: &mut usize,
) -> Result<SmallVec<[PriceLevelEntry; MAX_LEVELS]>, DecodeError> {
    if *off + GROUP_HEADER_LEN > buf.len() {
        return Err(DecodeError::Truncated {
            required: *off + GROUP_HEADER_LEN,
            available: buf.len(),
        });
    }
    let stride = get_u16(buf, off) as usize;
    let count = buf[*off] as usize;
    *off += 1;
    if stride < PRICE_LEVEL_ENTRY_LEN {
        return Err(DecodeError::Truncated {
            required: PRICE_LEVEL_ENTRY_LEN,
            available: stride,
        });
    }
    let required = *off + count * stride;
    if required > buf.len() {
        return Err(DecodeError::Truncated {
            required,
            available: buf.len(),
        });
    }
    let mut out = SmallVec::new();
    for _ in 0..count {
        let base = *off;
        let mut o = base;
        let level = buf[o];
        o += 1;
        let price = get_i64(buf, &mut o);
        let quantity = get_u32(buf, &mut o);
        let num_orders = get_u16(buf, &mut o);
        out.push(PriceLevelEntry {
            level,
            price,
            quantity,
            num_orders,
        });
        *off = base + stride;
    }
    Ok(out)
}

/// Decodes one published L2 snapshot datagram.
pub fn decode_snapshot(buf: &[u8]) -> Result<L2Snapshot, DecodeError> {
    let hdr = decode_header(buf)?;
    if hdr.template_id != TEMPLATE_L2_SNAPSHOT {
        return Err(DecodeError::UnexpectedTemplate {
            actual: hdr.template_id,
        });
    }
    let required = MESSAGE_HEADER_LEN + L2_SNAPSHOT_ROOT_LEN;
    if buf.len() < required {
        return Err(DecodeError::Truncated {
            required,
            available: buf.len(),
        });
    }

    let mut off = MESSAGE_HEADER_LEN;
    let mut symbol = [0u8; 8];
    symbol.copy_from_slice(&buf[off..off + 8]);
    off += 8;
    let timestamp = get_u64(buf, &mut off);
    let sequence = get_u64(buf, &mut off);
    let last_trade_price = get_i64(buf, &mut off);
    let last_trade_qty = get_u32(buf, &mut off);
    let total_volume = get_u64(buf, &mut off);
    let bid_count = buf[off];
    let ask_count = buf[off + 1];
    off = MESSAGE_HEADER_LEN + hdr.block_length as usize;

    let bids = decode_group(buf, &mut off)?;
    let asks = decode_group(buf, &mut off)?;

    Ok(L2Snapshot {
        symbol,
        timestamp,
        sequence,
        last_trade_price,
        last_trade_qty,
        total_volume,
        bid_count,
        ask_count,
        bids,
        asks,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Heartbeat {
    pub timestamp: u64,
    pub sequence: u64,
}

pub fn decode_heartbeat(buf: &[u8]) -> Result<Heartbeat, DecodeError> {
    let hdr = decode_header(buf)?;
    if hdr.template_id != TEMPLATE_HEARTBEAT {
        return Err(DecodeError::UnexpectedTemplate {
            actual: hdr.template_id,
        });
    }
    if buf.len() < HEARTBEAT_LEN {
        return Err(DecodeError::Truncated {
            required: HEARTBEAT_LEN,
            available: buf.len(),
        });
    }
    let mut off = MESSAGE_HEADER_LEN;
    Ok(Heartbeat {
        timestamp: get_u64(buf, &mut off),
        sequence: get_u64(buf, &mut off),
    })
}
