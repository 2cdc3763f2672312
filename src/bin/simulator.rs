// Synthetic two-channel feed generator: random-walks a handful of books,
// publishes top-of-book deltas on the incremental group and periodic full
// refreshes on the snapshot group. `--gap-every` skips an rpt_seq now and
// then so downstream gap recovery can be exercised end to end.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::Rng;

use mdp_feedhandler::net;
use mdp_feedhandler::protocol::{
    self, IncrementalEntry, MdEntryType, MdUpdateAction, PacketBuilder, SecurityDefinition,
    SnapshotEntry,
};
use mdp_feedhandler::util::{unix_nanos, BarrierFlag};

const SIM_DEPTH: usize = 5;

struct SimBook {
    security_id: u32,
    symbol: &'static str,
    rpt_seq: u32,
    mid: i64,
    tick: i64,
    bids: [(i64, i32, u8); SIM_DEPTH],
    asks: [(i64, i32, u8); SIM_DEPTH],
}

impl SimBook {
    fn seeded(security_id: u32, symbol: &'static str, mid: i64, tick: i64) -> Self {
        let mut book = Self {
            security_id,
            symbol,
            rpt_seq: 0,
            mid,
            tick,
            bids: [(0, 0, 0); SIM_DEPTH],
            asks: [(0, 0, 0); SIM_DEPTH],
        };
        book.reprice();
        for i in 0..SIM_DEPTH {
            let qty = 50 + (SIM_DEPTH - 1 - i) as i32 * 25; // heavier at the top
            let orders = 5 + (SIM_DEPTH - 1 - i) as u8 * 2;
            book.bids[i].1 = qty;
            book.bids[i].2 = orders;
            book.asks[i].1 = qty;
            book.asks[i].2 = orders;
        }
        book
    }

    fn reprice(&mut self) {
        for i in 0..SIM_DEPTH {
            self.bids[i].0 = self.mid - (i as i64 + 1) * self.tick;
            self.asks[i].0 = self.mid + (i as i64 + 1) * self.tick;
        }
    }

    fn random_update<R: Rng>(&mut self, rng: &mut R) {
        let is_bid = rng.gen_bool(0.5);
        let level = rng.gen_range(0..SIM_DEPTH);
        let side = if is_bid { &mut self.bids } else { &mut self.asks };

        let delta: i32 = rng.gen_range(-20..=30);
        side[level].1 = (side[level].1 + delta).max(10);

        // Top-of-book churn occasionally moves the mid a tick.
        if level == 0 && rng.gen_range(0..4) == 0 {
            let dir: i64 = if rng.gen_bool(0.5) { 1 } else { -1 };
            self.mid += dir * self.tick;
            self.reprice();
        }

        self.rpt_seq += 1;
    }

    fn top_entries(&self) -> Vec<IncrementalEntry> {
        let mut entries = Vec::with_capacity(6);
        for i in 0..3 {
            for (levels, entry_type) in [
                (&self.bids, MdEntryType::Bid),
                (&self.asks, MdEntryType::Offer),
            ] {
                entries.push(IncrementalEntry {
                    price: levels[i].0,
                    quantity: levels[i].1,
                    security_id: self.security_id,
                    rpt_seq: self.rpt_seq,
                    entry_type: entry_type.as_u8(),
                    update_action: MdUpdateAction::Overlay.as_u8(),
                    price_level: i as u8 + 1,
                    num_orders: levels[i].2,
                });
            }
        }
        entries
    }

    fn snapshot_entries(&self) -> Vec<SnapshotEntry> {
        let mut entries = Vec::with_capacity(SIM_DEPTH * 2);
        for i in 0..SIM_DEPTH {
            entries.push(SnapshotEntry {
                price: self.bids[i].0,
                quantity: self.bids[i].1,
                entry_type: MdEntryType::Bid.as_u8(),
                price_level: i as u8 + 1,
                num_orders: self.bids[i].2,
            });
        }
        for i in 0..SIM_DEPTH {
            entries.push(SnapshotEntry {
                price: self.asks[i].0,
                quantity: self.asks[i].1,
                entry_type: MdEntryType::Offer.as_u8(),
                price_level: i as u8 + 1,
                num_orders: self.asks[i].2,
            });
        }
        entries
    }

    fn definition(&self) -> SecurityDefinition {
        let mut symbol = [0u8; 20];
        symbol[..self.symbol.len()].copy_from_slice(self.symbol.as_bytes());
        SecurityDefinition {
            security_id: self.security_id,
            symbol,
            min_price_increment: self.tick,
            display_factor: 1,
            trading_status: 17, // trading
        }
    }
}

fn print_usage(program: &str) {
    eprintln!(
        "usage: {program} [options]\n\
         \x20 --interface <ip>          local interface (default 0.0.0.0)\n\
         \x20 --rate <updates/s>        incremental update rate (default 100)\n\
         \x20 --snapshot-interval <ms>  full-refresh cadence (default 1000)\n\
         \x20 --gap-every <n>           skip an rpt_seq every n updates (default off)\n\
         \x20 -h, --help                show this help"
    );
}

fn main() -> anyhow::Result<()> {
    let argv: Vec<String> = std::env::args().collect();
    let mut iface = Ipv4Addr::UNSPECIFIED;
    let mut rate: u64 = 100;
    let mut snapshot_interval_ms: u64 = 1000;
    let mut gap_every: u64 = 0;

    let mut i = 1;
    while i < argv.len() {
        match argv[i].as_str() {
            "--interface" => {
                i += 1;
                iface = argv[i].parse()?;
            }
            "--rate" => {
                i += 1;
                rate = argv[i].parse()?;
            }
            "--snapshot-interval" => {
                i += 1;
                snapshot_interval_ms = argv[i].parse()?;
            }
            "--gap-every" => {
                i += 1;
                gap_every = argv[i].parse()?;
            }
            "-h" | "--help" => {
                print_usage(&argv[0]);
                return Ok(());
            }
            arg => {
                eprintln!("unknown option: {arg}");
                print_usage(&argv[0]);
                std::process::exit(1);
            }
        }
        i += 1;
    }

    let stop = Arc::new(BarrierFlag::default());
    {
        let s = stop.clone();
        ctrlc::set_handler(move || s.raise())?;
    }

    let sock = net::build_tx_socket(iface)?;
    let incr_dest = SocketAddr::new(
        protocol::INCREMENTAL_GROUP.parse::<Ipv4Addr>()?.into(),
        protocol::INCREMENTAL_PORT,
    );
    let snap_dest = SocketAddr::new(
        protocol::SNAPSHOT_GROUP.parse::<Ipv4Addr>()?.into(),
        protocol::SNAPSHOT_PORT,
    );

    // Mantissas carry 7 implied decimals: $4500.00 mid, $0.25 tick, etc.
    let mut books = [
        SimBook::seeded(protocol::SECURITY_ID_ESH26, "ESH26", 45_000_000_000, 2_500_000),
        SimBook::seeded(protocol::SECURITY_ID_NQM26, "NQM26", 180_000_000_000, 2_500_000),
        SimBook::seeded(protocol::SECURITY_ID_CLK26, "CLK26", 750_000_000, 10_000_000),
        SimBook::seeded(protocol::SECURITY_ID_GCZ26, "GCZ26", 20_000_000_000, 1_000_000),
    ];

    let mut incr_packet_seq: u32 = 0;
    let mut snap_packet_seq: u32 = 0;
    let mut rng = rand::thread_rng();

    eprintln!(
        "simulator: incremental {incr_dest}, snapshot {snap_dest}, {rate} updates/s"
    );

    // Definitions go out once so the handler can name the instruments.
    for book in &books {
        incr_packet_seq += 1;
        let pkt = PacketBuilder::new(incr_packet_seq, unix_nanos())
            .security_definition(&book.definition())
            .finish();
        sock.send_to(&pkt, incr_dest)?;
        eprintln!("sent definition for {} (id={})", book.symbol, book.security_id);
    }

    let update_interval = Duration::from_micros(1_000_000 / rate.max(1));
    let snapshot_interval = Duration::from_millis(snapshot_interval_ms.max(1));
    let mut last_snapshot = Instant::now();
    let mut last_report = Instant::now();
    let mut total_updates: u64 = 0;

    while !stop.is_raised() {
        let idx = rng.gen_range(0..books.len());
        let book = &mut books[idx];
        book.random_update(&mut rng);
        total_updates += 1;

        if gap_every > 0 && total_updates % gap_every == 0 {
            // Swallow a sequence number: downstream sees a hole.
            book.rpt_seq += 1;
            eprintln!("injected gap on {} at rpt_seq={}", book.symbol, book.rpt_seq);
        }

        incr_packet_seq += 1;
        let now = unix_nanos();
        let pkt = PacketBuilder::new(incr_packet_seq, now)
            .incremental_refresh(now, &book.top_entries())
            .finish();
        sock.send_to(&pkt, incr_dest)?;

        if last_snapshot.elapsed() >= snapshot_interval {
            for book in &books {
                snap_packet_seq += 1;
                let now = unix_nanos();
                let pkt = PacketBuilder::new(snap_packet_seq, now)
                    .snapshot_full_refresh(
                        incr_packet_seq,
                        book.security_id,
                        book.rpt_seq,
                        now,
                        &book.snapshot_entries(),
                    )
                    .finish();
                sock.send_to(&pkt, snap_dest)?;
            }
            last_snapshot = Instant::now();
        }

        if last_report.elapsed() >= Duration::from_secs(10) {
            eprintln!(
                "simulator: {total_updates} updates sent, incr_seq={incr_packet_seq}, snap_seq={snap_packet_seq}"
            );
            last_report = Instant::now();
        }

        std::thread::sleep(update_interval);
    }

    eprintln!("simulator stopped after {total_updates} updates");
    Ok(())
}
