// Console subscriber for the published book feed: joins the output group,
// decodes each datagram and renders a two-column depth view. Handy for
// eyeballing what the handler is actually publishing.

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use chrono::DateTime;

use mdp_feedhandler::codec;
use mdp_feedhandler::net;
use mdp_feedhandler::util::BarrierFlag;

const DISPLAY_DEPTH: usize = 5;

fn format_timestamp(ts_ns: u64) -> String {
    DateTime::from_timestamp((ts_ns / 1_000_000_000) as i64, (ts_ns % 1_000_000_000) as u32)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S%.6f").to_string())
        .unwrap_or_else(|| ts_ns.to_string())
}

fn print_snapshot(snap: &codec::L2Snapshot) {
    println!(
        "\n{} @ {} (seq={})",
        snap.symbol_str(),
        format_timestamp(snap.timestamp),
        snap.sequence
    );
    println!("  BID                    ASK");
    println!("  ---                    ---");

    let rows = snap.bids.len().max(snap.asks.len()).min(DISPLAY_DEPTH);
    for i in 0..rows {
        let bid = snap
            .bids
            .get(i)
            .map(|l| format!("{:>5} @ {:>10.2}", l.quantity, codec::wire_price_to_f64(l.price)))
            .unwrap_or_else(|| " ".repeat(18));
        let ask = snap
            .asks
            .get(i)
            .map(|l| format!("{:>5} @ {:>10.2}", l.quantity, codec::wire_price_to_f64(l.price)))
            .unwrap_or_default();
        println!("  {bid}    {ask}");
    }

    if snap.last_trade_price > 0 {
        println!(
            "  Last: {:.2} x {} | Volume: {}",
            codec::wire_price_to_f64(snap.last_trade_price),
            snap.last_trade_qty,
            snap.total_volume
        );
    }
}

fn print_raw(buf: &[u8]) {
    match codec::decode_header(buf) {
        Ok(hdr) => println!(
            "  header: block_length={} template_id={} schema_id={} version={}",
            hdr.block_length, hdr.template_id, hdr.schema_id, hdr.version
        ),
        Err(e) => println!("  [bad header: {e}]"),
    }
}

fn print_usage(program: &str) {
    eprintln!(
        "usage: {program} [options]\n\
         \x20 --group <ip>       multicast group (default 239.2.1.3)\n\
         \x20 --port <port>      port (default 40003)\n\
         \x20 --interface <ip>   local interface (default 0.0.0.0)\n\
         \x20 --filter <symbol>  only show this symbol\n\
         \x20 --raw              dump SBE header fields as well\n\
         \x20 -h, --help         show this help"
    );
}

fn main() -> anyhow::Result<()> {
    let argv: Vec<String> = std::env::args().collect();
    let mut group: Ipv4Addr = "239.2.1.3".parse().unwrap();
    let mut port: u16 = 40003;
    let mut iface = Ipv4Addr::UNSPECIFIED;
    let mut filter: Option<String> = None;
    let mut raw = false;

    let mut i = 1;
    while i < argv.len() {
        match argv[i].as_str() {
            "--group" => {
                i += 1;
                group = argv[i].parse()?;
            }
            "--port" => {
                i += 1;
                port = argv[i].parse()?;
            }
            "--interface" => {
                i += 1;
                iface = argv[i].parse()?;
            }
            "--filter" => {
                i += 1;
                filter = Some(argv[i].clone());
            }
            "--raw" => raw = true,
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

    let sock = net::build_rx_socket(group, port, iface, 1 << 20)?;
    // Blocking receive with a short timeout so the stop flag stays live.
    sock.set_nonblocking(false)?;
    sock.set_read_timeout(Some(Duration::from_millis(500)))?;

    eprintln!("listening on {group}:{port}");

    let mut buf = vec![0u8; 2048];
    let mut received: u64 = 0;
    while !stop.is_raised() {
        let len = match sock.recv_from(&mut buf) {
            Ok((len, _)) => len,
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                continue;
            }
            Err(e) => return Err(e.into()),
        };
        received += 1;

        if raw {
            print_raw(&buf[..len]);
        }

        match codec::decode_snapshot(&buf[..len]) {
            Ok(snap) => {
                if let Some(ref want) = filter {
                    if snap.symbol_str() != *want {
                        continue;
                    }
                }
                print_snapshot(&snap);
            }
            Err(codec::DecodeError::UnexpectedTemplate { .. }) => {
                if let Ok(hb) = codec::decode_heartbeat(&buf[..len]) {
                    println!("heartbeat seq={} ts={}", hb.sequence, hb.timestamp);
                }
            }
            Err(e) => eprintln!("undecodable datagram ({len} bytes): {e}"),
        }
    }

    eprintln!("receiver stopped after {received} datagrams");
    Ok(())
}
