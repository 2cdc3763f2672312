// src/handler.rs
//
// The dispatch loop and everything it drives. `FeedCore` owns the books,
// recovery state and counters and consumes raw datagrams; `FeedHandler`
// wraps it with the sockets and the poll/conflation timing. All mutation
// happens on the loop thread; the only cross-thread traffic is the stop
// flag.

use std::net::SocketAddr;
use std::os::fd::AsRawFd;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use log::{info, warn};
use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags};

use crate::codec;
use crate::config::AppConfig;
use crate::net;
use crate::protocol::{self, Message, MdEntryType, MdUpdateAction};
use crate::recovery::{RecoveryManager, RecoveryState};
use crate::registry::InstrumentRegistry;
use crate::stats::FeedStats;
use crate::util::{now_nanos, unix_nanos, BarrierFlag};

const RECV_BUF_LEN: usize = 65536;
const SEND_BUF_LEN: usize = 1500;

fn symbol_display(bytes: &[u8; 8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(8);
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

/// Socket-free handler state: datagrams in, encoded snapshots out.
pub struct FeedCore {
    registry: InstrumentRegistry,
    recovery: RecoveryManager,
    stats: FeedStats,
    last_packet_seq: u32,
    first_packet: bool,
    output_seq: u64,
    send_buf: Vec<u8>,
}

impl Default for FeedCore {
    fn default() -> Self {
        Self::new()
    }
}

impl FeedCore {
    pub fn new() -> Self {
        Self {
            registry: InstrumentRegistry::new(),
            recovery: RecoveryManager::new(),
            stats: FeedStats::default(),
            last_packet_seq: 0,
            first_packet: true,
            output_seq: 0,
            send_buf: vec![0u8; SEND_BUF_LEN],
        }
    }

    #[inline]
    pub fn stats(&self) -> &FeedStats {
        &self.stats
    }

    #[inline]
    pub fn registry(&self) -> &InstrumentRegistry {
        &self.registry
    }

    #[inline]
    pub fn recovery(&self) -> &RecoveryManager {
        &self.recovery
    }

    /// True when a snapshot datagram is worth parsing at all.
    #[inline]
    pub fn needs_recovery(&self) -> bool {
        self.recovery.needs_recovery()
    }

    /// Counts a datagram that was received but deliberately not parsed.
    pub fn note_ignored_datagram(&mut self, len: usize) {
        self.stats.messages_received += 1;
        self.stats.bytes_received += len as u64;
    }

    /// Consumes one datagram from the incremental channel.
    pub fn on_incremental_datagram(&mut self, data: &[u8], now_ns: u64) {
        self.stats.messages_received += 1;
        self.stats.bytes_received += data.len() as u64;

        let (pkt, messages) = match protocol::parse_packet(data) {
            Ok(v) => v,
            Err(_) => {
                self.stats.errors += 1;
                return;
            }
        };

        // Packet-level sequence is observability only; per-instrument
        // rpt_seq drives recovery.
        if !self.first_packet && pkt.packet_seq != self.last_packet_seq.wrapping_add(1) {
            warn!(
                "packet gap on incremental channel: expected {}, got {}",
                self.last_packet_seq.wrapping_add(1),
                pkt.packet_seq
            );
        }
        self.first_packet = false;
        self.last_packet_seq = pkt.packet_seq;

        for msg in messages {
            match msg {
                Ok(Message::IncrementalRefresh(view)) => {
                    for entry in view.entries() {
                        if !self
                            .recovery
                            .on_incremental(entry.security_id, entry.rpt_seq, now_ns)
                        {
                            continue;
                        }
                        self.registry.apply_incremental(&entry);

                        match MdUpdateAction::from_u8(entry.update_action) {
                            Some(MdUpdateAction::New) => self.stats.add_orders += 1,
                            Some(MdUpdateAction::Delete) => self.stats.delete_orders += 1,
                            _ => {}
                        }
                        if MdEntryType::from_u8(entry.entry_type) == Some(MdEntryType::Trade) {
                            self.stats.trades += 1;
                        }
                    }
                }
                Ok(Message::SecurityDefinition(def)) => {
                    info!(
                        "security definition: {} (id={})",
                        def.symbol_str(),
                        def.security_id
                    );
                    self.registry.upsert_definition(&def);
                    self.recovery.ensure_security(def.security_id, 1);
                }
                Ok(Message::ChannelReset { transact_time }) => {
                    warn!("channel reset at {transact_time}; clearing all books");
                    self.registry.reset_books();
                    self.recovery.reset_all();
                }
                Ok(Message::Heartbeat { .. }) => {}
                // Snapshots do not travel on this channel.
                Ok(Message::SnapshotFullRefresh(_)) => {}
                Err(_) => {
                    self.stats.errors += 1;
                    return;
                }
            }
        }
    }

    /// Consumes one datagram from the snapshot channel. The caller has
    /// already checked [`needs_recovery`](Self::needs_recovery).
    pub fn on_snapshot_datagram(&mut self, data: &[u8]) {
        self.stats.messages_received += 1;
        self.stats.bytes_received += data.len() as u64;

        let (_, messages) = match protocol::parse_packet(data) {
            Ok(v) => v,
            Err(_) => {
                self.stats.errors += 1;
                return;
            }
        };

        for msg in messages {
            match msg {
                Ok(Message::SnapshotFullRefresh(view)) => {
                    if !self
                        .recovery
                        .on_snapshot(view.security_id, view.rpt_seq, view.last_incr_seq)
                    {
                        continue;
                    }
                    let symbol =
                        symbol_display(&self.registry.symbol_bytes(view.security_id));
                    info!(
                        "applying snapshot for {symbol} at rpt_seq={}",
                        view.rpt_seq
                    );
                    self.registry
                        .apply_snapshot(view.security_id, view.entries(), view.rpt_seq);
                    self.recovery
                        .complete_recovery(view.security_id, view.rpt_seq);
                    info!("recovery complete for {symbol}");
                }
                Ok(_) => {}
                Err(_) => {
                    self.stats.errors += 1;
                    return;
                }
            }
        }
    }

    /// One conflation tick: encodes and emits a snapshot for every dirty
    /// instrument whose recovery state is Normal. Instruments skipped for
    /// being in recovery keep their dirty mark so their first post-recovery
    /// tick publishes the accumulated state. `emit` returns false when the
    /// transport rejected the datagram.
    pub fn conflate(&mut self, now_unix_ns: u64, emit: &mut dyn FnMut(&[u8]) -> bool) {
        let dirty = self.registry.drain_dirty();
        for id in dirty {
            if self.recovery.state(id) != RecoveryState::Normal {
                self.registry.mark_dirty(id);
                continue;
            }
            let Some(book) = self.registry.book(id) else {
                continue;
            };

            let mut snap = book.to_snapshot(self.registry.symbol_bytes(id));
            self.output_seq += 1;
            snap.sequence = self.output_seq;
            snap.timestamp = now_unix_ns;

            match codec::encode_snapshot(&snap, &mut self.send_buf) {
                Ok(len) => {
                    if emit(&self.send_buf[..len]) {
                        self.stats.messages_sent += 1;
                        self.stats.bytes_sent += len as u64;
                    } else {
                        self.stats.errors += 1;
                    }
                }
                Err(_) => {
                    self.stats.errors += 1;
                }
            }
        }
    }

    /// Recovery-timeout sweep; logs each instrument that has waited longer
    /// than `timeout_ns` for a snapshot.
    pub fn sweep_timeouts(&mut self, now_ns: u64, timeout_ns: u64) {
        for id in self.recovery.check_timeouts(now_ns, timeout_ns) {
            let symbol = symbol_display(&self.registry.symbol_bytes(id));
            warn!("recovery timeout for {symbol}; waiting for next snapshot");
        }
    }

    pub fn report_stats(&self) {
        let recovering: Vec<String> = self
            .recovery
            .recovering_securities()
            .iter()
            .map(|&id| symbol_display(&self.registry.symbol_bytes(id)))
            .collect();
        self.stats.report(self.recovery.stats(), &recovering);
    }
}

/// Owns the sockets and runs the cooperative loop around a [`FeedCore`].
pub struct FeedHandler {
    cfg: AppConfig,
    core: FeedCore,
    incremental_rx: std::net::UdpSocket,
    snapshot_rx: std::net::UdpSocket,
    output_tx: std::net::UdpSocket,
    output_dest: SocketAddr,
    recv_buf: Vec<u8>,
    stop: Arc<BarrierFlag>,
}

impl FeedHandler {
    pub fn new(cfg: AppConfig, stop: Arc<BarrierFlag>) -> anyhow::Result<Self> {
        let incremental_rx = net::build_rx_socket(
            cfg.incremental.group,
            cfg.incremental.port,
            cfg.interface,
            cfg.recv_buffer_bytes,
        )
        .context("incremental receiver")?;
        let snapshot_rx = net::build_rx_socket(
            cfg.snapshot.group,
            cfg.snapshot.port,
            cfg.interface,
            cfg.recv_buffer_bytes,
        )
        .context("snapshot receiver")?;
        let output_tx = net::build_tx_socket(cfg.interface).context("output sender")?;
        let output_dest = SocketAddr::new(cfg.output.group.into(), cfg.output.port);

        info!(
            "incremental {}:{} | snapshot {}:{} | output {}:{}",
            cfg.incremental.group,
            cfg.incremental.port,
            cfg.snapshot.group,
            cfg.snapshot.port,
            cfg.output.group,
            cfg.output.port
        );

        Ok(Self {
            cfg,
            core: FeedCore::new(),
            incremental_rx,
            snapshot_rx,
            output_tx,
            output_dest,
            recv_buf: vec![0u8; RECV_BUF_LEN],
            stop,
        })
    }

    pub fn run(&mut self) -> anyhow::Result<()> {
        let conflation = Duration::from_millis(self.cfg.conflation_interval_ms);
        let stats_every = Duration::from_secs(self.cfg.stats_interval_secs.max(1));
        let timeout_ns = self.cfg.recovery_timeout_ms * 1_000_000;

        let mut next_conflation = Instant::now() + conflation;
        let mut next_stats = Instant::now() + stats_every;

        let inc_fd = self.incremental_rx.as_raw_fd();
        let snap_fd = self.snapshot_rx.as_raw_fd();

        while !self.stop.is_raised() {
            let timeout_ms = next_conflation
                .saturating_duration_since(Instant::now())
                .as_millis()
                .clamp(1, i32::MAX as u128) as i32;

            let mut fds = [
                PollFd::new(inc_fd, PollFlags::POLLIN),
                PollFd::new(snap_fd, PollFlags::POLLIN),
            ];
            match poll(&mut fds, timeout_ms) {
                Ok(0) => {}
                Ok(_) => {
                    let inc_ready = fds[0]
                        .revents()
                        .map_or(false, |r| r.intersects(PollFlags::POLLIN));
                    let snap_ready = fds[1]
                        .revents()
                        .map_or(false, |r| r.intersects(PollFlags::POLLIN));

                    if inc_ready {
                        match self.incremental_rx.recv_from(&mut self.recv_buf) {
                            Ok((len, _)) => {
                                let now = now_nanos();
                                self.core
                                    .on_incremental_datagram(&self.recv_buf[..len], now);
                            }
                            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
                            Err(e) => return Err(e).context("recv incremental"),
                        }
                    }
                    if snap_ready {
                        match self.snapshot_rx.recv_from(&mut self.recv_buf) {
                            Ok((len, _)) => {
                                if self.core.needs_recovery() {
                                    self.core.on_snapshot_datagram(&self.recv_buf[..len]);
                                } else {
                                    // All instruments healthy: not worth parsing.
                                    self.core.note_ignored_datagram(len);
                                }
                            }
                            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
                            Err(e) => return Err(e).context("recv snapshot"),
                        }
                    }
                }
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(anyhow::anyhow!("poll failed: {e}")),
            }

            let now = Instant::now();
            if now >= next_conflation {
                let ts = unix_nanos();
                let sock = &self.output_tx;
                let dest = self.output_dest;
                self.core
                    .conflate(ts, &mut |frame| sock.send_to(frame, dest).is_ok());
                next_conflation += conflation;
            }
            if now >= next_stats {
                self.core.report_stats();
                next_stats += stats_every;
            }

            self.core.sweep_timeouts(now_nanos(), timeout_ns);
        }

        info!("feed handler stopped");
        Ok(())
    }
}
