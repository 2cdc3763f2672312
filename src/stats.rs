// src/stats.rs
use log::info;

use crate::recovery::RecoveryStats;

/// Flow counters for the handler. Gap/recovery/drop counters live with the
/// recovery manager and are merged in at report time.
#[derive(Debug, Default, Clone, Copy)]
pub struct FeedStats {
    pub messages_received: u64,
    pub bytes_received: u64,
    pub messages_sent: u64,
    pub bytes_sent: u64,
    pub add_orders: u64,
    pub delete_orders: u64,
    pub trades: u64,
    pub errors: u64,
}

impl FeedStats {
    /// Emits the periodic counter report; `recovering` names the instruments
    /// currently off the happy path.
    pub fn report(&self, recovery: &RecoveryStats, recovering: &[String]) {
        info!(
            "rx: msgs={} bytes={} | tx: msgs={} bytes={} | adds={} deletes={} trades={} errors={}",
            self.messages_received,
            self.bytes_received,
            self.messages_sent,
            self.bytes_sent,
            self.add_orders,
            self.delete_orders,
            self.trades,
            self.errors,
        );
        info!(
            "recovery: gaps={} completed={} dropped={}",
            recovery.gaps_detected, recovery.recoveries_completed, recovery.messages_dropped,
        );
        if !recovering.is_empty() {
            info!("instruments in recovery: {}", recovering.join(" "));
        }
    }
}
