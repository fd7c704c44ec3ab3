//! Per-port counters and rate arithmetic.
//!
//! Monotonic totals are only ever written by the monitor worker that owns
//! them; the transmit path feeds the separate shadow pair. Readers take
//! relaxed snapshots: the pairs they observe are individually torn but
//! monotonic, which is the contract the stats RPC exposes.

use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time statistics reported for one port, relative to the last
/// clear.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Received packets.
    pub rx_pkts: u64,
    /// Received bytes.
    pub rx_bytes: u64,
    /// NIC receive-OK counter.
    pub rx_pkts_nic: u64,
    /// NIC receive byte counter.
    pub rx_bytes_nic: u64,
    /// Receive packet rate, packets per second.
    pub rx_pps: u64,
    /// Receive byte rate, bytes per second.
    pub rx_bps: u64,
    /// Transmitted packets.
    pub tx_pkts: u64,
    /// Transmitted bytes.
    pub tx_bytes: u64,
    /// NIC transmit-OK counter.
    pub tx_pkts_nic: u64,
    /// NIC transmit byte counter.
    pub tx_bytes_nic: u64,
    /// Transmit packet rate, packets per second.
    pub tx_pps: u64,
    /// Transmit byte rate, bytes per second.
    pub tx_bps: u64,
}

/// The eight monotonic totals, used both live and as the epoch baseline.
#[derive(Debug, Default)]
pub struct CounterBlock {
    pub rx_pkts: AtomicU64,
    pub rx_bytes: AtomicU64,
    pub rx_pkts_nic: AtomicU64,
    pub rx_bytes_nic: AtomicU64,
    pub tx_pkts: AtomicU64,
    pub tx_bytes: AtomicU64,
    pub tx_pkts_nic: AtomicU64,
    pub tx_bytes_nic: AtomicU64,
}

/// Live statistics state of one port, shared between the monitor workers,
/// the transmit path and the stats operations.
#[derive(Debug, Default)]
pub struct PortCounters {
    /// Running totals, written by the monitor workers.
    pub totals: CounterBlock,
    /// Baseline recorded by the last clear; reported values are
    /// `totals - epoch`.
    pub epoch: CounterBlock,
    pub rx_pps: AtomicU64,
    pub rx_bps: AtomicU64,
    pub tx_pps: AtomicU64,
    pub tx_bps: AtomicU64,
    /// Transmit totals fed by the submit path. Statistics-mode drivers
    /// cannot attribute transmit traffic, so the tx monitor reconciles its
    /// totals against these.
    pub shadow_tx_pkts: AtomicU64,
    pub shadow_tx_bytes: AtomicU64,
}

impl PortCounters {
    /// Snapshot the totals relative to the epoch, plus the instantaneous
    /// rates.
    pub fn snapshot(&self) -> StatsSnapshot {
        let totals = &self.totals;
        let epoch = &self.epoch;
        let since = |t: &AtomicU64, e: &AtomicU64| {
            t.load(Ordering::Relaxed)
                .wrapping_sub(e.load(Ordering::Relaxed))
        };

        StatsSnapshot {
            rx_pkts: since(&totals.rx_pkts, &epoch.rx_pkts),
            rx_bytes: since(&totals.rx_bytes, &epoch.rx_bytes),
            rx_pkts_nic: since(&totals.rx_pkts_nic, &epoch.rx_pkts_nic),
            rx_bytes_nic: since(&totals.rx_bytes_nic, &epoch.rx_bytes_nic),
            rx_pps: self.rx_pps.load(Ordering::Relaxed),
            rx_bps: self.rx_bps.load(Ordering::Relaxed),
            tx_pkts: since(&totals.tx_pkts, &epoch.tx_pkts),
            tx_bytes: since(&totals.tx_bytes, &epoch.tx_bytes),
            tx_pkts_nic: since(&totals.tx_pkts_nic, &epoch.tx_pkts_nic),
            tx_bytes_nic: since(&totals.tx_bytes_nic, &epoch.tx_bytes_nic),
            tx_pps: self.tx_pps.load(Ordering::Relaxed),
            tx_bps: self.tx_bps.load(Ordering::Relaxed),
        }
    }

    /// Record the current totals as the new epoch baseline.
    pub fn clear(&self) {
        let totals = &self.totals;
        let epoch = &self.epoch;
        let copy = |t: &AtomicU64, e: &AtomicU64| e.store(t.load(Ordering::Relaxed), Ordering::Relaxed);

        copy(&totals.rx_pkts, &epoch.rx_pkts);
        copy(&totals.rx_bytes, &epoch.rx_bytes);
        copy(&totals.rx_pkts_nic, &epoch.rx_pkts_nic);
        copy(&totals.rx_bytes_nic, &epoch.rx_bytes_nic);
        copy(&totals.tx_pkts, &epoch.tx_pkts);
        copy(&totals.tx_bytes, &epoch.tx_bytes);
        copy(&totals.tx_pkts_nic, &epoch.tx_pkts_nic);
        copy(&totals.tx_bytes_nic, &epoch.tx_bytes_nic);
    }
}

/// Rates from one statistics-mode interval summary.
pub(crate) fn interval_rates(pkts: u64, bytes: u64, usec: u64) -> (u64, u64) {
    let usec = usec.max(1);
    (pkts * 1_000_000 / usec, bytes * 1_000_000 / usec)
}

/// Sliding-window rate estimator for capture-mode monitors, which see one
/// callback per packet and no interval summaries.
#[derive(Debug)]
pub(crate) struct RateWindow {
    start_usec: Option<u64>,
    pkts: u64,
    bytes: u64,
}

impl RateWindow {
    const WINDOW_USEC: u64 = 1_000_000;

    pub(crate) fn new() -> Self {
        RateWindow {
            start_usec: None,
            pkts: 0,
            bytes: 0,
        }
    }

    /// Accumulate one packet; yields `(pps, bps)` whenever a full window
    /// has elapsed.
    pub(crate) fn record(&mut self, wire_len: u32, ts_usec: u64) -> Option<(u64, u64)> {
        let start = *self.start_usec.get_or_insert(ts_usec);
        self.pkts += 1;
        self.bytes += u64::from(wire_len);

        let elapsed = ts_usec.saturating_sub(start);
        if elapsed < Self::WINDOW_USEC {
            return None;
        }

        let rates = (
            self.pkts * 1_000_000 / elapsed,
            self.bytes * 1_000_000 / elapsed,
        );
        self.start_usec = Some(ts_usec);
        self.pkts = 0;
        self.bytes = 0;
        Some(rates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_is_relative_to_the_epoch() {
        let counters = PortCounters::default();
        counters.totals.rx_pkts.store(10, Ordering::Relaxed);
        counters.totals.rx_bytes.store(1000, Ordering::Relaxed);
        counters.totals.tx_pkts.store(4, Ordering::Relaxed);

        assert_eq!(counters.snapshot().rx_pkts, 10);

        counters.clear();
        let snap = counters.snapshot();
        assert_eq!(snap.rx_pkts, 0);
        assert_eq!(snap.rx_bytes, 0);
        assert_eq!(snap.tx_pkts, 0);

        counters.totals.rx_pkts.fetch_add(5, Ordering::Relaxed);
        assert_eq!(counters.snapshot().rx_pkts, 5);
    }

    #[test]
    fn interval_rates_scale_to_seconds() {
        // 100 packets and 6400 bytes over half a second.
        assert_eq!(interval_rates(100, 6400, 500_000), (200, 12_800));
        // A zero interval must not fault.
        let (pps, _) = interval_rates(1, 64, 0);
        assert_eq!(pps, 1_000_000);
    }

    #[test]
    fn rate_window_publishes_once_per_second() {
        let mut window = RateWindow::new();

        // 999 packets inside the window publish nothing.
        for i in 0..999 {
            assert_eq!(window.record(64, i * 1000), None);
        }
        // The packet that crosses the window boundary closes it.
        let (pps, bps) = window.record(64, 1_000_000).unwrap();
        assert_eq!(pps, 1000);
        assert_eq!(bps, 64_000);

        // The next window starts fresh.
        assert_eq!(window.record(64, 1_500_000), None);
    }
}
