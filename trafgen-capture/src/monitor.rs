//! The two capture workers of a port.
//!
//! Each worker blocks inside the driver's callback loop for the port's
//! whole lifetime and owns its side of the counters; it holds the shared
//! counter block and a handle reference, never the port itself. Closing
//! the handle is the single shutdown signal.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{debug, warn};

use crate::driver::{CaptureEvent, CaptureHandle, LoopExit, NicCounter};
use crate::sendq::PKT_DESC_SIZE;
use crate::stats::{interval_rates, PortCounters, RateWindow};

pub(crate) struct Monitor {
    thread: Option<JoinHandle<()>>,
}

impl Monitor {
    pub(crate) fn spawn_rx(
        port_name: &str,
        handle: Arc<dyn CaptureHandle>,
        counters: Arc<PortCounters>,
    ) -> Monitor {
        Monitor::spawn(format!("{port_name}-rx-mon"), move || {
            run_rx(handle.as_ref(), counters.as_ref())
        })
    }

    pub(crate) fn spawn_tx(
        port_name: &str,
        handle: Arc<dyn CaptureHandle>,
        counters: Arc<PortCounters>,
    ) -> Monitor {
        Monitor::spawn(format!("{port_name}-tx-mon"), move || {
            run_tx(handle.as_ref(), counters.as_ref())
        })
    }

    fn spawn<F>(name: String, body: F) -> Monitor
    where
        F: FnOnce() -> LoopExit + Send + 'static,
    {
        let thread = thread::Builder::new()
            .name(name.clone())
            .spawn(move || match body() {
                LoopExit::Solicited => debug!("{name}: capture loop closed"),
                LoopExit::Error(e) => warn!("{name}: capture loop failed: {e}"),
            })
            .expect("failed to spawn monitor thread");

        Monitor {
            thread: Some(thread),
        }
    }

    /// Wait for the worker to unwind; the handle must already be closed.
    pub(crate) fn join(&mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn run_rx(handle: &dyn CaptureHandle, counters: &PortCounters) -> LoopExit {
    let mut last_ts = 0u64;
    let mut window = RateWindow::new();

    handle.run_loop(&mut |event| match event {
        CaptureEvent::Stats {
            pkts,
            bytes,
            ts_usec,
        } => {
            // The driver's byte totals include one record header per packet.
            let bytes = bytes.saturating_sub(pkts * PKT_DESC_SIZE as u64);

            if last_ts != 0 {
                let (pps, bps) = interval_rates(pkts, bytes, ts_usec.saturating_sub(last_ts));
                counters.rx_pps.store(pps, Ordering::Relaxed);
                counters.rx_bps.store(bps, Ordering::Relaxed);
            }
            counters.totals.rx_pkts.fetch_add(pkts, Ordering::Relaxed);
            counters.totals.rx_bytes.fetch_add(bytes, Ordering::Relaxed);
            last_ts = ts_usec;

            if let Ok(value) = handle.nic_counter(NicCounter::RxOk) {
                counters.totals.rx_pkts_nic.store(value, Ordering::Relaxed);
            }
        }
        CaptureEvent::Packet {
            wire_len, ts_usec, ..
        } => {
            // Capture-mode lengths are wire lengths; no header adjustment.
            counters.totals.rx_pkts.fetch_add(1, Ordering::Relaxed);
            counters
                .totals
                .rx_bytes
                .fetch_add(u64::from(wire_len), Ordering::Relaxed);

            if let Some((pps, bps)) = window.record(wire_len, ts_usec) {
                counters.rx_pps.store(pps, Ordering::Relaxed);
                counters.rx_bps.store(bps, Ordering::Relaxed);
            }
        }
    })
}

fn run_tx(handle: &dyn CaptureHandle, counters: &PortCounters) -> LoopExit {
    let mut last_ts = 0u64;
    let mut window = RateWindow::new();

    handle.run_loop(&mut |event| match event {
        CaptureEvent::Stats { ts_usec, .. } => {
            // A statistics-mode driver cannot attribute transmit traffic,
            // so the summary's own counts are useless here; reconcile the
            // totals against the shadow counters fed by the submit path,
            // keeping the callback timestamp for the rates.
            let shadow_pkts = counters.shadow_tx_pkts.load(Ordering::Relaxed);
            let shadow_bytes = counters.shadow_tx_bytes.load(Ordering::Relaxed);
            let pkts = shadow_pkts.saturating_sub(counters.totals.tx_pkts.load(Ordering::Relaxed));
            let bytes =
                shadow_bytes.saturating_sub(counters.totals.tx_bytes.load(Ordering::Relaxed));

            if last_ts != 0 {
                let (pps, bps) = interval_rates(pkts, bytes, ts_usec.saturating_sub(last_ts));
                counters.tx_pps.store(pps, Ordering::Relaxed);
                counters.tx_bps.store(bps, Ordering::Relaxed);
            }
            counters.totals.tx_pkts.store(shadow_pkts, Ordering::Relaxed);
            counters
                .totals
                .tx_bytes
                .store(shadow_bytes, Ordering::Relaxed);
            last_ts = ts_usec;

            if let Ok(value) = handle.nic_counter(NicCounter::TxOk) {
                counters.totals.tx_pkts_nic.store(value, Ordering::Relaxed);
            }
        }
        CaptureEvent::Packet {
            wire_len, ts_usec, ..
        } => {
            counters.totals.tx_pkts.fetch_add(1, Ordering::Relaxed);
            counters
                .totals
                .tx_bytes
                .fetch_add(u64::from(wire_len), Ordering::Relaxed);

            if let Some((pps, bps)) = window.record(wire_len, ts_usec) {
                counters.tx_pps.store(pps, Ordering::Relaxed);
                counters.tx_bps.store(bps, Ordering::Relaxed);
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{Direction, HandleMode};
    use crate::testing::TestDriver;
    use std::time::Duration;

    fn wait_until(what: &str, cond: impl Fn() -> bool) {
        for _ in 0..400 {
            if cond() {
                return;
            }
            thread::sleep(Duration::from_millis(5));
        }
        panic!("timed out waiting for {what}");
    }

    #[test]
    fn stats_mode_rx_worker_adjusts_and_accumulates() {
        let driver = TestDriver::new(1, HandleMode::Stats);
        let handle = driver.open_test("test0", Direction::In).unwrap();
        let counters = Arc::new(PortCounters::default());

        handle.set_nic_counter(NicCounter::RxOk, 42);
        let mut monitor = Monitor::spawn_rx("t", handle.clone(), counters.clone());

        // 5 packets over-reported by one descriptor each.
        handle.push_stats(5, 5 * (100 + PKT_DESC_SIZE as u64), 1_000_000);
        wait_until("first summary", || {
            counters.totals.rx_pkts.load(Ordering::Relaxed) == 5
                && counters.totals.rx_bytes.load(Ordering::Relaxed) == 500
                && counters.totals.rx_pkts_nic.load(Ordering::Relaxed) == 42
        });
        // No previous timestamp: no rate yet.
        assert_eq!(counters.rx_pps.load(Ordering::Relaxed), 0);

        // Second interval, half a second later: rates appear.
        handle.push_stats(100, 100 * (64 + PKT_DESC_SIZE as u64), 1_500_000);
        wait_until("second summary", || {
            counters.totals.rx_pkts.load(Ordering::Relaxed) == 105
                && counters.rx_pps.load(Ordering::Relaxed) == 200
                && counters.rx_bps.load(Ordering::Relaxed) == 12_800
        });

        handle.break_loop();
        monitor.join();
    }

    #[test]
    fn stats_mode_tx_worker_reconciles_shadow_counters() {
        let driver = TestDriver::new(1, HandleMode::Stats);
        let handle = driver.open_test("test0", Direction::Out).unwrap();
        let counters = Arc::new(PortCounters::default());

        counters.shadow_tx_pkts.store(15, Ordering::Relaxed);
        counters.shadow_tx_bytes.store(900, Ordering::Relaxed);
        handle.set_nic_counter(NicCounter::TxOk, 15);

        let mut monitor = Monitor::spawn_tx("t", handle.clone(), counters.clone());

        handle.push_stats(0, 0, 2_000_000);
        wait_until("reconciled totals", || {
            counters.totals.tx_pkts.load(Ordering::Relaxed) == 15
                && counters.totals.tx_bytes.load(Ordering::Relaxed) == 900
                && counters.totals.tx_pkts_nic.load(Ordering::Relaxed) == 15
        });

        handle.break_loop();
        monitor.join();
    }

    #[test]
    fn capture_mode_worker_counts_wire_lengths() {
        let driver = TestDriver::new(1, HandleMode::Capture);
        let handle = driver.open_test("test0", Direction::In).unwrap();
        let counters = Arc::new(PortCounters::default());

        let mut monitor = Monitor::spawn_rx("t", handle.clone(), counters.clone());

        for i in 0..10u64 {
            handle.push_packet(&[0u8; 60], i * 1000);
        }
        wait_until("all packets", || {
            counters.totals.rx_pkts.load(Ordering::Relaxed) == 10
                && counters.totals.rx_bytes.load(Ordering::Relaxed) == 600
        });

        handle.break_loop();
        monitor.join();
    }
}
