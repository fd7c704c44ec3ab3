//! One transmit-capable port over a pair of capture handles.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use rand::rngs::StdRng;
use tracing::{debug, warn};

use trafgen::stream::{StreamConfig, StreamPatch};
use trafgen::synth;

use crate::driver::{CaptureDriver, CaptureHandle, DeviceDesc, Direction, HandleMode};
use crate::monitor::Monitor;
use crate::sendq::{PktDesc, SendQueue, PKT_DESC_SIZE, SEND_QUEUE_CAP};
use crate::stats::{PortCounters, StatsSnapshot};

// Scratch buffer for one synthesized frame; anything larger is dropped by
// the synthesizer as a buffer overflow.
const SCRATCH_LEN: usize = 2000;

/// Administrative description of one port.
#[derive(Debug, Clone)]
pub struct PortConfig {
    /// Index of the port in the inventory, stable for the process lifetime.
    pub id: u32,
    /// Interface name suffixed with the data-link type.
    pub name: String,
    /// Driver-provided description, possibly empty.
    pub description: String,
    /// Whether the port accepts configuration.
    pub is_enabled: bool,
    /// False when one of the capture handles failed to open; such a port
    /// stays listed but never transmits.
    pub is_oper_up: bool,
    /// Whether a single client holds exclusive control.
    pub is_exclusive: bool,
}

#[derive(Debug, Clone, Copy)]
struct StreamEntry {
    id: u32,
    config: StreamConfig,
}

/// A port owns its two direction-restricted handles, the ordered stream
/// store, the lazily rebuilt send queue and the counters shared with its
/// two monitor workers.
pub(crate) struct Port {
    config: PortConfig,
    rx_handle: Option<Arc<dyn CaptureHandle>>,
    tx_handle: Option<Arc<dyn CaptureHandle>>,
    streams: Vec<StreamEntry>,
    send_queue: Option<SendQueue>,
    dirty: bool,
    counters: Arc<PortCounters>,
    monitors: Vec<Monitor>,
}

impl Port {
    /// Open both handles on `dev` and start the monitor pair. Open
    /// failures are logged and leave the port listed but down.
    pub(crate) fn new(id: u32, dev: &DeviceDesc, driver: &dyn CaptureDriver) -> Port {
        // One handle per direction: a single handle would never observe
        // the traffic submitted through itself.
        let rx_handle = match driver.open(&dev.name, Direction::In) {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!("port {id}: error opening inbound handle on {}: {e}", dev.name);
                None
            }
        };
        let tx_handle = match driver.open(&dev.name, Direction::Out) {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!("port {id}: error opening outbound handle on {}: {e}", dev.name);
                None
            }
        };

        let mut name = if dev.name.is_empty() {
            format!("if{id}")
        } else {
            dev.name.clone()
        };
        if let Some(handle) = &rx_handle {
            name.push_str(handle.datalink());
        }

        let config = PortConfig {
            id,
            name,
            description: dev.description.clone().unwrap_or_default(),
            is_enabled: true,
            is_oper_up: rx_handle.is_some() && tx_handle.is_some(),
            is_exclusive: false,
        };

        let counters = Arc::new(PortCounters::default());
        let mut monitors = Vec::new();
        if let Some(handle) = &rx_handle {
            monitors.push(Monitor::spawn_rx(&config.name, handle.clone(), counters.clone()));
        }
        if let Some(handle) = &tx_handle {
            monitors.push(Monitor::spawn_tx(&config.name, handle.clone(), counters.clone()));
        }

        Port {
            config,
            rx_handle,
            tx_handle,
            streams: Vec::new(),
            send_queue: None,
            dirty: true,
            counters,
            monitors,
        }
    }

    pub(crate) fn config(&self) -> &PortConfig {
        &self.config
    }

    pub(crate) fn stream_ids(&self) -> Vec<u32> {
        self.streams.iter().map(|entry| entry.id).collect()
    }

    pub(crate) fn stream_config(&self, id: u32) -> Option<StreamConfig> {
        self.find_stream(id).map(|i| self.streams[i].config)
    }

    /// Append a default stream under `id`; an existing id is left alone.
    pub(crate) fn add_stream(&mut self, id: u32) {
        if self.find_stream(id).is_some() {
            debug!("port {}: stream id {id} exists, skipped", self.config.id);
        } else {
            self.streams.push(StreamEntry {
                id,
                config: StreamConfig::default(),
            });
        }
        self.dirty = true;
    }

    /// Remove the stream under `id`; a missing id is ignored.
    pub(crate) fn delete_stream(&mut self, id: u32) {
        if let Some(i) = self.find_stream(id) {
            self.streams.remove(i);
        } else {
            debug!("port {}: stream id {id} not found, skipped", self.config.id);
        }
        self.dirty = true;
    }

    /// Merge `patch` into the stream under `id`; a missing id is ignored.
    pub(crate) fn modify_stream(&mut self, id: u32, patch: &StreamPatch) {
        if let Some(i) = self.find_stream(id) {
            patch.apply(&mut self.streams[i].config);
        } else {
            debug!("port {}: stream id {id} not found, skipped", self.config.id);
        }
        self.dirty = true;
    }

    pub(crate) fn is_dirty(&self) -> bool {
        self.dirty
    }

    fn find_stream(&self, id: u32) -> Option<usize> {
        self.streams.iter().position(|entry| entry.id == id)
    }

    /// Rebuild the send queue from the stream store.
    pub(crate) fn update(&mut self, rng: &mut StdRng) {
        debug!("port {}: rebuilding send queue", self.config.id);

        let mut queue = SendQueue::with_capacity(SEND_QUEUE_CAP);

        // Transmission follows ascending ordinal order.
        self.streams.sort_by_key(|entry| entry.config.ordinal);

        let mut scratch = [0u8; SCRATCH_LEN];
        for (index, entry) in self.streams.iter().enumerate() {
            if !entry.config.enabled {
                continue;
            }

            let (bursts, packets) = entry.config.control.grid();
            for j in 0..bursts {
                for k in 0..packets {
                    let n = j.wrapping_mul(packets).wrapping_add(k);
                    match synth::synthesize(&entry.config, n, &mut scratch, rng) {
                        Some(len) if len > 0 => {
                            let desc = PktDesc {
                                ts_usec: 0,
                                len: len as u32,
                            };
                            if let Err(e) = queue.enqueue(desc, &scratch[..len]) {
                                debug!(
                                    "port {}: enqueue failed for stream index {index}: {e}",
                                    self.config.id
                                );
                            }
                        }
                        _ => {}
                    }
                }
            }
        }

        self.send_queue = Some(queue);
        self.dirty = false;
    }

    /// Submit the whole send queue and account for what the driver
    /// actually took.
    pub(crate) fn start_transmit(&self) {
        // Submission happens on the inbound handle: a statistics-mode
        // driver never loops traffic sent on the outbound handle back into
        // that handle's own summary callback.
        let Some(handle) = self.rx_handle.as_ref() else {
            return;
        };
        let Some(queue) = self.send_queue.as_ref() else {
            return;
        };
        if queue.is_empty() {
            return;
        }

        let queued = queue.byte_len() as u64;
        match handle.transmit(queue) {
            Ok(bytes_sent) => {
                let pkts = if bytes_sent < queued {
                    warn!(
                        "port {}: sent ({bytes_sent}/{queued}) bytes, tx stats may be inconsistent",
                        self.config.id
                    );
                    queue.pkts_within(bytes_sent)
                } else {
                    debug!("port {}: sent ({bytes_sent}/{queued}) bytes", self.config.id);
                    queue.num_pkts()
                };

                // The driver's byte count covers the per-packet record
                // headers; strip them to recover payload bytes.
                let bytes = bytes_sent.saturating_sub((pkts * PKT_DESC_SIZE) as u64);

                if handle.mode() == HandleMode::Stats {
                    self.counters
                        .shadow_tx_pkts
                        .fetch_add(pkts as u64, Ordering::Relaxed);
                    self.counters
                        .shadow_tx_bytes
                        .fetch_add(bytes, Ordering::Relaxed);
                }
            }
            Err(e) => warn!("port {}: transmit failed: {e}", self.config.id),
        }
    }

    /// Hook for halting a transmission in flight; queued submission is
    /// synchronous, so there is nothing to halt yet.
    pub(crate) fn stop_transmit(&self) {
        debug!("port {}: stop transmit", self.config.id);
    }

    pub(crate) fn stats(&self) -> StatsSnapshot {
        self.counters.snapshot()
    }

    pub(crate) fn clear_stats(&self) {
        self.counters.clear();
    }

    #[cfg(test)]
    pub(crate) fn send_queue(&self) -> Option<&SendQueue> {
        self.send_queue.as_ref()
    }

    #[cfg(test)]
    pub(crate) fn counters(&self) -> &PortCounters {
        &self.counters
    }
}

impl Drop for Port {
    fn drop(&mut self) {
        // Closing the handles is the shutdown signal for both workers.
        if let Some(handle) = &self.rx_handle {
            handle.break_loop();
        }
        if let Some(handle) = &self.tx_handle {
            handle.break_loop();
        }
        for monitor in &mut self.monitors {
            monitor.join();
        }
    }
}
