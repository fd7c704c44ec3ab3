//! The engine façade the RPC layer dispatches onto.

use std::sync::Mutex;

use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, warn};

use trafgen::stream::{StreamConfig, StreamPatch};

use crate::driver::CaptureDriver;
use crate::error::{Error, Result};
use crate::port::{Port, PortConfig};
use crate::stats::StatsSnapshot;

/// The server-side engine: the port inventory plus the generator state.
///
/// Batch operations bounds-check every port id against the inventory and
/// skip invalid entries; single-port operations fail with a descriptive
/// string. Each operation is atomic with respect to the port it touches.
pub struct GenService {
    ports: Vec<Mutex<Port>>,
    rng: Mutex<StdRng>,
}

impl GenService {
    /// Build the port inventory from the driver's enumeration and start
    /// the monitor workers. An enumeration failure is fatal; an empty one
    /// leaves a portless but otherwise functional service.
    pub fn new(driver: &dyn CaptureDriver) -> Result<GenService> {
        Self::build(driver, StdRng::from_entropy())
    }

    /// Like [`GenService::new`] with a seeded generator, making the random
    /// variation modes reproducible run to run.
    pub fn with_seed(driver: &dyn CaptureDriver, seed: u64) -> Result<GenService> {
        Self::build(driver, StdRng::seed_from_u64(seed))
    }

    fn build(driver: &dyn CaptureDriver, rng: StdRng) -> Result<GenService> {
        debug!("retrieving the device list from the local machine");
        let devices = driver.devices()?;
        if devices.is_empty() {
            warn!("no capture interfaces found");
        }

        let mut ports = Vec::with_capacity(devices.len());
        for (i, dev) in devices.iter().enumerate() {
            debug!(
                "{i}. {} ({})",
                dev.name,
                dev.description.as_deref().unwrap_or("")
            );
            ports.push(Mutex::new(Port::new(i as u32, dev, driver)));
        }

        Ok(GenService {
            ports,
            rng: Mutex::new(rng),
        })
    }

    /// All port ids, in inventory order.
    pub fn list_ports(&self) -> Vec<u32> {
        debug!("in list_ports");
        (0..self.ports.len() as u32).collect()
    }

    /// Port configurations for every valid id; invalid ids are skipped.
    pub fn port_config(&self, port_ids: &[u32]) -> Vec<PortConfig> {
        debug!("in port_config");
        port_ids
            .iter()
            .filter_map(|&id| self.ports.get(id as usize))
            .map(|port| port.lock().unwrap().config().clone())
            .collect()
    }

    /// Stream ids on `port_id`, in store order.
    pub fn list_streams(&self, port_id: u32) -> Result<Vec<u32>> {
        debug!("in list_streams");
        Ok(self.port(port_id)?.lock().unwrap().stream_ids())
    }

    /// Stream configurations for every existing id; missing ids are
    /// skipped.
    pub fn stream_config(
        &self,
        port_id: u32,
        stream_ids: &[u32],
    ) -> Result<Vec<(u32, StreamConfig)>> {
        debug!("in stream_config");
        let port = self.port(port_id)?.lock().unwrap();
        Ok(stream_ids
            .iter()
            .filter_map(|&id| port.stream_config(id).map(|config| (id, config)))
            .collect())
    }

    /// Append default streams under the given ids; contents are expected
    /// through later modifications. Existing ids are skipped.
    pub fn add_stream(&self, port_id: u32, stream_ids: &[u32]) -> Result<()> {
        debug!("in add_stream");
        let mut port = self.port(port_id)?.lock().unwrap();
        for &id in stream_ids {
            port.add_stream(id);
        }
        Ok(())
    }

    /// Delete the given streams; missing ids are skipped.
    pub fn delete_stream(&self, port_id: u32, stream_ids: &[u32]) -> Result<()> {
        debug!("in delete_stream");
        let mut port = self.port(port_id)?.lock().unwrap();
        for &id in stream_ids {
            port.delete_stream(id);
        }
        Ok(())
    }

    /// Merge each patch into its stream; missing ids are skipped.
    pub fn modify_stream(&self, port_id: u32, streams: &[(u32, StreamPatch)]) -> Result<()> {
        debug!("in modify_stream");
        let mut port = self.port(port_id)?.lock().unwrap();
        for (id, patch) in streams {
            port.modify_stream(*id, patch);
        }
        Ok(())
    }

    /// Start transmitting on each valid port, rebuilding stale send
    /// queues first.
    pub fn start_tx(&self, port_ids: &[u32]) {
        debug!("in start_tx");
        for &id in port_ids {
            let Some(port) = self.ports.get(id as usize) else {
                continue;
            };
            let mut port = port.lock().unwrap();
            if port.is_dirty() {
                let mut rng = self.rng.lock().unwrap();
                port.update(&mut rng);
            }
        }

        for &id in port_ids {
            let Some(port) = self.ports.get(id as usize) else {
                continue;
            };
            port.lock().unwrap().start_transmit();
        }
    }

    /// Stop transmitting on each valid port.
    pub fn stop_tx(&self, port_ids: &[u32]) {
        debug!("in stop_tx");
        for &id in port_ids {
            if let Some(port) = self.ports.get(id as usize) {
                port.lock().unwrap().stop_transmit();
            }
        }
    }

    /// Statistics snapshots, relative to the last clear, for every valid
    /// port id.
    pub fn stats(&self, port_ids: &[u32]) -> Vec<(u32, StatsSnapshot)> {
        port_ids
            .iter()
            .filter_map(|&id| self.ports.get(id as usize).map(|port| (id, port)))
            .map(|(id, port)| (id, port.lock().unwrap().stats()))
            .collect()
    }

    /// Snapshot the current totals as the new baseline on every valid
    /// port.
    pub fn clear_stats(&self, port_ids: &[u32]) {
        debug!("in clear_stats");
        for &id in port_ids {
            if let Some(port) = self.ports.get(id as usize) {
                port.lock().unwrap().clear_stats();
            }
        }
    }

    /// Capture-buffer recording is not implemented.
    pub fn start_capture(&self, _port_ids: &[u32]) -> Result<()> {
        debug!("in start_capture");
        Error::not_implemented("startCapture").to_err()
    }

    /// Capture-buffer recording is not implemented.
    pub fn stop_capture(&self, _port_ids: &[u32]) -> Result<()> {
        debug!("in stop_capture");
        Error::not_implemented("stopCapture").to_err()
    }

    /// Capture-buffer retrieval is not implemented.
    pub fn capture_buffer(&self, _port_ids: &[u32]) -> Result<Vec<Vec<u8>>> {
        debug!("in capture_buffer");
        Error::not_implemented("getCaptureBuffer").to_err()
    }

    fn port(&self, id: u32) -> Result<&Mutex<Port>> {
        self.ports
            .get(id as usize)
            .ok_or_else(|| Error::service_err("invalid port id"))
    }
}
