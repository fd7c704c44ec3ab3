//! An in-memory capture driver, scriptable from tests and demos.
//!
//! The driver hands out [`TestHandle`]s whose capture loops block on an
//! event queue fed by the test. Transmissions are recorded verbatim; in
//! capture mode they are looped back into the sibling outbound handle so
//! the tx monitor observes them exactly as it would on a live interface.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, Weak};

use crate::driver::{
    CaptureDriver, CaptureEvent, CaptureHandle, DeviceDesc, Direction, HandleMode, LoopExit,
    NicCounter,
};
use crate::error::{Error, Result};
use crate::sendq::{PktDesc, SendQueue, PKT_DESC_SIZE};

/// A capture driver over synthetic devices.
pub struct TestDriver {
    devices: Vec<DeviceDesc>,
    mode: HandleMode,
    handles: Mutex<Vec<(String, Direction, Arc<TestHandle>)>>,
    failing: Mutex<HashSet<String>>,
}

impl TestDriver {
    /// A driver with `num_devices` synthetic interfaces whose handles all
    /// open in `mode`.
    pub fn new(num_devices: usize, mode: HandleMode) -> Self {
        let devices = (0..num_devices)
            .map(|i| DeviceDesc {
                name: format!("test{i}"),
                description: Some("in-memory test interface".to_string()),
            })
            .collect();

        TestDriver {
            devices,
            mode,
            handles: Mutex::new(Vec::new()),
            failing: Mutex::new(HashSet::new()),
        }
    }

    /// Make every subsequent open of `device` fail.
    pub fn fail_device(&self, device: &str) {
        self.failing.lock().unwrap().insert(device.to_string());
    }

    /// The handle a previous open created for `(device_index, direction)`.
    pub fn handle(&self, device_index: usize, direction: Direction) -> Option<Arc<TestHandle>> {
        let name = &self.devices.get(device_index)?.name;
        self.handles
            .lock()
            .unwrap()
            .iter()
            .find(|(n, d, _)| n == name && *d == direction)
            .map(|(_, _, h)| h.clone())
    }

    /// Typed variant of [`CaptureDriver::open`] for direct use in tests.
    pub fn open_test(&self, device: &str, direction: Direction) -> Result<Arc<TestHandle>> {
        if self.failing.lock().unwrap().contains(device) {
            return Error::driver_err(format!("cannot open device {device}")).to_err();
        }
        if !self.devices.iter().any(|d| d.name == device) {
            return Error::driver_err(format!("no such device {device}")).to_err();
        }

        let handle = Arc::new(TestHandle {
            mode: self.mode,
            direction,
            state: Mutex::new(HandleState {
                events: VecDeque::new(),
                closed: false,
            }),
            cond: Condvar::new(),
            transmitted: Mutex::new(Vec::new()),
            tx_byte_limit: AtomicU64::new(u64::MAX),
            nic_rx_ok: AtomicU64::new(0),
            nic_tx_ok: AtomicU64::new(0),
            peer: Mutex::new(Weak::new()),
        });

        // Wire the handle to its opposite-direction sibling, if open.
        let mut handles = self.handles.lock().unwrap();
        if let Some((_, _, sibling)) = handles
            .iter()
            .find(|(n, d, _)| n == device && *d != direction)
        {
            *handle.peer.lock().unwrap() = Arc::downgrade(sibling);
            *sibling.peer.lock().unwrap() = Arc::downgrade(&handle);
        }
        handles.push((device.to_string(), direction, handle.clone()));

        Ok(handle)
    }
}

impl CaptureDriver for TestDriver {
    fn devices(&self) -> Result<Vec<DeviceDesc>> {
        Ok(self.devices.clone())
    }

    fn open(&self, device: &str, direction: Direction) -> Result<Arc<dyn CaptureHandle>> {
        Ok(self.open_test(device, direction)?)
    }
}

struct HandleState {
    events: VecDeque<OwnedEvent>,
    closed: bool,
}

enum OwnedEvent {
    Stats {
        pkts: u64,
        bytes: u64,
        ts_usec: u64,
    },
    Packet {
        wire_len: u32,
        ts_usec: u64,
        data: Vec<u8>,
    },
}

/// One scriptable capture handle.
pub struct TestHandle {
    mode: HandleMode,
    direction: Direction,
    state: Mutex<HandleState>,
    cond: Condvar,
    transmitted: Mutex<Vec<(PktDesc, Vec<u8>)>>,
    tx_byte_limit: AtomicU64,
    nic_rx_ok: AtomicU64,
    nic_tx_ok: AtomicU64,
    peer: Mutex<Weak<TestHandle>>,
}

impl TestHandle {
    /// Inject a statistics-mode summary into the capture loop.
    pub fn push_stats(&self, pkts: u64, bytes: u64, ts_usec: u64) {
        self.push(OwnedEvent::Stats {
            pkts,
            bytes,
            ts_usec,
        });
    }

    /// Inject a capture-mode packet into the capture loop.
    pub fn push_packet(&self, data: &[u8], ts_usec: u64) {
        self.push(OwnedEvent::Packet {
            wire_len: data.len() as u32,
            ts_usec,
            data: data.to_vec(),
        });
    }

    /// Everything submitted through this handle so far.
    pub fn transmitted(&self) -> Vec<(PktDesc, Vec<u8>)> {
        self.transmitted.lock().unwrap().clone()
    }

    /// Cap the bytes one transmit call consumes, to provoke partial
    /// transmissions.
    pub fn set_tx_byte_limit(&self, limit: u64) {
        self.tx_byte_limit.store(limit, Ordering::Relaxed);
    }

    /// Set the value the next NIC-counter request reports.
    pub fn set_nic_counter(&self, counter: NicCounter, value: u64) {
        match counter {
            NicCounter::RxOk => self.nic_rx_ok.store(value, Ordering::Relaxed),
            NicCounter::TxOk => self.nic_tx_ok.store(value, Ordering::Relaxed),
        }
    }

    fn push(&self, event: OwnedEvent) {
        self.state.lock().unwrap().events.push_back(event);
        self.cond.notify_all();
    }
}

impl CaptureHandle for TestHandle {
    fn mode(&self) -> HandleMode {
        self.mode
    }

    fn datalink(&self) -> &str {
        "EN10MB"
    }

    fn run_loop(&self, callback: &mut dyn FnMut(CaptureEvent<'_>)) -> LoopExit {
        loop {
            let event = {
                let mut state = self.state.lock().unwrap();
                loop {
                    if state.closed {
                        return LoopExit::Solicited;
                    }
                    if let Some(event) = state.events.pop_front() {
                        break event;
                    }
                    state = self.cond.wait(state).unwrap();
                }
            };

            match &event {
                OwnedEvent::Stats {
                    pkts,
                    bytes,
                    ts_usec,
                } => callback(CaptureEvent::Stats {
                    pkts: *pkts,
                    bytes: *bytes,
                    ts_usec: *ts_usec,
                }),
                OwnedEvent::Packet {
                    wire_len,
                    ts_usec,
                    data,
                } => callback(CaptureEvent::Packet {
                    wire_len: *wire_len,
                    ts_usec: *ts_usec,
                    data,
                }),
            }
        }
    }

    fn break_loop(&self) {
        self.state.lock().unwrap().closed = true;
        self.cond.notify_all();
    }

    fn transmit(&self, queue: &SendQueue) -> Result<u64> {
        // The engine submits on the inbound handle; see Port::start_transmit.
        if self.direction != Direction::In {
            return Error::driver_err("transmit on an outbound handle").to_err();
        }

        let limit = self.tx_byte_limit.load(Ordering::Relaxed);
        let mut consumed = 0u64;
        let mut sent: Vec<(PktDesc, Vec<u8>)> = Vec::new();
        for (desc, frame) in queue.iter() {
            let advance = (PKT_DESC_SIZE + frame.len()) as u64;
            if consumed + advance > limit {
                // The driver ran dry inside this packet.
                consumed = limit;
                break;
            }
            consumed += advance;
            sent.push((desc, frame.to_vec()));
        }

        // Outbound traffic is visible to the sibling handle's per-packet
        // capture loop, never to a statistics-mode one.
        if let Some(peer) = self.peer.lock().unwrap().upgrade() {
            if peer.mode == HandleMode::Capture {
                for (desc, frame) in &sent {
                    peer.push_packet(frame, desc.ts_usec);
                }
            }
        }
        self.transmitted.lock().unwrap().extend(sent);

        Ok(consumed)
    }

    fn nic_counter(&self, counter: NicCounter) -> Result<u64> {
        if self.mode != HandleMode::Stats {
            return Error::driver_err("nic counters not available").to_err();
        }
        Ok(match counter {
            NicCounter::RxOk => self.nic_rx_ok.load(Ordering::Relaxed),
            NicCounter::TxOk => self.nic_tx_ok.load(Ordering::Relaxed),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue_of(frames: usize, len: usize) -> SendQueue {
        let mut queue = SendQueue::with_capacity(crate::sendq::SEND_QUEUE_CAP);
        for _ in 0..frames {
            let desc = PktDesc {
                ts_usec: 0,
                len: len as u32,
            };
            queue.enqueue(desc, &vec![0u8; len]).unwrap();
        }
        queue
    }

    #[test]
    fn transmit_records_and_reports_all_bytes() {
        let driver = TestDriver::new(1, HandleMode::Stats);
        let handle = driver.open_test("test0", Direction::In).unwrap();

        let queue = queue_of(3, 60);
        let bytes = handle.transmit(&queue).unwrap();
        assert_eq!(bytes, queue.byte_len() as u64);
        assert_eq!(handle.transmitted().len(), 3);
    }

    #[test]
    fn byte_limit_provokes_a_partial_transmit() {
        let driver = TestDriver::new(1, HandleMode::Stats);
        let handle = driver.open_test("test0", Direction::In).unwrap();

        // 76 bytes per queued packet; the cap lands inside packet three.
        handle.set_tx_byte_limit(200);
        let queue = queue_of(5, 60);
        let bytes = handle.transmit(&queue).unwrap();
        assert_eq!(bytes, 200);
        assert_eq!(handle.transmitted().len(), 2);
        assert_eq!(queue.pkts_within(bytes), 2);
    }

    #[test]
    fn transmit_is_rejected_on_the_outbound_handle() {
        let driver = TestDriver::new(1, HandleMode::Stats);
        let handle = driver.open_test("test0", Direction::Out).unwrap();
        assert!(handle.transmit(&queue_of(1, 60)).is_err());
    }

    #[test]
    fn capture_mode_loops_transmissions_back_to_the_sibling() {
        let driver = TestDriver::new(1, HandleMode::Capture);
        let rx = driver.open_test("test0", Direction::In).unwrap();
        let tx = driver.open_test("test0", Direction::Out).unwrap();

        rx.transmit(&queue_of(4, 60)).unwrap();

        // The outbound handle's queue now carries the four frames.
        let state = tx.state.lock().unwrap();
        assert_eq!(state.events.len(), 4);
    }

    #[test]
    fn failed_devices_refuse_to_open() {
        let driver = TestDriver::new(2, HandleMode::Stats);
        driver.fail_device("test1");
        assert!(driver.open_test("test0", Direction::In).is_ok());
        assert!(driver.open_test("test1", Direction::In).is_err());
    }
}
