//! End-to-end exercises of the service façade over the in-memory driver.

use std::thread;
use std::time::Duration;

use trafgen::ether::{EtherAddr, EtherType};
use trafgen::ipv4::IpProtocol;
use trafgen::stream::{
    Control, FrameLen, FrameType, IpSpec, Ipv4Config, L3Config, L4Config, MacConfig, MacSpec,
    Payload, StreamPatch, UdpConfig,
};
use trafgen_capture::error::ErrorKind;
use trafgen_capture::testing::TestDriver;
use trafgen_capture::{Direction, GenService, HandleMode, NicCounter, PKT_DESC_SIZE};

fn udp_patch(ordinal: u32, control: Control) -> StreamPatch {
    StreamPatch {
        enabled: Some(true),
        ordinal: Some(ordinal),
        frame_len: Some(FrameLen::Fixed(64)),
        frame_type: Some(FrameType::Eth2 {
            ethertype: EtherType::IPV4.raw(),
        }),
        l3: Some(L3Config::Ipv4(Ipv4Config {
            ttl: 64,
            proto: IpProtocol::UDP,
            src: IpSpec::fixed(0x0a00_0001),
            dst: IpSpec::fixed(0x0a00_0002),
            ..Default::default()
        })),
        l4: Some(L4Config::Udp(UdpConfig {
            src_port: 1000,
            dst_port: 2000,
            ..Default::default()
        })),
        payload: Some(Payload::FixedWord(0xdead_beef)),
        mac: Some(MacConfig {
            dst: MacSpec::fixed(EtherAddr::parse_from("00:11:22:33:44:55").unwrap()),
            src: MacSpec::fixed(EtherAddr::parse_from("66:77:88:99:aa:bb").unwrap()),
        }),
        control: Some(control),
        ..Default::default()
    }
}

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
fn inventory_and_bounds_checks() {
    let driver = TestDriver::new(2, HandleMode::Stats);
    let service = GenService::with_seed(&driver, 1).unwrap();

    assert_eq!(service.list_ports(), vec![0, 1]);

    // Invalid ids are skipped, not failed.
    let configs = service.port_config(&[0, 7, 1]);
    assert_eq!(configs.len(), 2);
    assert_eq!(configs[0].id, 0);
    assert_eq!(configs[0].name, "test0EN10MB");
    assert!(configs[0].is_oper_up);

    let err = service.list_streams(7).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ServiceError);
    assert!(service.add_stream(7, &[1]).is_err());
    assert!(service.stats(&[7]).is_empty());
}

#[test]
fn stream_store_round_trip() {
    let driver = TestDriver::new(1, HandleMode::Stats);
    let service = GenService::with_seed(&driver, 1).unwrap();

    service.add_stream(0, &[3, 1, 2]).unwrap();
    assert_eq!(service.list_streams(0).unwrap(), vec![3, 1, 2]);

    // Freshly added streams carry the default skeleton.
    let configs = service.stream_config(0, &[1]).unwrap();
    assert_eq!(configs.len(), 1);
    assert!(!configs[0].1.enabled);
    assert_eq!(configs[0].1.frame_len, FrameLen::Fixed(64));

    // Merge a patch, read back the merged view.
    service
        .modify_stream(0, &[(1, udp_patch(0, Control::Packets { num_packets: 4 }))])
        .unwrap();
    let config = service.stream_config(0, &[1]).unwrap()[0].1;
    assert!(config.enabled);
    assert!(matches!(config.l4, L4Config::Udp(u) if u.dst_port == 2000));
    // Sections the patch never named keep their defaults.
    assert_eq!(config.vlan, Default::default());

    // Missing ids are skipped in reads and deletes.
    assert!(service.stream_config(0, &[9]).unwrap().is_empty());
    service.delete_stream(0, &[9, 3]).unwrap();
    assert_eq!(service.list_streams(0).unwrap(), vec![1, 2]);
}

#[test]
fn start_tx_expands_bursts_and_feeds_tx_stats() {
    let driver = TestDriver::new(1, HandleMode::Stats);
    let service = GenService::with_seed(&driver, 1).unwrap();

    service.add_stream(0, &[1]).unwrap();
    service
        .modify_stream(
            0,
            &[(
                1,
                udp_patch(
                    0,
                    Control::Bursts {
                        num_bursts: 3,
                        packets_per_burst: 5,
                    },
                ),
            )],
        )
        .unwrap();

    service.start_tx(&[0, 55]);

    let rx = driver.handle(0, Direction::In).unwrap();
    assert_eq!(rx.transmitted().len(), 15);
    assert!(rx.transmitted().iter().all(|(_, frame)| frame.len() == 60));

    // The tx monitor reconciles totals from the shadow counters at the
    // next statistics callback.
    let tx = driver.handle(0, Direction::Out).unwrap();
    tx.set_nic_counter(NicCounter::TxOk, 15);
    tx.push_stats(0, 0, 1_000_000);
    wait_until("tx totals", || {
        let snap = service.stats(&[0])[0].1;
        snap.tx_pkts == 15 && snap.tx_bytes == 15 * 60 && snap.tx_pkts_nic == 15
    });
}

#[test]
fn start_tx_rebuilds_only_when_dirty() {
    let driver = TestDriver::new(1, HandleMode::Stats);
    let service = GenService::with_seed(&driver, 1).unwrap();

    service.add_stream(0, &[1]).unwrap();
    service
        .modify_stream(0, &[(1, udp_patch(0, Control::Packets { num_packets: 2 }))])
        .unwrap();

    service.start_tx(&[0]);
    let rx = driver.handle(0, Direction::In).unwrap();
    assert_eq!(rx.transmitted().len(), 2);

    // No mutation in between: the queue is reused as-is.
    service.start_tx(&[0]);
    assert_eq!(rx.transmitted().len(), 4);

    // A mutation marks the port dirty and the next start rebuilds.
    service
        .modify_stream(0, &[(1, udp_patch(0, Control::Packets { num_packets: 3 }))])
        .unwrap();
    service.start_tx(&[0]);
    assert_eq!(rx.transmitted().len(), 7);
}

#[test]
fn partial_transmission_is_accounted_not_retried() {
    let driver = TestDriver::new(1, HandleMode::Stats);
    let service = GenService::with_seed(&driver, 1).unwrap();

    service.add_stream(0, &[1]).unwrap();
    service
        .modify_stream(0, &[(1, udp_patch(0, Control::Packets { num_packets: 10 }))])
        .unwrap();

    // 10 x (60 + descriptor) queued; the driver stops after 500 bytes,
    // inside packet seven.
    let rx = driver.handle(0, Direction::In).unwrap();
    rx.set_tx_byte_limit(500);
    service.start_tx(&[0]);
    assert_eq!(rx.transmitted().len(), 6);

    let tx = driver.handle(0, Direction::Out).unwrap();
    tx.push_stats(0, 0, 1_000_000);
    wait_until("partial tx totals", || {
        let snap = service.stats(&[0])[0].1;
        snap.tx_pkts == 6 && snap.tx_bytes == 500 - 6 * PKT_DESC_SIZE as u64
    });
}

#[test]
fn rx_stats_flow_through_the_monitor() {
    let driver = TestDriver::new(1, HandleMode::Stats);
    let service = GenService::with_seed(&driver, 1).unwrap();

    let rx = driver.handle(0, Direction::In).unwrap();
    rx.set_nic_counter(NicCounter::RxOk, 42);

    // Two summaries half a second apart; the driver over-reports one
    // record header per packet.
    rx.push_stats(5, 5 * (100 + PKT_DESC_SIZE as u64), 1_000_000);
    rx.push_stats(100, 100 * (64 + PKT_DESC_SIZE as u64), 1_500_000);

    wait_until("rx totals", || {
        let snap = service.stats(&[0])[0].1;
        snap.rx_pkts == 105
            && snap.rx_bytes == 500 + 6400
            && snap.rx_pkts_nic == 42
            && snap.rx_pps == 200
            && snap.rx_bps == 12_800
    });
}

#[test]
fn clear_stats_zeroes_the_reported_counters() {
    let driver = TestDriver::new(1, HandleMode::Stats);
    let service = GenService::with_seed(&driver, 1).unwrap();

    let rx = driver.handle(0, Direction::In).unwrap();
    rx.push_stats(10, 10 * (60 + PKT_DESC_SIZE as u64), 1_000_000);
    wait_until("rx totals", || {
        let snap = service.stats(&[0])[0].1;
        snap.rx_pkts == 10 && snap.rx_bytes == 600
    });

    service.clear_stats(&[0]);
    let snap = service.stats(&[0])[0].1;
    assert_eq!(snap.rx_pkts, 0);
    assert_eq!(snap.rx_bytes, 0);
    assert_eq!(snap.tx_pkts, 0);
    assert_eq!(snap.tx_bytes, 0);

    // Later traffic is reported relative to the new baseline.
    rx.push_stats(3, 3 * (60 + PKT_DESC_SIZE as u64), 2_000_000);
    wait_until("post-clear totals", || service.stats(&[0])[0].1.rx_pkts == 3);
}

#[test]
fn capture_mode_tx_monitor_sees_looped_back_frames() {
    let driver = TestDriver::new(1, HandleMode::Capture);
    let service = GenService::with_seed(&driver, 1).unwrap();

    service.add_stream(0, &[1]).unwrap();
    service
        .modify_stream(
            0,
            &[(
                1,
                udp_patch(
                    0,
                    Control::Bursts {
                        num_bursts: 2,
                        packets_per_burst: 3,
                    },
                ),
            )],
        )
        .unwrap();
    service.start_tx(&[0]);

    // The per-packet tx capture loop counts the six frames directly.
    wait_until("capture-mode tx totals", || {
        let snap = service.stats(&[0])[0].1;
        snap.tx_pkts == 6 && snap.tx_bytes == 6 * 60
    });
}

#[test]
fn down_ports_stay_listed_but_inert() {
    let driver = TestDriver::new(2, HandleMode::Stats);
    driver.fail_device("test1");
    let service = GenService::with_seed(&driver, 1).unwrap();

    assert_eq!(service.list_ports(), vec![0, 1]);
    let configs = service.port_config(&[1]);
    assert!(!configs[0].is_oper_up);

    service.add_stream(1, &[1]).unwrap();
    service
        .modify_stream(1, &[(1, udp_patch(0, Control::Packets { num_packets: 2 }))])
        .unwrap();
    // Transmit on a down port is a no-op, not a fault.
    service.start_tx(&[1]);
    assert_eq!(service.stats(&[1])[0].1.tx_pkts, 0);
}

#[test]
fn capture_operations_report_not_implemented() {
    let driver = TestDriver::new(1, HandleMode::Stats);
    let service = GenService::with_seed(&driver, 1).unwrap();

    for err in [
        service.start_capture(&[0]).unwrap_err(),
        service.stop_capture(&[0]).unwrap_err(),
        service.capture_buffer(&[0]).unwrap_err(),
    ] {
        assert_eq!(err.kind(), ErrorKind::NotImplemented);
    }
}
