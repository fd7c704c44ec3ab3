//! Configure one UDP stream on an in-memory port, transmit a burst grid
//! and print what the driver saw.

use std::thread;
use std::time::Duration;

use trafgen::ether::{EtherAddr, EtherType};
use trafgen::ipv4::IpProtocol;
use trafgen::stream::{
    Control, FrameLen, FrameType, IpSpec, Ipv4Config, L3Config, L4Config, MacConfig, MacSpec,
    Payload, StreamPatch, UdpConfig,
};
use trafgen_capture::testing::TestDriver;
use trafgen_capture::{Direction, GenService, HandleMode};

fn main() {
    tracing_subscriber::fmt::init();

    let driver = TestDriver::new(1, HandleMode::Stats);
    let service = GenService::with_seed(&driver, 0xbeef).unwrap();
    println!("ports: {:?}", service.list_ports());

    service.add_stream(0, &[1]).unwrap();
    service
        .modify_stream(
            0,
            &[(
                1,
                StreamPatch {
                    enabled: Some(true),
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
                    control: Some(Control::Bursts {
                        num_bursts: 3,
                        packets_per_burst: 5,
                    }),
                    ..Default::default()
                },
            )],
        )
        .unwrap();

    service.start_tx(&[0]);

    let rx = driver.handle(0, Direction::In).unwrap();
    let transmitted = rx.transmitted();
    println!("driver took {} frames", transmitted.len());
    for (n, (_, frame)) in transmitted.iter().enumerate().take(2) {
        println!("frame {n} ({} bytes):", frame.len());
        for chunk in frame.chunks(16) {
            let hex: Vec<String> = chunk.iter().map(|b| format!("{b:02x}")).collect();
            println!("  {}", hex.join(" "));
        }
    }

    // Feed the tx monitor one summary so it reconciles the shadow
    // counters, then report.
    let tx = driver.handle(0, Direction::Out).unwrap();
    tx.push_stats(0, 0, 1_000_000);
    thread::sleep(Duration::from_millis(100));

    for (id, stats) in service.stats(&[0]) {
        println!("port {id}: {stats:#?}");
    }
}
