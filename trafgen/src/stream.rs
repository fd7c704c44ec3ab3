//! Layered stream descriptors consumed by the frame synthesizer.
//!
//! A stream is described layer by layer, and every layer is a tagged
//! variant whose arm carries exactly the fields that layer needs: frame
//! length selection, MAC addressing, optional VLAN tags, the frame-type
//! encapsulation, L3, L4 and the payload fill pattern. [`StreamPatch`]
//! is the section-wise merge type used by configuration updates.

use crate::ether::EtherAddr;
use crate::ipv4::{IpProtocol, VER_HDRLEN_NO_OPTIONS};

/// Frame length selection, before the 4-byte FCS adjustment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameLen {
    /// Every packet uses the same length.
    Fixed(u16),
    /// Length sweeps upward through `[min, max]`, one step per packet.
    Inc {
        /// Smallest frame length of the sweep.
        min: u16,
        /// Largest frame length of the sweep.
        max: u16,
    },
    /// Length sweeps downward through `[min, max]`.
    Dec {
        /// Smallest frame length of the sweep.
        min: u16,
        /// Largest frame length of the sweep.
        max: u16,
    },
    /// Length drawn from `[min, max]` per packet.
    Random {
        /// Smallest frame length drawn.
        min: u16,
        /// Largest frame length drawn.
        max: u16,
    },
}

/// Per-packet variation of one MAC address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MacMode {
    /// The base address is used unchanged.
    Fixed,
    /// `base + (n % count) * step`.
    Inc {
        /// Number of distinct addresses before wrapping.
        count: u32,
        /// Added per packet.
        step: u32,
    },
    /// `base - (n % count) * step`.
    Dec {
        /// Number of distinct addresses before wrapping.
        count: u32,
        /// Subtracted per packet.
        step: u32,
    },
}

/// One MAC address together with its variation mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MacSpec {
    /// Base address.
    pub base: EtherAddr,
    /// How the address changes from packet to packet.
    pub mode: MacMode,
}

impl MacSpec {
    /// A fixed address spec.
    pub fn fixed(base: EtherAddr) -> Self {
        MacSpec {
            base,
            mode: MacMode::Fixed,
        }
    }
}

/// Destination and source MAC addressing. The MAC header is always emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MacConfig {
    /// Destination address, emitted first.
    pub dst: MacSpec,
    /// Source address.
    pub src: MacSpec,
}

impl Default for MacConfig {
    fn default() -> Self {
        MacConfig {
            dst: MacSpec::fixed(EtherAddr::default()),
            src: MacSpec::fixed(EtherAddr::default()),
        }
    }
}

/// A single 802.1Q/802.1ad tag: optional TPID override plus the 16-bit TCI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VlanTag {
    /// Overrides the position's default TPID (0x88a8 for the S-tag,
    /// 0x8100 for the C-tag) when present.
    pub tpid: Option<u16>,
    /// Tag control information as emitted.
    pub tag: u16,
}

/// Optional service and customer tags, emitted S-tag first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VlanConfig {
    /// Outer 802.1ad service tag.
    pub stag: Option<VlanTag>,
    /// Inner 802.1Q customer tag.
    pub ctag: Option<VlanTag>,
}

/// The three LLC header bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LlcFields {
    /// Destination service access point.
    pub dsap: u8,
    /// Source service access point.
    pub ssap: u8,
    /// Control field.
    pub ctl: u8,
}

/// Frame-type encapsulation following the MAC header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    /// No length or type information at all.
    None,
    /// Ethernet II: a 16-bit ethertype after any VLAN tags.
    Eth2 {
        /// Emitted ethertype.
        ethertype: u16,
    },
    /// Raw 802.3: just the 16-bit length field before any VLAN tags.
    Dot3Raw,
    /// 802.3 with an LLC header.
    Dot3Llc {
        /// LLC bytes following the length field.
        llc: LlcFields,
    },
    /// 802.3 LLC plus a SNAP extension.
    Snap {
        /// LLC bytes following the length field.
        llc: LlcFields,
        /// 24-bit organizationally unique identifier.
        oui: u32,
        /// Ethertype emitted after any VLAN tags.
        ethertype: u16,
    },
}

/// Per-packet variation of one IPv4 address within its subnet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpVary {
    /// The base address is used unchanged.
    Fixed,
    /// Host part increments modulo `count`, the subnet part is preserved.
    IncHost {
        /// Number of distinct hosts before wrapping.
        count: u32,
    },
    /// Host part decrements modulo `count`.
    DecHost {
        /// Number of distinct hosts before wrapping.
        count: u32,
    },
    /// Host part drawn fresh per packet.
    RandomHost,
}

/// One IPv4 address with its mask and variation mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpSpec {
    /// Base address.
    pub base: u32,
    /// Subnet mask; variation only ever touches the host bits.
    pub mask: u32,
    /// How the address changes from packet to packet.
    pub vary: IpVary,
}

impl IpSpec {
    /// A fixed host address.
    pub fn fixed(base: u32) -> Self {
        IpSpec {
            base,
            mask: 0xffff_ffff,
            vary: IpVary::Fixed,
        }
    }
}

/// IPv4 header fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Config {
    /// Version and header-length byte.
    pub ver_hdrlen: u8,
    /// Type of service.
    pub tos: u8,
    /// Identification.
    pub id: u16,
    /// Three flag bits.
    pub flags: u8,
    /// 13-bit fragment offset.
    pub frag_ofs: u16,
    /// Time to live.
    pub ttl: u8,
    /// Next-protocol field as emitted; independent of the L4 layer.
    pub proto: IpProtocol,
    /// Overrides the computed total length when present.
    pub tot_len: Option<u16>,
    /// Overrides the computed header checksum when present.
    pub cksum: Option<u16>,
    /// Source address.
    pub src: IpSpec,
    /// Destination address.
    pub dst: IpSpec,
}

impl Default for Ipv4Config {
    fn default() -> Self {
        Ipv4Config {
            ver_hdrlen: VER_HDRLEN_NO_OPTIONS,
            tos: 0,
            id: 0,
            flags: 0,
            frag_ofs: 0,
            ttl: 127,
            proto: IpProtocol::UDP,
            tot_len: None,
            cksum: None,
            src: IpSpec::fixed(0),
            dst: IpSpec::fixed(0),
        }
    }
}

/// Network-layer selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum L3Config {
    /// No network layer.
    None,
    /// An IPv4 header.
    Ipv4(Ipv4Config),
    /// Reserved; ARP synthesis is not supported and nothing is emitted.
    Arp,
}

/// TCP header fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TcpConfig {
    /// Source port.
    pub src_port: u16,
    /// Destination port.
    pub dst_port: u16,
    /// Sequence number.
    pub seq: u32,
    /// Acknowledgement number.
    pub ack: u32,
    /// Overrides the header-length/reserved byte (default 0x50).
    pub hdrlen_rsvd: Option<u8>,
    /// Flag byte.
    pub flags: u8,
    /// Receive window.
    pub window: u16,
    /// Urgent pointer.
    pub urg_ptr: u16,
    /// Overrides the computed checksum when present.
    pub cksum: Option<u16>,
}

/// UDP header fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UdpConfig {
    /// Source port.
    pub src_port: u16,
    /// Destination port.
    pub dst_port: u16,
    /// Overrides the computed datagram length when present.
    pub tot_len: Option<u16>,
    /// Overrides the computed checksum when present.
    pub cksum: Option<u16>,
}

/// Transport-layer selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum L4Config {
    /// No transport layer.
    None,
    /// A TCP header.
    Tcp(TcpConfig),
    /// A UDP header.
    Udp(UdpConfig),
    /// Reserved; ICMP synthesis is not supported and nothing is emitted.
    Icmp,
    /// Reserved; IGMP synthesis is not supported and nothing is emitted.
    Igmp,
}

/// Fill pattern for the bytes between the last header and the frame end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Payload {
    /// A 32-bit big-endian word repeated (and clamped) across the payload.
    FixedWord(u32),
    /// `i % 256` at payload offset `i`.
    IncByte,
    /// `255 - i % 256` at payload offset `i`.
    DecByte,
    /// Every byte drawn from the generator.
    Random,
}

/// Transmission plan of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    /// A grid of bursts.
    Bursts {
        /// Number of bursts.
        num_bursts: u32,
        /// Packets per burst.
        packets_per_burst: u32,
    },
    /// A flat packet count (a single burst).
    Packets {
        /// Number of packets.
        num_packets: u32,
    },
}

impl Control {
    /// The `(bursts, packets_per_burst)` grid this plan expands into.
    pub fn grid(&self) -> (u32, u32) {
        match *self {
            Control::Bursts {
                num_bursts,
                packets_per_burst,
            } => (num_bursts, packets_per_burst),
            Control::Packets { num_packets } => (1, num_packets),
        }
    }
}

/// The full per-stream descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamConfig {
    /// Disabled streams are skipped when the send queue is built.
    pub enabled: bool,
    /// Sort key controlling transmission order within a port.
    pub ordinal: u32,
    /// Frame length selection.
    pub frame_len: FrameLen,
    /// Encapsulation after the MAC header.
    pub frame_type: FrameType,
    /// Optional VLAN tags.
    pub vlan: VlanConfig,
    /// Network layer.
    pub l3: L3Config,
    /// Transport layer.
    pub l4: L4Config,
    /// Payload fill pattern.
    pub payload: Payload,
    /// Transmission plan.
    pub control: Control,
    /// MAC addressing.
    pub mac: MacConfig,
}

impl Default for StreamConfig {
    /// The skeleton appended by an add operation: disabled, one fixed
    /// 64-byte frame of zeroes with no encapsulation.
    fn default() -> Self {
        StreamConfig {
            enabled: false,
            ordinal: 0,
            frame_len: FrameLen::Fixed(64),
            frame_type: FrameType::None,
            vlan: VlanConfig::default(),
            l3: L3Config::None,
            l4: L4Config::None,
            payload: Payload::FixedWord(0),
            control: Control::Packets { num_packets: 1 },
            mac: MacConfig::default(),
        }
    }
}

/// A partial stream descriptor merged into an existing [`StreamConfig`].
///
/// Each section is independently optional; sections that are absent leave
/// the existing configuration untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct StreamPatch {
    /// New enabled flag.
    pub enabled: Option<bool>,
    /// New ordinal.
    pub ordinal: Option<u32>,
    /// New frame length selection.
    pub frame_len: Option<FrameLen>,
    /// New frame-type encapsulation.
    pub frame_type: Option<FrameType>,
    /// New VLAN tags.
    pub vlan: Option<VlanConfig>,
    /// New network layer.
    pub l3: Option<L3Config>,
    /// New transport layer.
    pub l4: Option<L4Config>,
    /// New payload pattern.
    pub payload: Option<Payload>,
    /// New transmission plan.
    pub control: Option<Control>,
    /// New MAC addressing.
    pub mac: Option<MacConfig>,
}

impl StreamPatch {
    /// Merge the populated sections into `config`, leaving the rest as-is.
    pub fn apply(&self, config: &mut StreamConfig) {
        if let Some(v) = self.enabled {
            config.enabled = v;
        }
        if let Some(v) = self.ordinal {
            config.ordinal = v;
        }
        if let Some(v) = self.frame_len {
            config.frame_len = v;
        }
        if let Some(v) = self.frame_type {
            config.frame_type = v;
        }
        if let Some(v) = self.vlan {
            config.vlan = v;
        }
        if let Some(v) = self.l3 {
            config.l3 = v;
        }
        if let Some(v) = self.l4 {
            config.l4 = v;
        }
        if let Some(v) = self.payload {
            config.payload = v;
        }
        if let Some(v) = self.control {
            config.control = v;
        }
        if let Some(v) = self.mac {
            config.mac = v;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patch_merges_only_present_sections() {
        let mut config = StreamConfig::default();

        let patch = StreamPatch {
            enabled: Some(true),
            frame_len: Some(FrameLen::Fixed(128)),
            l4: Some(L4Config::Udp(UdpConfig {
                src_port: 7,
                dst_port: 9,
                ..Default::default()
            })),
            ..Default::default()
        };
        patch.apply(&mut config);

        assert!(config.enabled);
        assert_eq!(config.frame_len, FrameLen::Fixed(128));
        assert!(matches!(config.l4, L4Config::Udp(u) if u.src_port == 7));
        // Untouched sections keep their defaults.
        assert_eq!(config.ordinal, 0);
        assert_eq!(config.frame_type, FrameType::None);
        assert_eq!(config.control, Control::Packets { num_packets: 1 });

        // A later patch replaces only what it names.
        let patch = StreamPatch {
            ordinal: Some(3),
            ..Default::default()
        };
        patch.apply(&mut config);
        assert_eq!(config.ordinal, 3);
        assert_eq!(config.frame_len, FrameLen::Fixed(128));
    }

    #[test]
    fn control_grid_expansion() {
        let bursts = Control::Bursts {
            num_bursts: 3,
            packets_per_burst: 5,
        };
        assert_eq!(bursts.grid(), (3, 5));
        assert_eq!(Control::Packets { num_packets: 20 }.grid(), (1, 20));
    }
}
