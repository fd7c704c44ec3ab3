//! The frame synthesizer: compiles a [`StreamConfig`] into wire bytes.
//!
//! [`synthesize`] is a deterministic function of the stream descriptor and
//! the packet index for every non-random variation mode; random modes draw
//! exclusively from the injected generator, so a seeded generator makes a
//! whole transmission plan reproducible.

use byteorder::{ByteOrder, NetworkEndian};
use rand_core::RngCore;

use crate::checksum;
use crate::ether::EtherType;
use crate::ipv4::IpProtocol;
use crate::stream::{
    FrameLen, FrameType, IpSpec, IpVary, L3Config, L4Config, MacMode, MacSpec, Payload,
    StreamConfig,
};

/// The frame check sequence the NIC appends; never part of the emitted bytes.
pub const FCS_LEN: usize = 4;

/// Default TCP header-length/reserved byte: five 32-bit words, no options.
const TCP_HDRLEN_DEFAULT: u8 = 0x50;

/// Total number of frames in a stream's transmission plan.
pub fn plan_size(config: &StreamConfig) -> u64 {
    let (bursts, packets) = config.control.grid();
    u64::from(bursts) * u64::from(packets)
}

/// Synthesize the frame with packet index `n` of `config`'s transmission
/// plan into `buf`.
///
/// Returns the number of bytes written, which is the configured frame
/// length minus [`FCS_LEN`]. Returns `None` when that length underflows or
/// exceeds `buf`.
pub fn synthesize<R: RngCore>(
    config: &StreamConfig,
    n: u32,
    buf: &mut [u8],
    rng: &mut R,
) -> Option<usize> {
    // The frame length selection covers the FCS, which the hardware
    // appends on its own.
    let pkt_len = frame_len(&config.frame_len, n, rng).checked_sub(FCS_LEN)?;
    if pkt_len > buf.len() {
        return None;
    }

    let mut em = Emitter { buf, len: 0 };

    // MAC header, always present, destination first.
    em.put_u48(mac_value(&config.mac.dst, n))?;
    em.put_u48(mac_value(&config.mac.src, n))?;

    // Frame type, pre-VLAN part: the 802.3 length field and LLC/SNAP bytes.
    match config.frame_type {
        FrameType::None | FrameType::Eth2 { .. } => {}
        FrameType::Dot3Raw => {
            em.put_u16(pkt_len as u16)?;
        }
        FrameType::Dot3Llc { llc } => {
            em.put_u16(pkt_len as u16)?;
            em.put_u8(llc.dsap)?;
            em.put_u8(llc.ssap)?;
            em.put_u8(llc.ctl)?;
        }
        FrameType::Snap { llc, oui, .. } => {
            em.put_u16(pkt_len as u16)?;
            em.put_u8(llc.dsap)?;
            em.put_u8(llc.ssap)?;
            em.put_u8(llc.ctl)?;
            em.put_u24(oui)?;
        }
    }

    if let Some(tag) = config.vlan.stag {
        em.put_u16(tag.tpid.unwrap_or(EtherType::QINQ.raw()))?;
        em.put_u16(tag.tag)?;
    }
    if let Some(tag) = config.vlan.ctag {
        em.put_u16(tag.tpid.unwrap_or(EtherType::VLAN.raw()))?;
        em.put_u16(tag.tag)?;
    }

    // Frame type, post-VLAN part: the ethertype.
    match config.frame_type {
        FrameType::Eth2 { ethertype } | FrameType::Snap { ethertype, .. } => {
            em.put_u16(ethertype)?;
        }
        FrameType::None | FrameType::Dot3Raw | FrameType::Dot3Llc { .. } => {}
    }

    // Source and destination are carried over to the L4 pseudo header.
    let mut ip_addrs = None;
    match &config.l3 {
        L3Config::None | L3Config::Arp => {}
        L3Config::Ipv4(ip) => {
            let ip_ofs = em.len;

            em.put_u8(ip.ver_hdrlen)?;
            em.put_u8(ip.tos)?;
            let tot_len = ip
                .tot_len
                .unwrap_or(pkt_len.saturating_sub(ip_ofs) as u16);
            em.put_u16(tot_len)?;
            em.put_u16(ip.id)?;
            em.put_u16((u16::from(ip.flags & 0x7) << 13) | (ip.frag_ofs & 0x1fff))?;
            em.put_u8(ip.ttl)?;
            em.put_u8(ip.proto.raw())?;
            // Checksum placeholder, filled in once the addresses are known.
            let cksum_at = em.len;
            em.put_u16(0)?;

            let src = ip_value(&ip.src, n, rng);
            let dst = ip_value(&ip.dst, n, rng);
            em.put_u32(src)?;
            em.put_u32(dst)?;

            let cksum = match ip.cksum {
                Some(value) => value,
                None => checksum::finalize(&em.buf[ip_ofs..em.len], 0),
            };
            em.patch_u16(cksum_at, cksum);

            ip_addrs = Some((src, dst));
        }
    }

    // L4 checksums can only be finalized after the payload is written;
    // remember where the placeholder sits and what is summed so far.
    let mut l4_fixup = None;
    match &config.l4 {
        L4Config::None | L4Config::Icmp | L4Config::Igmp => {}
        L4Config::Tcp(tcp) => {
            let tcp_ofs = em.len;
            // Without an IPv4 layer the pseudo header sums zero addresses.
            let (src, dst) = ip_addrs.unwrap_or((0, 0));
            let mut cum = checksum::pseudo_partial(
                src,
                dst,
                IpProtocol::TCP,
                pkt_len.saturating_sub(tcp_ofs) as u16,
            );

            em.put_u16(tcp.src_port)?;
            em.put_u16(tcp.dst_port)?;
            em.put_u32(tcp.seq)?;
            em.put_u32(tcp.ack)?;
            em.put_u8(tcp.hdrlen_rsvd.unwrap_or(TCP_HDRLEN_DEFAULT))?;
            em.put_u8(tcp.flags)?;
            em.put_u16(tcp.window)?;
            let cksum_at = em.len;
            em.put_u16(0)?;
            em.put_u16(tcp.urg_ptr)?;

            cum += checksum::partial(&em.buf[tcp_ofs..em.len]);
            l4_fixup = Some((cksum_at, cum, tcp.cksum));
        }
        L4Config::Udp(udp) => {
            let udp_ofs = em.len;
            let (src, dst) = ip_addrs.unwrap_or((0, 0));
            let mut cum = checksum::pseudo_partial(
                src,
                dst,
                IpProtocol::UDP,
                pkt_len.saturating_sub(udp_ofs) as u16,
            );

            em.put_u16(udp.src_port)?;
            em.put_u16(udp.dst_port)?;
            let tot_len = udp
                .tot_len
                .unwrap_or(pkt_len.saturating_sub(udp_ofs) as u16);
            em.put_u16(tot_len)?;
            let cksum_at = em.len;
            em.put_u16(0)?;

            cum += checksum::partial(&em.buf[udp_ofs..em.len]);
            l4_fixup = Some((cksum_at, cum, udp.cksum));
        }
    }

    let data_ofs = em.len;
    let data_len = pkt_len.saturating_sub(data_ofs);
    match config.payload {
        Payload::FixedWord(word) => {
            let word = word.to_be_bytes();
            for i in 0..data_len {
                em.buf[data_ofs + i] = word[i % 4];
            }
        }
        Payload::IncByte => {
            for i in 0..data_len {
                em.buf[data_ofs + i] = (i % 256) as u8;
            }
        }
        Payload::DecByte => {
            for i in 0..data_len {
                em.buf[data_ofs + i] = 0xff - (i % 256) as u8;
            }
        }
        Payload::Random => {
            for i in 0..data_len {
                em.buf[data_ofs + i] = (rng.next_u32() % 256) as u8;
            }
        }
    }

    if let Some((cksum_at, cum, overridden)) = l4_fixup {
        let cksum = match overridden {
            Some(value) => value,
            None => checksum::finalize(&em.buf[data_ofs..data_ofs + data_len], cum),
        };
        em.patch_u16(cksum_at, cksum);
    }

    Some(pkt_len)
}

fn frame_len<R: RngCore>(mode: &FrameLen, n: u32, rng: &mut R) -> usize {
    match *mode {
        FrameLen::Fixed(len) => len as usize,
        FrameLen::Inc { min, max } => {
            let span = u32::from(max.saturating_sub(min)) + 1;
            (u32::from(min) + n % span) as usize
        }
        FrameLen::Dec { min, max } => {
            let span = u32::from(max.saturating_sub(min)) + 1;
            (u32::from(max) - n % span) as usize
        }
        FrameLen::Random { min, max } => {
            let span = u32::from(max.saturating_sub(min)) + 1;
            (u32::from(min) + rng.next_u32() % span) as usize
        }
    }
}

fn mac_value(spec: &MacSpec, n: u32) -> u64 {
    let base = spec.base.to_u48();
    match spec.mode {
        MacMode::Fixed => base,
        MacMode::Inc { count, step } => {
            base.wrapping_add(u64::from(n % count.max(1)) * u64::from(step))
        }
        MacMode::Dec { count, step } => {
            base.wrapping_sub(u64::from(n % count.max(1)) * u64::from(step))
        }
    }
}

fn ip_value<R: RngCore>(spec: &IpSpec, n: u32, rng: &mut R) -> u32 {
    let subnet = spec.base & spec.mask;
    match spec.vary {
        IpVary::Fixed => spec.base,
        IpVary::IncHost { count } => {
            let host = (spec.base & !spec.mask).wrapping_add(n % count.max(1)) & !spec.mask;
            subnet | host
        }
        IpVary::DecHost { count } => {
            let host = (spec.base & !spec.mask).wrapping_sub(n % count.max(1)) & !spec.mask;
            subnet | host
        }
        IpVary::RandomHost => subnet | (rng.next_u32() & !spec.mask),
    }
}

// Bounds-checked big-endian writer over the scratch buffer. `patch_*`
// rewrites a placeholder that was already emitted.
struct Emitter<'a> {
    buf: &'a mut [u8],
    len: usize,
}

impl<'a> Emitter<'a> {
    fn put_u8(&mut self, value: u8) -> Option<()> {
        if self.len + 1 > self.buf.len() {
            return None;
        }
        self.buf[self.len] = value;
        self.len += 1;
        Some(())
    }

    fn put_u16(&mut self, value: u16) -> Option<()> {
        if self.len + 2 > self.buf.len() {
            return None;
        }
        NetworkEndian::write_u16(&mut self.buf[self.len..self.len + 2], value);
        self.len += 2;
        Some(())
    }

    fn put_u24(&mut self, value: u32) -> Option<()> {
        if self.len + 3 > self.buf.len() {
            return None;
        }
        NetworkEndian::write_u24(&mut self.buf[self.len..self.len + 3], value & 0x00ff_ffff);
        self.len += 3;
        Some(())
    }

    fn put_u32(&mut self, value: u32) -> Option<()> {
        if self.len + 4 > self.buf.len() {
            return None;
        }
        NetworkEndian::write_u32(&mut self.buf[self.len..self.len + 4], value);
        self.len += 4;
        Some(())
    }

    fn put_u48(&mut self, value: u64) -> Option<()> {
        if self.len + 6 > self.buf.len() {
            return None;
        }
        NetworkEndian::write_u48(
            &mut self.buf[self.len..self.len + 6],
            value & 0xffff_ffff_ffff,
        );
        self.len += 6;
        Some(())
    }

    fn patch_u16(&mut self, at: usize, value: u16) {
        NetworkEndian::write_u16(&mut self.buf[at..at + 2], value);
    }
}
