//! IPv4 wire values used by the header emitter and the pseudo header.

enum_sim! {
    /// An enum-like type for representing the protocol field of the Ipv4 header.
    pub struct IpProtocol (u8) {
        /// Internet control message protocol.
        ICMP = 1,
        /// Internet group management protocol.
        IGMP = 2,
        /// Transmission control protocol.
        TCP = 6,
        /// User datagram protocol.
        UDP = 17
    }
}

/// The version/header-length byte of an option-less IPv4 header.
pub const VER_HDRLEN_NO_OPTIONS: u8 = 0x45;
