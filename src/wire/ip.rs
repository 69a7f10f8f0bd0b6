use core::fmt;

use crate::wire::{Error, Result};
use super::{Ipv4Address, Ipv6Address};

/// Internet protocol version.
#[derive(Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Clone, Copy)]
pub enum Version {
    Ipv4,
    Ipv6,
}

impl Version {
    /// Return the version of an IP packet stored in the provided buffer.
    ///
    /// Unknown versions result in `Err(Error::Unrecognized)`.
    pub fn of_packet(data: &[u8]) -> Result<Version> {
        match data.first().ok_or(Error::Truncated)? >> 4 {
            4 => Ok(Version::Ipv4),
            6 => Ok(Version::Ipv6),
            _ => Err(Error::Unrecognized)
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Version::Ipv4 => write!(f, "IPv4"),
            Version::Ipv6 => write!(f, "IPv6"),
        }
    }
}

enum_with_unknown! {
    #[derive(Hash)]
    /// IP datagram encapsulated protocol.
    pub enum Protocol(u8) {
        HopByHop  = 0x00,
        Icmp      = 0x01,
        Igmp      = 0x02,
        Tcp       = 0x06,
        Udp       = 0x11,
        Ipv6Route = 0x2b,
        Ipv6Frag  = 0x2c,
        Icmpv6    = 0x3a,
        Ipv6NoNxt = 0x3b,
        Ipv6Opts  = 0x3c,
        UdpLite   = 0x88
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Protocol::HopByHop    => write!(f, "Hop-by-Hop"),
            Protocol::Icmp        => write!(f, "ICMP"),
            Protocol::Igmp        => write!(f, "IGMP"),
            Protocol::Tcp         => write!(f, "TCP"),
            Protocol::Udp         => write!(f, "UDP"),
            Protocol::Ipv6Route   => write!(f, "IPv6-Route"),
            Protocol::Ipv6Frag    => write!(f, "IPv6-Frag"),
            Protocol::Icmpv6      => write!(f, "ICMPv6"),
            Protocol::Ipv6NoNxt   => write!(f, "IPv6-NoNxt"),
            Protocol::Ipv6Opts    => write!(f, "IPv6-Opts"),
            Protocol::UdpLite     => write!(f, "UDP-Lite"),
            Protocol::Unknown(id) => write!(f, "0x{:02x}", id)
        }
    }
}

/// An internetworking address.
///
/// The `Any` variant is the dual-stack wildcard: storage that matches both
/// IPv4 and IPv6 peers. It is distinct from the all-zero address of either
/// family, which is a single-family wildcard.
#[derive(Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Clone, Copy)]
pub enum Address {
    /// The dual-stack wildcard, matching destinations of either family.
    Any,

    /// An IPv4 address.
    Ipv4(Ipv4Address),

    /// An IPv6 address.
    Ipv6(Ipv6Address),
}

impl Address {
    /// Create an address wrapping an IPv4 address with the given octets.
    pub const fn v4(a0: u8, a1: u8, a2: u8, a3: u8) -> Address {
        Address::Ipv4(Ipv4Address::new(a0, a1, a2, a3))
    }

    /// Create an address wrapping an IPv6 address with the given parts.
    pub fn v6(
        a0: u16, a1: u16, a2: u16, a3: u16,
        a4: u16, a5: u16, a6: u16, a7: u16,
    ) -> Address {
        Address::Ipv6(Ipv6Address::new(a0, a1, a2, a3, a4, a5, a6, a7))
    }

    /// Query whether this is the dual-stack wildcard.
    pub fn is_any_type(&self) -> bool {
        matches!(self, Address::Any)
    }

    /// Query whether the address matches anything: the dual-stack wildcard
    /// or the unspecified address of its own family.
    pub fn is_any(&self) -> bool {
        match self {
            Address::Any => true,
            Address::Ipv4(addr) => addr.is_unspecified(),
            Address::Ipv6(addr) => addr.is_unspecified(),
        }
    }

    /// Query whether the address is a multicast address.
    pub fn is_multicast(&self) -> bool {
        match self {
            Address::Any => false,
            Address::Ipv4(addr) => addr.is_multicast(),
            Address::Ipv6(addr) => addr.is_multicast(),
        }
    }

    /// Query whether the address is the IPv4 limited broadcast address.
    pub fn is_global_broadcast(&self) -> bool {
        match self {
            Address::Ipv4(addr) => addr.is_broadcast(),
            _ => false,
        }
    }

    /// The IP version of the address, `None` for the dual-stack wildcard.
    pub fn version(&self) -> Option<Version> {
        match self {
            Address::Any => None,
            Address::Ipv4(_) => Some(Version::Ipv4),
            Address::Ipv6(_) => Some(Version::Ipv6),
        }
    }

    /// Whether this address can hold a peer of the given version.
    ///
    /// The dual-stack wildcard accepts both versions.
    pub fn accepts_version(&self, version: Version) -> bool {
        match self.version() {
            None => true,
            Some(own) => own == version,
        }
    }

    /// Whether two addresses could refer to the same peer family.
    pub fn same_family(&self, other: &Address) -> bool {
        match other.version() {
            None => true,
            Some(version) => self.accepts_version(version),
        }
    }

    /// The contained IPv4 address, if any.
    pub fn as_v4(&self) -> Option<Ipv4Address> {
        match self {
            Address::Ipv4(addr) => Some(*addr),
            _ => None,
        }
    }

    /// The contained IPv6 address, if any.
    pub fn as_v6(&self) -> Option<Ipv6Address> {
        match self {
            Address::Ipv6(addr) => Some(*addr),
            _ => None,
        }
    }
}

impl Default for Address {
    fn default() -> Address {
        Address::Any
    }
}

impl From<Ipv4Address> for Address {
    fn from(addr: Ipv4Address) -> Self {
        Address::Ipv4(addr)
    }
}

impl From<Ipv6Address> for Address {
    fn from(addr: Ipv6Address) -> Self {
        Address::Ipv6(addr)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Address::Any => write!(f, "*"),
            Address::Ipv4(addr) => write!(f, "{}", addr),
            Address::Ipv6(addr) => write!(f, "{}", addr),
        }
    }
}

pub(crate) mod checksum {
    use byteorder::{ByteOrder, NetworkEndian};

    use super::*;

    fn propagate_carries(word: u32) -> u16 {
        let sum = (word >> 16) + (word & 0xffff);
        ((sum >> 16) as u16) + (sum as u16)
    }

    /// Compute an RFC 1071 compliant checksum (without the final complement).
    pub(crate) fn data(mut data: &[u8]) -> u16 {
        let mut accum = 0;

        // For each 32-byte chunk...
        const CHUNK_SIZE: usize = 32;
        while data.len() >= CHUNK_SIZE {
            let mut d = &data[..CHUNK_SIZE];
            // ... take by 2 bytes and sum them.
            while d.len() >= 2 {
                accum += NetworkEndian::read_u16(d) as u32;
                d = &d[2..];
            }

            data = &data[CHUNK_SIZE..];
        }

        // Sum the rest that does not fit the last 32-byte chunk,
        // taking by 2 bytes.
        while data.len() >= 2 {
            accum += NetworkEndian::read_u16(data) as u32;
            data = &data[2..];
        }

        // Add the last remaining odd byte, if any.
        if let Some(&value) = data.first() {
            accum += (value as u32) << 8;
        }

        propagate_carries(accum)
    }

    /// Combine several RFC 1071 compliant checksums.
    pub(crate) fn combine(checksums: &[u16]) -> u16 {
        let mut accum: u32 = 0;
        for &word in checksums {
            accum += word as u32;
        }
        propagate_carries(accum)
    }

    /// Sum a chain of segments as one contiguous byte sequence.
    ///
    /// At most `coverage` bytes are folded in; any remainder of the chain is
    /// ignored, which is the partial-coverage mode of UDP-Lite. Segments of
    /// odd length make the following segment start at an odd offset, which
    /// is accounted for by byte-swapping the running sum.
    pub(crate) fn data_chained<'a>(
        segments: impl Iterator<Item = &'a [u8]>,
        mut coverage: usize,
    ) -> u16 {
        let mut accum: u32 = 0;
        let mut swapped = false;

        for segment in segments {
            if coverage == 0 {
                break;
            }

            let take = segment.len().min(coverage);
            coverage -= take;
            accum += data(&segment[..take]) as u32;
            accum = propagate_carries(accum) as u32;

            if take % 2 != 0 {
                swapped = !swapped;
                accum = (accum as u16).swap_bytes() as u32;
            }
        }

        let accum = propagate_carries(accum);
        if swapped { accum.swap_bytes() } else { accum }
    }

    /// Compute an IP pseudo header checksum (without the final complement).
    ///
    /// # Panics
    /// This function panics unless `src_addr` and `dst_addr` belong to the same family,
    /// and that family is IPv4 or IPv6.
    pub(crate) fn pseudo_header(src_addr: &Address, dst_addr: &Address,
                         protocol: Protocol, length: u32) -> u16 {
        match (src_addr, dst_addr) {
            (Address::Ipv4(src_addr), Address::Ipv4(dst_addr)) => {
                let mut proto_len = [0u8; 4];
                proto_len[1] = protocol.into();
                NetworkEndian::write_u16(&mut proto_len[2..4], length as u16);

                combine(&[
                    data(src_addr.as_bytes()),
                    data(dst_addr.as_bytes()),
                    data(&proto_len[..])
                ])
            },

            (Address::Ipv6(src_addr), Address::Ipv6(dst_addr)) => {
                let mut proto_len = [0u8; 8];
                proto_len[7] = protocol.into();
                NetworkEndian::write_u32(&mut proto_len[0..4], length);
                combine(&[
                    data(src_addr.as_bytes()),
                    data(dst_addr.as_bytes()),
                    data(&proto_len[..])
                ])
            }

            _ => panic!("Unexpected pseudo header addresses: {}, {}",
                        src_addr, dst_addr)
        }
    }

    /// The complemented transport checksum over a pseudo header and a chain.
    ///
    /// `length` is the value carried in the pseudo header (the full datagram
    /// length), `coverage` the number of chain bytes actually summed; they
    /// differ only for UDP-Lite. The result is ready to be written to the
    /// wire; verifying an incoming datagram, the result is zero iff the
    /// carried checksum was correct.
    ///
    /// # Panics
    /// Panics under the same family conditions as [`pseudo_header`].
    pub(crate) fn pseudo_header_chained<'a>(
        src_addr: &Address, dst_addr: &Address,
        protocol: Protocol, length: u32, coverage: usize,
        segments: impl Iterator<Item = &'a [u8]>,
    ) -> u16 {
        !combine(&[
            pseudo_header(src_addr, dst_addr, protocol, length),
            data_chained(segments, coverage),
        ])
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use super::checksum::{data, data_chained, pseudo_header_chained};

    #[test]
    fn chained_equals_flat() {
        let bytes: alloc::vec::Vec<u8> = (0u16..61).map(|x| (x * 7) as u8).collect();
        let flat = data(&bytes);
        for split in [1usize, 2, 3, 7, 30, 59] {
            let (a, b) = bytes.split_at(split);
            let chained = data_chained([a, b].iter().copied(), bytes.len());
            assert_eq!(flat, chained, "split at {}", split);
        }
    }

    #[test]
    fn chained_coverage_truncates() {
        let bytes = [0x12u8, 0x34, 0x56, 0x78, 0x9a, 0xbc];
        assert_eq!(
            data_chained([&bytes[..]].iter().copied(), 4),
            data(&bytes[..4]));
    }

    #[test]
    fn pseudo_verifies_own_output() {
        let src = Address::v4(10, 0, 0, 1);
        let dst = Address::v4(10, 0, 0, 2);
        let mut packet = [0u8; 12];
        packet[..4].copy_from_slice(&[0xbf, 0x00, 0x00, 0x35]);
        packet[4..8].copy_from_slice(&[0x00, 0x0c, 0x00, 0x00]);
        packet[8..].copy_from_slice(&[0xaa, 0x00, 0x00, 0xff]);

        let chksum = pseudo_header_chained(
            &src, &dst, Protocol::Udp, packet.len() as u32,
            packet.len(), [&packet[..]].iter().copied());
        packet[6..8].copy_from_slice(&chksum.to_be_bytes());

        let verify = pseudo_header_chained(
            &src, &dst, Protocol::Udp, packet.len() as u32,
            packet.len(), [&packet[..]].iter().copied());
        assert_eq!(verify, 0);
    }

    #[test]
    fn family_predicates() {
        let any = Address::Any;
        let v4 = Address::v4(192, 168, 1, 1);
        let v6 = Address::v6(0xfe80, 0, 0, 0, 0, 0, 0, 1);

        assert!(any.is_any() && any.is_any_type());
        assert!(Address::v4(0, 0, 0, 0).is_any());
        assert!(!Address::v4(0, 0, 0, 0).is_any_type());
        assert!(any.same_family(&v4) && any.same_family(&v6));
        assert!(!v4.same_family(&v6));
        assert!(v4.accepts_version(Version::Ipv4));
        assert!(!v6.accepts_version(Version::Ipv4));
    }
}
