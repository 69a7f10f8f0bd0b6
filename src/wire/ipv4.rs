use core::fmt;
use byteorder::{ByteOrder, NetworkEndian};

use crate::wire::{Error, Result};
use super::ip::{checksum, Protocol};

/// A four-octet IPv4 address.
#[derive(Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Default)]
pub struct Address(pub [u8; 4]);

impl Address {
    /// The unspecified address, also the single-family wildcard.
    pub const UNSPECIFIED: Address = Address([0x00; 4]);

    /// The limited broadcast address.
    pub const BROADCAST: Address = Address([0xff; 4]);

    /// Construct an IPv4 address from octets.
    pub const fn new(a0: u8, a1: u8, a2: u8, a3: u8) -> Address {
        Address([a0, a1, a2, a3])
    }

    /// Construct an IPv4 address from a sequence of octets, in big-endian.
    ///
    /// # Panics
    /// The function panics if `data` is not four octets long.
    pub fn from_bytes(data: &[u8]) -> Address {
        let mut bytes = [0; 4];
        bytes.copy_from_slice(data);
        Address(bytes)
    }

    /// Return an IPv4 address as a sequence of octets, in big-endian.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Query whether the address is an unicast address.
    pub fn is_unicast(&self) -> bool {
        !(self.is_broadcast() ||
          self.is_multicast() ||
          self.is_unspecified())
    }

    /// Query whether the address is the limited broadcast address.
    pub fn is_broadcast(&self) -> bool {
        self.0 == [255; 4]
    }

    /// Query whether the address is a class-D multicast address.
    pub fn is_multicast(&self) -> bool {
        self.0[0] & 0xf0 == 224
    }

    /// Query whether the address is the all-zeroes address.
    pub fn is_unspecified(&self) -> bool {
        self.0 == [0; 4]
    }

    /// Query whether the address falls into the link-local range.
    pub fn is_link_local(&self) -> bool {
        self.0[0..2] == [169, 254]
    }

    /// Query whether the address falls into the loopback range.
    pub fn is_loopback(&self) -> bool {
        self.0[0] == 127
    }

    /// Whether two addresses lie in the common network under a netmask.
    pub fn matches_net(&self, other: &Address, mask: &Address) -> bool {
        self.0.iter().zip(&other.0).zip(&mask.0)
            .all(|((a, b), m)| a & m == b & m)
    }

    /// Whether the address is the directed broadcast of the network given by
    /// an interface address and netmask: all host bits one.
    pub fn is_subnet_broadcast(&self, ifaddr: &Address, mask: &Address) -> bool {
        !mask.is_unspecified()
            && self.matches_net(ifaddr, mask)
            && self.0.iter().zip(&mask.0).all(|(a, m)| a | m == 0xff)
    }
}

#[cfg(feature = "std")]
impl From<::std::net::Ipv4Addr> for Address {
    fn from(x: ::std::net::Ipv4Addr) -> Address {
        Address(x.octets())
    }
}

#[cfg(feature = "std")]
impl From<Address> for ::std::net::Ipv4Addr {
    fn from(Address(x): Address) -> ::std::net::Ipv4Addr {
        x.into()
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let bytes = self.0;
        write!(f, "{}.{}.{}.{}", bytes[0], bytes[1], bytes[2], bytes[3])
    }
}

byte_wrapper! {
    /// A byte sequence representing an IPv4 packet.
    #[derive(Debug, PartialEq, Eq)]
    pub struct ipv4([u8]);
}

mod field {
    use crate::wire::field::*;

    pub(super) const VER_IHL:  usize = 0;
    pub(super) const DSCP_ECN: usize = 1;
    pub(super) const LENGTH:   Field = 2..4;
    pub(super) const IDENT:    Field = 4..6;
    pub(super) const FLG_OFF:  Field = 6..8;
    pub(super) const TTL:      usize = 8;
    pub(super) const PROTOCOL: usize = 9;
    pub(super) const CHECKSUM: Field = 10..12;
    pub(super) const SRC_ADDR: Field = 12..16;
    pub(super) const DST_ADDR: Field = 16..20;
}

/// The fixed header length, without options.
pub(crate) const HEADER_LEN: usize = field::DST_ADDR.end;

impl ipv4 {
    /// Interpret a byte slice as a packet without any checks.
    pub fn new_unchecked(data: &[u8]) -> &Self {
        Self::__from_macro_new_unchecked(data)
    }

    /// Interpret a mutable byte slice as a packet without any checks.
    pub fn new_unchecked_mut(data: &mut [u8]) -> &mut Self {
        Self::__from_macro_new_unchecked_mut(data)
    }

    /// Interpret a byte slice as a packet, checking all length fields.
    pub fn new_checked(data: &[u8]) -> Result<&Self> {
        let packet = Self::new_unchecked(data);
        packet.check_len()?;
        Ok(packet)
    }

    /// Interpret a mutable byte slice as a packet, checking all length fields.
    pub fn new_checked_mut(data: &mut [u8]) -> Result<&mut Self> {
        Self::new_checked(&data[..])?;
        Ok(Self::new_unchecked_mut(data))
    }

    /// Ensure that no accessor method will panic if called.
    ///
    /// The result of this check is invalidated by calling [`set_header_len`]
    /// or [`set_total_len`].
    ///
    /// [`set_header_len`]: #method.set_header_len
    /// [`set_total_len`]: #method.set_total_len
    pub fn check_len(&self) -> Result<()> {
        let len = self.0.len();
        if len < HEADER_LEN {
            Err(Error::Truncated)
        } else if (self.header_len() as usize) < HEADER_LEN {
            Err(Error::Malformed)
        } else if len < self.header_len() as usize {
            Err(Error::Truncated)
        } else if (self.total_len() as usize) < (self.header_len() as usize) {
            Err(Error::Malformed)
        } else if len < self.total_len() as usize {
            Err(Error::Truncated)
        } else {
            Ok(())
        }
    }

    /// Return the underlying bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Return the version field.
    #[inline]
    pub fn version(&self) -> u8 {
        self.0[field::VER_IHL] >> 4
    }

    /// Return the header length, in octets.
    #[inline]
    pub fn header_len(&self) -> u8 {
        (self.0[field::VER_IHL] & 0x0f) * 4
    }

    /// Return the Differential Services Code Point and ECN combined.
    #[inline]
    pub fn tos(&self) -> u8 {
        self.0[field::DSCP_ECN]
    }

    /// Return the total length field.
    #[inline]
    pub fn total_len(&self) -> u16 {
        NetworkEndian::read_u16(&self.0[field::LENGTH])
    }

    /// Return the fragment identification field.
    #[inline]
    pub fn ident(&self) -> u16 {
        NetworkEndian::read_u16(&self.0[field::IDENT])
    }

    /// Return the flags and fragment offset, as one raw field.
    ///
    /// The low 13 bits are the offset in words, bits 13..16 the flags; a
    /// nonzero value under the mask `0x3fff` means the packet is a fragment.
    #[inline]
    pub fn flags_and_fragment_offset(&self) -> u16 {
        NetworkEndian::read_u16(&self.0[field::FLG_OFF])
    }

    /// Return the time to live field.
    #[inline]
    pub fn hop_limit(&self) -> u8 {
        self.0[field::TTL]
    }

    /// Return the next protocol field.
    #[inline]
    pub fn protocol(&self) -> Protocol {
        Protocol::from(self.0[field::PROTOCOL])
    }

    /// Return the raw protocol octet. The VJ codec stores a connection id here.
    #[inline]
    pub fn protocol_raw(&self) -> u8 {
        self.0[field::PROTOCOL]
    }

    /// Return the header checksum field.
    #[inline]
    pub fn checksum(&self) -> u16 {
        NetworkEndian::read_u16(&self.0[field::CHECKSUM])
    }

    /// Return the source address field.
    #[inline]
    pub fn src_addr(&self) -> Address {
        Address::from_bytes(&self.0[field::SRC_ADDR])
    }

    /// Return the destination address field.
    #[inline]
    pub fn dst_addr(&self) -> Address {
        Address::from_bytes(&self.0[field::DST_ADDR])
    }

    /// Set the version field.
    #[inline]
    pub fn set_version(&mut self, value: u8) {
        self.0[field::VER_IHL] = (self.0[field::VER_IHL] & !0xf0) | (value << 4);
    }

    /// Set the header length, in octets.
    #[inline]
    pub fn set_header_len(&mut self, value: u8) {
        self.0[field::VER_IHL] = (self.0[field::VER_IHL] & !0x0f) | ((value / 4) & 0x0f);
    }

    /// Set the Differential Services Code Point and ECN combined.
    #[inline]
    pub fn set_tos(&mut self, value: u8) {
        self.0[field::DSCP_ECN] = value
    }

    /// Set the total length field.
    #[inline]
    pub fn set_total_len(&mut self, value: u16) {
        NetworkEndian::write_u16(&mut self.0[field::LENGTH], value)
    }

    /// Set the fragment identification field.
    #[inline]
    pub fn set_ident(&mut self, value: u16) {
        NetworkEndian::write_u16(&mut self.0[field::IDENT], value)
    }

    /// Set the flags and fragment offset, as one raw field.
    #[inline]
    pub fn set_flags_and_fragment_offset(&mut self, value: u16) {
        NetworkEndian::write_u16(&mut self.0[field::FLG_OFF], value)
    }

    /// Set the time to live field.
    #[inline]
    pub fn set_hop_limit(&mut self, value: u8) {
        self.0[field::TTL] = value
    }

    /// Set the next protocol field.
    #[inline]
    pub fn set_protocol(&mut self, value: Protocol) {
        self.0[field::PROTOCOL] = value.into()
    }

    /// Set the raw protocol octet.
    #[inline]
    pub fn set_protocol_raw(&mut self, value: u8) {
        self.0[field::PROTOCOL] = value
    }

    /// Set the header checksum field.
    #[inline]
    pub fn set_checksum(&mut self, value: u16) {
        NetworkEndian::write_u16(&mut self.0[field::CHECKSUM], value)
    }

    /// Set the source address field.
    #[inline]
    pub fn set_src_addr(&mut self, value: Address) {
        self.0[field::SRC_ADDR].copy_from_slice(value.as_bytes())
    }

    /// Set the destination address field.
    #[inline]
    pub fn set_dst_addr(&mut self, value: Address) {
        self.0[field::DST_ADDR].copy_from_slice(value.as_bytes())
    }

    /// Return the header options as a byte slice.
    pub fn options(&self) -> &[u8] {
        &self.0[HEADER_LEN..self.header_len() as usize]
    }

    /// Return the header options as a mutable byte slice.
    pub fn options_mut(&mut self) -> &mut [u8] {
        let len = self.header_len() as usize;
        &mut self.0[HEADER_LEN..len]
    }

    /// Return the payload behind the header.
    pub fn payload_slice(&self) -> &[u8] {
        let range = self.header_len() as usize..self.total_len() as usize;
        &self.0[range]
    }

    /// Return the payload behind the header, mutably.
    pub fn payload_mut_slice(&mut self) -> &mut [u8] {
        let range = self.header_len() as usize..self.total_len() as usize;
        &mut self.0[range]
    }

    /// Compute and fill in the header checksum.
    pub fn fill_checksum(&mut self) {
        self.set_checksum(0);
        let len = self.header_len() as usize;
        let sum = !checksum::data(&self.0[..len]);
        self.set_checksum(sum)
    }

    /// Validate the header checksum.
    pub fn verify_checksum(&self) -> bool {
        let len = self.header_len() as usize;
        checksum::data(&self.0[..len]) == !0
    }
}

impl AsRef<[u8]> for ipv4 {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl AsMut<[u8]> for ipv4 {
    fn as_mut(&mut self) -> &mut [u8] {
        &mut self.0
    }
}

/// A high-level representation of an IPv4 packet header.
#[derive(Debug, Hash, PartialEq, Eq, Clone, Copy)]
pub struct Repr {
    pub src_addr: Address,
    pub dst_addr: Address,
    pub protocol: Protocol,
    pub payload_len: usize,
    pub hop_limit: u8,
    pub tos: u8,
}

impl Repr {
    /// Parse an IPv4 packet and return a high-level representation.
    pub fn parse(packet: &ipv4) -> Result<Repr> {
        packet.check_len()?;
        if packet.version() != 4 { return Err(Error::Malformed) }
        if !packet.verify_checksum() { return Err(Error::WrongChecksum) }

        Ok(Repr {
            src_addr: packet.src_addr(),
            dst_addr: packet.dst_addr(),
            protocol: packet.protocol(),
            payload_len: packet.total_len() as usize - packet.header_len() as usize,
            hop_limit: packet.hop_limit(),
            tos: packet.tos(),
        })
    }

    /// Return the header length a packet emitted from this representation
    /// will have, including the given amount of option bytes.
    ///
    /// Options are padded to a multiple of four octets.
    pub fn header_len(options_len: usize) -> usize {
        HEADER_LEN + (options_len + 3) / 4 * 4
    }

    /// Emit a high-level representation into an IPv4 packet.
    ///
    /// The buffer must hold at least `Repr::header_len(options.len())`
    /// octets. Options are zero-padded to a word boundary and the header
    /// checksum is filled in last.
    pub fn emit(&self, packet: &mut ipv4, options: &[u8]) {
        let header_len = Self::header_len(options.len());
        debug_assert!(header_len <= 60);
        packet.set_version(4);
        packet.set_header_len(header_len as u8);
        packet.set_tos(self.tos);
        packet.set_total_len((header_len + self.payload_len) as u16);
        packet.set_ident(0);
        packet.set_flags_and_fragment_offset(0);
        packet.set_hop_limit(self.hop_limit);
        packet.set_protocol(self.protocol);
        packet.set_src_addr(self.src_addr);
        packet.set_dst_addr(self.dst_addr);
        let padded = packet.options_mut();
        padded[..options.len()].copy_from_slice(options);
        for byte in &mut padded[options.len()..] {
            *byte = 0;
        }
        packet.fill_checksum();
    }
}

impl fmt::Display for Repr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "IPv4 src={} dst={} proto={}",
               self.src_addr, self.dst_addr, self.protocol)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    static PACKET_BYTES: [u8; 30] =
        [0x45, 0x00, 0x00, 0x1e,
         0x01, 0x02, 0x00, 0x00,
         0x1a, 0x01, 0x37, 0x72,
         0x11, 0x12, 0x13, 0x14,
         0x21, 0x22, 0x23, 0x24,
         0xaa, 0x00, 0x00, 0xff,
         0x00, 0x00, 0x00, 0x00,
         0x00, 0xff];

    #[test]
    fn test_deconstruct() {
        let packet = ipv4::new_checked(&PACKET_BYTES[..]).unwrap();
        assert_eq!(packet.version(), 4);
        assert_eq!(packet.header_len(), 20);
        assert_eq!(packet.total_len(), 30);
        assert_eq!(packet.ident(), 0x0102);
        assert_eq!(packet.hop_limit(), 0x1a);
        assert_eq!(packet.protocol(), Protocol::Icmp);
        assert_eq!(packet.checksum(), 0x3772);
        assert_eq!(packet.src_addr(), Address([0x11, 0x12, 0x13, 0x14]));
        assert_eq!(packet.dst_addr(), Address([0x21, 0x22, 0x23, 0x24]));
        assert!(packet.verify_checksum());
    }

    #[test]
    fn test_emit_with_options() {
        let repr = Repr {
            src_addr: Address::new(192, 168, 1, 1),
            dst_addr: Address::new(224, 0, 0, 1),
            protocol: Protocol::Igmp,
            payload_len: 8,
            hop_limit: 1,
            tos: 0,
        };
        let router_alert = [0x94, 0x04, 0x00, 0x00];
        let mut bytes = vec![0xa5; Repr::header_len(router_alert.len()) + 8];
        let packet = ipv4::new_unchecked_mut(&mut bytes);
        repr.emit(packet, &router_alert);

        let packet = ipv4::new_checked(&bytes).unwrap();
        assert_eq!(packet.header_len(), 24);
        assert_eq!(packet.total_len(), 32);
        assert_eq!(packet.options(), &router_alert);
        assert!(packet.verify_checksum());
        assert_eq!(Repr::parse(packet).unwrap().protocol, Protocol::Igmp);
    }

    #[test]
    fn test_subnet_broadcast() {
        let ifaddr = Address::new(192, 168, 1, 1);
        let mask = Address::new(255, 255, 255, 0);
        assert!(Address::new(192, 168, 1, 255).is_subnet_broadcast(&ifaddr, &mask));
        assert!(!Address::new(192, 168, 2, 255).is_subnet_broadcast(&ifaddr, &mask));
        assert!(!Address::new(192, 168, 1, 7).is_subnet_broadcast(&ifaddr, &mask));
        // An all-zero mask never produces a directed broadcast.
        assert!(!Address::new(10, 0, 0, 1).is_subnet_broadcast(
            &Address::new(10, 0, 0, 1), &Address::UNSPECIFIED));
    }
}
