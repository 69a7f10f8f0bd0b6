use core::fmt;
use core::num::NonZeroU8;
use core::str::FromStr;
use byteorder::{ByteOrder, NetworkEndian};

use crate::wire::{Error, Result};
use super::ip::Protocol;
use super::Ipv4Address;

/// Maximum length of the textual representation, including the terminator.
pub const IP6ADDR_STRLEN_MAX: usize = 46;

/// Address lifetime denoting "never expires".
pub const IP6_ADDR_LIFE_INFINITE: u32 = 0xffff_ffff;

/// A sixteen-octet IPv6 address together with its zone.
///
/// Addresses with constrained scope (link-local unicast, interface- and
/// link-local multicast) are only meaningful relative to a zone, which in
/// the default model of RFC 4007 §6 is the index of an interface. `None`
/// is the "no zone" sentinel; every scoped address the core produces has
/// its zone filled in, every unscoped address has none.
#[derive(Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Default)]
pub struct Address {
    octets: [u8; 16],
    zone: Option<NonZeroU8>,
}

enum_with_unknown! {
    /// IPv6 multicast scope, the low nibble of the second octet.
    pub enum MulticastScope(u8) {
        InterfaceLocal = 0x1,
        LinkLocal = 0x2,
        AdminLocal = 0x4,
        SiteLocal = 0x5,
        OrganizationLocal = 0x8,
        Global = 0xE,
    }
}

/// Callers that statically know whether an address is unicast or multicast
/// can pass a hint so the other class's scope test is never evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeHint {
    /// No knowledge; both tests run.
    Unknown,
    /// The address is known to be unicast.
    Unicast,
    /// The address is known to be multicast.
    Multicast,
}

impl Address {
    /// The unspecified address, also the single-family wildcard.
    pub const UNSPECIFIED: Address = Address { octets: [0x00; 16], zone: None };

    /// The loopback address.
    pub const LOOPBACK: Address = Address {
        octets: [0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0x01],
        zone: None,
    };

    /// The link-local all nodes multicast address.
    pub const LINK_LOCAL_ALL_NODES: Address = Address {
        octets: [0xff, 0x02, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0x01],
        zone: None,
    };

    /// The link-local all routers multicast address.
    pub const LINK_LOCAL_ALL_ROUTERS: Address = Address {
        octets: [0xff, 0x02, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0x02],
        zone: None,
    };

    /// Construct an IPv6 address from parts, without a zone.
    pub fn new(
        a0: u16, a1: u16, a2: u16, a3: u16,
        a4: u16, a5: u16, a6: u16, a7: u16,
    ) -> Address {
        let mut octets = [0u8; 16];
        for (i, part) in [a0, a1, a2, a3, a4, a5, a6, a7].iter().enumerate() {
            NetworkEndian::write_u16(&mut octets[2 * i..2 * i + 2], *part);
        }
        Address { octets, zone: None }
    }

    /// Construct an IPv6 address from a sequence of octets, in big-endian.
    ///
    /// The zone is left empty, as it is whenever an address comes off the
    /// wire.
    ///
    /// # Panics
    /// The function panics if `data` is not sixteen octets long.
    pub fn from_bytes(data: &[u8]) -> Address {
        let mut octets = [0; 16];
        octets.copy_from_slice(data);
        Address { octets, zone: None }
    }

    /// Return the address as a sequence of octets, in big-endian.
    pub fn as_bytes(&self) -> &[u8] {
        &self.octets
    }

    /// Return the sixteen octets by value.
    pub fn octets(&self) -> [u8; 16] {
        self.octets
    }

    /// The same address with the given zone.
    pub fn with_zone(mut self, zone: u8) -> Address {
        self.zone = NonZeroU8::new(zone);
        self
    }

    /// Return the zone index, `None` when the address has no zone.
    pub fn zone(&self) -> Option<NonZeroU8> {
        self.zone
    }

    /// Does the address have a zone set?
    pub fn has_zone(&self) -> bool {
        self.zone.is_some()
    }

    /// Set the zone index; `0` clears it.
    pub fn set_zone(&mut self, zone: u8) {
        self.zone = NonZeroU8::new(zone);
    }

    /// Clear the zone, setting it to "no zone".
    pub fn clear_zone(&mut self) {
        self.zone = None;
    }

    /// Compare the 128-bit values, ignoring zones.
    pub fn eq_zoneless(&self, other: &Address) -> bool {
        self.octets == other.octets
    }

    /// Whether both addresses lie in the same /64 network, zones included.
    pub fn same_net(&self, other: &Address) -> bool {
        self.octets[..8] == other.octets[..8] && self.zone == other.zone
    }

    /// The 16-bit subnet identifier of a /48-site /64-subnet address.
    pub fn subnet_id(&self) -> u16 {
        NetworkEndian::read_u16(&self.octets[6..8])
    }

    /// Query whether the address is an unicast address.
    pub fn is_unicast(&self) -> bool {
        !(self.is_multicast() || self.is_unspecified())
    }

    /// Query whether the address is a multicast address.
    pub fn is_multicast(&self) -> bool {
        self.octets[0] == 0xff
    }

    /// Query whether the address is the unspecified address.
    pub fn is_unspecified(&self) -> bool {
        self.octets == [0x00; 16]
    }

    /// Query whether the address is in the link-local unicast scope.
    pub fn is_link_local(&self) -> bool {
        self.octets[0] == 0xfe && self.octets[1] & 0xc0 == 0x80
    }

    /// Query whether the address is the loopback address.
    pub fn is_loopback(&self) -> bool {
        self.octets == Self::LOOPBACK.octets
    }

    /// Query whether the address is a global unicast address (`2000::/3`).
    pub fn is_global(&self) -> bool {
        self.octets[0] & 0xe0 == 0x20
    }

    /// Query whether the address is a (deprecated) site-local address.
    pub fn is_site_local(&self) -> bool {
        self.octets[0] == 0xfe && self.octets[1] & 0xc0 == 0xc0
    }

    /// Query whether the address is a unique-local address (`fc00::/7`).
    pub fn is_unique_local(&self) -> bool {
        self.octets[0] & 0xfe == 0xfc
    }

    /// Query whether the address is an IPv4 mapped IPv6 address.
    pub fn is_ipv4_mapped(&self) -> bool {
        self.octets[0..12] == [0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0xff, 0xff]
    }

    /// Convert an IPv4 mapped IPv6 address to an IPv4 address.
    pub fn as_ipv4(&self) -> Option<Ipv4Address> {
        if self.is_ipv4_mapped() {
            Some(Ipv4Address::from_bytes(&self.octets[12..]))
        } else {
            None
        }
    }

    /// Query whether the address is interface-local multicast.
    ///
    /// The transient, prefix and rendezvous flag bits are masked out before
    /// the comparison.
    pub fn is_multicast_interface_local(&self) -> bool {
        self.octets[0] == 0xff && self.octets[1] & 0x8f == 0x01
    }

    /// Query whether the address is link-local multicast.
    pub fn is_multicast_link_local(&self) -> bool {
        self.octets[0] == 0xff && self.octets[1] & 0x8f == 0x02
    }

    /// The multicast scope nibble.
    ///
    /// Only meaningful for multicast addresses.
    pub fn multicast_scope(&self) -> MulticastScope {
        MulticastScope::from(self.octets[1] & 0x0f)
    }

    /// Whether the transient flag of a multicast address is set.
    pub fn multicast_is_transient(&self) -> bool {
        self.octets[1] & 0x10 != 0
    }

    /// Query whether the address is the link-local all nodes group.
    pub fn is_all_nodes_link_local(&self) -> bool {
        self.eq_zoneless(&Self::LINK_LOCAL_ALL_NODES)
    }

    /// The solicited node multicast group for this unicast address.
    ///
    /// # Panics
    /// This function panics if the address is not unicast.
    pub fn solicited_node_multicast(&self) -> Address {
        assert!(self.is_unicast());
        let mut octets = [0xff, 0x02, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0x01, 0xff, 0, 0, 0];
        octets[13..].copy_from_slice(&self.octets[13..]);
        Address { octets, zone: None }
    }

    /// Whether this is the solicited node group matching the given unicast
    /// address.
    pub fn is_solicited_node_for(&self, unicast: &Address) -> bool {
        self.octets[0..13] == [0xff, 0x02, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0x01, 0xff]
            && self.octets[13..] == unicast.octets[13..]
    }

    /// Determine whether the address has a constrained scope, and as such is
    /// meaningful only when accompanied by a zone.
    ///
    /// This implements the default model of RFC 4007, where only
    /// interface-local and link-local scopes are defined. The loopback
    /// address has an implied link-local scope but no explicit zone, and
    /// deliberately tests negative here.
    pub fn has_scope(&self, hint: ScopeHint) -> bool {
        self.is_link_local() || (hint != ScopeHint::Unicast && (
            self.is_multicast_interface_local() || self.is_multicast_link_local()
        ))
    }

    /// Does the address need a zone to be meaningful but not have one?
    pub fn lacks_zone(&self, hint: ScopeHint) -> bool {
        !self.has_zone() && self.has_scope(hint)
    }

    /// The invariant every address produced by the core upholds: a zone is
    /// present exactly when the address is scoped.
    pub fn zone_is_consistent(&self) -> bool {
        self.has_zone() == self.has_scope(ScopeHint::Unknown)
    }
}

impl From<Ipv4Address> for Address {
    /// The IPv4 mapped form of the address.
    ///
    /// Note that the resulting IPv6 address is always classified as a
    /// unicast address even though the source address may not be.
    fn from(addr: Ipv4Address) -> Address {
        let Ipv4Address([a, b, c, d]) = addr;
        let mut octets = [0u8; 16];
        octets[10] = 0xff;
        octets[11] = 0xff;
        octets[12..].copy_from_slice(&[a, b, c, d]);
        Address { octets, zone: None }
    }
}

#[cfg(feature = "std")]
impl From<::std::net::Ipv6Addr> for Address {
    fn from(x: ::std::net::Ipv6Addr) -> Address {
        Address { octets: x.octets(), zone: None }
    }
}

#[cfg(feature = "std")]
impl From<Address> for ::std::net::Ipv6Addr {
    fn from(x: Address) -> ::std::net::Ipv6Addr {
        x.octets.into()
    }
}

impl fmt::Display for Address {
    /// Canonical textual representation per RFC 5952.
    ///
    /// The longest run of two or more zero groups is compressed, the
    /// leftmost one on a tie; hex digits are lowercase without leading
    /// zeros; mapped IPv4 addresses use the mixed notation.
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.is_ipv4_mapped() {
            return write!(f, "::ffff:{}.{}.{}.{}",
                self.octets[12], self.octets[13], self.octets[14], self.octets[15]);
        }

        let mut groups = [0u16; 8];
        for (i, group) in groups.iter_mut().enumerate() {
            *group = NetworkEndian::read_u16(&self.octets[2 * i..2 * i + 2]);
        }

        // Locate the longest run of zero groups, leftmost wins ties.
        let mut best = (0, 0);
        let mut current = (0, 0);
        for (i, &group) in groups.iter().enumerate() {
            if group == 0 {
                if current.1 == 0 { current.0 = i }
                current.1 += 1;
                if current.1 > best.1 { best = current }
            } else {
                current = (0, 0);
            }
        }

        if best.1 < 2 {
            for (i, &group) in groups.iter().enumerate() {
                if i > 0 { write!(f, ":")? }
                write!(f, "{:x}", group)?;
            }
            return Ok(());
        }

        for (i, &group) in groups[..best.0].iter().enumerate() {
            if i > 0 { write!(f, ":")? }
            write!(f, "{:x}", group)?;
        }
        write!(f, "::")?;
        for (i, &group) in groups[best.0 + best.1..].iter().enumerate() {
            if i > 0 { write!(f, ":")? }
            write!(f, "{:x}", group)?;
        }
        Ok(())
    }
}

impl FromStr for Address {
    type Err = Error;

    /// Parse the representations of RFC 4291 §2.2, including the embedded
    /// IPv4 forms. Zones are not part of the textual format.
    fn from_str(s: &str) -> Result<Address> {
        fn parse_group(chunk: &str) -> Result<u16> {
            if chunk.is_empty() || chunk.len() > 4
                || !chunk.bytes().all(|byte| byte.is_ascii_hexdigit())
            {
                return Err(Error::Malformed);
            }
            u16::from_str_radix(chunk, 16).map_err(|_| Error::Malformed)
        }

        fn parse_v4(chunk: &str) -> Result<[u8; 4]> {
            let mut bytes = [0u8; 4];
            let mut parts = chunk.split('.');
            for byte in bytes.iter_mut() {
                let part = parts.next().ok_or(Error::Malformed)?;
                if part.is_empty() || part.len() > 3
                    || !part.bytes().all(|byte| byte.is_ascii_digit())
                {
                    return Err(Error::Malformed);
                }
                *byte = part.parse().map_err(|_| Error::Malformed)?;
            }
            if parts.next().is_some() {
                return Err(Error::Malformed);
            }
            Ok(bytes)
        }

        // Groups in front of and behind the `::` marker, if any.
        fn parse_side(side: &str, groups: &mut [u16], may_embed_v4: bool)
            -> Result<usize>
        {
            if side.is_empty() {
                return Ok(0);
            }
            let mut count = 0;
            let mut chunks = side.split(':').peekable();
            while let Some(chunk) = chunks.next() {
                let last = chunks.peek().is_none();
                if last && may_embed_v4 && chunk.contains('.') {
                    let v4 = parse_v4(chunk)?;
                    if count + 2 > groups.len() { return Err(Error::Malformed) }
                    groups[count] = u16::from_be_bytes([v4[0], v4[1]]);
                    groups[count + 1] = u16::from_be_bytes([v4[2], v4[3]]);
                    count += 2;
                } else {
                    if count + 1 > groups.len() { return Err(Error::Malformed) }
                    groups[count] = parse_group(chunk)?;
                    count += 1;
                }
            }
            Ok(count)
        }

        if s.is_empty() || s.len() >= IP6ADDR_STRLEN_MAX {
            return Err(Error::Malformed);
        }

        let mut head = [0u16; 8];
        let mut tail = [0u16; 8];

        let (head_n, tail_n, gap) = match s.find("::") {
            Some(at) => {
                let (front, back) = (&s[..at], &s[at + 2..]);
                if back.contains("::") {
                    return Err(Error::Malformed);
                }
                let head_n = parse_side(front, &mut head, false)?;
                let tail_n = parse_side(back, &mut tail, true)?;
                if head_n + tail_n > 7 {
                    return Err(Error::Malformed);
                }
                (head_n, tail_n, 8 - head_n - tail_n)
            },
            None => {
                let head_n = parse_side(s, &mut head, true)?;
                if head_n != 8 {
                    return Err(Error::Malformed);
                }
                (head_n, 0, 0)
            },
        };

        let mut groups = [0u16; 8];
        groups[..head_n].copy_from_slice(&head[..head_n]);
        groups[head_n + gap..].copy_from_slice(&tail[..tail_n]);
        Ok(Address::new(
            groups[0], groups[1], groups[2], groups[3],
            groups[4], groups[5], groups[6], groups[7]))
    }
}

/// The readiness of an interface address, advanced by Duplicate Address
/// Detection and lifetime expiry.
///
/// The `Tentative` payload counts DAD probes already sent (at most 7). The
/// encoded form keeps the historical bit layout: bit 4 marks any valid
/// state, bit 3 marks tentative, the low three bits hold the probe count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddrState {
    /// Slot unused.
    Invalid,
    /// Address undergoing duplicate address detection.
    Tentative(u8),
    /// Address is valid but neither preferred nor deprecated.
    Valid,
    /// Valid and preferred as a source.
    Preferred,
    /// Valid but deprecated; not chosen as source when alternatives exist.
    Deprecated,
    /// Failed duplicate address detection; unusable.
    Duplicated,
}

impl AddrState {
    const VALID_BIT: u8 = 0x10;
    const TENTATIVE_BIT: u8 = 0x08;
    const PROBE_MASK: u8 = 0x07;

    /// The bit encoding of the state.
    pub fn to_bits(self) -> u8 {
        match self {
            AddrState::Invalid => 0x00,
            AddrState::Tentative(probes) =>
                Self::TENTATIVE_BIT | (probes & Self::PROBE_MASK),
            AddrState::Valid => Self::VALID_BIT,
            AddrState::Preferred => 0x30,
            AddrState::Deprecated => 0x50,
            AddrState::Duplicated => 0x40,
        }
    }

    /// Decode the bit encoding; unassigned patterns map to `Invalid`.
    pub fn from_bits(bits: u8) -> AddrState {
        match bits {
            0x00 => AddrState::Invalid,
            0x08..=0x0f => AddrState::Tentative(bits & Self::PROBE_MASK),
            0x10 => AddrState::Valid,
            0x30 => AddrState::Preferred,
            0x50 => AddrState::Deprecated,
            0x40 => AddrState::Duplicated,
            _ => AddrState::Invalid,
        }
    }

    /// Valid, preferred and deprecated addresses may carry traffic.
    pub fn is_valid(self) -> bool {
        self.to_bits() & Self::VALID_BIT != 0
    }

    /// Tentative addresses accept no traffic except DAD.
    pub fn is_tentative(self) -> bool {
        self.to_bits() & Self::TENTATIVE_BIT != 0
    }

    /// Whether the slot is unused.
    pub fn is_invalid(self) -> bool {
        self == AddrState::Invalid
    }

    /// Whether the address is preferred as a source.
    pub fn is_preferred(self) -> bool {
        self == AddrState::Preferred
    }

    /// Whether the address was found duplicated on the link.
    pub fn is_duplicated(self) -> bool {
        self == AddrState::Duplicated
    }
}

impl Default for AddrState {
    fn default() -> AddrState {
        AddrState::Invalid
    }
}

byte_wrapper! {
    /// A byte sequence representing an IPv6 packet.
    #[derive(Debug, PartialEq, Eq)]
    pub struct ipv6([u8]);
}

mod field {
    use crate::wire::field::*;

    pub(super) const VER_TC_FLOW: Field = 0..4;
    pub(super) const LENGTH:      Field = 4..6;
    pub(super) const NXT_HDR:     usize = 6;
    pub(super) const HOP_LIMIT:   usize = 7;
    pub(super) const SRC_ADDR:    Field = 8..24;
    pub(super) const DST_ADDR:    Field = 24..40;
}

/// The fixed IPv6 header length.
pub(crate) const HEADER_LEN: usize = field::DST_ADDR.end;

impl ipv6 {
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
    pub fn check_len(&self) -> Result<()> {
        let len = self.0.len();
        if len < HEADER_LEN {
            Err(Error::Truncated)
        } else if len < HEADER_LEN + self.payload_len() as usize {
            Err(Error::Truncated)
        } else {
            Ok(())
        }
    }

    /// Return the version field.
    #[inline]
    pub fn version(&self) -> u8 {
        self.0[0] >> 4
    }

    /// Return the payload length field.
    #[inline]
    pub fn payload_len(&self) -> u16 {
        NetworkEndian::read_u16(&self.0[field::LENGTH])
    }

    /// Return the next header field.
    #[inline]
    pub fn next_header(&self) -> Protocol {
        Protocol::from(self.0[field::NXT_HDR])
    }

    /// Return the hop limit field.
    #[inline]
    pub fn hop_limit(&self) -> u8 {
        self.0[field::HOP_LIMIT]
    }

    /// Return the source address field, without a zone.
    #[inline]
    pub fn src_addr(&self) -> Address {
        Address::from_bytes(&self.0[field::SRC_ADDR])
    }

    /// Return the destination address field, without a zone.
    #[inline]
    pub fn dst_addr(&self) -> Address {
        Address::from_bytes(&self.0[field::DST_ADDR])
    }

    /// Set the version field and zero the traffic class and flow label.
    #[inline]
    pub fn set_version_tc_flow(&mut self, version: u8) {
        NetworkEndian::write_u32(&mut self.0[field::VER_TC_FLOW], (version as u32) << 28);
    }

    /// Set the payload length field.
    #[inline]
    pub fn set_payload_len(&mut self, value: u16) {
        NetworkEndian::write_u16(&mut self.0[field::LENGTH], value)
    }

    /// Set the next header field.
    #[inline]
    pub fn set_next_header(&mut self, value: Protocol) {
        self.0[field::NXT_HDR] = value.into()
    }

    /// Set the hop limit field.
    #[inline]
    pub fn set_hop_limit(&mut self, value: u8) {
        self.0[field::HOP_LIMIT] = value
    }

    /// Set the source address field. The zone is not part of the wire format.
    #[inline]
    pub fn set_src_addr(&mut self, value: Address) {
        self.0[field::SRC_ADDR].copy_from_slice(value.as_bytes())
    }

    /// Set the destination address field.
    #[inline]
    pub fn set_dst_addr(&mut self, value: Address) {
        self.0[field::DST_ADDR].copy_from_slice(value.as_bytes())
    }

    /// Return the payload behind the header.
    pub fn payload_slice(&self) -> &[u8] {
        &self.0[HEADER_LEN..HEADER_LEN + self.payload_len() as usize]
    }
}

impl AsRef<[u8]> for ipv6 {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// A high-level representation of an IPv6 packet header.
#[derive(Debug, Hash, PartialEq, Eq, Clone, Copy)]
pub struct Repr {
    pub src_addr: Address,
    pub dst_addr: Address,
    pub next_header: Protocol,
    pub payload_len: usize,
    pub hop_limit: u8,
}

impl Repr {
    /// Parse an IPv6 packet and return a high-level representation.
    pub fn parse(packet: &ipv6) -> Result<Repr> {
        packet.check_len()?;
        if packet.version() != 6 { return Err(Error::Malformed) }

        Ok(Repr {
            src_addr: packet.src_addr(),
            dst_addr: packet.dst_addr(),
            next_header: packet.next_header(),
            payload_len: packet.payload_len() as usize,
            hop_limit: packet.hop_limit(),
        })
    }

    /// The length of the emitted header.
    pub fn buffer_len(&self) -> usize {
        HEADER_LEN
    }

    /// Emit this representation into a packet buffer.
    pub fn emit(&self, packet: &mut ipv6) {
        packet.set_version_tc_flow(6);
        packet.set_payload_len(self.payload_len as u16);
        packet.set_next_header(self.next_header);
        packet.set_hop_limit(self.hop_limit);
        packet.set_src_addr(self.src_addr);
        packet.set_dst_addr(self.dst_addr);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use alloc::string::ToString;

    #[test]
    fn display_rfc5952_forms() {
        let cases: [(&str, Address); 6] = [
            ("2001:db8::1", Address::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 1)),
            ("::", Address::UNSPECIFIED),
            ("::1", Address::LOOPBACK),
            ("fe80::7", Address::new(0xfe80, 0, 0, 0, 0, 0, 0, 7)),
            // Longest run wins over the first run.
            ("1:0:0:4::8", Address::new(1, 0, 0, 4, 0, 0, 0, 8)),
            // A single zero group is not compressed.
            ("2001:db8:0:1:1:1:1:1", Address::new(0x2001, 0xdb8, 0, 1, 1, 1, 1, 1)),
        ];
        for (text, addr) in cases.iter() {
            assert_eq!(&addr.to_string(), text);
        }
    }

    #[test]
    fn display_mapped() {
        let mapped = Address::from(Ipv4Address::new(192, 0, 2, 128));
        assert_eq!(mapped.to_string(), "::ffff:192.0.2.128");
    }

    #[test]
    fn parse_forms() {
        let full: Address = "2001:0db8:0:0:0:0:0:1".parse().unwrap();
        assert_eq!(full, Address::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 1));
        let compressed: Address = "2001:db8::1".parse().unwrap();
        assert_eq!(full, compressed);
        let v4: Address = "::ffff:192.0.2.128".parse().unwrap();
        assert_eq!(v4.as_ipv4(), Some(Ipv4Address::new(192, 0, 2, 128)));
        let any: Address = "::".parse().unwrap();
        assert!(any.is_unspecified());

        assert!("".parse::<Address>().is_err());
        assert!("1::2::3".parse::<Address>().is_err());
        assert!("1:2:3:4:5:6:7".parse::<Address>().is_err());
        assert!("1:2:3:4:5:6:7:8:9".parse::<Address>().is_err());
        assert!("12345::".parse::<Address>().is_err());
        assert!("::ffff:192.0.2".parse::<Address>().is_err());
    }

    #[test]
    fn roundtrip_is_canonical() {
        for text in ["2001:db8::8:0:1", "fe80::1", "ff02::1:ff00:7", "::"] {
            let addr: Address = text.parse().unwrap();
            assert_eq!(&addr.to_string(), text);
        }
    }

    #[test]
    fn scope_classes() {
        let link_local = Address::new(0xfe80, 0, 0, 0, 0, 0, 0, 1);
        assert!(link_local.has_scope(ScopeHint::Unknown));
        assert!(link_local.has_scope(ScopeHint::Unicast));
        assert!(link_local.lacks_zone(ScopeHint::Unknown));
        assert!(!link_local.with_zone(1).lacks_zone(ScopeHint::Unknown));
        assert!(link_local.with_zone(1).zone_is_consistent());

        // Scoped multicast, with and without multicast flag bits.
        let all_nodes = Address::LINK_LOCAL_ALL_NODES;
        assert!(all_nodes.is_multicast_link_local());
        assert!(all_nodes.has_scope(ScopeHint::Unknown));
        assert!(!all_nodes.has_scope(ScopeHint::Unicast));
        let transient: Address = "ff12::1".parse().unwrap();
        assert!(transient.is_multicast_link_local());
        let iflocal: Address = "ff01::1".parse().unwrap();
        assert!(iflocal.is_multicast_interface_local());
        assert_eq!(iflocal.multicast_scope(), MulticastScope::InterfaceLocal);

        // Global scope carries no zone.
        let global: Address = "2001:db8::1".parse().unwrap();
        assert!(!global.has_scope(ScopeHint::Unknown));
        assert!(global.zone_is_consistent());
        // Loopback has no explicitly assigned zone.
        assert!(!Address::LOOPBACK.has_scope(ScopeHint::Unknown));
    }

    #[test]
    fn zone_equality() {
        let a = Address::new(0xfe80, 0, 0, 0, 0, 0, 0, 1).with_zone(1);
        let b = Address::new(0xfe80, 0, 0, 0, 0, 0, 0, 1).with_zone(2);
        assert!(a.eq_zoneless(&b));
        assert_ne!(a, b);
        assert_eq!(a, a);
    }

    #[test]
    fn state_bits() {
        assert_eq!(AddrState::Tentative(3).to_bits(), 0x0b);
        assert_eq!(AddrState::from_bits(0x0b), AddrState::Tentative(3));
        for state in [
            AddrState::Invalid, AddrState::Tentative(0), AddrState::Tentative(7),
            AddrState::Valid, AddrState::Preferred, AddrState::Deprecated,
            AddrState::Duplicated,
        ] {
            assert_eq!(AddrState::from_bits(state.to_bits()), state);
            assert_eq!(state.is_valid(), state.to_bits() & 0x10 != 0);
            assert_eq!(state.is_tentative(), state.to_bits() & 0x08 != 0);
        }
        assert!(AddrState::Preferred.is_valid());
        assert!(AddrState::Deprecated.is_valid());
        assert!(!AddrState::Duplicated.is_valid());
        assert!(!AddrState::Tentative(2).is_valid());
    }

    #[test]
    fn solicited_node() {
        let addr: Address = "fe80::2aa:ff:fe28:9c5a".parse().unwrap();
        let group = addr.solicited_node_multicast();
        assert_eq!(group.to_string(), "ff02::1:ff28:9c5a");
        assert!(group.is_solicited_node_for(&addr));
    }
}
