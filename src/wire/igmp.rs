use core::fmt;
use byteorder::{ByteOrder, NetworkEndian};

use crate::wire::{Error, Result};
use super::ip::checksum;
use super::Ipv4Address;

enum_with_unknown! {
    /// The type octet of an IGMP message.
    pub enum MessageType(u8) {
        MembershipQuery = 0x11,
        V1MembershipReport = 0x12,
        V2MembershipReport = 0x16,
        LeaveGroup = 0x17,
    }
}

byte_wrapper! {
    /// A byte sequence representing an IGMPv2 message.
    ///
    /// The message is eight octets; a query may carry more, all of which are
    /// included in the checksum.
    #[derive(Debug, PartialEq, Eq)]
    pub struct igmp([u8]);
}

mod field {
    use crate::wire::field::Field;

    pub(super) const TYPE:     usize = 0;
    pub(super) const MAX_RESP: usize = 1;
    pub(super) const CHECKSUM: Field = 2..4;
    pub(super) const GROUP:    Field = 4..8;
}

/// The length of an IGMPv2 message.
pub(crate) const MESSAGE_LEN: usize = field::GROUP.end;

impl igmp {
    /// Interpret a byte slice as a message without any checks.
    pub fn new_unchecked(data: &[u8]) -> &Self {
        Self::__from_macro_new_unchecked(data)
    }

    /// Interpret a mutable byte slice as a message without any checks.
    pub fn new_unchecked_mut(data: &mut [u8]) -> &mut Self {
        Self::__from_macro_new_unchecked_mut(data)
    }

    /// Interpret a byte slice as a message after checking the length.
    pub fn new_checked(data: &[u8]) -> Result<&Self> {
        let packet = Self::new_unchecked(data);
        packet.check_len()?;
        Ok(packet)
    }

    /// Ensure that no accessor method will panic if called.
    pub fn check_len(&self) -> Result<()> {
        if self.0.len() < MESSAGE_LEN {
            Err(Error::Truncated)
        } else {
            Ok(())
        }
    }

    /// Return the message type.
    #[inline]
    pub fn msg_type(&self) -> MessageType {
        MessageType::from(self.0[field::TYPE])
    }

    /// Return the maximum response time, in 100 ms units.
    #[inline]
    pub fn max_resp(&self) -> u8 {
        self.0[field::MAX_RESP]
    }

    /// Return the checksum field.
    #[inline]
    pub fn checksum(&self) -> u16 {
        NetworkEndian::read_u16(&self.0[field::CHECKSUM])
    }

    /// Return the group address field.
    #[inline]
    pub fn group_addr(&self) -> Ipv4Address {
        Ipv4Address::from_bytes(&self.0[field::GROUP])
    }

    /// Set the message type.
    #[inline]
    pub fn set_msg_type(&mut self, value: MessageType) {
        self.0[field::TYPE] = value.into()
    }

    /// Set the maximum response time.
    #[inline]
    pub fn set_max_resp(&mut self, value: u8) {
        self.0[field::MAX_RESP] = value
    }

    /// Set the checksum field.
    #[inline]
    pub fn set_checksum(&mut self, value: u16) {
        NetworkEndian::write_u16(&mut self.0[field::CHECKSUM], value)
    }

    /// Set the group address field.
    #[inline]
    pub fn set_group_addr(&mut self, value: Ipv4Address) {
        self.0[field::GROUP].copy_from_slice(value.as_bytes())
    }

    /// Compute and fill in the checksum, over the whole buffer.
    pub fn fill_checksum(&mut self) {
        self.set_checksum(0);
        let sum = !checksum::data(&self.0);
        self.set_checksum(sum)
    }

    /// Validate the checksum over the whole buffer.
    ///
    /// A message longer than eight octets includes the extra octets, which
    /// matches how the checksum was generated.
    pub fn verify_checksum(&self) -> bool {
        checksum::data(&self.0) == !0
    }
}

impl AsRef<[u8]> for igmp {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// A high-level representation of an IGMPv2 message.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct Repr {
    pub msg_type: MessageType,
    pub max_resp: u8,
    pub group_addr: Ipv4Address,
}

impl Repr {
    /// Parse a message, verifying the checksum.
    pub fn parse(packet: &igmp) -> Result<Repr> {
        packet.check_len()?;
        if !packet.verify_checksum() {
            return Err(Error::WrongChecksum);
        }
        Ok(Repr {
            msg_type: packet.msg_type(),
            max_resp: packet.max_resp(),
            group_addr: packet.group_addr(),
        })
    }

    /// The length of the emitted message.
    pub fn buffer_len(&self) -> usize {
        MESSAGE_LEN
    }

    /// Emit this representation, filling in the checksum.
    pub fn emit(&self, packet: &mut igmp) {
        packet.set_msg_type(self.msg_type);
        packet.set_max_resp(self.max_resp);
        packet.set_group_addr(self.group_addr);
        packet.fill_checksum();
    }
}

impl fmt::Display for Repr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.msg_type {
            MessageType::MembershipQuery =>
                write!(f, "IGMP query group={} max_resp={}", self.group_addr, self.max_resp),
            MessageType::V1MembershipReport =>
                write!(f, "IGMPv1 report group={}", self.group_addr),
            MessageType::V2MembershipReport =>
                write!(f, "IGMPv2 report group={}", self.group_addr),
            MessageType::LeaveGroup =>
                write!(f, "IGMP leave group={}", self.group_addr),
            MessageType::Unknown(id) =>
                write!(f, "IGMP unknown type=0x{:02x}", id),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn emit_parse_roundtrip() {
        let repr = Repr {
            msg_type: MessageType::V2MembershipReport,
            max_resp: 0,
            group_addr: Ipv4Address::new(239, 1, 2, 3),
        };
        let mut bytes = vec![0xa5; repr.buffer_len()];
        repr.emit(igmp::new_unchecked_mut(&mut bytes));

        let packet = igmp::new_checked(&bytes).unwrap();
        assert!(packet.verify_checksum());
        assert_eq!(Repr::parse(packet).unwrap(), repr);
    }

    #[test]
    fn corrupt_checksum_rejected() {
        let repr = Repr {
            msg_type: MessageType::MembershipQuery,
            max_resp: 100,
            group_addr: Ipv4Address::UNSPECIFIED,
        };
        let mut bytes = vec![0; repr.buffer_len()];
        repr.emit(igmp::new_unchecked_mut(&mut bytes));
        bytes[7] ^= 0x01;
        assert_eq!(
            Repr::parse(igmp::new_unchecked(&bytes)),
            Err(Error::WrongChecksum));
    }

    #[test]
    fn short_message_rejected() {
        assert!(igmp::new_checked(&[0x16, 0, 0, 0, 0, 0, 0]).is_err());
    }
}
