use byteorder::{ByteOrder, NetworkEndian};

use crate::wire::{Error, Result};

byte_wrapper! {
    /// A byte sequence representing a TCP segment.
    ///
    /// Only the fixed header fields are exposed; this crate reads and
    /// rewrites TCP headers (for header compression) but implements no TCP.
    #[derive(Debug, PartialEq, Eq)]
    pub struct tcp([u8]);
}

mod field {
    use crate::wire::field::Field;

    pub(super) const SRC_PORT: Field = 0..2;
    pub(super) const DST_PORT: Field = 2..4;
    pub(super) const SEQ_NUM:  Field = 4..8;
    pub(super) const ACK_NUM:  Field = 8..12;
    pub(super) const DATA_OFF: usize = 12;
    pub(super) const FLAGS:    usize = 13;
    pub(super) const WIN_SIZE: Field = 14..16;
    pub(super) const CHECKSUM: Field = 16..18;
    pub(super) const URGENT:   Field = 18..20;
}

/// The fixed header length, without options.
pub(crate) const HEADER_LEN: usize = field::URGENT.end;

/// The flag bits of the flags octet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Flags;

impl Flags {
    pub const FIN: u8 = 0x01;
    pub const SYN: u8 = 0x02;
    pub const RST: u8 = 0x04;
    pub const PSH: u8 = 0x08;
    pub const ACK: u8 = 0x10;
    pub const URG: u8 = 0x20;
}

impl tcp {
    /// Interpret a byte slice as a segment without any checks.
    pub fn new_unchecked(data: &[u8]) -> &Self {
        Self::__from_macro_new_unchecked(data)
    }

    /// Interpret a mutable byte slice as a segment without any checks.
    pub fn new_unchecked_mut(data: &mut [u8]) -> &mut Self {
        Self::__from_macro_new_unchecked_mut(data)
    }

    /// Interpret a byte slice as a segment after checking the length.
    pub fn new_checked(data: &[u8]) -> Result<&Self> {
        let packet = Self::new_unchecked(data);
        packet.check_len()?;
        Ok(packet)
    }

    /// Ensure that no accessor method will panic if called.
    pub fn check_len(&self) -> Result<()> {
        let len = self.0.len();
        if len < HEADER_LEN {
            Err(Error::Truncated)
        } else if (self.header_len() as usize) < HEADER_LEN {
            Err(Error::Malformed)
        } else if len < self.header_len() as usize {
            Err(Error::Truncated)
        } else {
            Ok(())
        }
    }

    /// Return the source port field.
    #[inline]
    pub fn src_port(&self) -> u16 {
        NetworkEndian::read_u16(&self.0[field::SRC_PORT])
    }

    /// Return the destination port field.
    #[inline]
    pub fn dst_port(&self) -> u16 {
        NetworkEndian::read_u16(&self.0[field::DST_PORT])
    }

    /// Return the sequence number field.
    #[inline]
    pub fn seq_number(&self) -> u32 {
        NetworkEndian::read_u32(&self.0[field::SEQ_NUM])
    }

    /// Return the acknowledgement number field.
    #[inline]
    pub fn ack_number(&self) -> u32 {
        NetworkEndian::read_u32(&self.0[field::ACK_NUM])
    }

    /// Return the header length, in octets.
    #[inline]
    pub fn header_len(&self) -> u8 {
        (self.0[field::DATA_OFF] >> 4) * 4
    }

    /// Return the flags octet.
    #[inline]
    pub fn flags(&self) -> u8 {
        self.0[field::FLAGS]
    }

    /// Return the window size field.
    #[inline]
    pub fn window(&self) -> u16 {
        NetworkEndian::read_u16(&self.0[field::WIN_SIZE])
    }

    /// Return the checksum field.
    #[inline]
    pub fn checksum(&self) -> u16 {
        NetworkEndian::read_u16(&self.0[field::CHECKSUM])
    }

    /// Return the urgent pointer field.
    #[inline]
    pub fn urgent_pointer(&self) -> u16 {
        NetworkEndian::read_u16(&self.0[field::URGENT])
    }

    /// Set the sequence number field.
    #[inline]
    pub fn set_seq_number(&mut self, value: u32) {
        NetworkEndian::write_u32(&mut self.0[field::SEQ_NUM], value)
    }

    /// Set the acknowledgement number field.
    #[inline]
    pub fn set_ack_number(&mut self, value: u32) {
        NetworkEndian::write_u32(&mut self.0[field::ACK_NUM], value)
    }

    /// Set the flags octet.
    #[inline]
    pub fn set_flags(&mut self, value: u8) {
        self.0[field::FLAGS] = value
    }

    /// Set the window size field.
    #[inline]
    pub fn set_window(&mut self, value: u16) {
        NetworkEndian::write_u16(&mut self.0[field::WIN_SIZE], value)
    }

    /// Set the checksum field.
    #[inline]
    pub fn set_checksum(&mut self, value: u16) {
        NetworkEndian::write_u16(&mut self.0[field::CHECKSUM], value)
    }

    /// Set the urgent pointer field.
    #[inline]
    pub fn set_urgent_pointer(&mut self, value: u16) {
        NetworkEndian::write_u16(&mut self.0[field::URGENT], value)
    }
}

impl AsRef<[u8]> for tcp {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl AsMut<[u8]> for tcp {
    fn as_mut(&mut self) -> &mut [u8] {
        &mut self.0
    }
}

#[cfg(test)]
mod test {
    use super::*;

    static SEGMENT_BYTES: [u8; 20] =
        [0x30, 0x39, 0x00, 0x50,
         0x00, 0x00, 0x04, 0xd2,
         0x00, 0x00, 0x10, 0xe1,
         0x50, 0x18, 0x0f, 0xa0,
         0x12, 0x34, 0x00, 0x00];

    #[test]
    fn test_deconstruct() {
        let packet = tcp::new_checked(&SEGMENT_BYTES[..]).unwrap();
        assert_eq!(packet.src_port(), 12345);
        assert_eq!(packet.dst_port(), 80);
        assert_eq!(packet.seq_number(), 1234);
        assert_eq!(packet.ack_number(), 4321);
        assert_eq!(packet.header_len(), 20);
        assert_eq!(packet.flags(), Flags::ACK | Flags::PSH);
        assert_eq!(packet.window(), 4000);
        assert_eq!(packet.checksum(), 0x1234);
        assert_eq!(packet.urgent_pointer(), 0);
    }
}
