use core::fmt;

/// The error type for parsing of packet data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// An incoming packet could not be parsed because it was shorter than assumed.
    ///
    /// The packet may be shorter than the minimum length specified, or a length field may claim a
    /// size longer than the actual payload. For variable length packets, this may be because some
    /// of its fields were out of bounds of the received data.
    Truncated,

    /// An incoming packet had an incorrect checksum and was dropped.
    WrongChecksum,

    /// An incoming packet could not be recognized and was dropped.
    ///
    /// E.g. an IP packet with an unknown version nibble. In most settings this is not fatal as
    /// well-crafted standards consider interoperability to older revisions of their protocols or
    /// even explicitely allow ignoring unknown extensions.
    Unrecognized,

    /// An incoming packet was recognized but was self-contradictory.
    ///
    /// Examples: a UDP packet claiming to contain less than 8 bytes of data; an IPv6 address
    /// literal with two `::` markers.
    Malformed,
}

/// The result type for parsing.
pub type Result<T> = core::result::Result<T, Error>;

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Truncated     => write!(f, "truncated packet"),
            Error::WrongChecksum => write!(f, "checksum error"),
            Error::Unrecognized  => write!(f, "unrecognized packet"),
            Error::Malformed     => write!(f, "malformed packet"),
        }
    }
}
