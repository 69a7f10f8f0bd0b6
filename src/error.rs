use core::fmt;

/// The result type of all fallible core operations.
pub type Result<T> = core::result::Result<T, Error>;

/// Operational error codes shared by every layer of the core.
///
/// Core functions never panic on bad input or resource exhaustion; they
/// return one of these and leave state unchanged, except where an operation
/// documents a partial-allocation rollback.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Error {
    /// An allocation failed.
    ///
    /// Raised for packet buffers, control blocks and group records alike.
    /// The operation may be retried once resources have been released.
    NoMem,

    /// Not enough space in a buffer, typically for a header grow.
    Buf,

    /// A reply did not arrive in time.
    ///
    /// Never produced by the core itself but reserved for callers that
    /// build request/response exchanges on top of UDP.
    Timeout,

    /// No interface was found towards the destination address.
    Routing,

    /// A malformed request: mismatched address family, a non-multicast
    /// address where a group was expected, an illegal parameter value.
    InvalidArg,

    /// The port or address is already bound by another control block.
    InUse,

    /// `connect` was called on a control block that is already connected.
    AlreadyConnected,

    /// A non-blocking operation could not proceed without blocking.
    WouldBlock,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::NoMem => write!(f, "out of memory"),
            Error::Buf => write!(f, "buffer too small"),
            Error::Timeout => write!(f, "timeout"),
            Error::Routing => write!(f, "no route to host"),
            Error::InvalidArg => write!(f, "invalid argument"),
            Error::InUse => write!(f, "address in use"),
            Error::AlreadyConnected => write!(f, "already connected"),
            Error::WouldBlock => write!(f, "operation would block"),
        }
    }
}

/// Wire-level parse failures surface as invalid arguments.
impl From<crate::wire::Error> for Error {
    fn from(_: crate::wire::Error) -> Self {
        Error::InvalidArg
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}
