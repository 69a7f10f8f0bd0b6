/*! Low-level packet access and construction.

The `wire` module deals with the packet *representation*. It provides two
levels of functionality.

 * First, it provides functions to extract fields from sequences of octets,
   and to insert fields into sequences of octets. This happens in the
   lowercase byte wrapper structures, e.g. [`udp_packet`] or [`igmp_packet`].
 * Second, it provides a compact, high-level representation of header data
   that can be created from parsing and emitted into a sequence of octets.
   This happens through the `Repr` family of structs, e.g. [`Ipv4Repr`].

The byte wrappers guarantee that, if `check_len()` returned `Ok(())`, then no
field accessor or setter method will panic. When parsing untrusted input it
is *necessary* to use the checked constructors; so long as the buffer is not
modified afterwards, no accessor will fail. The `Repr::parse()` methods never
panic, and `Repr::emit()` never panics as long as the underlying buffer is at
least `Repr::buffer_len()` octets long.

[`udp_packet`]: struct.udp_packet.html
[`igmp_packet`]: struct.igmp_packet.html
[`Ipv4Repr`]: struct.Ipv4Repr.html
*/
// Copyright (C) 2016 whitequark@whitequark.org
// Copyright (C) 2019 Andreas Molzer <andreas.molzer@tum.de>
//
// in large parts from `smoltcp` originally distributed under 0-clause BSD
//
// Applies to files in this folder unless otherwise noted.

mod field {
    pub(crate) type Field = ::core::ops::Range<usize>;
    pub(crate) type Rest  = ::core::ops::RangeFrom<usize>;
}

mod error;
mod igmp;
pub(crate) mod ip;
mod ipv4;
mod ipv6;
mod tcp;
mod udp;

pub(crate) use self::igmp::MESSAGE_LEN as IGMP_MESSAGE_LEN;
pub(crate) use self::ipv4::HEADER_LEN as IPV4_HEADER_LEN;
pub(crate) use self::ipv6::HEADER_LEN as IPV6_HEADER_LEN;
pub(crate) use self::tcp::HEADER_LEN as TCP_HEADER_LEN;
pub(crate) use self::udp::HEADER_LEN as UDP_HEADER_LEN;

pub use self::error::{
    Error,
    Result};

pub use self::ip::{
    Version as IpVersion,
    Protocol as IpProtocol,
    Address as IpAddress};

pub use self::ipv4::{
    ipv4 as ipv4_packet,
    Address as Ipv4Address,
    Repr as Ipv4Repr};

pub use self::ipv6::{
    ipv6 as ipv6_packet,
    Address as Ipv6Address,
    AddrState as Ipv6AddrState,
    MulticastScope as Ipv6MulticastScope,
    ScopeHint as Ipv6ScopeHint,
    Repr as Ipv6Repr,
    IP6_ADDR_LIFE_INFINITE,
    IP6ADDR_STRLEN_MAX};

pub use self::udp::{
    udp as udp_packet,
    Repr as UdpRepr};

pub use self::tcp::{
    tcp as tcp_packet,
    Flags as TcpFlags};

pub use self::igmp::{
    igmp as igmp_packet,
    MessageType as IgmpMessageType,
    Repr as IgmpRepr};
