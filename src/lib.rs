//! A small, self-contained dual-stack TCP/IP core.
//!
//! This library provides the tightly coupled inner machinery of a network
//! stack for hosts that do not have one: chained packet buffers with
//! reference counts and layered headroom, the IPv6 address/scope/zone model,
//! a UDP demultiplexer and send path, the IGMPv2 group membership state
//! machine, Van Jacobson TCP/IP header compression for serial links, and the
//! MS-CHAP authentication exchange used by point-to-point links.
//!
//! It is *not* a sockets library. The embedding program owns the event loop,
//! the link-layer devices, the clock and the randomness, and drives the core
//! through explicit module handles:
//!
//! * [`storage::pbuf::Pool`] owns every packet buffer and hands out
//!   [`storage::pbuf::Handle`]s; ownership of a chain moves with its handle.
//! * [`iface::Interfaces`] is the table of logical interfaces with their
//!   addresses, capability flags and transmit hooks.
//! * [`layer::udp::Udp`], [`layer::igmp::Igmp`], [`layer::vj::Vj`] and the
//!   functions in [`layer::chap`] hold the per-protocol state.
//!
//! All entry points are synchronous and expect to be serialized by the
//! caller; none of them blocks, and allocation failure is reported as a
//! return value rather than by unwinding. Timer-driven behaviour is advanced
//! by the caller invoking the `tick` entry points at their documented
//! periods.
//!
//! The `wire` module follows the representation style pioneered by
//! @whitequark's [`smoltcp`]: plain byte wrappers with field accessors,
//! below a compact `Repr` layer for parsing and emission.
//!
//! [`smoltcp`]: https://github.com/m-labs/smoltcp
#![warn(unreachable_pub)]

// tests should be able to use `std`
#![cfg_attr(all(
    not(feature = "std"),
    not(test)),
no_std)]

extern crate alloc;

#[macro_use] mod macros;
mod error;
pub mod iface;
pub mod layer;
pub mod storage;
pub mod wire;

pub use self::error::{Error, Result};
