//! The process logic of the protocol layers.
//!
//! Each protocol is split into two parts: the packet representation in
//! [`crate::wire`] and the processing state here. A module handle (e.g.
//! [`udp::Udp`]) owns the per-protocol tables and is driven explicitly: the
//! embedding program hands it the buffer pool, the interface table and a
//! packet, and gets back status codes and ownership of any buffer it must
//! still deal with.
//!
//! ## Receiving
//!
//! Link input produces a buffer chain; [`ip::input`] validates the network
//! header and demultiplexes by protocol into [`udp::Udp::input`] or
//! [`igmp::Igmp::input`]. Consumers take ownership of the chain; whatever is
//! not consumed is returned to the caller with a disposition telling it what
//! the packet still needs (e.g. an ICMP port unreachable, which this core
//! deliberately does not generate itself).
//!
//! ## Sending
//!
//! Transport send paths grow their header into the chain's headroom (or
//! chain a fresh header buffer in front), checksum over the chain, choose
//! source address and interface, and hand the result to [`ip::output_v4`] /
//! [`ip::output_v6`], which prepend the network header and invoke the
//! interface transmit hook.
//!
//! ## Re-entrancy
//!
//! All handles expect external serialization. Callbacks (UDP receive, the
//! MAC filter and transmit hooks) are invoked synchronously and must not
//! call back into the core.
pub mod chap;
pub mod igmp;
pub mod ip;
pub mod udp;
pub mod vj;
