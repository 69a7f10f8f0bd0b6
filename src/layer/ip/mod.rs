//! The thin network-layer dispatch the transports are built on.
//!
//! This module owns no state. It validates incoming network headers, strips
//! them, and routes the payload to the transport modules; on the way out it
//! prepends headers into the chain's headroom and invokes the chosen
//! interface's transmit hook. Routing decisions live in
//! [`crate::iface::Interfaces`].
//!
//! Fragmentation is a handoff point: a datagram larger than the interface
//! MTU is refused here rather than fragmented.
use crate::{Error, Result};
use crate::iface::Interfaces;
use crate::layer::{igmp::Igmp, udp::Udp};
use crate::storage::pbuf::{Handle, Pool};
use crate::wire::{
    ipv4_packet, ipv6_packet, IpAddress, IpProtocol, IpVersion, Ipv4Address,
    Ipv4Repr, Ipv6Address, Ipv6Repr, Ipv6ScopeHint, IPV6_HEADER_LEN,
};

/// Addressing facts about the packet being delivered, captured before the
/// network header is stripped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RxInfo {
    /// Source address; scoped IPv6 sources are zoned to the input interface.
    pub src: IpAddress,
    /// Destination address, zoned like the source.
    pub dst: IpAddress,
    /// Index of the interface the packet arrived on.
    pub netif: u8,
    /// The transport protocol.
    pub proto: IpProtocol,
}

/// What became of an input packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Delivered to a consumer or dropped; the chain has been freed or
    /// adopted and must not be touched again.
    Consumed,
    /// No transport consumer matched a unicast datagram. The chain is
    /// handed back, positioned at the transport header, so the embedding
    /// program can emit an ICMP port unreachable.
    PortUnreachable(Handle, RxInfo),
    /// The protocol is not carried by this core. The chain is handed back,
    /// positioned at the transport header.
    ProtocolUnreachable(Handle, RxInfo),
}

/// Process a packet delivered by a link layer.
///
/// The chain is consumed unless the returned disposition hands it back.
/// The first node must contain the full network header.
pub fn input(
    pool: &mut Pool,
    ifaces: &mut Interfaces,
    udp: &mut Udp,
    igmp: &mut Igmp,
    packet: Handle,
    netif: u8,
) -> Result<Disposition> {
    match IpVersion::of_packet(pool.payload(packet)) {
        Ok(IpVersion::Ipv4) => input_v4(pool, ifaces, udp, igmp, packet, netif),
        Ok(IpVersion::Ipv6) => input_v6(pool, ifaces, udp, packet, netif),
        Err(_) => {
            net_debug!("ip: dropping packet with unknown version");
            pool.free(packet);
            Ok(Disposition::Consumed)
        }
    }
}

fn input_v4(
    pool: &mut Pool,
    ifaces: &mut Interfaces,
    udp: &mut Udp,
    igmp: &mut Igmp,
    packet: Handle,
    netif: u8,
) -> Result<Disposition> {
    // Only the header must be contiguous; the payload may span nodes.
    let (repr, header_len, total_len) = {
        let payload = pool.payload(packet);
        let header = ipv4_packet::new_unchecked(payload);
        let sane = payload.len() >= crate::wire::IPV4_HEADER_LEN
            && header.version() == 4
            && (header.header_len() as usize) >= crate::wire::IPV4_HEADER_LEN
            && payload.len() >= header.header_len() as usize
            && header.verify_checksum()
            && (header.total_len() as usize) >= (header.header_len() as usize)
            && pool.tot_len(packet) >= header.total_len() as usize
            // Fragments are not reassembled by this core.
            && header.flags_and_fragment_offset() & 0x3fff == 0;
        if !sane {
            net_debug!("ip4: header failed validation, dropping");
            pool.free(packet);
            return Ok(Disposition::Consumed);
        }
        let repr = Ipv4Repr {
            src_addr: header.src_addr(),
            dst_addr: header.dst_addr(),
            protocol: header.protocol(),
            payload_len: header.total_len() as usize - header.header_len() as usize,
            hop_limit: header.hop_limit(),
            tos: header.tos(),
        };
        (repr, header.header_len() as usize, header.total_len() as usize)
    };

    let inp = match ifaces.get(netif) {
        Some(inp) => inp,
        None => {
            pool.free(packet);
            return Ok(Disposition::Consumed);
        }
    };

    let for_us = repr.dst_addr == inp.ip4_addr
        || inp.is_ip4_broadcast(&repr.dst_addr)
        || repr.dst_addr.is_multicast();
    if !for_us {
        net_debug!("ip4: not for us, dropping");
        pool.free(packet);
        return Ok(Disposition::Consumed);
    }

    // Drop link-layer padding, then expose the transport header.
    pool.trim(packet, total_len)?;
    pool.remove_header(packet, header_len)?;

    let info = RxInfo {
        src: repr.src_addr.into(),
        dst: repr.dst_addr.into(),
        netif,
        proto: repr.protocol,
    };

    match repr.protocol {
        IpProtocol::Udp | IpProtocol::UdpLite =>
            udp.input(pool, ifaces, packet, &info),
        IpProtocol::Igmp => {
            igmp.input(pool, ifaces, packet, &info);
            Ok(Disposition::Consumed)
        }
        _ => {
            if repr.dst_addr.is_multicast() || info.dst.is_global_broadcast()
                || ifaces.get(netif).map_or(false, |inp| inp.is_ip4_broadcast(&repr.dst_addr))
            {
                pool.free(packet);
                Ok(Disposition::Consumed)
            } else {
                Ok(Disposition::ProtocolUnreachable(packet, info))
            }
        }
    }
}

fn input_v6(
    pool: &mut Pool,
    ifaces: &mut Interfaces,
    udp: &mut Udp,
    packet: Handle,
    netif: u8,
) -> Result<Disposition> {
    // Only the header must be contiguous; the payload may span nodes.
    let repr = {
        let payload = pool.payload(packet);
        let header = ipv6_packet::new_unchecked(payload);
        let sane = payload.len() >= IPV6_HEADER_LEN
            && header.version() == 6
            && pool.tot_len(packet)
                >= IPV6_HEADER_LEN + header.payload_len() as usize;
        if !sane {
            net_debug!("ip6: header failed validation, dropping");
            pool.free(packet);
            return Ok(Disposition::Consumed);
        }
        Ipv6Repr {
            src_addr: header.src_addr(),
            dst_addr: header.dst_addr(),
            next_header: header.next_header(),
            payload_len: header.payload_len() as usize,
            hop_limit: header.hop_limit(),
        }
    };

    // Addresses on the wire carry no zone; scoped ones belong to the
    // input interface's zone by definition.
    let mut src = repr.src_addr;
    let mut dst = repr.dst_addr;
    if src.has_scope(Ipv6ScopeHint::Unknown) {
        src.set_zone(netif);
    }
    if dst.has_scope(Ipv6ScopeHint::Unknown) {
        dst.set_zone(netif);
    }

    let inp = match ifaces.get(netif) {
        Some(inp) => inp,
        None => {
            pool.free(packet);
            return Ok(Disposition::Consumed);
        }
    };

    let for_us = dst.is_multicast() || inp.ip6_addr_match(&dst).is_some();
    if !for_us {
        net_debug!("ip6: not for us, dropping");
        pool.free(packet);
        return Ok(Disposition::Consumed);
    }

    pool.trim(packet, IPV6_HEADER_LEN + repr.payload_len)?;
    pool.remove_header(packet, IPV6_HEADER_LEN)?;

    let info = RxInfo {
        src: src.into(),
        dst: dst.into(),
        netif,
        proto: repr.next_header,
    };

    match repr.next_header {
        IpProtocol::Udp | IpProtocol::UdpLite =>
            udp.input(pool, ifaces, packet, &info),
        _ => {
            if dst.is_multicast() {
                pool.free(packet);
                Ok(Disposition::Consumed)
            } else {
                Ok(Disposition::ProtocolUnreachable(packet, info))
            }
        }
    }
}

/// Prepend an IPv4 header (with options) and transmit on `netif`.
///
/// An unspecified `src` is replaced by the interface address. The chain
/// stays owned by the caller.
#[allow(clippy::too_many_arguments)]
pub fn output_v4(
    pool: &mut Pool,
    ifaces: &mut Interfaces,
    netif: u8,
    packet: Handle,
    src: &Ipv4Address,
    dst: &Ipv4Address,
    ttl: u8,
    tos: u8,
    protocol: IpProtocol,
    options: &[u8],
) -> Result<()> {
    let src = {
        let netif = ifaces.get(netif).ok_or(Error::Routing)?;
        if src.is_unspecified() { netif.ip4_addr } else { *src }
    };

    let header_len = Ipv4Repr::header_len(options.len());
    pool.add_header(packet, header_len)?;
    let payload_len = pool.tot_len(packet) - header_len;

    let repr = Ipv4Repr {
        src_addr: src,
        dst_addr: *dst,
        protocol,
        payload_len,
        hop_limit: ttl,
        tos,
    };
    repr.emit(
        ipv4_packet::new_unchecked_mut(&mut pool.payload_mut(packet)[..header_len]),
        options);

    transmit(pool, ifaces, netif, packet)
}

/// Prepend an IPv6 header and transmit on `netif`.
///
/// The source must be a concrete address; selection happened in the
/// transport layer. The chain stays owned by the caller.
pub fn output_v6(
    pool: &mut Pool,
    ifaces: &mut Interfaces,
    netif: u8,
    packet: Handle,
    src: &Ipv6Address,
    dst: &Ipv6Address,
    hop_limit: u8,
    protocol: IpProtocol,
) -> Result<()> {
    let header_len = IPV6_HEADER_LEN;
    pool.add_header(packet, header_len)?;
    let payload_len = pool.tot_len(packet) - header_len;

    let repr = Ipv6Repr {
        src_addr: *src,
        dst_addr: *dst,
        next_header: protocol,
        payload_len,
        hop_limit,
    };
    repr.emit(ipv6_packet::new_unchecked_mut(
        &mut pool.payload_mut(packet)[..header_len]));

    transmit(pool, ifaces, netif, packet)
}

fn transmit(pool: &mut Pool, ifaces: &mut Interfaces, netif: u8, packet: Handle)
    -> Result<()>
{
    let netif = ifaces.get_mut(netif).ok_or(Error::Routing)?;
    if pool.tot_len(packet) > netif.mtu as usize {
        // Fragmentation handoff: not performed by this core.
        net_debug!("ip: datagram exceeds mtu, refusing to fragment");
        return Err(Error::InvalidArg);
    }
    netif.transmit(pool, packet)
}
