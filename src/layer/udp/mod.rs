//! UDP: the control block table, demultiplexer and send path.
//!
//! A [`Udp`] handle owns every UDP protocol control block of one stack
//! instance, the match-order list over them and the ephemeral port cursor,
//! seeded from caller randomness. Control blocks are addressed by [`PcbId`];
//! a PCB participates in demultiplexing exactly while it is bound.
//!
//! Matching follows the classic rules: a fully connected PCB (remote
//! address and port equal to the datagram source) beats any unconnected
//! one; among unconnected candidates, a specific local address beats the
//! wildcard, and for global broadcasts the PCB bound to the input
//! interface's own address is preferred. A full match is moved to the head
//! of the list, which is a cache hint and not a semantic requirement.
//!
//! Buffer ownership: `input` consumes its chain unless the returned
//! [`Disposition`] hands it back; a receive callback takes ownership of the
//! chain it is given. Under `reuse_addr`, additional local matches of a
//! broadcast or multicast datagram receive *clones*; each callback owns its
//! clone. The send functions leave the chain owned by the caller, though
//! its first node will have grown the transport header.
#[cfg(test)]
mod tests;

use alloc::boxed::Box;
use alloc::vec::Vec;

use rand_core::RngCore;

use crate::{Error, Result};
use crate::iface::{Interfaces, Netif, NO_INDEX};
use crate::layer::ip::{self, Disposition, RxInfo};
use crate::storage::pbuf::{Handle, Kind, Layer, Pool, FLAG_MCAST_LOOP};
use crate::wire::ip::checksum;
use crate::wire::{
    udp_packet, IpAddress, IpProtocol, IpVersion, Ipv4Address, Ipv6Address,
    Ipv6ScopeHint, UDP_HEADER_LEN,
};

/// First ephemeral port. From the IANA assignment: "the Dynamic and/or
/// Private Ports are those from 49152 through 65535".
pub const LOCAL_PORT_RANGE_START: u16 = 0xc000;

/// Last ephemeral port.
pub const LOCAL_PORT_RANGE_END: u16 = 0xffff;

/// Default time to live of outbound datagrams.
pub const TTL_DEFAULT: u8 = 255;

/// Map an arbitrary 16-bit value into the ephemeral range.
fn ensure_local_port_range(port: u16) -> u16 {
    (port & !LOCAL_PORT_RANGE_START) + LOCAL_PORT_RANGE_START
}

/// Names one control block inside a [`Udp`] handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PcbId(u16);

/// The receive callback. It owns the delivered chain and must not
/// re-enter the core.
pub type RecvFn = Box<dyn FnMut(&mut Pool, PcbId, Handle, &IpAddress, u16)>;

/// Per-connection state of one UDP "socket".
pub struct Pcb {
    local_ip: IpAddress,
    local_port: u16,
    remote_ip: IpAddress,
    remote_port: u16,
    connected: bool,
    netif_idx: u8,
    /// Share the local address with other `reuse_addr` binders.
    pub reuse_addr: bool,
    /// Permit sending to and receiving from broadcast addresses.
    pub broadcast: bool,
    /// Send IPv4 datagrams without a checksum.
    pub no_chksum: bool,
    /// Loop outbound multicast back to local listeners.
    pub multicast_loop: bool,
    /// Speak UDP-Lite instead of UDP.
    pub udplite: bool,
    /// UDP-Lite checksum coverage on send; `0` covers the whole datagram.
    pub chksum_len_tx: u16,
    /// UDP-Lite checksum coverage expected on receive.
    pub chksum_len_rx: u16,
    /// Time to live for unicast sends.
    pub ttl: u8,
    /// Time to live for multicast sends.
    pub mcast_ttl: u8,
    /// Outgoing interface for multicast, `0` for none.
    pub mcast_ifindex: u8,
    /// IPv4 source routing hint for multicast when no interface is pinned.
    pub mcast_ip4: Ipv4Address,
    /// Type of service of outbound IPv4 datagrams.
    pub tos: u8,
    recv: Option<RecvFn>,
}

impl Pcb {
    fn new(local_ip: IpAddress) -> Pcb {
        Pcb {
            local_ip,
            local_port: 0,
            remote_ip: local_ip.to_wildcard(),
            remote_port: 0,
            connected: false,
            netif_idx: NO_INDEX,
            reuse_addr: false,
            broadcast: false,
            no_chksum: false,
            multicast_loop: false,
            udplite: false,
            chksum_len_tx: 0,
            chksum_len_rx: 0,
            ttl: TTL_DEFAULT,
            mcast_ttl: TTL_DEFAULT,
            mcast_ifindex: NO_INDEX,
            mcast_ip4: Ipv4Address::UNSPECIFIED,
            tos: 0,
            recv: None,
        }
    }

    /// The bound local address.
    pub fn local_ip(&self) -> &IpAddress {
        &self.local_ip
    }

    /// The bound local port; `0` while unbound.
    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    /// The connected remote address.
    pub fn remote_ip(&self) -> &IpAddress {
        &self.remote_ip
    }

    /// The connected remote port.
    pub fn remote_port(&self) -> u16 {
        self.remote_port
    }

    /// Whether a remote end has been set by `connect`.
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// The pinned interface index, `0` when not pinned.
    pub fn netif_idx(&self) -> u8 {
        self.netif_idx
    }
}

trait Wildcard {
    fn to_wildcard(&self) -> IpAddress;
}

impl Wildcard for IpAddress {
    /// The any-address of the same family, keeping the dual-stack tag.
    fn to_wildcard(&self) -> IpAddress {
        match self {
            IpAddress::Any => IpAddress::Any,
            IpAddress::Ipv4(_) => IpAddress::Ipv4(Ipv4Address::UNSPECIFIED),
            IpAddress::Ipv6(_) => IpAddress::Ipv6(Ipv6Address::UNSPECIFIED),
        }
    }
}

/// Event counters, exposed for diagnostics.
#[derive(Debug, Default, Clone, Copy)]
pub struct Stats {
    /// Datagrams accepted for processing.
    pub recv: u32,
    /// Datagrams handed to IP output.
    pub xmit: u32,
    /// Datagrams dropped, all causes.
    pub drop: u32,
    /// Datagrams shorter than the UDP header.
    pub lenerr: u32,
    /// Checksum failures.
    pub chkerr: u32,
    /// Full matches already at the head of the list.
    pub cachehit: u32,
}

/// The UDP module handle.
pub struct Udp {
    pcbs: Vec<Option<Pcb>>,
    free: Vec<u16>,
    /// Bound PCBs in match order; index 0 is searched first.
    order: Vec<PcbId>,
    port_cursor: u16,
    /// Event counters.
    pub stats: Stats,
}

impl Udp {
    /// Create the module; the ephemeral port cursor starts at a random
    /// position in the range.
    pub fn new(rng: &mut dyn RngCore) -> Udp {
        Udp {
            pcbs: Vec::new(),
            free: Vec::new(),
            order: Vec::new(),
            port_cursor: ensure_local_port_range(rng.next_u32() as u16),
            stats: Stats::default(),
        }
    }

    /// Allocate an unbound dual-stack control block.
    pub fn create(&mut self) -> Result<PcbId> {
        self.insert(Pcb::new(IpAddress::Any))
    }

    /// Allocate an unbound control block restricted to one IP version.
    pub fn create_ip_type(&mut self, version: IpVersion) -> Result<PcbId> {
        let local = match version {
            IpVersion::Ipv4 => IpAddress::Ipv4(Ipv4Address::UNSPECIFIED),
            IpVersion::Ipv6 => IpAddress::Ipv6(Ipv6Address::UNSPECIFIED),
        };
        self.insert(Pcb::new(local))
    }

    fn insert(&mut self, pcb: Pcb) -> Result<PcbId> {
        if let Some(idx) = self.free.pop() {
            self.pcbs[idx as usize] = Some(pcb);
            return Ok(PcbId(idx));
        }
        let idx = self.pcbs.len();
        if idx > u16::MAX as usize {
            return Err(Error::NoMem);
        }
        self.pcbs.push(Some(pcb));
        Ok(PcbId(idx as u16))
    }

    /// Unlink and release a control block.
    pub fn remove(&mut self, id: PcbId) {
        self.order.retain(|other| *other != id);
        if let Some(slot) = self.pcbs.get_mut(id.0 as usize) {
            *slot = None;
            self.free.push(id.0);
        }
    }

    /// Borrow a control block.
    pub fn pcb(&self, id: PcbId) -> Option<&Pcb> {
        self.pcbs.get(id.0 as usize)?.as_ref()
    }

    /// Borrow a control block mutably, for option configuration.
    pub fn pcb_mut(&mut self, id: PcbId) -> Option<&mut Pcb> {
        self.pcbs.get_mut(id.0 as usize)?.as_mut()
    }

    /// Install the receive callback.
    pub fn set_recv(&mut self, id: PcbId, recv: RecvFn) -> Result<()> {
        self.pcb_mut(id).ok_or(Error::InvalidArg)?.recv = Some(recv);
        Ok(())
    }

    /// Pin the control block to an interface, or unpin with `None`.
    pub fn bind_netif(&mut self, id: PcbId, netif: Option<u8>) -> Result<()> {
        self.pcb_mut(id).ok_or(Error::InvalidArg)?.netif_idx =
            netif.unwrap_or(NO_INDEX);
        Ok(())
    }

    /// Bind to a local address and port.
    ///
    /// Rebinding an already bound control block is allowed. A scoped IPv6
    /// address without a zone is zoned first, using the zone selection
    /// policy, so the conflict check sees the effective address. Port `0`
    /// draws from the ephemeral range; if every port there collides the
    /// error is [`Error::InUse`]. A conflict is any other bound PCB with
    /// the same port and an overlapping address, unless both carry
    /// `reuse_addr`.
    pub fn bind(
        &mut self,
        ifaces: &Interfaces,
        id: PcbId,
        addr: &IpAddress,
        port: u16,
    ) -> Result<()> {
        self.pcb(id).ok_or(Error::InvalidArg)?;

        let mut addr = *addr;
        if let IpAddress::Ipv6(ref mut v6) = addr {
            if v6.lacks_zone(Ipv6ScopeHint::Unknown) {
                let src = *v6;
                ifaces.select_zone(v6, &src);
            }
        }

        let rebind = self.order.contains(&id);

        let port = if port == 0 {
            let port = self.new_port();
            if port == 0 {
                net_debug!("udp: out of free ports");
                return Err(Error::InUse);
            }
            port
        } else {
            let own_reuse = self.pcb(id).map_or(false, |pcb| pcb.reuse_addr);
            for other_id in self.order.iter() {
                if *other_id == id {
                    continue;
                }
                let other = match self.pcb(*other_id) {
                    Some(other) => other,
                    None => continue,
                };
                if own_reuse && other.reuse_addr {
                    continue;
                }
                if other.local_port == port
                    && (other.local_ip == addr
                        || addr.is_any()
                        || other.local_ip.is_any())
                {
                    net_debug!("udp: port already bound by another pcb");
                    return Err(Error::InUse);
                }
            }
            port
        };

        let pcb = self.pcb_mut(id).ok_or(Error::InvalidArg)?;
        pcb.local_ip = addr;
        pcb.local_port = port;
        if !rebind {
            self.order.insert(0, id);
        }
        net_trace!("udp: bound pcb to port {}", port);
        Ok(())
    }

    /// Set the remote end. Binds to an ephemeral port first if unbound.
    ///
    /// A scoped remote address without a zone derives one from the bound
    /// local address.
    pub fn connect(
        &mut self,
        ifaces: &Interfaces,
        id: PcbId,
        addr: &IpAddress,
        port: u16,
    ) -> Result<()> {
        if self.pcb(id).ok_or(Error::InvalidArg)?.local_port == 0 {
            let local = *self.pcb(id).ok_or(Error::InvalidArg)?.local_ip();
            self.bind(ifaces, id, &local, 0)?;
        }

        let local_v6 = self.pcb(id)
            .and_then(|pcb| pcb.local_ip.as_v6())
            .unwrap_or(Ipv6Address::UNSPECIFIED);

        let mut addr = *addr;
        if let IpAddress::Ipv6(ref mut v6) = addr {
            if v6.lacks_zone(Ipv6ScopeHint::Unknown) {
                ifaces.select_zone(v6, &local_v6);
            }
        }

        let pcb = self.pcb_mut(id).ok_or(Error::InvalidArg)?;
        pcb.remote_ip = addr;
        pcb.remote_port = port;
        pcb.connected = true;
        Ok(())
    }

    /// Clear the remote end and the interface pin.
    pub fn disconnect(&mut self, id: PcbId) -> Result<()> {
        let pcb = self.pcb_mut(id).ok_or(Error::InvalidArg)?;
        pcb.remote_ip = pcb.remote_ip.to_wildcard();
        pcb.remote_port = 0;
        pcb.connected = false;
        pcb.netif_idx = NO_INDEX;
        Ok(())
    }

    /// Allocate an ephemeral port, `0` when the whole range is taken.
    fn new_port(&mut self) -> u16 {
        let mut misses: u32 = 0;
        'again: loop {
            self.port_cursor = if self.port_cursor == LOCAL_PORT_RANGE_END {
                LOCAL_PORT_RANGE_START
            } else {
                self.port_cursor + 1
            };
            let candidate = self.port_cursor;
            for id in self.order.iter() {
                let taken = self.pcb(*id)
                    .map_or(false, |pcb| pcb.local_port == candidate);
                if taken {
                    misses += 1;
                    if misses > (LOCAL_PORT_RANGE_END - LOCAL_PORT_RANGE_START) as u32 {
                        return 0;
                    }
                    continue 'again;
                }
            }
            return candidate;
        }
    }

    /// Send to the connected remote end.
    ///
    /// `partial_chksum` folds a checksum the caller has already computed
    /// over data not present in the chain into the datagram checksum.
    pub fn send(
        &mut self,
        pool: &mut Pool,
        ifaces: &mut Interfaces,
        id: PcbId,
        packet: Handle,
        partial_chksum: Option<u16>,
    ) -> Result<()> {
        let pcb = self.pcb(id).ok_or(Error::InvalidArg)?;
        if !pcb.connected {
            return Err(Error::InvalidArg);
        }
        let (dst_ip, dst_port) = (pcb.remote_ip, pcb.remote_port);
        self.sendto(pool, ifaces, id, packet, &dst_ip, dst_port, partial_chksum)
    }

    /// Send to an explicit destination, routing the outgoing interface.
    ///
    /// For multicast destinations, a pinned multicast interface wins, then
    /// the IPv4 multicast source hint, then the ordinary route.
    pub fn sendto(
        &mut self,
        pool: &mut Pool,
        ifaces: &mut Interfaces,
        id: PcbId,
        packet: Handle,
        dst_ip: &IpAddress,
        dst_port: u16,
        partial_chksum: Option<u16>,
    ) -> Result<()> {
        let pcb = self.pcb(id).ok_or(Error::InvalidArg)?;
        if !pcb.local_ip.same_family(dst_ip) {
            return Err(Error::InvalidArg);
        }

        let netif = if dst_ip.is_multicast() && pcb.mcast_ifindex != NO_INDEX {
            Some(pcb.mcast_ifindex)
        } else if dst_ip.is_multicast()
            && matches!(dst_ip, IpAddress::Ipv4(_))
            && !pcb.mcast_ip4.is_unspecified()
            && !pcb.mcast_ip4.is_broadcast()
        {
            // The configured multicast source address drives routing.
            ifaces.route(&pcb.local_ip, &IpAddress::Ipv4(pcb.mcast_ip4))
        } else {
            ifaces.route(&pcb.local_ip, dst_ip)
        };

        let netif = match netif {
            Some(netif) => netif,
            None => {
                net_debug!("udp: no route to destination");
                return Err(Error::Routing);
            }
        };
        self.sendto_if(pool, ifaces, id, packet, dst_ip, dst_port, netif, partial_chksum)
    }

    /// Send through a caller-chosen interface, selecting the source.
    #[allow(clippy::too_many_arguments)]
    pub fn sendto_if(
        &mut self,
        pool: &mut Pool,
        ifaces: &mut Interfaces,
        id: PcbId,
        packet: Handle,
        dst_ip: &IpAddress,
        dst_port: u16,
        netif: u8,
        partial_chksum: Option<u16>,
    ) -> Result<()> {
        let pcb = self.pcb(id).ok_or(Error::InvalidArg)?;
        let src_ip = match dst_ip {
            IpAddress::Ipv6(dst) => {
                let local = pcb.local_ip.as_v6();
                match local {
                    Some(local) if !local.is_unspecified() && !local.is_multicast() => {
                        // The bound address must still be configured.
                        let valid = ifaces.get(netif)
                            .and_then(|inp| inp.ip6_addr_match(&local));
                        if valid.is_none() {
                            return Err(Error::Routing);
                        }
                        IpAddress::Ipv6(local)
                    }
                    _ => {
                        let chosen = ifaces.select_source_v6(netif, dst)
                            .ok_or(Error::Routing)?;
                        IpAddress::Ipv6(chosen)
                    }
                }
            }
            IpAddress::Ipv4(_) => {
                let inp = ifaces.get(netif).ok_or(Error::Routing)?;
                let local = pcb.local_ip.as_v4();
                match local {
                    Some(local) if !local.is_unspecified() && !local.is_multicast() => {
                        // The address may be stale if the netif was renumbered.
                        if local != inp.ip4_addr {
                            return Err(Error::Routing);
                        }
                        IpAddress::Ipv4(local)
                    }
                    _ => IpAddress::Ipv4(inp.ip4_addr),
                }
            }
            IpAddress::Any => return Err(Error::InvalidArg),
        };
        self.sendto_if_src(pool, ifaces, id, packet, dst_ip, dst_port, netif,
            &src_ip, partial_chksum)
    }

    /// Send through a caller-chosen interface with a caller-chosen source.
    #[allow(clippy::too_many_arguments)]
    pub fn sendto_if_src(
        &mut self,
        pool: &mut Pool,
        ifaces: &mut Interfaces,
        id: PcbId,
        packet: Handle,
        dst_ip: &IpAddress,
        dst_port: u16,
        netif: u8,
        src_ip: &IpAddress,
        partial_chksum: Option<u16>,
    ) -> Result<()> {
        {
            let pcb = self.pcb(id).ok_or(Error::InvalidArg)?;
            if !pcb.local_ip.same_family(dst_ip) || !src_ip.same_family(dst_ip) {
                return Err(Error::InvalidArg);
            }
            let is_broadcast = match dst_ip {
                IpAddress::Ipv4(dst) => ifaces.get(netif)
                    .map_or(false, |inp| inp.is_ip4_broadcast(dst)),
                _ => false,
            };
            if is_broadcast && !pcb.broadcast {
                net_debug!("udp: broadcast send without broadcast permission");
                return Err(Error::InvalidArg);
            }
        }

        // Late binding: give the pcb a port before the first datagram.
        if self.pcb(id).ok_or(Error::InvalidArg)?.local_port == 0 {
            let local = *self.pcb(id).ok_or(Error::InvalidArg)?.local_ip();
            self.bind(ifaces, id, &local, 0)?;
        }

        if pool.tot_len(packet).checked_add(UDP_HEADER_LEN)
            .map_or(true, |total| total > u16::MAX as usize)
        {
            return Err(Error::NoMem);
        }

        // Grow the header into the chain, or chain a fresh header node.
        let (datagram, chained) = if pool.add_header(packet, UDP_HEADER_LEN).is_ok() {
            (packet, false)
        } else {
            let header = pool.alloc(Layer::Ip, UDP_HEADER_LEN, Kind::Heap)
                .ok_or(Error::NoMem)?;
            if pool.tot_len(packet) != 0 {
                pool.retain(packet);
                pool.concat(header, packet);
            }
            (header, true)
        };

        let result = self.emit_and_output(pool, ifaces, id, datagram, dst_ip,
            dst_port, netif, src_ip, partial_chksum);

        if chained {
            // Drops the header node; the payload stays with the caller.
            pool.free(datagram);
        }
        result
    }

    #[allow(clippy::too_many_arguments)]
    fn emit_and_output(
        &mut self,
        pool: &mut Pool,
        ifaces: &mut Interfaces,
        id: PcbId,
        datagram: Handle,
        dst_ip: &IpAddress,
        dst_port: u16,
        netif: u8,
        src_ip: &IpAddress,
        partial_chksum: Option<u16>,
    ) -> Result<()> {
        let pcb = self.pcb(id).ok_or(Error::InvalidArg)?;
        let total = pool.tot_len(datagram);
        let local_port = pcb.local_port;

        let (protocol, len_field, chksum) = if pcb.udplite {
            let mut coverage = pcb.chksum_len_tx;
            let mut len_field = coverage;
            if (coverage as usize) < UDP_HEADER_LEN || coverage as usize > total {
                // Illegal coverage degrades to whole-datagram coverage.
                len_field = 0;
                coverage = total as u16;
            }
            let coverage = match partial_chksum {
                Some(_) => UDP_HEADER_LEN,
                None => coverage as usize,
            };
            let chksum = Self::datagram_chksum(
                pool, datagram, src_ip, dst_ip, IpProtocol::UdpLite,
                total, coverage, local_port, dst_port, len_field, partial_chksum);
            (IpProtocol::UdpLite, len_field, Some(chksum))
        } else {
            let len_field = total as u16;
            let omit = matches!(dst_ip, IpAddress::Ipv4(_)) && pcb.no_chksum;
            let chksum = if omit {
                None
            } else {
                let coverage = match partial_chksum {
                    Some(_) => UDP_HEADER_LEN,
                    None => total,
                };
                Some(Self::datagram_chksum(
                    pool, datagram, src_ip, dst_ip, IpProtocol::Udp,
                    total, coverage, local_port, dst_port, len_field, partial_chksum))
            };
            (IpProtocol::Udp, len_field, chksum)
        };

        {
            let header = udp_packet::new_unchecked_mut(
                &mut pool.payload_mut(datagram)[..UDP_HEADER_LEN]);
            header.set_src_port(local_port);
            header.set_dst_port(dst_port);
            header.set_len(len_field);
            // On the wire, zero means "no checksum"; a computed zero is
            // sent as its one's-complement equivalent.
            header.set_checksum(match chksum {
                None => 0,
                Some(0) => 0xffff,
                Some(value) => value,
            });
        }

        if pcb.multicast_loop && dst_ip.is_multicast() {
            pool.set_flag(datagram, FLAG_MCAST_LOOP);
        }

        let ttl = if dst_ip.is_multicast() { pcb.mcast_ttl } else { pcb.ttl };
        let tos = pcb.tos;

        let result = match (src_ip, dst_ip) {
            (IpAddress::Ipv4(src), IpAddress::Ipv4(dst)) =>
                ip::output_v4(pool, ifaces, netif, datagram, src, dst, ttl, tos,
                    protocol, &[]),
            (IpAddress::Ipv6(src), IpAddress::Ipv6(dst)) =>
                ip::output_v6(pool, ifaces, netif, datagram, src, dst, ttl,
                    protocol),
            _ => Err(Error::InvalidArg),
        };
        if result.is_ok() {
            self.stats.xmit += 1;
        }
        result
    }

    /// The transport checksum of an outbound datagram, with the header
    /// fields folded in manually since they are not yet written.
    #[allow(clippy::too_many_arguments)]
    fn datagram_chksum(
        pool: &Pool,
        datagram: Handle,
        src_ip: &IpAddress,
        dst_ip: &IpAddress,
        protocol: IpProtocol,
        total: usize,
        coverage: usize,
        src_port: u16,
        dst_port: u16,
        len_field: u16,
        partial_chksum: Option<u16>,
    ) -> u16 {
        // The header bytes participate before they exist in the buffer:
        // sum them separately and skip the buffer's first eight bytes.
        let header_sum = checksum::combine(&[src_port, dst_port, len_field]);
        let body = checksum::data_chained(
            pool.segments(datagram)
                .enumerate()
                .map(|(i, seg)| if i == 0 { &seg[UDP_HEADER_LEN..] } else { seg }),
            coverage.saturating_sub(UDP_HEADER_LEN));
        let pseudo = checksum::pseudo_header(src_ip, dst_ip, protocol, total as u32);
        let mut sum = !checksum::combine(&[pseudo, header_sum, body]);
        if let Some(partial) = partial_chksum {
            sum = checksum::combine(&[sum, !partial]);
        }
        sum
    }

    /// Process one datagram delivered by the network layer.
    ///
    /// The chain is positioned at the UDP header; `info` carries the
    /// validated network addressing. Consumes the chain unless the
    /// disposition hands it back for an unreachable indication.
    pub fn input(
        &mut self,
        pool: &mut Pool,
        ifaces: &mut Interfaces,
        packet: Handle,
        info: &RxInfo,
    ) -> Result<Disposition> {
        self.stats.recv += 1;

        if pool.len(packet) < UDP_HEADER_LEN {
            net_debug!("udp: short datagram discarded");
            self.stats.lenerr += 1;
            self.stats.drop += 1;
            pool.free(packet);
            return Ok(Disposition::Consumed);
        }

        let (src_port, dst_port, len_field, carried_chksum) = {
            let header = udp_packet::new_unchecked(pool.payload(packet));
            (header.src_port(), header.dst_port(), header.len(), header.checksum())
        };

        let inp = match ifaces.get(info.netif) {
            Some(inp) => inp,
            None => {
                self.stats.drop += 1;
                pool.free(packet);
                return Ok(Disposition::Consumed);
            }
        };
        let broadcast = match &info.dst {
            IpAddress::Ipv4(dst) => inp.is_ip4_broadcast(dst),
            _ => false,
        };

        // Scan for the best match: first full match wins outright, the
        // preferred unconnected match is remembered along the way.
        let mut matched: Option<(usize, PcbId)> = None;
        let mut uncon: Option<PcbId> = None;
        for (position, id) in self.order.iter().enumerate() {
            let pcb = match self.pcb(*id) {
                Some(pcb) => pcb,
                None => continue,
            };
            if pcb.local_port != dst_port
                || !Self::local_match(pcb, inp, info, broadcast)
            {
                continue;
            }

            if !pcb.connected {
                match uncon.and_then(|id| self.pcb(id)) {
                    None => uncon = Some(*id),
                    Some(current)
                        if broadcast && info.dst.is_global_broadcast() =>
                    {
                        // For the limited broadcast, prefer the PCB bound
                        // to the input interface's own address.
                        let current_on_inp = current.local_ip.as_v4()
                            .map_or(false, |v4| v4 == inp.ip4_addr);
                        let this_on_inp = pcb.local_ip.as_v4()
                            .map_or(false, |v4| v4 == inp.ip4_addr);
                        if !current_on_inp && this_on_inp {
                            uncon = Some(*id);
                        }
                    }
                    Some(_) if !pcb.local_ip.is_any() => uncon = Some(*id),
                    Some(_) => {}
                }
            }

            if pcb.remote_port == src_port
                && (pcb.remote_ip.is_any() || pcb.remote_ip == info.src)
            {
                matched = Some((position, *id));
                break;
            }
        }

        let matched = match matched {
            Some((0, id)) => {
                self.stats.cachehit += 1;
                Some(id)
            }
            Some((position, id)) => {
                // Move the full match to the head for the next lookup.
                self.order.remove(position);
                self.order.insert(0, id);
                Some(id)
            }
            None => uncon,
        };

        let for_us = matched.is_some() || match (&info.dst, ifaces.get(info.netif)) {
            (IpAddress::Ipv4(dst), Some(inp)) => *dst == inp.ip4_addr,
            (IpAddress::Ipv6(dst), Some(inp)) => inp.ip6_addr_match(dst).is_some(),
            _ => false,
        };
        if !for_us {
            net_debug!("udp: not for us");
            self.stats.drop += 1;
            pool.free(packet);
            return Ok(Disposition::Consumed);
        }

        if let Err(()) = self.verify_chksum(pool, packet, info, len_field, carried_chksum) {
            net_debug!("udp: datagram discarded due to failing checksum");
            self.stats.chkerr += 1;
            self.stats.drop += 1;
            pool.free(packet);
            return Ok(Disposition::Consumed);
        }

        let matched = match matched {
            Some(id) => id,
            None => {
                self.stats.drop += 1;
                if broadcast || info.dst.is_multicast() {
                    pool.free(packet);
                    return Ok(Disposition::Consumed);
                }
                // Hand the datagram back for a port unreachable reply.
                return Ok(Disposition::PortUnreachable(packet, *info));
            }
        };

        pool.remove_header(packet, UDP_HEADER_LEN)?;

        // Under reuse_addr, a broadcast or multicast datagram fans out as
        // clones to every other local match; the primary match keeps the
        // original.
        let fan_out = self.pcb(matched).map_or(false, |pcb| pcb.reuse_addr)
            && (broadcast || info.dst.is_multicast());
        if fan_out {
            let others: Vec<PcbId> = self.order.iter().copied()
                .filter(|id| *id != matched)
                .filter(|id| self.pcb(*id).map_or(false, |pcb| {
                    pcb.local_port == dst_port
                        && ifaces.get(info.netif).map_or(false, |inp| {
                            Self::local_match(pcb, inp, info, broadcast)
                        })
                }))
                .collect();
            for id in others {
                let clone = match pool.clone_chain(Layer::Raw, Kind::Pool, packet) {
                    Some(clone) => clone,
                    None => continue,
                };
                self.deliver(pool, id, clone, &info.src, src_port);
            }
        }

        self.deliver(pool, matched, packet, &info.src, src_port);
        Ok(Disposition::Consumed)
    }

    /// Invoke a receive callback with ownership of `packet`.
    fn deliver(
        &mut self,
        pool: &mut Pool,
        id: PcbId,
        packet: Handle,
        src: &IpAddress,
        src_port: u16,
    ) {
        let mut recv = match self.pcb_mut(id).and_then(|pcb| pcb.recv.take()) {
            Some(recv) => recv,
            None => {
                self.stats.drop += 1;
                pool.free(packet);
                return;
            }
        };
        recv(pool, id, packet, src, src_port);
        // Callbacks do not re-enter the core, so the slot is unchanged.
        if let Some(pcb) = self.pcb_mut(id) {
            pcb.recv = Some(recv);
        }
    }

    fn verify_chksum(
        &self,
        pool: &Pool,
        packet: Handle,
        info: &RxInfo,
        len_field: u16,
        carried: u16,
    ) -> core::result::Result<(), ()> {
        let total = pool.tot_len(packet);
        if info.proto == IpProtocol::UdpLite {
            let coverage = if (len_field as usize) < UDP_HEADER_LEN {
                if len_field == 0 {
                    // Zero means the checksum covers the whole datagram.
                    total
                } else {
                    // Coverage shorter than the header is a protocol error.
                    return Err(());
                }
            } else {
                len_field as usize
            };
            let sum = checksum::pseudo_header_chained(
                &info.src, &info.dst, IpProtocol::UdpLite, total as u32,
                coverage, pool.segments(packet));
            if sum != 0 {
                return Err(());
            }
            return Ok(());
        }

        if carried == 0 {
            // Omitting the checksum is legal over IPv4 only.
            return match info.dst {
                IpAddress::Ipv4(_) => Ok(()),
                _ => Err(()),
            };
        }
        let sum = checksum::pseudo_header_chained(
            &info.src, &info.dst, IpProtocol::Udp, total as u32,
            total, pool.segments(packet));
        if sum != 0 {
            return Err(());
        }
        Ok(())
    }

    /// The local-side match of a datagram against one control block.
    fn local_match(pcb: &Pcb, inp: &Netif, info: &RxInfo, broadcast: bool) -> bool {
        if pcb.netif_idx != NO_INDEX && pcb.netif_idx != info.netif {
            return false;
        }
        // A dual-stack wildcard listens to any address of either family,
        // broadcasts only with permission.
        if pcb.local_ip.is_any_type() {
            return !(broadcast && !pcb.broadcast);
        }
        if !pcb.local_ip.same_family(&info.dst) {
            return false;
        }
        if broadcast {
            // All broadcasts, or those of the input interface's subnet.
            if !pcb.broadcast {
                return false;
            }
            match (pcb.local_ip.as_v4(), info.dst.as_v4()) {
                (Some(local), Some(dst)) => {
                    local.is_unspecified()
                        || dst.is_broadcast()
                        || local.matches_net(&dst, &inp.ip4_netmask)
                }
                _ => false,
            }
        } else {
            pcb.local_ip.is_any() || pcb.local_ip == info.dst
        }
    }
}
