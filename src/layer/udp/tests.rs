use std::cell::RefCell;
use std::rc::Rc;
use std::vec::Vec;

use rand_chacha::ChaCha20Rng;
use rand_core::SeedableRng;

use crate::Error;
use crate::iface::{Interfaces, Netif};
use crate::layer::{igmp::Igmp, ip};
use crate::layer::ip::{Disposition, RxInfo};
use crate::storage::pbuf::{Handle, Kind, Layer, Pool};
use crate::wire::ip::checksum;
use crate::wire::{
    ipv4_packet, udp_packet, IpAddress, IpProtocol, Ipv4Address, Ipv6Address,
    Ipv6AddrState,
};
use super::{PcbId, Udp, LOCAL_PORT_RANGE_END, LOCAL_PORT_RANGE_START};

type Sent = Rc<RefCell<Vec<Vec<u8>>>>;
type Received = Rc<RefCell<Vec<(PcbId, Vec<u8>, IpAddress, u16)>>>;

const IF_ADDR: Ipv4Address = Ipv4Address::new(10, 0, 0, 1);
const PEER: Ipv4Address = Ipv4Address::new(10, 0, 0, 2);

fn rig() -> (Pool, Interfaces, Udp, Sent) {
    let pool = Pool::new(8);
    let sent: Sent = Rc::new(RefCell::new(Vec::new()));

    let mut netif = Netif::new();
    netif.up = true;
    netif.ethernet = true;
    netif.broadcast_capable = true;
    netif.ip4_addr = IF_ADDR;
    netif.ip4_netmask = Ipv4Address::new(255, 255, 255, 0);
    netif.add_ip6_addr("fe80::1".parse().unwrap(), Ipv6AddrState::Preferred)
        .unwrap();
    netif.add_ip6_addr("2001:db8::1".parse().unwrap(), Ipv6AddrState::Valid)
        .unwrap();
    let log = sent.clone();
    netif.set_tx_hook(Box::new(move |pool, packet| {
        let mut bytes = vec![0u8; pool.tot_len(packet)];
        pool.copy_into(packet, &mut bytes);
        log.borrow_mut().push(bytes);
        Ok(())
    }));

    let mut ifaces = Interfaces::new();
    assert_eq!(ifaces.add(netif).unwrap(), 1);

    let mut rng = ChaCha20Rng::seed_from_u64(42);
    let udp = Udp::new(&mut rng);
    (pool, ifaces, udp, sent)
}

fn recording_recv(udp: &mut Udp, id: PcbId) -> Received {
    let log: Received = Rc::new(RefCell::new(Vec::new()));
    let sink = log.clone();
    udp.set_recv(id, Box::new(move |pool, pcb, packet, src, src_port| {
        let mut bytes = vec![0u8; pool.tot_len(packet)];
        pool.copy_into(packet, &mut bytes);
        sink.borrow_mut().push((pcb, bytes, *src, src_port));
        pool.free(packet);
    })).unwrap();
    log
}

/// A full UDP datagram as it leaves the IP layer, checksummed unless the
/// carried checksum is forced.
fn datagram(
    pool: &mut Pool,
    src: (Ipv4Address, u16),
    dst: (Ipv4Address, u16),
    payload: &[u8],
    force_chksum: Option<u16>,
) -> Handle {
    let total = super::UDP_HEADER_LEN + payload.len();
    let packet = pool.alloc(Layer::Ip, total, Kind::Pool).unwrap();
    {
        let data = pool.payload_mut(packet);
        let header = udp_packet::new_unchecked_mut(data);
        header.set_src_port(src.1);
        header.set_dst_port(dst.1);
        header.set_len(total as u16);
        header.set_checksum(0);
        header.payload_mut_slice().copy_from_slice(payload);
    }
    let sum = match force_chksum {
        Some(sum) => sum,
        None => checksum::pseudo_header_chained(
            &src.0.into(), &dst.0.into(), IpProtocol::Udp, total as u32,
            total, pool.segments(packet)),
    };
    udp_packet::new_unchecked_mut(pool.payload_mut(packet)).set_checksum(sum);
    packet
}

fn v4_info(src: Ipv4Address, dst: Ipv4Address) -> RxInfo {
    RxInfo {
        src: src.into(),
        dst: dst.into(),
        netif: 1,
        proto: IpProtocol::Udp,
    }
}

#[test]
fn echo_scenario() {
    let (mut pool, mut ifaces, mut udp, sent) = rig();

    let pcb = udp.create().unwrap();
    udp.bind(&ifaces, pcb, &IpAddress::Ipv4(Ipv4Address::UNSPECIFIED), 0)
        .unwrap();
    let port = udp.pcb(pcb).unwrap().local_port();
    assert!((LOCAL_PORT_RANGE_START..=LOCAL_PORT_RANGE_END).contains(&port));

    let received = recording_recv(&mut udp, pcb);

    let packet = datagram(&mut pool, (PEER, 12345), (IF_ADDR, port), b"hi", None);
    let disposition = udp
        .input(&mut pool, &mut ifaces, packet, &v4_info(PEER, IF_ADDR))
        .unwrap();
    assert_eq!(disposition, Disposition::Consumed);

    let received = received.borrow();
    assert_eq!(received.len(), 1);
    let (id, payload, src, src_port) = &received[0];
    assert_eq!(*id, pcb);
    assert_eq!(payload, b"hi");
    assert_eq!(*src, IpAddress::Ipv4(PEER));
    assert_eq!(*src_port, 12345);

    // Nothing was transmitted back and every buffer returned to the pool.
    assert!(sent.borrow().is_empty());
    assert_eq!(pool.free_chunks(), 8);
}

#[test]
fn dual_stack_specific_beats_wildcard() {
    let (mut pool, mut ifaces, mut udp, _sent) = rig();

    // Sharing port 53 across the wildcard and the specific listener
    // requires consent from both.
    let any = udp.create().unwrap();
    udp.pcb_mut(any).unwrap().reuse_addr = true;
    udp.bind(&ifaces, any, &IpAddress::Any, 53).unwrap();
    let v6: Ipv6Address = "2001:db8::1".parse().unwrap();
    let specific = udp.create().unwrap();
    udp.pcb_mut(specific).unwrap().reuse_addr = true;
    udp.bind(&ifaces, specific, &v6.into(), 53).unwrap();

    let any_log = recording_recv(&mut udp, any);
    let specific_log = recording_recv(&mut udp, specific);

    let total = super::UDP_HEADER_LEN;
    let packet = pool.alloc(Layer::Ip, total, Kind::Pool).unwrap();
    let peer: Ipv6Address = "2001:db8::2".parse().unwrap();
    {
        let header = udp_packet::new_unchecked_mut(pool.payload_mut(packet));
        header.set_src_port(4000);
        header.set_dst_port(53);
        header.set_len(total as u16);
        header.set_checksum(0);
    }
    let sum = checksum::pseudo_header_chained(
        &peer.into(), &v6.into(), IpProtocol::Udp, total as u32, total,
        pool.segments(packet));
    udp_packet::new_unchecked_mut(pool.payload_mut(packet)).set_checksum(sum);

    let info = RxInfo {
        src: peer.into(),
        dst: v6.into(),
        netif: 1,
        proto: IpProtocol::Udp,
    };
    udp.input(&mut pool, &mut ifaces, packet, &info).unwrap();

    assert_eq!(any_log.borrow().len(), 0);
    assert_eq!(specific_log.borrow().len(), 1);
}

#[test]
fn short_datagram_counts_lenerr() {
    let (mut pool, mut ifaces, mut udp, _sent) = rig();
    let packet = pool.alloc(Layer::Ip, 7, Kind::Pool).unwrap();
    let disposition = udp
        .input(&mut pool, &mut ifaces, packet, &v4_info(PEER, IF_ADDR))
        .unwrap();
    assert_eq!(disposition, Disposition::Consumed);
    assert_eq!(udp.stats.lenerr, 1);
    assert_eq!(udp.stats.drop, 1);
    assert_eq!(pool.free_chunks(), 8);
}

#[test]
fn zero_checksum_v4_accepted_v6_rejected() {
    let (mut pool, mut ifaces, mut udp, _sent) = rig();

    let pcb = udp.create().unwrap();
    udp.bind(&ifaces, pcb, &IpAddress::Any, 9000).unwrap();
    let received = recording_recv(&mut udp, pcb);

    // IPv4 may omit the checksum entirely.
    let packet = datagram(&mut pool, (PEER, 1), (IF_ADDR, 9000), b"x", Some(0));
    udp.input(&mut pool, &mut ifaces, packet, &v4_info(PEER, IF_ADDR)).unwrap();
    assert_eq!(received.borrow().len(), 1);

    // Over IPv6 the checksum is mandatory.
    let dst: Ipv6Address = "2001:db8::1".parse().unwrap();
    let peer: Ipv6Address = "2001:db8::2".parse().unwrap();
    let total = super::UDP_HEADER_LEN + 1;
    let packet = pool.alloc(Layer::Ip, total, Kind::Pool).unwrap();
    {
        let header = udp_packet::new_unchecked_mut(pool.payload_mut(packet));
        header.set_src_port(1);
        header.set_dst_port(9000);
        header.set_len(total as u16);
        header.set_checksum(0);
    }
    let info = RxInfo {
        src: peer.into(),
        dst: dst.into(),
        netif: 1,
        proto: IpProtocol::Udp,
    };
    udp.input(&mut pool, &mut ifaces, packet, &info).unwrap();
    assert_eq!(received.borrow().len(), 1);
    assert_eq!(udp.stats.chkerr, 1);
}

#[test]
fn udplite_coverage_rules() {
    let (mut pool, mut ifaces, mut udp, _sent) = rig();

    let pcb = udp.create().unwrap();
    udp.pcb_mut(pcb).unwrap().udplite = true;
    udp.bind(&ifaces, pcb, &IpAddress::Any, 5000).unwrap();
    let received = recording_recv(&mut udp, pcb);

    let lite_datagram = |pool: &mut Pool, coverage_field: u16| {
        let total = super::UDP_HEADER_LEN + 4;
        let packet = pool.alloc(Layer::Ip, total, Kind::Pool).unwrap();
        {
            let header = udp_packet::new_unchecked_mut(pool.payload_mut(packet));
            header.set_src_port(7);
            header.set_dst_port(5000);
            header.set_len(coverage_field);
            header.set_checksum(0);
            header.payload_mut_slice().copy_from_slice(b"data");
        }
        let coverage = if coverage_field == 0 { total } else { coverage_field as usize };
        let sum = checksum::pseudo_header_chained(
            &PEER.into(), &IF_ADDR.into(), IpProtocol::UdpLite, total as u32,
            coverage, pool.segments(packet));
        udp_packet::new_unchecked_mut(pool.payload_mut(packet)).set_checksum(sum);
        packet
    };
    let info = RxInfo {
        src: PEER.into(),
        dst: IF_ADDR.into(),
        netif: 1,
        proto: IpProtocol::UdpLite,
    };

    // Zero means the checksum covers everything.
    let packet = lite_datagram(&mut pool, 0);
    udp.input(&mut pool, &mut ifaces, packet, &info).unwrap();
    assert_eq!(received.borrow().len(), 1);

    // Header-only coverage is the minimum legal value.
    let packet = lite_datagram(&mut pool, 8);
    udp.input(&mut pool, &mut ifaces, packet, &info).unwrap();
    assert_eq!(received.borrow().len(), 2);

    // Coverage below the header is a protocol error.
    for field in [1u16, 7] {
        let packet = lite_datagram(&mut pool, field);
        udp.input(&mut pool, &mut ifaces, packet, &info).unwrap();
    }
    assert_eq!(received.borrow().len(), 2);
    assert_eq!(udp.stats.chkerr, 2);
}

#[test]
fn unmatched_unicast_hands_back_for_icmp() {
    let (mut pool, mut ifaces, mut udp, _sent) = rig();

    let packet = datagram(&mut pool, (PEER, 1), (IF_ADDR, 4242), b"?", None);
    let disposition = udp
        .input(&mut pool, &mut ifaces, packet, &v4_info(PEER, IF_ADDR))
        .unwrap();
    match disposition {
        Disposition::PortUnreachable(handle, info) => {
            // Handed back positioned at the UDP header.
            let header = udp_packet::new_unchecked(pool.payload(handle));
            assert_eq!(header.dst_port(), 4242);
            assert_eq!(info.src, IpAddress::Ipv4(PEER));
            pool.free(handle);
        }
        other => panic!("expected port unreachable, got {:?}", other),
    }

    // The same datagram to a broadcast destination is silently dropped.
    let bcast = Ipv4Address::new(10, 0, 0, 255);
    let packet = datagram(&mut pool, (PEER, 1), (bcast, 4242), b"?", None);
    let disposition = udp
        .input(&mut pool, &mut ifaces, packet, &v4_info(PEER, bcast))
        .unwrap();
    assert_eq!(disposition, Disposition::Consumed);
    assert_eq!(pool.free_chunks(), 8);
}

#[test]
fn broadcast_needs_permission() {
    let (mut pool, mut ifaces, mut udp, _sent) = rig();
    let bcast = Ipv4Address::new(10, 0, 0, 255);

    let deaf = udp.create().unwrap();
    udp.bind(&ifaces, deaf, &IpAddress::Any, 67).unwrap();
    let deaf_log = recording_recv(&mut udp, deaf);

    let packet = datagram(&mut pool, (PEER, 68), (bcast, 67), b"b", None);
    udp.input(&mut pool, &mut ifaces, packet, &v4_info(PEER, bcast)).unwrap();
    assert_eq!(deaf_log.borrow().len(), 0);

    udp.pcb_mut(deaf).unwrap().broadcast = true;
    let packet = datagram(&mut pool, (PEER, 68), (bcast, 67), b"b", None);
    udp.input(&mut pool, &mut ifaces, packet, &v4_info(PEER, bcast)).unwrap();
    assert_eq!(deaf_log.borrow().len(), 1);
}

#[test]
fn reuseaddr_multicast_fans_out_clones() {
    let (mut pool, mut ifaces, mut udp, _sent) = rig();
    let group = Ipv4Address::new(239, 1, 2, 3);

    let first = udp.create().unwrap();
    udp.pcb_mut(first).unwrap().reuse_addr = true;
    udp.bind(&ifaces, first, &IpAddress::Any, 5353).unwrap();
    let second = udp.create().unwrap();
    udp.pcb_mut(second).unwrap().reuse_addr = true;
    udp.bind(&ifaces, second, &IpAddress::Any, 5353).unwrap();

    let first_log = recording_recv(&mut udp, first);
    let second_log = recording_recv(&mut udp, second);

    let packet = datagram(&mut pool, (PEER, 5353), (group, 5353), b"mdns", None);
    udp.input(&mut pool, &mut ifaces, packet, &v4_info(PEER, group)).unwrap();

    assert_eq!(first_log.borrow().len() + second_log.borrow().len(), 2);
    assert_eq!(first_log.borrow()[0].1, b"mdns");
    assert_eq!(second_log.borrow()[0].1, b"mdns");
    // Original and clone both returned to the pool.
    assert_eq!(pool.free_chunks(), 8);
}

#[test]
fn full_match_moves_to_head() {
    let (mut pool, mut ifaces, mut udp, _sent) = rig();

    let connected = udp.create().unwrap();
    udp.bind(&ifaces, connected, &IpAddress::Any, 2222).unwrap();
    udp.connect(&ifaces, connected, &PEER.into(), 7777).unwrap();
    let listener = udp.create().unwrap();
    udp.bind(&ifaces, listener, &IpAddress::Any, 1111).unwrap();
    let _ = recording_recv(&mut udp, listener);
    let log = recording_recv(&mut udp, connected);

    // `listener` was bound last and sits at the head; the full match on
    // `connected` promotes it.
    let packet = datagram(&mut pool, (PEER, 7777), (IF_ADDR, 2222), b"a", None);
    udp.input(&mut pool, &mut ifaces, packet, &v4_info(PEER, IF_ADDR)).unwrap();
    assert_eq!(udp.stats.cachehit, 0);

    let packet = datagram(&mut pool, (PEER, 7777), (IF_ADDR, 2222), b"b", None);
    udp.input(&mut pool, &mut ifaces, packet, &v4_info(PEER, IF_ADDR)).unwrap();
    assert_eq!(udp.stats.cachehit, 1);
    assert_eq!(log.borrow().len(), 2);
}

#[test]
fn bind_conflicts_and_reuse() {
    let (_pool, ifaces, mut udp, _sent) = rig();

    let first = udp.create().unwrap();
    udp.bind(&ifaces, first, &IpAddress::Any, 7000).unwrap();

    // Same port, overlapping address: refused.
    let second = udp.create().unwrap();
    assert_eq!(
        udp.bind(&ifaces, second, &IpAddress::Ipv4(IF_ADDR), 7000),
        Err(Error::InUse));

    // Distinct ports are fine, rebinding the same pcb is fine.
    udp.bind(&ifaces, second, &IpAddress::Ipv4(IF_ADDR), 7001).unwrap();
    udp.bind(&ifaces, second, &IpAddress::Ipv4(IF_ADDR), 7002).unwrap();

    // Both sides consenting to reuse may share.
    let third = udp.create().unwrap();
    let fourth = udp.create().unwrap();
    udp.pcb_mut(third).unwrap().reuse_addr = true;
    udp.pcb_mut(fourth).unwrap().reuse_addr = true;
    udp.bind(&ifaces, third, &IpAddress::Any, 8000).unwrap();
    udp.bind(&ifaces, fourth, &IpAddress::Any, 8000).unwrap();

    // Ephemeral allocation skips taken ports and stays in range.
    let fifth = udp.create().unwrap();
    udp.bind(&ifaces, fifth, &IpAddress::Any, 0).unwrap();
    let sixth = udp.create().unwrap();
    udp.bind(&ifaces, sixth, &IpAddress::Any, 0).unwrap();
    let p5 = udp.pcb(fifth).unwrap().local_port();
    let p6 = udp.pcb(sixth).unwrap().local_port();
    assert_ne!(p5, p6);
    assert!(p5 >= LOCAL_PORT_RANGE_START && p6 >= LOCAL_PORT_RANGE_START);
}

#[test]
fn bind_assigns_zone_to_scoped_address() {
    let (_pool, ifaces, mut udp, _sent) = rig();

    let pcb = udp.create().unwrap();
    let link_local: Ipv6Address = "fe80::1".parse().unwrap();
    udp.bind(&ifaces, pcb, &link_local.into(), 6000).unwrap();

    let bound = udp.pcb(pcb).unwrap().local_ip().as_v6().unwrap();
    assert_eq!(bound.zone().map(|zone| zone.get()), Some(1));
    assert!(bound.zone_is_consistent());

    // Connect derives the remote zone from the bound address.
    let remote: Ipv6Address = "fe80::9".parse().unwrap();
    udp.connect(&ifaces, pcb, &remote.into(), 6001).unwrap();
    let remote = udp.pcb(pcb).unwrap().remote_ip().as_v6().unwrap();
    assert_eq!(remote.zone().map(|zone| zone.get()), Some(1));
    assert!(remote.zone_is_consistent());

    // Disconnect clears the remote end.
    udp.disconnect(pcb).unwrap();
    assert!(!udp.pcb(pcb).unwrap().is_connected());
    assert_eq!(udp.pcb(pcb).unwrap().remote_port(), 0);
}

#[test]
fn send_grows_header_in_headroom() {
    let (mut pool, mut ifaces, mut udp, sent) = rig();

    let pcb = udp.create().unwrap();
    udp.bind(&ifaces, pcb, &IpAddress::Ipv4(IF_ADDR), 3000).unwrap();

    let payload = pool.alloc(Layer::Link, 4, Kind::Pool).unwrap();
    pool.fill(payload, b"ping").unwrap();
    udp.sendto(&mut pool, &mut ifaces, pcb, payload, &PEER.into(), 3001, None)
        .unwrap();
    pool.free(payload);

    let frames = sent.borrow();
    assert_eq!(frames.len(), 1);
    let ip = ipv4_packet::new_checked(&frames[0][..]).unwrap();
    assert_eq!(ip.protocol(), IpProtocol::Udp);
    assert_eq!(ip.src_addr(), IF_ADDR);
    assert_eq!(ip.dst_addr(), PEER);
    assert!(ip.verify_checksum());

    let header = udp_packet::new_checked(ip.payload_slice()).unwrap();
    assert_eq!(header.src_port(), 3000);
    assert_eq!(header.dst_port(), 3001);
    assert_eq!(header.len() as usize, super::UDP_HEADER_LEN + 4);
    assert_eq!(header.payload_slice(), b"ping");
    // The receiver-side check accepts the checksum we computed.
    let sum = checksum::pseudo_header_chained(
        &IF_ADDR.into(), &PEER.into(), IpProtocol::Udp, header.len() as u32,
        header.len() as usize, [ip.payload_slice()].iter().copied());
    assert_eq!(sum, 0);

    drop(frames);
    assert_eq!(pool.free_chunks(), 8);
}

#[test]
fn send_without_headroom_chains_header() {
    let (mut pool, mut ifaces, mut udp, sent) = rig();

    let pcb = udp.create().unwrap();
    udp.bind(&ifaces, pcb, &IpAddress::Ipv4(IF_ADDR), 3000).unwrap();

    // A raw allocation has no room to grow any header.
    let payload = pool.alloc(Layer::Raw, 4, Kind::Pool).unwrap();
    pool.fill(payload, b"pong").unwrap();
    udp.sendto(&mut pool, &mut ifaces, pcb, payload, &PEER.into(), 3001, None)
        .unwrap();
    // The payload chain is still ours and unchanged.
    assert_eq!(pool.tot_len(payload), 4);
    pool.free(payload);

    let frames = sent.borrow();
    assert_eq!(frames.len(), 1);
    let ip = ipv4_packet::new_checked(&frames[0][..]).unwrap();
    let header = udp_packet::new_checked(ip.payload_slice()).unwrap();
    assert_eq!(header.payload_slice(), b"pong");

    drop(frames);
    assert_eq!(pool.free_chunks(), 8);
}

#[test]
fn send_multicast_uses_multicast_ttl() {
    let (mut pool, mut ifaces, mut udp, sent) = rig();
    let group = Ipv4Address::new(239, 0, 0, 7);

    let pcb = udp.create().unwrap();
    udp.bind(&ifaces, pcb, &IpAddress::Any, 4000).unwrap();
    {
        let pcb = udp.pcb_mut(pcb).unwrap();
        pcb.mcast_ifindex = 1;
        pcb.mcast_ttl = 1;
    }

    let payload = pool.alloc(Layer::Link, 2, Kind::Pool).unwrap();
    pool.fill(payload, b"mc").unwrap();
    udp.sendto(&mut pool, &mut ifaces, pcb, payload, &group.into(), 4001, None)
        .unwrap();
    pool.free(payload);

    let frames = sent.borrow();
    let ip = ipv4_packet::new_checked(&frames[0][..]).unwrap();
    assert_eq!(ip.hop_limit(), 1);
    assert_eq!(ip.dst_addr(), group);
}

#[test]
fn send_v6_selects_source() {
    let (mut pool, mut ifaces, mut udp, sent) = rig();

    let pcb = udp.create().unwrap();
    udp.bind(&ifaces, pcb, &IpAddress::Any, 4100).unwrap();

    let dst: Ipv6Address = "2001:db8::9".parse().unwrap();
    let payload = pool.alloc(Layer::Link, 1, Kind::Pool).unwrap();
    pool.fill(payload, b"6").unwrap();
    udp.sendto(&mut pool, &mut ifaces, pcb, payload, &dst.into(), 4101, None)
        .unwrap();
    pool.free(payload);

    let frames = sent.borrow();
    let packet = crate::wire::ipv6_packet::new_checked(&frames[0][..]).unwrap();
    assert_eq!(packet.next_header(), IpProtocol::Udp);
    // The global address shares the destination's prefix and wins.
    assert!(packet.src_addr().eq_zoneless(&"2001:db8::1".parse().unwrap()));
}

#[test]
fn send_unrouted_family_errors() {
    let (mut pool, mut ifaces, mut udp, _sent) = rig();

    let pcb = udp.create_ip_type(crate::wire::IpVersion::Ipv4).unwrap();
    udp.bind(&ifaces, pcb, &IpAddress::Ipv4(IF_ADDR), 5100).unwrap();

    // A v6 destination does not fit a v4-only pcb.
    let payload = pool.alloc(Layer::Link, 1, Kind::Pool).unwrap();
    let dst: Ipv6Address = "2001:db8::9".parse().unwrap();
    assert_eq!(
        udp.sendto(&mut pool, &mut ifaces, pcb, payload, &dst.into(), 1, None),
        Err(Error::InvalidArg));
    // Unconnected send has no destination either.
    assert_eq!(
        udp.send(&mut pool, &mut ifaces, pcb, payload, None),
        Err(Error::InvalidArg));
    pool.free(payload);
}

#[test]
fn input_through_ip_dispatch() {
    let (mut pool, mut ifaces, mut udp, _sent) = rig();
    let mut igmp = Igmp::new(Box::new(ChaCha20Rng::seed_from_u64(4)));

    let pcb = udp.create().unwrap();
    udp.bind(&ifaces, pcb, &IpAddress::Any, 6100).unwrap();
    let received = recording_recv(&mut udp, pcb);

    // Build the full IPv4 packet around the datagram.
    let packet = datagram(&mut pool, (PEER, 6101), (IF_ADDR, 6100), b"via-ip", None);
    let total = pool.tot_len(packet);
    pool.add_header(packet, crate::wire::IPV4_HEADER_LEN).unwrap();
    {
        let repr = crate::wire::Ipv4Repr {
            src_addr: PEER,
            dst_addr: IF_ADDR,
            protocol: IpProtocol::Udp,
            payload_len: total,
            hop_limit: 64,
            tos: 0,
        };
        repr.emit(
            ipv4_packet::new_unchecked_mut(pool.payload_mut(packet)), &[]);
    }

    let disposition = ip::input(
        &mut pool, &mut ifaces, &mut udp, &mut igmp, packet, 1).unwrap();
    assert_eq!(disposition, Disposition::Consumed);
    assert_eq!(received.borrow().len(), 1);
    assert_eq!(received.borrow()[0].1, b"via-ip");
}
