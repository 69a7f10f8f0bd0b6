use std::vec::Vec;

use crate::storage::pbuf::{Handle, Kind, Layer, Pool};
use crate::wire::{ipv4_packet, tcp_packet, IpProtocol, Ipv4Address, TcpFlags};
use super::{PacketType, Vj, MIN_SLOTS};

/// Field values of one TCP/IPv4 segment under test.
#[derive(Clone, Copy)]
struct Flow {
    src: Ipv4Address,
    dst: Ipv4Address,
    src_port: u16,
    dst_port: u16,
}

const FLOW: Flow = Flow {
    src: Ipv4Address::new(10, 0, 0, 1),
    dst: Ipv4Address::new(10, 0, 0, 2),
    src_port: 1201,
    dst_port: 23,
};

#[derive(Clone, Copy)]
struct Seg {
    seq: u32,
    ack: u32,
    win: u16,
    id: u16,
    push: bool,
    data_len: usize,
}

fn segment(pool: &mut Pool, flow: &Flow, seg: &Seg) -> Handle {
    let total = 40 + seg.data_len;
    let packet = pool.alloc(Layer::Ip, total, Kind::Pool).unwrap();
    let data = pool.payload_mut(packet);
    {
        let ip = ipv4_packet::new_unchecked_mut(&mut data[..20]);
        ip.set_version(4);
        ip.set_header_len(20);
        ip.set_tos(0);
        ip.set_total_len(total as u16);
        ip.set_ident(seg.id);
        ip.set_flags_and_fragment_offset(0x4000);
        ip.set_hop_limit(64);
        ip.set_protocol(IpProtocol::Tcp);
        ip.set_src_addr(flow.src);
        ip.set_dst_addr(flow.dst);
        ip.fill_checksum();
    }
    {
        let tcp = tcp_packet::new_unchecked_mut(&mut data[20..40]);
        tcp.as_mut()[0..2].copy_from_slice(&flow.src_port.to_be_bytes());
        tcp.as_mut()[2..4].copy_from_slice(&flow.dst_port.to_be_bytes());
        tcp.set_seq_number(seg.seq);
        tcp.set_ack_number(seg.ack);
        tcp.as_mut()[12] = 5 << 4;
        tcp.set_flags(if seg.push {
            TcpFlags::ACK | TcpFlags::PSH
        } else {
            TcpFlags::ACK
        });
        tcp.set_window(seg.win);
        tcp.set_checksum(0x1234);
        tcp.set_urgent_pointer(0);
    }
    for (i, byte) in data[40..].iter_mut().enumerate() {
        *byte = i as u8;
    }
    packet
}

fn bytes_of(pool: &Pool, packet: Handle) -> Vec<u8> {
    let mut out = vec![0u8; pool.tot_len(packet)];
    pool.copy_into(packet, &mut out);
    out
}

/// Carry a wire image to the receive side in a fresh buffer with headroom
/// to reconstruct the header.
fn rx_buffer(pool: &mut Pool, wire: &[u8]) -> Handle {
    let packet = pool.alloc(Layer::Ip, wire.len(), Kind::Pool).unwrap();
    pool.fill(packet, wire).unwrap();
    packet
}

#[test]
fn roundtrip_sync_then_compressed_ack() {
    let mut pool = Pool::new(8);
    let mut tx = Vj::new(16);
    let mut rx = Vj::new(16);

    // First packet of the conversation: announces the slot.
    let seg1 = Seg { seq: 1000, ack: 2000, win: 4000, id: 10, push: false, data_len: 0 };
    let p1 = segment(&mut pool, &FLOW, &seg1);
    let original1 = bytes_of(&pool, p1);
    assert_eq!(tx.compress(&mut pool, p1), PacketType::UncompressedTcp);
    let wire1 = bytes_of(&pool, p1);
    // Only the protocol octet differs: it now names connection 0.
    assert_eq!(wire1[9], 0);
    pool.free(p1);

    let r1 = rx_buffer(&mut pool, &wire1);
    rx.uncompress_uncomp(&mut pool, r1).unwrap();
    assert_eq!(bytes_of(&pool, r1), original1);
    pool.free(r1);

    // Steady state: a pure ack moving forward by 42.
    let seg2 = Seg { seq: 1000, ack: 2042, win: 4000, id: 11, push: false, data_len: 0 };
    let p2 = segment(&mut pool, &FLOW, &seg2);
    let original2 = bytes_of(&pool, p2);
    assert_eq!(tx.compress(&mut pool, p2), PacketType::CompressedTcp);
    let wire2 = bytes_of(&pool, p2);
    // One flag octet (C and A), the connection id, the carried TCP
    // checksum, one delta octet.
    assert_eq!(wire2.len(), 5);
    assert_eq!(wire2[0], 0x44);
    assert_eq!(wire2[1], 0);
    assert_eq!(&wire2[2..4], &0x1234u16.to_be_bytes());
    assert_eq!(wire2[4], 42);
    pool.free(p2);

    let r2 = rx_buffer(&mut pool, &wire2);
    rx.uncompress_tcp(&mut pool, r2).unwrap();
    assert_eq!(bytes_of(&pool, r2), original2);
    pool.free(r2);

    assert_eq!(tx.stats.compressed, 1);
    assert_eq!(rx.stats.compressed_in, 1);
    assert_eq!(pool.free_chunks(), 8);
}

#[test]
fn roundtrip_data_and_special_cases() {
    let mut pool = Pool::new(8);
    let mut tx = Vj::new(16);
    let mut rx = Vj::new(16);

    let mut ship = |pool: &mut Pool, tx: &mut Vj, rx: &mut Vj, seg: &Seg| {
        let p = segment(pool, &FLOW, seg);
        let original = bytes_of(pool, p);
        let kind = tx.compress(pool, p);
        let wire = bytes_of(pool, p);
        pool.free(p);

        let r = rx_buffer(pool, &wire);
        match kind {
            PacketType::UncompressedTcp => rx.uncompress_uncomp(pool, r).unwrap(),
            PacketType::CompressedTcp => rx.uncompress_tcp(pool, r).unwrap(),
            other => panic!("unexpected type {:?}", other),
        }
        assert_eq!(bytes_of(pool, r), original, "mismatch for id {}", seg.id);
        pool.free(r);
        kind
    };

    // Sync.
    let kind = ship(&mut pool, &mut tx, &mut rx,
        &Seg { seq: 500, ack: 700, win: 8000, id: 1, push: false, data_len: 0 });
    assert_eq!(kind, PacketType::UncompressedTcp);

    // Header-only to data packet: no field deltas at all.
    let kind = ship(&mut pool, &mut tx, &mut rx,
        &Seg { seq: 500, ack: 700, win: 8000, id: 2, push: true, data_len: 5 });
    assert_eq!(kind, PacketType::CompressedTcp);

    // Unidirectional data: sequence advances by exactly the data length.
    let kind = ship(&mut pool, &mut tx, &mut rx,
        &Seg { seq: 505, ack: 700, win: 8000, id: 3, push: true, data_len: 5 });
    assert_eq!(kind, PacketType::CompressedTcp);

    // A window change alongside a large ack delta.
    let kind = ship(&mut pool, &mut tx, &mut rx,
        &Seg { seq: 510, ack: 1700, win: 8100, id: 4, push: false, data_len: 0 });
    assert_eq!(kind, PacketType::CompressedTcp);

    // An ack jump beyond 16 bits falls back to a fresh sync.
    let kind = ship(&mut pool, &mut tx, &mut rx,
        &Seg { seq: 510, ack: 0x11700, win: 8100, id: 5, push: false, data_len: 0 });
    assert_eq!(kind, PacketType::UncompressedTcp);

    assert_eq!(pool.free_chunks(), 8);
}

#[test]
fn syn_and_fragments_stay_plain_ip() {
    let mut pool = Pool::new(4);
    let mut tx = Vj::new(16);

    let seg = Seg { seq: 1, ack: 0, win: 100, id: 1, push: false, data_len: 0 };
    let p = segment(&mut pool, &FLOW, &seg);
    {
        let data = pool.payload_mut(p);
        let tcp = tcp_packet::new_unchecked_mut(&mut data[20..40]);
        tcp.set_flags(TcpFlags::SYN);
    }
    let before = bytes_of(&pool, p);
    assert_eq!(tx.compress(&mut pool, p), PacketType::Ip);
    assert_eq!(bytes_of(&pool, p), before);
    pool.free(p);

    // A fragmented datagram is never touched either.
    let p = segment(&mut pool, &FLOW, &seg);
    {
        let data = pool.payload_mut(p);
        let ip = ipv4_packet::new_unchecked_mut(&mut data[..20]);
        ip.set_flags_and_fragment_offset(0x2001);
        ip.fill_checksum();
    }
    assert_eq!(tx.compress(&mut pool, p), PacketType::Ip);
    pool.free(p);
}

#[test]
fn minimum_slots_still_evict() {
    let mut pool = Pool::new(4);
    let mut tx = Vj::new(MIN_SLOTS);

    let flows: Vec<Flow> = (0..4)
        .map(|i| Flow {
            src: Ipv4Address::new(10, 0, 0, 10 + i),
            dst: Ipv4Address::new(10, 0, 0, 99),
            src_port: 4000 + i as u16,
            dst_port: 23,
        })
        .collect();
    let seg = Seg { seq: 1, ack: 1, win: 100, id: 1, push: false, data_len: 0 };

    // Four conversations through three slots: each arrival announces a
    // slot, the fourth evicts the oldest.
    for flow in &flows {
        let p = segment(&mut pool, flow, &seg);
        assert_eq!(tx.compress(&mut pool, p), PacketType::UncompressedTcp);
        pool.free(p);
    }
    assert_eq!(tx.stats.misses, 4);

    // The evicted first conversation needs a new announcement...
    let p = segment(&mut pool, &flows[0], &seg);
    assert_eq!(tx.compress(&mut pool, p), PacketType::UncompressedTcp);
    pool.free(p);

    // ...while the freshly re-announced one compresses straight away.
    let seg2 = Seg { seq: 1, ack: 43, win: 100, id: 2, push: false, data_len: 0 };
    let p = segment(&mut pool, &flows[0], &seg2);
    assert_eq!(tx.compress(&mut pool, p), PacketType::CompressedTcp);
    pool.free(p);
}

#[test]
fn toss_until_resync() {
    let mut pool = Pool::new(4);
    let mut tx = Vj::new(16);
    let mut rx = Vj::new(16);

    // A compressed packet with no connection id before any sync.
    let orphan = [0x04u8, 0x12, 0x34, 0x2a];
    let r = rx_buffer(&mut pool, &orphan);
    assert!(rx.uncompress_tcp(&mut pool, r).is_err());
    assert_eq!(rx.stats.tossed, 1);
    pool.free(r);

    // A connection id beyond the slot table is an input error.
    let bad_id = [0x44u8, 200, 0x12, 0x34, 0x2a];
    let r = rx_buffer(&mut pool, &bad_id);
    assert!(rx.uncompress_tcp(&mut pool, r).is_err());
    assert_eq!(rx.stats.error_in, 1);
    pool.free(r);

    // An uncompressed packet resynchronizes the line.
    let seg = Seg { seq: 9, ack: 9, win: 9, id: 9, push: false, data_len: 0 };
    let p = segment(&mut pool, &FLOW, &seg);
    assert_eq!(tx.compress(&mut pool, p), PacketType::UncompressedTcp);
    let wire = bytes_of(&pool, p);
    pool.free(p);
    let r = rx_buffer(&mut pool, &wire);
    rx.uncompress_uncomp(&mut pool, r).unwrap();
    pool.free(r);

    let seg2 = Seg { seq: 9, ack: 51, win: 9, id: 10, push: false, data_len: 0 };
    let p = segment(&mut pool, &FLOW, &seg2);
    assert_eq!(tx.compress(&mut pool, p), PacketType::CompressedTcp);
    let wire = bytes_of(&pool, p);
    pool.free(p);
    let r = rx_buffer(&mut pool, &wire);
    rx.uncompress_tcp(&mut pool, r).unwrap();
    pool.free(r);

    assert_eq!(pool.free_chunks(), 4);
}

#[test]
fn compress_slot_elides_connection_id() {
    let mut pool = Pool::new(4);
    let mut tx = Vj::new(16);
    tx.compress_slot = true;

    let seg = Seg { seq: 1, ack: 1, win: 100, id: 1, push: false, data_len: 0 };
    let p = segment(&mut pool, &FLOW, &seg);
    assert_eq!(tx.compress(&mut pool, p), PacketType::UncompressedTcp);
    pool.free(p);

    // Same conversation as the last transmission: the id is implied.
    let seg2 = Seg { seq: 1, ack: 43, win: 100, id: 2, push: false, data_len: 0 };
    let p = segment(&mut pool, &FLOW, &seg2);
    assert_eq!(tx.compress(&mut pool, p), PacketType::CompressedTcp);
    let wire = bytes_of(&pool, p);
    assert_eq!(wire.len(), 4);
    assert_eq!(wire[0], 0x04);
    pool.free(p);
}
