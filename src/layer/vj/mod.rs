//! Van Jacobson TCP/IP header compression for serial links.
//!
//! The codec squeezes the 40 bytes of a steady-state TCP/IPv4 header down
//! to 3-16 bytes by keeping a copy of the last header per conversation on
//! both ends and transmitting only the fields that changed. The compressed
//! first octet carries the packet type in its top bits and a change mask in
//! the low bits; each changed field follows as a one-byte delta, or as
//! three bytes (`0x00`, high, low) for zero and values above 255.
//!
//! Conversations are identified by a connection id in `0..max_slots`. The
//! transmitter keeps its slots in least-recently-used order and re-keys the
//! oldest slot when a new conversation appears, announcing the assignment
//! with an uncompressed packet whose IP protocol octet is replaced by the
//! connection id. The receiver holds the peer's slots in a plain array.
//!
//! A receive error poisons the decompressor: everything is tossed until
//! the next uncompressed packet resynchronizes the slot state.
#[cfg(test)]
mod tests;

use alloc::vec::Vec;

use crate::storage::pbuf::{Handle, Pool};
use crate::wire::ip::checksum;
use crate::wire::{
    ipv4_packet, tcp_packet, IpProtocol, TcpFlags, IPV4_HEADER_LEN, TCP_HEADER_LEN,
};

/// Largest IP+TCP header a slot can hold.
pub const MAX_HDR: usize = 128;

/// Fewest slots a codec can run with.
pub const MIN_SLOTS: u8 = 3;

/// What a packet turned into, or arrived as. The serial framing carries
/// this tag out of band (e.g. as the PPP protocol number).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    /// An ordinary IP packet, not eligible for compression.
    Ip,
    /// A TCP packet with the protocol octet replaced by a connection id,
    /// synchronizing the receiver's slot.
    UncompressedTcp,
    /// A compressed TCP packet.
    CompressedTcp,
    /// A damaged packet.
    Error,
}

impl PacketType {
    /// The classic type code, sharing a nibble with the IP version.
    pub fn code(self) -> u8 {
        match self {
            PacketType::Ip => 0x40,
            PacketType::UncompressedTcp => 0x70,
            PacketType::CompressedTcp => 0x80,
            PacketType::Error => 0x00,
        }
    }
}

/// Change mask bits of the compressed first octet.
const NEW_C: u8 = 0x40;
const NEW_I: u8 = 0x20;
const NEW_S: u8 = 0x08;
const NEW_A: u8 = 0x04;
const NEW_W: u8 = 0x02;
const NEW_U: u8 = 0x01;

/// Echoed interactive traffic: ack and seq advanced by the data length.
const SPECIAL_I: u8 = NEW_S | NEW_W | NEW_U;
/// Unidirectional data: seq advanced by the data length.
const SPECIAL_D: u8 = NEW_S | NEW_A | NEW_W | NEW_U;
const SPECIALS_MASK: u8 = NEW_S | NEW_A | NEW_W | NEW_U;

/// The TCP PUSH bit travels in the low nibble of the first octet.
const TCP_PUSH_BIT: u8 = 0x10;

/// Saved conversation state: the last IP+TCP header seen.
#[derive(Clone)]
struct CState {
    /// Next state in LRU order (transmit side only).
    next: u8,
    /// Connection id assigned to this slot.
    id: u8,
    /// Length of the saved header; `0` marks a slot never synchronized.
    hlen: u16,
    hdr: [u8; MAX_HDR],
}

impl CState {
    fn fresh(id: u8) -> CState {
        CState {
            next: 0,
            id,
            hlen: 0,
            hdr: [0; MAX_HDR],
        }
    }

    fn ip_hlen(&self) -> usize {
        (self.hdr[0] & 0x0f) as usize * 4
    }
}

/// The urgent, window, ack, seq and ip-id deltas of one packet, in
/// transmission order.
struct DeltaBuf {
    bytes: [u8; 16],
    len: usize,
}

impl DeltaBuf {
    fn new() -> DeltaBuf {
        DeltaBuf { bytes: [0; 16], len: 0 }
    }

    /// Append one delta. Values `1..=255` take one byte; zero (when the
    /// escape is allowed) and larger values take `0x00` plus two bytes.
    fn encode(&mut self, value: u16, zero_escape: bool) {
        if value >= 256 || (zero_escape && value == 0) {
            self.bytes[self.len] = 0;
            self.bytes[self.len + 1] = (value >> 8) as u8;
            self.bytes[self.len + 2] = value as u8;
            self.len += 3;
        } else {
            self.bytes[self.len] = value as u8;
            self.len += 1;
        }
    }

    fn clear(&mut self) {
        self.len = 0;
    }

    fn as_slice(&self) -> &[u8] {
        &self.bytes[..self.len]
    }
}

/// Event counters, exposed for diagnostics.
#[derive(Debug, Default, Clone, Copy)]
pub struct Stats {
    /// Outbound packets offered to the compressor.
    pub packets: u32,
    /// Outbound packets sent compressed.
    pub compressed: u32,
    /// Slot searches beyond the most recent conversation.
    pub searches: u32,
    /// Searches that found no slot.
    pub misses: u32,
    /// Inbound uncompressed packets.
    pub uncompressed_in: u32,
    /// Inbound compressed packets.
    pub compressed_in: u32,
    /// Inbound packets of unknown shape.
    pub error_in: u32,
    /// Inbound packets tossed while desynchronized.
    pub tossed: u32,
}

/// Compressor and decompressor state for one serial line.
pub struct Vj {
    /// Transmit conversation states, circularly linked in LRU order;
    /// `last_cs` names the oldest, whose `next` is the newest.
    tstate: Vec<CState>,
    /// Receive conversation states, indexed by connection id.
    rstate: Vec<CState>,
    last_cs: u8,
    last_xmit: u8,
    last_recv: u8,
    /// Tossing inbound packets until an uncompressed packet resyncs.
    toss: bool,
    /// Whether the peer accepts packets without a connection id octet.
    pub compress_slot: bool,
    /// Event counters.
    pub stats: Stats,
}

impl Vj {
    /// Create codec state for one line with `max_slots` conversation
    /// slots.
    ///
    /// # Panics
    /// Panics if `max_slots` is below [`MIN_SLOTS`].
    pub fn new(max_slots: u8) -> Vj {
        assert!(max_slots >= MIN_SLOTS);
        let mut tstate: Vec<CState> =
            (0..max_slots).map(CState::fresh).collect();
        for (i, state) in tstate.iter_mut().enumerate() {
            state.next = if i == 0 { max_slots - 1 } else { i as u8 - 1 };
        }
        let rstate = (0..max_slots).map(CState::fresh).collect();
        Vj {
            tstate,
            rstate,
            last_cs: 0,
            last_xmit: 255,
            last_recv: 255,
            toss: false,
            compress_slot: false,
            stats: Stats::default(),
        }
    }

    fn max_slots(&self) -> u8 {
        self.tstate.len() as u8
    }

    /// Compress one outbound TCP/IPv4 packet in place.
    ///
    /// The first node of the chain must hold the whole IP+TCP header.
    /// Returns the type the framing must announce. For
    /// [`PacketType::CompressedTcp`] and [`PacketType::UncompressedTcp`]
    /// the chain has been rewritten; for [`PacketType::Ip`] it is
    /// untouched.
    pub fn compress(&mut self, pool: &mut Pool, packet: Handle) -> PacketType {
        self.stats.packets += 1;

        let (hlen, ip_hlen) = {
            let data = pool.payload(packet);
            let header = match ipv4_packet::new_checked(data) {
                Ok(header) if header.version() == 4 => header,
                _ => return PacketType::Ip,
            };
            if header.protocol() != IpProtocol::Tcp
                || header.flags_and_fragment_offset() & 0x3fff != 0
            {
                return PacketType::Ip;
            }
            let ip_hlen = header.header_len() as usize;
            let segment = match tcp_packet::new_checked(&data[ip_hlen..]) {
                Ok(segment) => segment,
                Err(_) => return PacketType::Ip,
            };
            // Only pure data/ack segments are worth a slot.
            if segment.flags() & (TcpFlags::SYN | TcpFlags::FIN | TcpFlags::RST | TcpFlags::ACK)
                != TcpFlags::ACK
            {
                return PacketType::Ip;
            }
            let hlen = ip_hlen + segment.header_len() as usize;
            if hlen > MAX_HDR || data.len() < hlen {
                return PacketType::Ip;
            }
            (hlen, ip_hlen)
        };

        let slot = match self.find_slot(pool, packet, ip_hlen) {
            Ok(slot) => slot,
            Err(slot) => {
                // New conversation in a re-keyed slot.
                return self.send_uncompressed(pool, packet, slot, hlen);
            }
        };

        self.compress_against(pool, packet, slot, hlen, ip_hlen)
    }

    /// Locate the slot of this conversation, `Err` with the re-keyed LRU
    /// slot on a miss. Keeps the transmit list in LRU order.
    fn find_slot(&mut self, pool: &Pool, packet: Handle, ip_hlen: usize)
        -> core::result::Result<u8, u8>
    {
        let matches = |state: &CState| {
            let data = pool.payload(packet);
            state.hlen != 0
                && state.ip_hlen() == ip_hlen
                && state.hdr[12..20] == data[12..20]
                && state.hdr[ip_hlen..ip_hlen + 4] == data[ip_hlen..ip_hlen + 4]
        };

        let lru = self.last_cs;
        let newest = self.tstate[lru as usize].next;
        if matches(&self.tstate[newest as usize]) {
            return Ok(newest);
        }

        self.stats.searches += 1;
        let mut prev = newest;
        loop {
            let current = self.tstate[prev as usize].next;
            if matches(&self.tstate[current as usize]) {
                if current == lru {
                    // The oldest becomes the newest by moving the end
                    // marker back one.
                    self.last_cs = prev;
                } else {
                    self.tstate[prev as usize].next =
                        self.tstate[current as usize].next;
                    self.tstate[current as usize].next =
                        self.tstate[lru as usize].next;
                    self.tstate[lru as usize].next = current;
                }
                return Ok(current);
            }
            if current == lru {
                break;
            }
            prev = current;
        }

        // Re-key the oldest slot; the circular order makes it the newest.
        self.stats.misses += 1;
        let slot = self.last_cs;
        self.last_cs = prev;
        Err(slot)
    }

    /// Announce a (re-)keyed slot: save the header and replace the
    /// protocol octet with the connection id.
    fn send_uncompressed(&mut self, pool: &mut Pool, packet: Handle,
        slot: u8, hlen: usize) -> PacketType
    {
        let id = self.tstate[slot as usize].id;
        {
            let data = pool.payload_mut(packet);
            let state = &mut self.tstate[slot as usize];
            state.hlen = hlen as u16;
            state.hdr[..hlen].copy_from_slice(&data[..hlen]);
            ipv4_packet::new_unchecked_mut(data).set_protocol_raw(id);
        }
        self.last_xmit = id;
        PacketType::UncompressedTcp
    }

    fn compress_against(&mut self, pool: &mut Pool, packet: Handle,
        slot: u8, hlen: usize, ip_hlen: usize) -> PacketType
    {
        let mut deltas = DeltaBuf::new();
        let mut changes = 0u8;

        let tcp_chksum = {
            let data = pool.payload(packet);
            let state = &self.tstate[slot as usize];
            let saved_ip = ipv4_packet::new_unchecked(&state.hdr[..state.hlen as usize]);
            let saved_tcp = tcp_packet::new_unchecked(
                &state.hdr[ip_hlen..state.hlen as usize]);
            let ip = ipv4_packet::new_unchecked(&data[..hlen]);
            let tcp = tcp_packet::new_unchecked(&data[ip_hlen..hlen]);

            // Any change outside the predicted fields sends the packet
            // uncompressed: the first two octets, the fragment word, the
            // TTL/protocol pair, and all options.
            if data[0..2] != state.hdr[0..2]
                || data[6..8] != state.hdr[6..8]
                || data[8..10] != state.hdr[8..10]
                || tcp.header_len() != saved_tcp.header_len()
                || data[20..ip_hlen] != state.hdr[20..ip_hlen]
                || data[ip_hlen + TCP_HEADER_LEN..hlen]
                    != state.hdr[ip_hlen + TCP_HEADER_LEN..hlen]
            {
                return self.send_uncompressed(pool, packet, slot, hlen);
            }

            if tcp.flags() & TcpFlags::URG != 0 {
                deltas.encode(tcp.urgent_pointer(), true);
                changes |= NEW_U;
            } else if tcp.urgent_pointer() != saved_tcp.urgent_pointer() {
                // An urgent pointer withdrawn without the flag is strange
                // enough to resynchronize.
                return self.send_uncompressed(pool, packet, slot, hlen);
            }

            let win_delta = tcp.window().wrapping_sub(saved_tcp.window());
            if win_delta != 0 {
                deltas.encode(win_delta, false);
                changes |= NEW_W;
            }

            let ack_delta = tcp.ack_number().wrapping_sub(saved_tcp.ack_number());
            if ack_delta != 0 {
                if ack_delta > 0xffff {
                    return self.send_uncompressed(pool, packet, slot, hlen);
                }
                deltas.encode(ack_delta as u16, false);
                changes |= NEW_A;
            }

            let seq_delta = tcp.seq_number().wrapping_sub(saved_tcp.seq_number());
            if seq_delta != 0 {
                if seq_delta > 0xffff {
                    return self.send_uncompressed(pool, packet, slot, hlen);
                }
                deltas.encode(seq_delta as u16, false);
                changes |= NEW_S;
            }

            let saved_data_len =
                (saved_ip.total_len() as usize).saturating_sub(hlen);
            match changes {
                0 => {
                    // A length-only change after a header-only packet is a
                    // plain data packet; anything else looks like a
                    // retransmission.
                    if !(ip.total_len() != saved_ip.total_len()
                        && saved_data_len == 0)
                    {
                        return self.send_uncompressed(pool, packet, slot, hlen);
                    }
                }
                SPECIAL_I | SPECIAL_D => {
                    // The actual changes collide with a reserved pattern.
                    return self.send_uncompressed(pool, packet, slot, hlen);
                }
                _ if changes == NEW_S | NEW_A => {
                    if seq_delta == ack_delta
                        && seq_delta as usize == saved_data_len
                    {
                        // Echoed interactive traffic.
                        changes = SPECIAL_I;
                        deltas.clear();
                    }
                }
                NEW_S => {
                    if seq_delta as usize == saved_data_len {
                        // Unidirectional data transfer.
                        changes = SPECIAL_D;
                        deltas.clear();
                    }
                }
                _ => {}
            }

            let id_delta = ip.ident().wrapping_sub(saved_ip.ident());
            if id_delta != 1 {
                deltas.encode(id_delta, true);
                changes |= NEW_I;
            }
            if tcp.flags() & TcpFlags::PSH != 0 {
                changes |= TCP_PUSH_BIT;
            }

            tcp.checksum()
        };

        // Remember this packet as the new conversation state.
        {
            let data = pool.payload(packet);
            let state = &mut self.tstate[slot as usize];
            state.hlen = hlen as u16;
            state.hdr[..hlen].copy_from_slice(&data[..hlen]);
        }

        let id = self.tstate[slot as usize].id;
        let with_cid = !self.compress_slot || self.last_xmit != id;
        let compressed_len = deltas.len + if with_cid { 4 } else { 3 };
        if pool.remove_header(packet, hlen - compressed_len).is_err() {
            // The compressed form never outgrows the original header; if
            // it somehow would, the intact packet still is plain IP.
            return PacketType::Ip;
        }

        let data = pool.payload_mut(packet);
        let mut cursor = 0;
        if with_cid {
            self.last_xmit = id;
            data[cursor] = changes | NEW_C;
            data[cursor + 1] = id;
            cursor += 2;
        } else {
            data[cursor] = changes;
            cursor += 1;
        }
        data[cursor] = (tcp_chksum >> 8) as u8;
        data[cursor + 1] = tcp_chksum as u8;
        cursor += 2;
        data[cursor..cursor + deltas.len].copy_from_slice(deltas.as_slice());

        self.stats.compressed += 1;
        PacketType::CompressedTcp
    }

    /// Note an input error on the line; inbound packets are tossed until
    /// the next uncompressed packet.
    pub fn uncompress_err(&mut self) {
        self.toss = true;
        self.stats.error_in += 1;
    }

    /// Accept an inbound uncompressed packet, resynchronizing the slot it
    /// names. Restores the protocol octet in place.
    pub fn uncompress_uncomp(&mut self, pool: &mut Pool, packet: Handle)
        -> core::result::Result<(), ()>
    {
        let data = pool.payload_mut(packet);
        let ok = data.len() >= IPV4_HEADER_LEN && {
            let ip_hlen = (data[0] & 0x0f) as usize * 4;
            let id = data[9];
            ip_hlen >= IPV4_HEADER_LEN
                && (id as usize) < self.rstate.len()
                && data.len() >= ip_hlen + TCP_HEADER_LEN
                && {
                    let tcp_hlen = (data[ip_hlen + 12] >> 4) as usize * 4;
                    let hlen = ip_hlen + tcp_hlen;
                    tcp_hlen >= TCP_HEADER_LEN
                        && hlen <= MAX_HDR
                        && data.len() >= hlen
                }
        };
        if !ok {
            net_debug!("vj: malformed uncompressed packet");
            self.uncompress_err();
            return Err(());
        }

        let ip_hlen = (data[0] & 0x0f) as usize * 4;
        let tcp_hlen = (data[ip_hlen + 12] >> 4) as usize * 4;
        let hlen = ip_hlen + tcp_hlen;
        let id = data[9];

        self.last_recv = id;
        self.toss = false;
        ipv4_packet::new_unchecked_mut(data).set_protocol(IpProtocol::Tcp);
        let state = &mut self.rstate[id as usize];
        state.hlen = hlen as u16;
        state.hdr[..hlen].copy_from_slice(&data[..hlen]);

        self.stats.uncompressed_in += 1;
        Ok(())
    }

    /// Expand an inbound compressed packet in place.
    ///
    /// The compressed header is consumed from the front of the chain and
    /// the reconstructed IP+TCP header grown in its place; the first node
    /// needs headroom for the difference. Failure tosses the line state.
    pub fn uncompress_tcp(&mut self, pool: &mut Pool, packet: Handle)
        -> core::result::Result<(), ()>
    {
        let max_slots = self.max_slots();
        let vjlen = {
            let data = pool.payload(packet);
            let mut reader = Reader { data, pos: 0 };

            let changes = match reader.u8() {
                Some(changes) => changes,
                None => return self.toss_bad(),
            };
            if changes & NEW_C != 0 {
                match reader.u8() {
                    Some(id) if id < max_slots => {
                        self.toss = false;
                        self.last_recv = id;
                    }
                    _ => return self.toss_bad(),
                }
            } else if self.toss || self.last_recv >= max_slots {
                // Still desynchronized; drop silently.
                self.stats.tossed += 1;
                return Err(());
            }
            let chksum = match reader.u16() {
                Some(chksum) => chksum,
                None => return self.toss_bad(),
            };

            let state = &mut self.rstate[self.last_recv as usize];
            if state.hlen == 0 {
                return self.toss_bad();
            }
            let hlen = state.hlen as usize;
            let ip_hlen = state.ip_hlen();
            let (ip_bytes, tcp_bytes) = state.hdr[..hlen].split_at_mut(ip_hlen);
            let ip = ipv4_packet::new_unchecked_mut(ip_bytes);
            let tcp = tcp_packet::new_unchecked_mut(tcp_bytes);

            tcp.set_checksum(chksum);
            if changes & TCP_PUSH_BIT != 0 {
                tcp.set_flags(tcp.flags() | TcpFlags::PSH);
            } else {
                tcp.set_flags(tcp.flags() & !TcpFlags::PSH);
            }

            let saved_data_len =
                (ip.total_len() as usize).saturating_sub(hlen) as u32;
            match changes & SPECIALS_MASK {
                SPECIAL_I => {
                    tcp.set_ack_number(tcp.ack_number().wrapping_add(saved_data_len));
                    tcp.set_seq_number(tcp.seq_number().wrapping_add(saved_data_len));
                }
                SPECIAL_D => {
                    tcp.set_seq_number(tcp.seq_number().wrapping_add(saved_data_len));
                }
                _ => {
                    if changes & NEW_U != 0 {
                        tcp.set_flags(tcp.flags() | TcpFlags::URG);
                        match reader.decode() {
                            Some(urgent) => tcp.set_urgent_pointer(urgent),
                            None => return self.toss_bad(),
                        }
                    } else {
                        tcp.set_flags(tcp.flags() & !TcpFlags::URG);
                    }
                    if changes & NEW_W != 0 {
                        match reader.decode() {
                            Some(delta) =>
                                tcp.set_window(tcp.window().wrapping_add(delta)),
                            None => return self.toss_bad(),
                        }
                    }
                    if changes & NEW_A != 0 {
                        match reader.decode() {
                            Some(delta) => tcp.set_ack_number(
                                tcp.ack_number().wrapping_add(delta as u32)),
                            None => return self.toss_bad(),
                        }
                    }
                    if changes & NEW_S != 0 {
                        match reader.decode() {
                            Some(delta) => tcp.set_seq_number(
                                tcp.seq_number().wrapping_add(delta as u32)),
                            None => return self.toss_bad(),
                        }
                    }
                }
            }

            if changes & NEW_I != 0 {
                match reader.decode() {
                    Some(delta) =>
                        ip.set_ident(ip.ident().wrapping_add(delta)),
                    None => return self.toss_bad(),
                }
            } else {
                ip.set_ident(ip.ident().wrapping_add(1));
            }

            reader.pos
        };

        // Swap the compressed header for the reconstructed one.
        let hlen = self.rstate[self.last_recv as usize].hlen as usize;
        let new_total = pool.tot_len(packet) - vjlen + hlen;
        if pool.remove_header(packet, vjlen).is_err() {
            return self.toss_bad();
        }
        if pool.add_header(packet, hlen).is_err() {
            net_debug!("vj: no headroom to reconstruct header");
            return self.toss_bad();
        }

        {
            let state = &mut self.rstate[self.last_recv as usize];
            let ip_hlen = state.ip_hlen();
            {
                let ip = ipv4_packet::new_unchecked_mut(&mut state.hdr[..hlen]);
                ip.set_total_len(new_total as u16);
                ip.set_checksum(0);
            }
            // The IP checksum is not transmitted; regenerate it.
            let sum = !checksum::data(&state.hdr[..ip_hlen]);
            ipv4_packet::new_unchecked_mut(&mut state.hdr[..hlen]).set_checksum(sum);
        }
        pool.payload_mut(packet)[..hlen]
            .copy_from_slice(&self.rstate[self.last_recv as usize].hdr[..hlen]);

        self.stats.compressed_in += 1;
        Ok(())
    }

    fn toss_bad(&mut self) -> core::result::Result<(), ()> {
        net_debug!("vj: bad compressed packet");
        self.uncompress_err();
        Err(())
    }
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl Reader<'_> {
    fn u8(&mut self) -> Option<u8> {
        let value = *self.data.get(self.pos)?;
        self.pos += 1;
        Some(value)
    }

    fn u16(&mut self) -> Option<u16> {
        let hi = self.u8()? as u16;
        let lo = self.u8()? as u16;
        Some(hi << 8 | lo)
    }

    /// One delta: a single nonzero byte, or `0x00` followed by two bytes
    /// for zero and values above 255.
    fn decode(&mut self) -> Option<u16> {
        match self.u8()? {
            0 => self.u16(),
            value => Some(value as u16),
        }
    }
}
