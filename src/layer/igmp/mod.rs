//! IGMPv2 group membership, per interface.
//!
//! Every IGMP-capable interface carries a list of joined groups whose first
//! element is always the all-systems group `224.0.0.1`, installed by
//! [`Igmp::start`] and never removed while the interface participates.
//! Reports are delayed by a randomized timer so that one member's report
//! suppresses the others'; [`Igmp::tick`] advances those timers and must be
//! called every [`TMR_INTERVAL_MS`] milliseconds. Missing ticks delays
//! reports but never corrupts state.
//!
//! Outbound messages carry the IP Router Alert option and a TTL of 1.

use alloc::boxed::Box;
use alloc::vec::Vec;

use rand_core::RngCore;

use crate::{Error, Result};
use crate::iface::{ClientData, FilterAction, Interfaces};
use crate::layer::ip::{self, RxInfo};
use crate::storage::pbuf::{Handle, Kind, Layer, Pool};
use crate::wire::{
    igmp_packet, IgmpMessageType, IpAddress, IpProtocol, Ipv4Address, IgmpRepr,
    IGMP_MESSAGE_LEN,
};

/// Expected period of [`Igmp::tick`], in milliseconds.
pub const TMR_INTERVAL_MS: u32 = 100;

/// Delay ceiling, in ticks, for the unsolicited report after a join.
pub const JOIN_DELAYING_MEMBER_TMR: u8 = 5;

/// Delay ceiling, in ticks, substituted for an IGMPv1 query's zero
/// maximum response time.
pub const V1_DELAYING_MEMBER_TMR: u8 = 100;

/// Time to live of every outbound IGMP message.
pub const TTL: u8 = 1;

/// The all-systems group every member host listens to.
pub const ALL_SYSTEMS: Ipv4Address = Ipv4Address::new(224, 0, 0, 1);

/// The all-routers group that leave messages go to.
pub const ALL_ROUTERS: Ipv4Address = Ipv4Address::new(224, 0, 0, 2);

/// The IPv4 Router Alert option carried by every outbound message.
const ROUTER_ALERT: [u8; 4] = [0x94, 0x04, 0x00, 0x00];

/// Membership state of one group on one interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupState {
    /// Freshly created, not yet reported.
    NonMember,
    /// A report for the group is pending on the timer.
    DelayingMember,
    /// Member with no report pending.
    IdleMember,
}

/// One joined group on one interface.
#[derive(Debug, Clone)]
pub struct Group {
    address: Ipv4Address,
    state: GroupState,
    /// Remaining delay in ticks; `0` means stopped.
    timer: u16,
    /// Whether we sent the last report for this group.
    last_reporter: bool,
    /// Join refcount.
    use_count: u16,
    next: Option<u16>,
}

impl Group {
    /// The group address.
    pub fn address(&self) -> Ipv4Address {
        self.address
    }

    /// The membership state.
    pub fn state(&self) -> GroupState {
        self.state
    }

    /// The join refcount.
    pub fn use_count(&self) -> u16 {
        self.use_count
    }

    /// The remaining report delay in ticks.
    pub fn timer(&self) -> u16 {
        self.timer
    }
}

/// Event counters, exposed for diagnostics.
#[derive(Debug, Default, Clone, Copy)]
pub struct Stats {
    /// Messages accepted for processing.
    pub recv: u32,
    /// Messages handed to IP output.
    pub xmit: u32,
    /// Messages dropped, all causes.
    pub drop: u32,
    /// Messages shorter than the IGMP header.
    pub lenerr: u32,
    /// Checksum failures.
    pub chkerr: u32,
    /// Messages with a contradictory type or group field.
    pub proterr: u32,
    /// General queries received.
    pub rx_general: u32,
    /// Group-specific queries received.
    pub rx_group: u32,
    /// Reports received.
    pub rx_report: u32,
    /// IGMPv1 queries received.
    pub rx_v1: u32,
    /// Unsolicited reports sent on join.
    pub tx_join: u32,
    /// Leave messages sent.
    pub tx_leave: u32,
    /// Timer-driven reports sent.
    pub tx_report: u32,
}

/// The IGMP module handle.
pub struct Igmp {
    groups: Vec<Option<Group>>,
    free: Vec<u16>,
    rng: Box<dyn RngCore>,
    /// Event counters.
    pub stats: Stats,
}

impl Igmp {
    /// Create the module. The randomness spreads report timers so group
    /// members do not answer queries in lockstep.
    pub fn new(rng: Box<dyn RngCore>) -> Igmp {
        Igmp {
            groups: Vec::new(),
            free: Vec::new(),
            rng,
            stats: Stats::default(),
        }
    }

    fn group(&self, handle: u16) -> &Group {
        self.groups[handle as usize].as_ref().expect("stale group handle")
    }

    fn group_mut(&mut self, handle: u16) -> &mut Group {
        self.groups[handle as usize].as_mut().expect("stale group handle")
    }

    fn head(&self, ifaces: &Interfaces, netif: u8) -> Option<u16> {
        ifaces.get(netif)?
            .client_data(ClientData::Igmp)
            .map(|head| head as u16)
    }

    /// Start IGMP processing on an interface: create the all-systems
    /// group and open the MAC filter for it.
    pub fn start(&mut self, ifaces: &mut Interfaces, netif: u8) -> Result<()> {
        let handle = self.lookup_group(ifaces, netif, &ALL_SYSTEMS)?;
        {
            let group = self.group_mut(handle);
            group.state = GroupState::IdleMember;
            group.use_count += 1;
        }
        ifaces.get_mut(netif).ok_or(Error::InvalidArg)?
            .update_mac_filter(ALL_SYSTEMS, FilterAction::Add)
    }

    /// Stop IGMP processing: drop every group and close its MAC filter.
    pub fn stop(&mut self, ifaces: &mut Interfaces, netif: u8) -> Result<()> {
        let mut cursor = self.head(ifaces, netif);
        let inp = ifaces.get_mut(netif).ok_or(Error::InvalidArg)?;
        inp.set_client_data(ClientData::Igmp, None);
        while let Some(handle) = cursor {
            let address = self.group(handle).address;
            let _ = inp.update_mac_filter(address, FilterAction::Delete);
            cursor = self.release(handle);
        }
        Ok(())
    }

    /// Queue delayed reports for every membership on the interface, e.g.
    /// after the link came back up. The all-systems group stays silent.
    pub fn report_groups(&mut self, ifaces: &Interfaces, netif: u8) {
        let mut cursor = self.head(ifaces, netif)
            .and_then(|head| self.group(head).next);
        while let Some(handle) = cursor {
            self.delaying_member(handle, JOIN_DELAYING_MEMBER_TMR);
            cursor = self.group(handle).next;
        }
    }

    /// Find a group record on the interface.
    pub fn lookfor_group(&self, ifaces: &Interfaces, netif: u8, addr: &Ipv4Address)
        -> Option<u16>
    {
        let mut cursor = self.head(ifaces, netif);
        while let Some(handle) = cursor {
            let group = self.group(handle);
            if group.address == *addr {
                return Some(handle);
            }
            cursor = group.next;
        }
        None
    }

    /// Borrow a group record.
    pub fn group_ref(&self, handle: u16) -> Option<&Group> {
        self.groups.get(handle as usize)?.as_ref()
    }

    /// Find or create a group record, keeping the all-systems group first.
    fn lookup_group(&mut self, ifaces: &mut Interfaces, netif: u8, addr: &Ipv4Address)
        -> Result<u16>
    {
        if let Some(handle) = self.lookfor_group(ifaces, netif, addr) {
            return Ok(handle);
        }
        let head = self.head(ifaces, netif);
        let group = Group {
            address: *addr,
            state: GroupState::NonMember,
            timer: 0,
            last_reporter: false,
            use_count: 0,
            next: None,
        };
        let handle = self.insert(group)?;
        match head {
            None => {
                // The first record of a list is the all-systems group.
                debug_assert_eq!(*addr, ALL_SYSTEMS);
                ifaces.get_mut(netif).ok_or(Error::InvalidArg)?
                    .set_client_data(ClientData::Igmp, Some(handle as usize));
            }
            Some(head) => {
                debug_assert_ne!(*addr, ALL_SYSTEMS);
                let second = self.group(head).next;
                self.group_mut(handle).next = second;
                self.group_mut(head).next = Some(handle);
            }
        }
        Ok(handle)
    }

    fn insert(&mut self, group: Group) -> Result<u16> {
        if let Some(idx) = self.free.pop() {
            self.groups[idx as usize] = Some(group);
            return Ok(idx);
        }
        let idx = self.groups.len();
        if idx > u16::MAX as usize {
            return Err(Error::NoMem);
        }
        self.groups.push(Some(group));
        Ok(idx as u16)
    }

    fn release(&mut self, handle: u16) -> Option<u16> {
        let group = self.groups[handle as usize].take().expect("stale group handle");
        self.free.push(handle);
        group.next
    }

    /// Unlink a group from its interface list. The all-systems head is
    /// never unlinked.
    fn unlink(&mut self, ifaces: &Interfaces, netif: u8, handle: u16) -> Result<()> {
        let mut cursor = self.head(ifaces, netif);
        while let Some(current) = cursor {
            let next = self.group(current).next;
            if next == Some(handle) {
                self.group_mut(current).next = self.group(handle).next;
                return Ok(());
            }
            cursor = next;
        }
        Err(Error::InvalidArg)
    }

    /// Join a group on an interface.
    ///
    /// The first join creates the record, opens the MAC filter and sends
    /// an unsolicited report; later joins only increment the refcount. A
    /// failing MAC filter install backs the join out.
    pub fn join(
        &mut self,
        pool: &mut Pool,
        ifaces: &mut Interfaces,
        netif: u8,
        addr: &Ipv4Address,
    ) -> Result<()> {
        if !addr.is_multicast() {
            return Err(Error::InvalidArg);
        }
        if !ifaces.get(netif).ok_or(Error::InvalidArg)?.igmp_capable {
            return Err(Error::InvalidArg);
        }

        let handle = self.lookup_group(ifaces, netif, addr)?;
        if self.group(handle).state == GroupState::NonMember {
            if self.group(handle).use_count == 0 {
                let filter = ifaces.get_mut(netif).ok_or(Error::InvalidArg)?
                    .update_mac_filter(*addr, FilterAction::Add);
                if let Err(err) = filter {
                    self.unlink(ifaces, netif, handle)?;
                    self.release(handle);
                    return Err(err);
                }
            }

            self.stats.tx_join += 1;
            self.send(pool, ifaces, netif, handle, IgmpMessageType::V2MembershipReport);
            self.start_timer(handle, JOIN_DELAYING_MEMBER_TMR);
            self.group_mut(handle).state = GroupState::DelayingMember;
        }
        self.group_mut(handle).use_count += 1;
        Ok(())
    }

    /// Leave a group on an interface.
    ///
    /// Only the last leaver tears the group down: a leave message is sent
    /// if we were the last reporter, the MAC filter is closed and the
    /// record released. Leaving a group that was never joined is an error.
    pub fn leave(
        &mut self,
        pool: &mut Pool,
        ifaces: &mut Interfaces,
        netif: u8,
        addr: &Ipv4Address,
    ) -> Result<()> {
        if !addr.is_multicast() {
            return Err(Error::InvalidArg);
        }
        if !ifaces.get(netif).ok_or(Error::InvalidArg)?.igmp_capable {
            return Err(Error::InvalidArg);
        }

        let handle = match self.lookfor_group(ifaces, netif, addr) {
            Some(handle) => handle,
            None => {
                net_debug!("igmp: leave for a group we are not member of");
                return Err(Error::InvalidArg);
            }
        };

        if self.group(handle).use_count > 1 {
            self.group_mut(handle).use_count -= 1;
            return Ok(());
        }

        self.unlink(ifaces, netif, handle)?;
        if self.group(handle).last_reporter {
            self.stats.tx_leave += 1;
            self.send(pool, ifaces, netif, handle, IgmpMessageType::LeaveGroup);
        }
        let _ = ifaces.get_mut(netif).ok_or(Error::InvalidArg)?
            .update_mac_filter(*addr, FilterAction::Delete);
        self.release(handle);
        Ok(())
    }

    /// Process a received IGMP message. Always consumes the chain.
    pub fn input(
        &mut self,
        pool: &mut Pool,
        ifaces: &mut Interfaces,
        packet: Handle,
        info: &RxInfo,
    ) {
        self.stats.recv += 1;

        // The message may be longer than eight octets; whatever arrived in
        // the first node is covered by the checksum.
        if pool.len(packet) < IGMP_MESSAGE_LEN {
            net_debug!("igmp: length error");
            self.stats.lenerr += 1;
            pool.free(packet);
            return;
        }

        let dest = match info.dst {
            IpAddress::Ipv4(dest) => dest,
            _ => {
                self.stats.proterr += 1;
                pool.free(packet);
                return;
            }
        };

        let (msg_type, mut max_resp, group_field) = {
            let message = igmp_packet::new_unchecked(pool.payload(packet));
            if !message.verify_checksum() {
                net_debug!("igmp: checksum error");
                self.stats.chkerr += 1;
                pool.free(packet);
                return;
            }
            (message.msg_type(), message.max_resp(), message.group_addr())
        };

        let group = match self.lookfor_group(ifaces, info.netif, &dest) {
            Some(group) => group,
            None => {
                net_debug!("igmp: frame not for us");
                self.stats.drop += 1;
                pool.free(packet);
                return;
            }
        };

        match msg_type {
            IgmpMessageType::MembershipQuery => {
                if dest == ALL_SYSTEMS && group_field.is_unspecified() {
                    // General query: every membership except the
                    // all-systems group answers.
                    if max_resp == 0 {
                        // An IGMPv1 router leaves the field zero.
                        self.stats.rx_v1 += 1;
                        max_resp = V1_DELAYING_MEMBER_TMR;
                    } else {
                        self.stats.rx_general += 1;
                    }

                    let mut cursor = self.head(ifaces, info.netif)
                        .and_then(|head| self.group(head).next);
                    while let Some(handle) = cursor {
                        self.delaying_member(handle, max_resp);
                        cursor = self.group(handle).next;
                    }
                } else if !group_field.is_unspecified() {
                    let target = if dest == ALL_SYSTEMS {
                        // Group-specific query via the all-systems address.
                        self.lookfor_group(ifaces, info.netif, &group_field)
                    } else {
                        Some(group)
                    };
                    match target {
                        Some(handle) => {
                            self.stats.rx_group += 1;
                            self.delaying_member(handle, max_resp);
                        }
                        None => self.stats.drop += 1,
                    }
                } else {
                    self.stats.proterr += 1;
                }
            }
            IgmpMessageType::V2MembershipReport => {
                self.stats.rx_report += 1;
                let record = self.group_mut(group);
                if record.state == GroupState::DelayingMember {
                    // Another member reported first; ours is suppressed.
                    record.timer = 0;
                    record.state = GroupState::IdleMember;
                    record.last_reporter = false;
                }
            }
            _ => {
                self.stats.proterr += 1;
            }
        }

        pool.free(packet);
    }

    /// Advance all report timers by one 100 ms tick.
    pub fn tick(&mut self, pool: &mut Pool, ifaces: &mut Interfaces) {
        let netifs: Vec<u8> = ifaces.iter().map(|netif| netif.index()).collect();
        for netif in netifs {
            let mut cursor = self.head(ifaces, netif);
            while let Some(handle) = cursor {
                cursor = self.group(handle).next;
                let group = self.group_mut(handle);
                if group.timer > 0 {
                    group.timer -= 1;
                    if group.timer == 0 {
                        self.timeout(pool, ifaces, netif, handle);
                    }
                }
            }
        }
    }

    /// An expired timer reports the membership, except for all-systems.
    fn timeout(&mut self, pool: &mut Pool, ifaces: &mut Interfaces,
        netif: u8, handle: u16)
    {
        let group = self.group(handle);
        if group.state == GroupState::DelayingMember && group.address != ALL_SYSTEMS {
            self.group_mut(handle).state = GroupState::IdleMember;
            self.stats.tx_report += 1;
            self.send(pool, ifaces, netif, handle, IgmpMessageType::V2MembershipReport);
        }
    }

    /// Arm the report timer with a uniformly random delay in `1..=max`.
    fn start_timer(&mut self, handle: u16, max: u8) {
        let ticks = if max > 2 {
            (self.rng.next_u32() % max as u32) as u16
        } else {
            1
        };
        self.group_mut(handle).timer = ticks.max(1);
    }

    /// Schedule a delayed report if the query deadline beats the current
    /// timer.
    fn delaying_member(&mut self, handle: u16, max_resp: u8) {
        let group = self.group(handle);
        let reschedule = group.state == GroupState::IdleMember
            || (group.state == GroupState::DelayingMember
                && (group.timer == 0 || (max_resp as u16) < group.timer));
        if reschedule {
            self.start_timer(handle, max_resp);
            self.group_mut(handle).state = GroupState::DelayingMember;
        }
    }

    /// Build and transmit one report or leave message.
    fn send(&mut self, pool: &mut Pool, ifaces: &mut Interfaces,
        netif: u8, handle: u16, msg_type: IgmpMessageType)
    {
        let packet = match pool.alloc(Layer::Ip, IGMP_MESSAGE_LEN, Kind::Heap) {
            Some(packet) => packet,
            None => {
                net_debug!("igmp: not enough memory to send");
                self.stats.drop += 1;
                return;
            }
        };

        let group_addr = self.group(handle).address;
        let dest = match msg_type {
            IgmpMessageType::V2MembershipReport => {
                self.group_mut(handle).last_reporter = true;
                group_addr
            }
            IgmpMessageType::LeaveGroup => ALL_ROUTERS,
            _ => {
                pool.free(packet);
                return;
            }
        };

        let repr = IgmpRepr {
            msg_type,
            max_resp: 0,
            group_addr,
        };
        repr.emit(igmp_packet::new_unchecked_mut(pool.payload_mut(packet)));

        let src = ifaces.get(netif).map(|inp| inp.ip4_addr)
            .unwrap_or(Ipv4Address::UNSPECIFIED);
        let sent = ip::output_v4(pool, ifaces, netif, packet, &src, &dest,
            TTL, 0, IpProtocol::Igmp, &ROUTER_ALERT);
        if sent.is_ok() {
            self.stats.xmit += 1;
        }
        pool.free(packet);
    }
}
