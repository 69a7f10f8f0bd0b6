//! The table of logical network interfaces.
//!
//! An interface pairs addressing state with two caller-supplied hooks: the
//! link-layer transmit function and, for multicast-capable hardware, the MAC
//! filter update. Hooks are opaque function-plus-context pairs; the core
//! calls them synchronously and never re-enters itself from them.
//!
//! The table also implements the address selection duties the transport
//! layers depend on: IPv4/IPv6 routing, IPv6 source selection and the
//! RFC 4007 zone selection policy in which the zone of a scoped address is
//! the index of an interface.
use alloc::boxed::Box;
use alloc::vec::Vec;

use crate::{Error, Result};
use crate::storage::pbuf::{Handle, Pool};
use crate::wire::{IpAddress, Ipv4Address, Ipv6Address, Ipv6AddrState, Ipv6ScopeHint};

/// IPv6 address slots per interface.
pub const IP6_ADDRS_PER_NETIF: usize = 3;

/// Period of the external DHCPv6 client timer, in milliseconds.
///
/// The DHCPv6 client itself lives outside the core; it parks its state
/// handle in the [`ClientData::Dhcp6`] slot and expects a tick at this
/// period.
pub const DHCP6_TIMER_MSECS: u32 = 500;

/// Index for "no interface".
pub const NO_INDEX: u8 = 0;

/// Request to a MAC multicast filter hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterAction {
    /// Start passing frames for the group.
    Add,
    /// Stop passing frames for the group.
    Delete,
}

/// The link-layer transmit hook. The packet stays owned by the caller.
pub type TxHook = Box<dyn FnMut(&mut Pool, Handle) -> Result<()>>;

/// The MAC multicast filter hook.
pub type MacFilterHook = Box<dyn FnMut(Ipv4Address, FilterAction) -> Result<()>>;

/// Clients that may park opaque per-interface state on a netif.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientData {
    /// The IGMP group list head.
    Igmp,
    /// The DHCPv6 client state.
    Dhcp6,
}

const CLIENT_DATA_COUNT: usize = 2;

impl ClientData {
    fn index(self) -> usize {
        match self {
            ClientData::Igmp => 0,
            ClientData::Dhcp6 => 1,
        }
    }
}

/// One IPv6 address slot of an interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ip6AddrSlot {
    /// The address, zone included.
    pub addr: Ipv6Address,
    /// Its readiness state.
    pub state: Ipv6AddrState,
    /// Remaining valid lifetime in seconds; `0` means static,
    /// [`crate::wire::IP6_ADDR_LIFE_INFINITE`] means forever.
    pub valid_life: u32,
    /// Remaining preferred lifetime in seconds.
    pub pref_life: u32,
}

impl Default for Ip6AddrSlot {
    fn default() -> Ip6AddrSlot {
        Ip6AddrSlot {
            addr: Ipv6Address::UNSPECIFIED,
            state: Ipv6AddrState::Invalid,
            valid_life: 0,
            pref_life: 0,
        }
    }
}

/// One logical network interface.
pub struct Netif {
    index: u8,
    /// Administratively up and able to process traffic.
    pub up: bool,
    /// Maximum transmission unit of the link.
    pub mtu: u16,
    /// The interface IPv4 address.
    pub ip4_addr: Ipv4Address,
    /// The IPv4 netmask.
    pub ip4_netmask: Ipv4Address,
    /// The IPv4 default gateway reachable through this interface.
    pub ip4_gateway: Ipv4Address,
    /// The link supports broadcast.
    pub broadcast_capable: bool,
    /// The interface participates in IGMP.
    pub igmp_capable: bool,
    /// The link is an Ethernet.
    pub ethernet: bool,
    ip6_addrs: [Ip6AddrSlot; IP6_ADDRS_PER_NETIF],
    tx: Option<TxHook>,
    igmp_filter: Option<MacFilterHook>,
    client_data: [Option<usize>; CLIENT_DATA_COUNT],
}

impl Netif {
    /// A downed interface with no addresses and no hooks.
    pub fn new() -> Netif {
        Netif {
            index: NO_INDEX,
            up: false,
            mtu: 1500,
            ip4_addr: Ipv4Address::UNSPECIFIED,
            ip4_netmask: Ipv4Address::UNSPECIFIED,
            ip4_gateway: Ipv4Address::UNSPECIFIED,
            broadcast_capable: false,
            igmp_capable: false,
            ethernet: false,
            ip6_addrs: [Ip6AddrSlot::default(); IP6_ADDRS_PER_NETIF],
            tx: None,
            igmp_filter: None,
            client_data: [None; CLIENT_DATA_COUNT],
        }
    }

    /// The stable, nonzero index. Zero only before registration.
    pub fn index(&self) -> u8 {
        self.index
    }

    /// Install the transmit hook.
    pub fn set_tx_hook(&mut self, hook: TxHook) {
        self.tx = Some(hook);
    }

    /// Install the MAC multicast filter hook.
    pub fn set_igmp_filter_hook(&mut self, hook: MacFilterHook) {
        self.igmp_filter = Some(hook);
    }

    /// Hand a packet to the link layer. The chain stays owned by the caller.
    pub fn transmit(&mut self, pool: &mut Pool, packet: Handle) -> Result<()> {
        match &mut self.tx {
            Some(tx) => tx(pool, packet),
            None => Err(Error::Routing),
        }
    }

    /// Update the MAC multicast filter, if the interface has one.
    pub fn update_mac_filter(&mut self, group: Ipv4Address, action: FilterAction)
        -> Result<()>
    {
        match &mut self.igmp_filter {
            Some(filter) => filter(group, action),
            None => Ok(()),
        }
    }

    /// The IPv6 address slots.
    pub fn ip6_addrs(&self) -> &[Ip6AddrSlot; IP6_ADDRS_PER_NETIF] {
        &self.ip6_addrs
    }

    /// The IPv6 address slots, mutable.
    pub fn ip6_addrs_mut(&mut self) -> &mut [Ip6AddrSlot; IP6_ADDRS_PER_NETIF] {
        &mut self.ip6_addrs
    }

    /// Install an IPv6 address into a free slot.
    ///
    /// A scoped address is zoned to this interface, upholding the zone
    /// invariant. Returns the slot index.
    pub fn add_ip6_addr(&mut self, addr: Ipv6Address, state: Ipv6AddrState)
        -> Result<usize>
    {
        let mut addr = addr;
        if addr.has_scope(Ipv6ScopeHint::Unknown) {
            addr.set_zone(self.index);
        } else {
            addr.clear_zone();
        }
        let slot = self.ip6_addrs.iter()
            .position(|slot| slot.state.is_invalid())
            .ok_or(Error::NoMem)?;
        self.ip6_addrs[slot] = Ip6AddrSlot {
            addr,
            state,
            valid_life: 0,
            pref_life: 0,
        };
        Ok(slot)
    }

    /// Find the slot holding `addr`, considering only valid states.
    ///
    /// An address without a zone matches a scoped slot address zonelessly,
    /// which is how destinations coming off the wire are looked up before
    /// zone assignment.
    pub fn ip6_addr_match(&self, addr: &Ipv6Address) -> Option<usize> {
        self.ip6_addrs.iter().position(|slot| {
            slot.state.is_valid()
                && slot.addr.eq_zoneless(addr)
                && (!addr.has_zone() || addr.zone() == slot.addr.zone())
        })
    }

    /// Whether the destination is an IPv4 broadcast for this interface:
    /// the limited broadcast, or the directed subnet broadcast when the
    /// link is broadcast capable.
    pub fn is_ip4_broadcast(&self, addr: &Ipv4Address) -> bool {
        if addr.is_broadcast() {
            return true;
        }
        self.broadcast_capable
            && addr.is_subnet_broadcast(&self.ip4_addr, &self.ip4_netmask)
    }

    /// Read a client-data slot.
    pub fn client_data(&self, client: ClientData) -> Option<usize> {
        self.client_data[client.index()]
    }

    /// Write a client-data slot.
    pub fn set_client_data(&mut self, client: ClientData, value: Option<usize>) {
        self.client_data[client.index()] = value;
    }
}

impl Default for Netif {
    fn default() -> Netif {
        Netif::new()
    }
}

/// The process-wide interface table.
pub struct Interfaces {
    netifs: Vec<Netif>,
}

impl Interfaces {
    /// An empty table.
    pub fn new() -> Interfaces {
        Interfaces { netifs: Vec::new() }
    }

    /// Register an interface, assigning its stable index.
    ///
    /// Fails with [`Error::NoMem`] once all 255 indices are taken.
    pub fn add(&mut self, mut netif: Netif) -> Result<u8> {
        let index = self.netifs.len() + 1;
        if index > u8::MAX as usize {
            return Err(Error::NoMem);
        }
        netif.index = index as u8;
        // Zone any scoped address that was configured before registration.
        for slot in netif.ip6_addrs.iter_mut() {
            if slot.addr.has_scope(Ipv6ScopeHint::Unknown) {
                slot.addr.set_zone(index as u8);
            }
        }
        self.netifs.push(netif);
        Ok(index as u8)
    }

    /// Look up an interface by index.
    pub fn get(&self, index: u8) -> Option<&Netif> {
        if index == NO_INDEX {
            return None;
        }
        self.netifs.get(index as usize - 1)
    }

    /// Look up an interface by index, mutable.
    pub fn get_mut(&mut self, index: u8) -> Option<&mut Netif> {
        if index == NO_INDEX {
            return None;
        }
        self.netifs.get_mut(index as usize - 1)
    }

    /// Iterate over all interfaces.
    pub fn iter(&self) -> impl Iterator<Item = &Netif> {
        self.netifs.iter()
    }

    /// Iterate over all interfaces, mutable.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Netif> {
        self.netifs.iter_mut()
    }

    /// Choose the interface to reach `dst`, optionally biased by `src`.
    ///
    /// IPv4: the first up interface whose subnet contains the destination,
    /// else the first up interface with a gateway, else the first up
    /// interface. IPv6: a zoned destination picks its zone's interface; an
    /// unzoned one the first up interface with a matching /64 prefix, then
    /// the first up interface. Returns the interface index.
    pub fn route(&self, src: &IpAddress, dst: &IpAddress) -> Option<u8> {
        match dst {
            IpAddress::Ipv4(dst) => self.route_v4(dst),
            IpAddress::Ipv6(dst) => self.route_v6(src, dst),
            IpAddress::Any => None,
        }
    }

    fn route_v4(&self, dst: &Ipv4Address) -> Option<u8> {
        let up = || self.netifs.iter().filter(|netif| netif.up);
        up().find(|netif| dst.matches_net(&netif.ip4_addr, &netif.ip4_netmask)
                && !netif.ip4_netmask.is_unspecified())
            .or_else(|| up().find(|netif| !netif.ip4_gateway.is_unspecified()))
            .or_else(|| up().next())
            .map(|netif| netif.index)
    }

    fn route_v6(&self, src: &IpAddress, dst: &Ipv6Address) -> Option<u8> {
        if let Some(zone) = dst.zone() {
            return self.get(zone.get()).filter(|netif| netif.up)
                .map(|netif| netif.index);
        }
        if dst.has_scope(Ipv6ScopeHint::Unknown) {
            // An unzoned scoped destination follows the source's zone.
            if let IpAddress::Ipv6(src) = src {
                if let Some(zone) = src.zone() {
                    if let Some(netif) = self.get(zone.get()).filter(|netif| netif.up) {
                        return Some(netif.index);
                    }
                }
            }
        }
        let up = || self.netifs.iter().filter(|netif| netif.up);
        up().find(|netif| netif.ip6_addrs.iter().any(|slot| {
                slot.state.is_valid() && slot.addr.octets()[..8] == dst.octets()[..8]
            }))
            .or_else(|| up().next())
            .map(|netif| netif.index)
    }

    /// Give a scoped but unzoned address a zone.
    ///
    /// The zone of `src` is adopted when it has one; otherwise the table is
    /// walked for the first up interface the address could belong to: one
    /// with a link-local unicast address for link-local destinations, any
    /// up interface for scoped multicast. If nothing fits the address is
    /// left unchanged.
    pub fn select_zone(&self, addr: &mut Ipv6Address, src: &Ipv6Address) {
        if !addr.lacks_zone(Ipv6ScopeHint::Unknown) {
            return;
        }
        if let Some(zone) = src.zone() {
            addr.set_zone(zone.get());
            return;
        }
        for netif in self.netifs.iter().filter(|netif| netif.up) {
            let fits = if addr.is_link_local() {
                netif.ip6_addrs.iter().any(|slot| {
                    !slot.state.is_invalid() && slot.addr.is_link_local()
                })
            } else {
                // Interface- or link-local multicast reaches the local
                // link through any interface.
                true
            };
            if fits {
                addr.set_zone(netif.index);
                return;
            }
        }
    }

    /// Select a source address on `netif` for a destination, RFC 6724 in
    /// miniature: candidates must be in a valid state; matching scope
    /// beats a matching /64 prefix beats preferred state beats any valid.
    pub fn select_source_v6(&self, index: u8, dst: &Ipv6Address)
        -> Option<Ipv6Address>
    {
        let netif = self.get(index)?;
        let valid = || netif.ip6_addrs.iter()
            .filter(|slot| slot.state.is_valid());

        if dst.is_link_local() || dst.is_multicast_link_local()
            || dst.is_multicast_interface_local()
        {
            if let Some(slot) = valid().find(|slot| slot.addr.is_link_local()) {
                return Some(slot.addr);
            }
        }
        if let Some(slot) = valid().find(|slot| {
            slot.addr.octets()[..8] == dst.octets()[..8]
        }) {
            return Some(slot.addr);
        }
        valid()
            .find(|slot| slot.state.is_preferred())
            .or_else(|| valid().next())
            .map(|slot| slot.addr)
    }
}

impl Default for Interfaces {
    fn default() -> Interfaces {
        Interfaces::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::Ipv6AddrState as State;

    fn two_netif_table() -> Interfaces {
        let mut ifaces = Interfaces::new();

        let mut eth = Netif::new();
        eth.up = true;
        eth.ethernet = true;
        eth.broadcast_capable = true;
        eth.ip4_addr = Ipv4Address::new(10, 0, 0, 1);
        eth.ip4_netmask = Ipv4Address::new(255, 255, 255, 0);
        eth.add_ip6_addr(
            "fe80::1".parse().unwrap(), State::Preferred).unwrap();
        eth.add_ip6_addr(
            "2001:db8:1::1".parse().unwrap(), State::Valid).unwrap();
        assert_eq!(ifaces.add(eth).unwrap(), 1);

        let mut ppp = Netif::new();
        ppp.up = true;
        ppp.ip4_addr = Ipv4Address::new(192, 168, 7, 2);
        ppp.ip4_netmask = Ipv4Address::new(255, 255, 255, 252);
        ppp.ip4_gateway = Ipv4Address::new(192, 168, 7, 1);
        assert_eq!(ifaces.add(ppp).unwrap(), 2);

        ifaces
    }

    #[test]
    fn route_v4_prefers_subnet_then_gateway() {
        let ifaces = two_netif_table();
        let any = IpAddress::Any;
        assert_eq!(ifaces.route(&any, &IpAddress::v4(10, 0, 0, 9)), Some(1));
        assert_eq!(ifaces.route(&any, &IpAddress::v4(192, 168, 7, 1)), Some(2));
        // Off-net traffic goes through the gatewayed interface.
        assert_eq!(ifaces.route(&any, &IpAddress::v4(8, 8, 8, 8)), Some(2));
    }

    #[test]
    fn route_v6_by_zone_and_prefix() {
        let ifaces = two_netif_table();
        let any = IpAddress::Any;

        let zoned: Ipv6Address = "fe80::9".parse::<Ipv6Address>().unwrap().with_zone(1);
        assert_eq!(ifaces.route(&any, &zoned.into()), Some(1));

        let on_net: Ipv6Address = "2001:db8:1::77".parse().unwrap();
        assert_eq!(ifaces.route(&any, &on_net.into()), Some(1));
    }

    #[test]
    fn registration_zones_scoped_addrs() {
        let ifaces = two_netif_table();
        let slots = ifaces.get(1).unwrap().ip6_addrs();
        assert_eq!(slots[0].addr.zone().map(|z| z.get()), Some(1));
        assert!(slots[0].addr.zone_is_consistent());
        // The global address carries no zone.
        assert!(!slots[1].addr.has_zone());
        assert!(slots[1].addr.zone_is_consistent());
    }

    #[test]
    fn select_zone_prefers_source_zone() {
        let ifaces = two_netif_table();
        let src = "fe80::1".parse::<Ipv6Address>().unwrap().with_zone(2);
        let mut dst: Ipv6Address = "fe80::42".parse().unwrap();
        ifaces.select_zone(&mut dst, &src);
        assert_eq!(dst.zone().map(|z| z.get()), Some(2));
    }

    #[test]
    fn select_zone_walks_interfaces() {
        let ifaces = two_netif_table();
        // Only netif 1 owns a link-local address.
        let mut dst: Ipv6Address = "fe80::42".parse().unwrap();
        ifaces.select_zone(&mut dst, &Ipv6Address::UNSPECIFIED);
        assert_eq!(dst.zone().map(|z| z.get()), Some(1));

        // Interface-local multicast fits any up interface, the first wins.
        let mut mcast: Ipv6Address = "ff01::2".parse().unwrap();
        ifaces.select_zone(&mut mcast, &Ipv6Address::UNSPECIFIED);
        assert_eq!(mcast.zone().map(|z| z.get()), Some(1));

        // An already zoned or unscoped address stays untouched.
        let mut global: Ipv6Address = "2001:db8::1".parse().unwrap();
        ifaces.select_zone(&mut global, &Ipv6Address::UNSPECIFIED);
        assert!(!global.has_zone());
    }

    #[test]
    fn source_selection_prefers_matching_scope() {
        let ifaces = two_netif_table();
        let link_dst: Ipv6Address = "fe80::7".parse().unwrap();
        let chosen = ifaces.select_source_v6(1, &link_dst).unwrap();
        assert!(chosen.is_link_local());

        let global_dst: Ipv6Address = "2001:db8:1::9".parse().unwrap();
        let chosen = ifaces.select_source_v6(1, &global_dst).unwrap();
        assert!(chosen.eq_zoneless(&"2001:db8:1::1".parse().unwrap()));
    }

    #[test]
    fn broadcast_classification() {
        let ifaces = two_netif_table();
        let eth = ifaces.get(1).unwrap();
        assert!(eth.is_ip4_broadcast(&Ipv4Address::BROADCAST));
        assert!(eth.is_ip4_broadcast(&Ipv4Address::new(10, 0, 0, 255)));
        assert!(!eth.is_ip4_broadcast(&Ipv4Address::new(10, 0, 1, 255)));
        // The point-to-point link is not broadcast capable.
        let ppp = ifaces.get(2).unwrap();
        assert!(!ppp.is_ip4_broadcast(&Ipv4Address::new(192, 168, 7, 3)));
    }
}
