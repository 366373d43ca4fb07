//! The interface table: which names, addresses and MACs the router
//! owns. Built once at startup, never mutated afterwards.

use pnet::util::MacAddr;

use std::collections::HashMap;
use std::net::Ipv4Addr;

/// Representation of one network interface of the router, with
/// guaranteed IPv4 address and MAC address.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Interface {
    /// The name of this interface, used to address it in the routing
    /// table and towards the link layer.
    pub name: String,

    /// The IPv4 address of this interface.
    pub ipv4: Ipv4Addr,

    /// The MAC address of this interface.
    pub mac: MacAddr,
}

impl Interface {
    /// Creates a new `Interface` with the given properties.
    pub fn new(name: &str, ipv4: Ipv4Addr, mac: MacAddr) -> Interface {
        Interface {
            name: name.to_owned(),
            ipv4,
            mac,
        }
    }
}

/// Mapping from interface name to [`Interface`]. Immutable after load,
/// so handing out clones to the sweeper is cheap enough.
#[derive(Clone, Debug, Default)]
pub struct InterfaceTable {
    interfaces: HashMap<String, Interface>,
}

impl InterfaceTable {
    pub fn new() -> InterfaceTable {
        InterfaceTable {
            interfaces: HashMap::new(),
        }
    }

    /// Adds an interface to the table. A second interface with the
    /// same name replaces the first.
    pub fn add(&mut self, interface: Interface) {
        self.interfaces.insert(interface.name.clone(), interface);
    }

    /// Resolves an interface name.
    pub fn get(&self, name: &str) -> Option<&Interface> {
        self.interfaces.get(name)
    }

    /// The "is this IP one of ours?" test. Returns the interface
    /// owning `ip`, if any.
    pub fn local_ip(&self, ip: Ipv4Addr) -> Option<&Interface> {
        self.interfaces.values().find(|iface| iface.ipv4 == ip)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Interface> {
        self.interfaces.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> InterfaceTable {
        let mut table = InterfaceTable::new();
        table.add(Interface::new(
            "eth0",
            Ipv4Addr::new(10, 0, 0, 1),
            MacAddr::new(1, 2, 3, 4, 5, 6),
        ));
        table.add(Interface::new(
            "eth1",
            Ipv4Addr::new(10, 0, 1, 1),
            MacAddr::new(1, 2, 3, 4, 5, 7),
        ));
        table
    }

    #[test]
    fn get_by_name() {
        let table = table();
        assert_eq!(table.get("eth0").unwrap().ipv4, Ipv4Addr::new(10, 0, 0, 1));
        assert!(table.get("eth9").is_none());
    }

    #[test]
    fn local_ip() {
        let table = table();
        let iface = table.local_ip(Ipv4Addr::new(10, 0, 1, 1)).unwrap();
        assert_eq!(iface.name, "eth1");
        assert!(table.local_ip(Ipv4Addr::new(10, 0, 2, 1)).is_none());
    }
}
