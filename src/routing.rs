use ipnetwork::Ipv4Network;

use std::collections::BTreeMap;
use std::net::Ipv4Addr;

/// One static routing entry. A `gateway` of `None` means the network
/// is directly connected via `ifname`, so the next hop is the
/// destination itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub net: Ipv4Network,
    pub gateway: Option<Ipv4Addr>,
    pub ifname: String,
}

/// The static routing table. Entries are grouped by prefix length so
/// that lookup can walk from the most specific prefix down, giving
/// longest-prefix-match semantics. Within one prefix length the first
/// inserted entry wins.
#[derive(Default)]
pub struct RoutingTable {
    table: BTreeMap<u8, Vec<Route>>,
}

impl RoutingTable {
    pub fn new() -> RoutingTable {
        RoutingTable { table: BTreeMap::new() }
    }

    pub fn add_route(&mut self, net: Ipv4Network, gateway: Option<Ipv4Addr>, ifname: &str) {
        let prefix = net.prefix();
        let route = Route {
            net,
            gateway,
            ifname: ifname.to_owned(),
        };
        self.table.entry(prefix).or_insert_with(Vec::new).push(route);
    }

    /// Longest-prefix-match lookup. Returns `None` when the table is
    /// empty or no entry matches. A `0.0.0.0/0` entry matches every
    /// destination.
    pub fn route(&self, ip: Ipv4Addr) -> Option<&Route> {
        for (_prefix, routes) in self.table.iter().rev() {
            for route in routes {
                if route.net.contains(ip) {
                    return Some(route);
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn net(cidr: &str) -> Ipv4Network {
        cidr.parse().unwrap()
    }

    #[test]
    fn empty() {
        let table = RoutingTable::new();
        assert!(table.route(Ipv4Addr::new(10, 0, 0, 1)).is_none());
        assert!(table.route(Ipv4Addr::new(0, 0, 0, 0)).is_none());
    }

    #[test]
    fn no_default() {
        let mut table = RoutingTable::new();
        table.add_route(net("10.0.0.0/8"), None, "eth0");
        let route = table.route(Ipv4Addr::new(10, 0, 0, 1)).unwrap();
        assert_eq!(route.gateway, None);
        assert_eq!(route.ifname, "eth0");
        assert!(table.route(Ipv4Addr::new(192, 168, 0, 0)).is_none());
    }

    #[test]
    fn with_default() {
        let gw = Ipv4Addr::new(10, 0, 0, 1);

        let mut table = RoutingTable::new();
        table.add_route(net("10.0.0.0/16"), None, "eth0");
        table.add_route(net("0.0.0.0/0"), Some(gw), "eth1");

        let route = table.route(Ipv4Addr::new(10, 0, 200, 20)).unwrap();
        assert_eq!(route.gateway, None);
        assert_eq!(route.ifname, "eth0");
        let route2 = table.route(Ipv4Addr::new(192, 168, 0, 0)).unwrap();
        assert_eq!(route2.gateway, Some(gw));
        assert_eq!(route2.ifname, "eth1");
    }

    #[test]
    fn with_specific() {
        let gw = Ipv4Addr::new(10, 0, 0, 1);

        let mut table = RoutingTable::new();
        table.add_route(net("10.0.0.0/24"), None, "eth0");
        table.add_route(net("10.0.0.99/32"), Some(gw), "eth1");

        let route = table.route(Ipv4Addr::new(10, 0, 0, 20)).unwrap();
        assert_eq!(route.gateway, None);
        assert_eq!(route.ifname, "eth0");
        let route2 = table.route(Ipv4Addr::new(10, 0, 0, 99)).unwrap();
        assert_eq!(route2.gateway, Some(gw));
        assert_eq!(route2.ifname, "eth1");
    }

    #[test]
    fn equal_prefix_first_wins() {
        let mut table = RoutingTable::new();
        table.add_route(net("10.0.0.0/24"), None, "eth0");
        table.add_route(net("10.0.0.0/24"), None, "eth1");

        let route = table.route(Ipv4Addr::new(10, 0, 0, 7)).unwrap();
        assert_eq!(route.ifname, "eth0");
    }
}
