use pnet::packet::arp::{ArpHardwareTypes, ArpOperation, ArpOperations, ArpPacket, MutableArpPacket};
use pnet::packet::ethernet::{EtherTypes, EthernetPacket, MutableEthernetPacket};
use pnet::packet::icmp::checksum as icmp_checksum;
use pnet::packet::icmp::echo_reply::EchoReplyPacket;
use pnet::packet::icmp::echo_request::MutableEchoRequestPacket;
use pnet::packet::icmp::{IcmpCode, IcmpPacket, IcmpTypes, MutableIcmpPacket};
use pnet::packet::ip::{IpNextHeaderProtocol, IpNextHeaderProtocols};
use pnet::packet::ipv4::checksum as ipv4_checksum;
use pnet::packet::ipv4::{Ipv4Packet, MutableIpv4Packet};
use pnet::packet::Packet;
use pnet::util::MacAddr;

use ripr::ethernet::{FrameSink, SharedSink};
use ripr::router::Router;
use ripr::{Interface, InterfaceTable, RoutingTable, RxError, TxResult};

use std::net::Ipv4Addr;
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex};

struct MockSink {
    chan: mpsc::Sender<(String, Vec<u8>)>,
}

impl FrameSink for MockSink {
    fn send_frame(&mut self, ifname: &str, frame: &[u8]) -> TxResult {
        self.chan.send((ifname.to_owned(), frame.to_vec())).unwrap();
        Ok(())
    }
}

fn mac_a() -> MacAddr {
    MacAddr::new(1, 2, 3, 4, 5, 1)
}

fn mac_b() -> MacAddr {
    MacAddr::new(1, 2, 3, 4, 5, 2)
}

fn mac_c() -> MacAddr {
    MacAddr::new(1, 2, 3, 4, 5, 3)
}

fn remote_mac() -> MacAddr {
    MacAddr::new(0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff)
}

fn broadcast() -> MacAddr {
    MacAddr::new(0xff, 0xff, 0xff, 0xff, 0xff, 0xff)
}

fn ip(a: u8, b: u8, c: u8, d: u8) -> Ipv4Addr {
    Ipv4Addr::new(a, b, c, d)
}

/// Two interface router: eth1 = 10.0.1.1 (mac A), eth2 = 10.0.2.1
/// (mac B), both networks directly connected.
fn dummy_router() -> (Router, Receiver<(String, Vec<u8>)>) {
    let (chan, read_handle) = mpsc::channel();
    let sink: SharedSink = Arc::new(Mutex::new(MockSink { chan }));

    let mut interfaces = InterfaceTable::new();
    interfaces.add(Interface::new("eth1", ip(10, 0, 1, 1), mac_a()));
    interfaces.add(Interface::new("eth2", ip(10, 0, 2, 1), mac_b()));

    let mut routing_table = RoutingTable::new();
    routing_table.add_route("10.0.1.0/24".parse().unwrap(), None, "eth1");
    routing_table.add_route("10.0.2.0/24".parse().unwrap(), None, "eth2");

    (Router::new(interfaces, routing_table, sink), read_handle)
}

fn ipv4_frame(
    src_mac: MacAddr,
    dst_mac: MacAddr,
    src_ip: Ipv4Addr,
    dst_ip: Ipv4Addr,
    ttl: u8,
    proto: IpNextHeaderProtocol,
    payload: &[u8],
) -> Vec<u8> {
    let ip_len = Ipv4Packet::minimum_packet_size() + payload.len();
    let mut ip_buffer = vec![0; ip_len];
    {
        let mut ip_pkg = MutableIpv4Packet::new(&mut ip_buffer).unwrap();
        ip_pkg.set_version(4);
        ip_pkg.set_header_length(5);
        ip_pkg.set_total_length(ip_len as u16);
        ip_pkg.set_ttl(ttl);
        ip_pkg.set_next_level_protocol(proto);
        ip_pkg.set_source(src_ip);
        ip_pkg.set_destination(dst_ip);
        ip_pkg.set_payload(payload);
        let csum = ipv4_checksum(&ip_pkg.to_immutable());
        ip_pkg.set_checksum(csum);
    }
    let mut frame = vec![0; EthernetPacket::minimum_packet_size() + ip_len];
    {
        let mut eth = MutableEthernetPacket::new(&mut frame).unwrap();
        eth.set_source(src_mac);
        eth.set_destination(dst_mac);
        eth.set_ethertype(EtherTypes::Ipv4);
        eth.set_payload(&ip_buffer);
    }
    frame
}

fn arp_frame(
    operation: ArpOperation,
    sender_mac: MacAddr,
    sender_ip: Ipv4Addr,
    target_mac: MacAddr,
    target_ip: Ipv4Addr,
) -> Vec<u8> {
    let mut arp_buffer = vec![0; ArpPacket::minimum_packet_size()];
    {
        let mut arp = MutableArpPacket::new(&mut arp_buffer).unwrap();
        arp.set_hardware_type(ArpHardwareTypes::Ethernet);
        arp.set_protocol_type(EtherTypes::Ipv4);
        arp.set_hw_addr_len(6);
        arp.set_proto_addr_len(4);
        arp.set_operation(operation);
        arp.set_sender_hw_addr(sender_mac);
        arp.set_sender_proto_addr(sender_ip);
        arp.set_target_hw_addr(target_mac);
        arp.set_target_proto_addr(target_ip);
    }
    let mut frame = vec![0; EthernetPacket::minimum_packet_size() + arp_buffer.len()];
    {
        let mut eth = MutableEthernetPacket::new(&mut frame).unwrap();
        eth.set_source(sender_mac);
        eth.set_destination(target_mac);
        eth.set_ethertype(EtherTypes::Arp);
        eth.set_payload(&arp_buffer);
    }
    frame
}

fn echo_request(identifier: u16, sequence_number: u16, data: &[u8]) -> Vec<u8> {
    let mut buffer = vec![0; MutableEchoRequestPacket::minimum_packet_size() + data.len()];
    {
        let mut echo = MutableEchoRequestPacket::new(&mut buffer).unwrap();
        echo.set_icmp_type(IcmpTypes::EchoRequest);
        echo.set_icmp_code(IcmpCode::new(0));
        echo.set_identifier(identifier);
        echo.set_sequence_number(sequence_number);
        echo.set_payload(data);
    }
    let csum = icmp_checksum(&IcmpPacket::new(&buffer).unwrap());
    {
        let mut icmp = MutableIcmpPacket::new(&mut buffer).unwrap();
        icmp.set_checksum(csum);
    }
    buffer
}

/// Asserts the frame is a valid ICMP reply from the router and
/// returns the ICMP bytes.
fn check_icmp_reply(
    frame: &[u8],
    src_mac: MacAddr,
    dst_mac: MacAddr,
    src_ip: Ipv4Addr,
    dst_ip: Ipv4Addr,
) -> Vec<u8> {
    let eth = EthernetPacket::new(frame).unwrap();
    assert_eq!(eth.get_source(), src_mac);
    assert_eq!(eth.get_destination(), dst_mac);
    assert_eq!(eth.get_ethertype(), EtherTypes::Ipv4);

    let ip_pkg = Ipv4Packet::new(eth.payload()).unwrap();
    assert_eq!(ip_pkg.get_source(), src_ip);
    assert_eq!(ip_pkg.get_destination(), dst_ip);
    assert_eq!(ip_pkg.get_ttl(), 60);
    assert_eq!(ip_pkg.get_flags(), 0b010, "DF must be set");
    assert_eq!(ip_pkg.get_next_level_protocol(), IpNextHeaderProtocols::Icmp);
    assert_eq!(ip_pkg.get_checksum(), ipv4_checksum(&ip_pkg));

    let icmp = IcmpPacket::new(ip_pkg.payload()).unwrap();
    assert_eq!(icmp.get_checksum(), icmp_checksum(&icmp));
    ip_pkg.payload().to_vec()
}

#[test]
fn forward_with_arp_miss_then_hit() {
    let (router, read_handle) = dummy_router();
    let frame = ipv4_frame(
        remote_mac(),
        mac_a(),
        ip(1, 2, 3, 4),
        ip(10, 0, 2, 5),
        64,
        IpNextHeaderProtocols::Udp,
        &[0; 16],
    );
    router.on_frame(0, "eth1", &frame).unwrap();
    // Nothing may go out before the next hop resolves; even the Arp
    // request waits for the sweeper
    assert!(read_handle.try_recv().is_err());

    router.sweeper().sweep(1_000);
    let (ifname, request) = read_handle.try_recv().unwrap();
    assert_eq!(ifname, "eth2");
    let eth = EthernetPacket::new(&request).unwrap();
    assert_eq!(eth.get_destination(), broadcast());
    assert_eq!(eth.get_source(), mac_b());
    assert_eq!(eth.get_ethertype(), EtherTypes::Arp);
    let arp = ArpPacket::new(eth.payload()).unwrap();
    assert_eq!(arp.get_operation(), ArpOperations::Request);
    assert_eq!(arp.get_sender_hw_addr(), mac_b());
    assert_eq!(arp.get_sender_proto_addr(), ip(10, 0, 2, 1));
    assert_eq!(arp.get_target_hw_addr(), MacAddr::new(0, 0, 0, 0, 0, 0));
    assert_eq!(arp.get_target_proto_addr(), ip(10, 0, 2, 5));

    // The reply releases the queued frame
    let reply = arp_frame(
        ArpOperations::Reply,
        mac_c(),
        ip(10, 0, 2, 5),
        mac_b(),
        ip(10, 0, 2, 1),
    );
    router.on_frame(1_050, "eth2", &reply).unwrap();
    let (ifname, forwarded) = read_handle.try_recv().unwrap();
    assert_eq!(ifname, "eth2");
    let eth = EthernetPacket::new(&forwarded).unwrap();
    assert_eq!(eth.get_source(), mac_b());
    assert_eq!(eth.get_destination(), mac_c());
    let ip_pkg = Ipv4Packet::new(eth.payload()).unwrap();
    assert_eq!(ip_pkg.get_ttl(), 63);
    assert_eq!(ip_pkg.get_checksum(), ipv4_checksum(&ip_pkg));
    assert_eq!(ip_pkg.get_destination(), ip(10, 0, 2, 5));

    // With the cache warm the next frame forwards immediately
    router.on_frame(1_060, "eth1", &frame).unwrap();
    let (ifname, _) = read_handle.try_recv().unwrap();
    assert_eq!(ifname, "eth2");
    assert!(read_handle.try_recv().is_err());
}

#[test]
fn ttl_expiry_answers_time_exceeded() {
    let (router, read_handle) = dummy_router();
    let frame = ipv4_frame(
        remote_mac(),
        mac_a(),
        ip(1, 2, 3, 4),
        ip(10, 0, 2, 5),
        1,
        IpNextHeaderProtocols::Udp,
        &[7; 16],
    );
    router.on_frame(0, "eth1", &frame).unwrap();

    let (ifname, reply) = read_handle.try_recv().unwrap();
    assert_eq!(ifname, "eth1");
    let icmp_bytes = check_icmp_reply(&reply, mac_a(), remote_mac(), ip(10, 0, 1, 1), ip(1, 2, 3, 4));
    let icmp = IcmpPacket::new(&icmp_bytes).unwrap();
    assert_eq!(icmp.get_icmp_type(), IcmpTypes::TimeExceeded);
    assert_eq!(icmp.get_icmp_code(), IcmpCode::new(0));
    // Quote is the offending IP header plus eight payload bytes
    assert_eq!(icmp.payload()[4..32], frame[14..14 + 28]);

    // And the packet itself must not have been forwarded
    assert!(read_handle.try_recv().is_err());
}

#[test]
fn no_route_answers_net_unreachable() {
    let (router, read_handle) = dummy_router();
    let frame = ipv4_frame(
        remote_mac(),
        mac_a(),
        ip(1, 2, 3, 4),
        ip(192, 168, 9, 9),
        64,
        IpNextHeaderProtocols::Udp,
        &[0; 8],
    );
    router.on_frame(0, "eth1", &frame).unwrap();

    let (ifname, reply) = read_handle.try_recv().unwrap();
    assert_eq!(ifname, "eth1");
    let icmp_bytes = check_icmp_reply(&reply, mac_a(), remote_mac(), ip(10, 0, 1, 1), ip(1, 2, 3, 4));
    let icmp = IcmpPacket::new(&icmp_bytes).unwrap();
    assert_eq!(icmp.get_icmp_type(), IcmpTypes::DestinationUnreachable);
    assert_eq!(icmp.get_icmp_code(), IcmpCode::new(0));
    // Next-hop MTU field advertises 1500
    assert_eq!(icmp.payload()[2..4], 1500u16.to_be_bytes());
}

#[test]
fn echo_request_to_router_answered() {
    let (router, read_handle) = dummy_router();
    let echo = echo_request(7, 3, b"hi");
    let frame = ipv4_frame(
        remote_mac(),
        mac_a(),
        ip(1, 2, 3, 4),
        ip(10, 0, 1, 1),
        64,
        IpNextHeaderProtocols::Icmp,
        &echo,
    );
    router.on_frame(0, "eth1", &frame).unwrap();

    let (ifname, reply) = read_handle.try_recv().unwrap();
    assert_eq!(ifname, "eth1");
    let icmp_bytes = check_icmp_reply(&reply, mac_a(), remote_mac(), ip(10, 0, 1, 1), ip(1, 2, 3, 4));
    let echo_reply = EchoReplyPacket::new(&icmp_bytes).unwrap();
    assert_eq!(echo_reply.get_icmp_type(), IcmpTypes::EchoReply);
    assert_eq!(echo_reply.get_icmp_code(), IcmpCode::new(0));
    assert_eq!(echo_reply.get_identifier(), 7);
    assert_eq!(echo_reply.get_sequence_number(), 3);
    assert_eq!(echo_reply.payload(), b"hi");
}

#[test]
fn tcp_to_router_answered_port_unreachable() {
    let (router, read_handle) = dummy_router();
    let frame = ipv4_frame(
        remote_mac(),
        mac_a(),
        ip(1, 2, 3, 4),
        ip(10, 0, 1, 1),
        64,
        IpNextHeaderProtocols::Tcp,
        &[0; 20],
    );
    router.on_frame(0, "eth1", &frame).unwrap();

    let (_, reply) = read_handle.try_recv().unwrap();
    let icmp_bytes = check_icmp_reply(&reply, mac_a(), remote_mac(), ip(10, 0, 1, 1), ip(1, 2, 3, 4));
    let icmp = IcmpPacket::new(&icmp_bytes).unwrap();
    assert_eq!(icmp.get_icmp_type(), IcmpTypes::DestinationUnreachable);
    assert_eq!(icmp.get_icmp_code(), IcmpCode::new(3));
}

#[test]
fn arp_retry_exhaustion_answers_host_unreachable() {
    let (router, read_handle) = dummy_router();
    let frame = ipv4_frame(
        remote_mac(),
        mac_a(),
        ip(1, 2, 3, 4),
        ip(10, 0, 2, 5),
        64,
        IpNextHeaderProtocols::Udp,
        &[0; 16],
    );
    router.on_frame(0, "eth1", &frame).unwrap();
    let sweeper = router.sweeper();

    // Five requests go out at one second cadence
    for i in 1..=5u64 {
        sweeper.sweep(i * 1_000);
        let (ifname, request) = read_handle.try_recv().unwrap();
        assert_eq!(ifname, "eth2");
        let eth = EthernetPacket::new(&request).unwrap();
        assert_eq!(eth.get_ethertype(), EtherTypes::Arp);
        // Only one broadcast per sweep for one unresolved IP
        assert!(read_handle.try_recv().is_err());
    }

    // The sixth sweep gives up and answers every queued frame
    sweeper.sweep(6_000);
    let (ifname, reply) = read_handle.try_recv().unwrap();
    assert_eq!(ifname, "eth2");
    let icmp_bytes = check_icmp_reply(&reply, mac_b(), remote_mac(), ip(10, 0, 2, 1), ip(1, 2, 3, 4));
    let icmp = IcmpPacket::new(&icmp_bytes).unwrap();
    assert_eq!(icmp.get_icmp_type(), IcmpTypes::DestinationUnreachable);
    assert_eq!(icmp.get_icmp_code(), IcmpCode::new(1));

    // The request is gone: further sweeps stay silent
    assert_eq!(router.arp_cache().pending_requests(), 0);
    sweeper.sweep(7_000);
    assert!(read_handle.try_recv().is_err());
}

#[test]
fn sweeps_within_a_second_do_not_rebroadcast() {
    let (router, read_handle) = dummy_router();
    let frame = ipv4_frame(
        remote_mac(),
        mac_a(),
        ip(1, 2, 3, 4),
        ip(10, 0, 2, 5),
        64,
        IpNextHeaderProtocols::Udp,
        &[0; 16],
    );
    router.on_frame(0, "eth1", &frame).unwrap();
    let sweeper = router.sweeper();
    sweeper.sweep(1_000);
    assert!(read_handle.try_recv().is_ok());
    sweeper.sweep(1_500);
    assert!(read_handle.try_recv().is_err());
}

#[test]
fn stale_arp_entry_is_not_used() {
    let (router, read_handle) = dummy_router();
    let cache = router.arp_cache();
    cache.insert(0, ip(10, 0, 2, 5), mac_c());

    let frame = ipv4_frame(
        remote_mac(),
        mac_a(),
        ip(1, 2, 3, 4),
        ip(10, 0, 2, 5),
        64,
        IpNextHeaderProtocols::Udp,
        &[0; 16],
    );
    // 20 seconds later the entry aged out, so the frame must queue
    router.on_frame(20_000, "eth1", &frame).unwrap();
    assert!(read_handle.try_recv().is_err());
    assert_eq!(cache.pending_requests(), 1);
}

#[test]
fn bad_ipv4_checksum_dropped() {
    let (router, read_handle) = dummy_router();
    let mut frame = ipv4_frame(
        remote_mac(),
        mac_a(),
        ip(1, 2, 3, 4),
        ip(10, 0, 2, 5),
        64,
        IpNextHeaderProtocols::Udp,
        &[0; 16],
    );
    // Corrupt the IP destination after the checksum was computed
    frame[14 + 16] ^= 0xff;
    assert_eq!(
        router.on_frame(0, "eth1", &frame),
        Err(RxError::InvalidChecksum)
    );
    assert!(read_handle.try_recv().is_err());
}

#[test]
fn short_frame_rejected() {
    let (router, _read_handle) = dummy_router();
    assert_eq!(router.on_frame(0, "eth1", &[0; 13]), Err(RxError::InvalidLength));
}

#[test]
fn arp_request_for_router_ip_answered() {
    let (router, read_handle) = dummy_router();
    let request = arp_frame(
        ArpOperations::Request,
        remote_mac(),
        ip(10, 0, 1, 9),
        broadcast(),
        ip(10, 0, 1, 1),
    );
    router.on_frame(0, "eth1", &request).unwrap();

    let (ifname, reply) = read_handle.try_recv().unwrap();
    assert_eq!(ifname, "eth1");
    let eth = EthernetPacket::new(&reply).unwrap();
    // Unicast back to the requester
    assert_eq!(eth.get_source(), mac_a());
    assert_eq!(eth.get_destination(), remote_mac());
    let arp = ArpPacket::new(eth.payload()).unwrap();
    assert_eq!(arp.get_operation(), ArpOperations::Reply);
    assert_eq!(arp.get_sender_hw_addr(), mac_a());
    assert_eq!(arp.get_sender_proto_addr(), ip(10, 0, 1, 1));
    assert_eq!(arp.get_target_hw_addr(), remote_mac());
    assert_eq!(arp.get_target_proto_addr(), ip(10, 0, 1, 9));

    // The requester must not have been cached
    assert_eq!(router.arp_cache().lookup(0, ip(10, 0, 1, 9)), None);
}
