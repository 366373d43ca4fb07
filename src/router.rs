//! The forwarding engine. One [`Router`] owns the interface table,
//! the routing table and the Arp cache, and dispatches every incoming
//! frame: forward it, queue it pending Arp resolution, answer it with
//! Arp or ICMP, or drop it.

use crate::arp::{ArpBuilder, ArpCache, ArpRequest, ArpSweeper};
use crate::ethernet::{EthernetTx, SharedSink};
use crate::icmp::{self, EchoReplyBuilder, ErrorBuilder, IcmpPayload, IcmpTx};
use crate::iface::{Interface, InterfaceTable};
use crate::ipv4::Ipv4Tx;
use crate::routing::RoutingTable;
use crate::{RxError, RxResult};

use log::{debug, trace, warn};
use pnet::packet::arp::{ArpOperations, ArpPacket};
use pnet::packet::ethernet::{EtherTypes, EthernetPacket, MutableEthernetPacket};
use pnet::packet::icmp::checksum as icmp_checksum;
use pnet::packet::icmp::echo_request::EchoRequestPacket;
use pnet::packet::icmp::{IcmpCode, IcmpPacket, IcmpTypes};
use pnet::packet::ip::IpNextHeaderProtocols;
use pnet::packet::ipv4::checksum as ipv4_checksum;
use pnet::packet::ipv4::{Ipv4Packet, MutableIpv4Packet};
use pnet::packet::Packet;
use pnet::util::MacAddr;

use std::net::Ipv4Addr;

/// The router core. All entry points take `&self`; the only interior
/// mutability is the Arp cache and the frame sink, both behind their
/// own mutex, so a receive task and the sweeper can run concurrently.
pub struct Router {
    interfaces: InterfaceTable,
    routing_table: RoutingTable,
    arp_cache: ArpCache,
    sink: SharedSink,
}

impl Router {
    pub fn new(interfaces: InterfaceTable, routing_table: RoutingTable, sink: SharedSink) -> Router {
        Router {
            interfaces,
            routing_table,
            arp_cache: ArpCache::new(),
            sink,
        }
    }

    /// Handle to the shared Arp cache.
    pub fn arp_cache(&self) -> ArpCache {
        self.arp_cache.clone()
    }

    /// Creates the sweeper companion for this router, sharing its Arp
    /// cache and frame sink. The host ticks it at 1 Hz.
    pub fn sweeper(&self) -> ArpSweeper {
        ArpSweeper::new(
            self.arp_cache.clone(),
            self.interfaces.clone(),
            self.sink.clone(),
        )
    }

    /// Entry point for every frame received from the link layer.
    /// `now` is the host clock in milliseconds.
    pub fn on_frame(&self, now: u64, in_ifname: &str, frame: &[u8]) -> RxResult {
        let in_if = match self.interfaces.get(in_ifname) {
            Some(iface) => iface,
            None => return Err(RxError::Other(format!("Unknown interface {}", in_ifname))),
        };
        if frame.len() < EthernetPacket::minimum_packet_size() {
            return Err(RxError::InvalidLength);
        }
        let eth = EthernetPacket::new(frame).unwrap();
        let ethertype = eth.get_ethertype();
        if ethertype == EtherTypes::Ipv4 {
            self.recv_ipv4(now, in_if, &eth)
        } else if ethertype == EtherTypes::Arp {
            self.recv_arp(now, in_if, &eth)
        } else {
            Err(RxError::NoListener(format!("Ethernet: {}", ethertype)))
        }
    }

    fn recv_ipv4(&self, now: u64, in_if: &Interface, eth: &EthernetPacket) -> RxResult {
        let eth_payload = eth.payload();
        if eth_payload.len() < Ipv4Packet::minimum_packet_size() {
            return Err(RxError::InvalidLength);
        }
        let total_length = {
            let ip_pkg = Ipv4Packet::new(eth_payload).unwrap();
            ip_pkg.get_total_length() as usize
        };
        if total_length > eth_payload.len() || total_length < Ipv4Packet::minimum_packet_size() {
            return Err(RxError::InvalidLength);
        }
        let ip_pkg = Ipv4Packet::new(&eth_payload[..total_length]).unwrap();
        if ip_pkg.get_version() != 4 || ip_pkg.get_header_length() != 5 {
            return Err(RxError::InvalidContent);
        }
        if ip_pkg.get_checksum() != ipv4_checksum(&ip_pkg) {
            return Err(RxError::InvalidChecksum);
        }

        let dst = ip_pkg.get_destination();
        if self.interfaces.local_ip(dst).is_some() {
            return self.recv_local(in_if, eth, &ip_pkg);
        }

        if ip_pkg.get_ttl() <= 1 {
            debug!("TTL expired on packet for {}, answering time exceeded", dst);
            return self.icmp_reply(
                in_if,
                eth.get_source(),
                ip_pkg.get_source(),
                ErrorBuilder::new(IcmpTypes::TimeExceeded, IcmpCode::new(0), 0, ip_pkg.packet()),
            );
        }

        let route = match self.routing_table.route(dst) {
            Some(route) => route,
            None => {
                debug!("No route for {}, answering net unreachable", dst);
                return self.icmp_reply(
                    in_if,
                    eth.get_source(),
                    ip_pkg.get_source(),
                    ErrorBuilder::new(
                        IcmpTypes::DestinationUnreachable,
                        IcmpCode::new(0),
                        icmp::DEFAULT_NEXT_MTU,
                        ip_pkg.packet(),
                    ),
                );
            }
        };
        let out_if = match self.interfaces.get(&route.ifname) {
            Some(iface) => iface,
            None => return Err(RxError::Other(format!("Unknown interface {}", route.ifname))),
        };
        let next_hop = route.gateway.unwrap_or(dst);

        // The input buffer is borrowed from the link layer, so the
        // frame is copied before the TTL and checksum are rewritten.
        let mut frame = eth.packet().to_vec();
        {
            let offset = EthernetPacket::minimum_packet_size();
            let mut ip_out = MutableIpv4Packet::new(&mut frame[offset..]).unwrap();
            ip_out.set_ttl(ip_pkg.get_ttl() - 1);
            let csum = ipv4_checksum(&ip_out.to_immutable());
            ip_out.set_checksum(csum);
        }

        match self.arp_cache.lookup(now, next_hop) {
            Some(mac) => {
                {
                    let mut eth_out = MutableEthernetPacket::new(&mut frame).unwrap();
                    eth_out.set_source(out_if.mac);
                    eth_out.set_destination(mac);
                }
                trace!("Forwarding packet for {} via {} on {}", dst, next_hop, out_if.name);
                let mut sink = self.sink.lock().map_err(|_| RxError::PoisonedLock)?;
                sink.send_frame(&out_if.name, &frame).map_err(RxError::from)
            }
            None => {
                self.arp_cache.enqueue(next_hop, frame, &out_if.name);
                Ok(())
            }
        }
    }

    /// A packet addressed to one of the router's own IPs. Pings are
    /// answered; everything else is told there is no one listening.
    fn recv_local(&self, in_if: &Interface, eth: &EthernetPacket, ip_pkg: &Ipv4Packet) -> RxResult {
        let proto = ip_pkg.get_next_level_protocol();
        if proto == IpNextHeaderProtocols::Icmp {
            let icmp_bytes = ip_pkg.payload();
            if icmp_bytes.len() < IcmpPacket::minimum_packet_size() {
                return Err(RxError::InvalidLength);
            }
            let icmp_pkg = IcmpPacket::new(icmp_bytes).unwrap();
            if icmp_pkg.get_checksum() != icmp_checksum(&icmp_pkg) {
                return Err(RxError::InvalidChecksum);
            }
            if icmp_pkg.get_icmp_type() != IcmpTypes::EchoRequest {
                trace!("Ignoring ICMP type {} to local address", icmp_pkg.get_icmp_type().0);
                return Ok(());
            }
            if icmp_bytes.len() < EchoRequestPacket::minimum_packet_size() {
                return Err(RxError::InvalidLength);
            }
            let echo = EchoRequestPacket::new(icmp_bytes).unwrap();
            debug!("Echo request from {}, answering", ip_pkg.get_source());
            self.icmp_reply(
                in_if,
                eth.get_source(),
                ip_pkg.get_source(),
                EchoReplyBuilder::new(echo.get_identifier(), echo.get_sequence_number(), echo.payload()),
            )
        } else {
            debug!("Protocol {} to local address, answering port unreachable", proto.0);
            self.icmp_reply(
                in_if,
                eth.get_source(),
                ip_pkg.get_source(),
                ErrorBuilder::new(
                    IcmpTypes::DestinationUnreachable,
                    IcmpCode::new(3),
                    icmp::DEFAULT_NEXT_MTU,
                    ip_pkg.packet(),
                ),
            )
        }
    }

    fn recv_arp(&self, now: u64, in_if: &Interface, eth: &EthernetPacket) -> RxResult {
        let eth_payload = eth.payload();
        if eth_payload.len() < ArpPacket::minimum_packet_size() {
            return Err(RxError::InvalidLength);
        }
        let arp_pkg = ArpPacket::new(eth_payload).unwrap();
        let sender_mac = arp_pkg.get_sender_hw_addr();
        let sender_ip = arp_pkg.get_sender_proto_addr();
        let target_ip = arp_pkg.get_target_proto_addr();
        let operation = arp_pkg.get_operation();

        if operation == ArpOperations::Request && target_ip == in_if.ipv4 {
            debug!("Arp request for {} from {}, answering", target_ip, sender_ip);
            // The requester is deliberately not cached; cache entries
            // only ever come from replies to our own requests.
            let mut ethernet = EthernetTx::new(self.sink.clone(), &in_if.name, in_if.mac, sender_mac);
            ethernet
                .send(ArpBuilder::new_reply(in_if.mac, in_if.ipv4, sender_mac, sender_ip))
                .map_err(RxError::from)
        } else if operation == ArpOperations::Reply && target_ip == in_if.ipv4 {
            if let Some(request) = self.arp_cache.insert(now, sender_ip, sender_mac) {
                self.drain_pending(request, sender_mac);
            }
            Ok(())
        } else {
            trace!("Ignoring Arp traffic for {}", target_ip);
            Ok(())
        }
    }

    /// Transmits every frame that was waiting for `mac`, in the order
    /// it was queued.
    fn drain_pending(&self, request: ArpRequest, mac: MacAddr) {
        for pending in request.queue {
            let out_if = match self.interfaces.get(&pending.out_ifname) {
                Some(iface) => iface,
                None => {
                    warn!("Dropping queued frame for unknown interface {}", pending.out_ifname);
                    continue;
                }
            };
            let mut frame = pending.frame;
            {
                let mut eth_out = MutableEthernetPacket::new(&mut frame).unwrap();
                eth_out.set_source(out_if.mac);
                eth_out.set_destination(mac);
            }
            let send_result = match self.sink.lock() {
                Ok(mut sink) => sink.send_frame(&out_if.name, &frame),
                Err(_) => {
                    warn!("Frame sink lock poisoned, dropping queued frame");
                    continue;
                }
            };
            if let Err(e) = send_result {
                warn!("Unable to transmit queued frame: {}", e);
            }
        }
    }

    fn icmp_reply<P: IcmpPayload>(
        &self,
        reply_if: &Interface,
        dst_mac: MacAddr,
        dst_ip: Ipv4Addr,
        payload: P,
    ) -> RxResult {
        let ethernet = EthernetTx::new(self.sink.clone(), &reply_if.name, reply_if.mac, dst_mac);
        let ipv4 = Ipv4Tx::new(ethernet, reply_if.ipv4, dst_ip, icmp::REPLY_TTL);
        IcmpTx::new(ipv4).send(payload).map_err(RxError::from)
    }
}
