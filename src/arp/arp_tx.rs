use crate::ethernet::EthernetPayload;
use crate::Payload;

use pnet::packet::arp::{
    ArpHardwareTypes, ArpOperation, ArpOperations, ArpPacket, MutableArpPacket,
};
use pnet::packet::ethernet::{EtherType, EtherTypes};
use pnet::util::MacAddr;

use std::net::Ipv4Addr;

/// Builder for Arp packets, Ipv4 over Ethernet only.
pub struct ArpBuilder {
    operation: ArpOperation,
    sender_mac: MacAddr,
    sender_ip: Ipv4Addr,
    target_mac: MacAddr,
    target_ip: Ipv4Addr,
}

impl ArpBuilder {
    /// Constructs a builder for a request asking who has `target_ip`.
    /// The target MAC is all zero; the Ethernet destination is chosen
    /// by the caller (broadcast for a normal request).
    pub fn new_request(sender_mac: MacAddr, sender_ip: Ipv4Addr, target_ip: Ipv4Addr) -> Self {
        ArpBuilder {
            operation: ArpOperations::Request,
            sender_mac,
            sender_ip,
            target_mac: MacAddr::new(0, 0, 0, 0, 0, 0),
            target_ip,
        }
    }

    /// Constructs a builder for a reply stating that `sender_ip` is at
    /// `sender_mac`.
    pub fn new_reply(
        sender_mac: MacAddr,
        sender_ip: Ipv4Addr,
        target_mac: MacAddr,
        target_ip: Ipv4Addr,
    ) -> Self {
        ArpBuilder {
            operation: ArpOperations::Reply,
            sender_mac,
            sender_ip,
            target_mac,
            target_ip,
        }
    }
}

impl EthernetPayload for ArpBuilder {
    fn ether_type(&self) -> EtherType {
        EtherTypes::Arp
    }
}

impl Payload for ArpBuilder {
    fn len(&self) -> usize {
        ArpPacket::minimum_packet_size()
    }

    fn build(&mut self, buffer: &mut [u8]) {
        let mut arp_pkg = MutableArpPacket::new(buffer).unwrap();
        arp_pkg.set_hardware_type(ArpHardwareTypes::Ethernet);
        arp_pkg.set_protocol_type(EtherTypes::Ipv4);
        arp_pkg.set_hw_addr_len(6);
        arp_pkg.set_proto_addr_len(4);
        arp_pkg.set_operation(self.operation);
        arp_pkg.set_sender_hw_addr(self.sender_mac);
        arp_pkg.set_sender_proto_addr(self.sender_ip);
        arp_pkg.set_target_hw_addr(self.target_mac);
        arp_pkg.set_target_proto_addr(self.target_ip);
    }
}
