//! IPv4 packet composition. The router only ever originates small
//! ICMP replies, so this transmit path builds single packets with a
//! fixed 20 byte header and no fragmentation.

use crate::ethernet::{EthernetPayload, EthernetTx};
use crate::{Payload, TxError, TxResult};

use pnet::packet::ethernet::{EtherType, EtherTypes};
use pnet::packet::ip::IpNextHeaderProtocol;
use pnet::packet::ipv4::{checksum, Ipv4Packet, MutableIpv4Packet};
use pnet::packet::MutablePacket;

use std::net::Ipv4Addr;

/// Flag field values. Locally generated packets set don't-fragment.
pub const NO_FLAGS: u8 = 0b000;
pub const DONT_FRAGMENT: u8 = 0b010;

/// Trait for anything wishing to be the payload of an IPv4 packet.
pub trait Ipv4Payload: Payload {
    fn next_level_protocol(&self) -> IpNextHeaderProtocol;
}

/// IPv4 packet builder and sender for locally originated packets.
pub struct Ipv4Tx {
    /// The source IP of packets built by this instance.
    pub src: Ipv4Addr,

    /// The destination IP of the packets built by this instance.
    pub dst: Ipv4Addr,

    ttl: u8,
    ethernet: EthernetTx,
}

impl Ipv4Tx {
    /// Constructs a new `Ipv4Tx` sending through `ethernet`.
    pub fn new(ethernet: EthernetTx, src: Ipv4Addr, dst: Ipv4Addr, ttl: u8) -> Ipv4Tx {
        Ipv4Tx {
            src,
            dst,
            ttl,
            ethernet,
        }
    }

    /// Builds one IPv4 packet around `payload` and sends it.
    pub fn send<P: Ipv4Payload>(&mut self, payload: P) -> TxResult {
        let max_payload = u16::MAX as usize - Ipv4Packet::minimum_packet_size();
        if payload.len() > max_payload {
            return Err(TxError::TooLargePayload);
        }
        let builder = Ipv4Builder::new(self.src, self.dst, self.ttl, payload);
        self.ethernet.send(builder)
    }
}

/// Struct building IPv4 packets.
pub struct Ipv4Builder<P: Ipv4Payload> {
    src: Ipv4Addr,
    dst: Ipv4Addr,
    ttl: u8,
    payload: P,
}

impl<P: Ipv4Payload> Ipv4Builder<P> {
    pub fn new(src: Ipv4Addr, dst: Ipv4Addr, ttl: u8, payload: P) -> Self {
        Ipv4Builder {
            src,
            dst,
            ttl,
            payload,
        }
    }
}

impl<P: Ipv4Payload> EthernetPayload for Ipv4Builder<P> {
    fn ether_type(&self) -> EtherType {
        EtherTypes::Ipv4
    }
}

impl<P: Ipv4Payload> Payload for Ipv4Builder<P> {
    fn len(&self) -> usize {
        Ipv4Packet::minimum_packet_size() + self.payload.len()
    }

    fn build(&mut self, buffer: &mut [u8]) {
        let total_length = self.len();
        let mut pkg = MutableIpv4Packet::new(buffer).unwrap();
        pkg.set_version(4);
        pkg.set_dscp(0);
        pkg.set_ecn(0);
        pkg.set_ttl(self.ttl);
        pkg.set_header_length(5); // 5 words, no option fields
        pkg.set_identification(0);
        pkg.set_source(self.src);
        pkg.set_destination(self.dst);
        pkg.set_fragment_offset(0);
        pkg.set_flags(DONT_FRAGMENT);
        pkg.set_total_length(total_length as u16);
        pkg.set_next_level_protocol(self.payload.next_level_protocol());
        self.payload.build(pkg.payload_mut());

        let csum = checksum(&pkg.to_immutable());
        pkg.set_checksum(csum);
    }
}
