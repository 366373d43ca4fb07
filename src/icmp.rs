//! ICMP reply composition. The router generates exactly three kinds of
//! ICMP traffic: Echo Replies to pings addressed to it, Destination
//! Unreachable errors (net, host, port) and Time Exceeded errors.

use crate::ipv4::{Ipv4Payload, Ipv4Tx};
use crate::{Payload, TxResult};

use pnet::packet::icmp::{checksum, IcmpCode, IcmpPacket, IcmpType, IcmpTypes, MutableIcmpPacket};
use pnet::packet::ip::{IpNextHeaderProtocol, IpNextHeaderProtocols};
use pnet::packet::MutablePacket;

use std::cmp;

/// TTL on locally generated ICMP replies.
pub const REPLY_TTL: u8 = 60;

/// How much of the offending datagram an error reply quotes: the IPv4
/// header plus eight payload bytes.
pub const ERROR_QUOTE_LEN: usize = 28;

/// The next-hop MTU advertised in Destination Unreachable replies.
pub const DEFAULT_NEXT_MTU: u16 = 1500;

/// Trait for anything wishing to be the payload of an ICMP packet.
pub trait IcmpPayload: Payload {
    fn icmp_type(&self) -> IcmpType;

    fn icmp_code(&self) -> IcmpCode;
}

/// ICMP packet builder and sender struct.
pub struct IcmpTx {
    ipv4: Ipv4Tx,
}

impl IcmpTx {
    /// Creates a new `IcmpTx` based on `ipv4`.
    pub fn new(ipv4: Ipv4Tx) -> IcmpTx {
        IcmpTx { ipv4 }
    }

    /// Builds one ICMP packet from `payload` and sends it.
    pub fn send<P: IcmpPayload>(&mut self, payload: P) -> TxResult {
        let builder = IcmpBuilder::new(payload);
        self.ipv4.send(builder)
    }
}

pub struct IcmpBuilder<P: IcmpPayload> {
    payload: P,
}

impl<P: IcmpPayload> IcmpBuilder<P> {
    pub fn new(payload: P) -> IcmpBuilder<P> {
        IcmpBuilder { payload }
    }
}

impl<P: IcmpPayload> Ipv4Payload for IcmpBuilder<P> {
    fn next_level_protocol(&self) -> IpNextHeaderProtocol {
        IpNextHeaderProtocols::Icmp
    }
}

impl<P: IcmpPayload> Payload for IcmpBuilder<P> {
    fn len(&self) -> usize {
        IcmpPacket::minimum_packet_size() + self.payload.len()
    }

    fn build(&mut self, buffer: &mut [u8]) {
        let mut pkg = MutableIcmpPacket::new(buffer).unwrap();
        pkg.set_icmp_type(self.payload.icmp_type());
        pkg.set_icmp_code(self.payload.icmp_code());
        self.payload.build(pkg.payload_mut());

        let csum = checksum(&pkg.to_immutable());
        pkg.set_checksum(csum);
    }
}

/// Builder for Destination Unreachable and Time Exceeded replies. The
/// body is four bytes of unused/next-hop-MTU followed by a quote of
/// the offending datagram.
pub struct ErrorBuilder<'a> {
    icmp_type: IcmpType,
    icmp_code: IcmpCode,
    next_mtu: u16,
    offender: &'a [u8],
}

impl<'a> ErrorBuilder<'a> {
    /// Creates a builder quoting up to [`ERROR_QUOTE_LEN`] bytes of
    /// `offender`, which must be the offending IPv4 datagram starting
    /// at its header.
    pub fn new(
        icmp_type: IcmpType,
        icmp_code: IcmpCode,
        next_mtu: u16,
        offender: &'a [u8],
    ) -> ErrorBuilder<'a> {
        ErrorBuilder {
            icmp_type,
            icmp_code,
            next_mtu,
            offender,
        }
    }

    fn quote(&self) -> &'a [u8] {
        &self.offender[..cmp::min(ERROR_QUOTE_LEN, self.offender.len())]
    }
}

impl<'a> IcmpPayload for ErrorBuilder<'a> {
    fn icmp_type(&self) -> IcmpType {
        self.icmp_type
    }

    fn icmp_code(&self) -> IcmpCode {
        self.icmp_code
    }
}

impl<'a> Payload for ErrorBuilder<'a> {
    fn len(&self) -> usize {
        4 + self.quote().len()
    }

    fn build(&mut self, buffer: &mut [u8]) {
        let quote = self.quote();
        buffer[0] = 0;
        buffer[1] = 0;
        buffer[2..4].copy_from_slice(&self.next_mtu.to_be_bytes());
        buffer[4..4 + quote.len()].copy_from_slice(quote);
    }
}

/// Builder for Echo Replies mirroring the identifier, sequence number
/// and payload of the incoming Echo Request.
pub struct EchoReplyBuilder<'a> {
    identifier: u16,
    sequence_number: u16,
    payload: &'a [u8],
}

impl<'a> EchoReplyBuilder<'a> {
    pub fn new(identifier: u16, sequence_number: u16, payload: &'a [u8]) -> EchoReplyBuilder<'a> {
        EchoReplyBuilder {
            identifier,
            sequence_number,
            payload,
        }
    }
}

impl<'a> IcmpPayload for EchoReplyBuilder<'a> {
    fn icmp_type(&self) -> IcmpType {
        IcmpTypes::EchoReply
    }

    fn icmp_code(&self) -> IcmpCode {
        IcmpCode::new(0)
    }
}

impl<'a> Payload for EchoReplyBuilder<'a> {
    fn len(&self) -> usize {
        4 + self.payload.len()
    }

    fn build(&mut self, buffer: &mut [u8]) {
        buffer[0..2].copy_from_slice(&self.identifier.to_be_bytes());
        buffer[2..4].copy_from_slice(&self.sequence_number.to_be_bytes());
        buffer[4..4 + self.payload.len()].copy_from_slice(self.payload);
    }
}
