//! # Ripr - Rust IP Router
//!
//! `ripr` is the core of a small teaching stack for networking
//! infrastructure, written in Rust and backed by
//! [`libpnet`](https://github.com/libpnet/libpnet) for its packet
//! representations. It contains two cooperating subsystems:
//!
//! - A software IPv4/ARP **router** that forwards Ethernet framed IP
//!   datagrams between a handful of interfaces. Longest-prefix-match
//!   routing, TTL and checksum handling, ICMP error generation and an
//!   ARP cache with a pending-frame queue and a periodic sweeper.
//! - A reliable byte-stream **transport** layered on top of an
//!   unreliable datagram service, with sliding-window send/receive
//!   buffers, retransmission, in-order delivery, an orderly FIN
//!   teardown and a BBR style congestion controller driving pacing
//!   and the congestion window.
//!
//! The crate is a library only. Everything that touches the outside
//! world is consumed through a trait so the core stays testable:
//!
//! - [`ethernet::FrameSink`] is the seam towards the link-layer
//!   driver. The router hands it finished frames; a test hands it an
//!   `mpsc` channel instead.
//! - [`transport::ConnectionIo`] is the seam towards the datagram
//!   service and the application on top of a connection.
//!
//! Time is injected as well: every entry point takes `now` in
//! monotonic milliseconds as provided by the host. None of the timers
//! (ARP entry TTL, sweeper cadence, retransmission, PROBE_RTT) read
//! the wall clock themselves.
//!
//! ## Architecture
//!
//! ### Sending
//!
//! Outgoing packets are composed through builder objects implementing
//! [`Payload`], chained per protocol layer: an [`icmp::ErrorBuilder`]
//! is the payload of an [`ipv4::Ipv4Tx`], whose builder in turn is
//! the payload of an [`ethernet::EthernetTx`]. Each builder writes
//! only its own header into the buffer handed to it and delegates the
//! rest, so a frame is laid out in one allocation and handed to the
//! `FrameSink` whole.
//!
//! ### Receiving
//!
//! The router's receive path is a single dispatch in
//! [`router::Router::on_frame`]: a frame is validated against the
//! wire-format invariants of its protocol, then either forwarded,
//! queued pending ARP resolution, answered with ICMP, or dropped. A
//! malformed input is never an error the host has to deal with; it is
//! reported as an [`RxError`] purely so the host can log it.
//!
//! The transport's receive path is
//! [`transport::Connection::on_datagram`], which drives the
//! connection state machine and the BBR controller.

pub mod arp;
pub mod ethernet;
pub mod icmp;
pub mod iface;
pub mod ipv4;
pub mod router;
pub mod transport;

mod errors;
mod routing;

pub use crate::errors::{RxError, RxResult, TxError, TxResult};
pub use crate::iface::{Interface, InterfaceTable};
pub use crate::routing::{Route, RoutingTable};

/// Trait for anything that can lay itself out as the payload of an
/// enclosing protocol. Implemented by the per-protocol builder
/// structs.
pub trait Payload {
    /// Returns how many bytes this payload will occupy.
    fn len(&self) -> usize;

    /// Construct this payload into the given `buffer`. The buffer is
    /// guaranteed to be at least `len()` bytes long.
    fn build(&mut self, buffer: &mut [u8]);
}
