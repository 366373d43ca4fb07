//! Ethernet frame composition and the seam towards the link layer.

use crate::{Payload, TxError, TxResult};

use pnet::packet::ethernet::{EtherType, EthernetPacket, MutableEthernetPacket};
use pnet::packet::MutablePacket;
use pnet::util::MacAddr;

use std::sync::{Arc, Mutex};

/// Trait for anything wishing to be the payload of an Ethernet frame.
pub trait EthernetPayload: Payload {
    fn ether_type(&self) -> EtherType;
}

/// The seam towards the link-layer driver. The router hands finished
/// frames here; what happens after that (raw sockets, a simulator, an
/// `mpsc` channel in a test) is none of the core's business.
pub trait FrameSink: Send {
    /// Transmit `frame` on the interface named `ifname`. Treated as
    /// non-blocking by the callers.
    fn send_frame(&mut self, ifname: &str, frame: &[u8]) -> TxResult;
}

/// The sink is shared between the forwarding path and the ARP sweeper,
/// so it lives behind a mutex just like the ARP cache itself.
pub type SharedSink = Arc<Mutex<dyn FrameSink>>;

/// Transmit struct for the ethernet layer. Bound to one interface and
/// one destination MAC; builds the frame in a single allocation and
/// hands it to the [`FrameSink`].
pub struct EthernetTx {
    sink: SharedSink,
    ifname: String,
    src: MacAddr,
    dst: MacAddr,
}

impl EthernetTx {
    /// Creates a new `EthernetTx` sending on `ifname` with the given
    /// source and destination MAC.
    pub fn new(sink: SharedSink, ifname: &str, src: MacAddr, dst: MacAddr) -> EthernetTx {
        EthernetTx {
            sink,
            ifname: ifname.to_owned(),
            src,
            dst,
        }
    }

    pub fn src(&self) -> MacAddr {
        self.src
    }

    pub fn dst(&self) -> MacAddr {
        self.dst
    }

    /// Builds one frame from `payload` and sends it to the sink.
    pub fn send<P: EthernetPayload>(&mut self, mut payload: P) -> TxResult {
        let size = EthernetPacket::minimum_packet_size() + payload.len();
        let mut buffer = vec![0; size];
        {
            let mut pkg = MutableEthernetPacket::new(&mut buffer).unwrap();
            pkg.set_source(self.src);
            pkg.set_destination(self.dst);
            pkg.set_ethertype(payload.ether_type());
            payload.build(pkg.payload_mut());
        }
        let mut sink = self.sink.lock().map_err(|_| TxError::PoisonedLock)?;
        sink.send_frame(&self.ifname, &buffer)
    }
}
