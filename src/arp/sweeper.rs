use super::{ArpBuilder, ArpCache, ArpRequest, PendingFrame};
use super::{ENTRY_TTL_MS, MAX_REQUESTS, REQUEST_INTERVAL_MS};
use crate::ethernet::{EthernetTx, SharedSink};
use crate::icmp::{self, ErrorBuilder, IcmpTx};
use crate::iface::InterfaceTable;
use crate::ipv4::Ipv4Tx;
use crate::{TxError, TxResult};

use log::{debug, trace, warn};
use pnet::packet::ethernet::EthernetPacket;
use pnet::packet::icmp::{IcmpCode, IcmpTypes};
use pnet::packet::ipv4::Ipv4Packet;
use pnet::packet::Packet;
use pnet::util::MacAddr;

use std::net::Ipv4Addr;

/// The periodic half of Arp resolution. The host invokes
/// [`sweep`](ArpSweeper::sweep) once per second; each sweep drops
/// stale cache entries, re-broadcasts unanswered requests and declares
/// next hops unreachable after [`MAX_REQUESTS`] attempts, answering
/// every queued frame with an ICMP host unreachable.
///
/// The forwarding path never transmits Arp requests itself, it only
/// queues frames. Keeping emission here keeps a single code path for
/// first requests and retries alike.
pub struct ArpSweeper {
    cache: ArpCache,
    interfaces: InterfaceTable,
    sink: SharedSink,
}

impl ArpSweeper {
    pub fn new(cache: ArpCache, interfaces: InterfaceTable, sink: SharedSink) -> ArpSweeper {
        ArpSweeper {
            cache,
            interfaces,
            sink,
        }
    }

    /// Walks the cache once. `now` is the host clock in milliseconds.
    pub fn sweep(&self, now: u64) {
        let mut data = self.cache.lock();
        data.entries
            .retain(|_, entry| now.wrapping_sub(entry.inserted_at) < ENTRY_TTL_MS);

        let ips: Vec<Ipv4Addr> = data.requests.keys().cloned().collect();
        for ip in ips {
            let (sent_count, last_sent_at) = {
                let request = &data.requests[&ip];
                (request.sent_count, request.last_sent_at)
            };
            if let Some(last) = last_sent_at {
                if now.wrapping_sub(last) < REQUEST_INTERVAL_MS {
                    continue;
                }
            }
            if sent_count >= MAX_REQUESTS {
                let request = data.requests.remove(&ip).unwrap();
                debug!(
                    "Next hop {} unreachable after {} Arp requests, dropping {} queued frames",
                    ip,
                    request.sent_count,
                    request.queue.len()
                );
                for pending in &request.queue {
                    if let Err(e) = self.host_unreachable(pending) {
                        warn!("Unable to send ICMP host unreachable: {}", e);
                    }
                }
            } else {
                if let Err(e) = self.broadcast_request(&data.requests[&ip]) {
                    warn!("Unable to broadcast Arp request for {}: {}", ip, e);
                }
                let request = data.requests.get_mut(&ip).unwrap();
                request.sent_count += 1;
                request.last_sent_at = Some(now);
            }
        }
    }

    fn broadcast_request(&self, request: &ArpRequest) -> TxResult {
        // The first queued frame decides which interface asks.
        let pending = request
            .queue
            .front()
            .ok_or_else(|| TxError::Other("Arp request without queued frames".to_owned()))?;
        let out_if = self
            .interfaces
            .get(&pending.out_ifname)
            .ok_or_else(|| TxError::Other(format!("Unknown interface {}", pending.out_ifname)))?;
        trace!("Broadcasting Arp request for {} on {}", request.ip, out_if.name);
        let broadcast = MacAddr::new(0xff, 0xff, 0xff, 0xff, 0xff, 0xff);
        let mut ethernet = EthernetTx::new(self.sink.clone(), &out_if.name, out_if.mac, broadcast);
        ethernet.send(ArpBuilder::new_request(out_if.mac, out_if.ipv4, request.ip))
    }

    fn host_unreachable(&self, pending: &PendingFrame) -> TxResult {
        let out_if = self
            .interfaces
            .get(&pending.out_ifname)
            .ok_or_else(|| TxError::Other(format!("Unknown interface {}", pending.out_ifname)))?;
        let eth = EthernetPacket::new(&pending.frame)
            .ok_or_else(|| TxError::Other("Queued frame too short".to_owned()))?;
        let offender = eth.payload();
        if offender.len() < Ipv4Packet::minimum_packet_size() {
            return Err(TxError::Other("Queued frame too short".to_owned()));
        }
        let ip_pkg = Ipv4Packet::new(offender).unwrap();

        let ethernet = EthernetTx::new(self.sink.clone(), &out_if.name, out_if.mac, eth.get_source());
        let ipv4 = Ipv4Tx::new(ethernet, out_if.ipv4, ip_pkg.get_source(), icmp::REPLY_TTL);
        let mut icmp_tx = IcmpTx::new(ipv4);
        icmp_tx.send(ErrorBuilder::new(
            IcmpTypes::DestinationUnreachable,
            IcmpCode::new(1),
            icmp::DEFAULT_NEXT_MTU,
            offender,
        ))
    }
}
