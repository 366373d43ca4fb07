//! Everything related to the address resolution protocol (Arp): the
//! cache, the queue of frames waiting for a resolution, and the
//! sweeper that retries and times out unresolved requests.
//!
//! The cache is the only structure in the router touched by two
//! actors (the forwarding path and the sweeper), so the actual data
//! lives behind a `Mutex` and [`ArpCache`] is a cheap cloneable
//! handle.

use log::{debug, trace};
use pnet::util::MacAddr;

use std::collections::{HashMap, VecDeque};
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex, MutexGuard};

mod arp_tx;
mod sweeper;

pub use self::arp_tx::ArpBuilder;
pub use self::sweeper::ArpSweeper;

/// How long a resolved entry stays valid.
pub const ENTRY_TTL_MS: u64 = 15_000;

/// Minimum pause between two request broadcasts for the same IP.
pub const REQUEST_INTERVAL_MS: u64 = 1_000;

/// How many request broadcasts are sent before the next hop is
/// declared unreachable.
pub const MAX_REQUESTS: u32 = 5;

/// One resolved IP to MAC mapping.
#[derive(Debug, Clone, Copy)]
pub struct ArpEntry {
    pub mac: MacAddr,
    pub inserted_at: u64,
}

/// A frame waiting for its next hop to resolve. The bytes are a full
/// Ethernet frame as it would go on the wire, except that the MAC
/// addresses are not filled in yet.
#[derive(Debug, Clone)]
pub struct PendingFrame {
    pub frame: Vec<u8>,
    pub out_ifname: String,
}

/// The record for one unresolved next hop. At most one request exists
/// per IP; every additional frame towards that IP joins the queue of
/// the existing request.
#[derive(Debug)]
pub struct ArpRequest {
    pub ip: Ipv4Addr,
    pub sent_count: u32,
    pub last_sent_at: Option<u64>,
    pub queue: VecDeque<PendingFrame>,
}

impl ArpRequest {
    fn new(ip: Ipv4Addr) -> ArpRequest {
        ArpRequest {
            ip,
            sent_count: 0,
            last_sent_at: None,
            queue: VecDeque::new(),
        }
    }
}

#[derive(Default)]
struct CacheData {
    entries: HashMap<Ipv4Addr, ArpEntry>,
    requests: HashMap<Ipv4Addr, ArpRequest>,
}

/// The main Arp cache struct. Contains the actual data behind a
/// `Mutex` so it can be shared between the forwarding path and the
/// sweeper.
#[derive(Clone, Default)]
pub struct ArpCache {
    data: Arc<Mutex<CacheData>>,
}

impl ArpCache {
    /// Creates a new `ArpCache` with no entries in it.
    pub fn new() -> ArpCache {
        ArpCache {
            data: Arc::new(Mutex::new(CacheData::default())),
        }
    }

    /// Queries the cache for a MAC. Stale entries are not returned.
    pub fn lookup(&self, now: u64, ip: Ipv4Addr) -> Option<MacAddr> {
        let data = self.lock();
        match data.entries.get(&ip) {
            Some(entry) if now.wrapping_sub(entry.inserted_at) < ENTRY_TTL_MS => Some(entry.mac),
            _ => None,
        }
    }

    /// Inserts an IP to MAC mapping, refreshing the timestamp of an
    /// existing entry. If a request was pending for `ip` it is removed
    /// from the cache and returned, so the caller can drain its frame
    /// queue now that the MAC is known.
    pub fn insert(&self, now: u64, ip: Ipv4Addr, mac: MacAddr) -> Option<ArpRequest> {
        let mut data = self.lock();
        debug!("Arp MAC: {} -> IPv4: {}", mac, ip);
        data.entries.insert(
            ip,
            ArpEntry {
                mac,
                inserted_at: now,
            },
        );
        data.requests.remove(&ip)
    }

    /// Queues a frame until `next_hop` resolves, creating the request
    /// record if this is the first frame towards that IP. Requests are
    /// only ever transmitted by the sweeper; a fresh request goes out
    /// on the first sweep after creation.
    pub fn enqueue(&self, next_hop: Ipv4Addr, frame: Vec<u8>, out_ifname: &str) {
        let mut data = self.lock();
        trace!("Queueing frame for unresolved next hop {}", next_hop);
        let request = data
            .requests
            .entry(next_hop)
            .or_insert_with(|| ArpRequest::new(next_hop));
        request.queue.push_back(PendingFrame {
            frame,
            out_ifname: out_ifname.to_owned(),
        });
    }

    /// Number of unresolved requests. Exposed for tests and
    /// diagnostics.
    pub fn pending_requests(&self) -> usize {
        self.lock().requests.len()
    }

    fn lock(&self) -> MutexGuard<CacheData> {
        self.data.lock().expect("Unable to lock Arp cache")
    }
}
