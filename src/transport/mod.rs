//! A reliable byte-stream transport over an unreliable datagram
//! service, with a BBR style congestion controller.
//!
//! One [`Connection`] carries exactly one stream. The host feeds it
//! events through four entry points (application input, incoming
//! datagram, application output space, timer tick) and supplies all
//! plumbing through the [`ConnectionIo`] trait. A [`TransportStack`]
//! owns the set of live connections and destroys them on orderly
//! teardown or retransmission exhaustion.

use crate::TxResult;

use log::debug;

use std::collections::HashMap;

mod bbr;
mod buffers;
mod connection;
pub mod segment;

pub use self::bbr::{Bbr, Mode};
pub use self::connection::{Connection, TickOutcome};

/// Maximum payload bytes in one segment.
pub const MAX_SEG_DATA: usize = 1440;

/// What the application side had for us when asked for input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppRead {
    /// `buf[..len]` was filled with fresh stream data.
    Data(usize),
    /// Nothing available right now; try again on the next input event.
    WouldBlock,
    /// The application closed its writing side.
    Eof,
}

/// The seam towards the host: the datagram service below the
/// connection and the application above it. All calls are treated as
/// non-blocking.
pub trait ConnectionIo: Send {
    /// Reads up to `buf.len()` bytes of stream data from the
    /// application.
    fn read_app(&mut self, buf: &mut [u8]) -> AppRead;

    /// How many bytes the application can accept right now.
    fn app_bufspace(&self) -> usize;

    /// Delivers in-order stream data to the application. Only called
    /// after `app_bufspace` reported room for it.
    fn write_app(&mut self, data: &[u8]);

    /// Tells the application the peer closed its writing side.
    fn app_eof(&mut self);

    /// Hands one finished segment to the datagram service.
    fn send_datagram(&mut self, datagram: &[u8]) -> TxResult;
}

/// Per-connection tuning, filled from host configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Receive window in bytes.
    pub recv_window: u32,
    /// Send window in bytes.
    pub send_window: u32,
    /// Cadence of `tick` as configured at the host.
    pub timer_tick_ms: u64,
    /// Retransmission timeout.
    pub rt_timeout_ms: u64,
    /// Retransmissions of one segment before the peer is declared
    /// unresponsive.
    pub retransmit_limit: u32,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            recv_window: 1440,
            send_window: 1440,
            timer_tick_ms: 40,
            rt_timeout_ms: 200,
            retransmit_limit: 5,
        }
    }
}

/// Identity of a connection within a [`TransportStack`].
pub type ConnectionId = u64;

/// The set of live connections. The timer tick iterates over a
/// snapshot of the identities so a connection can be destroyed from
/// inside the loop.
pub struct TransportStack<IO: ConnectionIo> {
    connections: HashMap<ConnectionId, Connection<IO>>,
    next_id: ConnectionId,
}

impl<IO: ConnectionIo> TransportStack<IO> {
    pub fn new() -> TransportStack<IO> {
        TransportStack {
            connections: HashMap::new(),
            next_id: 1,
        }
    }

    /// Registers a freshly accepted connection and returns its
    /// identity.
    pub fn accept(&mut self, io: IO, cfg: Config) -> ConnectionId {
        let id = self.next_id;
        self.next_id += 1;
        self.connections.insert(id, Connection::new(io, cfg));
        debug!("Accepted connection {}", id);
        id
    }

    pub fn connection_mut(&mut self, id: ConnectionId) -> Option<&mut Connection<IO>> {
        self.connections.get_mut(&id)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Ticks every live connection and reaps the ones that asked to
    /// be destroyed.
    pub fn tick(&mut self, now: u64) {
        let ids: Vec<ConnectionId> = self.connections.keys().cloned().collect();
        for id in ids {
            let destroy = match self.connections.get_mut(&id) {
                Some(connection) => connection.tick(now) == TickOutcome::Destroy,
                None => false,
            };
            if destroy {
                self.connections.remove(&id);
                debug!("Connection {} destroyed", id);
            }
        }
    }
}

impl<IO: ConnectionIo> Default for TransportStack<IO> {
    fn default() -> Self {
        TransportStack::new()
    }
}
