use super::bbr::{Bbr, BW_SCALE};
use super::buffers::{seq_lt, RecvQueue, RecvSegment, SendQueue, SentSegment};
use super::segment::{self, Segment, SegmentBuilder, FLAG_ACK, FLAG_FIN};
use super::{AppRead, Config, ConnectionIo, MAX_SEG_DATA};
use crate::{RxError, RxResult, TxResult};

use log::{debug, trace, warn};

use std::cmp;

/// Congestion window before the first bandwidth sample arrives.
const INITIAL_CWND: usize = 4 * MAX_SEG_DATA;

/// What a timer tick decided about the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Alive,
    /// The owner must drop the connection: either the peer stopped
    /// acking, or an orderly teardown has fully completed.
    Destroy,
}

/// One reliable byte-stream connection over an unreliable datagram
/// service.
///
/// The four entry points mirror the events the host reports: the
/// application produced data (`on_input`), a datagram arrived
/// (`on_datagram`), the application drained its buffer (`on_output`)
/// and the periodic timer fired (`tick`). Every entry point runs to
/// completion; there is no internal concurrency.
pub struct Connection<IO: ConnectionIo> {
    io: IO,
    cfg: Config,

    /// Next sequence number to transmit. Sequence numbers are 1-based
    /// and wrap in 32 bits.
    seqno: u32,
    /// Next byte expected from the peer.
    ackno: u32,

    unacked: SendQueue,
    unoutput: RecvQueue,

    sent_fin: bool,
    our_fin_acked: bool,
    peer_fin_seen: bool,
    eof_signalled: bool,

    retransmit_count: u32,
    last_retransmit_at: u64,

    /// Total bytes cumulatively acked so far, and when the last ack
    /// arrived. Snapshots of these on each sent segment turn acks
    /// into delivery-rate samples for the congestion controller.
    delivered_bytes: u64,
    delivered_at: u64,

    bbr: Bbr,
}

impl<IO: ConnectionIo> Connection<IO> {
    pub fn new(io: IO, cfg: Config) -> Connection<IO> {
        Connection {
            io,
            cfg,
            seqno: 1,
            ackno: 1,
            unacked: SendQueue::new(),
            unoutput: RecvQueue::new(),
            sent_fin: false,
            our_fin_acked: false,
            peer_fin_seen: false,
            eof_signalled: false,
            retransmit_count: 0,
            last_retransmit_at: 0,
            delivered_bytes: 0,
            delivered_at: 0,
            bbr: Bbr::new(MAX_SEG_DATA as u64, INITIAL_CWND as u64),
        }
    }

    /// The application has data (or EOF) for us. Reads and transmits
    /// as much as the send window, the congestion window and the
    /// pacer allow.
    pub fn on_input(&mut self, now: u64) -> TxResult {
        while !self.sent_fin {
            let window = cmp::min(u64::from(self.cfg.send_window), self.bbr.cwnd());
            let inflight = u64::from(self.unacked.inflight_bytes());
            if inflight >= window {
                trace!("Send window full, {}/{} bytes in flight", inflight, window);
                break;
            }
            if now < self.bbr.next_send_time() {
                // Pacing: this slot is not ours yet
                break;
            }
            let budget = cmp::min((window - inflight) as usize, MAX_SEG_DATA);
            let mut buf = vec![0; budget];
            match self.io.read_app(&mut buf) {
                AppRead::WouldBlock => break,
                AppRead::Eof => {
                    self.send_fin(now)?;
                    break;
                }
                AppRead::Data(0) => break,
                AppRead::Data(len) => {
                    buf.truncate(len);
                    self.send_data(now, buf)?;
                }
            }
        }
        Ok(())
    }

    /// A datagram arrived from the network.
    pub fn on_datagram(&mut self, now: u64, datagram: &[u8]) -> RxResult {
        let seg = Segment::new(datagram).ok_or(RxError::InvalidLength)?;
        if seg.get_len() as usize != datagram.len() {
            return Err(RxError::InvalidLength);
        }
        if !segment::verify_checksum(datagram) {
            return Err(RxError::InvalidChecksum);
        }

        let seqno = seg.get_seqno();
        let is_fin = seg.is_fin();
        let payload = seg.payload();
        let carries_data = !payload.is_empty() || is_fin;

        if carries_data && seq_lt(seqno, self.ackno) {
            // Everything there is already delivered; the peer missed
            // our ack
            trace!("Segment at {} below ack {}, re-acking", seqno, self.ackno);
            self.send_ack().map_err(RxError::from)?;
            return Ok(());
        }

        if seg.is_ack() {
            self.process_ack(now, seg.get_ackno());
        }

        if carries_data {
            let inserted = self.unoutput.insert(RecvSegment {
                seqno,
                payload: payload.to_vec(),
                is_fin,
            });
            if !inserted {
                trace!("Duplicate segment at {}, re-acking", seqno);
                self.send_ack().map_err(RxError::from)?;
            } else if is_fin {
                debug!("Peer FIN at seq {}", seqno);
                self.peer_fin_seen = true;
            }
        }

        self.on_output().map_err(RxError::from)
    }

    /// Delivers buffered segments to the application, strictly in
    /// sequence order, as far as its buffer space allows. Emits one
    /// cumulative ack if anything was delivered.
    pub fn on_output(&mut self) -> TxResult {
        let mut delivered = false;
        loop {
            let (len, is_fin) = match self.unoutput.peek(self.ackno) {
                Some(seg) => (seg.payload.len(), seg.is_fin),
                None => break,
            };
            if len > 0 && self.io.app_bufspace() < len {
                trace!("Application buffer full, deferring delivery");
                break;
            }
            let seg = self.unoutput.remove(self.ackno).unwrap();
            if len > 0 {
                self.io.write_app(&seg.payload);
                self.ackno = self.ackno.wrapping_add(len as u32);
            }
            if is_fin {
                self.ackno = self.ackno.wrapping_add(1);
                if !self.eof_signalled {
                    self.io.app_eof();
                    self.eof_signalled = true;
                }
            }
            delivered = true;
        }
        if delivered {
            self.send_ack()?;
        }
        Ok(())
    }

    /// The periodic timer. Drives retransmission, deferred delivery
    /// and connection destruction.
    pub fn tick(&mut self, now: u64) -> TickOutcome {
        if !self.unacked.is_empty() {
            if self.retransmit_count >= self.cfg.retransmit_limit {
                warn!(
                    "Peer unresponsive after {} retransmits, dropping connection",
                    self.retransmit_count
                );
                return TickOutcome::Destroy;
            }
            if now.saturating_sub(self.last_retransmit_at) >= self.cfg.rt_timeout_ms {
                self.retransmit_head(now);
            }
        }

        if let Err(e) = self.on_output() {
            warn!("Deferred delivery failed: {}", e);
        }

        if self.sent_fin && self.our_fin_acked && self.peer_fin_seen && self.unoutput.is_empty() {
            debug!("Orderly teardown complete");
            return TickOutcome::Destroy;
        }
        TickOutcome::Alive
    }

    fn send_data(&mut self, now: u64, payload: Vec<u8>) -> TxResult {
        let bytes = SegmentBuilder {
            seqno: self.seqno,
            ackno: self.ackno,
            flags: FLAG_ACK,
            window: self.advertised_window(),
            payload: &payload,
        }
        .encode();
        self.io.send_datagram(&bytes)?;
        trace!("Sent {} payload bytes at seq {}", payload.len(), self.seqno);
        let sent_len = bytes.len();
        let byte_len = payload.len() as u32;
        self.push_unacked(now, bytes, byte_len, false);
        self.seqno = self.seqno.wrapping_add(byte_len);
        self.bbr.on_send(now, sent_len);
        Ok(())
    }

    fn send_fin(&mut self, now: u64) -> TxResult {
        let bytes = SegmentBuilder {
            seqno: self.seqno,
            ackno: self.ackno,
            flags: FLAG_ACK | FLAG_FIN,
            window: self.advertised_window(),
            payload: &[],
        }
        .encode();
        self.io.send_datagram(&bytes)?;
        debug!("Sent FIN at seq {}", self.seqno);
        let sent_len = bytes.len();
        // A FIN consumes one sequence number
        self.push_unacked(now, bytes, 1, true);
        self.sent_fin = true;
        self.seqno = self.seqno.wrapping_add(1);
        self.bbr.on_send(now, sent_len);
        Ok(())
    }

    fn send_ack(&mut self) -> TxResult {
        let bytes = SegmentBuilder {
            seqno: self.seqno,
            ackno: self.ackno,
            flags: FLAG_ACK,
            window: self.advertised_window(),
            payload: &[],
        }
        .encode();
        self.io.send_datagram(&bytes)
    }

    fn push_unacked(&mut self, now: u64, bytes: Vec<u8>, byte_len: u32, is_fin: bool) {
        if self.unacked.is_empty() {
            self.retransmit_count = 0;
            self.last_retransmit_at = now;
        }
        self.unacked.push(SentSegment {
            bytes,
            first_seq: self.seqno,
            byte_len,
            is_fin,
            first_send_at: now,
            delivered_at_send: self.delivered_at,
            delivered_bytes_at_send: self.delivered_bytes,
        });
    }

    fn process_ack(&mut self, now: u64, ackno: u32) {
        let removed = self.unacked.ack(ackno);
        if removed.is_empty() {
            // Stale or duplicate ack
            return;
        }
        // Progress was made; the retransmit clock belongs to the new
        // head of the queue
        self.retransmit_count = 0;
        self.last_retransmit_at = now;

        for seg in removed {
            self.delivered_bytes += u64::from(seg.byte_len);
            self.delivered_at = now;

            let elapsed = cmp::max(now.saturating_sub(seg.first_send_at), 1);
            let delivered = self.delivered_bytes - seg.delivered_bytes_at_send;
            let bw_sample = (delivered << BW_SCALE) / elapsed;
            let rtt_sample = elapsed;
            let inflight = u64::from(self.unacked.inflight_bytes());
            self.bbr.on_ack(now, bw_sample, rtt_sample, inflight);

            if seg.is_fin {
                debug!("Our FIN is acked");
                self.our_fin_acked = true;
            }
        }
    }

    fn retransmit_head(&mut self, now: u64) {
        let (bytes, first_seq) = match self.unacked.front() {
            Some(head) => (head.bytes.clone(), head.first_seq),
            None => return,
        };
        self.retransmit_count += 1;
        self.last_retransmit_at = now;
        debug!("Retransmit #{} of segment at seq {}", self.retransmit_count, first_seq);
        // A retransmission produces no delivery sample for BBR
        if let Err(e) = self.io.send_datagram(&bytes) {
            warn!("Retransmission failed: {}", e);
        }
    }

    fn advertised_window(&self) -> u16 {
        let space = (self.cfg.recv_window as usize).saturating_sub(self.unoutput.buffered_bytes());
        cmp::min(space, u16::MAX as usize) as u16
    }
}
