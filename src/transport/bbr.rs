//! A BBR style congestion controller. The controller is fed one
//! bandwidth/RTT sample per acknowledged segment and derives a pacing
//! rate and a congestion window from windowed estimates of the
//! bottleneck bandwidth (max filter) and the round-trip propagation
//! delay (min filter).
//!
//! All gains are fixed point fractions over [`BBR_UNIT`]; floating
//! point never enters the computation. Bandwidth values are bytes per
//! millisecond scaled up by `1 << BW_SCALE` so that slow links keep
//! precision.

use log::debug;
use rand::Rng;

use std::cmp;

/// Fixed point unit of the gain values.
pub const BBR_UNIT: u64 = 256;

/// Bandwidth samples and estimates are bytes/ms shifted left by this.
pub const BW_SCALE: u32 = 24;

/// Number of phases in the PROBE_BW gain cycle.
const CYCLE_LEN: usize = 8;

/// Both filters keep the last `CYCLE_LEN + 2` samples.
const FILTER_LEN: usize = CYCLE_LEN + 2;

/// 2/ln 2. Doubles the sending rate every round while starting up.
const HIGH_GAIN: u64 = BBR_UNIT * 2885 / 1000;

/// Inverse of [`HIGH_GAIN`], used to drain the queue built in STARTUP.
const DRAIN_GAIN: u64 = BBR_UNIT * 1000 / 2885;

/// Steady-state congestion window gain.
const STEADY_CWND_GAIN: u64 = BBR_UNIT * 2;

/// Pacing gains cycled through during PROBE_BW: probe up, drain,
/// then coast.
const PROBE_BW_GAINS: [u64; CYCLE_LEN] = [
    BBR_UNIT * 5 / 4,
    BBR_UNIT * 3 / 4,
    BBR_UNIT,
    BBR_UNIT,
    BBR_UNIT,
    BBR_UNIT,
    BBR_UNIT,
    BBR_UNIT,
];

/// The pipe counts as filled when the bandwidth estimate stops growing
/// by this factor for [`FULL_BW_ROUNDS`] rounds in a row.
const FULL_BW_THRESH: u64 = BBR_UNIT * 5 / 4;
const FULL_BW_ROUNDS: u32 = 3;

/// Length and depth of the PROBE_RTT dip.
const PROBE_RTT_DURATION_MS: u64 = 200;
const PROBE_RTT_SEGS: u64 = 4;

/// Initial guess for the propagation delay before any sample arrived.
const INITIAL_RT_PROP_MS: u64 = 40;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Startup,
    Drain,
    ProbeBw,
    ProbeRtt,
}

pub struct Bbr {
    mode: Mode,
    pacing_gain: u64,
    cwnd_gain: u64,

    btl_bw: u64,
    btl_bw_filter: [u64; FILTER_LEN],
    rt_prop: u64,
    rt_prop_filter: [u64; FILTER_LEN],
    rtt_sample_count: u64,

    cycle_idx: usize,
    full_bw: u64,
    full_bw_cnt: u32,
    filled_pipe: bool,

    pacing_rate: u64,
    cwnd: u64,
    prior_cwnd: u64,
    restore_cwnd: bool,
    probe_rtt_done_at: u64,
    next_send_time: u64,

    mss: u64,
}

impl Bbr {
    /// Creates a controller for a connection with the given maximum
    /// segment size. `initial_cwnd` (bytes) seeds both the congestion
    /// window and, pessimistically read as bytes/ms, the bandwidth
    /// estimate used before the first real sample.
    pub fn new(mss: u64, initial_cwnd: u64) -> Bbr {
        let btl_bw = initial_cwnd << BW_SCALE;
        Bbr {
            mode: Mode::Startup,
            pacing_gain: HIGH_GAIN,
            cwnd_gain: HIGH_GAIN,
            btl_bw,
            btl_bw_filter: [0; FILTER_LEN],
            rt_prop: INITIAL_RT_PROP_MS,
            rt_prop_filter: [u64::MAX; FILTER_LEN],
            rtt_sample_count: 0,
            cycle_idx: 0,
            full_bw: 0,
            full_bw_cnt: 0,
            filled_pipe: false,
            pacing_rate: btl_bw.saturating_mul(HIGH_GAIN) / BBR_UNIT,
            cwnd: initial_cwnd,
            prior_cwnd: initial_cwnd,
            restore_cwnd: false,
            probe_rtt_done_at: 0,
            next_send_time: 0,
            mss,
        }
    }

    /// Feeds the controller one sample pair from a freshly acked
    /// segment. `bw_sample` is delivered bytes/ms scaled by
    /// `1 << BW_SCALE`, `rtt_sample` is milliseconds, `inflight` the
    /// bytes still unacked after this ack.
    pub fn on_ack(&mut self, now: u64, bw_sample: u64, rtt_sample: u64, inflight: u64) {
        // Bottleneck bandwidth: windowed max.
        shift_insert(&mut self.btl_bw_filter, bw_sample);
        self.btl_bw = *self.btl_bw_filter.iter().max().unwrap();

        if self.mode == Mode::ProbeBw {
            self.cycle_idx = (self.cycle_idx + 1) % CYCLE_LEN;
            self.pacing_gain = PROBE_BW_GAINS[self.cycle_idx];
        }

        if !self.filled_pipe {
            let thresh = self.full_bw.saturating_mul(FULL_BW_THRESH) / BBR_UNIT;
            if self.btl_bw >= thresh {
                self.full_bw = self.btl_bw;
                self.full_bw_cnt = 0;
            } else {
                self.full_bw_cnt += 1;
                if self.full_bw_cnt >= FULL_BW_ROUNDS {
                    self.filled_pipe = true;
                    debug!("BBR pipe filled, btl_bw {}", self.btl_bw);
                }
            }
        }

        match self.mode {
            Mode::Startup if self.filled_pipe => {
                self.mode = Mode::Drain;
                self.pacing_gain = DRAIN_GAIN;
                self.cwnd_gain = HIGH_GAIN;
                debug!("BBR STARTUP -> DRAIN");
            }
            Mode::Drain if inflight <= self.cwnd => {
                self.enter_probe_bw();
            }
            _ => {}
        }

        // Propagation delay: windowed min with age based expiry. The
        // estimate has expired when the window is full and the old
        // minimum aged out of it without a new sample matching it.
        shift_insert(&mut self.rt_prop_filter, rtt_sample);
        self.rtt_sample_count += 1;
        let new_min = *self.rt_prop_filter.iter().min().unwrap();
        let expired = self.rtt_sample_count > FILTER_LEN as u64 && new_min > self.rt_prop;
        self.rt_prop = new_min;

        match self.mode {
            Mode::ProbeRtt => {
                if now >= self.probe_rtt_done_at {
                    self.exit_probe_rtt();
                }
            }
            _ if expired => {
                self.enter_probe_rtt(now);
            }
            _ => {}
        }

        // Derived outputs.
        let rate = self.btl_bw.saturating_mul(self.pacing_gain) / BBR_UNIT;
        self.pacing_rate = if self.mode == Mode::Startup {
            // While starting up the rate only ever ratchets upwards
            cmp::max(self.pacing_rate, rate)
        } else {
            rate
        };

        let bdp = self.btl_bw.saturating_mul(self.rt_prop) >> BW_SCALE;
        let mut cwnd = cmp::max(
            bdp.saturating_mul(self.cwnd_gain) / BBR_UNIT,
            PROBE_RTT_SEGS * self.mss,
        );
        if self.mode == Mode::ProbeRtt {
            cwnd = cmp::min(cwnd, PROBE_RTT_SEGS * self.mss);
        }
        if self.restore_cwnd {
            // Undo the PROBE_RTT dip now that the probe is over
            cwnd = cmp::max(cwnd, self.prior_cwnd);
            self.restore_cwnd = false;
        }
        self.cwnd = cwnd;
    }

    /// Accounts a transmission of `bytes` against the pacing rate.
    pub fn on_send(&mut self, now: u64, bytes: usize) {
        let delay = if self.pacing_rate == 0 {
            0
        } else {
            ((bytes as u64) << BW_SCALE) / self.pacing_rate
        };
        self.next_send_time = now + delay;
    }

    /// Earliest time the next segment may be transmitted.
    pub fn next_send_time(&self) -> u64 {
        self.next_send_time
    }

    /// Current congestion window in bytes.
    pub fn cwnd(&self) -> u64 {
        self.cwnd
    }

    pub fn pacing_rate(&self) -> u64 {
        self.pacing_rate
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    fn enter_probe_bw(&mut self) {
        self.mode = Mode::ProbeBw;
        self.pacing_gain = BBR_UNIT;
        self.cwnd_gain = STEADY_CWND_GAIN;
        // Start anywhere in the cycle except the probing phase itself
        let offset = rand::thread_rng().gen_range(0..CYCLE_LEN - 1);
        self.cycle_idx = CYCLE_LEN - 1 - offset;
        debug!("BBR -> PROBE_BW, cycle starts at {}", self.cycle_idx);
    }

    fn enter_probe_rtt(&mut self, now: u64) {
        self.prior_cwnd = self.cwnd;
        self.mode = Mode::ProbeRtt;
        self.pacing_gain = BBR_UNIT;
        self.cwnd_gain = BBR_UNIT;
        self.probe_rtt_done_at = now + PROBE_RTT_DURATION_MS;
        debug!("BBR -> PROBE_RTT until {}", self.probe_rtt_done_at);
    }

    fn exit_probe_rtt(&mut self) {
        if self.filled_pipe {
            self.enter_probe_bw();
        } else {
            self.mode = Mode::Startup;
            self.pacing_gain = HIGH_GAIN;
            self.cwnd_gain = HIGH_GAIN;
            debug!("BBR PROBE_RTT -> STARTUP");
        }
        self.restore_cwnd = true;
    }
}

fn shift_insert(filter: &mut [u64], sample: u64) {
    for i in (1..filter.len()).rev() {
        filter[i] = filter[i - 1];
    }
    filter[0] = sample;
}

#[cfg(test)]
mod tests {
    use super::*;

    const MSS: u64 = 1440;

    fn bbr() -> Bbr {
        Bbr::new(MSS, 4 * MSS)
    }

    #[test]
    fn startup_until_bandwidth_plateaus() {
        let mut bbr = bbr();
        // Growth stalls: 100, 100, 101, 100. Three rounds without a
        // 1.25x step fill the pipe and trigger the drain.
        let samples = [100, 100, 101, 100];
        let mut now = 0;
        for (i, &bw) in samples.iter().enumerate() {
            assert_eq!(bbr.mode(), Mode::Startup, "sample {}", i);
            now += 10;
            bbr.on_ack(now, bw, 50, 1_000_000);
        }
        assert_eq!(bbr.mode(), Mode::Drain);
    }

    #[test]
    fn drain_exits_when_inflight_fits() {
        let mut bbr = bbr();
        for i in 0..4 {
            bbr.on_ack(i * 10, 100, 50, 1_000_000);
        }
        assert_eq!(bbr.mode(), Mode::Drain);
        // Queue still long: stay in drain
        bbr.on_ack(50, 100, 50, 1_000_000_000);
        assert_eq!(bbr.mode(), Mode::Drain);
        bbr.on_ack(60, 100, 50, 0);
        assert_eq!(bbr.mode(), Mode::ProbeBw);
    }

    #[test]
    fn growing_bandwidth_keeps_startup() {
        let mut bbr = bbr();
        let mut bw = 1 << 20;
        for i in 0..10 {
            bbr.on_ack(i * 10, bw, 50, 1_000_000);
            bw = bw * 3 / 2;
        }
        assert_eq!(bbr.mode(), Mode::Startup);
    }

    #[test]
    fn startup_pacing_never_decreases() {
        let mut bbr = bbr();
        bbr.on_ack(10, 500 << BW_SCALE, 50, 1_000_000);
        let rate = bbr.pacing_rate();
        bbr.on_ack(20, 100 << BW_SCALE, 50, 1_000_000);
        assert!(bbr.pacing_rate() >= rate);
    }

    #[test]
    fn cwnd_never_below_floor() {
        let mut bbr = bbr();
        bbr.on_ack(10, 1, 1, 0);
        assert_eq!(bbr.cwnd(), PROBE_RTT_SEGS * MSS);
    }

    #[test]
    fn stale_rt_prop_triggers_probe_rtt() {
        let mut bbr = bbr();
        let mut now = 0;
        // One fast round-trip, then nothing but slow ones. Once the
        // fast sample ages out of the window the estimate is stale.
        now += 10;
        bbr.on_ack(now, 100, 10, 0);
        for _ in 0..FILTER_LEN - 1 {
            now += 10;
            bbr.on_ack(now, 100, 50, 0);
            assert_ne!(bbr.mode(), Mode::ProbeRtt);
        }
        now += 10;
        bbr.on_ack(now, 100, 50, 0);
        assert_eq!(bbr.mode(), Mode::ProbeRtt);
        assert_eq!(bbr.cwnd(), PROBE_RTT_SEGS * MSS);

        // The dip is bounded: 200 ms later the controller leaves
        let prior = bbr.cwnd();
        bbr.on_ack(now + PROBE_RTT_DURATION_MS + 1, 100, 50, 0);
        assert_ne!(bbr.mode(), Mode::ProbeRtt);
        assert!(bbr.cwnd() >= prior);
    }

    #[test]
    fn probe_bw_cycles_gains() {
        let mut bbr = bbr();
        for i in 0..5 {
            bbr.on_ack(i * 10, 100 << BW_SCALE, 50, 0);
        }
        assert_eq!(bbr.mode(), Mode::ProbeBw);
        // Over one full cycle every gain from the table shows up
        let mut seen = Vec::new();
        for i in 0..CYCLE_LEN as u64 {
            bbr.on_ack(100 + i * 10, 100 << BW_SCALE, 50, 0);
            seen.push(bbr.pacing_gain);
        }
        assert!(seen.contains(&(BBR_UNIT * 5 / 4)));
        assert!(seen.contains(&(BBR_UNIT * 3 / 4)));
        assert!(seen.contains(&BBR_UNIT));
    }

    #[test]
    fn pacing_spaces_sends() {
        let mut bbr = bbr();
        // Five acks at 100 bytes/ms: plateau, drain, and land in
        // PROBE_BW with unity pacing gain
        for i in 0..5 {
            bbr.on_ack(i * 10, 100 << BW_SCALE, 50, 0);
        }
        assert_eq!(bbr.mode(), Mode::ProbeBw);
        bbr.on_send(1_000, 1_000);
        assert_eq!(bbr.next_send_time(), 1_010);
    }
}
