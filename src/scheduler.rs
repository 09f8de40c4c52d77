use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use diffodom_kinematics::WheelTicks;
use spin_sleep::SpinSleeper;
use tracing::{debug, info, warn};

use crate::error::CycleFault;
use crate::hardware::{EncoderBus, Side};
use crate::messages::{Outputs, wall_clock};
use crate::session::{Session, SharedSession, describe};

/// Lets a cycle through at most once per period.
///
/// The threshold advances by one period each time it is crossed, so a late
/// pass does not shift the grid. A caller that has fallen more than a full
/// period behind gets the threshold re-anchored to `now + period` instead of a
/// burst of catch-up passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateGate {
    period: Duration,
    next: Instant,
}

impl RateGate {
    pub fn new(period: Duration, now: Instant) -> Self {
        RateGate {
            period,
            next: now + period,
        }
    }

    pub fn try_pass(&mut self, now: Instant) -> bool {
        if now < self.next {
            return false;
        }
        self.next += self.period;
        if self.next + self.period <= now {
            self.next = now + self.period;
        }
        true
    }

    pub fn restart(&mut self, now: Instant) {
        self.next = now + self.period;
    }

    pub fn period(&self) -> Duration {
        self.period
    }
}

#[derive(Debug, Clone)]
pub enum CycleOutcome {
    Emitted { seq: u64 },
    Gated,
    Faulted(CycleFault),
}

/// Counters reported by the odometry thread when it exits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleStats {
    pub cycles: u64,
    pub emitted: u64,
    pub gated: u64,
    pub faulted: u64,
    pub overruns: u64,
}

impl CycleStats {
    fn record(&mut self, outcome: &CycleOutcome) {
        self.cycles += 1;
        match outcome {
            CycleOutcome::Emitted { .. } => self.emitted += 1,
            CycleOutcome::Gated => self.gated += 1,
            CycleOutcome::Faulted(_) => self.faulted += 1,
        }
    }
}

impl<B: EncoderBus> Session<B> {
    /// Runs one cycle: sample both encoders, then integrate and publish if the
    /// rate gate lets it through. A fault skips the cycle and keeps the pose.
    pub fn cycle(&mut self, now: Instant, outputs: &Outputs) -> CycleOutcome {
        match self.advance(now) {
            Ok(false) => CycleOutcome::Gated,
            Ok(true) => {
                let seq = self.seq;
                self.seq += 1;
                let pose = self.odometry.pose();
                let twist = self.odometry.twist();
                let path_length = self.odometry.path_length();
                outputs.emit(seq, wall_clock(now), pose, twist, path_length);
                debug!(seq, %pose, %twist, path_length, "Odometry emitted.");
                CycleOutcome::Emitted { seq }
            }
            Err(fault) => {
                warn!(error = %describe(&fault), "Odometry cycle skipped.");
                self.raise_fault(&fault);
                CycleOutcome::Faulted(fault)
            }
        }
    }

    fn advance(&mut self, now: Instant) -> Result<bool, CycleFault> {
        let right_raw = self
            .channels
            .read(Side::Right)
            .map_err(|source| CycleFault::Bus {
                side: Side::Right,
                source,
            })?;
        let left_raw = self
            .channels
            .read(Side::Left)
            .map_err(|source| CycleFault::Bus {
                side: Side::Left,
                source,
            })?;

        let right = self
            .right
            .decode(right_raw)
            .map_err(|source| CycleFault::Decode {
                side: Side::Right,
                source,
            })?;
        let left = self
            .left
            .decode(left_raw)
            .map_err(|source| CycleFault::Decode {
                side: Side::Left,
                source,
            })?;

        let elapsed = now.saturating_duration_since(self.last_stamp).as_secs_f64();
        if !self.gate.try_pass(now) {
            return Ok(false);
        }
        if elapsed <= 0.0 {
            return Err(CycleFault::Stalled {
                elapsed_secs: elapsed,
            });
        }

        self.odometry.update(WheelTicks::new(left, right), elapsed)?;
        self.last_stamp = now;
        Ok(true)
    }
}

/// Closes the encoder channels when the odometry thread exits, unwinding
/// included.
struct CloseOnExit<B: EncoderBus>(SharedSession<B>);

impl<B: EncoderBus> Drop for CloseOnExit<B> {
    fn drop(&mut self) {
        self.0.lock().close_channels();
    }
}

/// Starts the fixed-rate odometry thread. It runs until `shutdown` is set and
/// returns its counters on join.
pub fn spawn<B: EncoderBus + 'static>(
    session: SharedSession<B>,
    outputs: Outputs,
    shutdown: Arc<AtomicBool>,
) -> io::Result<JoinHandle<CycleStats>> {
    let period = session.lock().gate.period();
    thread::Builder::new()
        .name("odometry".into())
        .spawn(move || run(session, outputs, period, shutdown))
}

fn run<B: EncoderBus>(
    session: SharedSession<B>,
    outputs: Outputs,
    period: Duration,
    shutdown: Arc<AtomicBool>,
) -> CycleStats {
    let _guard = CloseOnExit(Arc::clone(&session));
    info!(?period, "Odometry thread started.");

    let sleeper = SpinSleeper::new(100_000);
    let mut stats = CycleStats::default();
    let mut deadline = Instant::now() + period;

    while !shutdown.load(Ordering::Acquire) {
        let now = Instant::now();
        if now < deadline {
            sleeper.sleep(deadline - now);
        }

        let outcome = session.lock().cycle(Instant::now(), &outputs);
        stats.record(&outcome);

        deadline += period;
        let after = Instant::now();
        if deadline <= after {
            stats.overruns += 1;
            debug!(behind = ?(after - deadline), "Odometry cycle overran; re-anchoring.");
            deadline = after + period;
        }
    }

    info!(
        cycles = stats.cycles,
        emitted = stats.emitted,
        faulted = stats.faulted,
        "Odometry thread stopping."
    );
    stats
}
