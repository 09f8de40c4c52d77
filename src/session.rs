use std::error::Error;
use std::sync::Arc;
use std::time::{Duration, Instant};

use diffodom_encoder::EncoderChannel;
use diffodom_kinematics::{Odometry, Pose, Twist};
use parking_lot::Mutex;
use tracing::{info, warn};

use crate::config::NodeConfig;
use crate::hardware::{BusError, EncoderBus, OpenChannels};
use crate::scheduler::RateGate;

const MAX_FAULTS: usize = 10;

/// Everything the odometry loop mutates, owned in one place.
///
/// The cycle and the reset handler both take `&mut Session`, so sharing it
/// through [`SharedSession`] serializes them.
pub struct Session<B: EncoderBus> {
    pub(crate) channels: OpenChannels<B>,
    pub(crate) left: EncoderChannel,
    pub(crate) right: EncoderChannel,
    pub(crate) odometry: Odometry,
    pub(crate) gate: RateGate,
    pub(crate) last_stamp: Instant,
    pub(crate) seq: u64,
    faults: Vec<String>,
    fault_count: u64,
}

pub type SharedSession<B> = Arc<Mutex<Session<B>>>;

/// Point-in-time copy of the session for status reporting.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub pose: Pose,
    pub twist: Twist,
    pub path_length: f64,
    pub next_seq: u64,
    pub left_ticks: f64,
    pub right_ticks: f64,
    pub left_multiplier: i64,
    pub right_multiplier: i64,
    pub fault_count: u64,
    pub faults: Vec<String>,
}

impl<B: EncoderBus> Session<B> {
    pub fn new(
        channels: OpenChannels<B>,
        left: EncoderChannel,
        right: EncoderChannel,
        odometry: Odometry,
        period: Duration,
        now: Instant,
    ) -> Self {
        Session {
            channels,
            left,
            right,
            odometry,
            gate: RateGate::new(period, now),
            last_stamp: now,
            seq: 0,
            faults: Vec::new(),
            fault_count: 0,
        }
    }

    pub fn from_config(channels: OpenChannels<B>, node: &NodeConfig, now: Instant) -> Self {
        Session::new(
            channels,
            EncoderChannel::new(node.bounds, node.offset, node.left_polarity),
            EncoderChannel::new(node.bounds, node.offset, node.right_polarity),
            Odometry::new(node.drive),
            node.period,
            now,
        )
    }

    pub fn into_shared(self) -> SharedSession<B> {
        Arc::new(Mutex::new(self))
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            pose: self.odometry.pose(),
            twist: self.odometry.twist(),
            path_length: self.odometry.path_length(),
            next_seq: self.seq,
            left_ticks: self.left.unwrapped(),
            right_ticks: self.right.unwrapped(),
            left_multiplier: self.left.multiplier(),
            right_multiplier: self.right.multiplier(),
            fault_count: self.fault_count,
            faults: self.faults.clone(),
        }
    }

    /// Records a fault. Repeated messages are only kept once; the list holds
    /// the most recent distinct faults.
    pub fn raise_fault(&mut self, err: &dyn Error) {
        self.fault_count += 1;
        let msg = describe(err);
        if !self.faults.iter().any(|s| *s == msg) {
            if self.faults.len() >= MAX_FAULTS {
                self.faults.remove(0);
            }
            self.faults.push(msg);
        }
    }

    /// Zeroes decoders, pose, velocity and timing, then re-initializes both
    /// encoder channels. Nothing is published for the reset itself, and the
    /// sequence counter keeps counting.
    pub fn reset(&mut self, now: Instant) -> Result<(), BusError> {
        self.left.reset();
        self.right.reset();
        self.odometry.reset();
        self.last_stamp = now;
        self.gate.restart(now);

        if let Err(e) = self.channels.reinit() {
            warn!(error = %e, "Encoder re-initialization failed during reset.");
            self.raise_fault(&e);
            return Err(e);
        }
        info!(next_seq = self.seq, "Odometry reset.");
        Ok(())
    }

    pub fn close_channels(&mut self) {
        self.channels.close();
    }
}

/// Renders an error with its source chain on one line.
pub fn describe(err: &dyn Error) -> String {
    let mut msg = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        msg.push_str(": ");
        msg.push_str(&cause.to_string());
        source = cause.source();
    }
    msg
}
