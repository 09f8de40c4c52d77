use diffodom_encoder::EncoderError;
use diffodom_kinematics::KinematicsError;
use thiserror::Error;

use crate::hardware::{BusError, Side};

/// Problems found before the scheduler starts. All of them are fatal.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("failed to load configuration")]
    Load(#[from] config::ConfigError),
    #[error("update rate must be positive and finite, got {0} Hz")]
    InvalidRate(f64),
    #[error("invalid drive geometry")]
    Kinematics(#[from] KinematicsError),
    #[error("invalid encoder range")]
    Encoder(#[from] EncoderError),
    #[error("{side} encoder sign must be 1 or -1, got {sign}")]
    InvalidPolarity { side: Side, sign: i64 },
    #[error("invalid simulation settings: {0}")]
    InvalidSimulation(&'static str),
    #[error("failed to open {side} encoder channel")]
    OpenChannel {
        side: Side,
        #[source]
        source: BusError,
    },
}

/// A cycle that could not be integrated. The pose from the previous cycle is
/// kept and the loop carries on.
#[derive(Debug, Clone, Error)]
pub enum CycleFault {
    #[error("reading {side} encoder failed")]
    Bus {
        side: Side,
        #[source]
        source: BusError,
    },
    #[error("{side} encoder reading rejected")]
    Decode {
        side: Side,
        #[source]
        source: EncoderError,
    },
    #[error("clock did not advance since the last cycle ({elapsed_secs} s)")]
    Stalled { elapsed_secs: f64 },
    #[error("integration rejected")]
    Kinematics(#[from] KinematicsError),
}
