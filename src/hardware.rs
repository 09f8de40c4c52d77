//! Hardware-bus collaborator: reading the wheel encoder counters.
//!
//! The counter chips sit on a bus (SPI on the reference robot). The node only
//! needs three transactions per channel, captured by [`EncoderBus`].
//! [`OpenChannels`] owns a bus together with the two channel handles and makes
//! sure both are closed exactly once, whichever way the process exits.

use std::fmt;
use std::time::Instant;

use diffodom_encoder::{Polarity, WrapBounds};
use rand::{Rng, SeedableRng, rngs::StdRng};
use thiserror::Error;
use tracing::{info, warn};

use crate::config::NodeConfig;
use crate::error::SetupError;

/// Which wheel a channel belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Left,
    Right,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Left => write!(f, "left"),
            Side::Right => write!(f, "right"),
        }
    }
}

/// Address of one counter chip on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelHandle {
    pub device: u8,
    pub chip_select: u8,
}

impl ChannelHandle {
    pub const fn new(device: u8, chip_select: u8) -> Self {
        ChannelHandle {
            device,
            chip_select,
        }
    }
}

impl fmt::Display for ChannelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bus{}.cs{}", self.device, self.chip_select)
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum BusError {
    #[error("transfer on {handle} failed: {reason}")]
    Transfer {
        handle: ChannelHandle,
        reason: String,
    },
    #[error("channel {0} is not initialized")]
    NotInitialized(ChannelHandle),
    #[error("no counter attached at {0}")]
    UnknownChannel(ChannelHandle),
}

/// Transactions the node performs against the encoder counters.
pub trait EncoderBus: Send {
    /// Prepare the counter for reading; also restarts its count.
    fn init_channel(&mut self, handle: ChannelHandle) -> Result<(), BusError>;
    /// Current raw register value.
    fn read_counter(&mut self, handle: ChannelHandle) -> Result<i64, BusError>;
    /// Release the channel.
    fn close_channel(&mut self, handle: ChannelHandle) -> Result<(), BusError>;
}

/// A bus with both wheel channels initialized.
///
/// Channels are re-initialized in place on reset and closed on
/// [`OpenChannels::close`] or drop, whichever comes first.
pub struct OpenChannels<B: EncoderBus> {
    bus: B,
    left: ChannelHandle,
    right: ChannelHandle,
    open: bool,
}

impl<B: EncoderBus> OpenChannels<B> {
    /// Initialize both channels. If the right one fails, the left one is
    /// closed again before the error is returned.
    pub fn open(mut bus: B, left: ChannelHandle, right: ChannelHandle) -> Result<Self, SetupError> {
        bus.init_channel(left).map_err(|source| SetupError::OpenChannel {
            side: Side::Left,
            source,
        })?;
        if let Err(source) = bus.init_channel(right) {
            if let Err(e) = bus.close_channel(left) {
                warn!(%left, error = %e, "Failed to close left encoder channel after open failure.");
            }
            return Err(SetupError::OpenChannel {
                side: Side::Right,
                source,
            });
        }

        info!(%left, %right, "Encoder channels opened.");
        Ok(OpenChannels {
            bus,
            left,
            right,
            open: true,
        })
    }

    pub fn handle(&self, side: Side) -> ChannelHandle {
        match side {
            Side::Left => self.left,
            Side::Right => self.right,
        }
    }

    pub fn read(&mut self, side: Side) -> Result<i64, BusError> {
        let handle = self.handle(side);
        if !self.open {
            return Err(BusError::NotInitialized(handle));
        }
        self.bus.read_counter(handle)
    }

    /// Re-initialize both channels without reopening them. Both are attempted
    /// even if the first fails; the first error is returned.
    pub fn reinit(&mut self) -> Result<(), BusError> {
        if !self.open {
            return Err(BusError::NotInitialized(self.left));
        }
        let left = self.bus.init_channel(self.left);
        let right = self.bus.init_channel(self.right);
        left.and(right)
    }

    /// Close both channels. Calling it again is a no-op.
    pub fn close(&mut self) {
        if !self.open {
            return;
        }
        self.open = false;
        for handle in [self.left, self.right] {
            if let Err(e) = self.bus.close_channel(handle) {
                warn!(%handle, error = %e, "Failed to close encoder channel.");
            }
        }
        info!(left = %self.left, right = %self.right, "Encoder channels closed.");
    }

    pub fn is_open(&self) -> bool {
        self.open
    }
}

impl<B: EncoderBus> Drop for OpenChannels<B> {
    fn drop(&mut self) {
        self.close();
    }
}

/// One simulated counter chip.
struct SimulatedCounter {
    handle: ChannelHandle,
    polarity: Polarity,
    ticks_per_second: f64,
    started: Option<Instant>,
}

/// In-process stand-in for the counter chips.
///
/// Each wheel turns at a constant tick rate. The count since the last
/// `init_channel` is folded into the fixed-width register range, then offset
/// and polarity are undone, so the node sees the same raw values (including
/// wraparound) that real hardware would produce.
pub struct SimulatedBus {
    bounds: WrapBounds,
    offset: i64,
    jitter_ticks: i64,
    rng: StdRng,
    counters: Vec<SimulatedCounter>,
}

impl SimulatedBus {
    pub fn new(bounds: WrapBounds, offset: i64, jitter_ticks: i64, seed: u64) -> Self {
        SimulatedBus {
            bounds,
            offset,
            jitter_ticks: jitter_ticks.saturating_abs(),
            rng: StdRng::seed_from_u64(seed),
            counters: Vec::new(),
        }
    }

    pub fn from_config(node: &NodeConfig) -> Self {
        let sim = &node.simulation;
        SimulatedBus::new(node.bounds, node.offset, sim.jitter_ticks, sim.seed)
            .with_counter(node.left_handle, node.left_polarity, sim.left_ticks_per_second)
            .with_counter(node.right_handle, node.right_polarity, sim.right_ticks_per_second)
    }

    pub fn with_counter(mut self, handle: ChannelHandle, polarity: Polarity, ticks_per_second: f64) -> Self {
        self.counters.push(SimulatedCounter {
            handle,
            polarity,
            ticks_per_second,
            started: None,
        });
        self
    }

    fn counter_mut(&mut self, handle: ChannelHandle) -> Result<&mut SimulatedCounter, BusError> {
        self.counters
            .iter_mut()
            .find(|c| c.handle == handle)
            .ok_or(BusError::UnknownChannel(handle))
    }

    /// Raw register value for a wheel that has travelled `ticks` since init.
    fn register_value(&self, polarity: Polarity, ticks: i64) -> i64 {
        let min = self.bounds.min() as i128;
        let span = self.bounds.max() as i128 - min;
        let wrapped = (ticks as i128 - min).rem_euclid(span) + min;
        (polarity.sign() as i128 * wrapped - self.offset as i128) as i64
    }
}

impl EncoderBus for SimulatedBus {
    fn init_channel(&mut self, handle: ChannelHandle) -> Result<(), BusError> {
        self.counter_mut(handle)?.started = Some(Instant::now());
        Ok(())
    }

    fn read_counter(&mut self, handle: ChannelHandle) -> Result<i64, BusError> {
        let jitter = if self.jitter_ticks > 0 {
            self.rng.random_range(-self.jitter_ticks..=self.jitter_ticks)
        } else {
            0
        };
        let counter = self.counter_mut(handle)?;
        let started = counter.started.ok_or(BusError::NotInitialized(handle))?;
        let polarity = counter.polarity;
        let travelled = (started.elapsed().as_secs_f64() * counter.ticks_per_second).round() as i64;
        let ticks = travelled.saturating_add(jitter);
        Ok(self.register_value(polarity, ticks))
    }

    fn close_channel(&mut self, handle: ChannelHandle) -> Result<(), BusError> {
        self.counter_mut(handle)?.started = None;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted bus for scheduler tests.

    use std::collections::{HashMap, VecDeque};
    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::*;

    pub const LEFT: ChannelHandle = ChannelHandle::new(0, 0);
    pub const RIGHT: ChannelHandle = ChannelHandle::new(0, 1);

    #[derive(Default)]
    pub struct Script {
        queued: HashMap<ChannelHandle, VecDeque<Result<i64, BusError>>>,
        held: HashMap<ChannelHandle, i64>,
        pub fail_init: Option<ChannelHandle>,
        pub inits: Vec<ChannelHandle>,
        pub closes: Vec<ChannelHandle>,
        pub reads: Vec<ChannelHandle>,
    }

    impl Script {
        pub fn push(&mut self, handle: ChannelHandle, raw: i64) {
            self.queued.entry(handle).or_default().push_back(Ok(raw));
        }

        pub fn push_error(&mut self, handle: ChannelHandle) {
            self.queued.entry(handle).or_default().push_back(Err(BusError::Transfer {
                handle,
                reason: "no response".into(),
            }));
        }
    }

    /// Replays queued readings; once a queue runs dry the last good value is
    /// repeated (a stationary wheel).
    #[derive(Clone, Default)]
    pub struct ScriptedBus {
        pub script: Arc<Mutex<Script>>,
    }

    impl EncoderBus for ScriptedBus {
        fn init_channel(&mut self, handle: ChannelHandle) -> Result<(), BusError> {
            let mut script = self.script.lock();
            script.inits.push(handle);
            if script.fail_init == Some(handle) {
                return Err(BusError::Transfer {
                    handle,
                    reason: "init rejected".into(),
                });
            }
            Ok(())
        }

        fn read_counter(&mut self, handle: ChannelHandle) -> Result<i64, BusError> {
            let mut script = self.script.lock();
            script.reads.push(handle);
            match script.queued.get_mut(&handle).and_then(|q| q.pop_front()) {
                Some(Ok(raw)) => {
                    script.held.insert(handle, raw);
                    Ok(raw)
                }
                Some(Err(e)) => Err(e),
                None => Ok(script.held.get(&handle).copied().unwrap_or(0)),
            }
        }

        fn close_channel(&mut self, handle: ChannelHandle) -> Result<(), BusError> {
            self.script.lock().closes.push(handle);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use diffodom_encoder::EncoderChannel;

    #[test]
    fn test_open_initializes_both_channels() {
        let bus = ScriptedBus::default();
        let script = bus.script.clone();
        let channels = OpenChannels::open(bus, LEFT, RIGHT).unwrap();

        assert!(channels.is_open());
        assert_eq!(script.lock().inits, vec![LEFT, RIGHT]);
        assert_eq!(channels.handle(Side::Right), RIGHT);
    }

    #[test]
    fn test_open_failure_closes_left_channel() {
        let bus = ScriptedBus::default();
        bus.script.lock().fail_init = Some(RIGHT);
        let script = bus.script.clone();

        let result = OpenChannels::open(bus, LEFT, RIGHT);
        assert!(matches!(
            result,
            Err(SetupError::OpenChannel { side: Side::Right, .. })
        ));
        assert_eq!(script.lock().closes, vec![LEFT]);
    }

    #[test]
    fn test_close_is_idempotent_and_runs_on_drop() {
        let bus = ScriptedBus::default();
        let script = bus.script.clone();
        let mut channels = OpenChannels::open(bus, LEFT, RIGHT).unwrap();

        channels.close();
        channels.close();
        assert!(!channels.is_open());
        assert!(matches!(channels.read(Side::Left), Err(BusError::NotInitialized(LEFT))));
        drop(channels);
        assert_eq!(script.lock().closes, vec![LEFT, RIGHT]);

        let bus = ScriptedBus::default();
        let script = bus.script.clone();
        drop(OpenChannels::open(bus, LEFT, RIGHT).unwrap());
        assert_eq!(script.lock().closes, vec![LEFT, RIGHT]);
    }

    #[test]
    fn test_reinit_attempts_both_channels() {
        let bus = ScriptedBus::default();
        let script = bus.script.clone();
        let mut channels = OpenChannels::open(bus, LEFT, RIGHT).unwrap();
        script.lock().fail_init = Some(LEFT);

        assert!(channels.reinit().is_err());
        assert_eq!(script.lock().inits, vec![LEFT, RIGHT, LEFT, RIGHT]);
    }

    #[test]
    fn test_simulated_bus_requires_init() {
        let bounds = WrapBounds::with_midpoint(-1000, 1000).unwrap();
        let mut bus = SimulatedBus::new(bounds, 0, 0, 1).with_counter(LEFT, Polarity::Normal, 0.0);

        assert_eq!(bus.read_counter(LEFT), Err(BusError::NotInitialized(LEFT)));
        assert_eq!(bus.read_counter(RIGHT), Err(BusError::UnknownChannel(RIGHT)));
        bus.init_channel(LEFT).unwrap();
        assert_eq!(bus.read_counter(LEFT), Ok(0));
        bus.close_channel(LEFT).unwrap();
        assert!(bus.read_counter(LEFT).is_err());
    }

    #[test]
    fn test_simulated_bus_saturates_extreme_settings() {
        let bounds = WrapBounds::with_midpoint(-1000, 1000).unwrap();
        let mut bus = SimulatedBus::new(bounds, 0, 5, 1)
            .with_counter(LEFT, Polarity::Normal, 1e30)
            .with_counter(RIGHT, Polarity::Inverted, f64::NAN);
        bus.init_channel(LEFT).unwrap();
        bus.init_channel(RIGHT).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(2));

        for _ in 0..20 {
            assert!(bounds.contains(bus.read_counter(LEFT).unwrap()));
            assert!(bus.read_counter(RIGHT).is_ok());
        }

        let mut bus = SimulatedBus::new(bounds, 0, i64::MIN, 1).with_counter(LEFT, Polarity::Normal, 10.0);
        bus.init_channel(LEFT).unwrap();
        assert!(bus.read_counter(LEFT).is_ok());
    }

    #[test]
    fn test_simulated_register_decodes_back_to_travel() {
        let bounds = WrapBounds::new(-1000, 1000, -400, 400).unwrap();
        let offset = 250;
        let bus = SimulatedBus::new(bounds, offset, 0, 1);

        for polarity in [Polarity::Normal, Polarity::Inverted] {
            let mut channel = EncoderChannel::new(bounds, offset, polarity);
            for ticks in (0..7000).step_by(90) {
                let raw = bus.register_value(polarity, ticks);
                assert_eq!(channel.decode(raw).unwrap(), ticks as f64);
            }
        }
    }
}
