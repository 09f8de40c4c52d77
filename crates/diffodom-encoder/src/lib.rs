#![cfg_attr(not(test), no_std)]
#![warn(missing_docs)]
#![doc = "A `no_std` library for decoding incremental rotary-encoder counters."]
#![doc = ""]
#![doc = "Hardware counters are fixed-width registers that wrap around. This crate"]
#![doc = "tracks wrap crossings between consecutive samples and turns the raw readings"]
#![doc = "into a continuous, signed tick count per wheel."]

use core::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

pub mod error;
pub use error::EncoderError;

/// Representable range of the raw counter and the thresholds used to detect
/// a wrap between two samples.
///
/// Invariant: `min < low_wrap <= high_wrap < max`.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WrapBounds {
    min: i64,
    max: i64,
    low_wrap: i64,
    high_wrap: i64,
}

impl WrapBounds {
    /// Construct wrap bounds.
    ///
    /// # Errors
    ///
    /// Returns `Err(EncoderError::InvalidBounds)` unless
    /// `min < low_wrap <= high_wrap < max`.
    pub fn new(min: i64, max: i64, low_wrap: i64, high_wrap: i64) -> Result<Self, EncoderError> {
        if min >= max {
            return Err(EncoderError::InvalidBounds("min must be below max"));
        }
        if low_wrap <= min {
            return Err(EncoderError::InvalidBounds("low wrap must be above min"));
        }
        if high_wrap >= max {
            return Err(EncoderError::InvalidBounds("high wrap must be below max"));
        }
        if low_wrap > high_wrap {
            return Err(EncoderError::InvalidBounds(
                "low wrap must not exceed high wrap",
            ));
        }
        Ok(WrapBounds {
            min,
            max,
            low_wrap,
            high_wrap,
        })
    }

    /// Bounds with both thresholds at the middle of the range.
    pub fn with_midpoint(min: i64, max: i64) -> Result<Self, EncoderError> {
        let mid = Self::midpoint(min, max);
        Self::new(min, max, mid, mid)
    }

    /// `(max - min) / 2 + min`, rounded toward negative infinity.
    pub fn midpoint(min: i64, max: i64) -> i64 {
        let mid = (max as i128 - min as i128).div_euclid(2) + min as i128;
        mid as i64
    }

    /// Lower end of the counter range.
    pub fn min(&self) -> i64 {
        self.min
    }

    /// Upper end of the counter range.
    pub fn max(&self) -> i64 {
        self.max
    }

    /// Threshold below which a sample counts as the low side of the range.
    pub fn low_wrap(&self) -> i64 {
        self.low_wrap
    }

    /// Threshold above which a sample counts as the high side of the range.
    pub fn high_wrap(&self) -> i64 {
        self.high_wrap
    }

    /// Ticks covered by one full wrap cycle, `max - min`.
    pub fn span(&self) -> f64 {
        (self.max as i128 - self.min as i128) as f64
    }

    /// Whether `value` lies within `[min, max]`.
    pub fn contains(&self, value: i64) -> bool {
        (self.min..=self.max).contains(&value)
    }
}

impl fmt::Display for WrapBounds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}, {}] wraps at {}/{}",
            self.min, self.max, self.low_wrap, self.high_wrap
        )
    }
}

/// Counting direction of a channel relative to forward wheel travel.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Polarity {
    /// Counter increases when the wheel drives forward.
    #[default]
    Normal,
    /// Counter decreases when the wheel drives forward.
    Inverted,
}

impl Polarity {
    /// Polarity for a `+1` / `-1` sign, `None` for anything else.
    pub fn from_sign(sign: i64) -> Option<Self> {
        match sign {
            1 => Some(Polarity::Normal),
            -1 => Some(Polarity::Inverted),
            _ => None,
        }
    }

    /// `+1` or `-1`.
    pub fn sign(&self) -> i64 {
        match self {
            Polarity::Normal => 1,
            Polarity::Inverted => -1,
        }
    }
}

/// Decoder state for one wheel's counter.
///
/// The decoder must be fed fast enough that the hardware counter cannot wrap
/// more than once between two consecutive calls to [`EncoderChannel::decode`].
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct EncoderChannel {
    bounds: WrapBounds,
    offset: i64,
    polarity: Polarity,
    /// Full wrap cycles observed, signed.
    multiplier: i64,
    /// Last corrected reading before the multiplier was applied.
    previous_raw: i64,
    unwrapped: f64,
}

impl EncoderChannel {
    /// A channel in its startup state.
    ///
    /// # Arguments
    ///
    /// * `bounds`: Counter range and wrap thresholds.
    /// * `offset`: Bias added to every raw reading, compensating a known nonzero
    ///   start value of the hardware register.
    /// * `polarity`: Counting direction of this wheel.
    pub fn new(bounds: WrapBounds, offset: i64, polarity: Polarity) -> Self {
        EncoderChannel {
            bounds,
            offset,
            polarity,
            multiplier: 0,
            previous_raw: 0,
            unwrapped: 0.0,
        }
    }

    /// Decodes a raw counter reading into an unwrapped tick count.
    ///
    /// # Errors
    ///
    /// Returns `Err(EncoderError::Overflow)` if applying the offset overflows and
    /// `Err(EncoderError::OutOfRange)` if the corrected value is outside the
    /// counter range. The channel state is unchanged on error.
    pub fn decode(&mut self, raw: i64) -> Result<f64, EncoderError> {
        let enc = self.correct(raw)?;

        if enc < self.bounds.low_wrap && self.previous_raw > self.bounds.high_wrap {
            self.multiplier += 1;
        }
        if enc > self.bounds.high_wrap && self.previous_raw < self.bounds.low_wrap {
            self.multiplier -= 1;
        }

        self.unwrapped = enc as f64 + self.multiplier as f64 * self.bounds.span();
        self.previous_raw = enc;

        Ok(self.unwrapped)
    }

    /// Applies offset and polarity and checks the result against the range.
    pub fn correct(&self, raw: i64) -> Result<i64, EncoderError> {
        let enc = raw
            .checked_add(self.offset)
            .and_then(|v| v.checked_mul(self.polarity.sign()))
            .ok_or(EncoderError::Overflow(raw))?;

        if !self.bounds.contains(enc) {
            return Err(EncoderError::OutOfRange {
                value: enc,
                min: self.bounds.min,
                max: self.bounds.max,
            });
        }
        Ok(enc)
    }

    /// Return to the startup state, keeping bounds, offset and polarity.
    pub fn reset(&mut self) {
        self.multiplier = 0;
        self.previous_raw = 0;
        self.unwrapped = 0.0;
    }

    /// Signed number of wrap cycles observed.
    pub fn multiplier(&self) -> i64 {
        self.multiplier
    }

    /// Last corrected reading, before the multiplier was applied.
    pub fn previous_raw(&self) -> i64 {
        self.previous_raw
    }

    /// Current unwrapped tick count.
    pub fn unwrapped(&self) -> f64 {
        self.unwrapped
    }

    /// Counter range and wrap thresholds.
    pub fn bounds(&self) -> &WrapBounds {
        &self.bounds
    }

    /// Bias added to every raw reading.
    pub fn offset(&self) -> i64 {
        self.offset
    }

    /// Counting direction.
    pub fn polarity(&self) -> Polarity {
        self.polarity
    }
}
