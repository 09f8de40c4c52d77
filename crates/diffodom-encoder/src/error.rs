//! This module defines the error types used by the `diffodom-encoder` crate.

#![warn(missing_docs)]

/// Error type for encoder decoding.
///
/// This enum covers invalid wrap bounds supplied at configuration time and
/// readings that cannot be decoded at run time.
#[derive(Debug, Clone, PartialEq)]
pub enum EncoderError {
    /// Error for invalid wrap bounds.
    /// This variant is returned when `min < low_wrap <= high_wrap < max` does not hold.
    InvalidBounds(&'static str),
    /// Error for a reading outside the representable counter range.
    /// The value is the counter after offset and polarity were applied.
    OutOfRange {
        /// The offending value.
        value: i64,
        /// Lower end of the range.
        min: i64,
        /// Upper end of the range.
        max: i64,
    },
    /// Error for a raw reading whose offset correction overflows `i64`.
    Overflow(i64),
}

impl core::fmt::Display for EncoderError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            EncoderError::InvalidBounds(msg) => write!(f, "Invalid wrap bounds: {}", msg),
            EncoderError::OutOfRange { value, min, max } => {
                write!(f, "Encoder value {} outside [{}, {}]", value, min, max)
            }
            EncoderError::Overflow(raw) => {
                write!(f, "Encoder reading {} overflows when offset is applied", raw)
            }
        }
    }
}

impl core::error::Error for EncoderError {}
