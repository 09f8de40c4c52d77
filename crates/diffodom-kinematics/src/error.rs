#![warn(missing_docs)]

//! Error types for the odometry integrator.
//!
//! This module defines the errors that can occur while constructing the
//! drive model or integrating wheel ticks.

use core::fmt;

/// Errors that can occur in odometry calculations.
#[derive(Debug, Clone, PartialEq)]
pub enum KinematicsError {
    /// Error for an invalid ticks-per-meter conversion factor.
    /// This variant is returned when the factor is not a positive, finite number.
    InvalidTicksPerMeter(&'static str),
    /// Error for an invalid wheel base width.
    /// This variant is returned when the base width is not a positive, finite number.
    InvalidBaseWidth(&'static str),
    /// Error for a non-positive time delta.
    /// This variant is returned when an integration step is requested over zero,
    /// negative or non-finite elapsed time.
    NonPositiveTimeDelta(&'static str),
}

impl core::fmt::Display for KinematicsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KinematicsError::InvalidTicksPerMeter(msg) => {
                write!(f, "Invalid ticks per meter: {}", msg)
            }
            KinematicsError::InvalidBaseWidth(msg) => write!(f, "Invalid base width: {}", msg),
            KinematicsError::NonPositiveTimeDelta(msg) => {
                write!(f, "Non-positive time delta: {}", msg)
            }
        }
    }
}

impl core::error::Error for KinematicsError {}
