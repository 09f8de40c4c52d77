#![cfg_attr(not(test), no_std)]
#![warn(missing_docs)]
#![doc = "A `no_std` library for differential-drive wheel odometry."]
#![doc = ""]
#![doc = "This crate provides structures and functions for integrating left/right wheel"]
#![doc = "tick counts into an accumulated pose, chassis velocity and signed path length."]

use core::fmt;
use libm::{cos, sin};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

pub mod error;
pub use error::KinematicsError;

/// A 2‑D pose `(x, y, θ)` in meters and radians (θ measured counter‑clockwise
/// from the x‑axis in the world frame).
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Pose {
    /// World‑frame x position (m).
    pub x: f64,
    /// World‑frame y position (m).
    pub y: f64,
    /// Heading (rad). Accumulated without bound, it is never wrapped into
    /// `[-PI, PI)`; consumers must cope with large magnitudes.
    pub theta: f64,
}

impl Pose {
    /// Construct a new pose.
    ///
    /// # Arguments
    ///
    /// * `x`: World-frame x position in meters.
    /// * `y`: World-frame y position in meters.
    /// * `theta`: Heading in radians.
    pub const fn new(x: f64, y: f64, theta: f64) -> Self {
        Pose { x, y, theta }
    }

    /// The heading expressed as a planar rotation quaternion.
    pub fn orientation(&self) -> Quaternion {
        Quaternion::from_yaw(self.theta)
    }
}

impl fmt::Display for Pose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(x: {:.3}, y: {:.3}, θ: {:.3} rad)", self.x, self.y, self.theta)
    }
}

/// A rotation quaternion `(x, y, z, w)` with `w` as the scalar part.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quaternion {
    /// x component.
    pub x: f64,
    /// y component.
    pub y: f64,
    /// z component.
    pub z: f64,
    /// Scalar component.
    pub w: f64,
}

impl Quaternion {
    /// Rotation of `yaw` radians about the vertical axis, with zero roll and
    /// pitch: `(0, 0, sin(yaw/2), cos(yaw/2))`.
    pub fn from_yaw(yaw: f64) -> Self {
        let half = yaw / 2.0;
        Quaternion {
            x: 0.0,
            y: 0.0,
            z: sin(half),
            w: cos(half),
        }
    }
}

impl Default for Quaternion {
    fn default() -> Self {
        Quaternion::from_yaw(0.0)
    }
}

/// A twist expressed in the robot base frame.
/// A twist represents the linear and angular velocities of the robot.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Twist {
    /// Linear x velocity (m/s) along the robot's heading.
    pub vx: f64,
    /// Angular z velocity (rad/s) around the robot's vertical axis.
    pub wz: f64,
}

impl Twist {
    /// Construct a new twist.
    ///
    /// # Arguments
    ///
    /// * `vx`: Linear velocity along the robot's x-axis (m/s).
    /// * `wz`: Angular velocity around the robot's z-axis (rad/s).
    pub const fn new(vx: f64, wz: f64) -> Self {
        Twist { vx, wz }
    }
}

impl fmt::Display for Twist {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(vx: {:.3} m/s, ωz: {:.3} rad/s)", self.vx, self.wz)
    }
}

/// Unwrapped cumulative tick counts of the left and right wheels.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct WheelTicks {
    /// Left wheel ticks.
    pub left: f64,
    /// Right wheel ticks.
    pub right: f64,
}

impl WheelTicks {
    /// Construct wheel ticks.
    pub const fn new(left: f64, right: f64) -> Self {
        WheelTicks { left, right }
    }
}

impl fmt::Display for WheelTicks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(L: {:.0} ticks, R: {:.0} ticks)", self.left, self.right)
    }
}

/// Result of integrating one cycle of wheel motion.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct OdometryStep {
    /// Pose after applying this cycle's motion.
    pub pose: Pose,
    /// Instantaneous velocity over this cycle.
    pub twist: Twist,
    /// Signed distance to add to the accumulated path length.
    pub path_delta: f64,
    /// Average travel of the two wheels this cycle (m).
    pub distance: f64,
    /// Heading change this cycle (rad).
    pub delta_theta: f64,
}

/// Differential‑drive odometry model.
///
/// This struct encapsulates the physical parameters needed to turn encoder
/// ticks into chassis motion: the tick-to-meter conversion factor and the
/// distance between the two drive wheels.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DifferentialDrive {
    /// Encoder ticks per meter of wheel travel.
    ticks_per_meter: f64,
    /// Wheel base width (m).
    base_width: f64,
}

impl DifferentialDrive {
    /// Construct a new differential‑drive odometry model.
    ///
    /// # Arguments
    ///
    /// * `ticks_per_meter`: Encoder ticks counted per meter of wheel travel.
    /// * `base_width`: The distance between the centers of the two drive wheels in meters.
    ///
    /// # Errors
    ///
    /// Returns `Err(KinematicsError::InvalidTicksPerMeter)` if `ticks_per_meter` is not positive and finite.
    /// Returns `Err(KinematicsError::InvalidBaseWidth)` if `base_width` is not positive and finite.
    pub fn new(ticks_per_meter: f64, base_width: f64) -> Result<Self, KinematicsError> {
        if !(ticks_per_meter > 0.0 && ticks_per_meter.is_finite()) {
            return Err(KinematicsError::InvalidTicksPerMeter(
                "must be positive and finite",
            ));
        }
        if !(base_width > 0.0 && base_width.is_finite()) {
            return Err(KinematicsError::InvalidBaseWidth(
                "must be positive and finite",
            ));
        }
        Ok(DifferentialDrive {
            ticks_per_meter,
            base_width,
        })
    }

    /// Returns the ticks-per-meter conversion factor.
    pub fn ticks_per_meter(&self) -> f64 {
        self.ticks_per_meter
    }

    /// Returns the wheel base width.
    pub fn base_width(&self) -> f64 {
        self.base_width
    }

    /// Converts tick counts into the meters travelled by each wheel since
    /// `previous`. Without a baseline both wheels are treated as stationary.
    pub fn wheel_travel(&self, previous: Option<WheelTicks>, current: WheelTicks) -> (f64, f64) {
        match previous {
            Some(previous) => (
                (current.left - previous.left) / self.ticks_per_meter,
                (current.right - previous.right) / self.ticks_per_meter,
            ),
            None => (0.0, 0.0),
        }
    }

    /// Calculates the chassis motion from the travel of each wheel.
    /// This is the forward kinematics problem over one cycle.
    ///
    /// # Returns
    ///
    /// `(d, d_theta)`: the average linear travel and the heading change, the
    /// latter using the small-angle approximation.
    pub fn forward_kinematics(&self, d_left: f64, d_right: f64) -> (f64, f64) {
        let d = (d_left + d_right) / 2.0;
        let d_theta = (d_right - d_left) / self.base_width;
        (d, d_theta)
    }

    /// Integrates one cycle of wheel motion into `pose`.
    ///
    /// The displacement is first expressed in the robot frame at the start of
    /// the cycle, accounting for the curvature turned during the cycle, and
    /// then rotated into the world frame with the heading *before* this
    /// cycle's update. The heading is accumulated without normalization.
    ///
    /// # Arguments
    ///
    /// * `pose`: The pose at the start of the cycle.
    /// * `previous`: Tick counts at the start of the cycle, `None` right after start or reset.
    /// * `current`: Tick counts now.
    /// * `elapsed`: Time since the previous cycle in seconds.
    ///
    /// # Errors
    ///
    /// Returns `Err(KinematicsError::NonPositiveTimeDelta)` if `elapsed` is not a positive, finite number.
    pub fn integrate(
        &self,
        pose: Pose,
        previous: Option<WheelTicks>,
        current: WheelTicks,
        elapsed: f64,
    ) -> Result<OdometryStep, KinematicsError> {
        if !(elapsed > 0.0 && elapsed.is_finite()) {
            return Err(KinematicsError::NonPositiveTimeDelta(
                "must be positive and finite",
            ));
        }

        let (d_left, d_right) = self.wheel_travel(previous, current);
        let (d, d_theta) = self.forward_kinematics(d_left, d_right);

        let twist = Twist::new(d / elapsed, d_theta / elapsed);

        let mut next = pose;
        if d != 0.0 {
            let local_x = cos(d_theta) * d;
            let local_y = -sin(d_theta) * d;

            next.x += cos(pose.theta) * local_x - sin(pose.theta) * local_y;
            next.y += sin(pose.theta) * local_x + cos(pose.theta) * local_y;
        }
        if d_theta != 0.0 {
            next.theta += d_theta;
        }

        Ok(OdometryStep {
            pose: next,
            twist,
            path_delta: if d != 0.0 { d } else { 0.0 },
            distance: d,
            delta_theta: d_theta,
        })
    }
}

impl fmt::Display for DifferentialDrive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "DifferentialDrive ({:.1} ticks/m, base: {:.3} m)",
            self.ticks_per_meter, self.base_width
        )
    }
}

/// Accumulating odometry estimate.
///
/// Owns the drive model together with everything that persists between
/// cycles: the pose, the latest twist, the signed path length and the tick
/// baseline used to compute the next cycle's deltas.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct Odometry {
    drive: DifferentialDrive,
    pose: Pose,
    twist: Twist,
    path_length: f64,
    baseline: Option<WheelTicks>,
}

impl Odometry {
    /// Start a zeroed estimate for the given drive model.
    pub fn new(drive: DifferentialDrive) -> Self {
        Odometry {
            drive,
            pose: Pose::default(),
            twist: Twist::default(),
            path_length: 0.0,
            baseline: None,
        }
    }

    /// Integrates the latest tick counts and advances the baseline.
    ///
    /// The first update after construction or [`Odometry::reset`] only
    /// establishes the baseline and reports zero motion.
    ///
    /// # Errors
    ///
    /// Propagates [`KinematicsError::NonPositiveTimeDelta`]; the estimate is left
    /// untouched in that case.
    pub fn update(&mut self, current: WheelTicks, elapsed: f64) -> Result<OdometryStep, KinematicsError> {
        let step = self
            .drive
            .integrate(self.pose, self.baseline, current, elapsed)?;

        self.pose = step.pose;
        self.twist = step.twist;
        self.path_length += step.path_delta;
        self.baseline = Some(current);

        Ok(step)
    }

    /// Zero the pose, velocity and path length and forget the tick baseline.
    pub fn reset(&mut self) {
        self.pose = Pose::default();
        self.twist = Twist::default();
        self.path_length = 0.0;
        self.baseline = None;
    }

    /// Returns the drive model.
    pub fn drive(&self) -> &DifferentialDrive {
        &self.drive
    }

    /// Returns the accumulated pose.
    pub fn pose(&self) -> Pose {
        self.pose
    }

    /// Returns the velocity computed by the last update.
    pub fn twist(&self) -> Twist {
        self.twist
    }

    /// Returns the net signed distance travelled. Reverse travel decreases it.
    pub fn path_length(&self) -> f64 {
        self.path_length
    }

    /// Returns the tick counts the next update will be measured against.
    pub fn baseline(&self) -> Option<WheelTicks> {
        self.baseline
    }
}
