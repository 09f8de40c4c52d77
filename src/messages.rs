//! Records published once per integrated cycle.
//!
//! Layouts follow the usual robotics message conventions: an odometry record
//! (pose + twist with frame ids), a bare scalar for the accumulated path
//! length, and a transform from the fixed frame to the robot body.

use std::time::{Instant, SystemTime};

use diffodom_kinematics::{Pose, Quaternion, Twist};
use tracing::trace;

use crate::bus::Topic;
use crate::config::FrameSettings;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Point {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Point {
    pub fn planar(pose: &Pose) -> Self {
        Point {
            x: pose.x,
            y: pose.y,
            z: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Header {
    pub seq: u64,
    pub stamp: SystemTime,
    pub frame_id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OdometryRecord {
    pub header: Header,
    pub child_frame_id: String,
    pub position: Point,
    pub orientation: Quaternion,
    /// `vx` along the heading, `wz` about the vertical axis.
    pub twist: Twist,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PathLengthRecord {
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransformRecord {
    pub stamp: SystemTime,
    pub parent_frame_id: String,
    pub child_frame_id: String,
    pub translation: Point,
    pub rotation: Quaternion,
}

/// Wall-clock time of a monotonic instant already in the past. Instants in
/// the future map to the current time.
pub fn wall_clock(at: Instant) -> SystemTime {
    let now = SystemTime::now();
    now.checked_sub(Instant::now().saturating_duration_since(at))
        .unwrap_or(now)
}

/// Request to zero the estimate. Carries nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResetCommand;

/// The three output topics plus the frame names stamped on them.
#[derive(Debug, Clone)]
pub struct Outputs {
    frames: FrameSettings,
    pub odometry: Topic<OdometryRecord>,
    pub path_length: Topic<PathLengthRecord>,
    pub transform: Topic<TransformRecord>,
}

impl Outputs {
    pub fn new(frames: FrameSettings, capacity: usize) -> Self {
        Outputs {
            frames,
            odometry: Topic::new(capacity),
            path_length: Topic::new(capacity),
            transform: Topic::new(capacity),
        }
    }

    /// Publishes transform, odometry and path length for one cycle, all
    /// stamped with the time the cycle sampled the encoders.
    pub fn emit(&self, seq: u64, stamp: SystemTime, pose: Pose, twist: Twist, path_length: f64) {
        let position = Point::planar(&pose);
        let orientation = pose.orientation();

        self.transform.publish(TransformRecord {
            stamp,
            parent_frame_id: self.frames.transform_parent_frame.clone(),
            child_frame_id: self.frames.base_frame.clone(),
            translation: position,
            rotation: orientation,
        });

        let delivered = self.odometry.publish(OdometryRecord {
            header: Header {
                seq,
                stamp,
                frame_id: self.frames.odom_frame.clone(),
            },
            child_frame_id: self.frames.base_frame.clone(),
            position,
            orientation,
            twist,
        });
        trace!(seq, delivered, "Odometry record published.");

        self.publish_path_length(path_length);
    }

    pub fn publish_path_length(&self, value: f64) {
        self.path_length.publish(PathLengthRecord { value });
    }
}
