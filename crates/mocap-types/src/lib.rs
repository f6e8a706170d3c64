//! Shared vocabulary for the mocap bridge: capture frames, outbound pose
//! samples, and the crate-spanning error type.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Millimetres per metre; capture servers report positions in millimetres.
pub const MM_PER_METRE: f64 = 1000.0;

/// Position of a rigid body as reported by the capture server (millimetres).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Position {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

/// Row-major 3×3 rotation matrix of a rigid body.
///
/// The bridge never interprets it; it is carried from the frame into the
/// outbound sample unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rotation(pub [f32; 9]);

impl Rotation {
    pub fn identity() -> Self {
        Self([1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0])
    }
}

impl Default for Rotation {
    fn default() -> Self {
        Self::identity()
    }
}

/// One body's pose inside a [`RawFrame`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BodyPose {
    pub position: Position,
    pub rotation: Rotation,
}

impl BodyPose {
    pub fn new(position: Position, rotation: Rotation) -> Self {
        Self { position, rotation }
    }

    /// Convenience constructor used by simulators and tests.
    pub fn at_mm(x: f32, y: f32, z: f32) -> Self {
        Self::new(Position::new(x, y, z), Rotation::identity())
    }
}

/// One sample of the capture stream.
///
/// `bodies` is ordered exactly like the body listing of the capture
/// description: slot `i` belongs to the body with index `i`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawFrame {
    /// Capture timestamp in microseconds, as reported by the server.
    pub timestamp_us: u64,
    pub frame_number: u32,
    pub bodies: Vec<BodyPose>,
}

impl RawFrame {
    pub fn new(frame_number: u32, bodies: Vec<BodyPose>) -> Self {
        Self {
            timestamp_us: 0,
            frame_number,
            bodies,
        }
    }
}

/// A point in metres.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Point3 {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Convert a capture-space [`Position`] (millimetres) into metres.
    pub fn from_millimetres(p: Position) -> Self {
        Self::new(
            f64::from(p.x) / MM_PER_METRE,
            f64::from(p.y) / MM_PER_METRE,
            f64::from(p.z) / MM_PER_METRE,
        )
    }
}

/// The bridge's output: one timestamped pose of the tracked body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoseSample {
    /// Wall-clock time taken when the frame was translated.
    pub stamp: DateTime<Utc>,
    /// Name of the rigid body this pose belongs to.
    pub body: String,
    /// Frame number of the source [`RawFrame`].
    pub frame_number: u32,
    /// Position in metres.
    pub position: Point3,
    pub rotation: Rotation,
}

/// Error type shared by every crate of the bridge.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BridgeError {
    #[error("Connection Failure: {0}")]
    Connection(String),

    #[error("Description Parse Error: {0}")]
    Parse(String),

    #[error(
        "Body '{body}' resolved to index {index} but the frame carries only {body_count} bodies"
    )]
    BodyIndexOutOfRange {
        body: String,
        index: usize,
        body_count: usize,
    },

    #[error("Session Control Error: {0}")]
    Control(String),

    #[error("Capture Protocol Error: {0}")]
    Protocol(String),

    #[error("Publish Error: {0}")]
    Publish(String),

    #[error("Configuration Error: {0}")]
    Config(String),
}

impl BridgeError {
    /// Whether the error ends the session, as opposed to affecting one frame.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            BridgeError::BodyIndexOutOfRange { .. } | BridgeError::Publish(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn millimetres_convert_to_metres_exactly() {
        let p = Point3::from_millimetres(Position::new(1000.0, 2000.0, 3000.0));
        assert_eq!(p, Point3::new(1.0, 2.0, 3.0));
    }

    #[test]
    fn negative_and_fractional_millimetres_convert() {
        let p = Point3::from_millimetres(Position::new(500.0, -250.0, 1000.0));
        assert_eq!(p, Point3::new(0.5, -0.25, 1.0));
    }

    #[test]
    fn index_error_is_not_fatal() {
        let err = BridgeError::BodyIndexOutOfRange {
            body: "pixhawk".to_string(),
            index: 3,
            body_count: 2,
        };
        assert!(!err.is_fatal());
        assert!(err.to_string().contains("pixhawk"));
        assert!(BridgeError::Connection("refused".to_string()).is_fatal());
        assert!(BridgeError::Parse("bad xml".to_string()).is_fatal());
        assert!(!BridgeError::Publish("closed".to_string()).is_fatal());
    }

    #[test]
    fn pose_sample_serializes_with_body_and_position() {
        let sample = PoseSample {
            stamp: Utc::now(),
            body: "drone".to_string(),
            frame_number: 7,
            position: Point3::new(0.5, -0.25, 1.0),
            rotation: Rotation::identity(),
        };
        let json = serde_json::to_string(&sample).unwrap();
        assert!(json.contains("\"body\":\"drone\""));
        let back: PoseSample = serde_json::from_str(&json).unwrap();
        assert_eq!(back.position, sample.position);
        assert_eq!(back.frame_number, 7);
    }

    #[test]
    fn bridge_error_display() {
        let err = BridgeError::Connection("127.0.0.1:22223".to_string());
        assert!(err.to_string().contains("Connection Failure"));
    }
}
