//! The capture-session seam.
//!
//! The bridge never speaks a motion-capture protocol directly.  A
//! [`CaptureConnector`] opens a [`CaptureSession`] to a server; the session
//! exposes exactly the operations the streaming driver needs.
//!
//! - [`SimCapture`][crate::sim::SimCapture] – scripted in-process session for
//!   tests and dry runs.
//! - `mocap_qtm::QtmConnector` – Qualisys Track Manager real-time server.

use async_trait::async_trait;
use mocap_types::{BridgeError, RawFrame};

/// Parameter groups that can be requested from the capture server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParameterKind {
    General,
    /// Rigid-body (6-DOF) settings, including the body listing.
    SixDof,
}

impl ParameterKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ParameterKind::General => "General",
            ParameterKind::SixDof => "6d",
        }
    }
}

/// Per-frame data components that can be streamed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamComponent {
    /// Position and rotation of every rigid body.
    SixDof,
}

impl StreamComponent {
    pub fn as_str(self) -> &'static str {
        match self {
            StreamComponent::SixDof => "6D",
        }
    }
}

/// Opens sessions to a capture server.
#[async_trait]
pub trait CaptureConnector: Send + Sync {
    type Session: CaptureSession;

    /// Connect to the server at `address`.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Connection`] when the server cannot be reached
    /// or rejects the connection.
    async fn connect(&self, address: &str) -> Result<Self::Session, BridgeError>;
}

/// One live connection to a capture server.
///
/// Frames are pulled one at a time with [`next_frame`][Self::next_frame]; the
/// caller finishes with a frame before asking for the next one.
#[async_trait]
pub trait CaptureSession: Send {
    /// Acquire exclusive control of the server.
    async fn take_control(&mut self, password: &str) -> Result<(), BridgeError>;

    /// Give exclusive control back.
    async fn release_control(&mut self) -> Result<(), BridgeError>;

    /// Load a recorded measurement for real-time playback.  Requires control.
    async fn load_measurement(&mut self, file: &str) -> Result<(), BridgeError>;

    /// Start streaming the loaded measurement as if it were live.  Requires
    /// control.
    async fn start_playback(&mut self) -> Result<(), BridgeError>;

    /// Fetch the XML description of the requested parameter groups.
    async fn get_parameters(&mut self, kinds: &[ParameterKind]) -> Result<String, BridgeError>;

    /// Ask the server to start streaming the given components.
    async fn start_stream(&mut self, components: &[StreamComponent]) -> Result<(), BridgeError>;

    /// Wait for the next frame.  `Ok(None)` means the stream has ended.
    ///
    /// Not cancel-safe: dropping the future part way through a packet leaves
    /// the connection out of step.  Only drop it when the stream is about to
    /// be stopped.
    async fn next_frame(&mut self) -> Result<Option<RawFrame>, BridgeError>;

    /// Ask the server to stop streaming.
    async fn stop_stream(&mut self) -> Result<(), BridgeError>;

    /// Close the connection.  Never fails; errors are logged by the session.
    async fn disconnect(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parameter_kinds_use_server_names() {
        assert_eq!(ParameterKind::SixDof.as_str(), "6d");
        assert_eq!(ParameterKind::General.as_str(), "General");
        assert_eq!(StreamComponent::SixDof.as_str(), "6D");
    }
}
