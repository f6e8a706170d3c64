//! In-process capture simulation for CI/CD testing without a capture server.
//!
//! [`SimCapture`] is a [`CaptureConnector`] that serves a fixed description
//! and a scripted list of frames.  A shared [`SimRecorder`] records what the
//! driver did to the session (control taken/released, stream stopped,
//! disconnected) so tests can assert on it after the session is gone.
//!
//! # Example
//!
//! ```rust
//! use mocap_core::sim::{describe_bodies, SimCapture};
//! use mocap_types::{BodyPose, RawFrame};
//!
//! let capture = SimCapture::new(describe_bodies(&["drone", "pixhawk"]))
//!     .with_frames(vec![RawFrame::new(
//!         1,
//!         vec![BodyPose::at_mm(0.0, 0.0, 0.0), BodyPose::at_mm(500.0, 0.0, 0.0)],
//!     )]);
//! let recorder = capture.recorder();
//! assert!(!recorder.control_held());
//! ```

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use mocap_types::{BridgeError, RawFrame};
use tracing::debug;

use crate::capture::{CaptureConnector, CaptureSession, ParameterKind, StreamComponent};

/// Build a QTM-style 6-DOF parameter document declaring `names` in order.
pub fn describe_bodies(names: &[&str]) -> String {
    let bodies: String = names
        .iter()
        .map(|name| format!("<Body><Name>{name}</Name></Body>"))
        .collect();
    format!(
        "<QTM_Parameters_Ver_1.19><The_6D><Bodies>{}</Bodies>{bodies}</The_6D></QTM_Parameters_Ver_1.19>",
        names.len()
    )
}

// ────────────────────────────────────────────────────────────────────────────
// Recorder
// ────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct SimCounters {
    connects: AtomicUsize,
    control_held: AtomicBool,
    takes: AtomicUsize,
    releases: AtomicUsize,
    parameter_requests: AtomicUsize,
    loaded_measurement: Mutex<Option<String>>,
    playback_started: AtomicBool,
    stream_started: AtomicBool,
    stream_stopped: AtomicBool,
    frames_served: AtomicUsize,
    disconnected: AtomicBool,
}

/// Read-only view of what happened to the sessions of a [`SimCapture`].
#[derive(Clone, Default)]
pub struct SimRecorder(Arc<SimCounters>);

impl SimRecorder {
    pub fn connects(&self) -> usize {
        self.0.connects.load(Ordering::SeqCst)
    }

    /// `true` while control is taken and not yet released.
    pub fn control_held(&self) -> bool {
        self.0.control_held.load(Ordering::SeqCst)
    }

    pub fn control_takes(&self) -> usize {
        self.0.takes.load(Ordering::SeqCst)
    }

    pub fn control_releases(&self) -> usize {
        self.0.releases.load(Ordering::SeqCst)
    }

    pub fn parameter_requests(&self) -> usize {
        self.0.parameter_requests.load(Ordering::SeqCst)
    }

    /// The measurement file most recently loaded, if any.
    pub fn loaded_measurement(&self) -> Option<String> {
        self.0
            .loaded_measurement
            .lock()
            .map(|file| file.clone())
            .unwrap_or_default()
    }

    pub fn playback_started(&self) -> bool {
        self.0.playback_started.load(Ordering::SeqCst)
    }

    pub fn stream_started(&self) -> bool {
        self.0.stream_started.load(Ordering::SeqCst)
    }

    pub fn stream_stopped(&self) -> bool {
        self.0.stream_stopped.load(Ordering::SeqCst)
    }

    pub fn frames_served(&self) -> usize {
        self.0.frames_served.load(Ordering::SeqCst)
    }

    pub fn disconnected(&self) -> bool {
        self.0.disconnected.load(Ordering::SeqCst)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Connector
// ────────────────────────────────────────────────────────────────────────────

/// Scripted capture server.
#[derive(Clone)]
pub struct SimCapture {
    description: String,
    frames: Vec<RawFrame>,
    looping: bool,
    frame_interval: Option<Duration>,
    refuse_connection: bool,
    fail_parameters: bool,
    fail_playback: bool,
    drop_connection: bool,
    recorder: SimRecorder,
}

impl SimCapture {
    /// A server that describes its bodies with `description` and streams no
    /// frames.
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            frames: Vec::new(),
            looping: false,
            frame_interval: None,
            refuse_connection: false,
            fail_parameters: false,
            fail_playback: false,
            drop_connection: false,
            recorder: SimRecorder::default(),
        }
    }

    /// Frames served, in order, once streaming starts.
    pub fn with_frames(mut self, frames: Vec<RawFrame>) -> Self {
        self.frames = frames;
        self
    }

    /// Replay the frames forever, renumbering each pass.
    pub fn looping(mut self) -> Self {
        self.looping = true;
        self
    }

    /// Wait `interval` before serving each frame.
    pub fn with_frame_interval(mut self, interval: Duration) -> Self {
        self.frame_interval = Some(interval);
        self
    }

    /// Reject every connection attempt.
    pub fn refusing_connections(mut self) -> Self {
        self.refuse_connection = true;
        self
    }

    /// Fail every parameter request.
    pub fn failing_parameters(mut self) -> Self {
        self.fail_parameters = true;
        self
    }

    /// Fail every measurement load.
    pub fn failing_playback(mut self) -> Self {
        self.fail_playback = true;
        self
    }

    /// Lose the connection once the scripted frames run out instead of
    /// ending the stream.
    pub fn dropping_connection(mut self) -> Self {
        self.drop_connection = true;
        self
    }

    pub fn recorder(&self) -> SimRecorder {
        self.recorder.clone()
    }
}

#[async_trait]
impl CaptureConnector for SimCapture {
    type Session = SimSession;

    async fn connect(&self, address: &str) -> Result<SimSession, BridgeError> {
        if self.refuse_connection {
            return Err(BridgeError::Connection(format!(
                "simulated server at {address} refused the connection"
            )));
        }
        self.recorder.0.connects.fetch_add(1, Ordering::SeqCst);
        debug!(address, "sim capture session opened");
        Ok(SimSession {
            config: self.clone(),
            pending: VecDeque::new(),
            streaming: false,
            pass: 0,
        })
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Session
// ────────────────────────────────────────────────────────────────────────────

/// Session handed out by [`SimCapture::connect`].
pub struct SimSession {
    config: SimCapture,
    pending: VecDeque<RawFrame>,
    streaming: bool,
    pass: u32,
}

impl SimSession {
    fn counters(&self) -> &SimCounters {
        &self.config.recorder.0
    }

    fn refill(&mut self) {
        let offset = self.pass.saturating_mul(self.config.frames.len() as u32);
        self.pending.extend(self.config.frames.iter().cloned().map(|mut frame| {
            frame.frame_number = frame.frame_number.saturating_add(offset);
            frame
        }));
        self.pass = self.pass.saturating_add(1);
    }
}

#[async_trait]
impl CaptureSession for SimSession {
    async fn take_control(&mut self, password: &str) -> Result<(), BridgeError> {
        if self.counters().control_held.swap(true, Ordering::SeqCst) {
            return Err(BridgeError::Control("control already taken".to_string()));
        }
        self.counters().takes.fetch_add(1, Ordering::SeqCst);
        debug!(password_len = password.len(), "sim control taken");
        Ok(())
    }

    async fn release_control(&mut self) -> Result<(), BridgeError> {
        if !self.counters().control_held.swap(false, Ordering::SeqCst) {
            return Err(BridgeError::Control("control not held".to_string()));
        }
        self.counters().releases.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn load_measurement(&mut self, file: &str) -> Result<(), BridgeError> {
        if !self.counters().control_held.load(Ordering::SeqCst) {
            return Err(BridgeError::Control("load requires control".to_string()));
        }
        if self.config.fail_playback {
            return Err(BridgeError::Protocol(format!("simulated load failure for '{file}'")));
        }
        if let Ok(mut loaded) = self.counters().loaded_measurement.lock() {
            *loaded = Some(file.to_string());
        }
        debug!(file, "sim measurement loaded");
        Ok(())
    }

    async fn start_playback(&mut self) -> Result<(), BridgeError> {
        if !self.counters().control_held.load(Ordering::SeqCst) {
            return Err(BridgeError::Control("playback requires control".to_string()));
        }
        let loaded = self
            .counters()
            .loaded_measurement
            .lock()
            .map(|file| file.is_some())
            .unwrap_or(false);
        if !loaded {
            return Err(BridgeError::Protocol("no measurement loaded".to_string()));
        }
        self.counters().playback_started.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn get_parameters(&mut self, kinds: &[ParameterKind]) -> Result<String, BridgeError> {
        self.counters().parameter_requests.fetch_add(1, Ordering::SeqCst);
        if self.config.fail_parameters {
            return Err(BridgeError::Protocol("simulated parameter fetch failure".to_string()));
        }
        if !kinds.contains(&ParameterKind::SixDof) {
            return Ok("<QTM_Parameters_Ver_1.19/>".to_string());
        }
        Ok(self.config.description.clone())
    }

    async fn start_stream(&mut self, components: &[StreamComponent]) -> Result<(), BridgeError> {
        if !components.contains(&StreamComponent::SixDof) {
            return Err(BridgeError::Protocol("sim capture only streams 6D".to_string()));
        }
        self.streaming = true;
        self.pending.clear();
        self.pass = 0;
        self.refill();
        self.counters().stream_started.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn next_frame(&mut self) -> Result<Option<RawFrame>, BridgeError> {
        if !self.streaming {
            return Err(BridgeError::Protocol("stream not started".to_string()));
        }
        if self.pending.is_empty() && self.config.looping && !self.config.frames.is_empty() {
            self.refill();
        }
        let Some(frame) = self.pending.pop_front() else {
            if self.config.drop_connection {
                self.streaming = false;
                return Err(BridgeError::Connection(
                    "simulated server closed the connection".to_string(),
                ));
            }
            return Ok(None);
        };
        if let Some(interval) = self.config.frame_interval {
            tokio::time::sleep(interval).await;
        }
        self.counters().frames_served.fetch_add(1, Ordering::SeqCst);
        Ok(Some(frame))
    }

    async fn stop_stream(&mut self) -> Result<(), BridgeError> {
        self.streaming = false;
        self.pending.clear();
        self.counters().stream_stopped.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&mut self) {
        self.streaming = false;
        self.counters().disconnected.store(true, Ordering::SeqCst);
    }
}
