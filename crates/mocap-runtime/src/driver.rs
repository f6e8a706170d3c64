//! [`StreamingDriver`] – one capture-to-publish session.
//!
//! Drives a [`CaptureSession`] through
//!
//! ```text
//! Disconnected → Connected → Controlling → Configured → Streaming → Stopped
//! ```
//!
//! 1. **Connect** to the capture server.  A refused connection ends the
//!    session immediately; there is no retry.
//! 2. **Configure** – take control, optionally load a recorded measurement
//!    and start real-time playback, fetch the 6-DOF parameters, resolve the
//!    body index map.  Control is released again on every exit path of this
//!    phase, before anything else happens.
//! 3. **Stream** – pull frames one at a time, translate each one for the
//!    target body, and hand every sample to the [`PosePublisher`] on the
//!    configured output channel.
//! 4. **Stop** – on the shutdown signal, when the session ends the stream, or
//!    on a fatal stream error such as a lost server.  The stream is stopped and the session
//!    disconnected before [`StreamingDriver::run`] returns.
//!
//! Index mismatches and publish failures are per-frame conditions: they are
//! counted in [`StreamStats`], logged at most once per second, and streaming
//! continues.

use std::fmt;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use mocap_core::capture::{CaptureConnector, CaptureSession, ParameterKind, StreamComponent};
use mocap_core::{BodyIndexMap, FrameTranslator, resolve};
use mocap_middleware::PosePublisher;
use mocap_types::{BridgeError, RawFrame};
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

// ─────────────────────────────────────────────────────────────────────────────
// Constants
// ─────────────────────────────────────────────────────────────────────────────

pub const DEFAULT_SERVER_ADDRESS: &str = "127.0.0.1:22223";
pub const DEFAULT_TARGET_BODY: &str = "pixhawk";
pub const DEFAULT_OUTPUT_CHANNEL: &str = "/mavros/vision_pose/pose";
pub const DEFAULT_PASSWORD: &str = "password";

/// Minimum spacing between repeated per-frame warnings.
const WARN_INTERVAL: Duration = Duration::from_secs(1);

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Session parameters for [`StreamingDriver`].
#[derive(Clone)]
pub struct DriverConfig {
    /// Capture server address, `host` or `host:port`.
    pub server_address: String,
    /// Rigid body whose pose is bridged.
    pub target_body_name: String,
    /// Channel every sample is published on.
    pub output_channel: String,
    /// Credential for taking control of the capture server.
    pub password: String,
    /// Recorded measurement to replay instead of streaming live data.
    pub playback_file: Option<String>,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            server_address: DEFAULT_SERVER_ADDRESS.to_string(),
            target_body_name: DEFAULT_TARGET_BODY.to_string(),
            output_channel: DEFAULT_OUTPUT_CHANNEL.to_string(),
            password: DEFAULT_PASSWORD.to_string(),
            playback_file: None,
        }
    }
}

impl fmt::Debug for DriverConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DriverConfig")
            .field("server_address", &self.server_address)
            .field("target_body_name", &self.target_body_name)
            .field("output_channel", &self.output_channel)
            .field("password", &"[REDACTED]")
            .field("playback_file", &self.playback_file)
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Session state and results
// ─────────────────────────────────────────────────────────────────────────────

/// Lifecycle of one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connected,
    Controlling,
    Configured,
    Streaming,
    Stopped,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connected => "connected",
            SessionState::Controlling => "controlling",
            SessionState::Configured => "configured",
            SessionState::Streaming => "streaming",
            SessionState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Per-session frame counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamStats {
    pub frames_received: u64,
    pub samples_published: u64,
    /// Frames that produced no sample because the target body is unknown.
    pub no_sample: u64,
    /// Frames dropped because the resolved index was outside the body array.
    pub index_drops: u64,
    pub publish_failures: u64,
}

/// Why streaming ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The shutdown signal was raised.
    Shutdown,
    /// The capture server ended the stream.
    StreamEnded,
}

/// Outcome of a session that stopped without a fatal error.
#[derive(Debug, Clone)]
pub struct SessionReport {
    pub state: SessionState,
    pub reason: StopReason,
    pub stats: StreamStats,
    /// Number of distinct bodies in the resolved index map.
    pub bodies: usize,
    /// When configuration completed.  Every published sample is stamped
    /// after this instant.
    pub configured_at: DateTime<Utc>,
}

/// Lets a repeated warning through at most once per `interval`.
#[derive(Debug)]
pub struct WarnLimiter {
    interval: Duration,
    last: Option<Instant>,
}

impl WarnLimiter {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
        }
    }

    /// `true` if a warning may be emitted at `now`.
    pub fn allow(&mut self, now: Instant) -> bool {
        match self.last {
            Some(last) if now.saturating_duration_since(last) < self.interval => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// StreamingDriver
// ─────────────────────────────────────────────────────────────────────────────

/// Runs one capture session from connect to stop.
pub struct StreamingDriver<C, P> {
    connector: C,
    publisher: P,
    config: DriverConfig,
    state: SessionState,
}

impl<C, P> StreamingDriver<C, P>
where
    C: CaptureConnector,
    P: PosePublisher,
{
    pub fn new(connector: C, publisher: P, config: DriverConfig) -> Self {
        Self {
            connector,
            publisher,
            config,
            state: SessionState::Disconnected,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// Run the session until shutdown, end of stream, or a fatal error.
    ///
    /// `shutdown` is checked before streaming starts and between frames; a
    /// value of `true` stops the session.  If every sender is dropped the
    /// session runs until the stream ends.
    ///
    /// # Errors
    ///
    /// [`BridgeError::Connection`] when the server cannot be reached or goes
    /// away while streaming,
    /// [`BridgeError::Control`] / [`BridgeError::Protocol`] /
    /// [`BridgeError::Parse`] when configuration or the stream fail.
    /// Control has been released and the session disconnected by the time
    /// an error is returned.
    #[instrument(
        skip_all,
        fields(
            server = %self.config.server_address,
            body = %self.config.target_body_name,
            channel = %self.config.output_channel,
        )
    )]
    pub async fn run(
        &mut self,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<SessionReport, BridgeError> {
        self.state = SessionState::Disconnected;

        let mut session = match self.connector.connect(&self.config.server_address).await {
            Ok(session) => session,
            Err(e) => {
                error!(error = %e, "capture server unreachable");
                self.transition(SessionState::Stopped);
                return Err(e);
            }
        };
        self.transition(SessionState::Connected);

        let translator = match self.configure(&mut session).await {
            Ok(translator) => translator,
            Err(e) => {
                error!(error = %e, "session configuration failed");
                session.disconnect().await;
                self.transition(SessionState::Stopped);
                return Err(e);
            }
        };
        let configured_at = Utc::now();

        let mut stats = StreamStats::default();
        let outcome = self
            .stream(&mut session, &translator, &mut shutdown, &mut stats)
            .await;

        if let Err(e) = session.stop_stream().await {
            warn!(error = %e, "failed to stop capture stream");
        }
        session.disconnect().await;
        self.transition(SessionState::Stopped);

        info!(
            frames = stats.frames_received,
            published = stats.samples_published,
            no_sample = stats.no_sample,
            index_drops = stats.index_drops,
            publish_failures = stats.publish_failures,
            "session finished"
        );

        let reason = outcome.inspect_err(|e| error!(error = %e, "capture stream failed"))?;
        Ok(SessionReport {
            state: self.state,
            reason,
            stats,
            bodies: translator.index_map().len(),
            configured_at,
        })
    }

    fn transition(&mut self, next: SessionState) {
        info!(from = %self.state, to = %next, "session state");
        self.state = next;
    }

    /// Take control, start playback if configured, fetch and resolve the body
    /// description, release control.
    async fn configure(
        &mut self,
        session: &mut C::Session,
    ) -> Result<FrameTranslator, BridgeError> {
        session.take_control(&self.config.password).await?;
        self.transition(SessionState::Controlling);

        let described = Self::prepare(session, self.config.playback_file.as_deref()).await;
        if let Err(e) = session.release_control().await {
            warn!(error = %e, "failed to release control");
        }
        let index_map = described?;
        self.transition(SessionState::Configured);

        let translator = FrameTranslator::new(self.config.target_body_name.clone(), index_map);
        match translator.target_index() {
            Some(index) => info!(
                bodies = translator.index_map().len(),
                index,
                "target body resolved"
            ),
            None => warn!(
                bodies = translator.index_map().len(),
                "target body not in the capture description; nothing will be published"
            ),
        }
        Ok(translator)
    }

    /// Everything that needs control held.
    async fn prepare(
        session: &mut C::Session,
        playback_file: Option<&str>,
    ) -> Result<BodyIndexMap, BridgeError> {
        if let Some(file) = playback_file {
            session.load_measurement(file).await?;
            session.start_playback().await?;
        }
        Self::describe(session).await
    }

    async fn describe(session: &mut C::Session) -> Result<BodyIndexMap, BridgeError> {
        let description = session.get_parameters(&[ParameterKind::SixDof]).await?;
        debug!(bytes = description.len(), "received body description");
        resolve(&description)
    }

    async fn stream(
        &mut self,
        session: &mut C::Session,
        translator: &FrameTranslator,
        shutdown: &mut watch::Receiver<bool>,
        stats: &mut StreamStats,
    ) -> Result<StopReason, BridgeError> {
        if *shutdown.borrow_and_update() {
            info!("shutdown requested before streaming");
            return Ok(StopReason::Shutdown);
        }

        session.start_stream(&[StreamComponent::SixDof]).await?;
        self.transition(SessionState::Streaming);

        let mut drop_warnings = WarnLimiter::new(WARN_INTERVAL);
        let mut publish_warnings = WarnLimiter::new(WARN_INTERVAL);
        let mut watching = true;

        loop {
            let next = tokio::select! {
                biased;
                // Completes only on `true`, so `next_frame` is never dropped
                // while the stream carries on.
                stop = shutdown.wait_for(|stop| *stop), if watching => {
                    if stop.is_ok() {
                        info!("shutdown requested");
                        return Ok(StopReason::Shutdown);
                    }
                    debug!("shutdown sender dropped; streaming until end of stream");
                    watching = false;
                    continue;
                }
                next = session.next_frame() => next?,
            };

            let Some(frame) = next else {
                info!("capture stream ended");
                return Ok(StopReason::StreamEnded);
            };
            stats.frames_received += 1;
            self.handle_frame(&frame, translator, stats, &mut drop_warnings, &mut publish_warnings)
                .await?;
        }
    }

    async fn handle_frame(
        &self,
        frame: &RawFrame,
        translator: &FrameTranslator,
        stats: &mut StreamStats,
        drop_warnings: &mut WarnLimiter,
        publish_warnings: &mut WarnLimiter,
    ) -> Result<(), BridgeError> {
        match translator.translate(frame) {
            Ok(Some(sample)) => {
                match self.publisher.publish(&self.config.output_channel, sample).await {
                    Ok(()) => stats.samples_published += 1,
                    Err(e) => {
                        stats.publish_failures += 1;
                        if publish_warnings.allow(Instant::now()) {
                            warn!(
                                error = %e,
                                frame = frame.frame_number,
                                total = stats.publish_failures,
                                "publish failed"
                            );
                        }
                    }
                }
            }
            Ok(None) => stats.no_sample += 1,
            Err(e) if !e.is_fatal() => {
                stats.index_drops += 1;
                if drop_warnings.allow(Instant::now()) {
                    warn!(
                        error = %e,
                        frame = frame.frame_number,
                        total = stats.index_drops,
                        "frame dropped"
                    );
                }
            }
            Err(e) => return Err(e),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use mocap_core::sim::{SimCapture, describe_bodies};
    use mocap_middleware::PoseBus;
    use mocap_qtm::QtmConnector;
    use mocap_qtm::protocol::{
        HEADER_SIZE, PacketType, decode_header, decode_text, encode_packet, encode_six_dof_data,
        encode_text,
    };
    use mocap_types::{BodyPose, PoseSample};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    const CHANNEL: &str = "/mavros/vision_pose/pose";

    fn config(target: &str) -> DriverConfig {
        DriverConfig {
            target_body_name: target.to_string(),
            ..DriverConfig::default()
        }
    }

    fn three_body_frame(frame_number: u32) -> RawFrame {
        RawFrame::new(
            frame_number,
            vec![
                BodyPose::at_mm(0.0, 0.0, 0.0),
                BodyPose::at_mm(500.0, -250.0, 1000.0),
                BodyPose::at_mm(0.0, 0.0, 0.0),
            ],
        )
    }

    fn drone_capture() -> SimCapture {
        SimCapture::new(describe_bodies(&["drone", "pixhawk", "wand"]))
    }

    struct FailingPublisher;

    #[async_trait]
    impl PosePublisher for FailingPublisher {
        async fn publish(&self, _channel: &str, _sample: PoseSample) -> Result<(), BridgeError> {
            Err(BridgeError::Publish("link down".to_string()))
        }
    }

    #[tokio::test]
    async fn publishes_target_pose_in_metres() {
        let capture = drone_capture().with_frames(vec![three_body_frame(1)]);
        let recorder = capture.recorder();
        let bus = PoseBus::default();
        let mut sub = bus.subscribe(CHANNEL);
        let (_tx, rx) = watch::channel(false);

        let mut driver = StreamingDriver::new(capture, bus.clone(), config("pixhawk"));
        let report = driver.run(rx).await.unwrap();

        assert_eq!(report.reason, StopReason::StreamEnded);
        assert_eq!(report.state, SessionState::Stopped);
        assert_eq!(report.bodies, 3);
        assert_eq!(report.stats.frames_received, 1);
        assert_eq!(report.stats.samples_published, 1);

        let sample = sub.try_recv().expect("one sample");
        assert_eq!(sample.body, "pixhawk");
        assert_eq!(sample.position.x, 0.5);
        assert_eq!(sample.position.y, -0.25);
        assert_eq!(sample.position.z, 1.0);
        assert!(sample.stamp >= report.configured_at);
        assert!(sub.try_recv().is_none());

        assert!(!recorder.control_held());
        assert_eq!(recorder.control_releases(), 1);
        assert!(recorder.stream_stopped());
        assert!(recorder.disconnected());
        assert_eq!(driver.state(), SessionState::Stopped);
    }

    #[tokio::test]
    async fn unknown_body_publishes_nothing() {
        let capture = drone_capture().with_frames(vec![three_body_frame(1), three_body_frame(2)]);
        let bus = PoseBus::default();
        let mut sub = bus.subscribe(CHANNEL);
        let (_tx, rx) = watch::channel(false);

        let mut driver = StreamingDriver::new(capture, bus.clone(), config("ghost"));
        let report = driver.run(rx).await.unwrap();

        assert_eq!(report.stats.frames_received, 2);
        assert_eq!(report.stats.no_sample, 2);
        assert_eq!(report.stats.samples_published, 0);
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn index_mismatch_drops_frame_and_keeps_streaming() {
        let short = RawFrame::new(1, vec![BodyPose::at_mm(0.0, 0.0, 0.0); 2]);
        let capture = drone_capture().with_frames(vec![short, three_body_frame(2)]);
        let bus = PoseBus::default();
        let mut sub = bus.subscribe(CHANNEL);
        let (_tx, rx) = watch::channel(false);

        let mut driver = StreamingDriver::new(capture, bus.clone(), config("wand"));
        let report = driver.run(rx).await.unwrap();

        assert_eq!(report.stats.index_drops, 1);
        assert_eq!(report.stats.samples_published, 1);
        assert_eq!(sub.try_recv().map(|s| s.frame_number), Some(2));
    }

    #[tokio::test]
    async fn parameter_failure_releases_control() {
        let capture = drone_capture().failing_parameters();
        let recorder = capture.recorder();
        let (_tx, rx) = watch::channel(false);

        let mut driver = StreamingDriver::new(capture, PoseBus::default(), config("pixhawk"));
        let result = driver.run(rx).await;

        assert!(matches!(result, Err(BridgeError::Protocol(_))));
        assert_eq!(recorder.control_takes(), 1);
        assert_eq!(recorder.control_releases(), 1);
        assert!(!recorder.control_held());
        assert!(!recorder.stream_started());
        assert!(recorder.disconnected());
        assert_eq!(driver.state(), SessionState::Stopped);
    }

    #[tokio::test]
    async fn malformed_description_releases_control() {
        let capture = SimCapture::new("<QTM_Parameters_Ver_1.19><The_6D>");
        let recorder = capture.recorder();
        let (_tx, rx) = watch::channel(false);

        let mut driver = StreamingDriver::new(capture, PoseBus::default(), config("pixhawk"));
        let result = driver.run(rx).await;

        assert!(matches!(result, Err(BridgeError::Parse(_))));
        assert!(!recorder.control_held());
        assert_eq!(recorder.control_releases(), 1);
        assert!(!recorder.stream_started());
    }

    #[tokio::test]
    async fn refused_connection_never_takes_control() {
        let capture = drone_capture().refusing_connections();
        let recorder = capture.recorder();
        let (_tx, rx) = watch::channel(false);

        let mut driver = StreamingDriver::new(capture, PoseBus::default(), config("pixhawk"));
        let result = driver.run(rx).await;

        assert!(matches!(result, Err(BridgeError::Connection(_))));
        assert_eq!(recorder.connects(), 0);
        assert_eq!(recorder.control_takes(), 0);
        assert_eq!(recorder.parameter_requests(), 0);
        assert_eq!(driver.state(), SessionState::Stopped);
    }

    #[tokio::test]
    async fn shutdown_before_streaming_publishes_nothing() {
        let capture = drone_capture().with_frames(vec![three_body_frame(1)]);
        let recorder = capture.recorder();
        let bus = PoseBus::default();
        let mut sub = bus.subscribe(CHANNEL);
        let (_tx, rx) = watch::channel(true);

        let mut driver = StreamingDriver::new(capture, bus.clone(), config("pixhawk"));
        let report = driver.run(rx).await.unwrap();

        assert_eq!(report.reason, StopReason::Shutdown);
        assert_eq!(report.stats, StreamStats::default());
        assert!(!recorder.stream_started());
        assert!(!recorder.control_held());
        assert!(recorder.disconnected());
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn shutdown_signal_stops_endless_stream() {
        let capture = drone_capture()
            .with_frames(vec![three_body_frame(1)])
            .looping()
            .with_frame_interval(Duration::from_millis(5));
        let recorder = capture.recorder();
        let (tx, rx) = watch::channel(false);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(60)).await;
            let _ = tx.send(true);
            // Keep the sender alive until the driver has seen the value.
            tokio::time::sleep(Duration::from_millis(200)).await;
        });

        let mut driver = StreamingDriver::new(capture, PoseBus::default(), config("pixhawk"));
        let report = driver.run(rx).await.unwrap();

        assert_eq!(report.reason, StopReason::Shutdown);
        assert!(report.stats.frames_received > 0);
        assert_eq!(report.stats.frames_received, report.stats.samples_published);
        assert!(recorder.stream_stopped());
        assert!(recorder.disconnected());
    }

    #[tokio::test]
    async fn dropped_shutdown_sender_streams_to_the_end() {
        let capture = drone_capture().with_frames(vec![three_body_frame(1), three_body_frame(2)]);
        let (tx, rx) = watch::channel(false);
        drop(tx);

        let mut driver = StreamingDriver::new(capture, PoseBus::default(), config("pixhawk"));
        let report = driver.run(rx).await.unwrap();

        assert_eq!(report.reason, StopReason::StreamEnded);
        assert_eq!(report.stats.samples_published, 2);
    }

    #[tokio::test]
    async fn publish_failures_are_counted_not_fatal() {
        let capture = drone_capture().with_frames(vec![three_body_frame(1), three_body_frame(2)]);
        let (_tx, rx) = watch::channel(false);

        let mut driver = StreamingDriver::new(capture, FailingPublisher, config("pixhawk"));
        let report = driver.run(rx).await.unwrap();

        assert_eq!(report.reason, StopReason::StreamEnded);
        assert_eq!(report.stats.publish_failures, 2);
        assert_eq!(report.stats.samples_published, 0);
    }

    #[tokio::test]
    async fn boxed_publisher_is_accepted() {
        let capture = drone_capture().with_frames(vec![three_body_frame(1)]);
        let bus = PoseBus::default();
        let mut sub = bus.subscribe(CHANNEL);
        let publisher: Box<dyn PosePublisher> = Box::new(bus.clone());
        let (_tx, rx) = watch::channel(false);

        let mut driver = StreamingDriver::new(capture, publisher, config("pixhawk"));
        driver.run(rx).await.unwrap();
        assert!(sub.try_recv().is_some());
    }

    #[tokio::test]
    async fn playback_starts_while_control_is_held() {
        let capture = drone_capture().with_frames(vec![three_body_frame(1)]);
        let recorder = capture.recorder();
        let (_tx, rx) = watch::channel(false);
        let cfg = DriverConfig {
            playback_file: Some("Demo.qtm".to_string()),
            ..config("pixhawk")
        };

        let mut driver = StreamingDriver::new(capture, PoseBus::default(), cfg);
        let report = driver.run(rx).await.unwrap();

        assert_eq!(recorder.loaded_measurement().as_deref(), Some("Demo.qtm"));
        assert!(recorder.playback_started());
        assert!(!recorder.control_held());
        assert_eq!(recorder.control_releases(), 1);
        assert_eq!(report.stats.samples_published, 1);
    }

    #[tokio::test]
    async fn playback_failure_releases_control() {
        let capture = drone_capture().failing_playback();
        let recorder = capture.recorder();
        let (_tx, rx) = watch::channel(false);
        let cfg = DriverConfig {
            playback_file: Some("missing.qtm".to_string()),
            ..config("pixhawk")
        };

        let mut driver = StreamingDriver::new(capture, PoseBus::default(), cfg);
        let result = driver.run(rx).await;

        assert!(matches!(result, Err(BridgeError::Protocol(_))));
        assert!(!recorder.control_held());
        assert_eq!(recorder.control_releases(), 1);
        assert_eq!(recorder.parameter_requests(), 0);
        assert!(!recorder.stream_started());
        assert!(recorder.disconnected());
    }

    #[tokio::test]
    async fn lost_connection_fails_the_session_after_cleanup() {
        let capture = drone_capture()
            .with_frames(vec![three_body_frame(1)])
            .dropping_connection();
        let recorder = capture.recorder();
        let (_tx, rx) = watch::channel(false);

        let mut driver = StreamingDriver::new(capture, PoseBus::default(), config("pixhawk"));
        let result = driver.run(rx).await;

        assert!(matches!(result, Err(BridgeError::Connection(_))));
        assert_eq!(recorder.frames_served(), 1);
        assert!(recorder.stream_stopped());
        assert!(recorder.disconnected());
        assert_eq!(driver.state(), SessionState::Stopped);
    }

    #[tokio::test]
    async fn false_shutdown_values_lose_no_frames() {
        let capture = drone_capture()
            .with_frames((1..=4).map(three_body_frame).collect())
            .with_frame_interval(Duration::from_millis(20));
        let recorder = capture.recorder();
        let (tx, rx) = watch::channel(false);

        tokio::spawn(async move {
            for _ in 0..20 {
                let _ = tx.send(false);
                tokio::time::sleep(Duration::from_millis(3)).await;
            }
            tokio::time::sleep(Duration::from_millis(300)).await;
        });

        let mut driver = StreamingDriver::new(capture, PoseBus::default(), config("pixhawk"));
        let report = driver.run(rx).await.unwrap();

        assert_eq!(report.reason, StopReason::StreamEnded);
        assert_eq!(report.stats.frames_received, 4);
        assert_eq!(recorder.frames_served(), 4);
    }

    // ── Against a scripted QTM server ───────────────────────────────────────

    async fn read_command(stream: &mut TcpStream) -> Option<String> {
        let mut header = [0u8; HEADER_SIZE];
        stream.read_exact(&mut header).await.ok()?;
        let (_, len) = decode_header(header).ok()?;
        let mut payload = vec![0u8; len];
        stream.read_exact(&mut payload).await.ok()?;
        Some(decode_text(&payload))
    }

    /// Answers the bridge's dialogue.  Streaming opens with `NoMoreData`,
    /// then `frames` follow after a pause.  With `hang_up` the server closes
    /// the connection after the last frame.
    async fn qtm_server(listener: TcpListener, frames: Vec<RawFrame>, hang_up: bool) {
        let (mut stream, _) = listener.accept().await.unwrap();
        let welcome = encode_text(PacketType::Command, "QTM RT Interface connected");
        stream.write_all(&welcome).await.unwrap();

        while let Some(command) = read_command(&mut stream).await {
            let reply = if command.starts_with("Version") {
                encode_text(PacketType::Command, "Version set to 1.19")
            } else if command.starts_with("TakeControl") {
                encode_text(PacketType::Command, "You are now master")
            } else if command == "ReleaseControl" {
                encode_text(PacketType::Command, "You are now a regular client")
            } else if command.starts_with("GetParameters") {
                encode_text(PacketType::Xml, &describe_bodies(&["drone", "pixhawk", "wand"]))
            } else if command.starts_with("StreamFrames AllFrames") {
                let idle = encode_packet(PacketType::NoMoreData, &[]);
                stream.write_all(&idle).await.unwrap();
                tokio::time::sleep(Duration::from_millis(50)).await;
                for frame in &frames {
                    let data = encode_packet(PacketType::Data, &encode_six_dof_data(frame));
                    stream.write_all(&data).await.unwrap();
                }
                if hang_up {
                    return;
                }
                continue;
            } else {
                continue;
            };
            stream.write_all(&reply).await.unwrap();
        }
    }

    fn qtm_config(listener: &TcpListener) -> DriverConfig {
        DriverConfig {
            server_address: listener.local_addr().unwrap().to_string(),
            ..config("pixhawk")
        }
    }

    #[tokio::test]
    async fn idle_qtm_server_keeps_the_session_streaming() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let cfg = qtm_config(&listener);
        let server = tokio::spawn(qtm_server(listener, vec![three_body_frame(7)], false));

        let bus = PoseBus::default();
        let mut sub = bus.subscribe(CHANNEL);
        let (tx, rx) = watch::channel(false);
        let session = tokio::spawn(async move {
            let mut driver = StreamingDriver::new(QtmConnector::new(), bus, cfg);
            driver.run(rx).await
        });

        let sample = sub.recv().await.expect("sample after NoMoreData");
        assert_eq!(sample.frame_number, 7);
        assert_eq!(sample.position.x, 0.5);

        tx.send(true).unwrap();
        let report = session.await.unwrap().unwrap();
        assert_eq!(report.reason, StopReason::Shutdown);
        assert_eq!(report.stats.samples_published, 1);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn qtm_hang_up_fails_the_session() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let cfg = qtm_config(&listener);
        let server = tokio::spawn(qtm_server(listener, vec![three_body_frame(1)], true));
        let (_tx, rx) = watch::channel(false);

        let mut driver = StreamingDriver::new(QtmConnector::new(), PoseBus::default(), cfg);
        let result = driver.run(rx).await;

        assert!(matches!(result, Err(BridgeError::Connection(_))), "got {result:?}");
        assert_eq!(driver.state(), SessionState::Stopped);
        server.await.unwrap();
    }

    #[test]
    fn warn_limiter_allows_one_per_interval() {
        let mut limiter = WarnLimiter::new(Duration::from_secs(1));
        let start = Instant::now();
        assert!(limiter.allow(start));
        assert!(!limiter.allow(start + Duration::from_millis(500)));
        assert!(limiter.allow(start + Duration::from_millis(1000)));
        assert!(!limiter.allow(start + Duration::from_millis(1999)));
        assert!(limiter.allow(start + Duration::from_secs(3)));
    }

    #[test]
    fn config_debug_redacts_password() {
        let rendered = format!("{:?}", DriverConfig::default());
        assert!(rendered.contains("[REDACTED]"));
        assert!(!rendered.contains("\"password\""));
    }

    #[test]
    fn state_names_are_lowercase() {
        assert_eq!(SessionState::Controlling.to_string(), "controlling");
        assert_eq!(SessionState::Stopped.to_string(), "stopped");
    }
}
