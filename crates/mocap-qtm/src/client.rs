//! QTM real-time session.
//!
//! [`QtmConnector`] opens a TCP connection to a Qualisys Track Manager
//! real-time server and implements exactly the [`CaptureSession`] operations
//! the bridge needs.  The command dialogue is:
//!
//! | Operation | Command | Expected reply |
//! |---|---|---|
//! | connect | – | `QTM RT Interface connected` |
//! | connect | `Version 1.19` | `Version set to 1.19` |
//! | take control | `TakeControl <password>` | `You are now master` |
//! | release control | `ReleaseControl` | `You are now a regular client` |
//! | load measurement | `Load "<file>"` | `Measurement loaded` |
//! | start playback | `Start rtfromfile` | `Starting RT from file` |
//! | get parameters | `GetParameters 6d` | XML packet |
//! | start stream | `StreamFrames AllFrames 6D` | data packets (`NoMoreData` while QTM is idle) |
//! | stop stream | `StreamFrames Stop` | – |

use std::io::ErrorKind;
use std::time::Duration;

use async_trait::async_trait;
use mocap_core::capture::{CaptureConnector, CaptureSession, ParameterKind, StreamComponent};
use mocap_types::{BridgeError, RawFrame};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use crate::protocol::{
    DEFAULT_PORT, HEADER_SIZE, PROTOCOL_VERSION, Packet, decode_header, decode_packet,
    encode_command,
};

const WELCOME: &str = "QTM RT Interface connected";
const MASTER_REPLY: &str = "You are now master";
const REGULAR_REPLY: &str = "You are now a regular client";
const LOADED_REPLY: &str = "Measurement loaded";

/// Append the default real-time port when `address` carries none.
pub fn with_default_port(address: &str) -> String {
    if address.parse::<std::net::SocketAddr>().is_ok() {
        return address.to_string();
    }
    if address.parse::<std::net::IpAddr>().is_ok() || !address.contains(':') {
        return match address.parse::<std::net::Ipv6Addr>() {
            Ok(v6) => format!("[{v6}]:{DEFAULT_PORT}"),
            Err(_) => format!("{address}:{DEFAULT_PORT}"),
        };
    }
    address.to_string()
}

// ────────────────────────────────────────────────────────────────────────────
// Connector
// ────────────────────────────────────────────────────────────────────────────

/// Opens [`QtmSession`]s.
#[derive(Debug, Clone)]
pub struct QtmConnector {
    version: String,
    connect_timeout: Duration,
}

impl QtmConnector {
    pub fn new() -> Self {
        Self {
            version: PROTOCOL_VERSION.to_string(),
            connect_timeout: Duration::from_secs(5),
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

impl Default for QtmConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CaptureConnector for QtmConnector {
    type Session = QtmSession;

    async fn connect(&self, address: &str) -> Result<QtmSession, BridgeError> {
        let target = with_default_port(address);
        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(&target))
            .await
            .map_err(|_| BridgeError::Connection(format!("connect to {target} timed out")))?
            .map_err(|e| BridgeError::Connection(format!("connect to {target}: {e}")))?;
        if let Err(e) = stream.set_nodelay(true) {
            warn!(error = %e, "could not disable Nagle on capture socket");
        }

        let mut session = QtmSession {
            stream,
            streaming: false,
        };

        match session.read_packet().await {
            Ok(Some(Packet::Command(text))) if text.contains(WELCOME) => {}
            Ok(Some(Packet::Error(text))) => return Err(BridgeError::Connection(text)),
            Ok(other) => {
                return Err(BridgeError::Connection(format!(
                    "unexpected greeting from {target}: {other:?}"
                )));
            }
            Err(e) => return Err(BridgeError::Connection(e.to_string())),
        }

        let reply = session
            .command(&format!("Version {}", self.version))
            .await
            .map_err(|e| BridgeError::Connection(e.to_string()))?;
        info!(server = %target, reply = %reply, "connected to QTM");
        Ok(session)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Session
// ────────────────────────────────────────────────────────────────────────────

/// One connection to a QTM real-time server.
pub struct QtmSession {
    stream: TcpStream,
    streaming: bool,
}

impl QtmSession {
    /// Read one packet.  `Ok(None)` means the server closed the connection.
    async fn read_packet(&mut self) -> Result<Option<Packet>, BridgeError> {
        let mut header = [0u8; HEADER_SIZE];
        match self.stream.read_exact(&mut header).await {
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(BridgeError::Protocol(format!("read header: {e}"))),
        }
        let (kind, len) = decode_header(header)?;
        let mut payload = vec![0u8; len];
        self.stream
            .read_exact(&mut payload)
            .await
            .map_err(|e| BridgeError::Protocol(format!("read {kind:?} payload: {e}")))?;
        decode_packet(kind, &payload).map(Some)
    }

    async fn send_command(&mut self, command: &str) -> Result<(), BridgeError> {
        debug!(command = command.split(' ').next().unwrap_or_default(), "QTM command");
        self.stream
            .write_all(&encode_command(command))
            .await
            .map_err(|e| BridgeError::Protocol(format!("send command: {e}")))
    }

    /// Send `command` and wait for its text reply, skipping events and any
    /// data still in flight.
    async fn command(&mut self, command: &str) -> Result<String, BridgeError> {
        self.send_command(command).await?;
        loop {
            match self.read_packet().await? {
                Some(Packet::Command(reply)) => return Ok(reply),
                Some(Packet::Error(text)) => return Err(BridgeError::Protocol(text)),
                Some(Packet::Event(id)) => debug!(event = id, "QTM event"),
                Some(_) => {}
                None => {
                    return Err(BridgeError::Protocol(
                        "server closed the connection".to_string(),
                    ));
                }
            }
        }
    }
}

#[async_trait]
impl CaptureSession for QtmSession {
    async fn take_control(&mut self, password: &str) -> Result<(), BridgeError> {
        let reply = self
            .command(&format!("TakeControl {password}"))
            .await
            .map_err(|e| BridgeError::Control(e.to_string()))?;
        if !reply.contains(MASTER_REPLY) {
            return Err(BridgeError::Control(reply));
        }
        Ok(())
    }

    async fn release_control(&mut self) -> Result<(), BridgeError> {
        let reply = self
            .command("ReleaseControl")
            .await
            .map_err(|e| BridgeError::Control(e.to_string()))?;
        if !reply.contains(REGULAR_REPLY) {
            return Err(BridgeError::Control(reply));
        }
        Ok(())
    }

    async fn load_measurement(&mut self, file: &str) -> Result<(), BridgeError> {
        let reply = self.command(&format!("Load \"{file}\"")).await?;
        if !reply.contains(LOADED_REPLY) {
            return Err(BridgeError::Protocol(format!("load '{file}': {reply}")));
        }
        info!(file, "measurement loaded");
        Ok(())
    }

    async fn start_playback(&mut self) -> Result<(), BridgeError> {
        let reply = self.command("Start rtfromfile").await?;
        if !(reply.starts_with("Starting") || reply.contains("already running")) {
            return Err(BridgeError::Protocol(format!("start playback: {reply}")));
        }
        info!(reply = %reply, "real-time playback started");
        Ok(())
    }

    async fn get_parameters(&mut self, kinds: &[ParameterKind]) -> Result<String, BridgeError> {
        let names: Vec<&str> = kinds.iter().map(|k| k.as_str()).collect();
        self.send_command(&format!("GetParameters {}", names.join(" ")))
            .await?;
        loop {
            match self.read_packet().await? {
                Some(Packet::Xml(xml)) => return Ok(xml),
                Some(Packet::Error(text)) => return Err(BridgeError::Protocol(text)),
                Some(Packet::Command(text)) => {
                    return Err(BridgeError::Protocol(format!(
                        "expected parameters, got reply '{text}'"
                    )));
                }
                Some(Packet::Event(id)) => debug!(event = id, "QTM event"),
                Some(_) => {}
                None => {
                    return Err(BridgeError::Protocol(
                        "server closed the connection".to_string(),
                    ));
                }
            }
        }
    }

    async fn start_stream(&mut self, components: &[StreamComponent]) -> Result<(), BridgeError> {
        let names: Vec<&str> = components.iter().map(|c| c.as_str()).collect();
        self.send_command(&format!("StreamFrames AllFrames {}", names.join(" ")))
            .await?;
        self.streaming = true;
        Ok(())
    }

    async fn next_frame(&mut self) -> Result<Option<RawFrame>, BridgeError> {
        if !self.streaming {
            return Err(BridgeError::Protocol("stream not started".to_string()));
        }
        loop {
            match self.read_packet().await? {
                Some(Packet::Data(frame)) => return Ok(Some(frame)),
                // Sent whenever QTM is not measuring; frames resume with the
                // next measurement.
                Some(Packet::NoMoreData) => debug!("QTM reports no more data"),
                Some(Packet::Error(text)) => return Err(BridgeError::Protocol(text)),
                Some(Packet::Event(id)) => debug!(event = id, "QTM event"),
                Some(other) => debug!(packet = ?other, "ignoring packet while streaming"),
                None => {
                    warn!("QTM closed the connection while streaming");
                    self.streaming = false;
                    return Err(BridgeError::Connection(
                        "server closed the connection while streaming".to_string(),
                    ));
                }
            }
        }
    }

    async fn stop_stream(&mut self) -> Result<(), BridgeError> {
        if !self.streaming {
            return Ok(());
        }
        self.streaming = false;
        self.send_command("StreamFrames Stop").await
    }

    async fn disconnect(&mut self) {
        if let Err(e) = self.stream.shutdown().await {
            debug!(error = %e, "capture socket shutdown");
        }
    }
}
