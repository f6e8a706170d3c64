//! rosbridge publisher.
//!
//! [`RosbridgePublisher`] is a WebSocket client of a `rosbridge_server`.  Each
//! output channel is treated as a ROS topic: the first sample on a topic
//! advertises it as `geometry_msgs/PoseStamped`, every sample is then sent as
//! a rosbridge `publish` operation:
//!
//! ```json
//! {"op":"publish","topic":"/mavros/vision_pose/pose",
//!  "msg":{"header":{"seq":0,"stamp":{"secs":1700000000,"nsecs":0},"frame_id":""},
//!         "pose":{"position":{"x":0.5,"y":-0.25,"z":1.0},
//!                 "orientation":{"x":0.0,"y":0.0,"z":0.0,"w":0.0}}}}
//! ```
//!
//! Orientation is left at the message default; only the position is bridged.

use std::collections::HashSet;

use async_trait::async_trait;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use mocap_types::{BridgeError, PoseSample};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};

use crate::adapter::PosePublisher;

/// ROS message type every channel is advertised with.
pub const POSE_STAMPED_TYPE: &str = "geometry_msgs/PoseStamped";

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

struct Outbound {
    sink: WsSink,
    advertised: HashSet<String>,
    seq: u32,
}

/// Publishes pose samples to ROS through a `rosbridge_server` WebSocket.
pub struct RosbridgePublisher {
    url: String,
    frame_id: String,
    outbound: Mutex<Outbound>,
}

impl RosbridgePublisher {
    /// Connect to the `rosbridge_server` at `url` (e.g. `ws://localhost:9090`).
    ///
    /// Inbound traffic (status messages, pings) is drained by a background
    /// task for as long as the connection is open.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Publish`] when the WebSocket handshake fails.
    pub async fn connect(url: &str) -> Result<Self, BridgeError> {
        let (stream, _) = connect_async(url)
            .await
            .map_err(|e| BridgeError::Publish(format!("rosbridge connect to {url}: {e}")))?;
        let (sink, mut inbound) = stream.split();

        let drain_url = url.to_string();
        tokio::spawn(async move {
            while let Some(msg) = inbound.next().await {
                match msg {
                    Ok(Message::Text(text)) => {
                        debug!(url = %drain_url, msg = %text.as_str(), "rosbridge message")
                    }
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        warn!(url = %drain_url, error = %e, "rosbridge read error");
                        break;
                    }
                }
            }
            debug!(url = %drain_url, "rosbridge inbound closed");
        });

        info!(url, "connected to rosbridge");
        Ok(Self {
            url: url.to_string(),
            frame_id: String::new(),
            outbound: Mutex::new(Outbound {
                sink,
                advertised: HashSet::new(),
                seq: 0,
            }),
        })
    }

    /// Set the `header.frame_id` written into every message.
    pub fn with_frame_id(mut self, frame_id: impl Into<String>) -> Self {
        self.frame_id = frame_id.into();
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Build the rosbridge `advertise` operation for `topic`.
    pub fn advertise_frame(topic: &str) -> Value {
        json!({
            "op": "advertise",
            "topic": topic,
            "type": POSE_STAMPED_TYPE,
        })
    }

    /// Build the rosbridge `publish` operation carrying `sample`.
    pub fn publish_frame(topic: &str, sample: &PoseSample, seq: u32, frame_id: &str) -> Value {
        json!({
            "op": "publish",
            "topic": topic,
            "msg": {
                "header": {
                    "seq": seq,
                    "stamp": {
                        "secs": sample.stamp.timestamp(),
                        "nsecs": sample.stamp.timestamp_subsec_nanos(),
                    },
                    "frame_id": frame_id,
                },
                "pose": {
                    "position": {
                        "x": sample.position.x,
                        "y": sample.position.y,
                        "z": sample.position.z,
                    },
                    "orientation": { "x": 0.0, "y": 0.0, "z": 0.0, "w": 0.0 },
                },
            },
        })
    }

    async fn send(sink: &mut WsSink, frame: Value) -> Result<(), BridgeError> {
        sink.send(Message::Text(frame.to_string().into()))
            .await
            .map_err(|e| BridgeError::Publish(format!("rosbridge send: {e}")))
    }
}

#[async_trait]
impl PosePublisher for RosbridgePublisher {
    async fn publish(&self, channel: &str, sample: PoseSample) -> Result<(), BridgeError> {
        let mut out = self.outbound.lock().await;

        if !out.advertised.contains(channel) {
            Self::send(&mut out.sink, Self::advertise_frame(channel)).await?;
            out.advertised.insert(channel.to_string());
            info!(topic = channel, msg_type = POSE_STAMPED_TYPE, "advertised topic");
        }

        let seq = out.seq;
        out.seq = out.seq.wrapping_add(1);
        Self::send(&mut out.sink, Self::publish_frame(channel, &sample, seq, &self.frame_id)).await
    }
}
