//! UDP datagram publisher.
//!
//! Sends one compact JSON object per sample to a fixed peer, for consumers
//! that cannot speak rosbridge (flight-controller companions, loggers):
//!
//! ```json
//! {"channel":"/mavros/vision_pose/pose","stamp":"2026-01-01T00:00:00Z",
//!  "frame":12,"x":0.5,"y":-0.25,"z":1.0}
//! ```

use std::net::SocketAddr;

use async_trait::async_trait;
use mocap_types::{BridgeError, PoseSample};
use serde_json::{Value, json};
use tokio::net::{UdpSocket, lookup_host};
use tracing::info;

use crate::adapter::PosePublisher;

/// Publishes pose samples as JSON datagrams.
pub struct UdpPublisher {
    socket: UdpSocket,
    peer: SocketAddr,
}

impl UdpPublisher {
    /// Resolve `host:port` and bind an ephemeral local socket of the same
    /// address family, connected to that peer.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Publish`] if the peer cannot be resolved or the
    /// local socket cannot be bound.
    pub async fn connect(host: &str, port: u16) -> Result<Self, BridgeError> {
        let peer = lookup_host((host, port))
            .await
            .map_err(|e| BridgeError::Publish(format!("resolve {host}:{port}: {e}")))?
            .next()
            .ok_or_else(|| BridgeError::Publish(format!("{host}:{port} resolved to no address")))?;

        let local: SocketAddr = if peer.is_ipv4() {
            SocketAddr::from(([0, 0, 0, 0], 0))
        } else {
            SocketAddr::from(([0u16; 8], 0))
        };
        let socket = UdpSocket::bind(local)
            .await
            .map_err(|e| BridgeError::Publish(format!("udp bind: {e}")))?;
        socket
            .connect(peer)
            .await
            .map_err(|e| BridgeError::Publish(format!("udp connect to {peer}: {e}")))?;

        info!(peer = %peer, "udp publisher ready");
        Ok(Self { socket, peer })
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Build the datagram body for `sample`.
    pub fn datagram(channel: &str, sample: &PoseSample) -> Value {
        json!({
            "channel": channel,
            "stamp": sample.stamp.to_rfc3339(),
            "frame": sample.frame_number,
            "x": sample.position.x,
            "y": sample.position.y,
            "z": sample.position.z,
        })
    }
}

#[async_trait]
impl PosePublisher for UdpPublisher {
    async fn publish(&self, channel: &str, sample: PoseSample) -> Result<(), BridgeError> {
        let bytes = Self::datagram(channel, &sample).to_string().into_bytes();
        self.socket
            .send(&bytes)
            .await
            .map_err(|e| BridgeError::Publish(format!("udp send to {}: {e}", self.peer)))?;
        Ok(())
    }
}
