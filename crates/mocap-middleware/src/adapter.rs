//! The outbound adapter pattern.
//!
//! The streaming driver never speaks to ROS, WebSockets, or sockets
//! directly.  It hands every [`PoseSample`] to a [`PosePublisher`], which
//! translates it into the protocol of the outside world.
//!
//! - [`PoseBus`][crate::bus::PoseBus] – in-process subscribers.
//! - [`RosbridgePublisher`][crate::rosbridge::RosbridgePublisher] – a ROS
//!   topic via `rosbridge_server`.
//! - [`UdpPublisher`][crate::udp::UdpPublisher] – JSON datagrams.

use async_trait::async_trait;
use mocap_types::{BridgeError, PoseSample};

/// Every outbound transport implements this trait.
///
/// # Contract
///
/// Delivery is fire-and-forget: `Ok(())` means the sample was handed to the
/// transport, not that anyone received it.  Errors are reported per sample
/// as [`BridgeError::Publish`] and never end a streaming session.
#[async_trait]
pub trait PosePublisher: Send + Sync {
    /// Deliver `sample` on the output `channel` (a topic name, bus channel,
    /// or label, depending on the transport).
    async fn publish(&self, channel: &str, sample: PoseSample) -> Result<(), BridgeError>;
}

#[async_trait]
impl<P: PosePublisher + ?Sized> PosePublisher for std::sync::Arc<P> {
    async fn publish(&self, channel: &str, sample: PoseSample) -> Result<(), BridgeError> {
        (**self).publish(channel, sample).await
    }
}

#[async_trait]
impl<P: PosePublisher + ?Sized> PosePublisher for Box<P> {
    async fn publish(&self, channel: &str, sample: PoseSample) -> Result<(), BridgeError> {
        (**self).publish(channel, sample).await
    }
}
