//! Headless, channel-keyed publish/subscribe bus for pose samples.
//!
//! Uses [`tokio::sync::broadcast`] channels under the hood so that every
//! subscriber receives every sample without any single subscriber blocking
//! the others.  One broadcast channel exists per output channel name and is
//! created the first time someone publishes or subscribes to it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use mocap_types::{BridgeError, PoseSample};
use tokio::sync::broadcast;
use tracing::warn;

use crate::adapter::PosePublisher;

/// Default channel capacity (number of buffered samples before old ones are
/// dropped for slow subscribers).
const DEFAULT_CAPACITY: usize = 256;

/// Shared pose bus.  Clone it cheaply – all clones share the same channels.
#[derive(Clone, Debug)]
pub struct PoseBus {
    capacity: usize,
    channels: Arc<Mutex<HashMap<String, broadcast::Sender<PoseSample>>>>,
}

impl PoseBus {
    /// Create a new bus whose channels each buffer `capacity` samples.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero, like [`broadcast::channel`].
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "pose bus capacity must be non-zero");
        Self {
            capacity,
            channels: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Publish `sample` on `channel`.
    ///
    /// Returns the number of subscribers that were handed the sample.
    /// `Ok(0)` means nobody is listening, which is a normal condition.
    pub fn publish_to(&self, channel: &str, sample: PoseSample) -> usize {
        self.sender(channel).send(sample).unwrap_or(0)
    }

    /// Subscribe to every sample published on `channel` from now on.
    pub fn subscribe(&self, channel: &str) -> PoseSubscriber {
        PoseSubscriber {
            channel: channel.to_string(),
            receiver: self.sender(channel).subscribe(),
        }
    }

    /// Number of live subscribers on `channel`.
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.channels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(channel)
            .map_or(0, broadcast::Sender::receiver_count)
    }

    fn sender(&self, channel: &str) -> broadcast::Sender<PoseSample> {
        let mut channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);
        channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }
}

impl Default for PoseBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[async_trait]
impl PosePublisher for PoseBus {
    async fn publish(&self, channel: &str, sample: PoseSample) -> Result<(), BridgeError> {
        self.publish_to(channel, sample);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Subscriber
// ---------------------------------------------------------------------------

/// An async receiver bound to one bus channel.
///
/// Obtained via [`PoseBus::subscribe`].
pub struct PoseSubscriber {
    channel: String,
    receiver: broadcast::Receiver<PoseSample>,
}

impl PoseSubscriber {
    /// Wait for the next sample on this channel.
    ///
    /// A subscriber that falls behind skips the samples it missed (logged)
    /// and continues with the oldest one still buffered.  Returns `None` once
    /// every publisher handle is gone.
    pub async fn recv(&mut self) -> Option<PoseSample> {
        loop {
            match self.receiver.recv().await {
                Ok(sample) => return Some(sample),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(channel = %self.channel, lagged_by = n, "PoseSubscriber lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking variant of [`recv`][Self::recv]; `None` when nothing is
    /// buffered.
    pub fn try_recv(&mut self) -> Option<PoseSample> {
        loop {
            match self.receiver.try_recv() {
                Ok(sample) => return Some(sample),
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    warn!(channel = %self.channel, lagged_by = n, "PoseSubscriber lagged");
                    continue;
                }
                Err(_) => return None,
            }
        }
    }

    /// The channel this subscriber is bound to.
    pub fn channel(&self) -> &str {
        &self.channel
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use mocap_types::{Point3, Rotation};

    fn make_sample(frame_number: u32) -> PoseSample {
        PoseSample {
            stamp: Utc::now(),
            body: "pixhawk".to_string(),
            frame_number,
            position: Point3::new(0.5, -0.25, 1.0),
            rotation: Rotation::identity(),
        }
    }

    #[tokio::test]
    async fn publish_and_receive() {
        let bus = PoseBus::default();
        let mut sub = bus.subscribe("/mavros/vision_pose/pose");

        let delivered = bus.publish_to("/mavros/vision_pose/pose", make_sample(1));
        assert_eq!(delivered, 1);

        let received = sub.recv().await.expect("sample");
        assert_eq!(received.frame_number, 1);
        assert_eq!(sub.channel(), "/mavros/vision_pose/pose");
    }

    #[tokio::test]
    async fn multiple_subscribers_receive_same_sample() {
        let bus = PoseBus::default();
        let mut sub1 = bus.subscribe("pose");
        let mut sub2 = bus.subscribe("pose");

        bus.publish_to("pose", make_sample(7));

        assert_eq!(sub1.recv().await.map(|s| s.frame_number), Some(7));
        assert_eq!(sub2.recv().await.map(|s| s.frame_number), Some(7));
    }

    #[test]
    fn publish_without_subscribers_is_not_an_error() {
        let bus = PoseBus::default();
        assert_eq!(bus.publish_to("nobody", make_sample(1)), 0);
    }

    #[tokio::test]
    async fn publisher_trait_ignores_missing_subscribers() {
        let bus = PoseBus::default();
        assert!(bus.publish("nobody", make_sample(1)).await.is_ok());
    }

    #[test]
    fn channels_are_isolated() {
        let bus = PoseBus::default();
        let mut other = bus.subscribe("other");
        let _pose = bus.subscribe("pose");

        bus.publish_to("pose", make_sample(1));
        assert!(other.try_recv().is_none());
    }

    #[test]
    fn subscriber_count_tracks_receivers() {
        let bus = PoseBus::default();
        assert_eq!(bus.subscriber_count("pose"), 0);
        let sub = bus.subscribe("pose");
        assert_eq!(bus.subscriber_count("pose"), 1);
        drop(sub);
        assert_eq!(bus.subscriber_count("pose"), 0);
    }

    #[tokio::test]
    async fn slow_subscriber_skips_to_buffered_samples() {
        let bus = PoseBus::new(4);
        let mut slow = bus.subscribe("pose");

        for i in 0..100 {
            bus.publish_to("pose", make_sample(i));
        }

        // The oldest still-buffered sample is delivered after the lag.
        let first = slow.recv().await.expect("sample after lag");
        assert_eq!(first.frame_number, 96);
    }

    #[tokio::test]
    async fn clones_share_channels() {
        let bus = PoseBus::default();
        let clone = bus.clone();
        let mut sub = bus.subscribe("pose");
        clone.publish_to("pose", make_sample(3));
        assert_eq!(sub.recv().await.map(|s| s.frame_number), Some(3));
    }
}
