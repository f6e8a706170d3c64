//! `mocap-middleware` – The Outbound Side
//!
//! Delivers [`PoseSample`][mocap_types::PoseSample]s to whatever consumes
//! them, without caring what the poses mean.
//!
//! # Modules
//!
//! - [`adapter`] – the [`PosePublisher`] trait every outbound transport
//!   implements.
//! - [`bus`] – in-process, channel-keyed publish/subscribe bus built on
//!   Tokio broadcast channels.
//! - [`rosbridge`] – publishes `geometry_msgs/PoseStamped` messages to a
//!   `rosbridge_server` over WebSocket.
//! - [`udp`] – sends one JSON datagram per sample to a fixed peer.

pub mod adapter;
pub mod bus;
pub mod rosbridge;
pub mod udp;

pub use adapter::PosePublisher;
pub use bus::{PoseBus, PoseSubscriber};
pub use rosbridge::RosbridgePublisher;
pub use udp::UdpPublisher;
