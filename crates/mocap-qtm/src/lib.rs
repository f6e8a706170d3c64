//! # mocap-qtm
//!
//! Client for the Qualisys Track Manager (QTM) real-time protocol, limited to
//! the commands a pose bridge needs.
//!
//! ## Modules
//!
//! - [`protocol`] – Little-endian packet framing and the 6-DOF data codec.
//! - [`client`] – [`QtmConnector`] / [`QtmSession`]: the TCP command dialogue
//!   behind the [`mocap_core::CaptureSession`] trait.

pub mod client;
pub mod protocol;

pub use client::{QtmConnector, QtmSession, with_default_port};
pub use protocol::{DEFAULT_PORT, PROTOCOL_VERSION};
