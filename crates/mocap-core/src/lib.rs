//! `mocap-core` – The Frame Pipeline
//!
//! The pure, protocol-free half of the bridge: everything needed to turn a
//! capture description and a stream of frames into pose samples.
//!
//! # Modules
//!
//! - [`resolver`] – [`resolve`][resolver::resolve]: parses the capture
//!   system's 6-DOF description into a [`BodyIndexMap`][resolver::BodyIndexMap].
//! - [`translator`] – [`FrameTranslator`][translator::FrameTranslator]:
//!   extracts one body from a frame, converts millimetres to metres, and
//!   stamps the result.
//! - [`capture`] – the [`CaptureConnector`] / [`CaptureSession`] traits that
//!   capture-server clients implement.
//! - [`sim`] – [`SimCapture`][sim::SimCapture]: a scripted capture server
//!   for tests and dry runs.

pub mod capture;
pub mod resolver;
pub mod sim;
pub mod translator;

pub use capture::{CaptureConnector, CaptureSession, ParameterKind, StreamComponent};
pub use resolver::{BodyIndexMap, BodyNames, body_names, resolve};
pub use translator::{FrameTranslator, translate};
