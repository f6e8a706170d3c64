//! Frame Translator.
//!
//! Picks one rigid body out of a [`RawFrame`], converts its position from
//! millimetres to metres, and stamps the result with the current wall-clock
//! time.

use chrono::Utc;
use mocap_types::{BridgeError, Point3, PoseSample, RawFrame};

use crate::resolver::BodyIndexMap;

/// Translate one frame into a [`PoseSample`] for `body_name`.
///
/// Returns:
/// * `Ok(Some(sample))` – the body was found in the frame.
/// * `Ok(None)` – `body_name` was never declared by the capture system; no
///   sample exists for this frame.
/// * `Err(BridgeError::BodyIndexOutOfRange)` – the body is declared but the
///   frame's body array is too short for its index.
pub fn translate(
    frame: &RawFrame,
    body_name: &str,
    index_map: &BodyIndexMap,
) -> Result<Option<PoseSample>, BridgeError> {
    let Some(index) = index_map.get(body_name) else {
        return Ok(None);
    };

    let body = frame
        .bodies
        .get(index)
        .ok_or_else(|| BridgeError::BodyIndexOutOfRange {
            body: body_name.to_string(),
            index,
            body_count: frame.bodies.len(),
        })?;

    let position = Point3::from_millimetres(body.position);

    Ok(Some(PoseSample {
        stamp: Utc::now(),
        body: body_name.to_string(),
        frame_number: frame.frame_number,
        position,
        rotation: body.rotation,
    }))
}

/// [`translate`] bound to the body name and index map of one session.
#[derive(Debug, Clone)]
pub struct FrameTranslator {
    body_name: String,
    index_map: BodyIndexMap,
}

impl FrameTranslator {
    pub fn new(body_name: impl Into<String>, index_map: BodyIndexMap) -> Self {
        Self {
            body_name: body_name.into(),
            index_map,
        }
    }

    pub fn body_name(&self) -> &str {
        &self.body_name
    }

    pub fn index_map(&self) -> &BodyIndexMap {
        &self.index_map
    }

    /// Index the target body resolved to, if any.
    pub fn target_index(&self) -> Option<usize> {
        self.index_map.get(&self.body_name)
    }

    pub fn translate(&self, frame: &RawFrame) -> Result<Option<PoseSample>, BridgeError> {
        translate(frame, &self.body_name, &self.index_map)
    }
}
