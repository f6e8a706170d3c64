//! Body Index Resolver.
//!
//! Turns the capture server's 6-DOF parameter dump into a [`BodyIndexMap`]
//! that maps each declared rigid-body name to its slot in the per-frame body
//! array.
//!
//! The description is XML; body names live at `<root>/<any>/Body/Name`, e.g.
//!
//! ```xml
//! <QTM_Parameters_Ver_1.19>
//!   <The_6D>
//!     <Body><Name>drone</Name></Body>
//!     <Body><Name>pixhawk</Name></Body>
//!   </The_6D>
//! </QTM_Parameters_Ver_1.19>
//! ```
//!
//! # Example
//!
//! ```rust
//! use mocap_core::resolver::resolve;
//!
//! let xml = "<P><The_6D><Body><Name> drone </Name></Body>\
//!            <Body><Name>pixhawk</Name></Body></The_6D></P>";
//! let map = resolve(xml).unwrap();
//! assert_eq!(map.get("drone"), Some(0));
//! assert_eq!(map.get("pixhawk"), Some(1));
//! ```

use std::collections::HashMap;

use mocap_types::BridgeError;
use quick_xml::Reader;
use quick_xml::events::Event;

/// Element path (below the document root's child) that carries a body name.
const BODY_TAG: &[u8] = b"Body";
const NAME_TAG: &[u8] = b"Name";

// ────────────────────────────────────────────────────────────────────────────
// BodyIndexMap
// ────────────────────────────────────────────────────────────────────────────

/// Mapping from rigid-body name to its index in every frame's body array.
///
/// Built once per session; read-only afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BodyIndexMap {
    indices: HashMap<String, usize>,
}

impl BodyIndexMap {
    /// Create an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Index of `name`, if the capture system declared it.
    pub fn get(&self, name: &str) -> Option<usize> {
        self.indices.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.indices.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Iterate over `(name, index)` pairs in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, usize)> {
        self.indices.iter().map(|(name, index)| (name.as_str(), *index))
    }

    /// Record `name` at `index` unless the name is already present.
    ///
    /// Returns `false` when an earlier occurrence kept its index.
    pub fn insert_first(&mut self, name: String, index: usize) -> bool {
        if self.indices.contains_key(&name) {
            return false;
        }
        self.indices.insert(name, index);
        true
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Traversal
// ────────────────────────────────────────────────────────────────────────────

/// Lazy iterator over the body names declared in a description, in
/// document order, each trimmed of surrounding whitespace.
///
/// The sequence is finite. Calling [`body_names`] again on the same text
/// restarts it from the beginning. Yields a single `Err` and then stops if
/// the document is malformed.
pub struct BodyNames<'a> {
    reader: Reader<&'a [u8]>,
    path: Vec<Vec<u8>>,
    name_text: Option<String>,
    saw_root: bool,
    done: bool,
}

/// Start a traversal of the body names in `description`.
pub fn body_names(description: &str) -> BodyNames<'_> {
    BodyNames {
        reader: Reader::from_str(description),
        path: Vec::new(),
        name_text: None,
        saw_root: false,
        done: false,
    }
}

impl BodyNames<'_> {
    fn at_body_name(&self) -> bool {
        self.path.len() == 4 && self.path[2] == BODY_TAG && self.path[3] == NAME_TAG
    }

    fn fail(&mut self, message: String) -> Option<Result<String, BridgeError>> {
        self.done = true;
        Some(Err(BridgeError::Parse(message)))
    }
}

impl Iterator for BodyNames<'_> {
    type Item = Result<String, BridgeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        loop {
            let position = self.reader.buffer_position();
            let event = match self.reader.read_event() {
                Ok(event) => event,
                Err(e) => return self.fail(format!("at byte {position}: {e}")),
            };

            match event {
                Event::Start(e) => {
                    self.saw_root = true;
                    self.path.push(e.name().as_ref().to_vec());
                    if self.at_body_name() {
                        self.name_text = Some(String::new());
                    }
                }
                Event::Empty(e) => {
                    self.saw_root = true;
                    self.path.push(e.name().as_ref().to_vec());
                    let is_name = self.at_body_name();
                    self.path.pop();
                    if is_name {
                        return Some(Ok(String::new()));
                    }
                }
                Event::Text(t) => {
                    if let Some(buf) = self.name_text.as_mut() {
                        match t.unescape() {
                            Ok(text) => buf.push_str(&text),
                            Err(e) => return self.fail(format!("at byte {position}: {e}")),
                        }
                    }
                }
                Event::CData(c) => {
                    if let Some(buf) = self.name_text.as_mut() {
                        buf.push_str(&String::from_utf8_lossy(&c.into_inner()));
                    }
                }
                Event::End(_) => {
                    let closes_name = self.at_body_name();
                    self.path.pop();
                    if closes_name && let Some(text) = self.name_text.take() {
                        return Some(Ok(text.trim().to_string()));
                    }
                }
                Event::Eof => {
                    if !self.saw_root {
                        return self.fail("description has no root element".to_string());
                    }
                    if let Some(last) = self.path.last() {
                        let open = String::from_utf8_lossy(last).to_string();
                        return self.fail(format!("unexpected end of description inside <{open}>"));
                    }
                    self.done = true;
                    return None;
                }
                _ => {}
            }
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Resolution
// ────────────────────────────────────────────────────────────────────────────

/// Build the name→index mapping for a capture description.
///
/// Every `Body/Name` entry consumes the next index, starting at 0, whether
/// or not its name was seen before; a repeated name keeps the index of its
/// first occurrence.
///
/// # Errors
///
/// Returns [`BridgeError::Parse`] when the description is not well-formed
/// XML. An empty body listing is not an error and yields an empty map.
pub fn resolve(description: &str) -> Result<BodyIndexMap, BridgeError> {
    let mut map = BodyIndexMap::new();
    for (index, name) in body_names(description).enumerate() {
        map.insert_first(name?, index);
    }
    Ok(map)
}
