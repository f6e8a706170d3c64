//! QTM real-time packet codec.
//!
//! Every packet starts with an 8-byte little-endian header:
//! - Bytes 0-3: total packet size, header included
//! - Bytes 4-7: packet type
//!
//! Command, error and XML payloads are NUL-terminated text.  A data payload
//! is:
//! - `timestamp: u64`, `frame_number: u32`, `component_count: u32`
//! - per component: `size: u32` (component header included), `type: u32`,
//!   then the component body
//!
//! The 6-DOF component body is `body_count: u32`, `drop_rate: u16`,
//! `out_of_sync_rate: u16`, then per body three `f32` position coordinates
//! (millimetres) and nine `f32` rotation-matrix entries.  Other components
//! are skipped.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use mocap_types::{BodyPose, BridgeError, Position, RawFrame, Rotation};

/// Default port of the QTM real-time server (little-endian protocol).
pub const DEFAULT_PORT: u16 = 22223;

/// Real-time protocol version negotiated on connect.
pub const PROTOCOL_VERSION: &str = "1.19";

/// Packet header size in bytes.
pub const HEADER_SIZE: usize = 8;

/// Largest packet accepted from the server.
pub const MAX_PACKET_SIZE: usize = 16 * 1024 * 1024;

/// Component type id of 6-DOF data.
pub const COMPONENT_6D: u32 = 5;

const COMPONENT_HEADER_SIZE: usize = 8;
const SIX_DOF_BODY_SIZE: usize = 12 * 4;

/// Packet types of the real-time protocol.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum PacketType {
    Error = 0,
    Command = 1,
    Xml = 2,
    Data = 3,
    NoMoreData = 4,
    C3dFile = 5,
    Event = 6,
    Discover = 7,
    QtmFile = 8,
}

impl PacketType {
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(PacketType::Error),
            1 => Some(PacketType::Command),
            2 => Some(PacketType::Xml),
            3 => Some(PacketType::Data),
            4 => Some(PacketType::NoMoreData),
            5 => Some(PacketType::C3dFile),
            6 => Some(PacketType::Event),
            7 => Some(PacketType::Discover),
            8 => Some(PacketType::QtmFile),
            _ => None,
        }
    }
}

/// A decoded packet.
#[derive(Clone, Debug, PartialEq)]
pub enum Packet {
    Error(String),
    Command(String),
    Xml(String),
    Data(RawFrame),
    NoMoreData,
    /// Server event notification (capture started, connection closing, ...).
    Event(u8),
    /// Any other packet type; the bridge never acts on these.
    Other(PacketType),
}

/// Decode a packet header into its packet type and payload length.
pub fn decode_header(header: [u8; HEADER_SIZE]) -> Result<(PacketType, usize), BridgeError> {
    let mut buf = &header[..];
    let size = buf.get_u32_le() as usize;
    let raw_type = buf.get_u32_le();

    if !(HEADER_SIZE..=MAX_PACKET_SIZE).contains(&size) {
        return Err(BridgeError::Protocol(format!("invalid packet size {size}")));
    }
    let kind = PacketType::from_u32(raw_type)
        .ok_or_else(|| BridgeError::Protocol(format!("unknown packet type {raw_type}")))?;
    Ok((kind, size - HEADER_SIZE))
}

/// Encode a packet of `kind` around `payload`.
pub fn encode_packet(kind: PacketType, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(HEADER_SIZE + payload.len());
    buf.put_u32_le((HEADER_SIZE + payload.len()) as u32);
    buf.put_u32_le(kind as u32);
    buf.put_slice(payload);
    buf.freeze()
}

/// Encode a NUL-terminated text packet (commands from the client).
pub fn encode_text(kind: PacketType, text: &str) -> Bytes {
    let mut payload = Vec::with_capacity(text.len() + 1);
    payload.extend_from_slice(text.as_bytes());
    payload.push(0);
    encode_packet(kind, &payload)
}

/// Encode a command packet.
pub fn encode_command(command: &str) -> Bytes {
    encode_text(PacketType::Command, command)
}

/// Decode a payload according to its packet type.
pub fn decode_packet(kind: PacketType, payload: &[u8]) -> Result<Packet, BridgeError> {
    Ok(match kind {
        PacketType::Error => Packet::Error(decode_text(payload)),
        PacketType::Command => Packet::Command(decode_text(payload)),
        PacketType::Xml => Packet::Xml(decode_text(payload)),
        PacketType::Data => Packet::Data(decode_data(payload)?),
        PacketType::NoMoreData => Packet::NoMoreData,
        PacketType::Event => Packet::Event(payload.first().copied().unwrap_or_default()),
        other => Packet::Other(other),
    })
}

/// Text payloads are NUL-terminated; anything after the first NUL is padding.
pub fn decode_text(payload: &[u8]) -> String {
    let end = payload.iter().position(|&b| b == 0).unwrap_or(payload.len());
    String::from_utf8_lossy(&payload[..end]).into_owned()
}

fn need(buf: &[u8], len: usize, what: &str) -> Result<(), BridgeError> {
    if buf.remaining() < len {
        return Err(BridgeError::Protocol(format!(
            "truncated {what}: need {len} bytes, have {}",
            buf.remaining()
        )));
    }
    Ok(())
}

/// Decode a data payload into a [`RawFrame`] holding its 6-DOF bodies.
///
/// A frame without a 6-DOF component decodes to an empty body list.
pub fn decode_data(payload: &[u8]) -> Result<RawFrame, BridgeError> {
    let mut buf = payload;
    need(buf, 16, "data header")?;
    let timestamp_us = buf.get_u64_le();
    let frame_number = buf.get_u32_le();
    let component_count = buf.get_u32_le();

    let mut bodies = Vec::new();
    for _ in 0..component_count {
        need(buf, COMPONENT_HEADER_SIZE, "component header")?;
        let size = buf.get_u32_le() as usize;
        let component_type = buf.get_u32_le();
        let body_len = size.checked_sub(COMPONENT_HEADER_SIZE).ok_or_else(|| {
            BridgeError::Protocol(format!("component size {size} smaller than its header"))
        })?;
        need(buf, body_len, "component")?;
        let (component, rest) = buf.split_at(body_len);
        buf = rest;

        if component_type == COMPONENT_6D {
            bodies = decode_six_dof(component)?;
        }
    }

    Ok(RawFrame {
        timestamp_us,
        frame_number,
        bodies,
    })
}

fn decode_six_dof(mut buf: &[u8]) -> Result<Vec<BodyPose>, BridgeError> {
    need(buf, 8, "6D component header")?;
    let body_count = buf.get_u32_le() as usize;
    let _drop_rate = buf.get_u16_le();
    let _out_of_sync_rate = buf.get_u16_le();

    need(buf, body_count.saturating_mul(SIX_DOF_BODY_SIZE), "6D bodies")?;
    let mut bodies = Vec::with_capacity(body_count);
    for _ in 0..body_count {
        let position = Position::new(buf.get_f32_le(), buf.get_f32_le(), buf.get_f32_le());
        let mut matrix = [0.0f32; 9];
        for entry in &mut matrix {
            *entry = buf.get_f32_le();
        }
        bodies.push(BodyPose::new(position, Rotation(matrix)));
    }
    Ok(bodies)
}

/// Encode a 6-DOF data payload; the inverse of [`decode_data`].
pub fn encode_six_dof_data(frame: &RawFrame) -> Bytes {
    let component_len = COMPONENT_HEADER_SIZE + 8 + frame.bodies.len() * SIX_DOF_BODY_SIZE;
    let mut buf = BytesMut::with_capacity(16 + component_len);
    buf.put_u64_le(frame.timestamp_us);
    buf.put_u32_le(frame.frame_number);
    buf.put_u32_le(1);

    buf.put_u32_le(component_len as u32);
    buf.put_u32_le(COMPONENT_6D);
    buf.put_u32_le(frame.bodies.len() as u32);
    buf.put_u16_le(0);
    buf.put_u16_le(0);
    for body in &frame.bodies {
        buf.put_f32_le(body.position.x);
        buf.put_f32_le(body.position.y);
        buf.put_f32_le(body.position.z);
        for entry in body.rotation.0 {
            buf.put_f32_le(entry);
        }
    }
    buf.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header_of(packet: &Bytes) -> [u8; HEADER_SIZE] {
        let mut header = [0u8; HEADER_SIZE];
        header.copy_from_slice(&packet[..HEADER_SIZE]);
        header
    }

    #[test]
    fn command_packet_layout() {
        let packet = encode_command("Version 1.19");
        assert_eq!(packet.len(), HEADER_SIZE + "Version 1.19".len() + 1);
        assert_eq!(&packet[0..4], &(packet.len() as u32).to_le_bytes());
        assert_eq!(&packet[4..8], &1u32.to_le_bytes());
        assert_eq!(packet[packet.len() - 1], 0);
    }

    #[test]
    fn header_decodes_type_and_payload_length() {
        let packet = encode_text(PacketType::Xml, "<P/>");
        let (kind, len) = decode_header(header_of(&packet)).unwrap();
        assert_eq!(kind, PacketType::Xml);
        assert_eq!(len, 5);
        let decoded = decode_packet(kind, &packet[HEADER_SIZE..]).unwrap();
        assert_eq!(decoded, Packet::Xml("<P/>".to_string()));
    }

    #[test]
    fn header_rejects_undersized_and_unknown() {
        let mut header = [0u8; HEADER_SIZE];
        header[0..4].copy_from_slice(&4u32.to_le_bytes());
        assert!(matches!(decode_header(header), Err(BridgeError::Protocol(_))));

        header[0..4].copy_from_slice(&8u32.to_le_bytes());
        header[4..8].copy_from_slice(&99u32.to_le_bytes());
        assert!(matches!(decode_header(header), Err(BridgeError::Protocol(_))));
    }

    #[test]
    fn text_stops_at_first_nul() {
        assert_eq!(decode_text(b"You are now master\0\0\0"), "You are now master");
        assert_eq!(decode_text(b"no terminator"), "no terminator");
    }

    #[test]
    fn six_dof_frame_decodes_positions_and_rotation() {
        let rotation = Rotation([0.0, -1.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0]);
        let frame = RawFrame {
            timestamp_us: 123_456,
            frame_number: 77,
            bodies: vec![
                BodyPose::at_mm(0.0, 0.0, 0.0),
                BodyPose::new(Position::new(500.0, -250.0, 1000.0), rotation),
            ],
        };
        let decoded = decode_data(&encode_six_dof_data(&frame)).unwrap();
        assert_eq!(decoded.timestamp_us, 123_456);
        assert_eq!(decoded.frame_number, 77);
        assert_eq!(decoded.bodies[1].position, Position::new(500.0, -250.0, 1000.0));
        assert_eq!(decoded.bodies[1].rotation, rotation);
    }

    #[test]
    fn untracked_bodies_decode_as_nan() {
        let frame = RawFrame::new(1, vec![BodyPose::at_mm(f32::NAN, f32::NAN, f32::NAN)]);
        let decoded = decode_data(&encode_six_dof_data(&frame)).unwrap();
        assert!(decoded.bodies[0].position.x.is_nan());
    }

    #[test]
    fn other_components_are_skipped() {
        let mut buf = BytesMut::new();
        buf.put_u64_le(0);
        buf.put_u32_le(3);
        buf.put_u32_le(2);
        // A 3D-marker component (type 1) with 4 bytes of opaque body.
        buf.put_u32_le(12);
        buf.put_u32_le(1);
        buf.put_u32_le(0xdead_beef);
        // A 6D component with no bodies.
        buf.put_u32_le(16);
        buf.put_u32_le(COMPONENT_6D);
        buf.put_u32_le(0);
        buf.put_u16_le(0);
        buf.put_u16_le(0);

        let frame = decode_data(&buf).unwrap();
        assert_eq!(frame.frame_number, 3);
        assert!(frame.bodies.is_empty());
    }

    #[test]
    fn truncated_data_is_rejected() {
        let frame = RawFrame::new(1, vec![BodyPose::at_mm(1.0, 2.0, 3.0)]);
        let encoded = encode_six_dof_data(&frame);
        for cut in [4, 20, encoded.len() - 1] {
            let result = decode_data(&encoded[..cut]);
            assert!(matches!(result, Err(BridgeError::Protocol(_))), "cut at {cut}: {result:?}");
        }
    }

    #[test]
    fn event_packet_carries_event_id() {
        let decoded = decode_packet(PacketType::Event, &[7]).unwrap();
        assert_eq!(decoded, Packet::Event(7));
    }
}
