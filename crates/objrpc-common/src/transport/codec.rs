use crate::protocol::error::{ObjrpcError, Result};
use crate::protocol::packet::Packet;

/// Codec for encoding/decoding protocol packets.
///
/// Currently only JSON is supported, but the enum allows for future
/// extensibility (e.g., MessagePack, CBOR, etc.).
///
/// # Example
///
/// ```
/// use objrpc_common::protocol::{Action, Packet, PacketBody, WireValue};
/// use objrpc_common::transport::Codec;
///
/// let codec = Codec::new();
/// let packet = Packet::request(1, Action::Task, PacketBody::Task {
///     task: "config".to_string(),
///     args: vec![],
/// });
///
/// let encoded = codec.encode_packet(&packet).unwrap();
/// let decoded = codec.decode_packet(&encoded).unwrap();
/// assert_eq!(packet, decoded);
/// ```
pub enum Codec {
    /// JSON codec (currently the only supported format)
    Json(JsonCodec),
}

impl Codec {
    /// Create a new codec (JSON is the only supported format)
    pub fn new() -> Self {
        Codec::Json(JsonCodec)
    }

    /// Encode a packet to bytes
    pub fn encode_packet(&self, packet: &Packet) -> Result<Vec<u8>> {
        match self {
            Codec::Json(_) => JsonCodec::encode_packet(packet),
        }
    }

    /// Decode one packet from exactly `data`.
    ///
    /// The slice must contain a single complete packet; trailing bytes mean
    /// the framer handed over a frame the codec did not fully consume, which
    /// is reported as a Not-Valid corrupt-stream error.
    pub fn decode_packet(&self, data: &[u8]) -> Result<Packet> {
        match self {
            Codec::Json(_) => JsonCodec::decode_packet(data),
        }
    }
}

impl Default for Codec {
    fn default() -> Self {
        Self::new()
    }
}

/// JSON codec for encoding/decoding protocol packets.
pub struct JsonCodec;

impl JsonCodec {
    /// Encode a packet to bytes
    pub fn encode_packet(packet: &Packet) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(packet)?)
    }

    /// Decode a packet from bytes; rejects trailing garbage.
    pub fn decode_packet(data: &[u8]) -> Result<Packet> {
        serde_json::from_slice(data)
            .map_err(|e| ObjrpcError::NotValid(format!("packet decode failed: {e}")))
    }
}
