use crate::protocol::error::{ObjrpcError, Result};
use crate::protocol::packet::Packet;
use crate::transport::codec::Codec;

/// Maximum frame size (100 MB), guards against memory exhaustion from a
/// corrupt or hostile length prefix.
pub const MAX_FRAME_SIZE: usize = 100 * 1024 * 1024;

const LEN_PREFIX_SIZE: usize = 4;

/// Encodes a packet into one contiguous frame: `[4-byte BE length][body]`.
///
/// The length covers only the encoded body. Header and body are concatenated
/// before the write because splitting them into two writes can be reordered
/// by some stream multiplexers.
pub fn encode_frame(codec: &Codec, packet: &Packet) -> Result<Vec<u8>> {
    let body = codec.encode_packet(packet)?;
    if body.len() > MAX_FRAME_SIZE {
        return Err(ObjrpcError::NotValid(format!(
            "frame too large: {} bytes (max {} bytes)",
            body.len(),
            MAX_FRAME_SIZE
        )));
    }

    let mut frame = Vec::with_capacity(LEN_PREFIX_SIZE + body.len());
    frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Streaming re-assembler turning arbitrary byte chunks back into packets.
///
/// Keeps a growable accumulator and the length parsed from the last header,
/// so a frame split at any offset across multiple [`feed`](Self::feed) calls
/// is reassembled without re-reading the prefix.
///
/// A decode failure leaves the stream unrecoverable (there is no resync
/// marker); the accumulated buffer is discarded and the error surfaced, but
/// the connection itself stays up - whether to drop it is the caller's call.
pub struct FrameReassembler {
    codec: Codec,
    buf: Vec<u8>,
    /// Body length parsed from the current header; 0 means no header pending.
    pending_len: usize,
}

impl FrameReassembler {
    pub fn new(codec: Codec) -> Self {
        FrameReassembler {
            codec,
            buf: Vec::new(),
            pending_len: 0,
        }
    }

    /// Appends `chunk` and drains every complete frame from the buffer.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<Packet>> {
        self.buf.extend_from_slice(chunk);

        let mut packets = Vec::new();
        loop {
            if self.pending_len == 0 {
                if self.buf.len() < LEN_PREFIX_SIZE {
                    break;
                }
                let len =
                    u32::from_be_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]])
                        as usize;
                if len == 0 || len > MAX_FRAME_SIZE {
                    self.reset();
                    return Err(ObjrpcError::NotValid(format!(
                        "invalid frame length {len}"
                    )));
                }
                self.buf.drain(..LEN_PREFIX_SIZE);
                self.pending_len = len;
            }

            if self.buf.len() < self.pending_len {
                break;
            }

            let body: Vec<u8> = self.buf.drain(..self.pending_len).collect();
            self.pending_len = 0;
            match self.codec.decode_packet(&body) {
                Ok(packet) => packets.push(packet),
                Err(e) => {
                    self.reset();
                    return Err(e);
                }
            }
        }
        Ok(packets)
    }

    /// Bytes currently buffered, pending header included.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    fn reset(&mut self) {
        self.buf.clear();
        self.pending_len = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Action, PacketBody, WireValue};
    use serde_json::json;

    fn sample_packet(id: u64) -> Packet {
        Packet::request(
            id,
            Action::Get,
            PacketBody::Get {
                def_id: 1,
                name: "value".to_string(),
                args: vec![WireValue::raw(json!({"n": id}))],
            },
        )
    }

    #[test]
    fn test_frame_round_trip() {
        let packet = sample_packet(1);
        let frame = encode_frame(&Codec::new(), &packet).unwrap();

        let mut reassembler = FrameReassembler::new(Codec::new());
        let packets = reassembler.feed(&frame).unwrap();
        assert_eq!(packets, vec![packet]);
        assert_eq!(reassembler.buffered(), 0);
    }

    #[test]
    fn test_fragmented_delivery_at_every_offset() {
        let packet = sample_packet(2);
        let frame = encode_frame(&Codec::new(), &packet).unwrap();

        for split in 1..frame.len() {
            let mut reassembler = FrameReassembler::new(Codec::new());
            let first = reassembler.feed(&frame[..split]).unwrap();
            assert!(first.is_empty(), "no packet expected before split {split}");
            let second = reassembler.feed(&frame[split..]).unwrap();
            assert_eq!(second, vec![packet.clone()]);
        }
    }

    #[test]
    fn test_byte_by_byte_delivery() {
        let packet = sample_packet(3);
        let frame = encode_frame(&Codec::new(), &packet).unwrap();

        let mut reassembler = FrameReassembler::new(Codec::new());
        let mut collected = Vec::new();
        for byte in &frame {
            collected.extend(reassembler.feed(std::slice::from_ref(byte)).unwrap());
        }
        assert_eq!(collected, vec![packet]);
    }

    #[test]
    fn test_multiple_frames_in_one_chunk() {
        let codec = Codec::new();
        let a = sample_packet(4);
        let b = sample_packet(5);
        let mut buf = encode_frame(&codec, &a).unwrap();
        buf.extend(encode_frame(&codec, &b).unwrap());

        let mut reassembler = FrameReassembler::new(Codec::new());
        let packets = reassembler.feed(&buf).unwrap();
        assert_eq!(packets, vec![a, b]);
    }

    #[test]
    fn test_corrupt_body_discards_buffer() {
        let mut frame = Vec::new();
        frame.extend_from_slice(&4u32.to_be_bytes());
        frame.extend_from_slice(b"????");
        // a trailing partial header that must also be dropped
        frame.extend_from_slice(&[0x00, 0x00]);

        let mut reassembler = FrameReassembler::new(Codec::new());
        let result = reassembler.feed(&frame);
        assert!(matches!(result, Err(ObjrpcError::NotValid(_))));
        assert_eq!(reassembler.buffered(), 0);

        // the reassembler stays usable for a fresh, valid stream
        let packet = sample_packet(6);
        let frame = encode_frame(&Codec::new(), &packet).unwrap();
        assert_eq!(reassembler.feed(&frame).unwrap(), vec![packet]);
    }

    #[test]
    fn test_zero_length_frame_is_invalid() {
        let mut reassembler = FrameReassembler::new(Codec::new());
        let result = reassembler.feed(&0u32.to_be_bytes());
        assert!(matches!(result, Err(ObjrpcError::NotValid(_))));
    }

    #[test]
    fn test_oversized_length_is_rejected() {
        let mut reassembler = FrameReassembler::new(Codec::new());
        let result = reassembler.feed(&u32::MAX.to_be_bytes());
        assert!(matches!(result, Err(ObjrpcError::NotValid(_))));
        assert_eq!(reassembler.buffered(), 0);
    }

    #[test]
    fn test_pending_length_survives_short_reads() {
        let packet = sample_packet(7);
        let frame = encode_frame(&Codec::new(), &packet).unwrap();

        let mut reassembler = FrameReassembler::new(Codec::new());
        // header plus one body byte, then the rest in a second call
        assert!(reassembler.feed(&frame[..5]).unwrap().is_empty());
        let packets = reassembler.feed(&frame[5..]).unwrap();
        assert_eq!(packets, vec![packet]);
    }
}
