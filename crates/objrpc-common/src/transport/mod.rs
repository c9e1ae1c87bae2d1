//! Objrpc Transport Layer
//!
//! This module provides the codec and streaming frame reassembly used to move
//! packets over a duplex byte stream.
//!
//! # Wire Format
//!
//! Every packet is sent as `[4-byte length prefix as u32 big-endian] +
//! [codec-encoded packet bytes]`; the length excludes the 4-byte header
//! itself. Header and body are always concatenated into a single buffer
//! before writing, because some stream multiplexers reorder separate writes.
//!
//! # Components
//!
//! - **[`Codec`]** / **[`JsonCodec`]**: encode/decode packets
//! - **[`encode_frame`]**: length-prefix a packet into one contiguous buffer
//! - **[`FrameReassembler`]**: turn an arbitrary chunk stream back into packets

pub mod codec;
pub mod framing;

pub use codec::{Codec, JsonCodec};
pub use framing::{encode_frame, FrameReassembler, MAX_FRAME_SIZE};
