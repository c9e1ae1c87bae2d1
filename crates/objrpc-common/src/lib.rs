//! Objrpc Common Types and Transport
//!
//! This crate provides the core protocol definitions and framed transport
//! layer for the objrpc remote-object RPC system.
//!
//! # Overview
//!
//! Objrpc lets one process invoke methods and properties on object instances
//! ("contexts") that live in another process. This crate contains the shared
//! protocol and transport infrastructure used by all components:
//!
//! - **Protocol Layer**: Packet, Definition, Reference and error types
//! - **Transport Layer**: length-prefixed framing over a pluggable codec
//!
//! # Architecture
//!
//! The system uses a simple wire protocol:
//! - **Serialization**: JSON (the codec enum leaves room for alternatives)
//! - **Message Format**: `[4-byte length prefix as u32 big-endian] + [packet data]`
//! - **Max Frame Size**: 100 MB (prevents memory exhaustion)
//!
//! # Components
//!
//! - [`protocol`] - Core protocol types (Packet, Definition, Reference, Error)
//! - [`transport`] - Codec and streaming frame reassembly
//!
//! # Example
//!
//! ```
//! use objrpc_common::protocol::{Action, Packet, PacketBody, WireValue};
//! use serde_json::json;
//!
//! // A GET request for field "sum" of definition 7
//! let packet = Packet::request(
//!     1,
//!     Action::Get,
//!     PacketBody::Get {
//!         def_id: 7,
//!         name: "sum".to_string(),
//!         args: vec![WireValue::raw(json!([1, 2]))],
//!     },
//! );
//! assert!(packet.impulse());
//! ```

pub mod protocol;
pub mod transport;

pub use protocol::*;
