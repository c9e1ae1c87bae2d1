pub mod definition;
pub mod error;
pub mod packet;
pub mod value;

#[cfg(test)]
mod tests;

pub use definition::{DefId, Definition, FieldDescriptor, FieldKind, Reference};
pub use error::{ObjrpcError, Result, WireError};
pub use packet::{Action, Packet, PacketId};
pub use value::{PacketBody, WireValue};

/// Protocol version exchanged during the peer handshake `config` task.
pub const PROTOCOL_VERSION: &str = "1.0";
