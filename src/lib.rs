//! Objrpc - remote-object RPC.
//!
//! Facade crate re-exporting the public API of the workspace members:
//!
//! - [`objrpc_common`](objrpc_common) - protocol types and the framed
//!   transport layer
//! - [`objrpc_node`](objrpc_node) - nodes, remote peers and the context
//!   proxying layer
//!
//! See the member crates for the full documentation; the cross-crate
//! integration tests live in this package's `tests/` directory.

pub use objrpc_common::protocol;
pub use objrpc_common::transport;

pub use objrpc_common::protocol::{
    Action, DefId, Definition, FieldDescriptor, FieldKind, ObjrpcError, Packet, PacketBody,
    Reference, Result, WireError, WireValue,
};
pub use objrpc_node::{
    Context, ContextShape, ContextValue, EventBus, Interface, Node, NodeOptions, PeerConfig,
    PeerId, RemotePeer, RemoteValue, Stub, SubscriptionId,
};
