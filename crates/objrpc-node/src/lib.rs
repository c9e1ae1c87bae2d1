//! Objrpc Node and Remote Peer
//!
//! This crate implements the core of the objrpc remote-object RPC system: a
//! [`Node`] hosts object instances ("contexts") and talks to other nodes
//! through one [`RemotePeer`] per connection.
//!
//! # Overview
//!
//! - **Contexts**: any [`Context`] implementation can be attached to a node
//!   under a public name (strong) or handed out transiently as a call result
//!   (weak). Attaching builds a `Definition` describing the object's surface.
//! - **Remote peers**: a [`RemotePeer`] owns its connection, write queue and
//!   pending-request table. Requests are correlated by packet id and timed
//!   out by a TTL sweep; disconnecting fails every outstanding request
//!   immediately.
//! - **Interfaces**: a remote `Definition` is consumed through an
//!   [`Interface`] proxy, which validates field access locally before any
//!   bytes are sent.
//! - **Proxying**: a context can be re-hosted on a remote node
//!   ([`RemotePeer::attach_context`]), and results relayed through an
//!   intermediate node keep their identity via the object-remoting
//!   transform.
//!
//! # Example
//!
//! Two nodes wired over an in-memory duplex stream:
//!
//! ```no_run
//! # use objrpc_node::{Node, NodeOptions};
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let server = Node::new(NodeOptions::default());
//! let client = Node::new(NodeOptions::default());
//!
//! let (a, b) = tokio::io::duplex(64 * 1024);
//! let server_peer = server.create_peer();
//! let client_peer = client.create_peer();
//! server_peer.connect(a).await?;
//! client_peer.connect(b).await?;
//! tokio::try_join!(server_peer.handshake(), client_peer.handshake())?;
//! # Ok(())
//! # }
//! ```

pub mod context;
pub mod events;
pub mod interface;
pub mod node;
pub mod peer;
pub mod stub;

mod correlator;
mod tasks;

pub use context::{Context, ContextShape, ContextValue};
pub use events::{EventBus, EventCallback, SubscriptionId};
pub use interface::{Interface, RemoteValue};
pub use node::{Node, NodeOptions, PeerId};
pub use peer::{PeerConfig, RemotePeer};
pub use stub::Stub;
