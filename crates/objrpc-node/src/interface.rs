use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use objrpc_common::protocol::{DefId, Definition, ObjrpcError, Result, WireValue};

use crate::peer::RemotePeer;

/// Local proxy for a remote definition.
///
/// The counterpart of a stub: where the stub makes a local instance
/// dispatchable by definition id, the interface turns a received definition
/// back into something callable. Field existence and readonly flags are
/// checked locally, before any bytes are sent.
#[derive(Clone)]
pub struct Interface {
    peer: Arc<RemotePeer>,
    def_id: DefId,
}

impl Interface {
    pub(crate) fn new(peer: Arc<RemotePeer>, def_id: DefId) -> Self {
        Interface { peer, def_id }
    }

    pub fn def_id(&self) -> DefId {
        self.def_id
    }

    /// The definition this interface proxies, as currently known to the peer.
    pub fn definition(&self) -> Result<Definition> {
        self.peer.definition(self.def_id)
    }

    /// Invokes a remote method.
    pub async fn call(&self, method: &str, args: Vec<WireValue>) -> Result<RemoteValue> {
        self.peer.get(self.def_id, method, args).await
    }

    /// Reads a remote property.
    pub async fn get_prop(&self, prop: &str) -> Result<RemoteValue> {
        self.peer.get(self.def_id, prop, Vec::new()).await
    }

    /// Writes a remote property.
    pub async fn set_prop(&self, prop: &str, value: WireValue) -> Result<()> {
        self.peer.set(self.def_id, prop, value).await
    }

    pub(crate) async fn call_wire(&self, method: &str, args: Vec<WireValue>) -> Result<WireValue> {
        self.peer.get_wire(self.def_id, method, args).await
    }

    pub(crate) async fn get_wire(&self, prop: &str) -> Result<WireValue> {
        self.peer.get_wire(self.def_id, prop, Vec::new()).await
    }

    pub(crate) async fn set_wire(&self, prop: &str, value: WireValue) -> Result<()> {
        self.peer.set(self.def_id, prop, value).await
    }
}

impl fmt::Debug for Interface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interface")
            .field("peer", &self.peer.id())
            .field("def_id", &self.def_id)
            .finish()
    }
}

/// Result of a remote operation, with definitions already wrapped into
/// callable interfaces.
#[derive(Debug)]
pub enum RemoteValue {
    /// Plain JSON result
    Raw(Value),
    /// A (possibly third-party) object, callable through the same peer
    Object(Interface),
    /// A collection of objects
    Objects(Vec<Interface>),
}

impl RemoteValue {
    pub fn as_raw(&self) -> Option<&Value> {
        match self {
            RemoteValue::Raw(value) => Some(value),
            _ => None,
        }
    }

    /// Unwraps a plain JSON result.
    pub fn into_raw(self) -> Result<Value> {
        match self {
            RemoteValue::Raw(value) => Ok(value),
            other => Err(ObjrpcError::NotValid(format!(
                "expected raw value, got {}",
                other.kind()
            ))),
        }
    }

    /// Unwraps an object result.
    pub fn into_object(self) -> Result<Interface> {
        match self {
            RemoteValue::Object(iface) => Ok(iface),
            other => Err(ObjrpcError::NotValid(format!(
                "expected object, got {}",
                other.kind()
            ))),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            RemoteValue::Raw(_) => "raw",
            RemoteValue::Object(_) => "object",
            RemoteValue::Objects(_) => "objects",
        }
    }
}
