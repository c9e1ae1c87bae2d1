use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::definition::{DefId, Definition, Reference};
use super::error::WireError;

/// A value crossing the wire boundary.
///
/// Closed sum so the object-remoting transform can dispatch by exhaustive
/// pattern matching; a collection of definitions is deliberately its own
/// case, distinct from a single definition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum WireValue {
    /// Plain JSON payload, opaque to the remoting layer
    Raw(Value),
    /// A remotable object's description
    Definition(Definition),
    /// A collection of remotable objects
    Definitions(Vec<Definition>),
    /// Identity pointer to an already-known definition
    Reference(Reference),
}

impl WireValue {
    pub fn null() -> Self {
        WireValue::Raw(Value::Null)
    }

    pub fn raw(value: Value) -> Self {
        WireValue::Raw(value)
    }

    pub fn reference(def_id: DefId) -> Self {
        WireValue::Reference(Reference::new(def_id))
    }

    pub fn as_raw(&self) -> Option<&Value> {
        match self {
            WireValue::Raw(value) => Some(value),
            _ => None,
        }
    }

    /// Short human-readable tag, used in diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            WireValue::Raw(_) => "raw",
            WireValue::Definition(_) => "definition",
            WireValue::Definitions(_) => "definitions",
            WireValue::Reference(_) => "reference",
        }
    }
}

impl From<Value> for WireValue {
    fn from(value: Value) -> Self {
        WireValue::Raw(value)
    }
}

/// Typed packet payload.
///
/// The variant must agree with the packet's action code (requests) or error
/// flag (responses); a mismatch is a Not-Valid protocol violation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "op", content = "data", rename_all = "snake_case")]
pub enum PacketBody {
    /// Read a property or invoke a method of `def_id`
    Get {
        def_id: DefId,
        name: String,
        #[serde(default)]
        args: Vec<WireValue>,
    },
    /// Write a property of `def_id`
    Set {
        def_id: DefId,
        name: String,
        value: WireValue,
    },
    /// Run a named task on the receiving node
    Task {
        task: String,
        #[serde(default)]
        args: Vec<WireValue>,
    },
    /// Successful response payload
    Result(WireValue),
    /// Error response payload (error flag set on the packet)
    Error(WireError),
}

impl PacketBody {
    /// Short human-readable tag, used in diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            PacketBody::Get { .. } => "get",
            PacketBody::Set { .. } => "set",
            PacketBody::Task { .. } => "task",
            PacketBody::Result(_) => "result",
            PacketBody::Error(_) => "error",
        }
    }
}
