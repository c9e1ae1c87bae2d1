use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Process-local definition identifier.
///
/// Unique within the node that allocated it, not across peers. Cross-peer
/// identity is established only through explicit [`Reference`] resolution,
/// never by comparing raw ids from different peers.
pub type DefId = u64;

/// Kind of a remotely-accessible field.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FieldKind {
    /// Invokable method
    Method,
    /// Data field, optionally write-protected
    Data { readonly: bool },
}

/// Describes one entry of a context's public surface.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FieldDescriptor {
    #[serde(flatten)]
    pub kind: FieldKind,
    /// Declared value type, informational only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_type: Option<String>,
}

impl FieldDescriptor {
    pub fn method() -> Self {
        FieldDescriptor {
            kind: FieldKind::Method,
            value_type: None,
        }
    }

    pub fn data(readonly: bool) -> Self {
        FieldDescriptor {
            kind: FieldKind::Data { readonly },
            value_type: None,
        }
    }

    pub fn with_type(mut self, value_type: impl Into<String>) -> Self {
        self.value_type = Some(value_type.into());
        self
    }

    pub fn is_method(&self) -> bool {
        matches!(self.kind, FieldKind::Method)
    }

    /// True only for a write-protected data field; methods are never
    /// readonly in this sense.
    pub fn is_readonly(&self) -> bool {
        matches!(self.kind, FieldKind::Data { readonly: true })
    }
}

/// Serializable description of a remotely-exposed object.
///
/// Created when a context is attached (strong, named via `ctx_id`) or
/// returned as a call result (weak, anonymous); destroyed when the owning
/// side detaches the context or the peer disconnects.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Definition {
    pub id: DefId,
    /// Definition of the enclosing context, 0 for roots. Used to validate
    /// self-references during the remoting transform.
    #[serde(default)]
    pub parent_id: DefId,
    /// Context type name
    pub name: String,
    /// Logical name for strong (publicly attached) contexts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ctx_id: Option<String>,
    /// Field name to descriptor map
    pub fields: BTreeMap<String, FieldDescriptor>,
    /// Set when this definition has been adopted as a proxy for an object
    /// that lives on a third peer
    #[serde(default)]
    pub remote: bool,
    /// When `remote`, the definition of the local stub re-exposing the
    /// proxied object. Invariant: `proxy_def.id != id`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy_def: Option<Box<Definition>>,
}

impl Definition {
    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.get(name)
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    /// Id of the re-exposing stub, when this definition is a remote proxy.
    pub fn proxy_def_id(&self) -> Option<DefId> {
        self.proxy_def.as_ref().map(|def| def.id)
    }
}

/// Compact pointer meaning "the same object as definition `def_id`, already
/// known to the receiver" - preserves object identity across call boundaries
/// without re-sending the full [`Definition`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Reference {
    pub def_id: DefId,
}

impl Reference {
    pub fn new(def_id: DefId) -> Self {
        Reference { def_id }
    }
}
