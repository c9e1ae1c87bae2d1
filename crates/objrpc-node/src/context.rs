use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use objrpc_common::protocol::{FieldDescriptor, ObjrpcError, Result, WireValue};

/// Declared public surface of a context: its type name plus one descriptor
/// per remotely-accessible field.
///
/// Built once per attachment and baked into the context's `Definition`;
/// fields not declared here are invisible to remote callers no matter what
/// the implementation would accept.
#[derive(Debug, Clone, Default)]
pub struct ContextShape {
    pub name: String,
    pub fields: BTreeMap<String, FieldDescriptor>,
}

impl ContextShape {
    pub fn new(name: impl Into<String>) -> Self {
        ContextShape {
            name: name.into(),
            fields: BTreeMap::new(),
        }
    }

    /// Declares an invokable method.
    pub fn method(mut self, name: impl Into<String>) -> Self {
        self.fields.insert(name.into(), FieldDescriptor::method());
        self
    }

    /// Declares a data field.
    pub fn property(mut self, name: impl Into<String>, readonly: bool) -> Self {
        self.fields
            .insert(name.into(), FieldDescriptor::data(readonly));
        self
    }

    /// Declares a field with a fully custom descriptor.
    pub fn field(mut self, name: impl Into<String>, descriptor: FieldDescriptor) -> Self {
        self.fields.insert(name.into(), descriptor);
        self
    }
}

/// Value produced by a context operation.
///
/// Returning `Context` (or `Contexts`) hands out nested remotable objects:
/// the owning node converts them into weak stubs with fresh definitions
/// before anything is serialized. `Wire` passes an already-formed wire value
/// through untouched and is used by relay stubs.
pub enum ContextValue {
    /// Plain JSON result
    Raw(Value),
    /// A nested object to expose remotely
    Context(Arc<dyn Context>),
    /// A collection of nested objects
    Contexts(Vec<Arc<dyn Context>>),
    /// A value already in wire form
    Wire(WireValue),
}

impl ContextValue {
    pub fn null() -> Self {
        ContextValue::Raw(Value::Null)
    }
}

impl From<Value> for ContextValue {
    fn from(value: Value) -> Self {
        ContextValue::Raw(value)
    }
}

impl fmt::Debug for ContextValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContextValue::Raw(value) => f.debug_tuple("Raw").field(value).finish(),
            ContextValue::Context(_) => f.write_str("Context(..)"),
            ContextValue::Contexts(list) => write!(f, "Contexts(len={})", list.len()),
            ContextValue::Wire(value) => f.debug_tuple("Wire").field(value).finish(),
        }
    }
}

/// An object instance made remotely invokable.
///
/// Implementations declare their surface via [`shape`](Context::shape) and
/// handle dispatch for the declared fields. Methods may await other peers -
/// relayed calls do exactly that - so all dispatch entry points are async.
#[async_trait]
pub trait Context: Send + Sync + 'static {
    /// Public surface of this context; drives definition building.
    fn shape(&self) -> ContextShape;

    /// Invokes a declared method.
    async fn call(&self, method: &str, args: Vec<WireValue>) -> Result<ContextValue>;

    /// Reads a declared data field.
    async fn get(&self, prop: &str) -> Result<ContextValue> {
        Err(ObjrpcError::NotFound(format!("'{prop}' not exists")))
    }

    /// Writes a declared data field. Readonly enforcement happens in the
    /// stub before this is reached.
    async fn set(&self, prop: &str, _value: WireValue) -> Result<()> {
        Err(ObjrpcError::NotFound(format!("'{prop}' not exists")))
    }
}
