use std::sync::Arc;

use async_trait::async_trait;

use objrpc_common::protocol::{DefId, Definition, ObjrpcError, Result, WireValue};

use crate::context::{Context, ContextShape, ContextValue};
use crate::interface::Interface;
use crate::node::Node;

/// Binds a context instance to its definition and dispatches validated
/// field access by definition id.
///
/// A stub is the only thing other peers can address; they never obtain the
/// instance itself, only its [`Definition`] (a copy) or a `Reference` (an
/// indirection).
#[derive(Clone)]
pub struct Stub {
    instance: Arc<dyn Context>,
    def: Definition,
}

impl Stub {
    pub(crate) fn new(def_id: DefId, instance: Arc<dyn Context>, ctx_id: Option<String>) -> Stub {
        let shape = instance.shape();
        let def = Definition {
            id: def_id,
            parent_id: 0,
            name: shape.name,
            ctx_id,
            fields: shape.fields,
            remote: false,
            proxy_def: None,
        };
        Stub { instance, def }
    }

    pub fn definition(&self) -> &Definition {
        &self.def
    }

    pub(crate) fn instance(&self) -> &Arc<dyn Context> {
        &self.instance
    }

    pub(crate) fn set_parent(&mut self, parent_id: DefId) {
        self.def.parent_id = parent_id;
    }

    /// GET dispatch: invokes a method or reads a data field.
    pub(crate) async fn get(
        &self,
        node: &Node,
        name: &str,
        args: Vec<WireValue>,
    ) -> Result<WireValue> {
        let field = self
            .def
            .field(name)
            .ok_or_else(|| ObjrpcError::NotFound(format!("'{name}' not exists")))?;
        let value = if field.is_method() {
            self.instance.call(name, args).await?
        } else {
            self.instance.get(name).await?
        };
        self.materialize(node, value)
    }

    /// SET dispatch: writes a data field, or invokes a method with the value
    /// as its single argument.
    pub(crate) async fn set(&self, name: &str, value: WireValue) -> Result<()> {
        let field = self
            .def
            .field(name)
            .ok_or_else(|| ObjrpcError::NotFound(format!("'{name}' not exists")))?;
        if field.is_method() {
            self.instance.call(name, vec![value]).await.map(|_| ())
        } else if field.is_readonly() {
            Err(ObjrpcError::InvalidAccess(format!("'{name}' is not writable")))
        } else {
            self.instance.set(name, value).await
        }
    }

    /// Converts returned sub-contexts into weak definitions parented to this
    /// stub; everything else passes through.
    fn materialize(&self, node: &Node, value: ContextValue) -> Result<WireValue> {
        match value {
            ContextValue::Raw(value) => Ok(WireValue::Raw(value)),
            ContextValue::Context(instance) => Ok(WireValue::Definition(
                node.ref_context(&instance, self.def.id),
            )),
            ContextValue::Contexts(list) => Ok(WireValue::Definitions(
                list.iter()
                    .map(|instance| node.ref_context(instance, self.def.id))
                    .collect(),
            )),
            ContextValue::Wire(value) => Ok(value),
        }
    }
}

/// Context backed by an [`Interface`] to another peer.
///
/// This is the relay stub of the double-hop case: it re-exposes an object
/// that physically lives on a third peer, forwarding every dispatch through
/// the interface. Results come back already in wire form - the peer layer
/// has applied the remoting transform - so they pass through untouched.
pub(crate) struct RemoteContext {
    iface: Interface,
    origin: Definition,
}

impl RemoteContext {
    pub(crate) fn new(iface: Interface, origin: Definition) -> Self {
        RemoteContext { iface, origin }
    }
}

#[async_trait]
impl Context for RemoteContext {
    fn shape(&self) -> ContextShape {
        ContextShape {
            name: self.origin.name.clone(),
            fields: self.origin.fields.clone(),
        }
    }

    async fn call(&self, method: &str, args: Vec<WireValue>) -> Result<ContextValue> {
        Ok(ContextValue::Wire(self.iface.call_wire(method, args).await?))
    }

    async fn get(&self, prop: &str) -> Result<ContextValue> {
        Ok(ContextValue::Wire(self.iface.get_wire(prop).await?))
    }

    async fn set(&self, prop: &str, value: WireValue) -> Result<()> {
        self.iface.set_wire(prop, value).await
    }
}
