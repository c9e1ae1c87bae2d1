use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use serde_json::{json, Value};
use tracing::warn;

use objrpc_common::protocol::{
    Action, DefId, Definition, ObjrpcError, Packet, PacketBody, Result, WireError, WireValue,
};

use crate::context::Context;
use crate::events::EventBus;
use crate::peer::RemotePeer;
use crate::stub::Stub;
use crate::tasks;

/// Identifier of a peer within its owning node.
pub type PeerId = u64;

/// Node configuration.
#[derive(Debug, Clone)]
pub struct NodeOptions {
    /// How long a request may wait for its response before the correlator
    /// fails it with a timeout.
    ///
    /// Default: 30000ms
    pub response_timeout_ms: u64,
    /// Whether this node is willing to host contexts proxified onto it by
    /// its peers. Advertised through the handshake `config` task.
    ///
    /// Default: false
    pub proxy_contexts: bool,
    /// Depth of the per-connection outbound write queue. Writers queue (and
    /// eventually block) rather than drop when the queue is full.
    ///
    /// Default: 64
    pub write_queue_depth: usize,
}

impl Default for NodeOptions {
    fn default() -> Self {
        Self {
            response_timeout_ms: 30_000,
            proxy_contexts: false,
            write_queue_depth: 64,
        }
    }
}

impl NodeOptions {
    pub fn with_response_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.response_timeout_ms = timeout_ms;
        self
    }

    pub fn with_proxy_contexts(mut self, enabled: bool) -> Self {
        self.proxy_contexts = enabled;
        self
    }

    pub fn with_write_queue_depth(mut self, depth: usize) -> Self {
        self.write_queue_depth = depth;
        self
    }
}

/// A node hosts contexts and talks to remote nodes through one
/// [`RemotePeer`] per connection.
///
/// The node exclusively owns its stub table and definition id allocator;
/// peers obtain definitions (copies) and references (indirections) but never
/// direct handles, which is what keeps cross-process aliasing impossible by
/// construction.
pub struct Node {
    self_ref: Weak<Node>,
    options: NodeOptions,
    def_ids: AtomicU64,
    peer_ids: AtomicU64,
    /// Every dispatchable object, strong and weak alike
    stubs: Mutex<HashMap<DefId, Stub>>,
    /// Strong context name to definition id
    contexts: Mutex<HashMap<String, DefId>>,
    peers: Mutex<HashMap<PeerId, Arc<RemotePeer>>>,
    events: EventBus,
}

impl Node {
    pub fn new(options: NodeOptions) -> Arc<Node> {
        Arc::new_cyclic(|self_ref| Node {
            self_ref: self_ref.clone(),
            options,
            def_ids: AtomicU64::new(0),
            peer_ids: AtomicU64::new(0),
            stubs: Mutex::new(HashMap::new()),
            contexts: Mutex::new(HashMap::new()),
            peers: Mutex::new(HashMap::new()),
            events: EventBus::new(),
        })
    }

    pub fn options(&self) -> &NodeOptions {
        &self.options
    }

    /// Local event bus; carries `context:attach` / `context:detach` and any
    /// events emitted via [`emit_event`](Self::emit_event).
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    fn handle(&self) -> Arc<Node> {
        self.self_ref.upgrade().expect("node dropped while in use")
    }

    // ------------------------------------------------------------------
    // Peers
    // ------------------------------------------------------------------

    /// Creates a new, disconnected peer owned by this node.
    ///
    /// Must be called within a tokio runtime: the peer's timeout sweep task
    /// is spawned immediately.
    pub fn create_peer(&self) -> Arc<RemotePeer> {
        let id = self.peer_ids.fetch_add(1, Ordering::SeqCst) + 1;
        let peer = RemotePeer::new(id, self.handle());
        self.peers
            .lock()
            .expect("peer table lock poisoned")
            .insert(id, peer.clone());
        peer
    }

    pub(crate) fn remove_peer(&self, id: PeerId) {
        self.peers
            .lock()
            .expect("peer table lock poisoned")
            .remove(&id);
    }

    pub fn peer_count(&self) -> usize {
        self.peers.lock().expect("peer table lock poisoned").len()
    }

    // ------------------------------------------------------------------
    // Context registry
    // ------------------------------------------------------------------

    /// Attaches a context under a public name (defaults to the context's
    /// type name), making it discoverable by every connected peer.
    pub fn attach_context(
        &self,
        instance: Arc<dyn Context>,
        ctx_id: Option<&str>,
    ) -> Result<Definition> {
        let type_name = instance.shape().name;
        let ctx_id = ctx_id.map(str::to_string).unwrap_or(type_name);
        let def_id = self.next_def_id();
        let stub = Stub::new(def_id, instance, Some(ctx_id.clone()));
        self.register_strong_stub(stub, ctx_id)
    }

    pub(crate) fn register_strong_stub(&self, stub: Stub, ctx_id: String) -> Result<Definition> {
        let def = stub.definition().clone();
        {
            let mut contexts = self.contexts.lock().expect("context table lock poisoned");
            if contexts.contains_key(&ctx_id) {
                return Err(ObjrpcError::Exists(format!(
                    "Context '{ctx_id}' already attached"
                )));
            }
            contexts.insert(ctx_id.clone(), def.id);
        }
        self.stubs
            .lock()
            .expect("stub table lock poisoned")
            .insert(def.id, stub);
        self.emit_event(
            "context:attach",
            json!({"id": ctx_id, "def": serde_json::to_value(&def)?}),
        );
        Ok(def)
    }

    /// Detaches a named context; every connected peer is told to purge its
    /// tables via the `context:detach` broadcast.
    pub fn detach_context(&self, ctx_id: &str) -> Result<DefId> {
        let def_id = {
            let mut contexts = self.contexts.lock().expect("context table lock poisoned");
            match contexts.remove(ctx_id) {
                Some(def_id) => def_id,
                None => {
                    return Err(ObjrpcError::NotFound(format!(
                        "Context '{ctx_id}' not exists"
                    )))
                }
            }
        };
        self.stubs
            .lock()
            .expect("stub table lock poisoned")
            .remove(&def_id);
        self.emit_event("context:detach", json!({"id": ctx_id, "def_id": def_id}));
        Ok(def_id)
    }

    pub fn has_context(&self, ctx_id: &str) -> bool {
        self.contexts
            .lock()
            .expect("context table lock poisoned")
            .contains_key(ctx_id)
    }

    pub fn context_names(&self) -> Vec<String> {
        self.contexts
            .lock()
            .expect("context table lock poisoned")
            .keys()
            .cloned()
            .collect()
    }

    /// Strong definitions keyed by context name, as disclosed to peers via
    /// the `contextDefs` task and attach broadcasts.
    pub fn strong_definitions(&self) -> BTreeMap<String, Definition> {
        let contexts = self
            .contexts
            .lock()
            .expect("context table lock poisoned")
            .clone();
        let stubs = self.stubs.lock().expect("stub table lock poisoned");
        contexts
            .into_iter()
            .filter_map(|(ctx_id, def_id)| {
                stubs.get(&def_id).map(|stub| {
                    let mut def = stub.definition().clone();
                    def.ctx_id = Some(ctx_id.clone());
                    (ctx_id, def)
                })
            })
            .collect()
    }

    pub(crate) fn next_def_id(&self) -> DefId {
        self.def_ids.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub(crate) fn register_stub(&self, stub: Stub) {
        self.stubs
            .lock()
            .expect("stub table lock poisoned")
            .insert(stub.definition().id, stub);
    }

    pub(crate) fn release_stub(&self, def_id: DefId) -> Option<Stub> {
        self.stubs
            .lock()
            .expect("stub table lock poisoned")
            .remove(&def_id)
    }

    pub(crate) fn stub(&self, def_id: DefId) -> Option<Stub> {
        self.stubs
            .lock()
            .expect("stub table lock poisoned")
            .get(&def_id)
            .cloned()
    }

    /// Weak stub for an instance returned by a call, reused by instance
    /// identity so the same object keeps the same definition id.
    pub(crate) fn ref_context(&self, instance: &Arc<dyn Context>, parent_id: DefId) -> Definition {
        {
            let stubs = self.stubs.lock().expect("stub table lock poisoned");
            for stub in stubs.values() {
                if Arc::ptr_eq(stub.instance(), instance) {
                    return stub.definition().clone();
                }
            }
        }
        let def_id = self.next_def_id();
        let mut stub = Stub::new(def_id, instance.clone(), None);
        stub.set_parent(parent_id);
        let def = stub.definition().clone();
        self.register_stub(stub);
        def
    }

    // ------------------------------------------------------------------
    // Events
    // ------------------------------------------------------------------

    /// Emits an event locally and forwards it to every peer whose remote
    /// side subscribed to it over the wire.
    ///
    /// Must be called within a tokio runtime when peers are connected (the
    /// wire fan-out is spawned).
    pub fn emit_event(&self, event: &str, payload: Value) {
        self.events.emit(event, &payload);
        let subscribed: Vec<Arc<RemotePeer>> = {
            let peers = self.peers.lock().expect("peer table lock poisoned");
            peers
                .values()
                .filter(|peer| peer.is_wire_subscribed(event))
                .cloned()
                .collect()
        };
        for peer in subscribed {
            let event = event.to_string();
            let payload = payload.clone();
            tokio::spawn(async move {
                let args = vec![
                    WireValue::raw(Value::String(event.clone())),
                    WireValue::raw(payload),
                ];
                if let Err(e) = peer.run_task("emitEvent", args).await {
                    warn!(peer = peer.id(), event = %event, error = %e, "event fan-out failed");
                }
            });
        }
    }

    // ------------------------------------------------------------------
    // Inbound dispatch
    // ------------------------------------------------------------------

    /// Serves one inbound request packet and writes the response.
    pub(crate) async fn handle_request(self: Arc<Self>, peer: Arc<RemotePeer>, packet: Packet) {
        let id = packet.id;
        let action = match packet.action() {
            Ok(action) => action,
            Err(e) => {
                // echo the unknown action bits back so the caller can still
                // correlate the failure
                let mut response = Packet {
                    flags: packet.flags,
                    id,
                    body: PacketBody::Error(WireError::from(&e)),
                };
                response.set_impulse(false);
                response.set_error(true);
                if let Err(send_err) = peer.write_packet(&response).await {
                    warn!(peer = peer.id(), id, error = %send_err, "failed to send response");
                }
                return;
            }
        };

        let result: Result<WireValue> = match (action, packet.body) {
            (Action::Get, PacketBody::Get { def_id, name, args }) => {
                self.dispatch_get(def_id, &name, args).await
            }
            (Action::Set, PacketBody::Set { def_id, name, value }) => self
                .dispatch_set(def_id, &name, value)
                .await
                .map(|_| WireValue::null()),
            (Action::Task, PacketBody::Task { task, args }) => {
                tasks::run(&self, &peer, &task, args)
            }
            (_, body) => Err(ObjrpcError::NotValid(format!(
                "'{}' body does not match the packet action",
                body.kind()
            ))),
        };

        let send_result = match result {
            Ok(value) => peer.send_response(id, action, PacketBody::Result(value)).await,
            Err(e) => {
                peer.send_error_response(id, action, WireError::from(&e))
                    .await
            }
        };
        if let Err(e) = send_result {
            warn!(peer = peer.id(), id, error = %e, "failed to send response");
        }
    }

    async fn dispatch_get(&self, def_id: DefId, name: &str, args: Vec<WireValue>) -> Result<WireValue> {
        let stub = self.stub(def_id).ok_or_else(|| {
            ObjrpcError::NotFound(format!("Context with definition id '{def_id}' not exists"))
        })?;
        stub.get(self, name, args).await
    }

    async fn dispatch_set(&self, def_id: DefId, name: &str, value: WireValue) -> Result<()> {
        let stub = self.stub(def_id).ok_or_else(|| {
            ObjrpcError::NotFound(format!("Context with definition id '{def_id}' not exists"))
        })?;
        stub.set(name, value).await
    }
}
