use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use objrpc_common::protocol::{
    Action, DefId, Definition, ObjrpcError, Packet, PacketBody, Reference, Result, WireError,
    WireValue,
};
use objrpc_common::transport::{encode_frame, Codec, FrameReassembler};

use crate::context::Context;
use crate::events::{EventCallback, SubscriptionId};
use crate::interface::{Interface, RemoteValue};
use crate::node::{Node, PeerId};
use crate::stub::{RemoteContext, Stub};

/// Remote node capabilities, cached from the handshake `config` task.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PeerConfig {
    /// Whether the remote node hosts proxified contexts
    #[serde(default)]
    pub proxy_contexts: bool,
    /// Remote protocol version
    #[serde(default)]
    pub protocol: String,
}

#[derive(Deserialize)]
struct AttachBroadcast {
    id: String,
    def: Definition,
}

#[derive(Deserialize)]
struct DetachBroadcast {
    id: String,
    def_id: DefId,
}

/// One connected remote endpoint.
///
/// A peer starts disconnected; [`connect`](Self::connect) attaches a duplex
/// stream and spawns a reader task (frame reassembly and dispatch) plus a
/// writer task fed by a bounded queue. When the stream closes - remotely or
/// via [`disconnect`](Self::disconnect) - every outstanding request fails
/// with Connection-Closed and the write queue is torn down; nothing is left
/// to time out on its own.
///
/// The definition tables are owned exclusively by this peer. Other peers
/// only ever see copies (definitions) or indirections (references), never
/// live handles.
pub struct RemotePeer {
    id: PeerId,
    self_ref: Weak<RemotePeer>,
    node: Arc<Node>,
    codec: Codec,
    correlator: crate::correlator::ResponseCorrelator,
    packet_ids: AtomicU64,
    subscription_ids: AtomicU64,

    /// Everything the remote side has disclosed, keyed by its def id
    defs: Mutex<HashMap<DefId, Definition>>,
    /// The strongly/publicly named subset
    ctxid_defs: Mutex<HashMap<String, Definition>>,
    /// Contexts we asked the remote side to host on our behalf
    proxified_contexts: Mutex<HashMap<String, DefId>>,
    /// Contexts we host on the remote side's behalf, by public name
    hosted_contexts: Mutex<HashSet<String>>,
    /// Weak relay stubs created while forwarding results through this peer
    relay_stubs: Mutex<Vec<DefId>>,
    /// Local handlers subscribed to the remote side's events
    remote_events: Mutex<HashMap<String, Vec<(SubscriptionId, EventCallback)>>>,
    /// Events the remote side subscribed to on us
    wire_subscriptions: Mutex<HashSet<String>>,
    remote_config: Mutex<Option<PeerConfig>>,

    writer: Mutex<Option<mpsc::Sender<Vec<u8>>>>,
    io_tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl RemotePeer {
    pub(crate) fn new(id: PeerId, node: Arc<Node>) -> Arc<RemotePeer> {
        let timeout = Duration::from_millis(node.options().response_timeout_ms);
        Arc::new_cyclic(|self_ref| RemotePeer {
            id,
            self_ref: self_ref.clone(),
            node,
            codec: Codec::new(),
            correlator: crate::correlator::ResponseCorrelator::new(timeout),
            packet_ids: AtomicU64::new(0),
            subscription_ids: AtomicU64::new(0),
            defs: Mutex::new(HashMap::new()),
            ctxid_defs: Mutex::new(HashMap::new()),
            proxified_contexts: Mutex::new(HashMap::new()),
            hosted_contexts: Mutex::new(HashSet::new()),
            relay_stubs: Mutex::new(Vec::new()),
            remote_events: Mutex::new(HashMap::new()),
            wire_subscriptions: Mutex::new(HashSet::new()),
            remote_config: Mutex::new(None),
            writer: Mutex::new(None),
            io_tasks: Mutex::new(Vec::new()),
        })
    }

    pub fn id(&self) -> PeerId {
        self.id
    }

    pub fn is_connected(&self) -> bool {
        self.writer.lock().expect("writer lock poisoned").is_some()
    }

    /// Number of requests currently awaiting a response.
    pub fn active_requests(&self) -> usize {
        self.correlator.len()
    }

    fn handle(&self) -> Arc<RemotePeer> {
        self.self_ref.upgrade().expect("peer dropped while in use")
    }

    // ------------------------------------------------------------------
    // Connection lifecycle
    // ------------------------------------------------------------------

    /// Attaches a duplex stream and spawns the reader/writer tasks.
    ///
    /// Wiring only: run [`handshake`](Self::handshake) afterwards to
    /// exchange capabilities and strong definitions.
    pub async fn connect<S>(&self, stream: S) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (tx, mut rx) = mpsc::channel::<Vec<u8>>(self.node.options().write_queue_depth);
        {
            let mut writer = self.writer.lock().expect("writer lock poisoned");
            if writer.is_some() {
                return Err(ObjrpcError::IllegalState(
                    "peer is already connected".to_string(),
                ));
            }
            *writer = Some(tx);
        }

        let (mut read_half, mut write_half) = tokio::io::split(stream);

        let peer_id = self.id;
        let writer_task = tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                if let Err(e) = write_half.write_all(&frame).await {
                    warn!(peer = peer_id, error = %e, "write failed");
                    break;
                }
                if let Err(e) = write_half.flush().await {
                    warn!(peer = peer_id, error = %e, "flush failed");
                    break;
                }
            }
            let _ = write_half.shutdown().await;
        });

        let peer = self.handle();
        let reader_task = tokio::spawn(async move {
            let mut reassembler = FrameReassembler::new(Codec::new());
            let mut chunk = vec![0u8; 8192];
            loop {
                match read_half.read(&mut chunk).await {
                    Ok(0) => break,
                    Ok(n) => match reassembler.feed(&chunk[..n]) {
                        Ok(packets) => {
                            for packet in packets {
                                peer.dispatch(packet);
                            }
                        }
                        // unrecoverable buffer state was dropped; the
                        // connection itself stays up
                        Err(e) => warn!(peer = peer.id, error = %e, "corrupt frame buffer discarded"),
                    },
                    Err(e) => {
                        warn!(peer = peer.id, error = %e, "read failed");
                        break;
                    }
                }
            }
            peer.teardown();
            peer.node.remove_peer(peer.id);
            peer.release_relayed();
            info!(peer = peer.id, "peer stream closed");
        });

        self.io_tasks
            .lock()
            .expect("io task lock poisoned")
            .extend([writer_task, reader_task]);
        info!(peer = self.id, "peer connected");
        Ok(())
    }

    /// Exchanges capabilities and strong definitions with the remote side
    /// and subscribes to its context attach/detach broadcasts.
    pub async fn handshake(&self) -> Result<()> {
        let config = self.run_task("config", Vec::new()).await?;
        let config: PeerConfig = serde_json::from_value(Value::Object(config))?;
        *self
            .remote_config
            .lock()
            .expect("remote config lock poisoned") = Some(config);

        let mut result = self.run_task("contextDefs", Vec::new()).await?;
        if let Some(defs) = result.remove("defs") {
            let defs: BTreeMap<String, Definition> = serde_json::from_value(defs)?;
            for (ctx_id, def) in defs {
                self.update_strong_definition(ctx_id, def);
            }
        }

        self.subscribe_on_contexts().await
    }

    /// Proactively tears the connection down, failing every outstanding
    /// request with Connection-Closed.
    pub fn disconnect(&self) {
        let tasks: Vec<JoinHandle<()>> = self
            .io_tasks
            .lock()
            .expect("io task lock poisoned")
            .drain(..)
            .collect();
        for task in &tasks {
            task.abort();
        }
        self.teardown();
        self.node.remove_peer(self.id);
        self.release_relayed();
        info!(peer = self.id, "peer disconnected");
    }

    fn teardown(&self) {
        *self.writer.lock().expect("writer lock poisoned") = None;
        self.correlator.fail_all(|| ObjrpcError::ConnectionClosed);
    }

    /// Withdraws everything relayed through this connection once it is gone:
    /// contexts hosted on the remote side's behalf (detached, so the
    /// `context:detach` broadcast reaches the surviving peers), weak relay
    /// stubs, and the local stubs backing our own proxifications.
    fn release_relayed(&self) {
        let hosted: Vec<String> = {
            let mut hosted = self
                .hosted_contexts
                .lock()
                .expect("hosted context lock poisoned");
            hosted.drain().collect()
        };
        for ctx_id in hosted {
            if let Err(e) = self.node.detach_context(&ctx_id) {
                debug!(peer = self.id, ctx_id = %ctx_id, error = %e, "hosted context already gone");
            }
        }

        let relays: Vec<DefId> = {
            let mut relays = self.relay_stubs.lock().expect("relay stub lock poisoned");
            relays.drain(..).collect()
        };
        for def_id in relays {
            self.node.release_stub(def_id);
        }

        let proxified: Vec<DefId> = {
            let mut proxified = self
                .proxified_contexts
                .lock()
                .expect("proxified context lock poisoned");
            proxified.drain().map(|(_, def_id)| def_id).collect()
        };
        for def_id in proxified {
            self.node.release_stub(def_id);
        }
    }

    pub(crate) fn track_hosted_context(&self, ctx_id: &str) {
        self.hosted_contexts
            .lock()
            .expect("hosted context lock poisoned")
            .insert(ctx_id.to_string());
    }

    pub(crate) fn untrack_hosted_context(&self, ctx_id: &str) {
        self.hosted_contexts
            .lock()
            .expect("hosted context lock poisoned")
            .remove(ctx_id);
    }

    // ------------------------------------------------------------------
    // Packet plumbing
    // ------------------------------------------------------------------

    fn dispatch(&self, packet: Packet) {
        if packet.impulse() {
            // requests run on their own task: a relayed call may await a
            // third peer and must not stall this connection's reader
            let node = self.node.clone();
            let peer = self.handle();
            tokio::spawn(async move {
                node.handle_request(peer, packet).await;
            });
        } else {
            self.handle_response(packet);
        }
    }

    fn handle_response(&self, packet: Packet) {
        let result = if packet.is_error() {
            match packet.body {
                PacketBody::Error(err) => Err(err.into_error()),
                other => Err(ObjrpcError::NotValid(format!(
                    "error response with '{}' body",
                    other.kind()
                ))),
            }
        } else {
            match packet.body {
                PacketBody::Result(value) => Ok(value),
                other => Err(ObjrpcError::NotValid(format!(
                    "response with '{}' body",
                    other.kind()
                ))),
            }
        };
        if !self.correlator.resolve(packet.id, result) {
            debug!(peer = self.id, id = packet.id, "response for unknown or expired request");
        }
    }

    async fn send_frame(&self, frame: Vec<u8>) -> Result<()> {
        let sender = self.writer.lock().expect("writer lock poisoned").clone();
        match sender {
            Some(tx) => tx
                .send(frame)
                .await
                .map_err(|_| ObjrpcError::ConnectionClosed),
            None => Err(ObjrpcError::IllegalState(
                "no active connection for the objrpc protocol".to_string(),
            )),
        }
    }

    pub(crate) async fn write_packet(&self, packet: &Packet) -> Result<()> {
        let frame = encode_frame(&self.codec, packet)?;
        self.send_frame(frame).await
    }

    async fn request(&self, action: Action, body: PacketBody) -> Result<WireValue> {
        if !self.is_connected() {
            return Err(ObjrpcError::IllegalState(
                "no active connection for the objrpc protocol".to_string(),
            ));
        }
        let id = self.packet_ids.fetch_add(1, Ordering::SeqCst) + 1;
        let rx = self.correlator.register(id);
        let packet = Packet::request(id, action, body);
        if let Err(e) = self.write_packet(&packet).await {
            self.correlator.forget(id);
            return Err(e);
        }
        match rx.await {
            Ok(result) => result,
            Err(_) => Err(ObjrpcError::ConnectionClosed),
        }
    }

    pub(crate) async fn send_response(
        &self,
        id: u64,
        action: Action,
        body: PacketBody,
    ) -> Result<()> {
        self.write_packet(&Packet::response(id, action, body)).await
    }

    pub(crate) async fn send_error_response(
        &self,
        id: u64,
        action: Action,
        error: WireError,
    ) -> Result<()> {
        self.write_packet(&Packet::error_response(id, action, error))
            .await
    }

    // ------------------------------------------------------------------
    // Definition tables
    // ------------------------------------------------------------------

    /// Definition for `def_id` as disclosed by the remote side.
    pub fn definition(&self, def_id: DefId) -> Result<Definition> {
        self.defs
            .lock()
            .expect("definition table lock poisoned")
            .get(&def_id)
            .cloned()
            .ok_or_else(|| {
                ObjrpcError::NotFound(format!(
                    "Context with definition id '{def_id}' not exists"
                ))
            })
    }

    pub(crate) fn update_definition(&self, def: Definition) {
        self.defs
            .lock()
            .expect("definition table lock poisoned")
            .insert(def.id, def);
    }

    pub(crate) fn update_strong_definition(&self, ctx_id: String, mut def: Definition) {
        def.ctx_id = Some(ctx_id.clone());
        self.defs
            .lock()
            .expect("definition table lock poisoned")
            .insert(def.id, def.clone());
        self.ctxid_defs
            .lock()
            .expect("context definition lock poisoned")
            .insert(ctx_id, def);
    }

    pub(crate) fn purge_strong_definition(&self, ctx_id: &str, def_id: DefId) {
        self.ctxid_defs
            .lock()
            .expect("context definition lock poisoned")
            .remove(ctx_id);
        self.defs
            .lock()
            .expect("definition table lock poisoned")
            .remove(&def_id);
    }

    /// Marks the definition as adopted for relaying and records the stub
    /// re-exposing it. Enforces the cycle-prevention invariant.
    pub(crate) fn mark_definition_remote(&self, def_id: DefId, proxy_def: Definition) -> Result<()> {
        if proxy_def.id == def_id {
            return Err(ObjrpcError::NotValid(format!(
                "proxy definition id '{def_id}' equals the id it proxies"
            )));
        }
        let mut defs = self.defs.lock().expect("definition table lock poisoned");
        match defs.get_mut(&def_id) {
            Some(def) => {
                def.remote = true;
                def.proxy_def = Some(Box::new(proxy_def));
                Ok(())
            }
            None => Err(ObjrpcError::NotFound(format!(
                "Context with definition id '{def_id}' not exists"
            ))),
        }
    }

    pub fn has_contexts(&self) -> bool {
        !self
            .ctxid_defs
            .lock()
            .expect("context definition lock poisoned")
            .is_empty()
    }

    pub fn has_context(&self, ctx_id: &str) -> bool {
        self.ctxid_defs
            .lock()
            .expect("context definition lock poisoned")
            .contains_key(ctx_id)
    }

    pub fn context_names(&self) -> Vec<String> {
        self.ctxid_defs
            .lock()
            .expect("context definition lock poisoned")
            .keys()
            .cloned()
            .collect()
    }

    /// Interface for a strongly named remote context.
    pub fn query_interface(&self, ctx_id: &str) -> Result<Interface> {
        let def = self
            .ctxid_defs
            .lock()
            .expect("context definition lock poisoned")
            .get(ctx_id)
            .cloned()
            .ok_or_else(|| ObjrpcError::NotFound(format!("Context '{ctx_id}' not exists")))?;
        Ok(Interface::new(self.handle(), def.id))
    }

    /// Interface for any disclosed definition, weak ones included.
    pub fn interface_by_def(&self, def_id: DefId) -> Result<Interface> {
        self.definition(def_id)?;
        Ok(Interface::new(self.handle(), def_id))
    }

    // ------------------------------------------------------------------
    // Remote operations
    // ------------------------------------------------------------------

    /// Reads a property or invokes a method of a remote definition.
    pub async fn get(
        &self,
        def_id: DefId,
        name: &str,
        args: Vec<WireValue>,
    ) -> Result<RemoteValue> {
        let value = self.get_wire(def_id, name, args).await?;
        Ok(self.to_remote_value(value))
    }

    pub(crate) async fn get_wire(
        &self,
        def_id: DefId,
        name: &str,
        args: Vec<WireValue>,
    ) -> Result<WireValue> {
        let ctx_def = self.definition(def_id)?;
        if !ctx_def.has_field(name) {
            return Err(ObjrpcError::NotFound(format!("'{name}' not exists")));
        }
        let args = self.process_args(&ctx_def, args)?;
        let result = self
            .request(
                Action::Get,
                PacketBody::Get {
                    def_id,
                    name: name.to_string(),
                    args,
                },
            )
            .await?;
        self.process_result(&ctx_def, result)
    }

    /// Writes a property of a remote definition. Readonly violations fail
    /// locally; no packet is sent.
    pub async fn set(&self, def_id: DefId, name: &str, value: WireValue) -> Result<()> {
        let ctx_def = self.definition(def_id)?;
        let field = ctx_def
            .field(name)
            .ok_or_else(|| ObjrpcError::NotFound(format!("'{name}' not exists")))?;
        if !field.is_method() && field.is_readonly() {
            return Err(ObjrpcError::InvalidAccess(format!(
                "'{name}' is not writable"
            )));
        }
        let value = if ctx_def.remote {
            self.process_object_remote(&ctx_def, value)?
        } else {
            value
        };
        self.request(
            Action::Set,
            PacketBody::Set {
                def_id,
                name: name.to_string(),
                value,
            },
        )
        .await?;
        Ok(())
    }

    /// Runs a named task on the remote node. The result must be a plain
    /// keyed record; anything else is Not-Valid.
    pub async fn run_task(&self, task: &str, args: Vec<WireValue>) -> Result<Map<String, Value>> {
        let result = self
            .request(
                Action::Task,
                PacketBody::Task {
                    task: task.to_string(),
                    args,
                },
            )
            .await?;
        match result {
            WireValue::Raw(Value::Object(map)) => Ok(map),
            other => Err(ObjrpcError::NotValid(format!(
                "Not valid task result: {}",
                other.kind()
            ))),
        }
    }

    // ------------------------------------------------------------------
    // Remote events
    // ------------------------------------------------------------------

    /// Subscribes a local handler to the remote side's event `event`.
    ///
    /// Wire traffic is reference-counted: only the first local handler for a
    /// name triggers a wire-level `subscribe` task, later ones are purely
    /// local.
    pub async fn subscribe<F>(&self, event: &str, handler: F) -> Result<SubscriptionId>
    where
        F: Fn(&str, &Value) + Send + Sync + 'static,
    {
        let id = self.subscription_ids.fetch_add(1, Ordering::SeqCst) + 1;
        let first = {
            let mut events = self.remote_events.lock().expect("remote event lock poisoned");
            let list = events.entry(event.to_string()).or_default();
            list.push((id, Arc::new(handler)));
            list.len() == 1
        };
        if first {
            let result = self
                .run_task("subscribe", vec![WireValue::raw(Value::String(event.to_string()))])
                .await;
            if let Err(e) = result {
                let mut events = self.remote_events.lock().expect("remote event lock poisoned");
                if let Some(list) = events.get_mut(event) {
                    list.retain(|(handler_id, _)| *handler_id != id);
                    if list.is_empty() {
                        events.remove(event);
                    }
                }
                return Err(e);
            }
        }
        Ok(id)
    }

    /// Removes a local handler; the wire-level `unsubscribe` task fires only
    /// when the last one goes away. Returns false for an unknown id.
    pub async fn unsubscribe(&self, event: &str, id: SubscriptionId) -> Result<bool> {
        let removed_last = {
            let mut events = self.remote_events.lock().expect("remote event lock poisoned");
            let list = match events.get_mut(event) {
                Some(list) => list,
                None => return Ok(false),
            };
            let before = list.len();
            list.retain(|(handler_id, _)| *handler_id != id);
            if list.len() == before {
                return Ok(false);
            }
            let empty = list.is_empty();
            if empty {
                events.remove(event);
            }
            empty
        };
        if removed_last {
            self.run_task(
                "unsubscribe",
                vec![WireValue::raw(Value::String(event.to_string()))],
            )
            .await?;
        }
        Ok(true)
    }

    /// Invokes the local handlers for an event delivered by the remote side.
    pub(crate) fn deliver_remote_event(&self, event: &str, payload: &Value) {
        let handlers: Vec<EventCallback> = {
            let events = self.remote_events.lock().expect("remote event lock poisoned");
            events
                .get(event)
                .map(|list| list.iter().map(|(_, handler)| handler.clone()).collect())
                .unwrap_or_default()
        };
        for handler in handlers {
            handler(event, payload);
        }
    }

    pub(crate) fn add_wire_subscription(&self, event: &str) {
        self.wire_subscriptions
            .lock()
            .expect("wire subscription lock poisoned")
            .insert(event.to_string());
    }

    pub(crate) fn remove_wire_subscription(&self, event: &str) -> bool {
        self.wire_subscriptions
            .lock()
            .expect("wire subscription lock poisoned")
            .remove(event)
    }

    pub(crate) fn is_wire_subscribed(&self, event: &str) -> bool {
        self.wire_subscriptions
            .lock()
            .expect("wire subscription lock poisoned")
            .contains(event)
    }

    /// Events the remote side currently subscribes to on us.
    pub fn remote_subscriptions(&self) -> Vec<String> {
        self.wire_subscriptions
            .lock()
            .expect("wire subscription lock poisoned")
            .iter()
            .cloned()
            .collect()
    }

    async fn subscribe_on_contexts(&self) -> Result<()> {
        let weak = self.self_ref.clone();
        self.subscribe("context:attach", move |_, payload| {
            if let Some(peer) = weak.upgrade() {
                match serde_json::from_value::<AttachBroadcast>(payload.clone()) {
                    Ok(entry) => peer.update_strong_definition(entry.id, entry.def),
                    Err(e) => warn!(error = %e, "malformed context:attach payload"),
                }
            }
        })
        .await?;

        let weak = self.self_ref.clone();
        self.subscribe("context:detach", move |_, payload| {
            if let Some(peer) = weak.upgrade() {
                match serde_json::from_value::<DetachBroadcast>(payload.clone()) {
                    Ok(entry) => peer.purge_strong_definition(&entry.id, entry.def_id),
                    Err(e) => warn!(error = %e, "malformed context:detach payload"),
                }
            }
        })
        .await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Context proxification
    // ------------------------------------------------------------------

    /// Asks the remote node to host `instance` on our behalf, under
    /// `ctx_id` (defaults to the context's type name).
    ///
    /// Gated on the `proxy_contexts` capability learned in the handshake.
    pub async fn attach_context(
        &self,
        instance: Arc<dyn Context>,
        ctx_id: Option<&str>,
    ) -> Result<DefId> {
        self.require_proxy_capability()?;

        let type_name = instance.shape().name;
        let ctx_id = ctx_id.map(str::to_string).unwrap_or(type_name);
        let def_id = self.node.next_def_id();
        let stub = Stub::new(def_id, instance, None);
        let def = stub.definition().clone();
        {
            let mut proxified = self
                .proxified_contexts
                .lock()
                .expect("proxified context lock poisoned");
            if proxified.contains_key(&ctx_id) {
                return Err(ObjrpcError::Exists(format!(
                    "Context '{ctx_id}' already proxified on the peer '{}' side",
                    self.id
                )));
            }
            proxified.insert(ctx_id.clone(), def_id);
        }
        self.node.register_stub(stub);

        let result = self
            .run_task(
                "proxifyContext",
                vec![
                    WireValue::raw(Value::String(ctx_id.clone())),
                    WireValue::Definition(def),
                ],
            )
            .await;
        match result {
            Ok(_) => Ok(def_id),
            Err(e) => {
                self.proxified_contexts
                    .lock()
                    .expect("proxified context lock poisoned")
                    .remove(&ctx_id);
                self.node.release_stub(def_id);
                Err(e)
            }
        }
    }

    /// Withdraws a context previously proxified onto the remote node.
    pub async fn detach_context(&self, ctx_id: &str) -> Result<()> {
        self.require_proxy_capability()?;
        let def_id = {
            let mut proxified = self
                .proxified_contexts
                .lock()
                .expect("proxified context lock poisoned");
            match proxified.remove(ctx_id) {
                Some(def_id) => def_id,
                None => {
                    return Err(ObjrpcError::NotFound(format!(
                        "Context '{ctx_id}' not proxified on the peer '{}' side",
                        self.id
                    )))
                }
            }
        };
        self.node.release_stub(def_id);
        self.run_task(
            "deproxifyContext",
            vec![WireValue::raw(Value::String(ctx_id.to_string()))],
        )
        .await?;
        Ok(())
    }

    fn require_proxy_capability(&self) -> Result<()> {
        let config = self
            .remote_config
            .lock()
            .expect("remote config lock poisoned")
            .clone();
        match config {
            Some(config) if config.proxy_contexts => Ok(()),
            _ => Err(ObjrpcError::NotSupported(format!(
                "Context proxification is not enabled on the remote node (peer id: '{}')",
                self.id
            ))),
        }
    }

    // ------------------------------------------------------------------
    // Object-remoting transform
    // ------------------------------------------------------------------

    fn process_args(&self, ctx_def: &Definition, args: Vec<WireValue>) -> Result<Vec<WireValue>> {
        if !ctx_def.remote {
            return Ok(args);
        }
        let mut out = Vec::with_capacity(args.len());
        for arg in args {
            out.push(self.process_object_remote(ctx_def, arg)?);
        }
        Ok(out)
    }

    /// Rewrites a value that is about to cross the wire on behalf of a
    /// relayed context, preserving object identity end to end.
    pub(crate) fn process_object_remote(
        &self,
        ctx_def: &Definition,
        obj: WireValue,
    ) -> Result<WireValue> {
        match obj {
            WireValue::Definition(def) => {
                Ok(WireValue::Definition(self.proxify_definition(def, 0)?))
            }
            WireValue::Definitions(defs) => {
                let mut out = Vec::with_capacity(defs.len());
                for def in defs {
                    out.push(self.proxify_definition(def, 0)?);
                }
                Ok(WireValue::Definitions(out))
            }
            WireValue::Reference(reference) => self.resolve_reference(ctx_def, reference),
            raw => Ok(raw),
        }
    }

    /// Rewrites a result arriving from the remote side. Weak definitions are
    /// recorded; when the owning context is itself a relay, the result is
    /// re-exposed through a fresh local stub instead of leaking the third
    /// party's identifiers.
    pub(crate) fn process_result(
        &self,
        ctx_def: &Definition,
        result: WireValue,
    ) -> Result<WireValue> {
        match result {
            WireValue::Definition(def) => {
                self.update_definition(def.clone());
                if ctx_def.remote {
                    let parent_id = ctx_def.proxy_def_id().unwrap_or(0);
                    Ok(WireValue::Definition(
                        self.proxify_definition(def, parent_id)?,
                    ))
                } else {
                    Ok(WireValue::Definition(def))
                }
            }
            WireValue::Definitions(defs) => {
                let mut out = Vec::with_capacity(defs.len());
                if ctx_def.remote {
                    let parent_id = ctx_def.proxy_def_id().unwrap_or(0);
                    for def in defs {
                        self.update_definition(def.clone());
                        out.push(self.proxify_definition(def, parent_id)?);
                    }
                } else {
                    for def in defs {
                        self.update_definition(def.clone());
                        out.push(def);
                    }
                }
                Ok(WireValue::Definitions(out))
            }
            other => Ok(other),
        }
    }

    /// Creates a fresh local stub relaying `def` through this peer, marks
    /// the origin definition as remote and returns the stub's definition.
    fn proxify_definition(&self, def: Definition, parent_id: DefId) -> Result<Definition> {
        self.update_definition(def.clone());
        let iface = Interface::new(self.handle(), def.id);
        let instance: Arc<dyn Context> = Arc::new(RemoteContext::new(iface, def.clone()));

        // def ids from different allocators may collide numerically; the
        // proxy id must never equal the id it proxies
        let mut proxy_id = self.node.next_def_id();
        while proxy_id == def.id {
            proxy_id = self.node.next_def_id();
        }
        let mut stub = Stub::new(proxy_id, instance, None);
        stub.set_parent(parent_id);
        let proxy_def = stub.definition().clone();
        self.node.register_stub(stub);
        self.relay_stubs
            .lock()
            .expect("relay stub lock poisoned")
            .push(proxy_id);
        self.mark_definition_remote(def.id, proxy_def.clone())?;
        Ok(proxy_def)
    }

    /// Resolves a reference flowing through a relayed context.
    ///
    /// A reference to the relay stub itself short-circuits back to the
    /// origin context id; a reference to a child of the origin stays a short
    /// reference; anything else is expanded to the full definition, bounding
    /// how much identity information leaves the owning subtree. An unknown
    /// target is a protocol violation and fails the whole call.
    pub(crate) fn resolve_reference(
        &self,
        ctx_def: &Definition,
        reference: Reference,
    ) -> Result<WireValue> {
        if ctx_def.proxy_def_id() == Some(reference.def_id) {
            return Ok(WireValue::reference(ctx_def.id));
        }
        let stub = self.node.stub(reference.def_id).ok_or_else(|| {
            ObjrpcError::NotFound(format!("Unknown definition '{}'", reference.def_id))
        })?;
        let def = stub.definition().clone();
        if def.parent_id == ctx_def.id {
            Ok(WireValue::reference(def.id))
        } else {
            Ok(WireValue::Definition(def))
        }
    }

    fn to_remote_value(&self, value: WireValue) -> RemoteValue {
        match value {
            WireValue::Raw(value) => RemoteValue::Raw(value),
            WireValue::Definition(def) => {
                RemoteValue::Object(Interface::new(self.handle(), def.id))
            }
            WireValue::Definitions(defs) => RemoteValue::Objects(
                defs.into_iter()
                    .map(|def| Interface::new(self.handle(), def.id))
                    .collect(),
            ),
            WireValue::Reference(reference) => {
                RemoteValue::Object(Interface::new(self.handle(), reference.def_id))
            }
        }
    }
}
