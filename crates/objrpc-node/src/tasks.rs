//! Builtin peer-to-peer tasks.
//!
//! Everything that is not plain field access rides on the `Task` action:
//! capability negotiation (`config`), strong definition discovery
//! (`contextDefs`), event fan-in (`subscribe` / `unsubscribe` /
//! `emitEvent`) and context proxification (`proxifyContext` /
//! `deproxifyContext`). Dispatch is by task name; an unknown name is a
//! Not-Found error carried back to the caller.
//!
//! Every task returns a plain keyed record - callers reject anything else.

use std::sync::Arc;

use serde_json::{json, Value};

use objrpc_common::protocol::{
    Definition, ObjrpcError, Result, WireValue, PROTOCOL_VERSION,
};

use crate::context::Context;
use crate::interface::Interface;
use crate::node::Node;
use crate::peer::RemotePeer;
use crate::stub::{RemoteContext, Stub};

pub(crate) fn run(
    node: &Arc<Node>,
    peer: &Arc<RemotePeer>,
    task: &str,
    args: Vec<WireValue>,
) -> Result<WireValue> {
    match task {
        "config" => config(node),
        "contextDefs" => context_defs(node),
        "subscribe" => subscribe(peer, &args),
        "unsubscribe" => unsubscribe(peer, &args),
        "emitEvent" => emit_event(peer, &args),
        "proxifyContext" => proxify_context(node, peer, &args),
        "deproxifyContext" => deproxify_context(node, peer, &args),
        _ => Err(ObjrpcError::NotFound(format!("Task '{task}' not exists"))),
    }
}

fn config(node: &Node) -> Result<WireValue> {
    Ok(WireValue::raw(json!({
        "proxy_contexts": node.options().proxy_contexts,
        "protocol": PROTOCOL_VERSION,
    })))
}

fn context_defs(node: &Node) -> Result<WireValue> {
    let defs = node.strong_definitions();
    Ok(WireValue::raw(json!({"defs": serde_json::to_value(defs)?})))
}

fn subscribe(peer: &RemotePeer, args: &[WireValue]) -> Result<WireValue> {
    let event = string_arg(args, 0, "subscribe")?;
    peer.add_wire_subscription(&event);
    Ok(WireValue::raw(json!({"subscribed": event})))
}

fn unsubscribe(peer: &RemotePeer, args: &[WireValue]) -> Result<WireValue> {
    let event = string_arg(args, 0, "unsubscribe")?;
    let removed = peer.remove_wire_subscription(&event);
    Ok(WireValue::raw(json!({"unsubscribed": event, "removed": removed})))
}

fn emit_event(peer: &RemotePeer, args: &[WireValue]) -> Result<WireValue> {
    let event = string_arg(args, 0, "emitEvent")?;
    let payload = match args.get(1) {
        Some(WireValue::Raw(value)) => value.clone(),
        Some(other) => {
            return Err(ObjrpcError::NotValid(format!(
                "Task 'emitEvent' expects a raw payload, got {}",
                other.kind()
            )))
        }
        None => Value::Null,
    };
    peer.deliver_remote_event(&event, &payload);
    Ok(WireValue::raw(json!({"delivered": true})))
}

/// Hosts a context on behalf of the calling peer: adopts its definition,
/// builds a relay stub forwarding through this connection, and registers the
/// stub under the requested public name.
fn proxify_context(node: &Arc<Node>, peer: &Arc<RemotePeer>, args: &[WireValue]) -> Result<WireValue> {
    let ctx_id = string_arg(args, 0, "proxifyContext")?;
    let def = definition_arg(args, 1, "proxifyContext")?;

    if !node.options().proxy_contexts {
        return Err(ObjrpcError::NotSupported(
            "Context proxification is not enabled on this node".to_string(),
        ));
    }
    if node.has_context(&ctx_id) {
        return Err(ObjrpcError::Exists(format!(
            "Context '{ctx_id}' already attached"
        )));
    }

    peer.update_definition(def.clone());
    let iface = Interface::new(peer.clone(), def.id);
    let instance: Arc<dyn Context> = Arc::new(RemoteContext::new(iface, def.clone()));

    let mut proxy_id = node.next_def_id();
    while proxy_id == def.id {
        proxy_id = node.next_def_id();
    }
    let stub = Stub::new(proxy_id, instance, Some(ctx_id.clone()));
    let proxy_def = stub.definition().clone();

    peer.mark_definition_remote(def.id, proxy_def.clone())?;
    node.register_strong_stub(stub, ctx_id.clone())?;
    peer.track_hosted_context(&ctx_id);
    Ok(WireValue::raw(json!({"def_id": proxy_def.id})))
}

fn deproxify_context(
    node: &Arc<Node>,
    peer: &Arc<RemotePeer>,
    args: &[WireValue],
) -> Result<WireValue> {
    let ctx_id = string_arg(args, 0, "deproxifyContext")?;
    let def_id = node.detach_context(&ctx_id)?;
    peer.untrack_hosted_context(&ctx_id);
    Ok(WireValue::raw(json!({"def_id": def_id})))
}

fn string_arg(args: &[WireValue], index: usize, task: &str) -> Result<String> {
    match args.get(index) {
        Some(WireValue::Raw(Value::String(value))) => Ok(value.clone()),
        _ => Err(ObjrpcError::NotValid(format!(
            "Task '{task}' expects a string argument at position {index}"
        ))),
    }
}

fn definition_arg(args: &[WireValue], index: usize, task: &str) -> Result<Definition> {
    match args.get(index) {
        Some(WireValue::Definition(def)) => Ok(def.clone()),
        _ => Err(ObjrpcError::NotValid(format!(
            "Task '{task}' expects a definition argument at position {index}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeOptions;

    #[tokio::test]
    async fn test_unknown_task_is_not_found() {
        let node = Node::new(NodeOptions::default());
        let peer = node.create_peer();
        let result = run(&node, &peer, "bogus", Vec::new());
        assert!(matches!(result, Err(ObjrpcError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_config_reports_capabilities() {
        let node = Node::new(NodeOptions::default().with_proxy_contexts(true));
        let peer = node.create_peer();
        let result = run(&node, &peer, "config", Vec::new()).unwrap();
        let map = result.as_raw().unwrap();
        assert_eq!(map["proxy_contexts"], json!(true));
        assert_eq!(map["protocol"], json!(PROTOCOL_VERSION));
    }

    #[tokio::test]
    async fn test_subscribe_and_unsubscribe_track_wire_state() {
        let node = Node::new(NodeOptions::default());
        let peer = node.create_peer();

        let args = vec![WireValue::raw(json!("tick"))];
        run(&node, &peer, "subscribe", args.clone()).unwrap();
        assert!(peer.is_wire_subscribed("tick"));

        run(&node, &peer, "unsubscribe", args).unwrap();
        assert!(!peer.is_wire_subscribed("tick"));
    }

    #[tokio::test]
    async fn test_subscribe_rejects_missing_argument() {
        let node = Node::new(NodeOptions::default());
        let peer = node.create_peer();
        let result = run(&node, &peer, "subscribe", Vec::new());
        assert!(matches!(result, Err(ObjrpcError::NotValid(_))));
    }

    #[tokio::test]
    async fn test_proxify_requires_capability() {
        let node = Node::new(NodeOptions::default());
        let peer = node.create_peer();
        let def = Definition {
            id: 4,
            parent_id: 0,
            name: "Thing".to_string(),
            ctx_id: None,
            fields: Default::default(),
            remote: false,
            proxy_def: None,
        };
        let args = vec![
            WireValue::raw(json!("thing")),
            WireValue::Definition(def),
        ];
        let result = run(&node, &peer, "proxifyContext", args);
        assert!(matches!(result, Err(ObjrpcError::NotSupported(_))));
    }

    #[tokio::test]
    async fn test_proxify_registers_relay_stub() {
        let node = Node::new(NodeOptions::default().with_proxy_contexts(true));
        let peer = node.create_peer();
        let def = Definition {
            id: 4,
            parent_id: 0,
            name: "Thing".to_string(),
            ctx_id: None,
            fields: Default::default(),
            remote: false,
            proxy_def: None,
        };
        let args = vec![
            WireValue::raw(json!("thing")),
            WireValue::Definition(def.clone()),
        ];
        run(&node, &peer, "proxifyContext", args.clone()).unwrap();

        assert!(node.has_context("thing"));
        let adopted = peer.definition(def.id).unwrap();
        assert!(adopted.remote);
        assert_ne!(adopted.proxy_def_id(), Some(def.id));

        // hosting the same name twice is rejected
        let result = run(&node, &peer, "proxifyContext", args);
        assert!(matches!(result, Err(ObjrpcError::Exists(_))));
    }

    #[tokio::test]
    async fn test_deproxify_detaches_the_relay() {
        let node = Node::new(NodeOptions::default().with_proxy_contexts(true));
        let peer = node.create_peer();
        let def = Definition {
            id: 4,
            parent_id: 0,
            name: "Thing".to_string(),
            ctx_id: None,
            fields: Default::default(),
            remote: false,
            proxy_def: None,
        };
        run(
            &node,
            &peer,
            "proxifyContext",
            vec![WireValue::raw(json!("thing")), WireValue::Definition(def)],
        )
        .unwrap();

        run(
            &node,
            &peer,
            "deproxifyContext",
            vec![WireValue::raw(json!("thing"))],
        )
        .unwrap();
        assert!(!node.has_context("thing"));
    }
}
