//! Shared fixtures for the integration tests: a handful of test contexts
//! and helpers to wire two nodes over an in-memory duplex stream.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use objrpc::{
    Context, ContextShape, ContextValue, Node, ObjrpcError, RemotePeer, Result, WireValue,
};

/// Connects two nodes over an in-memory duplex stream and performs the
/// handshake on both sides. Returns `(x_peer, y_peer)` where `x_peer` is
/// `x`'s view of `y`.
pub async fn link(x: &Arc<Node>, y: &Arc<Node>) -> (Arc<RemotePeer>, Arc<RemotePeer>) {
    let (sx, sy) = tokio::io::duplex(64 * 1024);
    let px = x.create_peer();
    let py = y.create_peer();
    px.connect(sx).await.unwrap();
    py.connect(sy).await.unwrap();
    tokio::try_join!(px.handshake(), py.handshake()).unwrap();
    (px, py)
}

/// Polls `cond` until it holds or a second has passed.
pub async fn eventually<F>(cond: F, what: &str)
where
    F: Fn() -> bool,
{
    for _ in 0..100 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

/// Stateful calculator: one method, one readonly and one writable property.
pub struct Calculator {
    total: Mutex<i64>,
    label: Mutex<Value>,
}

impl Calculator {
    pub fn new() -> Arc<Self> {
        Arc::new(Calculator {
            total: Mutex::new(0),
            label: Mutex::new(json!("untitled")),
        })
    }
}

#[async_trait]
impl Context for Calculator {
    fn shape(&self) -> ContextShape {
        ContextShape::new("Calculator")
            .method("add")
            .property("total", true)
            .property("label", false)
    }

    async fn call(&self, method: &str, args: Vec<WireValue>) -> Result<ContextValue> {
        match method {
            "add" => {
                let sum: i64 = args
                    .iter()
                    .filter_map(|arg| arg.as_raw())
                    .filter_map(Value::as_i64)
                    .sum();
                let mut total = self.total.lock().unwrap();
                *total += sum;
                Ok(ContextValue::Raw(json!(*total)))
            }
            other => Err(ObjrpcError::NotFound(format!("'{other}' not exists"))),
        }
    }

    async fn get(&self, prop: &str) -> Result<ContextValue> {
        match prop {
            "total" => Ok(ContextValue::Raw(json!(*self.total.lock().unwrap()))),
            "label" => Ok(ContextValue::Raw(self.label.lock().unwrap().clone())),
            other => Err(ObjrpcError::NotFound(format!("'{other}' not exists"))),
        }
    }

    async fn set(&self, prop: &str, value: WireValue) -> Result<()> {
        match (prop, value) {
            ("label", WireValue::Raw(value)) => {
                *self.label.lock().unwrap() = value;
                Ok(())
            }
            ("label", other) => Err(ObjrpcError::NotValid(format!(
                "expected raw value, got {}",
                other.kind()
            ))),
            (other, _) => Err(ObjrpcError::NotFound(format!("'{other}' not exists"))),
        }
    }
}

/// Leaf object handed out by [`Warehouse`].
pub struct Bucket {
    label: String,
}

impl Bucket {
    pub fn new(label: &str) -> Arc<Self> {
        Arc::new(Bucket {
            label: label.to_string(),
        })
    }
}

#[async_trait]
impl Context for Bucket {
    fn shape(&self) -> ContextShape {
        ContextShape::new("Bucket")
            .property("label", true)
            .method("describe")
    }

    async fn call(&self, method: &str, _args: Vec<WireValue>) -> Result<ContextValue> {
        match method {
            "describe" => Ok(ContextValue::Raw(json!(format!("bucket {}", self.label)))),
            other => Err(ObjrpcError::NotFound(format!("'{other}' not exists"))),
        }
    }

    async fn get(&self, prop: &str) -> Result<ContextValue> {
        match prop {
            "label" => Ok(ContextValue::Raw(json!(self.label.clone()))),
            other => Err(ObjrpcError::NotFound(format!("'{other}' not exists"))),
        }
    }
}

/// Context whose methods hand out nested objects, singly and as a
/// collection.
pub struct Warehouse {
    bucket: Arc<Bucket>,
    extra: Arc<Bucket>,
}

impl Warehouse {
    pub fn new() -> Arc<Self> {
        Arc::new(Warehouse {
            bucket: Bucket::new("b1"),
            extra: Bucket::new("b2"),
        })
    }
}

#[async_trait]
impl Context for Warehouse {
    fn shape(&self) -> ContextShape {
        ContextShape::new("Warehouse")
            .method("ping")
            .method("bucket")
            .method("buckets")
    }

    async fn call(&self, method: &str, _args: Vec<WireValue>) -> Result<ContextValue> {
        match method {
            "ping" => Ok(ContextValue::Raw(json!("pong"))),
            "bucket" => Ok(ContextValue::Context(self.bucket.clone())),
            "buckets" => Ok(ContextValue::Contexts(vec![
                self.bucket.clone(),
                self.extra.clone(),
            ])),
            other => Err(ObjrpcError::NotFound(format!("'{other}' not exists"))),
        }
    }
}

/// Context whose single method never answers within a test's patience.
pub struct Slow;

#[async_trait]
impl Context for Slow {
    fn shape(&self) -> ContextShape {
        ContextShape::new("Slow").method("wait")
    }

    async fn call(&self, method: &str, _args: Vec<WireValue>) -> Result<ContextValue> {
        match method {
            "wait" => {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(ContextValue::Raw(json!("done")))
            }
            other => Err(ObjrpcError::NotFound(format!("'{other}' not exists"))),
        }
    }
}
