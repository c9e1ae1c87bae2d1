use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::Value;

/// Identifier returned by a subscription, used to remove the handler again.
pub type SubscriptionId = u64;

/// Event handler invoked with the event name and its JSON payload.
pub type EventCallback = Arc<dyn Fn(&str, &Value) + Send + Sync>;

/// In-process event bus.
///
/// Carries `context:attach` / `context:detach` broadcasts and any user
/// events a node emits. Handlers run synchronously on the emitting task, in
/// registration order; the handler list is snapshotted before invocation so
/// a handler may subscribe or unsubscribe without deadlocking the bus.
pub struct EventBus {
    handlers: Mutex<HashMap<String, Vec<(SubscriptionId, EventCallback)>>>,
    ids: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        EventBus {
            handlers: Mutex::new(HashMap::new()),
            ids: AtomicU64::new(0),
        }
    }

    /// Registers a handler for `event` and returns its subscription id.
    pub fn on<F>(&self, event: &str, handler: F) -> SubscriptionId
    where
        F: Fn(&str, &Value) + Send + Sync + 'static,
    {
        let id = self.ids.fetch_add(1, Ordering::SeqCst) + 1;
        let mut handlers = self.handlers.lock().expect("event handler lock poisoned");
        handlers
            .entry(event.to_string())
            .or_default()
            .push((id, Arc::new(handler)));
        id
    }

    /// Removes a handler; returns false when the id is unknown for `event`.
    pub fn off(&self, event: &str, id: SubscriptionId) -> bool {
        let mut handlers = self.handlers.lock().expect("event handler lock poisoned");
        let list = match handlers.get_mut(event) {
            Some(list) => list,
            None => return false,
        };
        let before = list.len();
        list.retain(|(handler_id, _)| *handler_id != id);
        let removed = list.len() != before;
        if list.is_empty() {
            handlers.remove(event);
        }
        removed
    }

    /// Invokes every handler registered for `event`.
    pub fn emit(&self, event: &str, payload: &Value) {
        let snapshot: Vec<EventCallback> = {
            let handlers = self.handlers.lock().expect("event handler lock poisoned");
            handlers
                .get(event)
                .map(|list| list.iter().map(|(_, handler)| handler.clone()).collect())
                .unwrap_or_default()
        };
        for handler in snapshot {
            handler(event, payload);
        }
    }

    pub fn handler_count(&self, event: &str) -> usize {
        let handlers = self.handlers.lock().expect("event handler lock poisoned");
        handlers.get(event).map(Vec::len).unwrap_or(0)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_on_emit_off() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let hits_clone = hits.clone();
        let id = bus.on("ping", move |_, _| {
            hits_clone.fetch_add(1, Ordering::SeqCst);
        });

        bus.emit("ping", &json!(null));
        bus.emit("other", &json!(null));
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        assert!(bus.off("ping", id));
        bus.emit("ping", &json!(null));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_off_unknown_id_is_noop() {
        let bus = EventBus::new();
        assert!(!bus.off("missing", 99));
    }

    #[test]
    fn test_multiple_handlers_all_fire() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let hits = hits.clone();
            bus.on("tick", move |_, _| {
                hits.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(bus.handler_count("tick"), 3);
        bus.emit("tick", &json!({}));
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_handler_receives_event_name_and_payload() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(None));
        let seen_clone = seen.clone();
        bus.on("context:attach", move |event, payload| {
            *seen_clone.lock().unwrap() = Some((event.to_string(), payload.clone()));
        });
        bus.emit("context:attach", &json!({"id": "calc"}));
        let seen = seen.lock().unwrap().clone().unwrap();
        assert_eq!(seen.0, "context:attach");
        assert_eq!(seen.1, json!({"id": "calc"}));
    }
}
