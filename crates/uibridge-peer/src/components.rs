//! Component state held by the command server.

use std::collections::HashMap;

use serde_json::{Map, Value, json};
use uibridge_protocol::now_millis;

use crate::error::HandlerError;

#[derive(Debug, Clone)]
struct Component {
    kind: String,
    initial: Map<String, Value>,
    state: Map<String, Value>,
}

/// Loaded components and the event log the host drains with `get_events`.
///
/// Components are opaque state bags: the server stores and merges state but
/// attaches no widget behaviour to it.
#[derive(Debug, Default)]
pub struct ComponentStore {
    components: HashMap<String, Component>,
    events: Vec<Value>,
    next_id: u64,
}

impl ComponentStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of loaded components.
    pub fn len(&self) -> usize {
        self.components.len()
    }

    /// Whether no component is loaded.
    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// Instantiate a component from `config` and return its ID.
    ///
    /// `config.id` picks the ID (otherwise one is generated), `config.type`
    /// names the kind and `config.state` seeds the state object.
    pub fn load(&mut self, config: &Value) -> Result<String, HandlerError> {
        if !(config.is_object() || config.is_null()) {
            return Err(HandlerError::InvalidPayload(
                "config must be an object".into(),
            ));
        }
        let initial = match config.get("state") {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(state)) => state.clone(),
            Some(_) => {
                return Err(HandlerError::InvalidPayload(
                    "config.state must be an object".into(),
                ));
            }
        };

        self.next_id += 1;
        let id = config
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("component-{}", self.next_id));
        let kind = config
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or("component")
            .to_string();

        self.record("component_loaded", json!({ "id": id, "kind": kind }));
        self.components.insert(
            id.clone(),
            Component {
                kind,
                state: initial.clone(),
                initial,
            },
        );
        Ok(id)
    }

    /// Current state of component `id`.
    pub fn state(&self, id: &str) -> Result<Value, HandlerError> {
        self.get(id).map(|c| Value::Object(c.state.clone()))
    }

    /// Invoke `method` on component `id`. Every successful call is logged
    /// as `method_called`.
    ///
    /// - `set_state(patch)` merges `patch` into the state and returns it
    /// - `get(key?)` returns one state key, or the whole state
    /// - `reset()` restores the state the component was loaded with
    /// - `emit(event)` appends `event` to the event log
    pub fn call(&mut self, id: &str, method: &str, args: &[Value]) -> Result<Value, HandlerError> {
        let result = {
            let component = self
                .components
                .get_mut(id)
                .ok_or_else(|| HandlerError::NotFound(format!("component '{id}'")))?;

            match method {
                "set_state" => {
                    let Some(Value::Object(patch)) = args.first() else {
                        return Err(HandlerError::InvalidPayload(
                            "set_state expects an object argument".into(),
                        ));
                    };
                    for (key, value) in patch {
                        component.state.insert(key.clone(), value.clone());
                    }
                    Value::Object(component.state.clone())
                }
                "get" => match args.first().and_then(Value::as_str) {
                    Some(key) => component.state.get(key).cloned().unwrap_or(Value::Null),
                    None => Value::Object(component.state.clone()),
                },
                "reset" => {
                    component.state = component.initial.clone();
                    Value::Object(component.state.clone())
                }
                "emit" => Value::Null,
                other => {
                    return Err(HandlerError::InvalidPayload(format!(
                        "{} '{id}' has no method '{other}'",
                        component.kind
                    )));
                }
            }
        };

        self.record("method_called", json!({ "id": id, "method": method }));
        if method == "emit" {
            let event = args.first().cloned().unwrap_or(Value::Null);
            self.record("component_event", json!({ "id": id, "event": event }));
        }
        Ok(result)
    }

    /// Append an entry to the event log.
    pub fn record(&mut self, kind: &str, detail: Value) {
        self.events.push(json!({
            "type": kind,
            "detail": detail,
            "timestamp": now_millis(),
        }));
    }

    /// Remove and return every logged event, oldest first.
    pub fn drain_events(&mut self) -> Vec<Value> {
        std::mem::take(&mut self.events)
    }

    fn get(&self, id: &str) -> Result<&Component, HandlerError> {
        self.components
            .get(id)
            .ok_or_else(|| HandlerError::NotFound(format!("component '{id}'")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_load_with_seed_state() {
        let mut store = ComponentStore::new();
        let id = store
            .load(&json!({"type": "select", "state": {"open": false}}))
            .unwrap();
        assert_eq!(id, "component-1");
        assert_eq!(store.state(&id).unwrap(), json!({"open": false}));

        let named = store.load(&json!({"id": "picker"})).unwrap();
        assert_eq!(named, "picker");
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_set_get_reset() {
        let mut store = ComponentStore::new();
        let id = store.load(&json!({"state": {"open": false}})).unwrap();

        let state = store
            .call(&id, "set_state", &[json!({"open": true, "item": 3})])
            .unwrap();
        assert_eq!(state, json!({"open": true, "item": 3}));
        assert_eq!(store.call(&id, "get", &[json!("item")]).unwrap(), json!(3));
        assert_eq!(
            store.call(&id, "reset", &[]).unwrap(),
            json!({"open": false})
        );
    }

    #[test]
    fn test_errors() {
        let mut store = ComponentStore::new();
        assert_eq!(
            store.state("ghost").unwrap_err(),
            HandlerError::NotFound("component 'ghost'".into())
        );
        let id = store.load(&Value::Null).unwrap();
        assert!(matches!(
            store.call(&id, "explode", &[]),
            Err(HandlerError::InvalidPayload(_))
        ));
        assert!(matches!(
            store.call("ghost", "get", &[]),
            Err(HandlerError::NotFound(_))
        ));
        assert!(matches!(
            store.call(&id, "set_state", &[json!(5)]),
            Err(HandlerError::InvalidPayload(_))
        ));
        assert!(matches!(
            store.load(&json!({"state": [1]})),
            Err(HandlerError::InvalidPayload(_))
        ));
    }

    #[test]
    fn test_events_drain() {
        let mut store = ComponentStore::new();
        let id = store.load(&json!({})).unwrap();
        store.call(&id, "emit", &[json!({"clicked": 1})]).unwrap();

        let events = store.drain_events();
        let kinds: Vec<_> = events.iter().map(|e| e["type"].clone()).collect();
        assert_eq!(
            kinds,
            [
                json!("component_loaded"),
                json!("method_called"),
                json!("component_event")
            ]
        );
        assert!(store.drain_events().is_empty());
    }
}
