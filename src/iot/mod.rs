//! IoT device registry
//!
//! Devices ("things") expose a descriptor, a state snapshot, and an invoke
//! entry point. The session runtime pushes descriptors when the channel
//! opens, state deltas when listening starts, and routes inbound `iot`
//! command batches here.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::{Error, Result};

/// A controllable device exposed to the server.
#[async_trait]
pub trait Thing: Send + Sync {
    /// Stable device name used in command routing.
    fn name(&self) -> &str;

    /// Device descriptor (name, description, properties, methods).
    fn descriptor(&self) -> Value;

    /// Current state snapshot.
    async fn state(&self) -> Value;

    /// Execute a command against this device.
    async fn invoke(&self, command: &Value) -> Result<Value>;
}

/// Registry interface the session runtime depends on.
#[async_trait]
pub trait DeviceRegistry: Send + Sync {
    /// Descriptors for every registered device, as a JSON array.
    fn descriptors_json(&self) -> Value;

    /// State snapshot for every device.
    ///
    /// With `delta` set, only states that changed since the previous call
    /// are included; returns whether anything changed along with the JSON.
    async fn states_json(&self, delta: bool) -> (bool, Value);

    /// Route a command (`{"name": ..., "method": ..., ...}`) to its device.
    async fn invoke(&self, command: &Value) -> Result<Value>;
}

/// In-process registry of `Thing` trait objects.
#[derive(Default)]
pub struct ThingRegistry {
    things: Vec<Box<dyn Thing>>,
    last_states: Mutex<HashMap<String, Value>>,
}

impl ThingRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a device.
    pub fn add_thing(&mut self, thing: Box<dyn Thing>) {
        tracing::debug!(name = thing.name(), "registered iot device");
        self.things.push(thing);
    }

    /// Number of registered devices.
    #[must_use]
    pub fn len(&self) -> usize {
        self.things.len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.things.is_empty()
    }
}

#[async_trait]
impl DeviceRegistry for ThingRegistry {
    fn descriptors_json(&self) -> Value {
        Value::Array(self.things.iter().map(|t| t.descriptor()).collect())
    }

    async fn states_json(&self, delta: bool) -> (bool, Value) {
        let mut states = Vec::with_capacity(self.things.len());
        let mut changed = false;

        for thing in &self.things {
            let state = thing.state().await;
            let entry = json!({ "name": thing.name(), "state": state });

            if delta {
                let mut last = match self.last_states.lock() {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                };
                if last.get(thing.name()) != Some(&state) {
                    changed = true;
                }
                last.insert(thing.name().to_string(), state);
            }

            states.push(entry);
        }

        if !delta {
            changed = true;
        }

        (changed, Value::Array(states))
    }

    async fn invoke(&self, command: &Value) -> Result<Value> {
        let name = command
            .get("name")
            .and_then(|n| n.as_str())
            .ok_or_else(|| Error::Iot("command missing device name".to_string()))?;

        let thing = self
            .things
            .iter()
            .find(|t| t.name() == name)
            .ok_or_else(|| Error::Iot(format!("unknown device: {name}")))?;

        thing.invoke(command).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Lamp {
        on: Mutex<bool>,
    }

    #[async_trait]
    impl Thing for Lamp {
        fn name(&self) -> &str {
            "lamp"
        }

        fn descriptor(&self) -> Value {
            json!({
                "name": "lamp",
                "description": "A desk lamp",
                "methods": { "turn_on": {}, "turn_off": {} },
            })
        }

        async fn state(&self) -> Value {
            let on = self.on.lock().map(|g| *g).unwrap_or(false);
            json!({ "power": on })
        }

        async fn invoke(&self, command: &Value) -> Result<Value> {
            let method = command
                .get("method")
                .and_then(|m| m.as_str())
                .unwrap_or_default();
            let mut on = self
                .on
                .lock()
                .map_err(|_| Error::Iot("lamp state poisoned".to_string()))?;
            match method {
                "turn_on" => *on = true,
                "turn_off" => *on = false,
                other => return Err(Error::Iot(format!("unknown method: {other}"))),
            }
            Ok(json!({ "ok": true }))
        }
    }

    fn registry_with_lamp() -> ThingRegistry {
        let mut registry = ThingRegistry::new();
        registry.add_thing(Box::new(Lamp {
            on: Mutex::new(false),
        }));
        registry
    }

    #[tokio::test]
    async fn descriptors_list_all_devices() {
        let registry = registry_with_lamp();
        let descriptors = registry.descriptors_json();

        let list = descriptors.as_array().unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0]["name"], "lamp");
    }

    #[tokio::test]
    async fn delta_states_only_report_changes() {
        let registry = registry_with_lamp();

        let (changed, _) = registry.states_json(true).await;
        assert!(changed, "first delta snapshot counts as changed");

        let (changed, _) = registry.states_json(true).await;
        assert!(!changed, "unchanged state should not report a delta");

        registry
            .invoke(&json!({ "name": "lamp", "method": "turn_on" }))
            .await
            .unwrap();

        let (changed, states) = registry.states_json(true).await;
        assert!(changed);
        assert_eq!(states[0]["state"]["power"], true);
    }

    #[tokio::test]
    async fn invoke_unknown_device_fails() {
        let registry = registry_with_lamp();
        let result = registry.invoke(&json!({ "name": "toaster" })).await;
        assert!(result.is_err());
    }
}
