// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::Arc;

use serde_json::{Map, Value};

use fennec_tasks::now_ts;

/// External state subscriber: `(state_name, data)`.
///
/// Delivery is fire-and-forget — the core neither buffers nor re-delivers
/// missed events; a subscriber that needs a durable stream buffers on its
/// own.  The callback must not block.
pub type StateCallback = Arc<dyn Fn(&str, Value) + Send + Sync>;

/// Thin wrapper that stamps every event with a timestamp before handing
/// it to the optional subscriber.
#[derive(Clone, Default)]
pub struct StateBroadcaster {
    callback: Option<StateCallback>,
}

impl StateBroadcaster {
    pub fn new(callback: StateCallback) -> Self {
        Self { callback: Some(callback) }
    }

    pub fn none() -> Self {
        Self { callback: None }
    }

    pub fn emit(&self, state: &str, mut data: Map<String, Value>) {
        if let Some(cb) = &self.callback {
            data.insert("timestamp".into(), Value::from(now_ts()));
            cb(state, Value::Object(data));
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn emit_attaches_timestamp() {
        let seen: Arc<Mutex<Vec<(String, Value)>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let broadcaster = StateBroadcaster::new(Arc::new(move |state, data| {
            sink.lock().unwrap().push((state.to_string(), data));
        }));

        let mut data = Map::new();
        data.insert("round".into(), Value::from(1));
        broadcaster.emit("conversing", data);

        let events = seen.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].0, "conversing");
        assert_eq!(events[0].1["round"], 1);
        assert!(events[0].1["timestamp"].is_number());
    }

    #[test]
    fn none_broadcaster_is_silent() {
        StateBroadcaster::none().emit("idle", Map::new());
    }
}
