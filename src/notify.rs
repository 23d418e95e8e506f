use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::{mpsc, Mutex};

/// Fan-out of ticket lifecycle events to subscribers of a tenant room.
#[async_trait]
pub trait EventNotifier: Send + Sync {
    async fn emit(&self, tenant_id: &str, event: &str, data: Value);
}

fn event_payload(event: &str, data: Value) -> Option<String> {
    serde_json::to_string(&json!({ "event": event, "data": data })).ok()
}

#[derive(Default)]
struct HubState {
    clients: HashMap<usize, mpsc::UnboundedSender<String>>,
    tenant_by_client: HashMap<usize, String>,
}

/// WebSocket client registry. Clients register on connect and join a tenant
/// room after authenticating; events go to every client in the room.
#[derive(Default)]
pub struct RealtimeHub {
    state: Mutex<HubState>,
    next_client_id: AtomicUsize,
}

impl RealtimeHub {
    pub async fn register_client(&self, tx: mpsc::UnboundedSender<String>) -> usize {
        let client_id = self.next_client_id.fetch_add(1, Ordering::Relaxed) + 1;
        let mut state = self.state.lock().await;
        state.clients.insert(client_id, tx);
        client_id
    }

    pub async fn join_tenant(&self, client_id: usize, tenant_id: &str) {
        let mut state = self.state.lock().await;
        state
            .tenant_by_client
            .insert(client_id, tenant_id.to_string());
    }

    pub async fn unregister_client(&self, client_id: usize) {
        let mut state = self.state.lock().await;
        state.clients.remove(&client_id);
        state.tenant_by_client.remove(&client_id);
    }

    pub async fn emit_to_client(&self, client_id: usize, event: &str, data: Value) {
        let Some(payload) = event_payload(event, data) else {
            return;
        };
        let tx = {
            let state = self.state.lock().await;
            state.clients.get(&client_id).cloned()
        };
        if let Some(sender) = tx {
            let _ = sender.send(payload);
        }
    }

    pub async fn emit_to_tenant(&self, tenant_id: &str, event: &str, data: Value) {
        let Some(payload) = event_payload(event, data) else {
            return;
        };
        let senders = {
            let state = self.state.lock().await;
            state
                .tenant_by_client
                .iter()
                .filter(|(_, client_tenant)| client_tenant.as_str() == tenant_id)
                .filter_map(|(client_id, _)| state.clients.get(client_id).cloned())
                .collect::<Vec<_>>()
        };
        for sender in senders {
            let _ = sender.send(payload.clone());
        }
    }
}

#[async_trait]
impl EventNotifier for RealtimeHub {
    async fn emit(&self, tenant_id: &str, event: &str, data: Value) {
        self.emit_to_tenant(tenant_id, event, data).await;
    }
}

#[cfg(test)]
pub mod recording {
    use std::sync::Mutex;

    use super::*;

    /// Collects emitted events for assertions.
    #[derive(Default)]
    pub struct RecordingNotifier {
        pub events: Mutex<Vec<(String, String, Value)>>,
    }

    impl RecordingNotifier {
        pub fn event_names(&self) -> Vec<String> {
            self.events
                .lock()
                .unwrap()
                .iter()
                .map(|(_, event, _)| event.clone())
                .collect()
        }
    }

    #[async_trait]
    impl EventNotifier for RecordingNotifier {
        async fn emit(&self, tenant_id: &str, event: &str, data: Value) {
            self.events.lock().unwrap().push((
                tenant_id.to_string(),
                event.to_string(),
                data,
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn emits_only_to_tenant_room() {
        let hub = RealtimeHub::default();

        let (tx_a, mut rx_a) = mpsc::unbounded_channel::<String>();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel::<String>();
        let a = hub.register_client(tx_a).await;
        let b = hub.register_client(tx_b).await;
        hub.join_tenant(a, "org-1").await;
        hub.join_tenant(b, "org-2").await;

        hub.emit_to_tenant("org-1", "ticket:new", json!({ "id": "t-1" }))
            .await;

        let payload = rx_a.recv().await.expect("org-1 client receives");
        assert!(payload.contains("ticket:new"));
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn unregistered_client_receives_nothing() {
        let hub = RealtimeHub::default();
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        let id = hub.register_client(tx).await;
        hub.join_tenant(id, "org-1").await;
        hub.unregister_client(id).await;

        hub.emit_to_tenant("org-1", "ticket:waiting", json!({})).await;
        assert!(rx.try_recv().is_err());
    }
}
