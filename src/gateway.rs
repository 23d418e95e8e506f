use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::{Error, Result};

/// Outbound message delivery to the WhatsApp automation backend. The core
/// never retries delivery; failures surface to the caller of the reply
/// operation and do not roll back persisted state.
#[async_trait]
pub trait MessageGateway: Send + Sync {
    async fn send(&self, session_name: &str, token: &str, phone: &str, text: &str) -> Result<()>;
}

/// WPPConnect-style HTTP gateway:
/// `POST {base}/api/{session}/send-message` with an `apikey` header.
pub struct WppConnectGateway {
    client: reqwest::Client,
    base_url: String,
}

impl WppConnectGateway {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl MessageGateway for WppConnectGateway {
    async fn send(&self, session_name: &str, token: &str, phone: &str, text: &str) -> Result<()> {
        if session_name.is_empty() || token.is_empty() {
            return Err(Error::Delivery(
                "tenant has no outbound session configured".to_string(),
            ));
        }
        let url = format!("{}/api/{}/send-message", self.base_url, session_name);
        let response = self
            .client
            .post(&url)
            .header("apikey", token)
            .json(&json!({ "phone": phone, "message": text }))
            .send()
            .await
            .map_err(|err| Error::Delivery(err.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.json::<Value>().await.unwrap_or_else(|_| json!({}));
        let detail = body
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("wpp send error")
            .to_string();
        tracing::warn!(%status, %url, "outbound whatsapp send failed");
        Err(Error::Delivery(detail))
    }
}

#[cfg(test)]
pub mod recording {
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    pub struct RecordingGateway {
        pub sent: Mutex<Vec<(String, String, String)>>,
        pub fail: bool,
    }

    #[async_trait]
    impl MessageGateway for RecordingGateway {
        async fn send(
            &self,
            session_name: &str,
            _token: &str,
            phone: &str,
            text: &str,
        ) -> Result<()> {
            if self.fail {
                return Err(Error::Delivery("wpp send error".to_string()));
            }
            self.sent.lock().unwrap().push((
                session_name.to_string(),
                phone.to_string(),
                text.to_string(),
            ));
            Ok(())
        }
    }
}
