//! HTTP sink: POSTs each event as a JSON body to a collector endpoint.
//! Client-error responses are permanent failures; everything else retries.

use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

use crate::adapters::{Adapter, BoxedAdapter};
use crate::error::AdapterError;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const USER_AGENT: &str = concat!("emit/", env!("CARGO_PKG_VERSION"));

/// POSTs events to an HTTP endpoint
pub struct HttpAdapter {
    url: String,
    client: Option<Client>,
}

impl HttpAdapter {
    /// Create an adapter for the given `http://` / `https://` URL
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client: None,
        }
    }
}

#[async_trait]
impl Adapter for HttpAdapter {
    async fn open(&mut self) -> std::result::Result<(), AdapterError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| AdapterError::closed(e.to_string()))?;
        self.client = Some(client);
        Ok(())
    }

    async fn close(&mut self) {
        self.client = None;
    }

    async fn flush(&mut self, _timeout: Duration) -> std::result::Result<(), AdapterError> {
        if self.closed() {
            return Err(AdapterError::closed("http adapter is closed"));
        }
        Ok(())
    }

    async fn emit(&mut self, payload: &str) -> std::result::Result<(), AdapterError> {
        let client = self
            .client
            .as_ref()
            .ok_or_else(|| AdapterError::closed("http adapter is closed"))?;

        let response = client
            .post(&self.url)
            .header("Content-Type", "application/json")
            .body(payload.to_string())
            .send()
            .await
            .map_err(AdapterError::from)?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else if status.is_client_error() {
            Err(AdapterError::emit_permanent(format!(
                "endpoint rejected event with HTTP {status}"
            )))
        } else {
            Err(AdapterError::emit(format!(
                "endpoint failed with HTTP {status}"
            )))
        }
    }

    fn closed(&self) -> bool {
        self.client.is_none()
    }

    fn clone_adapter(&self) -> BoxedAdapter {
        Box::new(HttpAdapter::new(self.url.clone()))
    }
}
