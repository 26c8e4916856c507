//! Forwarding relayed messages to an external store over HTTP.

use async_trait::async_trait;
use huddle_relay::{MessageEnvelope, MessageStore, RelayError};
use std::time::Duration;

use crate::error::Result;

/// Message store that POSTs each envelope as JSON to a fixed endpoint.
#[derive(Debug, Clone)]
pub struct HttpMessageStore {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpMessageStore {
    /// Create a store posting to `endpoint` with the given request timeout.
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    /// Target URL.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl MessageStore for HttpMessageStore {
    async fn persist(&self, envelope: &MessageEnvelope) -> std::result::Result<(), RelayError> {
        self.client
            .post(&self.endpoint)
            .json(envelope)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|e| RelayError::Persistence(e.to_string()))?;
        Ok(())
    }
}
