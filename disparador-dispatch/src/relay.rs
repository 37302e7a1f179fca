use anyhow::{anyhow, Result};
use async_trait::async_trait;
use disparador_core::config::RelayConfig;
use disparador_core::types::ContactInput;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing;
use uuid::Uuid;

const DISPATCH_PATH: &str = "/whatsapp/dispatch";

/// Job handed to the external relay for AI dispatches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayJob {
    pub dispatch_id: Uuid,
    pub unique_id: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    pub contacts: Vec<ContactInput>,
}

#[async_trait]
pub trait RelayClient: Send + Sync {
    async fn forward(&self, job: &RelayJob) -> Result<()>;
}

pub struct HttpRelay {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpRelay {
    pub fn new(config: &RelayConfig) -> Result<Self> {
        tracing::info!("Initializing relay client for {}", config.base_url);

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| anyhow!("Failed to create HTTP client: {}", e))?;

        if config.api_key.is_none() {
            tracing::warn!("RELAY_API_KEY not set, relay calls will be unauthenticated");
        }

        Ok(Self {
            client,
            endpoint: format!("{}{}", config.base_url.trim_end_matches('/'), DISPATCH_PATH),
            api_key: config.api_key.clone(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl RelayClient for HttpRelay {
    async fn forward(&self, job: &RelayJob) -> Result<()> {
        let mut request = self.client.post(&self.endpoint).json(job);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| anyhow!("Failed to send HTTP request to relay: {}", e))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(anyhow!(
                "Relay returned error status {}: {}",
                status,
                error_text
            ));
        }

        tracing::debug!(
            "Relay accepted dispatch {} ({} contacts)",
            job.dispatch_id,
            job.contacts.len()
        );

        Ok(())
    }
}
