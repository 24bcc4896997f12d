use anyhow::Context;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use tracing::instrument;

use super::{error_for_status, http_client};
use crate::monitor::{CatchUpQuery, WebhookEvent};

/// Catch-up query served by the webhook indexer
#[derive(Debug, Clone)]
pub struct HttpCatchUp {
    client: Client,
    endpoint: String,
}

impl HttpCatchUp {
    pub fn new(endpoint: impl Into<String>) -> anyhow::Result<Self> {
        Ok(Self {
            client: http_client()?,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl CatchUpQuery for HttpCatchUp {
    #[instrument(skip(self))]
    async fn events_since(&self, block_from: &str) -> anyhow::Result<Vec<WebhookEvent>> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&json!({ "blockFrom": block_from }))
            .send()
            .await?;

        error_for_status(response)
            .await?
            .json()
            .await
            .context("malformed catch-up response")
    }
}
