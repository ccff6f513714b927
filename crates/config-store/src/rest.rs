//! Store backed by the hosted database's REST and realtime endpoints.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::ACCEPT;
use rustls::ClientConfig;
use rustls_platform_verifier::BuilderVerifierExt;
use tracing::debug;

use crate::error::{Result, StoreError};
use crate::realtime;
use crate::row::ConfigRow;
use crate::settings::StoreSettings;
use crate::store::{ChangeFeed, ConfigStore};

/// Build the HTTP client used for REST reads.
pub fn default_client(timeout: Duration) -> Result<Client> {
    let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());
    let tls_config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| StoreError::config(format!("failed to configure TLS versions: {e}")))?
        .with_platform_verifier()
        .map_err(|e| StoreError::config(format!("failed to load platform verifier: {e}")))?
        .with_no_client_auth();

    Ok(Client::builder()
        .use_preconfigured_tls(tls_config)
        .timeout(timeout)
        .build()?)
}

/// Reads the pricing table through PostgREST and listens for updates on the
/// realtime socket.
pub struct SupabaseStore {
    client: Client,
    settings: StoreSettings,
}

impl SupabaseStore {
    /// Create a store with a client honouring `settings.request_timeout`.
    pub fn new(settings: StoreSettings) -> Result<Self> {
        let client = default_client(settings.request_timeout)?;
        Ok(Self::with_client(client, settings))
    }

    pub fn with_client(client: Client, settings: StoreSettings) -> Self {
        Self { client, settings }
    }

    pub fn settings(&self) -> &StoreSettings {
        &self.settings
    }
}

#[async_trait]
impl ConfigStore for SupabaseStore {
    async fn fetch_rows(&self) -> Result<Vec<ConfigRow>> {
        let url = self.settings.rest_url()?;
        let started = Instant::now();

        let response = self
            .client
            .get(url)
            .header("apikey", &self.settings.api_key)
            .bearer_auth(&self.settings.api_key)
            .header("Accept-Profile", &self.settings.schema)
            .header(ACCEPT, "application/json")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::Status { status, body });
        }

        let body = response.bytes().await?;
        let rows = decode_rows(&body)?;

        debug!(
            table = %self.settings.table,
            rows = rows.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Fetched configuration rows"
        );
        Ok(rows)
    }

    async fn subscribe_updates(&self) -> Result<ChangeFeed> {
        realtime::open_feed(&self.settings).await
    }
}

/// Decode a PostgREST response body into rows.
pub fn decode_rows(body: &[u8]) -> Result<Vec<ConfigRow>> {
    Ok(serde_json::from_slice(body)?)
}
