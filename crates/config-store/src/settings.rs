//! Connection settings for the configuration store.

use std::time::Duration;

use url::Url;

use crate::error::{Result, StoreError};

pub const ENV_URL: &str = "SUPABASE_URL";
pub const ENV_SERVICE_KEY: &str = "SUPABASE_SERVICE_ROLE_KEY";
pub const ENV_ANON_KEY: &str = "SUPABASE_ANON_KEY";
pub const ENV_TABLE: &str = "PRICING_CONFIG_TABLE";
pub const ENV_SCHEMA: &str = "PRICING_CONFIG_SCHEMA";
pub const ENV_REQUEST_TIMEOUT: &str = "PRICING_REQUEST_TIMEOUT_SECS";

const DEFAULT_TABLE: &str = "pricing_config";
const DEFAULT_SCHEMA: &str = "public";
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_JOIN_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(25);

/// Where the pricing table lives and how to reach it.
#[derive(Clone)]
pub struct StoreSettings {
    /// Project base url, e.g. `https://abc.supabase.co`.
    pub base_url: Url,
    pub api_key: String,
    pub table: String,
    pub schema: String,
    /// Timeout for each REST request.
    pub request_timeout: Duration,
    /// How long to wait for the realtime channel join to be acknowledged.
    pub join_timeout: Duration,
    pub heartbeat_interval: Duration,
}

impl StoreSettings {
    /// Create settings with default table, schema and timeouts.
    pub fn new(base_url: &str, api_key: impl Into<String>) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(StoreError::config("api key must not be empty"));
        }

        Ok(Self {
            base_url: normalize_base(base_url)?,
            api_key,
            table: DEFAULT_TABLE.to_string(),
            schema: DEFAULT_SCHEMA.to_string(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            join_timeout: DEFAULT_JOIN_TIMEOUT,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
        })
    }

    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = schema.into();
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_join_timeout(mut self, timeout: Duration) -> Self {
        self.join_timeout = timeout;
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Load settings from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load settings through an arbitrary variable lookup.
    ///
    /// The service role key wins over the anon key when both are set.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let base_url =
            var(ENV_URL).ok_or_else(|| StoreError::config(format!("{ENV_URL} is not set")))?;
        let api_key = var(ENV_SERVICE_KEY).or_else(|| var(ENV_ANON_KEY)).ok_or_else(|| {
            StoreError::config(format!("neither {ENV_SERVICE_KEY} nor {ENV_ANON_KEY} is set"))
        })?;

        let mut settings = Self::new(&base_url, api_key)?;

        if let Some(table) = var(ENV_TABLE) {
            settings.table = table;
        }
        if let Some(schema) = var(ENV_SCHEMA) {
            settings.schema = schema;
        }
        if let Some(secs) = var(ENV_REQUEST_TIMEOUT) {
            let secs: u64 = secs.trim().parse().map_err(|_| {
                StoreError::config(format!(
                    "{ENV_REQUEST_TIMEOUT} must be a whole number of seconds, got {secs:?}"
                ))
            })?;
            settings.request_timeout = Duration::from_secs(secs);
        }

        Ok(settings)
    }

    /// REST endpoint listing every row of the configured table.
    pub fn rest_url(&self) -> Result<Url> {
        let mut url = self.base_url.join(&format!("rest/v1/{}", self.table))?;
        url.query_pairs_mut()
            .append_pair("select", "config_key,config_value");
        Ok(url)
    }

    /// Realtime WebSocket endpoint, with the scheme switched to ws/wss.
    pub fn realtime_url(&self) -> Result<Url> {
        let mut url = self.base_url.join("realtime/v1/websocket")?;
        let scheme = match url.scheme() {
            "https" | "wss" => "wss",
            "http" | "ws" => "ws",
            other => {
                return Err(StoreError::config(format!(
                    "unsupported url scheme for realtime: {other}"
                )));
            }
        };
        url.set_scheme(scheme)
            .map_err(|_| StoreError::config(format!("cannot switch url scheme to {scheme}")))?;
        url.query_pairs_mut()
            .append_pair("apikey", &self.api_key)
            .append_pair("vsn", "1.0.0");
        Ok(url)
    }

    /// Realtime channel topic for the configured table.
    pub fn channel_topic(&self) -> String {
        format!("realtime:{}:{}", self.schema, self.table)
    }
}

impl std::fmt::Debug for StoreSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreSettings")
            .field("base_url", &self.base_url.as_str())
            .field("api_key", &"<redacted>")
            .field("table", &self.table)
            .field("schema", &self.schema)
            .field("request_timeout", &self.request_timeout)
            .field("join_timeout", &self.join_timeout)
            .field("heartbeat_interval", &self.heartbeat_interval)
            .finish()
    }
}

/// Parse the base url and make sure it ends with a slash so `join` appends.
fn normalize_base(raw: &str) -> Result<Url> {
    let trimmed = raw.trim();
    let with_slash = if trimmed.ends_with('/') {
        trimmed.to_string()
    } else {
        format!("{trimmed}/")
    };
    Ok(Url::parse(&with_slash)?)
}
