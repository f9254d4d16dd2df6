use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::utils::error::{Error, Result};

/// Top-level configuration for the `bayeux` binary.
///
/// Holds the broker endpoint, the log level and the options handed to the
/// client.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub endpoint: String,
    pub log_level: String,
    pub client: ClientOptions,
}

/// Options recognised by [`crate::client::Client`] construction.
///
/// Durations are expressed in seconds, as in the configuration files.
/// Unknown keys are rejected.
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(deny_unknown_fields, rename_all = "camelCase", default)]
pub struct ClientOptions {
    /// Wait before re-handshaking, until the server advises otherwise.
    pub interval: f64,
    /// Connection timeout.
    pub timeout: f64,
    /// Base interval between delivery attempts.
    pub retry: f64,
    /// Per connection type endpoint overrides.
    pub endpoints: HashMap<String, String>,
    /// Restrict the transports the client may use.
    pub connection_types: Option<Vec<String>>,
    /// Transports never to use.
    pub disabled: Vec<String>,
    /// Offered in the `Sec-WebSocket-Extensions` header.
    pub websocket_extensions: Vec<String>,
    pub tls: Option<TlsOptions>,
    /// Shorthand for `tls.ca`.
    pub ca: Option<PathBuf>,
    /// Proxy URL used by the HTTP transports.
    pub proxy: Option<String>,
    /// Upper bound on the encoded size of one batched request.
    pub max_request_size: Option<usize>,
}

/// TLS settings shared by every transport.
#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct TlsOptions {
    /// PEM bundle replacing the default trust roots.
    pub ca: Option<PathBuf>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            interval: 0.0,
            timeout: 60.0,
            retry: 5.0,
            endpoints: HashMap::new(),
            connection_types: None,
            disabled: Vec::new(),
            websocket_extensions: Vec::new(),
            tls: None,
            ca: None,
            proxy: None,
            max_request_size: None,
        }
    }
}

impl ClientOptions {
    /// Build options from a loosely typed value, rejecting unknown keys.
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        serde_json::from_value(value).map_err(|e| Error::Config(e.to_string()))
    }

    pub fn interval(&self) -> Duration {
        seconds(self.interval)
    }

    pub fn timeout(&self) -> Duration {
        seconds(self.timeout)
    }

    pub fn retry(&self) -> Duration {
        seconds(self.retry)
    }

    /// The CA bundle path, whichever of `ca` and `tls.ca` carries it.
    pub fn ca_path(&self) -> Option<&PathBuf> {
        self.ca
            .as_ref()
            .or_else(|| self.tls.as_ref().and_then(|tls| tls.ca.as_ref()))
    }

    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("interval", self.interval),
            ("timeout", self.timeout),
            ("retry", self.retry),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(Error::Config(format!("{name} must be a non-negative number")));
            }
        }
        if let Some(proxy) = &self.proxy {
            url::Url::parse(proxy).map_err(|e| Error::Config(format!("proxy: {e}")))?;
        }
        for (connection_type, endpoint) in &self.endpoints {
            url::Url::parse(endpoint)
                .map_err(|e| Error::Config(format!("endpoint for {connection_type}: {e}")))?;
        }
        Ok(())
    }
}

fn seconds(value: f64) -> Duration {
    Duration::from_secs_f64(value.max(0.0))
}

/// Partial configuration settings loaded from files or environment.
///
/// Missing values are filled from [`Settings::default`].
#[derive(Debug, Deserialize)]
pub struct PartialSettings {
    pub endpoint: Option<String>,
    pub log_level: Option<String>,
    pub client: Option<PartialClientOptions>,
}

/// Partial client options.
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct PartialClientOptions {
    pub interval: Option<f64>,
    pub timeout: Option<f64>,
    pub retry: Option<f64>,
    pub endpoints: Option<HashMap<String, String>>,
    // environment keys arrive lowercased
    #[serde(alias = "connectiontypes")]
    pub connection_types: Option<Vec<String>>,
    pub disabled: Option<Vec<String>>,
    #[serde(alias = "websocketextensions")]
    pub websocket_extensions: Option<Vec<String>>,
    pub tls: Option<TlsOptions>,
    pub ca: Option<PathBuf>,
    pub proxy: Option<String>,
    #[serde(alias = "maxrequestsize")]
    pub max_request_size: Option<usize>,
}

impl PartialClientOptions {
    pub fn merge_into(self, default: ClientOptions) -> ClientOptions {
        ClientOptions {
            interval: self.interval.unwrap_or(default.interval),
            timeout: self.timeout.unwrap_or(default.timeout),
            retry: self.retry.unwrap_or(default.retry),
            endpoints: self.endpoints.unwrap_or(default.endpoints),
            connection_types: self.connection_types.or(default.connection_types),
            disabled: self.disabled.unwrap_or(default.disabled),
            websocket_extensions: self
                .websocket_extensions
                .unwrap_or(default.websocket_extensions),
            tls: self.tls.or(default.tls),
            ca: self.ca.or(default.ca),
            proxy: self.proxy.or(default.proxy),
            max_request_size: self.max_request_size.or(default.max_request_size),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:8000/bayeux".to_string(),
            log_level: "info".to_string(),
            client: ClientOptions::default(),
        }
    }
}
