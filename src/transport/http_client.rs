//! Minimal HTTP client used by the request/response transports.
//!
//! The trait exposes only what long-polling and callback-polling need, so
//! tests can stand in a scripted server.

use std::fs;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;
use url::Url;

use crate::config::ClientOptions;
use crate::utils::TransportError;

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
    /// Selected response headers, lowercase keys.
    pub headers: Vec<(String, String)>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn text(&self) -> Result<&str, TransportError> {
        std::str::from_utf8(&self.body).map_err(|e| TransportError::Decode(e.to_string()))
    }
}

#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn post(
        &self,
        url: &Url,
        headers: &[(&str, &str)],
        body: Vec<u8>,
    ) -> Result<HttpResponse, TransportError>;

    async fn get(&self, url: &Url, headers: &[(&str, &str)])
    -> Result<HttpResponse, TransportError>;
}

/// A [`reqwest`]-backed implementation of [`HttpClient`].
#[derive(Debug, Clone)]
pub struct ReqwestHttpClient {
    inner: reqwest::Client,
}

impl ReqwestHttpClient {
    pub fn new() -> Self {
        Self {
            inner: reqwest::Client::new(),
        }
    }

    /// Honour the `ca` and `proxy` client options.
    pub fn from_options(options: &ClientOptions) -> Result<Self, TransportError> {
        let mut builder = reqwest::Client::builder().connect_timeout(Duration::from_secs(10));

        if let Some(path) = options.ca_path() {
            let pem = fs::read(path)
                .map_err(|e| TransportError::Connect(format!("{}: {e}", path.display())))?;
            let certificates = reqwest::Certificate::from_pem_bundle(&pem)
                .map_err(|e| TransportError::Connect(format!("{}: {e}", path.display())))?;
            builder = builder.tls_built_in_root_certs(false);
            for certificate in certificates {
                builder = builder.add_root_certificate(certificate);
            }
            debug!(ca = %path.display(), "using custom trust roots");
        }

        if let Some(proxy) = &options.proxy {
            let proxy =
                reqwest::Proxy::all(proxy).map_err(|e| TransportError::Connect(e.to_string()))?;
            builder = builder.proxy(proxy);
        }

        let inner = builder
            .build()
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        Ok(Self { inner })
    }

    async fn execute(&self, request: reqwest::RequestBuilder) -> Result<HttpResponse, TransportError> {
        let response = request.send().await?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_lowercase(), v.to_string()))
            })
            .collect();
        let body = response.bytes().await?.to_vec();
        Ok(HttpResponse {
            status,
            body,
            headers,
        })
    }
}

impl Default for ReqwestHttpClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn post(
        &self,
        url: &Url,
        headers: &[(&str, &str)],
        body: Vec<u8>,
    ) -> Result<HttpResponse, TransportError> {
        let mut request = self.inner.post(url.clone());
        for &(name, value) in headers {
            request = request.header(name, value);
        }
        self.execute(request.body(body)).await
    }

    async fn get(
        &self,
        url: &Url,
        headers: &[(&str, &str)],
    ) -> Result<HttpResponse, TransportError> {
        let mut request = self.inner.get(url.clone());
        for &(name, value) in headers {
            request = request.header(name, value);
        }
        self.execute(request).await
    }
}
