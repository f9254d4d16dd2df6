//! HTTP long-polling: each batch is POSTed as a JSON array and the response
//! body carries the replies.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use url::Url;

use super::batching::{BatchRequest, Batcher};
use super::http_client::{HttpClient, ReqwestHttpClient};
use super::{Transport, TransportContext, TransportFactory, TransportId, is_http};
use crate::config::ClientOptions;
use crate::protocol::{Message, decode_messages, encode_messages};
use crate::utils::TransportError;

pub const CONNECTION_TYPE: &str = "long-polling";

pub const DEFAULT_MAX_REQUEST_SIZE: usize = 1024 * 1024;

pub struct PostRequest {
    url: Url,
    http: Arc<dyn HttpClient>,
}

#[async_trait]
impl BatchRequest for PostRequest {
    async fn request(&self, messages: Vec<Message>) -> Result<Vec<Message>, TransportError> {
        let body = encode_messages(&messages)?;
        let response = self
            .http
            .post(
                &self.url,
                &[("Content-Type", "application/json; charset=utf-8")],
                body.into_bytes(),
            )
            .await?;
        if !response.is_success() {
            return Err(TransportError::Http {
                status: response.status,
            });
        }
        Ok(decode_messages(response.text()?)?)
    }
}

pub struct LongPolling {
    id: TransportId,
    batcher: Batcher<PostRequest>,
}

impl LongPolling {
    pub fn new(url: Url, http: Arc<dyn HttpClient>, context: TransportContext) -> Self {
        let max_request_size = context
            .options
            .max_request_size
            .unwrap_or(DEFAULT_MAX_REQUEST_SIZE);
        Self {
            id: TransportId::next(),
            batcher: Batcher::new(
                PostRequest { url, http },
                context.events,
                max_request_size,
                Duration::ZERO,
            ),
        }
    }
}

#[async_trait]
impl Transport for LongPolling {
    fn id(&self) -> TransportId {
        self.id
    }

    fn connection_type(&self) -> &str {
        CONNECTION_TYPE
    }

    fn endpoint(&self) -> &Url {
        &self.batcher.request().url
    }

    async fn send(&self, message: Message) -> Result<(), TransportError> {
        self.batcher.send(message).await
    }

    async fn close(&self) {
        self.batcher.close();
    }
}

/// Builds [`LongPolling`] transports. Without an explicit HTTP client one is
/// built from the client options on every `create`.
#[derive(Default)]
pub struct LongPollingFactory {
    http: Option<Arc<dyn HttpClient>>,
}

impl LongPollingFactory {
    pub fn with_client(http: Arc<dyn HttpClient>) -> Self {
        Self { http: Some(http) }
    }
}

impl TransportFactory for LongPollingFactory {
    fn connection_type(&self) -> &str {
        CONNECTION_TYPE
    }

    fn is_usable(&self, endpoint: &Url, _options: &ClientOptions) -> bool {
        is_http(endpoint)
    }

    fn create(
        &self,
        endpoint: Url,
        context: TransportContext,
    ) -> Result<Arc<dyn Transport>, TransportError> {
        let http = match &self.http {
            Some(http) => http.clone(),
            None => Arc::new(ReqwestHttpClient::from_options(&context.options)?),
        };
        Ok(Arc::new(LongPolling::new(endpoint, http, context)))
    }
}
