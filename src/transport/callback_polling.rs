//! Callback-polling: each batch travels URL-encoded in a GET query and the
//! server wraps its replies in a JSONP callback invocation.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use url::Url;
use url::form_urlencoded::byte_serialize;

use super::batching::{BatchRequest, Batcher};
use super::http_client::{HttpClient, ReqwestHttpClient};
use super::{Transport, TransportContext, TransportFactory, TransportId, is_http};
use crate::config::ClientOptions;
use crate::protocol::{Message, decode_messages, encode_messages};
use crate::utils::TransportError;

pub const CONNECTION_TYPE: &str = "callback-polling";

/// Keeps request URLs within what servers and proxies accept.
pub const DEFAULT_MAX_REQUEST_SIZE: usize = 2000;

pub struct JsonpRequest {
    url: Url,
    http: Arc<dyn HttpClient>,
    callbacks: AtomicU64,
}

impl JsonpRequest {
    fn url_with(&self, messages: &str, callback: &str) -> Url {
        let mut url = self.url.clone();
        url.query_pairs_mut()
            .append_pair("message", messages)
            .append_pair("jsonp", callback);
        url
    }
}

#[async_trait]
impl BatchRequest for JsonpRequest {
    async fn request(&self, messages: Vec<Message>) -> Result<Vec<Message>, TransportError> {
        let callback = format!(
            "__jsonp{}__",
            self.callbacks.fetch_add(1, Ordering::Relaxed) + 1
        );
        let url = self.url_with(&encode_messages(&messages)?, &callback);
        let response = self.http.get(&url, &[]).await?;
        if !response.is_success() {
            return Err(TransportError::Http {
                status: response.status,
            });
        }
        let payload = unwrap_jsonp(response.text()?, &callback)?;
        Ok(decode_messages(payload)?)
    }

    fn encoded_len(&self, messages: &[Message]) -> usize {
        let Ok(json) = encode_messages(messages) else {
            return usize::MAX;
        };
        self.url.as_str().len() + byte_serialize(json.as_bytes()).map(str::len).sum::<usize>()
    }
}

/// Extract the argument of `callback(...)`, tolerating the `/**/` prefix
/// and trailing semicolon servers commonly add.
pub fn unwrap_jsonp<'a>(body: &'a str, callback: &str) -> Result<&'a str, TransportError> {
    let body = body.trim();
    let body = body.strip_prefix("/**/").unwrap_or(body).trim_start();
    let args = body
        .strip_prefix(callback)
        .map(str::trim_start)
        .and_then(|rest| rest.strip_prefix('('))
        .ok_or_else(|| TransportError::Decode(format!("expected a call to {callback}")))?;
    let args = args.trim_end();
    let args = args.strip_suffix(';').unwrap_or(args).trim_end();
    args.strip_suffix(')')
        .ok_or_else(|| TransportError::Decode("unterminated callback".to_string()))
}

pub struct CallbackPolling {
    id: TransportId,
    batcher: Batcher<JsonpRequest>,
}

impl CallbackPolling {
    pub fn new(url: Url, http: Arc<dyn HttpClient>, context: TransportContext) -> Self {
        let max_request_size = context
            .options
            .max_request_size
            .unwrap_or(DEFAULT_MAX_REQUEST_SIZE);
        Self {
            id: TransportId::next(),
            batcher: Batcher::new(
                JsonpRequest {
                    url,
                    http,
                    callbacks: AtomicU64::new(0),
                },
                context.events,
                max_request_size,
                Duration::ZERO,
            ),
        }
    }
}

#[async_trait]
impl Transport for CallbackPolling {
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

#[derive(Default)]
pub struct CallbackPollingFactory {
    http: Option<Arc<dyn HttpClient>>,
}

impl CallbackPollingFactory {
    pub fn with_client(http: Arc<dyn HttpClient>) -> Self {
        Self { http: Some(http) }
    }
}

impl TransportFactory for CallbackPollingFactory {
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
        Ok(Arc::new(CallbackPolling::new(endpoint, http, context)))
    }
}
