//! Streaming transport over a WebSocket.
//!
//! One socket carries every message. A writer task drains an unbounded
//! channel into the socket sink, a reader task decodes incoming frames onto
//! the event sink and reports [`TransportEvent::Down`] when the server
//! closes the connection.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use rustls_pki_types::CertificateDer;
use rustls_pki_types::pem::PemObject;
use tokio::sync::mpsc;
use tokio_tungstenite::{Connector, connect_async_tls_with_config};
use tracing::{debug, info, warn};
use tungstenite::client::IntoClientRequest;
use tungstenite::http::HeaderValue;
use tungstenite::protocol::Message as WsMessage;
use url::Url;

use super::{EventSink, Transport, TransportContext, TransportEvent, TransportFactory, TransportId};
use crate::config::ClientOptions;
use crate::protocol::{Message, decode_messages, encode_messages};
use crate::utils::TransportError;

pub const CONNECTION_TYPE: &str = "websocket";

type Writer = Arc<Mutex<Option<mpsc::UnboundedSender<WsMessage>>>>;

pub struct WebSocket {
    id: TransportId,
    url: Url,
    options: Arc<ClientOptions>,
    events: EventSink,
    writer: Writer,
    closing: Arc<AtomicBool>,
}

impl WebSocket {
    pub fn new(url: Url, context: TransportContext) -> Self {
        Self {
            id: TransportId::next(),
            url,
            options: context.options,
            events: context.events,
            writer: Arc::new(Mutex::new(None)),
            closing: Arc::new(AtomicBool::new(false)),
        }
    }

    fn is_open(&self) -> bool {
        self.writer.lock().map(|w| w.is_some()).unwrap_or(false)
    }
}

#[async_trait]
impl Transport for WebSocket {
    fn id(&self) -> TransportId {
        self.id
    }

    fn connection_type(&self) -> &str {
        CONNECTION_TYPE
    }

    fn endpoint(&self) -> &Url {
        &self.url
    }

    async fn connect(&self) -> Result<(), TransportError> {
        if self.is_open() {
            return Ok(());
        }

        let mut request = self.url.as_str().into_client_request()?;
        if !self.options.websocket_extensions.is_empty() {
            let offered = self.options.websocket_extensions.join(", ");
            let value = HeaderValue::from_str(&offered)
                .map_err(|e| TransportError::Connect(format!("websocket extensions: {e}")))?;
            request
                .headers_mut()
                .insert("Sec-WebSocket-Extensions", value);
        }
        let connector = match self.options.ca_path() {
            Some(path) => Some(tls_connector(path)?),
            None => None,
        };

        let (stream, _) = connect_async_tls_with_config(request, None, false, connector)
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        info!(id = %self.id, url = %self.url, "websocket connected");

        let (mut sink, mut source) = stream.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<WsMessage>();

        let id = self.id;
        tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                let closing = matches!(frame, WsMessage::Close(_));
                if let Err(e) = sink.send(frame).await {
                    debug!(%id, "websocket write failed: {e}");
                    break;
                }
                if closing {
                    break;
                }
            }
            debug!(%id, "websocket writer stopped");
        });

        let events = self.events.clone();
        let writer = self.writer.clone();
        let closing = self.closing.clone();
        tokio::spawn(async move {
            while let Some(frame) = source.next().await {
                match frame {
                    Ok(WsMessage::Text(text)) => match decode_messages(text.as_str()) {
                        Ok(messages) => {
                            for message in messages {
                                let _ = events.send(TransportEvent::Message(message));
                            }
                        }
                        Err(e) => warn!(%id, "invalid frame from server: {e}"),
                    },
                    Ok(WsMessage::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        warn!(%id, "websocket read failed: {e}");
                        break;
                    }
                }
            }
            if let Ok(mut writer) = writer.lock() {
                writer.take();
            }
            if !closing.load(Ordering::SeqCst) {
                info!(%id, "websocket closed by peer");
                let _ = events.send(TransportEvent::Down(id));
            }
        });

        if let Ok(mut writer) = self.writer.lock() {
            *writer = Some(tx);
        }
        Ok(())
    }

    async fn send(&self, message: Message) -> Result<(), TransportError> {
        let frame = encode_messages(std::slice::from_ref(&message))?;
        let writer = self
            .writer
            .lock()
            .map_err(|_| TransportError::Closed)?
            .clone()
            .ok_or(TransportError::Closed)?;
        writer
            .send(WsMessage::Text(frame.into()))
            .map_err(|_| TransportError::Closed)
    }

    async fn close(&self) {
        self.closing.store(true, Ordering::SeqCst);
        let writer = self.writer.lock().ok().and_then(|mut w| w.take());
        if let Some(writer) = writer {
            let _ = writer.send(WsMessage::Close(None));
            debug!(id = %self.id, "websocket closing");
        }
    }
}

/// Trust only the certificates in the PEM bundle at `ca`.
fn tls_connector(ca: &Path) -> Result<Connector, TransportError> {
    let invalid = |e: &dyn std::fmt::Display| TransportError::Connect(format!("{}: {e}", ca.display()));

    let mut roots = rustls::RootCertStore::empty();
    for certificate in CertificateDer::pem_file_iter(ca).map_err(|e| invalid(&e))? {
        let certificate = certificate.map_err(|e| invalid(&e))?;
        roots.add(certificate).map_err(|e| invalid(&e))?;
    }

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let config = rustls::ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| invalid(&e))?
        .with_root_certificates(roots)
        .with_no_client_auth();
    Ok(Connector::Rustls(Arc::new(config)))
}

/// Map an HTTP endpoint onto its WebSocket equivalent.
pub fn socket_url(endpoint: &Url) -> Result<Url, TransportError> {
    let scheme = match endpoint.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => return Err(TransportError::Unusable(format!("scheme {other}"))),
    };
    let mut url = endpoint.clone();
    url.set_scheme(scheme)
        .map_err(|_| TransportError::Unusable(endpoint.to_string()))?;
    Ok(url)
}

pub struct WebSocketFactory;

impl TransportFactory for WebSocketFactory {
    fn connection_type(&self) -> &str {
        CONNECTION_TYPE
    }

    /// Proxies are only honoured by the HTTP transports.
    fn is_usable(&self, endpoint: &Url, options: &ClientOptions) -> bool {
        options.proxy.is_none() && socket_url(endpoint).is_ok()
    }

    fn create(
        &self,
        endpoint: Url,
        context: TransportContext,
    ) -> Result<Arc<dyn Transport>, TransportError> {
        Ok(Arc::new(WebSocket::new(socket_url(&endpoint)?, context)))
    }
}
