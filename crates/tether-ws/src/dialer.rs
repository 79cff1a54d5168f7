//! Dialing: handshake request construction and `connect_async`.

use std::sync::Arc;

use async_trait::async_trait;
use tether_core::{ConnectionPtr, DialOptions, Dialer, TransportError};
use tokio_tungstenite::connect_async_with_config;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tracing::debug;

use crate::config::WsConfig;
use crate::connection::WsConnection;
use crate::errors::map_ws_error;

/// Opens WebSocket connections (`ws://` and `wss://`).
#[derive(Clone, Debug, Default)]
pub struct WsDialer {
    config: WsConfig,
}

impl WsDialer {
    /// Dialer with the given connection settings.
    pub fn new(config: WsConfig) -> Self {
        Self { config }
    }

    /// Connection settings.
    pub fn config(&self) -> &WsConfig {
        &self.config
    }
}

#[async_trait]
impl Dialer for WsDialer {
    async fn dial(
        &self,
        endpoint: &str,
        options: &DialOptions,
    ) -> Result<ConnectionPtr, TransportError> {
        let request = build_request(endpoint, options)?;
        let ws_config = WebSocketConfig::default()
            .max_message_size(self.config.max_message_size)
            .max_frame_size(self.config.max_message_size);

        let connecting = connect_async_with_config(request, Some(ws_config), true);
        let (stream, response) = match options.connect_timeout {
            Some(limit) => tokio::time::timeout(limit, connecting)
                .await
                .map_err(|_| TransportError::Timeout(limit))?,
            None => connecting.await,
        }
        .map_err(map_ws_error)?;

        let protocol = response
            .headers()
            .get(SEC_WEBSOCKET_PROTOCOL)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        debug!(%endpoint, status = %response.status(), protocol, "websocket connected");

        Ok(Arc::new(WsConnection::new(stream, &self.config)))
    }
}

/// Handshake request for `endpoint` carrying the dial options.
pub(crate) fn build_request(
    endpoint: &str,
    options: &DialOptions,
) -> Result<Request, TransportError> {
    let invalid = |message: String| TransportError::InvalidEndpoint {
        endpoint: endpoint.to_owned(),
        message,
    };

    let mut request = endpoint
        .into_client_request()
        .map_err(|e| invalid(e.to_string()))?;

    let headers = request.headers_mut();
    for (name, value) in &options.headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| invalid(format!("header name {name:?}: {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| invalid(format!("header value for {name}: {e}")))?;
        let _ = headers.append(name, value);
    }

    if !options.subprotocols.is_empty() {
        let joined = options.subprotocols.join(", ");
        let value = HeaderValue::from_str(&joined)
            .map_err(|e| invalid(format!("subprotocols {joined:?}: {e}")))?;
        let _ = headers.insert(SEC_WEBSOCKET_PROTOCOL, value);
    }

    Ok(request)
}
