//! WebSocket client for the generation service push channel.
//!
//! [`PushClient`] holds the push endpoint. Call [`PushClient::connect`]
//! to establish a live [`PushConnection`].

use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

/// The raw WebSocket stream of a push connection.
pub type PushStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Configuration handle for the push endpoint.
#[derive(Debug, Clone)]
pub struct PushClient {
    ws_url: String,
}

/// A live WebSocket connection to the push endpoint.
pub struct PushConnection {
    /// Unique client ID sent during the handshake, used in logs.
    pub client_id: String,
    /// The raw WebSocket stream for reading/writing frames.
    pub ws_stream: PushStream,
}

impl PushClient {
    /// * `ws_url` - full endpoint URL, e.g. `ws://host:8000/ws`.
    pub fn new(ws_url: String) -> Self {
        Self { ws_url }
    }

    pub fn ws_url(&self) -> &str {
        &self.ws_url
    }

    /// Connect to the push endpoint.
    ///
    /// Generates a `client_id` (UUID v4) and appends it as a query
    /// parameter so both sides can correlate the connection in logs.
    pub async fn connect(&self) -> Result<PushConnection, PushClientError> {
        let client_id = uuid::Uuid::new_v4().to_string();
        let separator = if self.ws_url.contains('?') { '&' } else { '?' };
        let url = format!("{}{separator}clientId={client_id}", self.ws_url);

        let (ws_stream, _response) = connect_async(&url).await.map_err(|e| {
            PushClientError::Connection(format!(
                "Failed to connect to push channel at {}: {e}",
                self.ws_url
            ))
        })?;

        tracing::info!(
            client_id = %client_id,
            "Connected to push channel at {}",
            self.ws_url,
        );

        Ok(PushConnection {
            client_id,
            ws_stream,
        })
    }
}

/// Errors that can occur when working with the push client.
#[derive(Debug, thiserror::Error)]
pub enum PushClientError {
    /// Failed to establish the WebSocket connection.
    #[error("Connection error: {0}")]
    Connection(String),
}
