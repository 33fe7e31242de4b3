//! WebSocket client for the job event source.
//!
//! [`SocketClient`] holds the connection configuration for the push
//! endpoint: a Socket.IO URL such as `http://host:3000/poem`, whose path
//! names the namespace. Call [`SocketClient::connect`] to open the
//! underlying Engine.IO WebSocket as a live [`SocketConnection`].

use reqwest::Url;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::{connect_async, MaybeTlsStream};

use crate::packet::{DEFAULT_NAMESPACE, ENGINE_PATH, ENGINE_PROTOCOL};

/// The raw stream type produced by [`SocketClient::connect`].
pub type SocketStream = tokio_tungstenite::WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Configuration handle for the push endpoint.
#[derive(Debug, Clone)]
pub struct SocketClient {
    socket_url: String,
    namespace: String,
    access_token: Option<String>,
}

/// A live WebSocket connection to the event source.
pub struct SocketConnection {
    /// Unique client ID sent during the WebSocket handshake.
    pub client_id: String,
    /// The raw WebSocket stream for reading/writing frames.
    pub ws_stream: SocketStream,
}

impl SocketClient {
    /// * `socket_url` - `http(s)` or `ws(s)` URL of the Socket.IO
    ///   namespace, e.g. `http://host:3000/poem`.
    pub fn new(socket_url: String) -> Self {
        let namespace = namespace_of(&socket_url);
        Self {
            socket_url,
            namespace,
            access_token: None,
        }
    }

    /// Send `Authorization: Bearer <token>` on the handshake.
    pub fn with_access_token(mut self, token: Option<String>) -> Self {
        self.access_token = token;
        self
    }

    /// Socket.IO namespace named by the URL path, `/` when there is none.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// The Engine.IO WebSocket endpoint for this client:
    /// `ws(s)://host/socket.io/?EIO=4&transport=websocket&clientId=..`.
    pub fn engine_url(&self, client_id: &str) -> Result<Url, ClientError> {
        let mut url = Url::parse(&self.socket_url)
            .map_err(|e| ClientError::Request(format!("Invalid socket URL {}: {e}", self.socket_url)))?;
        let scheme = match url.scheme() {
            "http" | "ws" => "ws",
            "https" | "wss" => "wss",
            other => {
                return Err(ClientError::Request(format!(
                    "Unsupported socket URL scheme {other}"
                )))
            }
        };
        url.set_scheme(scheme)
            .map_err(|()| ClientError::Request(format!("Cannot use {scheme} for {}", self.socket_url)))?;
        url.set_path(ENGINE_PATH);
        url.set_fragment(None);
        url.query_pairs_mut()
            .clear()
            .append_pair("EIO", ENGINE_PROTOCOL)
            .append_pair("transport", "websocket")
            .append_pair("clientId", client_id);
        Ok(url)
    }

    /// Open the Engine.IO WebSocket.
    ///
    /// Generates a unique `client_id` (UUID v4) and appends it as a
    /// query parameter so server-side logs can correlate this socket.
    /// The Engine.IO and namespace handshakes happen on the stream
    /// afterwards.
    pub async fn connect(&self) -> Result<SocketConnection, ClientError> {
        let client_id = uuid::Uuid::new_v4().to_string();
        let url = self.engine_url(&client_id)?;

        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| ClientError::Request(format!("Invalid socket URL {url}: {e}")))?;
        if let Some(token) = &self.access_token {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| ClientError::Request(format!("Invalid access token: {e}")))?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }

        let (ws_stream, _response) = connect_async(request).await.map_err(|e| {
            ClientError::Connection(format!("Failed to connect to {}: {e}", self.socket_url))
        })?;

        tracing::info!(
            client_id = %client_id,
            namespace = %self.namespace,
            "Connected to event source at {}",
            self.socket_url,
        );

        Ok(SocketConnection {
            client_id,
            ws_stream,
        })
    }
}

fn namespace_of(socket_url: &str) -> String {
    let Ok(url) = Url::parse(socket_url) else {
        return DEFAULT_NAMESPACE.to_string();
    };
    match url.path().trim_end_matches('/') {
        "" => DEFAULT_NAMESPACE.to_string(),
        path => path.to_string(),
    }
}

/// Errors that can occur when working with the WebSocket client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The handshake request could not be built.
    #[error("Request error: {0}")]
    Request(String),

    /// Failed to establish the WebSocket connection.
    #[error("Connection error: {0}")]
    Connection(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_url_targets_socket_io_endpoint() {
        let client = SocketClient::new("http://localhost:3000/poem".into());
        assert_eq!(client.namespace(), "/poem");
        assert_eq!(
            client.engine_url("c1").unwrap().as_str(),
            "ws://localhost:3000/socket.io/?EIO=4&transport=websocket&clientId=c1"
        );
    }

    #[test]
    fn engine_url_keeps_tls_and_drops_old_query() {
        let client = SocketClient::new("https://api.example.com/poem/?debug=1".into());
        assert_eq!(client.namespace(), "/poem");
        assert_eq!(
            client.engine_url("c1").unwrap().as_str(),
            "wss://api.example.com/socket.io/?EIO=4&transport=websocket&clientId=c1"
        );
    }

    #[test]
    fn bare_host_uses_default_namespace() {
        assert_eq!(SocketClient::new("ws://localhost:3000".into()).namespace(), "/");
        assert_eq!(SocketClient::new("not a url".into()).namespace(), "/");
    }

    #[test]
    fn unsupported_scheme_is_a_request_error() {
        let client = SocketClient::new("ftp://localhost/poem".into());
        assert!(matches!(client.engine_url("c1"), Err(ClientError::Request(_))));
    }

    #[tokio::test]
    async fn connect_to_closed_port_fails_with_connection_error() {
        let client = SocketClient::new("ws://127.0.0.1:1/poem".into());
        let err = client.connect().await.err().expect("nothing listens on port 1");
        assert!(matches!(err, ClientError::Connection(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn connect_with_garbage_url_fails_with_request_error() {
        let client = SocketClient::new("not a url".into());
        let err = client.connect().await.err().expect("url is invalid");
        assert!(matches!(err, ClientError::Request(_)), "got {err:?}");
    }
}
