//! HTTP client for the chat server.
//!
//! Stream requests run on spawned tasks and report back through a channel of
//! [`StreamEvent`]s, so the UI loop never blocks on the network.

use crate::config::Config;
use crate::events::{RequestId, Route, StreamEvent, StreamEventKind, StreamRequest};
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Error type for client operations.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Server answered with a failure status.
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Failed to parse response.
    #[error("Failed to parse response: {0}")]
    Parse(String),
}

#[derive(Debug, Serialize)]
struct MessageBody<'a> {
    message: &'a str,
}

/// `{ "message": ... }` payload of error and erase responses
#[derive(Debug, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Debug, Deserialize)]
struct RagResponse {
    is_rag: bool,
}

/// Outbound side of the stream controller
pub trait ChatTransport: Send + Sync {
    /// Start a stream request; events for it are sent on `events` until
    /// the stream ends or `cancel` fires.
    fn open_stream(
        &self,
        request: StreamRequest,
        events: mpsc::UnboundedSender<StreamEvent>,
        cancel: CancellationToken,
    );

    /// Fire-and-forget notice that the last turn was erased
    fn notify_erase(&self);
}

/// Client for the chat server
#[derive(Debug, Clone)]
pub struct ChatClient {
    config: Config,
    client: Client,
}

impl ChatClient {
    pub fn new(config: Config) -> Result<Self, ClientError> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout())
            .build()?;
        Ok(Self { config, client })
    }

    fn route_path(&self, route: Route) -> &str {
        match route {
            Route::Chat => &self.config.endpoints.chat_stream,
            Route::SessionStart => &self.config.endpoints.session_start,
            Route::SessionChat => &self.config.endpoints.session_stream,
        }
    }

    /// Ask whether the server will search its reference documents
    pub async fn check_rag(&self, message: &str) -> Result<bool, ClientError> {
        let url = self.config.endpoint_url(&self.config.endpoints.check_rag);
        let response = self
            .client
            .post(&url)
            .json(&MessageBody { message })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::handle_error(response).await);
        }

        let body: RagResponse = response
            .json()
            .await
            .map_err(|e| ClientError::Parse(e.to_string()))?;
        Ok(body.is_rag)
    }

    /// Ask the server to drop the last stored turn
    pub async fn erase(&self) -> Result<String, ClientError> {
        let url = self.config.endpoint_url(&self.config.endpoints.erase);
        let response = self.client.post(&url).send().await?;

        if !response.status().is_success() {
            return Err(Self::handle_error(response).await);
        }

        let body: MessageResponse = response
            .json()
            .await
            .map_err(|e| ClientError::Parse(e.to_string()))?;
        Ok(body.message)
    }

    /// Handle API error responses.
    async fn handle_error(response: reqwest::Response) -> ClientError {
        let status = response.status();
        let message = match response.json::<MessageResponse>().await {
            Ok(err) => err.message,
            Err(_) => status
                .canonical_reason()
                .unwrap_or("Unknown error")
                .to_string(),
        };
        ClientError::Api {
            status: status.as_u16(),
            message,
        }
    }

    /// Run one stream request to completion, reporting through `events`
    pub async fn run_stream(
        &self,
        request: StreamRequest,
        events: mpsc::UnboundedSender<StreamEvent>,
        cancel: CancellationToken,
    ) {
        let id = request.id;
        let send = |kind: StreamEventKind| {
            // receiver gone means the UI has shut down
            let _ = events.send(StreamEvent::new(id, kind));
        };

        if let (Route::Chat, true, Some(message)) =
            (request.route, self.config.check_rag, request.message.as_deref())
        {
            let checked = tokio::select! {
                _ = cancel.cancelled() => return,
                checked = self.check_rag(message) => checked,
            };
            match checked {
                Ok(true) => send(StreamEventKind::Searching),
                Ok(false) => {}
                Err(e) => tracing::warn!(request = %id, "reference check failed: {}", e),
            }
        }

        let url = self.config.endpoint_url(self.route_path(request.route));
        let mut builder = self.client.post(&url);
        if let Some(message) = request.message.as_deref() {
            builder = builder.json(&MessageBody { message });
        }

        tracing::info!(request = %id, url = %url, "opening stream");
        let response = tokio::select! {
            _ = cancel.cancelled() => return,
            response = builder.send() => response,
        };

        let response = match response {
            Ok(response) => response,
            Err(e) => {
                tracing::error!(request = %id, "stream request failed: {}", e);
                send(StreamEventKind::Failed(e.to_string()));
                return;
            }
        };

        if !response.status().is_success() {
            let message = match Self::handle_error(response).await {
                ClientError::Api { message, .. } => message,
                other => other.to_string(),
            };
            tracing::warn!(request = %id, "server rejected stream: {}", message);
            send(StreamEventKind::Rejected { message });
            return;
        }

        send(StreamEventKind::Opened);

        let mut body = response.bytes_stream();
        let mut received = 0usize;
        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!(request = %id, received, "stream cancelled");
                    return;
                }
                next = body.next() => next,
            };

            match next {
                Some(Ok(chunk)) => {
                    received += chunk.len();
                    send(StreamEventKind::Chunk(chunk.to_vec()));
                }
                Some(Err(e)) => {
                    tracing::error!(request = %id, received, "stream interrupted: {}", e);
                    send(StreamEventKind::Failed(e.to_string()));
                    return;
                }
                None => {
                    tracing::info!(request = %id, received, "stream finished");
                    send(StreamEventKind::Finished);
                    return;
                }
            }
        }
    }
}

impl ChatTransport for ChatClient {
    fn open_stream(
        &self,
        request: StreamRequest,
        events: mpsc::UnboundedSender<StreamEvent>,
        cancel: CancellationToken,
    ) {
        let client = self.clone();
        tokio::spawn(async move {
            client.run_stream(request, events, cancel).await;
        });
    }

    fn notify_erase(&self) {
        let client = self.clone();
        tokio::spawn(async move {
            match client.erase().await {
                Ok(message) => tracing::debug!("erase acknowledged: {}", message),
                Err(e) => tracing::warn!("erase notification failed: {}", e),
            }
        });
    }
}
