use std::time::Duration;

use eventsource_stream::{EventStreamError, Eventsource};
use futures_util::stream::BoxStream;
use futures_util::{Stream, StreamExt, TryStreamExt, future};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;

use crate::config::Config;
use crate::dispatch::CompletionRequest;
use crate::error::RelayError;

/// Cap on how much of an upstream error body is read into the `details` payload.
pub const MAX_ERROR_BODY_BYTES: usize = 64 * 1024;

const DONE_SENTINEL: &str = "[DONE]";

/// Content deltas of one upstream completion, in arrival order.
pub type DeltaStream = BoxStream<'static, Result<String, RelayError>>;

pub struct HttpDispatch {
    client: Client,
    url: String,
    api_key: String,
    headers_timeout: Duration,
}

impl std::fmt::Debug for HttpDispatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpDispatch")
            .field("url", &self.url)
            .field("api_key", &"[REDACTED]")
            .field("headers_timeout", &self.headers_timeout)
            .finish()
    }
}

/// One `data:` frame of an OpenAI-compatible completion stream.
#[derive(Deserialize)]
struct ChatCompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    #[serde(default)]
    error: Option<Value>,
}

#[derive(Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: Option<Delta>,
}

#[derive(Deserialize)]
struct Delta {
    content: Option<String>,
}

enum Frame {
    Text(String),
    Empty,
    Done,
}

impl HttpDispatch {
    pub fn new(config: &Config) -> Result<Self, RelayError> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(4)
            .build()?;

        Ok(Self {
            client,
            url: config.completions_url(),
            api_key: config.api_key.clone(),
            headers_timeout: config.headers_timeout,
        })
    }

    /// Start a streamed completion and return its text deltas in arrival order.
    ///
    /// Failures before the first byte (connect, headers timeout, non-2xx) are
    /// returned here; failures after that surface as an `Err` item and end
    /// the stream. Dropping the stream drops the upstream connection.
    pub async fn stream_completion(
        &self,
        req: &CompletionRequest,
    ) -> Result<DeltaStream, RelayError> {
        let send = self
            .client
            .post(&self.url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Accept", "text/event-stream")
            .json(&req.to_body())
            .send();

        let response = tokio::time::timeout(self.headers_timeout, send)
            .await
            .map_err(|_| {
                RelayError::Timeout(
                    u64::try_from(self.headers_timeout.as_millis()).unwrap_or(u64::MAX),
                )
            })?
            .map_err(RelayError::from_transport)?;

        let status = response.status();
        if !status.is_success() {
            let details = read_error_details(response).await;
            return Err(RelayError::Upstream {
                status: Some(status.as_u16()),
                details,
            });
        }

        tracing::debug!(model = %req.model, "upstream stream opened");
        Ok(delta_stream(response).boxed())
    }

    /// Consume the whole stream and return the concatenated text.
    /// An empty result is an error, not an empty success.
    pub async fn complete(&self, req: &CompletionRequest) -> Result<String, RelayError> {
        let text: String = self
            .stream_completion(req)
            .await?
            .try_fold(String::new(), |mut acc, delta| {
                acc.push_str(&delta);
                future::ready(Ok(acc))
            })
            .await?;

        if text.is_empty() {
            return Err(RelayError::EmptyResponse);
        }
        tracing::debug!(model = %req.model, chars = text.len(), "completion aggregated");
        Ok(text)
    }
}

/// Turn an SSE response into non-empty content deltas, stopping at `[DONE]`.
fn delta_stream(
    response: reqwest::Response,
) -> impl Stream<Item = Result<String, RelayError>> + Send + 'static {
    response
        .bytes_stream()
        .eventsource()
        .map(|event| match event {
            Ok(event) => parse_frame(&event.data),
            Err(EventStreamError::Transport(e)) => Err(RelayError::from_transport(e)),
            Err(e) => Err(RelayError::SchemaParse(format!("malformed event stream: {e}"))),
        })
        .take_while(|frame| future::ready(!matches!(frame, Ok(Frame::Done))))
        .filter_map(|frame| {
            future::ready(match frame {
                Ok(Frame::Text(text)) => Some(Ok(text)),
                Ok(Frame::Empty | Frame::Done) => None,
                Err(e) => Some(Err(e)),
            })
        })
}

fn parse_frame(data: &str) -> Result<Frame, RelayError> {
    let data = data.trim();
    if data == DONE_SENTINEL {
        return Ok(Frame::Done);
    }
    if data.is_empty() {
        return Ok(Frame::Empty);
    }

    let chunk: ChatCompletionChunk = serde_json::from_str(data)
        .map_err(|e| RelayError::SchemaParse(format!("failed to parse stream chunk: {e}")))?;

    if let Some(details) = chunk.error {
        return Err(RelayError::Upstream {
            status: None,
            details,
        });
    }

    let content = chunk
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.delta)
        .and_then(|d| d.content)
        .filter(|c| !c.is_empty());

    Ok(content.map_or(Frame::Empty, Frame::Text))
}

/// Upstream error payload as JSON when it parses, otherwise as text.
/// Reading stops at `MAX_ERROR_BODY_BYTES`; the rest is never buffered.
async fn read_error_details(response: reqwest::Response) -> Value {
    let mut body = Vec::new();
    let mut chunks = response.bytes_stream();
    while let Some(Ok(chunk)) = chunks.next().await {
        let room = MAX_ERROR_BODY_BYTES - body.len();
        body.extend_from_slice(&chunk[..chunk.len().min(room)]);
        if body.len() >= MAX_ERROR_BODY_BYTES {
            break;
        }
    }
    serde_json::from_slice(&body)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&body).into_owned()))
}
