use std::error::Error as _;

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::{Value, json};
use thiserror::Error;

/// Startup-class failures. These stop the process; they never reach a client.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing GLHF_API_KEY environment variable")]
    MissingApiKey,

    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },

    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },
}

/// Per-request failures of the completion relay.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("{0}")]
    BadRequest(String),

    #[error("invalid file context: {0}")]
    InvalidContext(String),

    /// The upstream answered with an error: a non-2xx status, or an `error`
    /// object inside the event stream (no status).
    #[error("upstream API error ({status:?}): {details}")]
    Upstream { status: Option<u16>, details: Value },

    /// Connection refused, reset or aborted before or during the call.
    #[error("failed to connect to upstream: {0}")]
    Connect(String),

    #[error("timeout after {0}ms")]
    Timeout(u64),

    #[error("No response generated")]
    EmptyResponse,

    #[error("schema parse error: {0}")]
    SchemaParse(String),

    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),
}

impl RelayError {
    /// Classify a transport error. Connection-level failures become
    /// [`RelayError::Connect`]; everything else stays a request error.
    pub fn from_transport(err: reqwest::Error) -> Self {
        if is_connection_error(&err) {
            Self::Connect(err.to_string())
        } else {
            Self::Request(err)
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) | Self::InvalidContext(_) => StatusCode::BAD_REQUEST,
            Self::Upstream { status, .. } => status
                .and_then(|s| StatusCode::from_u16(s).ok())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            Self::Connect(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// JSON payload sent to the client. `include_stack` adds the error's
    /// source chain to internal failures; only set it in development.
    pub fn body(&self, include_stack: bool) -> Value {
        match self {
            Self::BadRequest(msg) => json!({ "error": msg }),
            Self::InvalidContext(_) => json!({ "error": self.to_string() }),
            Self::Upstream { details, .. } => json!({
                "error": "API Error",
                "details": details,
            }),
            Self::Connect(_) => json!({ "error": "Failed to connect to API" }),
            _ => {
                let mut body = json!({
                    "error": "Error generating response",
                    "message": self.to_string(),
                });
                if include_stack {
                    body["stack"] = Value::String(self.chain());
                }
                body
            }
        }
    }

    /// Render as an HTTP response, logging internal failures.
    pub fn into_http_response(self, include_stack: bool) -> Response {
        let status = self.status();
        match &self {
            Self::BadRequest(_) | Self::InvalidContext(_) => {}
            Self::Upstream { .. } | Self::Connect(_) => {
                tracing::warn!(status = status.as_u16(), "upstream failure: {self}");
            }
            _ => tracing::error!(error = ?self, "error generating response"),
        }
        (status, Json(self.body(include_stack))).into_response()
    }

    /// `Display` of this error followed by each source, one per line.
    fn chain(&self) -> String {
        let mut out = format!("{self}");
        let mut source = self.source();
        while let Some(err) = source {
            out.push_str(&format!("\n    caused by: {err}"));
            source = err.source();
        }
        out
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        self.into_http_response(false)
    }
}

/// True if any error in the chain is a refused, reset or aborted connection.
/// Other connect-phase failures (DNS, TLS, connect timeout) are not.
pub fn is_connection_error(err: &reqwest::Error) -> bool {
    let mut source = err.source();
    while let Some(e) = source {
        if let Some(io) = e.downcast_ref::<std::io::Error>()
            && matches!(
                io.kind(),
                std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
            )
        {
            return true;
        }
        source = e.source();
    }
    false
}
