use serde::Serialize;

/// Aggregating-mode body of a successful `/api/chat` call.
#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub response: String,
}

/// Body of `/api/context`: the rendered block and the full message a client
/// would submit as `userMessage`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextResponse {
    pub context: String,
    pub user_message: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

impl HealthResponse {
    pub fn ok() -> Self {
        Self {
            status: "ok",
            version: env!("CARGO_PKG_VERSION"),
        }
    }
}
