use serde::Deserialize;
use serde_json::Value;

use crate::error::RelayError;

pub const DEFAULT_TEMPERATURE: f64 = 0.7;
pub const DEFAULT_TOP_P: f64 = 0.9;

/// Validated body of `POST /api/chat`.
#[derive(Debug, Clone, PartialEq)]
pub struct PromptRequest {
    pub user_message: String,
    pub system_prompt: String,
    pub temperature: f64,
    pub top_p: f64,
}

/// Wire shape before validation. Fields stay as raw JSON so that a wrong
/// type becomes a 400 with our own message rather than a serde error.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPromptRequest {
    user_message: Option<Value>,
    system_prompt: Option<Value>,
    temperature: Option<Value>,
    #[serde(rename = "top_p")]
    top_p: Option<Value>,
}

impl PromptRequest {
    /// Parse and validate a request body.
    ///
    /// Checks run in order and the first failure wins: body present, body is
    /// JSON, both prompts present, sampling parameters numeric. `temperature`
    /// and `top_p` fall back to their defaults only when absent or `null`, so
    /// an explicit `0` is kept.
    pub fn from_body(body: &[u8]) -> Result<Self, RelayError> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Err(body_required());
        }

        let value: Value = serde_json::from_slice(body)
            .map_err(|_| RelayError::BadRequest("Request body must be valid JSON".to_string()))?;
        if value.is_null() {
            return Err(body_required());
        }

        // Non-object JSON (arrays, numbers) carries no fields at all.
        let raw: RawPromptRequest = if value.is_object() {
            serde_json::from_value(value).unwrap_or_default()
        } else {
            RawPromptRequest::default()
        };

        let (Some(user_message), Some(system_prompt)) = (
            required_text(raw.user_message),
            required_text(raw.system_prompt),
        ) else {
            return Err(RelayError::BadRequest(
                "userMessage and systemPrompt are required".to_string(),
            ));
        };

        let temperature = sampling_param(raw.temperature, "temperature", DEFAULT_TEMPERATURE)?;
        let top_p = sampling_param(raw.top_p, "top_p", DEFAULT_TOP_P)?;

        if !(0.0..=1.0).contains(&temperature) || !(0.0..=1.0).contains(&top_p) {
            tracing::debug!(temperature, top_p, "sampling parameters outside [0, 1]");
        }

        Ok(Self {
            user_message,
            system_prompt,
            temperature,
            top_p,
        })
    }
}

fn body_required() -> RelayError {
    RelayError::BadRequest("Request body is required".to_string())
}

fn required_text(value: Option<Value>) -> Option<String> {
    match value {
        Some(Value::String(s)) if !s.is_empty() => Some(s),
        _ => None,
    }
}

fn sampling_param(value: Option<Value>, name: &str, default: f64) -> Result<f64, RelayError> {
    match value {
        None | Some(Value::Null) => Ok(default),
        Some(Value::Number(n)) => n
            .as_f64()
            .ok_or_else(|| RelayError::BadRequest(format!("{name} must be a number"))),
        Some(_) => Err(RelayError::BadRequest(format!("{name} must be a number"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(body: &str) -> Result<PromptRequest, RelayError> {
        PromptRequest::from_body(body.as_bytes())
    }

    fn error_message(result: Result<PromptRequest, RelayError>) -> String {
        match result {
            Err(RelayError::BadRequest(msg)) => msg,
            other => panic!("expected bad request, got {other:?}"),
        }
    }

    #[test]
    fn whitespace_body_counts_as_missing() {
        assert_eq!(error_message(parse("  \n")), "Request body is required");
    }

    #[test]
    fn missing_body_is_checked_before_fields() {
        assert_eq!(error_message(parse("")), "Request body is required");
        assert_eq!(
            error_message(parse("{}")),
            "userMessage and systemPrompt are required"
        );
    }

    #[test]
    fn non_object_json_lacks_required_fields() {
        assert_eq!(
            error_message(parse("[1, 2]")),
            "userMessage and systemPrompt are required"
        );
    }

    #[test]
    fn non_string_prompt_is_missing() {
        assert_eq!(
            error_message(parse(r#"{"userMessage": 5, "systemPrompt": "s"}"#)),
            "userMessage and systemPrompt are required"
        );
    }

    #[test]
    fn required_fields_are_checked_before_sampling_params() {
        assert_eq!(
            error_message(parse(r#"{"temperature": "hot"}"#)),
            "userMessage and systemPrompt are required"
        );
    }

    #[test]
    fn integer_sampling_params_are_accepted() {
        let req = parse(r#"{"userMessage": "u", "systemPrompt": "s", "temperature": 1, "top_p": 0}"#)
            .unwrap();
        assert_eq!(req.temperature, 1.0);
        assert_eq!(req.top_p, 0.0);
    }

    #[test]
    fn defaults_fill_absent_params() {
        let req = parse(r#"{"userMessage": "u", "systemPrompt": "s"}"#).unwrap();
        assert_eq!(req.temperature, DEFAULT_TEMPERATURE);
        assert_eq!(req.top_p, DEFAULT_TOP_P);
        assert_eq!(req.user_message, "u");
        assert_eq!(req.system_prompt, "s");
    }

    #[test]
    fn boolean_top_p_is_rejected() {
        assert_eq!(
            error_message(parse(r#"{"userMessage": "u", "systemPrompt": "s", "top_p": true}"#)),
            "top_p must be a number"
        );
    }
}
