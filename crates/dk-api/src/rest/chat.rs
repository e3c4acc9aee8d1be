use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::{Extension, Json};
use dk_config::LlmConfig;
use dk_llm::{ChatMessage, ChatRequest};
use dk_quota::{Admission, RoleLimits, UsageRecord};
use serde::{Deserialize, Serialize};

use crate::error::{ApiError, ApiErrorResponse};
use crate::metered::call_metered;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ChatBody {
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct QuotaView {
    pub calls: u64,
    pub tokens: u64,
    pub calls_per_day: u64,
    pub tokens_per_day: u64,
    pub reset_at: i64,
}

impl QuotaView {
    fn new(record: &UsageRecord, limits: RoleLimits) -> Self {
        Self {
            calls: record.calls,
            tokens: record.tokens,
            calls_per_day: limits.calls_per_day,
            tokens_per_day: limits.tokens_per_day,
            reset_at: record.reset_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ChatReply {
    pub content: String,
    pub model: String,
    pub usage_tokens: u64,
    pub quota: QuotaView,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<ApiError>,
}

fn bad_request(message: impl Into<String>) -> ApiErrorResponse {
    ApiErrorResponse {
        status: StatusCode::BAD_REQUEST,
        error: ApiError::invalid_request(message),
    }
}

/// Builds the upstream request from the client body and configured defaults.
fn build_request(llm: &LlmConfig, body: ChatBody) -> Result<ChatRequest, ApiErrorResponse> {
    if body.messages.is_empty() {
        return Err(bad_request("messages must not be empty"));
    }
    if body.messages.iter().all(|m| m.content.trim().is_empty()) {
        return Err(bad_request("messages must contain some text"));
    }

    let model = body
        .model
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| llm.default_model.clone());
    let temperature = body
        .temperature
        .filter(|t| t.is_finite())
        .map(|t| t.clamp(0.0, 2.0))
        .unwrap_or(llm.temperature);
    let max_tokens = body
        .max_tokens
        .map(|n| n.clamp(1, llm.max_tokens))
        .unwrap_or(llm.max_tokens);

    Ok(ChatRequest {
        model,
        messages: body.messages,
        temperature,
        max_tokens,
    }
    .with_default_system(&llm.system_prompt))
}

pub async fn chat(
    State(state): State<AppState>,
    Extension(admission): Extension<Admission>,
    body: Result<Json<ChatBody>, JsonRejection>,
) -> Result<Json<ChatReply>, ApiErrorResponse> {
    let Json(body) = body.map_err(|e| bad_request(e.body_text()))?;
    let request = build_request(&state.config.llm, body)?;

    let reply = call_metered(
        state.provider.as_ref(),
        &state.usage_gate,
        &admission,
        &request,
    )
    .await?;

    let quota = match &reply.settlement {
        Some(settlement) => QuotaView::new(&settlement.record, settlement.limits),
        None => QuotaView::new(&admission.record, admission.limits),
    };
    let warning = reply
        .warning
        .as_ref()
        .map(|w| ApiError::quota_error(w).1);

    Ok(Json(ChatReply {
        content: reply.completion.content,
        model: reply.completion.model,
        usage_tokens: reply.completion.usage_tokens,
        quota,
        warning,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use dk_llm::MessageRole;

    #[test]
    fn quota_view_serialization() {
        let record = UsageRecord {
            calls: 2,
            tokens: 340,
            reset_at: 1_767_225_600,
        };
        let view = QuotaView::new(&record, RoleLimits::new(20, 20_000));
        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["calls"], 2);
        assert_eq!(json["tokens"], 340);
        assert_eq!(json["calls_per_day"], 20);
        assert_eq!(json["tokens_per_day"], 20_000);
        assert_eq!(json["reset_at"], 1_767_225_600i64);
    }

    #[test]
    fn body_defaults_are_optional() {
        let body: ChatBody = serde_json::from_str(
            r#"{"messages":[{"role":"user","content":"Is my landlord allowed to keep the deposit?"}]}"#,
        )
        .unwrap();
        assert_eq!(body.messages.len(), 1);
        assert!(body.model.is_none());
        assert!(body.temperature.is_none());
        assert!(body.max_tokens.is_none());
    }

    #[test]
    fn reply_omits_absent_warning() {
        let reply = ChatReply {
            content: "x".to_string(),
            model: "m".to_string(),
            usage_tokens: 1,
            quota: QuotaView::new(&UsageRecord::default(), RoleLimits::new(1, 1)),
            warning: None,
        };
        let json = serde_json::to_value(&reply).unwrap();
        assert!(json.get("warning").is_none());
    }

    fn llm() -> LlmConfig {
        LlmConfig {
            default_model: "gpt-4o-mini".to_string(),
            temperature: 0.2,
            max_tokens: 800,
            ..LlmConfig::default()
        }
    }

    fn body(messages: Vec<ChatMessage>) -> ChatBody {
        ChatBody {
            messages,
            model: None,
            temperature: None,
            max_tokens: None,
        }
    }

    #[test]
    fn system_prompt_is_prepended() {
        let req = build_request(
            &llm(),
            body(vec![ChatMessage::user("How do I respond to an eviction notice?")]),
        )
        .unwrap();
        assert_eq!(req.messages.len(), 2);
        assert_eq!(req.messages[0].role, MessageRole::System);
        assert!(req.messages[0].content.contains("not legal advice"));
        assert_eq!(req.model, "gpt-4o-mini");
        assert_eq!(req.max_tokens, 800);
    }

    #[test]
    fn client_system_message_is_kept() {
        let req = build_request(
            &llm(),
            body(vec![
                ChatMessage::system("Answer in Spanish."),
                ChatMessage::user("What is a lien?"),
            ]),
        )
        .unwrap();
        assert_eq!(req.messages.len(), 2);
        assert_eq!(req.messages[0].content, "Answer in Spanish.");
    }

    #[test]
    fn overrides_are_clamped() {
        let req = build_request(
            &llm(),
            ChatBody {
                model: Some("gpt-4o".to_string()),
                temperature: Some(9.0),
                max_tokens: Some(5_000),
                ..body(vec![ChatMessage::user("hello")])
            },
        )
        .unwrap();
        assert_eq!(req.model, "gpt-4o");
        assert_eq!(req.temperature, 2.0);
        assert_eq!(req.max_tokens, 800);
    }

    #[test]
    fn empty_conversation_is_rejected() {
        let err = build_request(&llm(), body(vec![])).unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.error.code, "INVALID_REQUEST");

        let err = build_request(&llm(), body(vec![ChatMessage::user("   ")])).unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }
}
