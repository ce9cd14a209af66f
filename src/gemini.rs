use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::env;
use thiserror::Error;
use tracing::{debug, warn};

use crate::action::ToolCall;
use crate::conversation::{ContinuityToken, ModelReply, Part, RequestSnapshot, Role, Turn};
use crate::tools::ToolSchema;

#[derive(Clone)]
pub struct GeminiConfig {
    pub api_base: String, // e.g. "https://generativelanguage.googleapis.com/v1beta"
    pub api_key: String,  // env GEMINI_API_KEY
    pub model: String,    // e.g. "gemini-3-pro-preview"
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_base: env::var("GEMINI_BASE_URL")
                .unwrap_or_else(|_| "https://generativelanguage.googleapis.com/v1beta".into()),
            api_key: env::var("GEMINI_API_KEY").unwrap_or_default(),
            model: env::var("GEMINI_MODEL").unwrap_or_else(|_| "gemini-3-pro-preview".into()),
        }
    }
}

// ========================= Parameters =========================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ThinkingLevel {
    #[default]
    Low,
    High,
}

#[derive(Debug, Error, Clone, PartialEq)]
#[error("temperature must be a positive finite number, got {0}")]
pub struct ParamsError(pub f64);

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct GenerationParams {
    temperature: f64,
    thinking_level: ThinkingLevel,
    include_thoughts: bool,
    system_instruction: Option<String>,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self { temperature: 1.0, thinking_level: ThinkingLevel::Low, include_thoughts: true, system_instruction: None }
    }
}

impl GenerationParams {
    pub fn new(temperature: f64, thinking_level: ThinkingLevel, include_thoughts: bool) -> Result<Self, ParamsError> {
        if !(temperature.is_finite() && temperature > 0.0) {
            return Err(ParamsError(temperature));
        }
        Ok(Self { temperature, thinking_level, include_thoughts, system_instruction: None })
    }

    pub fn with_system_instruction(mut self, text: impl Into<String>) -> Self {
        self.system_instruction = Some(text.into());
        self
    }

    pub fn temperature(&self) -> f64 {
        self.temperature
    }

    pub fn thinking_level(&self) -> ThinkingLevel {
        self.thinking_level
    }

    pub fn include_thoughts(&self) -> bool {
        self.include_thoughts
    }
}

// ========================= Gateway Seam =========================

#[derive(Debug, Error, Clone, PartialEq)]
pub enum GatewayError {
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("model unavailable: {0}")]
    Unavailable(String),
    #[error("malformed reply: {0}")]
    Malformed(String),
    #[error("request rejected ({status}): {message}")]
    Rejected { status: u16, message: String },
}

impl GatewayError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, GatewayError::Unavailable(_))
    }
}

/// Stateless request/response boundary to the model provider.
#[async_trait]
pub trait ModelGateway: Send + Sync {
    async fn generate<'a>(
        &self,
        request: RequestSnapshot<'a>,
        tools: &ToolSchema,
        params: &GenerationParams,
    ) -> Result<ModelReply, GatewayError>;
}

// ========================= REST Client =========================

#[derive(Clone)]
pub struct GeminiClient {
    http: Client,
    cfg: GeminiConfig,
}

impl GeminiClient {
    pub fn new(cfg: GeminiConfig) -> Result<Self, GatewayError> {
        if cfg.api_key.is_empty() {
            return Err(GatewayError::Auth("GEMINI_API_KEY missing".into()));
        }
        Ok(Self { http: Client::new(), cfg })
    }
}

#[async_trait]
impl ModelGateway for GeminiClient {
    async fn generate<'a>(
        &self,
        request: RequestSnapshot<'a>,
        tools: &ToolSchema,
        params: &GenerationParams,
    ) -> Result<ModelReply, GatewayError> {
        let url = format!("{}/models/{}:generateContent", self.cfg.api_base, self.cfg.model);
        let body = build_request(request, tools, params);
        debug!(model = %self.cfg.model, turns = request.turns.len(), "gemini request");

        let resp = self
            .http
            .post(url)
            .header("x-goog-api-key", &self.cfg.api_key)
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;
        let status = resp.status();
        let text = resp.text().await.map_err(transport_error)?;
        if !status.is_success() {
            return Err(classify_status(status, &text));
        }
        let v: Value = serde_json::from_str(&text)
            .map_err(|e| GatewayError::Malformed(format!("response is not JSON: {e}")))?;
        parse_reply(v)
    }
}

// The reqwest error can carry URLs and socket detail; it goes to the log only.
fn transport_error(e: reqwest::Error) -> GatewayError {
    warn!(error = %e, timeout = e.is_timeout(), connect = e.is_connect(), "gemini transport failure");
    let message = if e.is_timeout() {
        "request timed out"
    } else if e.is_connect() {
        "connection failed"
    } else {
        "transport failure"
    };
    GatewayError::Unavailable(message.into())
}

fn provider_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.pointer("/error/message").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| body.chars().take(200).collect())
}

/// Maps a non-success HTTP status onto the gateway error taxonomy. The provider's own
/// message is logged, never carried in the error.
pub fn classify_status(status: StatusCode, body: &str) -> GatewayError {
    warn!(status = %status, provider_message = %provider_message(body), "gemini request failed");
    match status.as_u16() {
        401 | 403 => GatewayError::Auth("credentials rejected by provider".into()),
        // Gemini reports bad keys as 400 INVALID_ARGUMENT
        400 if body.contains("API_KEY_INVALID") || body.contains("API key not valid") => {
            GatewayError::Auth("credentials rejected by provider".into())
        }
        408 | 429 => GatewayError::Unavailable(format!("provider returned {status}")),
        s if s >= 500 => GatewayError::Unavailable(format!("provider returned {status}")),
        s => GatewayError::Rejected { status: s, message: "request rejected by provider".into() },
    }
}

// ========================= Request Encoding =========================

/// Builds the `generateContent` body. The held continuity token rides on the most recent
/// model turn unless that turn already carries its own.
pub fn build_request(request: RequestSnapshot<'_>, tools: &ToolSchema, params: &GenerationParams) -> Value {
    let last_model = request.turns.iter().rposition(|t| t.role() == Role::Model);
    let contents: Vec<Value> = request
        .turns
        .iter()
        .enumerate()
        .map(|(i, turn)| {
            let attach = match (Some(i) == last_model, turn.continuity()) {
                (true, None) => request.continuity,
                _ => None,
            };
            encode_turn(turn, attach)
        })
        .collect();

    let mut req = json!({
        "contents": contents,
        "generationConfig": {
            "temperature": params.temperature,
            "thinkingConfig": {
                "thinkingLevel": params.thinking_level,
                "includeThoughts": params.include_thoughts,
            }
        }
    });
    if let Some(system) = params.system_instruction.as_deref().filter(|s| !s.trim().is_empty()) {
        req["system_instruction"] = json!({ "parts": [{ "text": system }] });
    }
    if !tools.is_empty() {
        req["tools"] = json!(tools);
    }
    req
}

fn encode_turn(turn: &Turn, attach: Option<&ContinuityToken>) -> Value {
    let role = match turn.role() {
        Role::Model => "model",
        Role::User | Role::ToolResult => "user",
    };
    let mut parts: Vec<Value> = Vec::with_capacity(turn.parts().len());
    let mut signature = attach;
    for part in turn.parts() {
        match part {
            Part::Text { text } => parts.push(json!({ "text": text })),
            Part::ReasoningSummary { text } => parts.push(json!({ "text": text, "thought": true })),
            Part::Image(img) => parts.push(json!({
                "inlineData": { "mimeType": img.mime_type, "data": img.data_base64 }
            })),
            Part::FunctionCall(call) => parts.push(json!({
                "functionCall": { "name": call.name, "args": call.args }
            })),
            Part::FunctionResult { name, response } => parts.push(json!({
                "functionResponse": { "name": name, "response": response }
            })),
            Part::ContinuityToken { token } => signature = Some(token),
        }
    }
    if let Some(token) = signature {
        let target = parts
            .iter()
            .position(|p| p.get("functionCall").is_some())
            .or_else(|| parts.iter().rposition(|p| p.get("text").is_some() && p.get("thought").is_none()));
        match target {
            Some(i) => parts[i]["thoughtSignature"] = json!(token.as_str()),
            None => parts.push(json!({ "text": "", "thoughtSignature": token.as_str() })),
        }
    }
    json!({ "role": role, "parts": parts })
}

// ========================= Reply Parsing =========================

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireResponse {
    #[serde(default)]
    candidates: Vec<WireCandidate>,
    prompt_feedback: Option<Value>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireCandidate {
    content: Option<WireContent>,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct WireContent {
    #[serde(default)]
    parts: Vec<WirePart>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct WirePart {
    text: Option<String>,
    thought: Option<bool>,
    thought_signature: Option<String>,
    function_call: Option<WireFunctionCall>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct WireFunctionCall {
    name: Option<String>,
    args: Option<Value>,
    id: Option<String>,
}

/// Parses a `generateContent` response. Any part shape outside text, thought, signature and
/// function call is rejected.
pub fn parse_reply(v: Value) -> Result<ModelReply, GatewayError> {
    let resp: WireResponse =
        serde_json::from_value(v).map_err(|e| GatewayError::Malformed(format!("unexpected response shape: {e}")))?;

    let candidate = match resp.candidates.into_iter().next() {
        Some(c) => c,
        None => {
            let reason = resp
                .prompt_feedback
                .as_ref()
                .and_then(|f| f.get("blockReason"))
                .and_then(Value::as_str)
                .unwrap_or("none given")
                .to_string();
            return Err(GatewayError::Malformed(format!("no candidates (block reason: {reason})")));
        }
    };
    let content = candidate.content.ok_or_else(|| {
        GatewayError::Malformed(format!(
            "candidate has no content (finish reason: {})",
            candidate.finish_reason.as_deref().unwrap_or("unknown")
        ))
    })?;
    if content.parts.is_empty() {
        return Err(GatewayError::Malformed("candidate content has no parts".into()));
    }

    let mut texts = Vec::new();
    let mut thoughts = Vec::new();
    let mut tool_calls = Vec::new();
    let mut continuity = None;
    for part in content.parts {
        if let Some(sig) = part.thought_signature {
            continuity = Some(ContinuityToken::new(sig));
        }
        if let Some(fc) = part.function_call {
            let name = fc
                .name
                .filter(|n| !n.is_empty())
                .ok_or_else(|| GatewayError::Malformed("function call without a name".into()))?;
            let args = match fc.args {
                None | Some(Value::Null) => Map::new(),
                Some(Value::Object(map)) => map,
                Some(_) => return Err(GatewayError::Malformed(format!("{name}: args is not an object"))),
            };
            if let Some(id) = fc.id {
                debug!(tool = %name, call_id = %id, "function call id ignored");
            }
            tool_calls.push(ToolCall { name, args });
        } else if let Some(text) = part.text {
            if part.thought == Some(true) {
                thoughts.push(text);
            } else if !text.is_empty() {
                texts.push(text);
            }
        }
    }

    let join = |v: Vec<String>| if v.is_empty() { None } else { Some(v.join("\n")) };
    Ok(ModelReply { text: join(texts), tool_calls, continuity, reasoning_summary: join(thoughts) })
}
