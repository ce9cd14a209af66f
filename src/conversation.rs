//! Append-only turn log shared with the model.
//!
//! The log owns the continuity token ("thought signature") the model emits. The held token is
//! replaced only when a model turn carries a new one, so tool-result and user turns appended in
//! between never reset it.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::action::{ActionResult, ToolCall};

/// Opaque model state that must be replayed verbatim on the next request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContinuityToken(String);

impl ContinuityToken {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Model,
    ToolResult,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Image {
    pub mime_type: String,
    pub data_base64: String,
}

impl Image {
    pub fn png(data_base64: impl Into<String>) -> Self {
        Self { mime_type: "image/png".into(), data_base64: data_base64.into() }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Part {
    Text { text: String },
    Image(Image),
    FunctionCall(ToolCall),
    FunctionResult { name: String, response: Value },
    ContinuityToken { token: ContinuityToken },
    ReasoningSummary { text: String },
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Turn {
    role: Role,
    parts: Vec<Part>,
}

impl Turn {
    pub fn role(&self) -> Role {
        self.role
    }

    pub fn parts(&self) -> &[Part] {
        &self.parts
    }

    pub fn continuity(&self) -> Option<&ContinuityToken> {
        self.parts.iter().find_map(|p| match p {
            Part::ContinuityToken { token } => Some(token),
            _ => None,
        })
    }

    pub fn function_calls(&self) -> impl Iterator<Item = &ToolCall> {
        self.parts.iter().filter_map(|p| match p {
            Part::FunctionCall(call) => Some(call),
            _ => None,
        })
    }
}

/// Typed fragments of one model response.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ModelReply {
    pub text: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    pub continuity: Option<ContinuityToken>,
    pub reasoning_summary: Option<String>,
}

/// The turn log as it should be sent, with the held continuity token for the outgoing position.
#[derive(Clone, Copy, Debug)]
pub struct RequestSnapshot<'a> {
    pub turns: &'a [Turn],
    pub continuity: Option<&'a ContinuityToken>,
}

#[derive(Clone, Debug, Default)]
pub struct Conversation {
    turns: Vec<Turn>,
    continuity: Option<ContinuityToken>,
    awaiting_input: bool,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn continuity(&self) -> Option<&ContinuityToken> {
        self.continuity.as_ref()
    }

    /// True after a model turn that requested no action.
    pub fn awaiting_input(&self) -> bool {
        self.awaiting_input
    }

    pub fn append_user(&mut self, text: impl Into<String>, image: Option<Image>) {
        let mut parts = vec![Part::Text { text: text.into() }];
        parts.extend(image.map(Part::Image));
        self.push(Turn { role: Role::User, parts });
        self.awaiting_input = false;
    }

    pub fn append_model(&mut self, reply: &ModelReply) {
        let mut parts = Vec::new();
        if let Some(summary) = &reply.reasoning_summary {
            parts.push(Part::ReasoningSummary { text: summary.clone() });
        }
        if let Some(text) = &reply.text {
            parts.push(Part::Text { text: text.clone() });
        }
        parts.extend(reply.tool_calls.iter().cloned().map(Part::FunctionCall));
        if let Some(token) = &reply.continuity {
            parts.push(Part::ContinuityToken { token: token.clone() });
            self.continuity = Some(token.clone());
        }
        self.push(Turn { role: Role::Model, parts });
        self.awaiting_input = reply.tool_calls.is_empty();
    }

    pub fn append_tool_results(&mut self, results: &[ActionResult], image: Option<Image>) {
        let mut parts: Vec<Part> = results
            .iter()
            .map(|r| Part::FunctionResult { name: r.tool.clone(), response: result_payload(r) })
            .collect();
        parts.extend(image.map(Part::Image));
        self.push(Turn { role: Role::ToolResult, parts });
        self.awaiting_input = false;
    }

    pub fn snapshot_for_request(&self) -> RequestSnapshot<'_> {
        RequestSnapshot { turns: &self.turns, continuity: self.continuity.as_ref() }
    }

    fn push(&mut self, turn: Turn) {
        debug!(role = ?turn.role, parts = turn.parts.len(), history = self.turns.len() + 1, "append turn");
        self.turns.push(turn);
    }
}

fn result_payload(r: &ActionResult) -> Value {
    let mut payload = json!({
        "success": r.success,
        "message": r.message,
    });
    match &r.data {
        Some(Value::Object(extra)) => {
            for (k, v) in extra {
                payload[k.as_str()] = v.clone();
            }
        }
        Some(other) => payload["data"] = other.clone(),
        None => {}
    }
    payload
}
