use nanoid::nanoid;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::info;

use crate::action::{ActionResult, Translator};
use crate::conversation::Conversation;
use crate::events::{AgentEvent, EventBus};
use crate::notes::Notebook;
use crate::surface::{Observation, Surface, SurfaceError};
use crate::tools::{catalog, convert, SchemaError, ToolSchema};

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn generate() -> Self {
        Self(nanoid!())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Idle,
    Running,
    Completed,
    Failed,
    StepLimitReached,
    Cancelled,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, SessionStatus::Idle | SessionStatus::Running)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionStatus::Idle => "idle",
            SessionStatus::Running => "running",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
            SessionStatus::StepLimitReached => "step_limit_reached",
            SessionStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// The caller drives each step.
    #[default]
    SingleStep,
    /// A background task drives the session until it reaches a terminal state.
    Autonomous,
}

#[derive(Debug, Error, Clone)]
pub enum SessionError {
    #[error("session not found: {0}")]
    NotFound(SessionId),
    #[error("session already finished: {0}")]
    Finished(SessionStatus),
    #[error("surface unavailable: {0}")]
    Surface(#[from] SurfaceError),
    #[error("tool schema invalid: {0}")]
    Schema(#[from] SchemaError),
}

/// Outcome of a single step.
#[derive(Clone, Debug, Serialize)]
pub struct StepReport {
    pub status: SessionStatus,
    pub actions_taken: Vec<ActionResult>,
    pub completed: bool,
    pub reasoning_summary: Option<String>,
}

/// Serializable snapshot of a session, published on every state change.
#[derive(Clone, Debug, Serialize)]
pub struct SessionView {
    pub id: SessionId,
    pub goal: String,
    pub mode: RunMode,
    pub status: SessionStatus,
    pub steps: usize,
    pub summary: Option<String>,
    pub success: Option<bool>,
    pub error: Option<String>,
    pub reasoning: Vec<String>,
    pub url: Option<String>,
    pub note_count: usize,
    #[serde(skip)]
    pub finished_at: Option<Instant>,
}

pub struct Session {
    pub(crate) id: SessionId,
    pub(crate) goal: String,
    pub(crate) mode: RunMode,
    pub(crate) surface: Arc<dyn Surface>,
    pub(crate) translator: Translator,
    pub(crate) tools: ToolSchema,
    pub(crate) conversation: Conversation,
    pub(crate) notebook: Notebook,
    pub(crate) events: EventBus,
    pub(crate) status: SessionStatus,
    pub(crate) steps: usize,
    pub(crate) reasoning: Vec<String>,
    pub(crate) summary: Option<String>,
    pub(crate) success: Option<bool>,
    pub(crate) error: Option<String>,
    pub(crate) last_observation: Option<Observation>,
    pub(crate) finished_at: Option<Instant>,
}

impl Session {
    pub fn new(goal: impl Into<String>, surface: Arc<dyn Surface>, mode: RunMode) -> Result<Self, SessionError> {
        let kind = surface.kind();
        let tools = convert(&catalog(kind))?;
        Ok(Self {
            id: SessionId::generate(),
            goal: goal.into(),
            mode,
            surface,
            translator: Translator::for_surface(kind),
            tools,
            conversation: Conversation::new(),
            notebook: Notebook::default(),
            events: EventBus::default(),
            status: SessionStatus::Idle,
            steps: 0,
            reasoning: Vec::new(),
            summary: None,
            success: None,
            error: None,
            last_observation: None,
            finished_at: None,
        })
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn steps(&self) -> usize {
        self.steps
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn notebook(&self) -> &Notebook {
        &self.notebook
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub(crate) fn finish(&mut self, status: SessionStatus) {
        if self.status.is_terminal() {
            return;
        }
        info!(session = %self.id, status = %status, steps = self.steps, "session finished");
        self.status = status;
        self.finished_at = Some(Instant::now());
        // completion and failure publish their own richer events
        match status {
            SessionStatus::StepLimitReached => self.events.publish(AgentEvent::StepLimitReached { steps: self.steps }),
            SessionStatus::Cancelled => self.events.publish(AgentEvent::Cancelled { steps: self.steps }),
            _ => {}
        }
    }

    pub(crate) fn fail(&mut self, message: impl Into<String>) {
        self.error = Some(message.into());
        self.finish(SessionStatus::Failed);
    }

    pub fn view(&self) -> SessionView {
        SessionView {
            id: self.id.clone(),
            goal: self.goal.clone(),
            mode: self.mode,
            status: self.status,
            steps: self.steps,
            summary: self.summary.clone(),
            success: self.success,
            error: self.error.clone(),
            reasoning: self.reasoning.clone(),
            url: self.last_observation.as_ref().and_then(|o| o.url.clone()),
            note_count: self.notebook.notes().len(),
            finished_at: self.finished_at,
        }
    }
}
