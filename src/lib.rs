pub mod action;
pub mod agent;
pub mod browser;
pub mod conversation;
pub mod events;
pub mod gemini;
pub mod manager;
pub mod notes;
pub mod prompt;
pub mod session;
pub mod surface;
pub mod tools;

pub use action::{Action, ActionResult, ToolCall, TranslateError, Translator};
pub use agent::{Agent, AgentConfig, RetryPolicy};
pub use browser::{Browser, BrowserConfig};
pub use conversation::{ContinuityToken, Conversation, ModelReply, Turn};
pub use events::AgentEvent;
pub use gemini::{GatewayError, GeminiClient, GeminiConfig, GenerationParams, ModelGateway, ThinkingLevel};
pub use manager::SessionManager;
pub use session::{RunMode, SessionError, SessionId, SessionStatus, SessionView, StepReport};
pub use surface::{Observation, Surface, SurfaceAction, SurfaceError, SurfaceKind};
