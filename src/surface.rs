use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

// ========================= Observations =========================

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TabInfo {
    pub index: usize,
    pub title: String,
    pub url: String,
    pub active: bool,
}

/// A screenshot of the surface plus whatever location context it can report.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Observation {
    pub id: String,
    pub image_base64: String,
    pub mime_type: String,
    pub url: Option<String>,
    pub tabs: Vec<TabInfo>,
    pub captured_at_ms: u128,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SurfaceKind {
    Browser,
    Screen,
}

impl SurfaceKind {
    pub fn display_name(self) -> &'static str {
        match self {
            SurfaceKind::Browser => "browser automation",
            SurfaceKind::Screen => "desktop control",
        }
    }
}

// ========================= Actions =========================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Point {
    pub x: u32,
    pub y: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MouseButton {
    #[default]
    Left,
    Middle,
    Right,
}

/// Pixel-space actions a surface executes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SurfaceAction {
    Click { at: Point, button: MouseButton, hold_ms: u64 },
    DoubleClick { at: Point, button: MouseButton },
    Hover { at: Point },
    Drag { from: Point, to: Point, button: MouseButton },
    Scroll { dx: i64, dy: i64 },
    TypeText { text: String, clear_existing: bool },
    ClearText,
    ClickAndType { at: Point, text: String, clear_existing: bool },
    KeyPress { keys: Vec<String> },
    Navigate { url: String },
    NewTab { url: String },
    SwitchTab { index: usize },
    ListTabs,
    /// Drops cookies and web storage; the open tabs stay.
    ClearCookies,
    /// Clean slate: cleared state, every tab closed, one fresh tab at `url`.
    ResetBrowser { url: String },
}

/// What a surface reports after executing an action.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub message: String,
    pub data: Option<Value>,
}

impl ActionOutcome {
    pub fn message(message: impl Into<String>) -> Self {
        Self { message: message.into(), data: None }
    }
}

#[derive(Debug, Error, Clone, Serialize, Deserialize)]
pub enum SurfaceError {
    #[error("capture failed: {0}")]
    Capture(String),
    #[error("action failed: {0}")]
    Action(String),
}

/// Wall-clock milliseconds, used to stamp observations and notes.
pub(crate) fn now_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default()
}

// ========================= Controller Seam =========================

#[async_trait]
pub trait Surface: Send + Sync {
    fn kind(&self) -> SurfaceKind;

    /// Viewport size in pixels, the space normalized coordinates are projected onto.
    fn dimensions(&self) -> (u32, u32);

    /// Must not change page or screen state.
    async fn capture(&self) -> Result<Observation, SurfaceError>;

    async fn execute(&self, action: &SurfaceAction) -> Result<ActionOutcome, SurfaceError>;
}
