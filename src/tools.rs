use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::surface::SurfaceKind;

// ========================= Tool Names =========================

/// Closed set of tools the model may call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolName {
    MouseClick,
    MouseDoubleClick,
    MouseHover,
    MouseDrag,
    MouseScroll,
    KeyboardType,
    ClearText,
    ClickAndType,
    KeyboardPress,
    Wait,
    TaskComplete,
    AddNote,
    ListNotes,
    ClearNotes,
    Navigate,
    NewTab,
    SwitchTab,
    ListTabs,
    ClearCookies,
    ResetBrowser,
}

impl ToolName {
    pub const ALL: [ToolName; 20] = [
        ToolName::MouseClick,
        ToolName::MouseDoubleClick,
        ToolName::MouseHover,
        ToolName::MouseDrag,
        ToolName::MouseScroll,
        ToolName::KeyboardType,
        ToolName::ClearText,
        ToolName::ClickAndType,
        ToolName::KeyboardPress,
        ToolName::Wait,
        ToolName::TaskComplete,
        ToolName::AddNote,
        ToolName::ListNotes,
        ToolName::ClearNotes,
        ToolName::Navigate,
        ToolName::NewTab,
        ToolName::SwitchTab,
        ToolName::ListTabs,
        ToolName::ClearCookies,
        ToolName::ResetBrowser,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ToolName::MouseClick => "mouse_click",
            ToolName::MouseDoubleClick => "mouse_double_click",
            ToolName::MouseHover => "mouse_hover",
            ToolName::MouseDrag => "mouse_drag",
            ToolName::MouseScroll => "mouse_scroll",
            ToolName::KeyboardType => "keyboard_type",
            ToolName::ClearText => "clear_text",
            ToolName::ClickAndType => "click_and_type",
            ToolName::KeyboardPress => "keyboard_press",
            ToolName::Wait => "wait",
            ToolName::TaskComplete => "task_complete",
            ToolName::AddNote => "add_note",
            ToolName::ListNotes => "list_notes",
            ToolName::ClearNotes => "clear_notes",
            ToolName::Navigate => "navigate",
            ToolName::NewTab => "new_tab",
            ToolName::SwitchTab => "switch_tab",
            ToolName::ListTabs => "list_tabs",
            ToolName::ClearCookies => "clear_cookies",
            ToolName::ResetBrowser => "reset_browser",
        }
    }

    /// Tools that only make sense against a controlled browser.
    pub fn browser_only(self) -> bool {
        matches!(
            self,
            ToolName::Navigate
                | ToolName::NewTab
                | ToolName::SwitchTab
                | ToolName::ListTabs
                | ToolName::ClearCookies
                | ToolName::ResetBrowser
        )
    }
}

impl fmt::Display for ToolName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ToolName {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ToolName::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or(())
    }
}

// ========================= Internal Declarations =========================

#[derive(Clone, Debug, PartialEq)]
pub enum ParamType {
    Integer,
    Number,
    String,
    Boolean,
    /// Element type of the array; `None` has no wire form.
    Array(Option<Box<ParamType>>),
}

#[derive(Clone, Debug)]
pub struct ParamDecl {
    pub name: String,
    pub ty: ParamType,
    pub description: String,
    pub required: bool,
    pub enum_values: Vec<String>,
}

impl ParamDecl {
    pub fn new(name: &str, ty: ParamType, description: &str) -> Self {
        Self {
            name: name.to_string(),
            ty,
            description: description.to_string(),
            required: false,
            enum_values: Vec::new(),
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn one_of(mut self, values: &[&str]) -> Self {
        self.enum_values = values.iter().map(|v| v.to_string()).collect();
        self
    }
}

#[derive(Clone, Debug)]
pub struct ToolDecl {
    pub name: String,
    pub description: String,
    pub params: Vec<ParamDecl>,
}

impl ToolDecl {
    pub fn new(name: ToolName, description: &str, params: Vec<ParamDecl>) -> Self {
        Self { name: name.as_str().to_string(), description: description.to_string(), params }
    }

    pub fn param(&self, name: &str) -> Option<&ParamDecl> {
        self.params.iter().find(|p| p.name == name)
    }
}

// ========================= Wire Schema =========================

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SchemaError {
    #[error("tool {tool}: parameter {param} is an array without an item type")]
    UntypedArray { tool: String, param: String },
    #[error("tool {tool}: parameter {param} declares enum values but is not a string")]
    EnumOnNonString { tool: String, param: String },
    #[error("tool {tool}: parameter {param} declared twice")]
    DuplicateParam { tool: String, param: String },
    #[error("tool {0} declared twice")]
    DuplicateTool(String),
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct WireProperty {
    #[serde(rename = "type")]
    pub ty: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "enum", skip_serializing_if = "Vec::is_empty")]
    pub enum_values: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<WireProperty>>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct WireParameters {
    #[serde(rename = "type")]
    pub ty: &'static str,
    pub properties: BTreeMap<String, WireProperty>,
    pub required: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FunctionDeclaration {
    pub name: String,
    pub description: String,
    pub parameters: WireParameters,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ToolGroup {
    #[serde(rename = "functionDeclarations")]
    pub function_declarations: Vec<FunctionDeclaration>,
}

/// Converted tool schema, ready to be placed in the request's `tools` field.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ToolSchema(pub Vec<ToolGroup>);

impl ToolSchema {
    pub fn is_empty(&self) -> bool {
        self.0.iter().all(|g| g.function_declarations.is_empty())
    }
}

fn wire_type(tool: &str, param: &str, ty: &ParamType) -> Result<WireProperty, SchemaError> {
    let (name, items) = match ty {
        ParamType::Integer => ("integer", None),
        ParamType::Number => ("number", None),
        ParamType::String => ("string", None),
        ParamType::Boolean => ("boolean", None),
        ParamType::Array(Some(inner)) => ("array", Some(Box::new(wire_type(tool, param, inner)?))),
        ParamType::Array(None) => {
            return Err(SchemaError::UntypedArray { tool: tool.to_string(), param: param.to_string() })
        }
    };
    Ok(WireProperty { ty: name, description: None, enum_values: Vec::new(), items })
}

fn convert_decl(decl: &ToolDecl) -> Result<FunctionDeclaration, SchemaError> {
    let mut seen = BTreeSet::new();
    let mut properties = BTreeMap::new();
    let mut required = Vec::new();
    for p in &decl.params {
        if !seen.insert(p.name.as_str()) {
            return Err(SchemaError::DuplicateParam { tool: decl.name.clone(), param: p.name.clone() });
        }
        if !p.enum_values.is_empty() && p.ty != ParamType::String {
            return Err(SchemaError::EnumOnNonString { tool: decl.name.clone(), param: p.name.clone() });
        }
        let mut prop = wire_type(&decl.name, &p.name, &p.ty)?;
        if !p.description.is_empty() {
            prop.description = Some(p.description.clone());
        }
        prop.enum_values = p.enum_values.clone();
        properties.insert(p.name.clone(), prop);
        if p.required {
            required.push(p.name.clone());
        }
    }
    Ok(FunctionDeclaration {
        name: decl.name.clone(),
        description: decl.description.clone(),
        parameters: WireParameters { ty: "object", properties, required },
    })
}

/// Converts internal declarations to the `functionDeclarations` wire form.
///
/// Declarations keep input order and properties are keyed in sorted order, so the same
/// input always serializes to the same bytes.
pub fn convert(decls: &[ToolDecl]) -> Result<ToolSchema, SchemaError> {
    let mut names = BTreeSet::new();
    let mut out = Vec::with_capacity(decls.len());
    for d in decls {
        if !names.insert(d.name.as_str()) {
            return Err(SchemaError::DuplicateTool(d.name.clone()));
        }
        out.push(convert_decl(d)?);
    }
    Ok(ToolSchema(vec![ToolGroup { function_declarations: out }]))
}

// ========================= Built-in Catalog =========================

const BUTTONS: [&str; 3] = ["left", "middle", "right"];
pub const NOTE_CATEGORIES: [&str; 5] = ["info", "progress", "todo", "important", "error"];

fn coord(name: &str, axis: &str) -> ParamDecl {
    ParamDecl::new(
        name,
        ParamType::Integer,
        &format!("Normalized {axis} coordinate on a 0-1000 scale (0 = {}).", if axis == "x" { "left edge" } else { "top edge" }),
    )
    .required()
}

fn reasoning() -> ParamDecl {
    ParamDecl::new("reasoning", ParamType::String, "Why this action was chosen.")
}

fn decl(name: ToolName) -> ToolDecl {
    match name {
        ToolName::MouseClick => ToolDecl::new(
            name,
            "Click at a position on the screen. Supports left, middle and right buttons and long presses.",
            vec![
                coord("x", "x"),
                coord("y", "y"),
                ParamDecl::new("button", ParamType::String, "Mouse button.").one_of(&BUTTONS).required(),
                ParamDecl::new("duration", ParamType::Integer, "Press duration in milliseconds; 0 for a normal click."),
                reasoning(),
            ],
        ),
        ToolName::MouseDoubleClick => ToolDecl::new(
            name,
            "Double-click at a position, e.g. to open an item or select a word.",
            vec![
                coord("x", "x"),
                coord("y", "y"),
                ParamDecl::new("button", ParamType::String, "Mouse button, left by default.").one_of(&BUTTONS),
                reasoning(),
            ],
        ),
        ToolName::MouseHover => ToolDecl::new(
            name,
            "Move the pointer to a position without clicking.",
            vec![coord("x", "x"), coord("y", "y"), reasoning()],
        ),
        ToolName::MouseDrag => ToolDecl::new(
            name,
            "Press at a start position, move to an end position and release.",
            vec![
                coord("start_x", "x"),
                coord("start_y", "y"),
                coord("end_x", "x"),
                coord("end_y", "y"),
                ParamDecl::new("button", ParamType::String, "Mouse button.").one_of(&BUTTONS).required(),
                reasoning(),
            ],
        ),
        ToolName::MouseScroll => ToolDecl::new(
            name,
            "Scroll the page by a pixel delta. Positive scroll_y scrolls down.",
            vec![
                ParamDecl::new("scroll_x", ParamType::Integer, "Horizontal delta in pixels.").required(),
                ParamDecl::new("scroll_y", ParamType::Integer, "Vertical delta in pixels.").required(),
                reasoning(),
            ],
        ),
        ToolName::KeyboardType => ToolDecl::new(
            name,
            "Type text into the focused element.",
            vec![
                ParamDecl::new("text", ParamType::String, "Text to type.").required(),
                ParamDecl::new("clear_existing", ParamType::Boolean, "Select and delete existing text first."),
                reasoning(),
            ],
        ),
        ToolName::ClearText => ToolDecl::new(
            name,
            "Select all text in the focused element and delete it.",
            vec![reasoning()],
        ),
        ToolName::ClickAndType => ToolDecl::new(
            name,
            "Click an input field, optionally clear it, then type text.",
            vec![
                coord("x", "x"),
                coord("y", "y"),
                ParamDecl::new("text", ParamType::String, "Text to type after clicking."),
                ParamDecl::new("clear_existing", ParamType::Boolean, "Clear the field first; true by default."),
                reasoning(),
            ],
        ),
        ToolName::KeyboardPress => ToolDecl::new(
            name,
            "Press a key or key combination, e.g. [\"ctrl\", \"c\"] or [\"enter\"].",
            vec![
                ParamDecl::new("keys", ParamType::Array(Some(Box::new(ParamType::String))), "Keys held together; the last one is pressed.").required(),
                reasoning(),
            ],
        ),
        ToolName::Wait => ToolDecl::new(
            name,
            "Wait for the interface to settle, between 1 and 30 seconds.",
            vec![
                ParamDecl::new("seconds", ParamType::Integer, "Seconds to wait (1-30).").required(),
                reasoning(),
            ],
        ),
        ToolName::TaskComplete => ToolDecl::new(
            name,
            "Declare the task finished and report the outcome.",
            vec![
                ParamDecl::new("summary", ParamType::String, "What was done and what was found.").required(),
                ParamDecl::new("success", ParamType::Boolean, "Whether the goal was achieved.").required(),
            ],
        ),
        ToolName::AddNote => ToolDecl::new(
            name,
            "Record a finding, progress marker or todo in the session notebook.",
            vec![
                ParamDecl::new("content", ParamType::String, "Note text.").required(),
                ParamDecl::new("category", ParamType::String, "Note category, info by default.").one_of(&NOTE_CATEGORIES),
            ],
        ),
        ToolName::ListNotes => ToolDecl::new(
            name,
            "List notes recorded in this session.",
            vec![ParamDecl::new("category", ParamType::String, "Filter by category, or all.")
                .one_of(&["info", "progress", "todo", "important", "error", "all"])],
        ),
        ToolName::ClearNotes => ToolDecl::new(
            name,
            "Delete notes. Requires confirm=true.",
            vec![
                ParamDecl::new("category", ParamType::String, "Category to clear, or all.")
                    .one_of(&["info", "progress", "todo", "important", "error", "all"]),
                ParamDecl::new("confirm", ParamType::Boolean, "Must be true.").required(),
            ],
        ),
        ToolName::Navigate => ToolDecl::new(
            name,
            "Load a URL in the current tab.",
            vec![ParamDecl::new("url", ParamType::String, "Absolute URL.").required(), reasoning()],
        ),
        ToolName::NewTab => ToolDecl::new(
            name,
            "Open a URL in a new tab and make it active.",
            vec![ParamDecl::new("url", ParamType::String, "Absolute URL.").required()],
        ),
        ToolName::SwitchTab => ToolDecl::new(
            name,
            "Make the tab at the given index active.",
            vec![ParamDecl::new("index", ParamType::Integer, "Zero-based tab index.").required()],
        ),
        ToolName::ListTabs => ToolDecl::new(name, "List open tabs.", vec![]),
        ToolName::ClearCookies => ToolDecl::new(
            name,
            "Delete cookies and web storage, e.g. to dismiss tracking banners or log out. Tabs stay open.",
            vec![reasoning()],
        ),
        ToolName::ResetBrowser => ToolDecl::new(
            name,
            "Start over with a clean browser: clear cookies and storage, close every tab and open one fresh tab.",
            vec![
                ParamDecl::new("url", ParamType::String, "Page to open afterwards, about:blank by default."),
                reasoning(),
            ],
        ),
    }
}

/// Tools offered to a session, in catalog order.
pub fn catalog(kind: SurfaceKind) -> Vec<ToolDecl> {
    ToolName::ALL
        .iter()
        .copied()
        .filter(|t| kind == SurfaceKind::Browser || !t.browser_only())
        .map(decl)
        .collect()
}
