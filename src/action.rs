use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::notes::{NoteCategory, NoteCommand};
use crate::surface::{MouseButton, Point, SurfaceAction, SurfaceKind};
use crate::tools::{catalog, ParamType, ToolDecl, ToolName};

/// Upper bound of the normalized coordinate scale used by the model.
pub const NORMALIZED_MAX: f64 = 1000.0;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    #[serde(default)]
    pub args: Map<String, Value>,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, args: Value) -> Self {
        let args = match args {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self { name: name.into(), args }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Action {
    Surface(SurfaceAction),
    Wait { seconds: u64 },
    Note(NoteCommand),
    Completed { summary: String, success: bool },
}

/// Outcome of one tool call, reported back to the model.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActionResult {
    pub tool: String,
    pub success: bool,
    pub message: String,
    pub data: Option<Value>,
}

impl ActionResult {
    pub fn ok(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self { tool: tool.into(), success: true, message: message.into(), data: None }
    }

    pub fn failed(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self { tool: tool.into(), success: false, message: message.into(), data: None }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum TranslateError {
    #[error("unknown tool: {0}")]
    UnknownTool(String),
    #[error("{tool}: argument {arg} must be {expected}, got {found}")]
    ArgumentType { tool: String, arg: String, expected: &'static str, found: String },
    #[error("{tool}: argument {arg} = {value} is outside [{min}, {max}]")]
    ArgumentRange { tool: String, arg: String, value: f64, min: f64, max: f64 },
}

/// Projects a normalized coordinate onto a surface axis of `dimension` pixels.
pub fn denormalize(value: f64, dimension: u32) -> u32 {
    ((value / NORMALIZED_MAX) * dimension as f64).round() as u32
}

fn type_name(v: Option<&Value>) -> String {
    match v {
        None | Some(Value::Null) => "nothing".into(),
        Some(Value::Bool(_)) => "a boolean".into(),
        Some(Value::Number(n)) => format!("the number {n}"),
        Some(Value::String(_)) => "a string".into(),
        Some(Value::Array(_)) => "an array".into(),
        Some(Value::Object(_)) => "an object".into(),
    }
}

fn is_integral(v: &Value) -> bool {
    v.is_i64() || v.is_u64() || v.as_f64().is_some_and(|f| f.fract() == 0.0)
}

fn matches_type(ty: &ParamType, v: &Value) -> bool {
    match ty {
        ParamType::Integer => is_integral(v),
        ParamType::Number => v.is_number(),
        ParamType::String => v.is_string(),
        ParamType::Boolean => v.is_boolean(),
        ParamType::Array(None) => v.is_array(),
        ParamType::Array(Some(inner)) => v.as_array().is_some_and(|a| a.iter().all(|x| matches_type(inner, x))),
    }
}

fn expected_name(ty: &ParamType) -> &'static str {
    match ty {
        ParamType::Integer => "an integer",
        ParamType::Number => "a number",
        ParamType::String => "a string",
        ParamType::Boolean => "a boolean",
        ParamType::Array(Some(inner)) if **inner == ParamType::String => "an array of strings",
        ParamType::Array(_) => "an array",
    }
}

struct Args<'a> {
    tool: ToolName,
    map: &'a Map<String, Value>,
}

impl<'a> Args<'a> {
    fn type_err(&self, arg: &str, expected: &'static str) -> TranslateError {
        TranslateError::ArgumentType {
            tool: self.tool.to_string(),
            arg: arg.to_string(),
            expected,
            found: type_name(self.map.get(arg)),
        }
    }

    fn range_err(&self, arg: &str, value: f64, min: f64, max: f64) -> TranslateError {
        TranslateError::ArgumentRange { tool: self.tool.to_string(), arg: arg.to_string(), value, min, max }
    }

    fn present(&self, arg: &str) -> Option<&'a Value> {
        self.map.get(arg).filter(|v| !v.is_null())
    }

    fn integer(&self, arg: &str) -> Result<i64, TranslateError> {
        match self.present(arg) {
            Some(v) => v
                .as_i64()
                .or_else(|| v.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64))
                .ok_or_else(|| self.type_err(arg, "an integer")),
            None => Err(self.type_err(arg, "an integer")),
        }
    }

    fn bounded(&self, arg: &str, min: i64, max: i64) -> Result<i64, TranslateError> {
        let v = self.integer(arg)?;
        if v < min || v > max {
            return Err(self.range_err(arg, v as f64, min as f64, max as f64));
        }
        Ok(v)
    }

    fn coord(&self, arg: &str, dimension: u32) -> Result<u32, TranslateError> {
        let v = self.integer(arg)? as f64;
        if !(0.0..=NORMALIZED_MAX).contains(&v) {
            return Err(self.range_err(arg, v, 0.0, NORMALIZED_MAX));
        }
        Ok(denormalize(v, dimension))
    }

    /// Checks every declared parameter that is present (and every required one) against
    /// its declared type and enum, before any tool-specific mapping runs.
    fn conform(&self, decl: &ToolDecl) -> Result<(), TranslateError> {
        for p in &decl.params {
            let Some(v) = self.present(&p.name) else {
                if p.required {
                    return Err(self.type_err(&p.name, expected_name(&p.ty)));
                }
                continue;
            };
            if !matches_type(&p.ty, v) {
                return Err(self.type_err(&p.name, expected_name(&p.ty)));
            }
            if !p.enum_values.is_empty() && !v.as_str().is_some_and(|s| p.enum_values.iter().any(|e| e == s)) {
                return Err(self.type_err(&p.name, "one of the declared values"));
            }
        }
        Ok(())
    }

    fn point(&self, x: &str, y: &str, dims: (u32, u32)) -> Result<Point, TranslateError> {
        Ok(Point { x: self.coord(x, dims.0)?, y: self.coord(y, dims.1)? })
    }

    fn string(&self, arg: &str) -> Result<String, TranslateError> {
        self.present(arg)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| self.type_err(arg, "a string"))
    }

    fn opt_string(&self, arg: &str) -> Result<Option<String>, TranslateError> {
        match self.present(arg) {
            None => Ok(None),
            Some(_) => self.string(arg).map(Some),
        }
    }

    fn boolean(&self, arg: &str) -> Result<bool, TranslateError> {
        self.present(arg)
            .and_then(Value::as_bool)
            .ok_or_else(|| self.type_err(arg, "a boolean"))
    }

    fn opt_boolean(&self, arg: &str, default: bool) -> Result<bool, TranslateError> {
        match self.present(arg) {
            None => Ok(default),
            Some(_) => self.boolean(arg),
        }
    }

    fn button(&self, arg: &str, required: bool) -> Result<MouseButton, TranslateError> {
        let raw = if required { Some(self.string(arg)?) } else { self.opt_string(arg)? };
        match raw.as_deref() {
            None | Some("left") => Ok(MouseButton::Left),
            Some("middle") => Ok(MouseButton::Middle),
            Some("right") => Ok(MouseButton::Right),
            Some(_) => Err(self.type_err(arg, "one of left, middle, right")),
        }
    }

    fn category_filter(&self, arg: &str) -> Result<Option<NoteCategory>, TranslateError> {
        match self.opt_string(arg)?.as_deref() {
            None | Some("all") => Ok(None),
            Some(s) => NoteCategory::parse(s)
                .map(Some)
                .ok_or_else(|| self.type_err(arg, "a note category or all")),
        }
    }

    fn keys(&self, arg: &str) -> Result<Vec<String>, TranslateError> {
        let keys: Option<Vec<String>> = self.present(arg).and_then(Value::as_array).and_then(|arr| {
            arr.iter().map(|k| k.as_str().map(str::to_string)).collect()
        });
        match keys {
            Some(k) if !k.is_empty() => Ok(k),
            _ => Err(self.type_err(arg, "a non-empty array of strings")),
        }
    }
}

/// Validates model tool calls against the declared tool catalog of one surface.
#[derive(Clone, Debug)]
pub struct Translator {
    decls: BTreeMap<ToolName, ToolDecl>,
}

impl Translator {
    pub fn for_surface(kind: SurfaceKind) -> Self {
        let decls = catalog(kind)
            .into_iter()
            .filter_map(|d| d.name.parse::<ToolName>().ok().map(|t| (t, d)))
            .collect();
        Self { decls }
    }

    pub fn translate(&self, call: &ToolCall, dims: (u32, u32)) -> Result<Action, TranslateError> {
        let (tool, decl) = call
            .name
            .parse::<ToolName>()
            .ok()
            .and_then(|t| self.decls.get(&t).map(|d| (t, d)))
            .ok_or_else(|| TranslateError::UnknownTool(call.name.clone()))?;
        let a = Args { tool, map: &call.args };
        a.conform(decl)?;

        let surface = |s: SurfaceAction| -> Result<Action, TranslateError> { Ok(Action::Surface(s)) };
        match tool {
            ToolName::MouseClick => surface(SurfaceAction::Click {
                at: a.point("x", "y", dims)?,
                button: a.button("button", true)?,
                hold_ms: match a.present("duration") {
                    None => 0,
                    Some(_) => a.bounded("duration", 0, 10_000)? as u64,
                },
            }),
            ToolName::MouseDoubleClick => surface(SurfaceAction::DoubleClick {
                at: a.point("x", "y", dims)?,
                button: a.button("button", false)?,
            }),
            ToolName::MouseHover => surface(SurfaceAction::Hover { at: a.point("x", "y", dims)? }),
            ToolName::MouseDrag => surface(SurfaceAction::Drag {
                from: a.point("start_x", "start_y", dims)?,
                to: a.point("end_x", "end_y", dims)?,
                button: a.button("button", true)?,
            }),
            ToolName::MouseScroll => surface(SurfaceAction::Scroll {
                dx: a.integer("scroll_x")?,
                dy: a.integer("scroll_y")?,
            }),
            ToolName::KeyboardType => surface(SurfaceAction::TypeText {
                text: a.string("text")?,
                clear_existing: a.opt_boolean("clear_existing", false)?,
            }),
            ToolName::ClearText => surface(SurfaceAction::ClearText),
            ToolName::ClickAndType => surface(SurfaceAction::ClickAndType {
                at: a.point("x", "y", dims)?,
                text: a.opt_string("text")?.unwrap_or_default(),
                clear_existing: a.opt_boolean("clear_existing", true)?,
            }),
            ToolName::KeyboardPress => surface(SurfaceAction::KeyPress { keys: a.keys("keys")? }),
            ToolName::Navigate => surface(SurfaceAction::Navigate { url: a.string("url")? }),
            ToolName::NewTab => surface(SurfaceAction::NewTab { url: a.string("url")? }),
            ToolName::SwitchTab => surface(SurfaceAction::SwitchTab {
                index: a.bounded("index", 0, i64::from(u16::MAX))? as usize,
            }),
            ToolName::ListTabs => surface(SurfaceAction::ListTabs),
            ToolName::ClearCookies => surface(SurfaceAction::ClearCookies),
            ToolName::ResetBrowser => surface(SurfaceAction::ResetBrowser {
                url: a.opt_string("url")?.unwrap_or_else(|| "about:blank".to_string()),
            }),
            ToolName::Wait => Ok(Action::Wait { seconds: a.bounded("seconds", 1, 30)? as u64 }),
            ToolName::AddNote => Ok(Action::Note(NoteCommand::Add {
                content: a.string("content")?,
                category: match a.opt_string("category")?.as_deref() {
                    None => NoteCategory::Info,
                    Some(s) => NoteCategory::parse(s)
                        .ok_or_else(|| a.type_err("category", "a note category"))?,
                },
            })),
            ToolName::ListNotes => Ok(Action::Note(NoteCommand::List {
                category: a.category_filter("category")?,
            })),
            ToolName::ClearNotes => Ok(Action::Note(NoteCommand::Clear {
                category: a.category_filter("category")?,
                confirm: a.boolean("confirm")?,
            })),
            ToolName::TaskComplete => Ok(Action::Completed {
                summary: a.string("summary")?,
                success: a.boolean("success")?,
            }),
        }
    }
}
