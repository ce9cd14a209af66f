use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;

use crate::surface::now_ms;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum NoteCategory {
    #[default]
    Info,
    Progress,
    Todo,
    Important,
    Error,
}

impl NoteCategory {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "info" => Some(NoteCategory::Info),
            "progress" => Some(NoteCategory::Progress),
            "todo" => Some(NoteCategory::Todo),
            "important" => Some(NoteCategory::Important),
            "error" => Some(NoteCategory::Error),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            NoteCategory::Info => "info",
            NoteCategory::Progress => "progress",
            NoteCategory::Todo => "todo",
            NoteCategory::Important => "important",
            NoteCategory::Error => "error",
        }
    }
}

impl fmt::Display for NoteCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Note {
    pub content: String,
    pub category: NoteCategory,
    pub step: usize,
    pub created_at_ms: u128,
}

/// Notebook operations requested by the model. `None` category means all categories.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum NoteCommand {
    Add { content: String, category: NoteCategory },
    List { category: Option<NoteCategory> },
    Clear { category: Option<NoteCategory>, confirm: bool },
}

impl NoteCommand {
    pub fn op_name(&self) -> &'static str {
        match self {
            NoteCommand::Add { .. } => "add",
            NoteCommand::List { .. } => "list",
            NoteCommand::Clear { .. } => "clear",
        }
    }
}

#[derive(Clone, Debug)]
pub struct NoteReply {
    pub success: bool,
    pub message: String,
    pub data: Option<serde_json::Value>,
}

#[derive(Clone, Debug, Default)]
pub struct Notebook {
    notes: Vec<Note>,
}

impl Notebook {
    pub fn notes(&self) -> &[Note] {
        &self.notes
    }

    pub fn recent(&self, n: usize) -> &[Note] {
        let start = self.notes.len().saturating_sub(n);
        &self.notes[start..]
    }

    pub fn apply(&mut self, cmd: &NoteCommand, step: usize) -> NoteReply {
        match cmd {
            NoteCommand::Add { content, category } => {
                self.notes.push(Note {
                    content: content.clone(),
                    category: *category,
                    step,
                    created_at_ms: now_ms(),
                });
                NoteReply {
                    success: true,
                    message: format!("note added [{}]", category),
                    data: Some(json!({ "note_count": self.notes.len() })),
                }
            }
            NoteCommand::List { category } => {
                let listed: Vec<_> = self
                    .notes
                    .iter()
                    .enumerate()
                    .filter(|(_, n)| category.map_or(true, |c| n.category == c))
                    .map(|(i, n)| {
                        json!({
                            "index": i + 1,
                            "category": n.category,
                            "content": n.content,
                            "step": n.step,
                        })
                    })
                    .collect();
                NoteReply {
                    success: true,
                    message: format!("{} of {} notes", listed.len(), self.notes.len()),
                    data: Some(json!({
                        "notes": listed,
                        "total_count": self.notes.len(),
                        "filter": category.map_or("all", |c| c.as_str()),
                    })),
                }
            }
            NoteCommand::Clear { category, confirm } => {
                if !confirm {
                    return NoteReply {
                        success: false,
                        message: "clear_notes requires confirm=true".into(),
                        data: None,
                    };
                }
                let before = self.notes.len();
                match category {
                    Some(c) => self.notes.retain(|n| n.category != *c),
                    None => self.notes.clear(),
                }
                let cleared = before - self.notes.len();
                NoteReply {
                    success: true,
                    message: format!("cleared {} notes", cleared),
                    data: Some(json!({ "cleared_count": cleared, "remaining_count": self.notes.len() })),
                }
            }
        }
    }
}
