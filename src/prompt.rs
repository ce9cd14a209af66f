use std::fmt::Write as _;

use crate::notes::Note;
use crate::surface::{Observation, SurfaceKind, TabInfo};

pub const RECENT_NOTES: usize = 5;

fn location(obs: &Observation) -> &str {
    obs.url.as_deref().unwrap_or("desktop")
}

fn push_tabs(out: &mut String, tabs: &[TabInfo]) {
    if tabs.is_empty() {
        return;
    }
    out.push_str("\nOpen tabs:\n");
    for tab in tabs {
        let marker = if tab.active { " (active)" } else { "" };
        let _ = writeln!(out, "  [{}] {} - {}{}", tab.index, tab.title, tab.url, marker);
    }
}

/// First user turn of a session.
pub fn goal_prompt(kind: SurfaceKind, obs: &Observation, dims: (u32, u32), goal: &str) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "You are operating in {} mode.", kind.display_name());
    let _ = writeln!(out, "Current location: {}", location(obs));
    let _ = writeln!(out, "Surface size: {}x{} pixels", dims.0, dims.1);
    if kind == SurfaceKind::Browser {
        push_tabs(&mut out, &obs.tabs);
    }
    let _ = writeln!(out, "\nGoal: {}", goal.trim());
    out.push_str(
        "\nHow to act:\n\
         - A screenshot of the current state is attached.\n\
         - Coordinates are normalized: 0 to 1000 on both axes, (0, 0) is the top-left corner.\n\
         - Request exactly one action per reply.\n\
         - Use wait when the page or screen is still loading.\n\
         - Use add_note to remember facts you will need later.\n\
         - Call task_complete with a summary once the goal is reached or cannot be reached.\n",
    );
    out
}

/// User turn sent after a reply that requested no action.
pub fn follow_up_prompt(obs: &Observation, steps: usize, notes: &[Note]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Current location: {}", location(obs));
    let _ = writeln!(out, "Steps executed so far: {}", steps);
    push_tabs(&mut out, &obs.tabs);
    if !notes.is_empty() {
        out.push_str("\nRecent notes:\n");
        for note in notes {
            let _ = writeln!(out, "  [{}] {}", note.category, note.content);
        }
    }
    out.push_str("\nContinue with the next action. Call task_complete when the goal is done.\n");
    out
}
