//! Turns session updates into transcript lines.

use conversation::{SessionUpdate, StepList};
use shared::{Message, Sender, Step};
use std::io::{self, Write};

pub const PROMPT: &str = "you> ";

/// Print the input prompt and flush, since it has no trailing newline.
pub fn write_prompt<W: Write>(out: &mut W) -> io::Result<()> {
    out.write_all(PROMPT.as_bytes())?;
    out.flush()
}

#[derive(Debug, Default)]
pub struct Renderer {
    shown: Vec<Step>,
}

impl Renderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lines to print for one update. Step snapshots only print the entries
    /// that changed since the previous snapshot.
    pub fn render(&mut self, update: &SessionUpdate) -> Vec<String> {
        match update {
            SessionUpdate::StateChanged { .. } => Vec::new(),
            SessionUpdate::StepsChanged(steps) => {
                let lines = steps
                    .iter()
                    .enumerate()
                    .filter(|(i, step)| self.shown.get(*i) != Some(*step))
                    .flat_map(|(_, step)| step_lines(step))
                    .collect();
                self.shown = steps.clone();
                lines
            }
            SessionUpdate::MessageAppended(message) => match message.sender {
                Sender::User => Vec::new(),
                Sender::Bot => {
                    self.shown.clear();
                    message_lines(message)
                }
            },
        }
    }
}

fn step_lines(step: &Step) -> Vec<String> {
    let mut lines = vec![format!(
        "  {} {}: {}",
        step.status.glyph(),
        step.title(),
        step.message
    )];
    if let Some(detail) = step.detail() {
        lines.push(format!("      {}", detail));
    }
    lines
}

pub fn message_lines(message: &Message) -> Vec<String> {
    let mut lines = Vec::new();
    if message.has_steps {
        let steps: StepList = message.steps.iter().cloned().collect();
        lines.push(format!("  ▸ {}", steps.summary()));
    }
    lines.push(format!("bot> {}", message.text));
    lines
}
