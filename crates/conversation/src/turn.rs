//! Explicit per-turn state machine.
//!
//! ```text
//! Idle -> Submitted -> Streaming ------------> Completed -> Idle
//!                  \            \ (failure)  /
//!                   \            v          /
//!                    +------> Fallback ----+
//! ```
//!
//! Loading and step visibility are derived from the state, so they can never
//! disagree with each other.

use shared::{Message, Step, StepStatus};

use crate::steps::StepList;

#[derive(Debug, Clone, PartialEq, Default)]
pub enum TurnState {
    #[default]
    Idle,
    Submitted {
        prompt: String,
        /// False for the simple flow, which never shows steps.
        with_steps: bool,
    },
    Streaming {
        prompt: String,
        steps: StepList,
    },
    Fallback {
        prompt: String,
        steps: StepList,
    },
    Completed {
        reply: Message,
    },
}

/// Text that ends a turn.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// A real answer or an error-flavoured one; stamped with the turn's steps.
    Answer(String),
    /// Generic failure text; never carries steps.
    Apology(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum TurnInput {
    Submit { prompt: String, with_steps: bool },
    BeginStreaming,
    /// Valid from `Submitted` and from `Streaming`; starts from an empty buffer.
    BeginFallback,
    StepUpdate(Step),
    CompleteSteps,
    Finish(Reply),
    Acknowledge,
}

impl TurnInput {
    pub fn name(&self) -> &'static str {
        match self {
            TurnInput::Submit { .. } => "submit",
            TurnInput::BeginStreaming => "begin-streaming",
            TurnInput::BeginFallback => "begin-fallback",
            TurnInput::StepUpdate(_) => "step-update",
            TurnInput::CompleteSteps => "complete-steps",
            TurnInput::Finish(_) => "finish",
            TurnInput::Acknowledge => "acknowledge",
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TransitionError {
    #[error("cannot apply {input} while {state}")]
    Invalid {
        state: &'static str,
        input: &'static str,
    },
}

impl TurnState {
    pub fn name(&self) -> &'static str {
        match self {
            TurnState::Idle => "idle",
            TurnState::Submitted { .. } => "submitted",
            TurnState::Streaming { .. } => "streaming",
            TurnState::Fallback { .. } => "fallback",
            TurnState::Completed { .. } => "completed",
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, TurnState::Idle)
    }

    pub fn is_loading(&self) -> bool {
        matches!(
            self,
            TurnState::Submitted { .. } | TurnState::Streaming { .. } | TurnState::Fallback { .. }
        )
    }

    pub fn show_steps(&self) -> bool {
        match self {
            TurnState::Submitted { with_steps, .. } => *with_steps,
            TurnState::Streaming { .. } | TurnState::Fallback { .. } => true,
            TurnState::Idle | TurnState::Completed { .. } => false,
        }
    }

    /// The working step buffer; empty outside `Streaming` and `Fallback`.
    pub fn current_steps(&self) -> &[Step] {
        match self {
            TurnState::Streaming { steps, .. } | TurnState::Fallback { steps, .. } => {
                steps.as_slice()
            }
            _ => &[],
        }
    }

    /// Compute the next state. `self` is not modified; an invalid input leaves
    /// the caller holding the unchanged state.
    pub fn transition(&self, input: TurnInput) -> Result<TurnState, TransitionError> {
        use TurnState::*;

        let invalid = |input: &TurnInput| TransitionError::Invalid {
            state: self.name(),
            input: input.name(),
        };

        let next = match (self, input) {
            (Idle, TurnInput::Submit { prompt, with_steps }) => Submitted { prompt, with_steps },

            (
                Submitted {
                    prompt,
                    with_steps: true,
                },
                TurnInput::BeginStreaming,
            ) => Streaming {
                prompt: prompt.clone(),
                steps: StepList::new(),
            },

            (
                Submitted {
                    prompt,
                    with_steps: true,
                }
                | Streaming { prompt, .. },
                TurnInput::BeginFallback,
            ) => Fallback {
                prompt: prompt.clone(),
                steps: StepList::new(),
            },

            (Streaming { prompt, steps }, TurnInput::StepUpdate(step)) => Streaming {
                prompt: prompt.clone(),
                steps: steps.merged(step),
            },
            (Fallback { prompt, steps }, TurnInput::StepUpdate(step)) => Fallback {
                prompt: prompt.clone(),
                steps: steps.merged(step),
            },

            (Fallback { prompt, steps }, TurnInput::CompleteSteps) => {
                let mut steps = steps.clone();
                steps.mark_all(StepStatus::Completed);
                Fallback {
                    prompt: prompt.clone(),
                    steps,
                }
            }

            (Submitted { .. }, TurnInput::Finish(reply)) => Completed {
                reply: Message::bot(reply_text(reply)),
            },
            (Streaming { steps, .. } | Fallback { steps, .. }, TurnInput::Finish(reply)) => {
                let reply = match reply {
                    Reply::Answer(text) => Message::bot_with_steps(text, steps.to_vec()),
                    Reply::Apology(text) => Message::bot(text),
                };
                Completed { reply }
            }

            (Completed { .. }, TurnInput::Acknowledge) => Idle,

            (_, input) => return Err(invalid(&input)),
        };
        Ok(next)
    }
}

fn reply_text(reply: Reply) -> String {
    match reply {
        Reply::Answer(text) | Reply::Apology(text) => text,
    }
}
