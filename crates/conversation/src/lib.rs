//! Turn orchestration for one chat conversation.
//!
//! A [`ChatSession`] owns the message log and a single explicit [`TurnState`];
//! every mutation goes through [`TurnState::transition`].

pub mod fallback;
pub mod session;
pub mod steps;
pub mod turn;

pub use session::{ChatSession, SessionUpdate, SubmitError};
pub use steps::StepList;
pub use turn::{Reply, TransitionError, TurnInput, TurnState};
