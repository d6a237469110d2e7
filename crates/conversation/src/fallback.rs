//! Blocking-request path used when streaming is unavailable or fails.
//!
//! The backend reports no progress on this path, so three canned steps are
//! revealed on a fixed cadence while the request is prepared.

use shared::{FallbackReply, Message, Step, StepStatus};
use transport::ChatBackend;

use crate::session::{ChatSession, SubmitError};
use crate::turn::{Reply, TurnInput};

pub const CONNECTION_APOLOGY: &str = "Sorry, something went wrong with the connection.";
pub const SIMPLE_APOLOGY: &str = "Sorry, something went wrong.";
pub const UNEXPECTED_REPLY: &str = "Received an unexpected response format.";

pub fn canned_steps() -> [Step; 3] {
    [
        Step::new("analysis", "Analyzing your query...", StepStatus::Processing),
        Step::new(
            "data_collection",
            "Collecting relevant data...",
            StepStatus::Processing,
        ),
        Step::new("ai_analysis", "Generating insights...", StepStatus::Processing),
    ]
}

/// Text for the bot message produced from a blocking reply.
pub fn reply_text(reply: FallbackReply) -> String {
    match reply {
        FallbackReply::Response(text) => text,
        FallbackReply::Error(err) => format!("Error: {}", err),
        FallbackReply::Unexpected => UNEXPECTED_REPLY.to_string(),
    }
}

impl<B: ChatBackend> ChatSession<B> {
    pub(crate) async fn run_fallback(&mut self, prompt: &str) -> Result<Message, SubmitError> {
        self.apply(TurnInput::BeginFallback)?;

        let delay = self.settings().fallback_step_delay();
        for step in canned_steps() {
            self.apply(TurnInput::StepUpdate(step))?;
            tokio::time::sleep(delay).await;
            self.ensure_live()?;
        }

        let result = self.backend().send_simple(prompt).await;
        self.ensure_live()?;

        let reply = match result {
            Ok(reply) => {
                self.apply(TurnInput::CompleteSteps)?;
                Reply::Answer(reply_text(reply))
            }
            Err(e) => {
                tracing::error!(error = %e, "fallback request failed");
                Reply::Apology(CONNECTION_APOLOGY.to_string())
            }
        };
        self.apply(TurnInput::Finish(reply))?;
        self.commit()
    }

    /// Reduced flow: one blocking request, no steps.
    pub(crate) async fn run_simple(&mut self, prompt: &str) -> Result<Message, SubmitError> {
        let result = self.backend().send_simple(prompt).await;
        self.ensure_live()?;

        let reply = match result {
            Ok(reply) => Reply::Answer(reply_text(reply)),
            Err(e) => {
                tracing::error!(error = %e, "chat request failed");
                Reply::Apology(SIMPLE_APOLOGY.to_string())
            }
        };
        self.apply(TurnInput::Finish(reply))?;
        self.commit()
    }
}
