//! Offline backend that replays a scripted processing run.
//!
//! Useful for exercising the whole step pipeline without a server.

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde_json::json;
use shared::{FallbackReply, Step, StepStatus};
use std::time::Duration;

use crate::backend::{ByteStream, ChatBackend};
use crate::error::TransportError;

pub struct DemoBackend {
    frame_delay: Duration,
    streaming: bool,
}

impl DemoBackend {
    pub fn new(frame_delay: Duration) -> Self {
        Self {
            frame_delay,
            streaming: true,
        }
    }

    /// Pretend the streaming endpoint is unavailable.
    pub fn without_streaming(mut self) -> Self {
        self.streaming = false;
        self
    }

    fn reply_for(message: &str) -> String {
        format!(
            "Here is a summary for \"{}\": engagement is concentrated in two active communities, \
             with U123 and U456 acting as the main bridges between them.",
            message.trim()
        )
    }
}

/// Each step is reported twice: once while running, once with its outcome.
pub fn demo_steps() -> Vec<Step> {
    let now = chrono::Utc::now().timestamp_millis();
    vec![
        Step::new(
            "analysis",
            "Analyzing your query to understand what information you need...",
            StepStatus::Processing,
        ),
        Step::new("analysis", "Identified 3 relevant data sources", StepStatus::Completed)
            .with_data(json!({
                "apis": ["trending_interests", "active_communities", "influence_analysis"]
            })),
        Step::new(
            "user_extraction",
            "Extracting user IDs from your query...",
            StepStatus::Processing,
        ),
        Step::new("user_extraction", "Found user IDs: U123, U456", StepStatus::Completed)
            .with_data(json!({ "user_ids": ["U123", "U456"] })),
        Step::new(
            "data_collection",
            "Fetching data from 3 sources...",
            StepStatus::Processing,
        ),
        Step::new(
            "data_collection",
            "Successfully collected data from 3 sources",
            StepStatus::Completed,
        ),
        Step::new(
            "ai_analysis",
            "Analyzing data with AI to generate comprehensive insights...",
            StepStatus::Processing,
        ),
        Step::new(
            "ai_analysis",
            "AI analysis completed successfully",
            StepStatus::Completed,
        ),
        Step::new("completion", "Response ready!", StepStatus::Completed),
    ]
    .into_iter()
    .map(|step| step.with_timestamp(now))
    .collect()
}

#[async_trait]
impl ChatBackend for DemoBackend {
    fn supports_streaming(&self) -> bool {
        self.streaming
    }

    async fn open_stream(&self, message: &str) -> Result<ByteStream, TransportError> {
        let mut frames = Vec::new();
        for step in demo_steps() {
            frames.push(format!("data: {}\n\n", serde_json::to_string(&step)?));
        }
        let last = json!({ "is_final": true, "message": Self::reply_for(message) });
        frames.push(format!("data: {}\n\n", last));

        let delay = self.frame_delay;
        Ok(stream::iter(frames)
            .then(move |frame| async move {
                tokio::time::sleep(delay).await;
                Ok::<_, TransportError>(frame.into_bytes())
            })
            .boxed())
    }

    async fn send_simple(&self, message: &str) -> Result<FallbackReply, TransportError> {
        Ok(FallbackReply::Response(Self::reply_for(message)))
    }
}
