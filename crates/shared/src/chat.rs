//! Conversation data model shared by the transport, the turn orchestrator and
//! whatever presentation layer renders the chat.

use serde::{Deserialize, Serialize};

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Bot,
}

/// Status of a single server-side processing step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Processing,
    Completed,
    Warning,
    Error,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Processing => "processing",
            StepStatus::Completed => "completed",
            StepStatus::Warning => "warning",
            StepStatus::Error => "error",
        }
    }

    /// Short glyph used by text renderers.
    pub fn glyph(&self) -> &'static str {
        match self {
            StepStatus::Processing => "…",
            StepStatus::Completed => "✓",
            StepStatus::Warning => "!",
            StepStatus::Error => "✗",
        }
    }
}

/// A named unit of progress reported before the final answer.
///
/// `name` identifies the step kind (`analysis`, `data_collection`, ...) and is
/// unique within one turn's step list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    #[serde(rename = "step")]
    pub name: String,
    #[serde(default)]
    pub message: String,
    pub status: StepStatus,
    /// Arbitrary detail, e.g. `{"apis": [...]}` or `{"user_ids": [...]}`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    /// Milliseconds since the epoch, when the backend stamps one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

impl Step {
    pub fn new(name: impl Into<String>, message: impl Into<String>, status: StepStatus) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            status,
            data: None,
            timestamp: None,
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_timestamp(mut self, millis: i64) -> Self {
        self.timestamp = Some(millis);
        self
    }

    pub fn with_status(mut self, status: StepStatus) -> Self {
        self.status = status;
        self
    }

    /// Human-readable title for the step kind.
    pub fn title(&self) -> String {
        match self.name.as_str() {
            "analysis" => "Query Analysis".to_string(),
            "user_extraction" => "User ID Extraction".to_string(),
            "data_collection" => "Data Collection".to_string(),
            "processing" => "Data Processing".to_string(),
            "ai_analysis" => "AI Analysis".to_string(),
            "api_call" => "Data API Call".to_string(),
            "completion" => "Completion".to_string(),
            "error" => "Error".to_string(),
            other => title_case(&other.replacen('_', " ", 1)),
        }
    }

    /// One-line rendering of the well-known `data` keys, if any are present.
    pub fn detail(&self) -> Option<String> {
        let data = self.data.as_ref()?;
        let mut parts = Vec::new();
        if let Some(apis) = join_strings(data.get("apis")) {
            parts.push(format!("APIs: {}", apis));
        }
        if let Some(users) = join_strings(data.get("user_ids")) {
            parts.push(format!("Users: {}", users));
        }
        if parts.is_empty() {
            None
        } else {
            Some(parts.join(" "))
        }
    }
}

fn join_strings(value: Option<&serde_json::Value>) -> Option<String> {
    let items = value?.as_array()?;
    Some(
        items
            .iter()
            .map(|v| match v.as_str() {
                Some(s) => s.to_string(),
                None => v.to_string(),
            })
            .collect::<Vec<_>>()
            .join(", "),
    )
}

/// Upper-cases the first character of every word, where a word is a run of
/// alphanumerics and underscores.
fn title_case(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut at_boundary = true;
    for c in input.chars() {
        let is_word = c.is_alphanumeric() || c == '_';
        if is_word && at_boundary {
            out.extend(c.to_uppercase());
        } else {
            out.push(c);
        }
        at_boundary = !is_word;
    }
    out
}

/// One entry in the conversation log. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub text: String,
    pub sender: Sender,
    #[serde(default)]
    pub has_steps: bool,
    /// Snapshot of the turn's steps at completion time.
    #[serde(default)]
    pub steps: Vec<Step>,
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            sender: Sender::User,
            has_steps: false,
            steps: Vec::new(),
        }
    }

    pub fn bot(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            sender: Sender::Bot,
            has_steps: false,
            steps: Vec::new(),
        }
    }

    /// Bot reply stamped with the steps shown during its turn.
    /// `has_steps` is true only when the snapshot is non-empty.
    pub fn bot_with_steps(text: impl Into<String>, steps: Vec<Step>) -> Self {
        Self {
            text: text.into(),
            sender: Sender::Bot,
            has_steps: !steps.is_empty(),
            steps,
        }
    }

    pub fn is_bot(&self) -> bool {
        self.sender == Sender::Bot
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_titles() {
        let step = |name: &str| Step::new(name, "", StepStatus::Processing);
        assert_eq!(step("analysis").title(), "Query Analysis");
        assert_eq!(step("ai_analysis").title(), "AI Analysis");
        assert_eq!(step("api_call").title(), "Data API Call");
        assert_eq!(step("graph_lookup").title(), "Graph Lookup");
        // Only the first underscore becomes a space.
        assert_eq!(step("graph_metric_scan").title(), "Graph Metric_scan");
    }

    #[test]
    fn test_step_detail() {
        let step = Step::new("analysis", "Identified sources", StepStatus::Completed).with_data(
            serde_json::json!({"apis": ["trending_interests", "active_communities"]}),
        );
        assert_eq!(
            step.detail().as_deref(),
            Some("APIs: trending_interests, active_communities")
        );

        let users = Step::new("user_extraction", "", StepStatus::Completed)
            .with_data(serde_json::json!({"user_ids": ["U123", "U456"]}));
        assert_eq!(users.detail().as_deref(), Some("Users: U123, U456"));

        let other = Step::new("analysis", "", StepStatus::Completed)
            .with_data(serde_json::json!({"count": 3}));
        assert_eq!(other.detail(), None);
    }

    #[test]
    fn test_step_wire_shape() {
        let step: Step = serde_json::from_str(
            r#"{"step":"analysis","message":"Analyzing...","status":"processing","timestamp":1700000000000}"#,
        )
        .unwrap();
        assert_eq!(step.name, "analysis");
        assert_eq!(step.status, StepStatus::Processing);
        assert_eq!(step.timestamp, Some(1_700_000_000_000));

        let json = serde_json::to_value(&step).unwrap();
        assert_eq!(json["step"], "analysis");
        assert!(json.get("data").is_none());
    }

    #[test]
    fn test_bot_with_steps_reflects_snapshot() {
        let empty = Message::bot_with_steps("hi", Vec::new());
        assert!(!empty.has_steps);

        let stamped = Message::bot_with_steps(
            "hi",
            vec![Step::new("analysis", "done", StepStatus::Completed)],
        );
        assert!(stamped.has_steps);
        assert!(stamped.is_bot());
        assert_eq!(stamped.steps.len(), 1);
    }
}
