#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("backend returned {status}: {detail}")]
    Status { status: u16, detail: String },

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("invalid response body: {0}")]
    Body(#[from] serde_json::Error),

    #[error("stream interrupted: {0}")]
    Stream(String),
}
