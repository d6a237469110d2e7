use clap::Parser;
use shared::{ChatMode, ChatSettings};

/// Terminal chat client for the KYN assistant.
///
/// The backend address comes from settings.json or KYN_BASE_URL.
#[derive(Parser, Debug, Default, Clone, PartialEq)]
#[command(version, about, long_about = None)]
pub struct Flags {
    /// Replay a scripted processing run instead of calling the backend
    #[arg(long)]
    pub demo: bool,

    /// One blocking request per message, no processing steps
    #[arg(long)]
    pub simple: bool,

    /// Skip the streaming endpoint and use the blocking fallback
    #[arg(long)]
    pub no_stream: bool,

    /// Backend base URL (overrides settings.json and KYN_BASE_URL)
    #[arg(long)]
    pub base_url: Option<String>,

    /// Write the settings in effect to settings.json and exit
    #[arg(long)]
    pub save_config: bool,
}

impl Flags {
    pub fn apply(&self, settings: &mut ChatSettings) {
        if self.simple {
            settings.mode = ChatMode::Simple;
        }
        if self.no_stream {
            settings.streaming = false;
        }
        if let Some(url) = &self.base_url {
            settings.base_url = url.clone();
        }
    }
}
