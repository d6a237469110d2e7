pub mod chat;
pub mod events;
pub mod settings;

pub use chat::{Message, Sender, Step, StepStatus};
pub use events::{ChatEvent, EventDecodeError, FallbackReply};
pub use settings::{ChatMode, ChatSettings, SettingsError};
