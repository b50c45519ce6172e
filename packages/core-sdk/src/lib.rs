pub mod config;
pub mod db;
pub mod drafting;
pub mod error;
pub mod json_extract;
pub mod llm;
pub mod models;
pub mod sanitize;
pub mod server;
pub mod telemetry;

pub use config::{AiConfig, BackendPreference};
pub use error::AiError;
pub use llm::{AiClient, BackendKind, ChatOptions, ChatReply};
pub use models::{ChatMessage, FactValue, Facts, Role};

/**
 * \brief Commonly used modules and types in one import.
 */
pub mod prelude {
    pub use crate::config::{AiConfig, AiSettings, BackendPreference};
    pub use crate::drafting::{self, Draft, DraftField};
    pub use crate::error::AiError;
    pub use crate::json_extract::{parse_model_json, parse_model_json_as};
    pub use crate::llm::{AiClient, BackendKind, ChatOptions, ChatReply};
    pub use crate::models::{ChatMessage, FactValue, Facts, Role};
    pub use crate::sanitize::sanitize;
    pub use crate::{db, server, telemetry};
}
