use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/**
 * \brief Message role, aligned with the OpenAI chat schema.
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/**
 * \brief Chat message, serialized exactly as the chat-completions payload expects.
 */
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /** \brief system/user/assistant */
    pub role: Role,
    /** \brief Message body */
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/**
 * \brief One value in the facts dictionary.
 * \details Accepts a JSON string, an array of strings, or null.
 */
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FactValue {
    Text(String),
    List(Vec<String>),
    Empty,
}

impl FactValue {
    /** \brief Iterate over every string held by this value. */
    pub fn texts(&self) -> Box<dyn Iterator<Item = &str> + '_> {
        match self {
            FactValue::Text(s) => Box::new(std::iter::once(s.as_str())),
            FactValue::List(items) => Box::new(items.iter().map(String::as_str)),
            FactValue::Empty => Box::new(std::iter::empty()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.texts().all(|s| s.trim().is_empty())
    }
}

impl From<&str> for FactValue {
    fn from(value: &str) -> Self {
        FactValue::Text(value.to_string())
    }
}

impl From<String> for FactValue {
    fn from(value: String) -> Self {
        FactValue::Text(value)
    }
}

impl From<Vec<String>> for FactValue {
    fn from(value: Vec<String>) -> Self {
        FactValue::List(value)
    }
}

/**
 * \brief Caller-supplied ground truth, keyed by field name.
 * \details Ordered so prompts built from it are deterministic.
 */
pub type Facts = BTreeMap<String, FactValue>;
