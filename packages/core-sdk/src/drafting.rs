//! AI-assisted drafting of event-report fields from caller facts.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::AiError;
use crate::json_extract::parse_string_list;
use crate::llm::{AiClient, BackendKind, ChatOptions};
use crate::models::{ChatMessage, Facts};
use crate::sanitize::{allowed_numbers, redact, DISCLOSURE_NOTE};

const BASE_RULES: &str = "You write sections of university event reports for the IQAC office. \
Use only the details provided by the user. Do not invent names, dates, statistics or sources. \
If a detail is missing, write around it instead of guessing. Use a formal, concise tone.";

/**
 * \brief Report fields the drafting endpoint can fill in.
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DraftField {
    Summary,
    NeedAnalysis,
    Objectives,
    LearningOutcomes,
    OutcomesImpact,
}

impl DraftField {
    pub const ALL: [DraftField; 5] = [
        DraftField::Summary,
        DraftField::NeedAnalysis,
        DraftField::Objectives,
        DraftField::LearningOutcomes,
        DraftField::OutcomesImpact,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            DraftField::Summary => "summary",
            DraftField::NeedAnalysis => "need_analysis",
            DraftField::Objectives => "objectives",
            DraftField::LearningOutcomes => "learning_outcomes",
            DraftField::OutcomesImpact => "outcomes_impact",
        }
    }

    /** \brief List-shaped fields are returned as items as well as text. */
    pub fn is_list(self) -> bool {
        matches!(self, DraftField::Objectives | DraftField::LearningOutcomes)
    }

    fn instruction(self) -> &'static str {
        match self {
            DraftField::Summary => {
                "Write a one-paragraph summary of the event (120 to 180 words)."
            }
            DraftField::NeedAnalysis => {
                "Write a short need analysis explaining why the event was organised for its audience."
            }
            DraftField::Objectives => {
                "List 3 to 5 objectives of the event. Reply with a JSON array of strings only."
            }
            DraftField::LearningOutcomes => {
                "List 3 to 5 learning outcomes for participants. Reply with a JSON array of strings only."
            }
            DraftField::OutcomesImpact => {
                "Describe the outcomes and impact of the event in one or two paragraphs."
            }
        }
    }
}

impl fmt::Display for DraftField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DraftField {
    type Err = AiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase().replace('-', "_");
        DraftField::ALL
            .into_iter()
            .find(|f| f.as_str() == wanted)
            .ok_or_else(|| AiError::InvalidRequest(format!("unknown draft field `{}`", s)))
    }
}

/**
 * \brief A sanitized draft for one report field.
 */
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Draft {
    pub field: DraftField,
    pub text: String,
    /** \brief Individual items for list-shaped fields; empty otherwise. */
    pub items: Vec<String>,
    pub backend: BackendKind,
    /** \brief True when any phrase or number was removed. */
    pub redacted: bool,
}

/**
 * \brief System prompt for a field.
 */
pub fn system_prompt(field: DraftField) -> String {
    format!("{}\n\n{}", BASE_RULES, field.instruction())
}

/**
 * \brief Render the facts as the user message; empty values are skipped.
 */
pub fn facts_prompt(facts: &Facts) -> Result<String, AiError> {
    let mut lines = Vec::new();
    for (key, value) in facts {
        if value.is_empty() {
            continue;
        }
        let joined = value
            .texts()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("; ");
        lines.push(format!("- {}: {}", humanize(key), joined));
    }
    if lines.is_empty() {
        return Err(AiError::InvalidRequest(
            "drafting needs at least one non-empty fact".to_string(),
        ));
    }
    Ok(format!("Event details:\n{}", lines.join("\n")))
}

fn humanize(key: &str) -> String {
    let spaced = key.replace(['_', '-'], " ");
    let mut chars = spaced.trim().chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/**
 * \brief Draft one field: prompt, chat, then sanitize against the same facts.
 * \param options model/temperature/timeout overrides; `system` replaces the field prompt
 */
pub async fn draft(
    client: &AiClient,
    field: DraftField,
    facts: &Facts,
    options: &ChatOptions,
) -> Result<Draft, AiError> {
    let user = facts_prompt(facts)?;
    let mut opts = options.clone();
    if opts.system.is_none() {
        opts.system = Some(system_prompt(field));
    }

    let reply = client
        .chat_detailed(&[ChatMessage::user(user)], &opts)
        .await?;
    let draft = finish_draft(field, &reply.text, facts, reply.backend);
    tracing::info!(field = %field, backend = %draft.backend, redacted = draft.redacted, "draft generated");
    Ok(draft)
}

/**
 * \brief Turn a raw model reply into a sanitized `Draft`.
 */
pub fn finish_draft(field: DraftField, raw: &str, facts: &Facts, backend: BackendKind) -> Draft {
    let allowed = allowed_numbers(facts);

    let (mut text, items, numbers_removed, redacted) = if field.is_list() {
        let mut items = Vec::new();
        let mut numbers = 0;
        let mut any = false;
        for item in parse_string_list(raw) {
            let s = redact(&item, &allowed);
            numbers += s.numbers_removed;
            any |= s.redacted();
            items.push(s.text);
        }
        let text = items
            .iter()
            .map(|i| format!("- {}", i))
            .collect::<Vec<_>>()
            .join("\n");
        (text, items, numbers, any)
    } else {
        let s = redact(raw.trim(), &allowed);
        let redacted = s.redacted();
        (s.text, Vec::new(), s.numbers_removed, redacted)
    };

    if numbers_removed > 0 {
        text.push_str("\n\n");
        text.push_str(DISCLOSURE_NOTE);
    }

    Draft {
        field,
        text,
        items,
        backend,
        redacted,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FactValue;

    fn sample_facts() -> Facts {
        let mut facts = Facts::new();
        facts.insert("event_title".into(), "AI in Education Workshop".into());
        facts.insert("participants".into(), "85 students".into());
        facts.insert(
            "resource_persons".into(),
            FactValue::List(vec!["Dr. Rao".into(), "Prof. Mehta".into()]),
        );
        facts.insert("venue".into(), FactValue::Empty);
        facts
    }

    #[test]
    fn test_field_parse_and_display() {
        assert_eq!("need-analysis".parse::<DraftField>().expect("parse"), DraftField::NeedAnalysis);
        assert_eq!(" Objectives ".parse::<DraftField>().expect("parse"), DraftField::Objectives);
        assert!("budget".parse::<DraftField>().is_err());
        for f in DraftField::ALL {
            assert_eq!(f.to_string().parse::<DraftField>().expect("round"), f);
        }
    }

    #[test]
    fn test_facts_prompt_skips_empty_and_humanizes_keys() {
        let prompt = facts_prompt(&sample_facts()).expect("prompt");
        assert!(prompt.contains("- Event title: AI in Education Workshop"));
        assert!(prompt.contains("- Resource persons: Dr. Rao; Prof. Mehta"));
        assert!(!prompt.contains("Venue"));
    }

    #[test]
    fn test_facts_prompt_requires_some_fact() {
        let mut facts = Facts::new();
        facts.insert("venue".into(), FactValue::Empty);
        assert!(matches!(facts_prompt(&facts), Err(AiError::InvalidRequest(_))));
    }

    #[test]
    fn test_system_prompt_carries_field_instruction() {
        let p = system_prompt(DraftField::Objectives);
        assert!(p.starts_with(BASE_RULES));
        assert!(p.contains("JSON array"));
    }

    #[test]
    fn test_finish_prose_draft_redacts_once() {
        let raw = "The workshop drew 85 students. Studies show 90% of them improved.";
        let d = finish_draft(DraftField::Summary, raw, &sample_facts(), BackendKind::Local);
        assert!(d.text.contains("85 students"));
        assert!(d.text.contains("[source removed]"));
        assert!(d.text.contains("[number removed] of them"));
        assert!(d.text.ends_with(DISCLOSURE_NOTE));
        assert_eq!(d.text.matches(DISCLOSURE_NOTE).count(), 1);
        assert!(d.items.is_empty());
        assert!(d.redacted);
    }

    #[test]
    fn test_finish_list_draft_from_fenced_json() {
        let raw = "```json\n[\"Introduce AI tools to 85 students\", \"Run 3 hands-on labs\"]\n```";
        let d = finish_draft(DraftField::Objectives, raw, &sample_facts(), BackendKind::Remote);
        assert_eq!(
            d.items,
            vec!["Introduce AI tools to 85 students", "Run [number removed] hands-on labs"]
        );
        assert!(d.text.starts_with("- Introduce AI tools to 85 students\n- Run"));
        assert_eq!(d.text.matches(DISCLOSURE_NOTE).count(), 1);
        assert_eq!(d.backend, BackendKind::Remote);
    }

    #[test]
    fn test_finish_list_draft_from_bullets_without_redaction() {
        let raw = "1. Build awareness\n2. Encourage adoption";
        let d = finish_draft(DraftField::LearningOutcomes, raw, &sample_facts(), BackendKind::Local);
        assert_eq!(d.items, vec!["Build awareness", "Encourage adoption"]);
        assert!(!d.redacted);
        assert!(!d.text.contains(DISCLOSURE_NOTE));
    }
}
