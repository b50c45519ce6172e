//! Post-processing for generated text: drops unverifiable sourcing phrases and
//! any number the caller's facts do not contain.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::models::Facts;

pub const SOURCE_PLACEHOLDER: &str = "[source removed]";
pub const NUMBER_PLACEHOLDER: &str = "[number removed]";
pub const DISCLOSURE_NOTE: &str =
    "Note: figures not present in the provided details were removed.";

static SOURCING_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?ix)
        \b(?:
            according\s+to
                (?:\s+(?:a|an|the|some|one|many|several|recent|new|published|national|global))*
                (?:\s+(?:study|studies|survey|surveys|report|reports|research|experts|sources|statistics|data))?
          | (?:recent\s+)?(?:studies|research|surveys|statistics|reports|data|experts|evidence)
                \s+(?:show|shows|showed|suggest|suggests|indicate|indicates|say|says|reveal|reveals|confirm|confirms|found)
          | (?:a|one|another)\s+(?:recent\s+)?(?:study|survey|report)
                \s+(?:found|finds|shows|showed|revealed|suggests)
          | it\s+is\s+(?:widely\s+)?(?:reported|known|believed)\s+that
          | reportedly
        )\b",
    )
    .expect("sourcing pattern is valid")
});

static NUMBER_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b\d+%?").expect("number pattern is valid"));

/**
 * \brief What `sanitize_with_report` changed.
 */
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sanitized {
    pub text: String,
    pub sources_removed: usize,
    pub numbers_removed: usize,
}

impl Sanitized {
    pub fn redacted(&self) -> bool {
        self.sources_removed > 0 || self.numbers_removed > 0
    }
}

/**
 * \brief Sanitize generated text against the caller's facts.
 */
pub fn sanitize(text: &str, facts: &Facts) -> String {
    sanitize_with_report(text, facts).text
}

/**
 * \brief Sanitize and report how many phrases and numbers were replaced.
 */
pub fn sanitize_with_report(text: &str, facts: &Facts) -> Sanitized {
    let mut report = redact(text, &allowed_numbers(facts));
    if report.numbers_removed > 0 {
        report.text.push_str("\n\n");
        report.text.push_str(DISCLOSURE_NOTE);
    }
    report
}

/**
 * \brief Replace sourcing phrases and numbers outside `allowed`, without the disclosure note.
 * \details For callers that sanitize several fragments and add the note once.
 */
pub fn redact(text: &str, allowed: &HashSet<String>) -> Sanitized {
    let sources_removed = SOURCING_PATTERN.find_iter(text).count();
    let without_sources = SOURCING_PATTERN.replace_all(text, SOURCE_PLACEHOLDER);
    let (out, numbers_removed) = redact_numbers(&without_sources, allowed);

    tracing::debug!(sources_removed, numbers_removed, "sanitized model output");
    Sanitized {
        text: out,
        sources_removed,
        numbers_removed,
    }
}

/**
 * \brief Every numeric token that appears in any fact value.
 */
pub fn allowed_numbers(facts: &Facts) -> HashSet<String> {
    facts
        .values()
        .flat_map(|v| v.texts())
        .flat_map(numeric_tokens)
        .map(str::to_string)
        .collect()
}

/// Standalone numeric tokens: digits, optional `%`, not glued to a following word char.
fn numeric_tokens(text: &str) -> impl Iterator<Item = &str> {
    NUMBER_TOKEN
        .find_iter(text)
        .filter(move |m| is_standalone(text, m.end(), m.as_str()))
        .map(|m| m.as_str())
}

fn is_standalone(text: &str, end: usize, token: &str) -> bool {
    if token.ends_with('%') {
        return true;
    }
    match text[end..].chars().next() {
        Some(c) => !(c.is_alphanumeric() || c == '_'),
        None => true,
    }
}

fn redact_numbers(text: &str, allowed: &HashSet<String>) -> (String, usize) {
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    let mut removed = 0;
    for m in NUMBER_TOKEN.find_iter(text) {
        let token = m.as_str();
        if !is_standalone(text, m.end(), token) || allowed.contains(token) {
            continue;
        }
        out.push_str(&text[last..m.start()]);
        out.push_str(NUMBER_PLACEHOLDER);
        last = m.end();
        removed += 1;
    }
    out.push_str(&text[last..]);
    (out, removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FactValue;

    fn facts(pairs: &[(&str, FactValue)]) -> Facts {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_keeps_fact_number_and_drops_sourcing() {
        let f = facts(&[("x", "45%".into())]);
        let out = sanitize("According to a study, 45% improved", &f);
        assert_eq!(out, "[source removed], 45% improved");
        assert!(!out.contains(DISCLOSURE_NOTE));
    }

    #[test]
    fn test_redacts_unknown_number_and_appends_note() {
        let out = sanitize("Attendance was 120", &Facts::new());
        assert_eq!(
            out,
            format!("Attendance was {}\n\n{}", NUMBER_PLACEHOLDER, DISCLOSURE_NOTE)
        );
    }

    #[test]
    fn test_sourcing_patterns_are_case_insensitive() {
        let report = sanitize_with_report(
            "STUDIES SHOW the workshop helped. Experts say it was good. It is widely reported that students liked it.",
            &Facts::new(),
        );
        assert_eq!(report.sources_removed, 3);
        assert_eq!(report.numbers_removed, 0);
        assert!(!report.text.to_lowercase().contains("studies show"));
        assert!(!report.text.to_lowercase().contains("experts say"));
        assert!(report.redacted());
    }

    #[test]
    fn test_numbers_glued_to_words_are_not_tokens() {
        let out = sanitize("The 3rd session in room A101 ran long", &Facts::new());
        assert_eq!(out, "The 3rd session in room A101 ran long");
    }

    #[test]
    fn test_list_facts_feed_allow_list() {
        let f = facts(&[
            ("participants", FactValue::List(vec!["120 students".into(), "8 faculty".into()])),
            ("venue", FactValue::Empty),
        ]);
        let out = sanitize("120 students and 8 faculty joined; 15 volunteers helped.", &f);
        assert!(out.starts_with("120 students and 8 faculty joined; [number removed] volunteers"));
        assert!(out.ends_with(DISCLOSURE_NOTE));
    }

    #[test]
    fn test_percent_and_bare_number_are_distinct_tokens() {
        let f = facts(&[("growth", "45".into())]);
        let report = sanitize_with_report("Growth was 45%, up from 45 last year.", &f);
        assert_eq!(report.numbers_removed, 1);
        assert!(report.text.starts_with("Growth was [number removed], up from 45 last year."));
    }

    #[test]
    fn test_years_need_to_be_in_facts() {
        let f = facts(&[("date", "12 March 2024".into())]);
        let out = sanitize("Held on 12 March 2024, following the 2023 edition.", &f);
        assert!(out.starts_with("Held on 12 March 2024, following the [number removed] edition."));
    }

    #[test]
    fn test_allowed_numbers_tokenizes_all_values() {
        let f = facts(&[
            ("a", "Budget 2,500 and 30%".into()),
            ("b", FactValue::List(vec!["Day 2".into()])),
        ]);
        let allowed = allowed_numbers(&f);
        for t in ["2", "500", "30%"] {
            assert!(allowed.contains(t), "missing {t}");
        }
        assert!(!allowed.contains("30"));
    }

    #[test]
    fn test_sanitize_is_deterministic() {
        let f = facts(&[("x", "10".into())]);
        let text = "Reportedly 10 of 12 teams finished.";
        assert_eq!(sanitize(text, &f), sanitize(text, &f));
    }
}
