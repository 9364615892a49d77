//! Instruction templates with `{NAME}` placeholders.
//!
//! Placeholders are upper-case identifiers in braces. Any other brace usage
//! (such as the JSON output example in the default template) is left alone.

use std::collections::{BTreeMap, BTreeSet};

/// Emergency plan context shared by every segment.
pub const EMERGENCY_PLAN: &str = "EMERGENCY_PLAN";
/// Archetype description of the segment.
pub const ARCHETYPE_DESC: &str = "ARCHETYPE_DESC";
/// Name of the current phase.
pub const PHASE_NAME: &str = "PHASE_NAME";
/// Situation report for the current phase.
pub const PHASE_CONTENT: &str = "PHASE_CONTENT";
/// Segment id.
pub const SEGMENT_ID: &str = "SEGMENT_ID";
/// Rendered segment attributes.
pub const SEGMENT_PROFILE: &str = "SEGMENT_PROFILE";

/// Every placeholder the pipeline knows how to fill.
pub const KNOWN_PLACEHOLDERS: &[&str] = &[
    EMERGENCY_PLAN,
    ARCHETYPE_DESC,
    PHASE_NAME,
    PHASE_CONTENT,
    SEGMENT_ID,
    SEGMENT_PROFILE,
];

/// Built-in persona instruction.
pub const DEFAULT_TEMPLATE: &str = r#"You are simulating one member of a population living through a hurricane.

EMERGENCY PLAN:
{EMERGENCY_PLAN}

YOUR ARCHETYPE: {ARCHETYPE_DESC}
YOUR PROFILE ({SEGMENT_ID}): {SEGMENT_PROFILE}

CURRENT PHASE: {PHASE_NAME}
{PHASE_CONTENT}

Decide what this person does during this phase. Make the archetype characteristics
SPECIFICALLY shape the decision and say how in archetype_influence.

STRICT OUTPUT RULES:
Return ONLY this JSON object (no prose, no markdown, no extra keys):
{
    "race": str,
    "age": int,
    "sex": str,
    "response": str,
    "current_location": str,
    "resources_remaining": str,
    "archetype_influence": str
}
Numbers must be numbers (no quotes). Booleans must be true/false (lowercase).
Do not print long analyses; keep reasoning internal.
"#;

/// Errors raised while preparing or rendering a template.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TemplateError {
    /// Template references a placeholder nobody can fill
    #[error("Unknown placeholder {{{0}}}")]
    UnknownPlaceholder(String),

    /// No value was supplied for a placeholder
    #[error("No value for placeholder {{{0}}}")]
    MissingValue(String),
}

/// A parsed instruction template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstructionTemplate {
    text: String,
    placeholders: BTreeSet<String>,
}

impl InstructionTemplate {
    /// Parse a template.
    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into();
        let placeholders = scan(&text)
            .into_iter()
            .map(|(_, name)| name.to_string())
            .collect();
        Self { text, placeholders }
    }

    /// Parse a template and require every placeholder to be in `known`.
    pub fn with_known(text: impl Into<String>, known: &[&str]) -> Result<Self, TemplateError> {
        let template = Self::new(text);
        if let Some(unknown) = template
            .placeholders
            .iter()
            .find(|p| !known.contains(&p.as_str()))
        {
            return Err(TemplateError::UnknownPlaceholder(unknown.clone()));
        }
        Ok(template)
    }

    /// Placeholder names used by the template.
    pub fn placeholders(&self) -> &BTreeSet<String> {
        &self.placeholders
    }

    /// Raw template text.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Substitute every placeholder; values not referenced are ignored.
    pub fn render(&self, values: &BTreeMap<&str, String>) -> Result<String, TemplateError> {
        let mut out = String::with_capacity(self.text.len());
        let mut last = 0;

        for (start, name) in scan(&self.text) {
            let value = values
                .get(name)
                .ok_or_else(|| TemplateError::MissingValue(name.to_string()))?;
            out.push_str(&self.text[last..start]);
            out.push_str(value);
            last = start + name.len() + 2;
        }
        out.push_str(&self.text[last..]);

        Ok(out)
    }
}

impl Default for InstructionTemplate {
    fn default() -> Self {
        Self::new(DEFAULT_TEMPLATE)
    }
}

/// Find `{NAME}` occurrences: byte offset of the opening brace and the name.
fn scan(text: &str) -> Vec<(usize, &str)> {
    let bytes = text.as_bytes();
    let mut found = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'{' {
            let rest = &bytes[i + 1..];
            let len = rest
                .iter()
                .take_while(|b| b.is_ascii_uppercase() || **b == b'_')
                .count();
            if len > 0 && rest.get(len) == Some(&b'}') {
                found.push((i, &text[i + 1..i + 1 + len]));
                i += len + 2;
                continue;
            }
        }
        i += 1;
    }

    found
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values() -> BTreeMap<&'static str, String> {
        let mut v = BTreeMap::new();
        v.insert(EMERGENCY_PLAN, "T-72 HOURS: monitor the storm".to_string());
        v.insert(ARCHETYPE_DESC, "retired, high risk, socially limited".to_string());
        v.insert(PHASE_NAME, "T-48 HOURS: Tuesday 6:00 AM".to_string());
        v.insert(PHASE_CONTENT, "HURRICANE WARNING ISSUED".to_string());
        v.insert(SEGMENT_ID, "retired_1".to_string());
        v.insert(SEGMENT_PROFILE, "age: 71".to_string());
        v
    }

    #[test]
    fn test_default_placeholders() {
        let template = InstructionTemplate::default();
        let expected: BTreeSet<String> = KNOWN_PLACEHOLDERS.iter().map(|s| s.to_string()).collect();
        assert_eq!(template.placeholders(), &expected);
    }

    #[test]
    fn test_render_replaces_everything() {
        let rendered = InstructionTemplate::default().render(&values()).unwrap();

        for name in KNOWN_PLACEHOLDERS {
            assert!(!rendered.contains(&format!("{{{}}}", name)));
        }
        assert!(rendered.contains("T-72 HOURS"));
        assert!(rendered.contains("T-48 HOURS: Tuesday 6:00 AM"));
        assert!(rendered.contains("retired, high risk"));
        // JSON braces in the output rules survive
        assert!(rendered.contains("\"archetype_influence\": str"));
        assert!(rendered.contains("{\n    \"race\""));
    }

    #[test]
    fn test_missing_value() {
        let template = InstructionTemplate::new("Phase {PHASE_NAME} for {SEGMENT_ID}");
        let mut v = BTreeMap::new();
        v.insert(PHASE_NAME, "landfall".to_string());
        assert_eq!(
            template.render(&v),
            Err(TemplateError::MissingValue("SEGMENT_ID".to_string()))
        );
    }

    #[test]
    fn test_unknown_placeholder() {
        let err = InstructionTemplate::with_known("Hello {WORLD}", KNOWN_PLACEHOLDERS).unwrap_err();
        assert_eq!(err, TemplateError::UnknownPlaceholder("WORLD".to_string()));
    }

    #[test]
    fn test_non_placeholder_braces() {
        let template = InstructionTemplate::new("{lower} {} {A-B} {{PHASE_NAME}}");
        assert_eq!(template.placeholders().len(), 1);
        let mut v = BTreeMap::new();
        v.insert(PHASE_NAME, "x".to_string());
        assert_eq!(template.render(&v).unwrap(), "{lower} {} {A-B} {x}");
    }
}
