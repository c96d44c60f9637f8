//! Command denylist, checked before any session is opened.

use std::sync::LazyLock;

use regex::Regex;

use crate::domain::ValidationError;

/// (description, pattern)
const DENYLIST: &[(&str, &str)] = &[
    (
        "recursive deletion of the root filesystem",
        r"\brm\s+(?:-\S+\s+)*(?:-[a-zA-Z]*[rR][a-zA-Z]*|--recursive)\s+(?:-\S+\s+)*/\*?(?:[\s;&|]|$)",
    ),
    ("raw write to a block device", r"\bdd\b[^;&|]*\bof=/dev/"),
    (
        "redirect onto a block device",
        r">\s*/dev/(?:sd|hd|vd|xvd|nvme)[a-z0-9]*",
    ),
    ("filesystem format", r"\bmkfs(?:\.[a-z0-9]+)?\b"),
    (
        "fork bomb",
        r":\s*\(\s*\)\s*\{\s*:\s*\|\s*:\s*&\s*\}\s*;\s*:",
    ),
    (
        "piping a download into a shell",
        r"\b(?:curl|wget)\b[^|;&]*\|\s*(?:sudo\s+)?(?:ba|z|da)?sh\b",
    ),
];

struct Rule {
    description: &'static str,
    pattern: Regex,
}

static RULES: LazyLock<Option<Vec<Rule>>> = LazyLock::new(|| {
    DENYLIST
        .iter()
        .map(|&(description, pattern)| {
            Regex::new(pattern).ok().map(|pattern| Rule {
                description,
                pattern,
            })
        })
        .collect()
});

/// Reject empty commands and commands matching the denylist.
pub fn validate_command(command: &str) -> Result<(), ValidationError> {
    if command.trim().is_empty() {
        return Err(ValidationError::CommandRejected("empty command".to_string()));
    }
    let Some(rules) = RULES.as_ref() else {
        // a denylist that failed to compile rejects everything
        return Err(ValidationError::CommandRejected(
            "command denylist unavailable".to_string(),
        ));
    };
    if let Some(rule) = rules.iter().find(|rule| rule.pattern.is_match(command)) {
        tracing::warn!(command, rule = rule.description, "command rejected");
        return Err(ValidationError::CommandRejected(rule.description.to_string()));
    }
    Ok(())
}
