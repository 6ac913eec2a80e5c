use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

use crate::domain::task::TaskDescriptor;
use crate::error::{CoreError, Result};

pub const DEFAULT_BRANCH_PATTERN: &str = "{type}/{issueKey}-{slug}";

const MAX_SLUG_LEN: usize = 40;
const EMPTY_SLUG: &str = "untitled";
const PLACEHOLDERS: &[&str] = &["type", "issueKey", "slug"];

fn non_alphanumeric() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^a-z0-9]+").expect("static regex"))
}

fn placeholder() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{([^{}]*)\}").expect("static regex"))
}

/// Lowercase, collapse non-alphanumeric runs to `-`, trim, cap at 40 characters.
pub fn slugify(title: &str) -> String {
    let lowered = title.to_ascii_lowercase();
    let collapsed = non_alphanumeric().replace_all(&lowered, "-");
    let trimmed = collapsed.trim_matches('-');

    let capped: String = trimmed.chars().take(MAX_SLUG_LEN).collect();
    let slug = capped.trim_end_matches('-');

    if slug.is_empty() {
        EMPTY_SLUG.to_string()
    } else {
        slug.to_string()
    }
}

/// Template for deriving a branch name from a task.
///
/// Supported placeholders are `{type}` (the specialist kind), `{issueKey}` and
/// `{slug}`. Rendering is a pure function of the pattern and the task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BranchPattern(String);

impl BranchPattern {
    pub fn new(pattern: impl Into<String>) -> Result<Self> {
        let pattern = pattern.into();
        if pattern.trim().is_empty() {
            return Err(CoreError::InvalidPattern {
                pattern,
                reason: "pattern is empty".to_string(),
            });
        }

        for caps in placeholder().captures_iter(&pattern) {
            let name = &caps[1];
            if !PLACEHOLDERS.contains(&name) {
                return Err(CoreError::InvalidPattern {
                    reason: format!("unknown placeholder '{{{}}}'", name),
                    pattern,
                });
            }
        }

        Ok(Self(pattern))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Substituted values are inserted verbatim and never re-expanded.
    pub fn render(&self, task: &TaskDescriptor) -> String {
        placeholder()
            .replace_all(&self.0, |caps: &regex::Captures<'_>| match &caps[1] {
                "type" => task.specialist.clone(),
                "issueKey" => task.key.clone(),
                "slug" => slugify(&task.title),
                _ => caps[0].to_string(),
            })
            .into_owned()
    }
}

impl Default for BranchPattern {
    fn default() -> Self {
        Self(DEFAULT_BRANCH_PATTERN.to_string())
    }
}

impl TryFrom<String> for BranchPattern {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<BranchPattern> for String {
    fn from(pattern: BranchPattern) -> Self {
        pattern.0
    }
}
