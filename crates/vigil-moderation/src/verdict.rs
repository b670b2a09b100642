use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

use vigil_core::{Action, Result, VigilError};

/// What the moderation model decided about a page, app, or appeal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModerationVerdict {
    pub action: Action,
    /// Child-safe explanation. Never reveals the parent's guidelines.
    pub reasoning: String,
    /// Detailed explanation for the parent.
    pub parental_reasoning: Option<String>,
}

impl ModerationVerdict {
    pub fn allow(reasoning: impl Into<String>) -> Self {
        Self {
            action: Action::Allow,
            reasoning: reasoning.into(),
            parental_reasoning: None,
        }
    }

    pub fn block(reasoning: impl Into<String>) -> Self {
        Self {
            action: Action::Block,
            reasoning: reasoning.into(),
            parental_reasoning: None,
        }
    }

    pub fn with_parental_reasoning(mut self, text: impl Into<String>) -> Self {
        self.parental_reasoning = Some(text.into());
        self
    }

    pub fn is_allowed(&self) -> bool {
        self.action == Action::Allow
    }
}

#[derive(Deserialize)]
struct RawVerdict {
    action: String,
    #[serde(default)]
    reasoning: Option<String>,
    #[serde(default)]
    parental_reasoning: Option<String>,
}

static FENCED_JSON: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```(?:json)?\s*(\{.*?\})\s*```").expect("static regex")
});

// Models sometimes leave a trailing comma before the closing brace.
static TRAILING_COMMA: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r",(\s*[}\]])").expect("static regex"));

const DEFAULT_BLOCK_REASON: &str = "This content isn't available right now.";

/// Parse a verdict out of a model reply.
///
/// Accepts a bare JSON object, one wrapped in a code fence, or one embedded in
/// prose. `approve`/`allow`/`ok` allow; `block`/`deny` block.
pub fn parse_verdict(reply: &str) -> Result<ModerationVerdict> {
    let candidate = FENCED_JSON
        .captures(reply)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .or_else(|| {
            let start = reply.find('{')?;
            let end = reply.rfind('}')?;
            (start < end).then(|| &reply[start..=end])
        })
        .ok_or_else(|| VigilError::Moderation("reply contains no JSON object".into()))?;

    let cleaned = TRAILING_COMMA.replace_all(candidate, "$1");
    let raw: RawVerdict = serde_json::from_str(&cleaned)
        .map_err(|e| VigilError::Moderation(format!("malformed verdict: {e}")))?;

    let action = match raw.action.trim().to_lowercase().as_str() {
        "approve" | "approved" | "allow" | "ok" => Action::Allow,
        "block" | "blocked" | "deny" => Action::Block,
        other => {
            return Err(VigilError::Moderation(format!("unknown action '{other}'")));
        }
    };

    let reasoning = raw
        .reasoning
        .map(|r| r.trim().to_string())
        .filter(|r| !r.is_empty())
        .unwrap_or_else(|| match action {
            Action::Allow => String::new(),
            Action::Block => DEFAULT_BLOCK_REASON.to_string(),
        });

    Ok(ModerationVerdict {
        action,
        reasoning,
        parental_reasoning: raw
            .parental_reasoning
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty()),
    })
}
