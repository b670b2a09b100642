use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, VigilError};
use crate::resource::ResourceKind;

/// Unique identifier of an appeal record (shown to the parent as the approval id).
pub type ApprovalId = Uuid;

/// Which policy list an entry lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListKind {
    Whitelist,
    Blacklist,
}

impl ListKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ListKind::Whitelist => "whitelist",
            ListKind::Blacklist => "blacklist",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "whitelist" => Some(ListKind::Whitelist),
            "blacklist" => Some(ListKind::Blacklist),
            _ => None,
        }
    }
}

/// A durable whitelist/blacklist record for a website or desktop app.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyEntry {
    pub kind: ResourceKind,
    /// Normalized domain or app name.
    pub identifier: String,
    pub list: ListKind,
    pub added_at: DateTime<Utc>,
    /// Child-facing explanation of why the entry exists.
    pub reason: String,
    /// Detailed explanation for the parent, when moderation produced one.
    #[serde(default)]
    pub parental_reasoning: Option<String>,
    pub appeals_used: u32,
    /// Screenshot captured when a desktop app was blocked.
    #[serde(default)]
    pub screenshot_ref: Option<String>,
}

/// A new entry (or a move of an existing one) requested by the engine or the parent.
#[derive(Debug, Clone)]
pub struct NewEntry {
    pub kind: ResourceKind,
    pub identifier: String,
    pub list: ListKind,
    pub reason: String,
    pub parental_reasoning: Option<String>,
    pub screenshot_ref: Option<String>,
}

impl NewEntry {
    pub fn new(kind: ResourceKind, identifier: impl Into<String>, list: ListKind, reason: impl Into<String>) -> Self {
        Self {
            kind,
            identifier: identifier.into(),
            list,
            reason: reason.into(),
            parental_reasoning: None,
            screenshot_ref: None,
        }
    }

    pub fn with_parental_reasoning(mut self, reasoning: Option<String>) -> Self {
        self.parental_reasoning = reasoning;
        self
    }

    pub fn with_screenshot(mut self, screenshot_ref: Option<String>) -> Self {
        self.screenshot_ref = screenshot_ref;
        self
    }
}

// ── Appeals ────────────────────────────────────────────────────

/// State of one appeal attempt.
///
/// ```text
/// Submitted ──► AiEvaluating ──► AiApproved
///     │                   └────► AiDenied ──(child asks parent)──► Escalated
///     └──(auto-approve off)──────────────────────────────────────► Escalated
/// Escalated ──► ParentApproved | ParentDenied
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppealState {
    Submitted,
    AiEvaluating,
    AiApproved,
    AiDenied,
    Escalated,
    ParentApproved,
    ParentDenied,
}

impl AppealState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppealState::Submitted => "submitted",
            AppealState::AiEvaluating => "ai_evaluating",
            AppealState::AiApproved => "ai_approved",
            AppealState::AiDenied => "ai_denied",
            AppealState::Escalated => "escalated",
            AppealState::ParentApproved => "parent_approved",
            AppealState::ParentDenied => "parent_denied",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "submitted" => AppealState::Submitted,
            "ai_evaluating" => AppealState::AiEvaluating,
            "ai_approved" => AppealState::AiApproved,
            "ai_denied" => AppealState::AiDenied,
            "escalated" => AppealState::Escalated,
            "parent_approved" => AppealState::ParentApproved,
            "parent_denied" => AppealState::ParentDenied,
            _ => return None,
        })
    }

    /// Terminal states never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AppealState::AiApproved | AppealState::ParentApproved | AppealState::ParentDenied
        )
    }

    /// Whether the appeal waits for a parent verdict.
    pub fn is_pending_parent(&self) -> bool {
        matches!(self, AppealState::Escalated)
    }

    pub fn can_transition_to(&self, next: AppealState) -> bool {
        use AppealState::*;
        matches!(
            (self, next),
            (Submitted, AiEvaluating)
                | (Submitted, Escalated)
                | (AiEvaluating, AiApproved)
                | (AiEvaluating, AiDenied)
                | (AiDenied, Escalated)
                | (Escalated, ParentApproved)
                | (Escalated, ParentDenied)
        )
    }

    /// Checked transition; an illegal edge is a [`VigilError::Conflict`].
    pub fn transition(self, next: AppealState) -> Result<AppealState> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(VigilError::Conflict(format!(
                "appeal cannot move from {} to {}",
                self.as_str(),
                next.as_str()
            )))
        }
    }
}

/// What the moderation capability said about an appeal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AiDecision {
    Allow,
    Deny,
    None,
}

impl AiDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            AiDecision::Allow => "allow",
            AiDecision::Deny => "deny",
            AiDecision::None => "none",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "allow" => Some(AiDecision::Allow),
            "deny" => Some(AiDecision::Deny),
            "none" => Some(AiDecision::None),
            _ => None,
        }
    }
}

/// One child-initiated request to overturn a block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppealRecord {
    pub approval_id: ApprovalId,
    pub kind: ResourceKind,
    /// Normalized identifier of the blocked resource.
    pub resource: String,
    /// The URL or app name as the child submitted it.
    pub resource_link: String,
    pub child_reason: String,
    pub state: AppealState,
    pub ai_decision: AiDecision,
    #[serde(default)]
    pub ai_reasoning: Option<String>,
    pub escalated_from_ai: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub resolved_at: Option<DateTime<Utc>>,
}

/// A parent's verdict on an escalated appeal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Approve,
    Deny,
}

impl Verdict {
    pub fn target_state(&self) -> AppealState {
        match self {
            Verdict::Approve => AppealState::ParentApproved,
            Verdict::Deny => AppealState::ParentDenied,
        }
    }
}

// ── Decisions ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Allow,
    Block,
}

/// Where a decision came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionSource {
    Blacklist,
    Whitelist,
    Moderation,
    FailClosed,
    MonitoringDisabled,
}

/// Result of evaluating a resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub action: Action,
    pub reason: String,
    pub appeals_used: u32,
    pub appeal_enabled: bool,
    pub source: DecisionSource,
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        self.action == Action::Allow
    }
}

/// Status reported to the child after an appeal step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppealStatus {
    Approved,
    AiDenied,
    PendingParent,
}

/// Response to an appeal submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppealOutcome {
    pub status: AppealStatus,
    /// Child-safe explanation.
    pub reasoning: String,
    pub appeal_id: ApprovalId,
    pub appeals_used: u32,
    /// The enforcement point should reload the resource.
    pub reload: bool,
}

/// Response to an escalation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationOutcome {
    pub status: AppealStatus,
    pub reason: String,
    pub appeal_id: ApprovalId,
}

// ── Parent settings ────────────────────────────────────────────

pub const DEFAULT_MONITORING_PROMPT: &str = "Block adult content, gambling, and violent content. \
Allow educational sites, reference material, and homework tools.";

/// Parent-editable settings, read fresh by every evaluation and appeal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParentSettings {
    pub parent_email: String,
    /// Free-text standard passed to the moderation capability.
    pub monitoring_prompt: String,
    pub agent_can_auto_approve: bool,
    pub desktop_monitoring_enabled: bool,
    pub screenshot_interval_secs: u64,
    /// Incremented on every save.
    pub version: u64,
    pub updated_at: DateTime<Utc>,
}

impl Default for ParentSettings {
    fn default() -> Self {
        Self {
            parent_email: String::new(),
            monitoring_prompt: DEFAULT_MONITORING_PROMPT.into(),
            agent_can_auto_approve: true,
            desktop_monitoring_enabled: true,
            screenshot_interval_secs: 120,
            version: 0,
            updated_at: Utc::now(),
        }
    }
}

/// A save request from the oversight console.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettingsUpdate {
    pub parent_email: String,
    pub monitoring_prompt: String,
    pub agent_can_auto_approve: bool,
    #[serde(default)]
    pub desktop_monitoring_enabled: Option<bool>,
    #[serde(default)]
    pub screenshot_interval_secs: Option<u64>,
    /// Optimistic concurrency check against [`ParentSettings::version`].
    #[serde(default)]
    pub expected_version: Option<u64>,
}

impl SettingsUpdate {
    /// Email and monitoring guidelines are required at save time.
    pub fn validate(&self) -> Result<()> {
        let email = self.parent_email.trim();
        if email.is_empty() {
            return Err(VigilError::validation("parent_email", "is required"));
        }
        if !email.contains('@') || email.starts_with('@') || email.ends_with('@') {
            return Err(VigilError::validation(
                "parent_email",
                format!("'{email}' is not an email address"),
            ));
        }
        if self.monitoring_prompt.trim().is_empty() {
            return Err(VigilError::validation("monitoring_prompt", "is required"));
        }
        if self.screenshot_interval_secs == Some(0) {
            return Err(VigilError::validation(
                "screenshot_interval_secs",
                "must be greater than zero",
            ));
        }
        Ok(())
    }

    /// Apply this update on top of the current settings.
    pub fn apply_to(&self, current: &ParentSettings) -> ParentSettings {
        ParentSettings {
            parent_email: self.parent_email.trim().to_string(),
            monitoring_prompt: self.monitoring_prompt.trim().to_string(),
            agent_can_auto_approve: self.agent_can_auto_approve,
            desktop_monitoring_enabled: self
                .desktop_monitoring_enabled
                .unwrap_or(current.desktop_monitoring_enabled),
            screenshot_interval_secs: self
                .screenshot_interval_secs
                .unwrap_or(current.screenshot_interval_secs),
            version: current.version + 1,
            updated_at: Utc::now(),
        }
    }
}

// ── Audit ──────────────────────────────────────────────────────

/// A row of the append-only audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub resource: Option<String>,
    pub details: Option<String>,
}
