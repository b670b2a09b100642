//! Appeal coordinator.
//!
//! Owns every transition of an [`AppealRecord`]. All writes for one resource
//! happen under its [`KeyLocks`] guard; the store makes each entry+record
//! change a single transaction.

use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use vigil_core::{
    AiDecision, AppealOutcome, AppealRecord, AppealState, AppealStatus, ApprovalId,
    EscalationOutcome, ListKind, NewEntry, PolicyEntry, ResourceKind, Result, Verdict, VigilError,
    normalize_app, normalize_identifier,
};
use vigil_moderation::{AppealReview, Moderator};
use vigil_store::PolicyStore;

use crate::AppealLimit;
use crate::locks::KeyLocks;
use crate::notify::{Notification, ParentNotifier};

const PENDING_PARENT_REASON: &str = "Your request has been sent to your parent.";
const REVIEW_FAILED_REASON: &str =
    "We couldn't review your request right now. You can ask your parent instead.";
const REVIEW_INTERRUPTED_REASON: &str =
    "Your request was interrupted before it could be reviewed. You can ask your parent instead.";
const AI_APPROVED_ENTRY_REASON: &str = "Approved after your appeal.";
const PARENT_APPROVED_ENTRY_REASON: &str = "Approved by your parent.";

/// A child's request to overturn a block.
#[derive(Debug, Clone)]
pub struct AppealRequest {
    pub kind: ResourceKind,
    /// URL or app name as the child saw it.
    pub resource_link: String,
    pub title: Option<String>,
    pub reason: String,
}

#[derive(Clone)]
pub struct AppealCoordinator {
    store: PolicyStore,
    moderator: Arc<dyn Moderator>,
    notifier: Arc<dyn ParentNotifier>,
    locks: KeyLocks,
    pub(crate) appeal_limit: AppealLimit,
}

impl AppealCoordinator {
    pub fn new(
        store: PolicyStore,
        moderator: Arc<dyn Moderator>,
        notifier: Arc<dyn ParentNotifier>,
        locks: KeyLocks,
        appeal_limit: u32,
    ) -> Self {
        Self {
            store,
            moderator,
            notifier,
            locks,
            appeal_limit: AppealLimit::Fixed(appeal_limit),
        }
    }

    /// Accept an appeal and, when the parent allows it, let moderation decide.
    ///
    /// The resource lock is held until the outcome is stored, including the
    /// moderation call.
    pub async fn submit(&self, request: &AppealRequest) -> Result<AppealOutcome> {
        let child_reason = request.reason.trim();
        if child_reason.is_empty() {
            return Err(VigilError::validation("appeal_reason", "is required"));
        }
        let resource = normalize_identifier(request.kind, &request.resource_link)?;

        let _guard = self.locks.lock(request.kind, &resource).await;

        let entry = self
            .store
            .get_entry(request.kind, &resource)?
            .filter(|e| e.list == ListKind::Blacklist)
            .ok_or_else(|| VigilError::NotFound(format!("'{resource}' is not blocked")))?;
        let settings = self.store.settings()?;

        let mut record = AppealRecord {
            approval_id: Uuid::new_v4(),
            kind: request.kind,
            resource: resource.clone(),
            resource_link: request.resource_link.clone(),
            child_reason: child_reason.to_string(),
            state: AppealState::Submitted,
            ai_decision: AiDecision::None,
            ai_reasoning: None,
            escalated_from_ai: false,
            created_at: Utc::now(),
            resolved_at: None,
        };
        let appeals_used = self.store.begin_appeal(&record, self.appeal_limit.get())?;
        info!(
            approval_id = %record.approval_id,
            resource = %resource,
            appeals_used,
            "appeal submitted"
        );
        self.store
            .audit("appeal_submitted", Some(&resource), Some(child_reason))?;

        if !settings.agent_can_auto_approve {
            record.state = record.state.transition(AppealState::Escalated)?;
            self.store.save_appeal(&record, None)?;
            self.notify(Notification::ApprovalNeeded {
                parent_email: settings.parent_email,
                appeal: record.clone(),
            })
            .await;
            return Ok(AppealOutcome {
                status: AppealStatus::PendingParent,
                reasoning: PENDING_PARENT_REASON.into(),
                appeal_id: record.approval_id,
                appeals_used,
                reload: false,
            });
        }

        record.state = record.state.transition(AppealState::AiEvaluating)?;
        self.store.save_appeal(&record, None)?;

        let review = AppealReview {
            resource_link: request.resource_link.clone(),
            title: request.title.clone(),
            previous_reason: entry.reason.clone(),
            child_reason: child_reason.to_string(),
            guidelines: settings.monitoring_prompt,
        };

        match self.moderator.review_appeal(&review).await {
            Ok(verdict) if verdict.is_allowed() => {
                record.state = record.state.transition(AppealState::AiApproved)?;
                record.ai_decision = AiDecision::Allow;
                record.ai_reasoning = Some(verdict.reasoning.clone());
                record.resolved_at = Some(Utc::now());
                self.store
                    .save_appeal(&record, Some(AI_APPROVED_ENTRY_REASON))?;
                info!(approval_id = %record.approval_id, resource = %resource, action = "allow", "appeal approved by moderation");
                self.store.audit(
                    "appeal_ai_approved",
                    Some(&resource),
                    verdict.parental_reasoning.as_deref(),
                )?;
                self.notify(Notification::AutoApproved {
                    parent_email: settings.parent_email,
                    appeal: record.clone(),
                })
                .await;
                Ok(AppealOutcome {
                    status: AppealStatus::Approved,
                    reasoning: verdict.reasoning,
                    appeal_id: record.approval_id,
                    appeals_used,
                    reload: true,
                })
            }
            Ok(verdict) => {
                record.state = record.state.transition(AppealState::AiDenied)?;
                record.ai_decision = AiDecision::Deny;
                record.ai_reasoning = Some(verdict.reasoning.clone());
                self.store.save_appeal(&record, None)?;
                info!(approval_id = %record.approval_id, resource = %resource, action = "deny", "appeal denied by moderation");
                self.store.audit(
                    "appeal_ai_denied",
                    Some(&resource),
                    verdict.parental_reasoning.as_deref(),
                )?;
                Ok(self.denied(&record, verdict.reasoning, appeals_used))
            }
            Err(e) => {
                warn!(approval_id = %record.approval_id, resource = %resource, error = %e, "appeal review failed");
                record.state = record.state.transition(AppealState::AiDenied)?;
                record.ai_decision = AiDecision::None;
                record.ai_reasoning = Some(REVIEW_FAILED_REASON.into());
                self.store.save_appeal(&record, None)?;
                self.store
                    .audit("appeal_review_failed", Some(&resource), Some(&e.to_string()))?;
                Ok(self.denied(&record, REVIEW_FAILED_REASON.into(), appeals_used))
            }
        }
    }

    /// Forward an AI-denied appeal to the parent. Repeating it is harmless.
    pub async fn escalate(
        &self,
        approval_id: &ApprovalId,
        resource_link: &str,
        reason: Option<&str>,
    ) -> Result<EscalationOutcome> {
        let record = self.load(approval_id)?;
        let claimed = normalize_identifier(record.kind, resource_link)?;
        if claimed != record.resource {
            return Err(VigilError::validation(
                "url",
                format!("does not match the resource of appeal {approval_id}"),
            ));
        }

        let _guard = self.locks.lock(record.kind, &record.resource).await;
        // Re-read under the lock; a concurrent escalate may have won.
        let mut record = self.load(approval_id)?;

        let outcome = EscalationOutcome {
            status: AppealStatus::PendingParent,
            reason: PENDING_PARENT_REASON.into(),
            appeal_id: record.approval_id,
        };

        if record.state == AppealState::Escalated {
            debug!(approval_id = %approval_id, "appeal already escalated");
            return Ok(outcome);
        }
        if record.state != AppealState::AiDenied {
            return Err(VigilError::Conflict(format!(
                "only an AI-denied appeal can be escalated (appeal is {})",
                record.state.as_str()
            )));
        }

        record.state = record.state.transition(AppealState::Escalated)?;
        record.escalated_from_ai = true;
        self.store.save_appeal(&record, None)?;
        info!(approval_id = %approval_id, resource = %record.resource, "appeal escalated to parent");
        self.store.audit(
            "appeal_escalated",
            Some(&record.resource),
            reason.map(str::trim).filter(|r| !r.is_empty()),
        )?;

        let settings = self.store.settings()?;
        self.notify(Notification::ApprovalNeeded {
            parent_email: settings.parent_email,
            appeal: record,
        })
        .await;
        Ok(outcome)
    }

    /// Apply the parent's verdict to an escalated appeal.
    ///
    /// The same verdict twice is a no-op; a different verdict on a resolved
    /// record is a conflict.
    pub async fn resolve(&self, approval_id: &ApprovalId, verdict: Verdict) -> Result<AppealRecord> {
        let record = self.load(approval_id)?;
        let _guard = self.locks.lock(record.kind, &record.resource).await;
        let mut record = self.load(approval_id)?;

        let target = verdict.target_state();
        if record.state == target {
            return Ok(record);
        }
        if record.state.is_terminal() {
            return Err(VigilError::Conflict(format!(
                "appeal {approval_id} is already resolved as {}",
                record.state.as_str()
            )));
        }

        record.state = record.state.transition(target)?;
        record.resolved_at = Some(Utc::now());
        let whitelist = match verdict {
            Verdict::Approve => Some(PARENT_APPROVED_ENTRY_REASON),
            Verdict::Deny => None,
        };
        self.store.save_appeal(&record, whitelist)?;

        let event = match verdict {
            Verdict::Approve => "appeal_parent_approved",
            Verdict::Deny => "appeal_parent_denied",
        };
        info!(approval_id = %approval_id, resource = %record.resource, verdict = ?verdict, "parent resolved appeal");
        self.store.audit(event, Some(&record.resource), None)?;
        Ok(record)
    }

    /// Whitelist a desktop app directly. No appeal record is involved.
    pub async fn approve_app(&self, app: &str) -> Result<PolicyEntry> {
        let app = normalize_app(app)?;
        let _guard = self.locks.lock(ResourceKind::DesktopApp, &app).await;

        if let Some(entry) = self.store.get_entry(ResourceKind::DesktopApp, &app)? {
            if entry.list == ListKind::Whitelist {
                return Ok(entry);
            }
        }

        let entry = self.store.upsert_entry(&NewEntry::new(
            ResourceKind::DesktopApp,
            &app,
            ListKind::Whitelist,
            PARENT_APPROVED_ENTRY_REASON,
        ))?;
        info!(resource = %app, "desktop app approved");
        self.store.audit("app_approved", Some(&app), None)?;
        Ok(entry)
    }

    /// Settle appeals left mid-review by a restart: they become AI-denied so
    /// the child can still escalate.
    pub async fn recover_interrupted(&self) -> Result<usize> {
        let stale = self.store.interrupted_appeals()?;
        let mut recovered = 0;
        for record in stale {
            let _guard = self.locks.lock(record.kind, &record.resource).await;
            let Some(mut record) = self.store.get_appeal(&record.approval_id)? else {
                continue;
            };
            if record.state == AppealState::Submitted {
                record.state = record.state.transition(AppealState::AiEvaluating)?;
            }
            if record.state != AppealState::AiEvaluating {
                continue;
            }
            record.state = record.state.transition(AppealState::AiDenied)?;
            record.ai_decision = AiDecision::None;
            record.ai_reasoning = Some(REVIEW_INTERRUPTED_REASON.into());
            self.store.save_appeal(&record, None)?;
            self.store
                .audit("appeal_interrupted", Some(&record.resource), None)?;
            recovered += 1;
        }
        if recovered > 0 {
            warn!(count = recovered, "recovered interrupted appeals");
        }
        Ok(recovered)
    }

    fn load(&self, approval_id: &ApprovalId) -> Result<AppealRecord> {
        self.store
            .get_appeal(approval_id)?
            .ok_or_else(|| VigilError::NotFound(format!("appeal {approval_id}")))
    }

    fn denied(&self, record: &AppealRecord, reasoning: String, appeals_used: u32) -> AppealOutcome {
        AppealOutcome {
            status: AppealStatus::AiDenied,
            reasoning,
            appeal_id: record.approval_id,
            appeals_used,
            reload: false,
        }
    }

    async fn notify(&self, notification: Notification) {
        if let Err(e) = self.notifier.notify(&notification).await {
            warn!(
                event = notification.event_name(),
                approval_id = %notification.appeal().approval_id,
                error = %e,
                "parent notification failed"
            );
        }
    }
}
