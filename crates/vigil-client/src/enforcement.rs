//! The enforcement point: gate a page or app on a verdict, and drive the
//! child's appeal form.
//!
//! [`GateView`] and [`AppealFlow`] are plain state machines so any front end
//! (browser overlay, desktop notifier, terminal) can render them.

use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use vigil_config::EnforcementConfig;
use vigil_core::{
    Action, AppealOutcome, AppealStatus, ApprovalId, Decision, EscalationOutcome, ResourceKind,
    Result, VigilError,
};

use crate::api::{ApiClient, AppCheck, PageCheck};

/// Shown when no verdict arrived in time. Never reveals why.
pub const UNVERIFIED_REASON: &str =
    "We couldn't check this page right now. Please try again in a little while.";

const EMPTY_REASON_ERROR: &str = "Please tell us why you need this.";
const SUBMIT_ERROR: &str = "Error submitting appeal. Please try again.";
const ALREADY_APPEALED_ERROR: &str = "You have already used your appeal for this.";
const ESCALATE_ERROR: &str = "We couldn't reach your parent. Please try again.";

/// What the child sees in place of the resource.
#[derive(Debug, Clone, PartialEq)]
pub enum GateView {
    /// Waiting for a verdict; content stays hidden.
    Checking,
    Allowed,
    Blocked {
        reason: String,
        /// Present only when the block can still be appealed.
        appeal_form: Option<AppealFlow>,
    },
}

impl GateView {
    /// Content may be shown only in this state.
    pub fn reveals_content(&self) -> bool {
        matches!(self, GateView::Allowed)
    }

    fn from_decision(decision: Decision, kind: ResourceKind, link: &str, title: Option<&str>) -> Self {
        match decision.action {
            Action::Allow => GateView::Allowed,
            Action::Block => GateView::Blocked {
                appeal_form: decision
                    .appeal_enabled
                    .then(|| AppealFlow::new(kind, link, title)),
                reason: decision.reason,
            },
        }
    }

    fn unverified() -> Self {
        GateView::Blocked {
            reason: UNVERIFIED_REASON.into(),
            appeal_form: None,
        }
    }
}

/// Where an appeal form is in its lifecycle.
#[derive(Debug, Clone, PartialEq)]
pub enum FlowState {
    Editing {
        error: Option<String>,
    },
    Submitting,
    Approved {
        reasoning: String,
        reload: bool,
    },
    AiDenied {
        reasoning: String,
        appeal_id: ApprovalId,
        offer_escalate: bool,
        error: Option<String>,
    },
    Escalating {
        appeal_id: ApprovalId,
        reasoning: String,
    },
    PendingParent {
        message: String,
    },
    /// The appeal for this resource is used up; the form stays closed.
    Exhausted {
        message: String,
    },
}

/// A request the flow wants sent. Hand the response back with the same ticket.
#[derive(Debug, Clone, PartialEq)]
pub enum FlowRequest {
    Submit {
        ticket: u64,
        kind: ResourceKind,
        link: String,
        title: Option<String>,
        reason: String,
    },
    Escalate {
        ticket: u64,
        appeal_id: ApprovalId,
        link: String,
        reason: String,
    },
}

/// The child's appeal form.
///
/// ```text
/// Editing ─submit─► Submitting ─► Approved | AiDenied | PendingParent | Exhausted | Editing(error)
/// AiDenied ─escalate─► Escalating ─► PendingParent | AiDenied(error)
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct AppealFlow {
    kind: ResourceKind,
    link: String,
    title: Option<String>,
    reason: String,
    state: FlowState,
    ticket: u64,
}

impl AppealFlow {
    pub fn new(kind: ResourceKind, link: &str, title: Option<&str>) -> Self {
        Self {
            kind,
            link: link.to_string(),
            title: title.map(str::to_string),
            reason: String::new(),
            state: FlowState::Editing { error: None },
            ticket: 0,
        }
    }

    pub fn state(&self) -> &FlowState {
        &self.state
    }

    /// Whether the text box and button accept input.
    pub fn form_enabled(&self) -> bool {
        match &self.state {
            FlowState::Editing { .. } => true,
            FlowState::AiDenied { offer_escalate, .. } => *offer_escalate,
            _ => false,
        }
    }

    fn is_awaiting(&self, ticket: u64) -> bool {
        ticket == self.ticket
            && matches!(
                self.state,
                FlowState::Submitting | FlowState::Escalating { .. }
            )
    }

    /// Start a submission. `None` if the form is not editable or the reason is
    /// empty (the latter leaves an error on the form).
    pub fn submit(&mut self, reason: &str) -> Option<FlowRequest> {
        if !matches!(self.state, FlowState::Editing { .. }) {
            return None;
        }
        let reason = reason.trim();
        if reason.is_empty() {
            self.state = FlowState::Editing {
                error: Some(EMPTY_REASON_ERROR.into()),
            };
            return None;
        }
        self.reason = reason.to_string();
        self.ticket += 1;
        self.state = FlowState::Submitting;
        Some(FlowRequest::Submit {
            ticket: self.ticket,
            kind: self.kind,
            link: self.link.clone(),
            title: self.title.clone(),
            reason: self.reason.clone(),
        })
    }

    /// Apply the server's answer to a submission. Returns false when the
    /// answer was stale and ignored.
    pub fn on_submitted(&mut self, ticket: u64, result: Result<AppealOutcome>) -> bool {
        if !self.is_awaiting(ticket) || self.state != FlowState::Submitting {
            debug!(ticket, "ignoring stale appeal response");
            return false;
        }
        self.state = match result {
            Ok(outcome) => match outcome.status {
                AppealStatus::Approved => FlowState::Approved {
                    reasoning: outcome.reasoning,
                    reload: outcome.reload,
                },
                AppealStatus::AiDenied => FlowState::AiDenied {
                    reasoning: outcome.reasoning,
                    appeal_id: outcome.appeal_id,
                    offer_escalate: true,
                    error: None,
                },
                AppealStatus::PendingParent => FlowState::PendingParent {
                    message: outcome.reasoning,
                },
            },
            Err(VigilError::Conflict(_)) => FlowState::Exhausted {
                message: ALREADY_APPEALED_ERROR.into(),
            },
            Err(_) => FlowState::Editing {
                error: Some(SUBMIT_ERROR.into()),
            },
        };
        true
    }

    /// Ask for the parent after an AI denial. Never happens on its own.
    pub fn escalate(&mut self) -> Option<FlowRequest> {
        let FlowState::AiDenied {
            appeal_id,
            ref reasoning,
            offer_escalate: true,
            ..
        } = self.state
        else {
            return None;
        };
        let reasoning = reasoning.clone();
        self.ticket += 1;
        self.state = FlowState::Escalating {
            appeal_id,
            reasoning,
        };
        Some(FlowRequest::Escalate {
            ticket: self.ticket,
            appeal_id,
            link: self.link.clone(),
            reason: self.reason.clone(),
        })
    }

    pub fn on_escalated(&mut self, ticket: u64, result: Result<EscalationOutcome>) -> bool {
        if !self.is_awaiting(ticket) {
            debug!(ticket, "ignoring stale escalation response");
            return false;
        }
        let FlowState::Escalating {
            appeal_id,
            ref mut reasoning,
        } = self.state
        else {
            return false;
        };
        let reasoning = std::mem::take(reasoning);
        self.state = match result {
            Ok(outcome) => FlowState::PendingParent {
                message: outcome.reason,
            },
            Err(_) => FlowState::AiDenied {
                reasoning,
                appeal_id,
                offer_escalate: true,
                error: Some(ESCALATE_ERROR.into()),
            },
        };
        true
    }
}

/// Asks the service for verdicts and carries appeals, always within a local
/// timeout.
#[derive(Debug, Clone)]
pub struct EnforcementPoint {
    client: ApiClient,
    evaluation_timeout: Duration,
    appeal_timeout: Duration,
}

impl EnforcementPoint {
    pub fn new(client: ApiClient, config: &EnforcementConfig) -> Self {
        Self {
            client,
            evaluation_timeout: Duration::from_secs(config.evaluation_timeout_secs),
            appeal_timeout: Duration::from_secs(config.appeal_timeout_secs),
        }
    }

    pub fn with_timeouts(mut self, evaluation: Duration, appeal: Duration) -> Self {
        self.evaluation_timeout = evaluation;
        self.appeal_timeout = appeal;
        self
    }

    pub fn client(&self) -> &ApiClient {
        &self.client
    }

    /// Gate a page. Any failure or timeout blocks.
    pub async fn check(&self, page: &PageCheck) -> GateView {
        match within(self.evaluation_timeout, self.client.evaluate(page)).await {
            Ok(decision) => GateView::from_decision(
                decision,
                ResourceKind::Website,
                &page.url,
                page.title.as_deref(),
            ),
            Err(e) => {
                warn!(resource = %page.url, error = %e, "no verdict, keeping page hidden");
                GateView::unverified()
            }
        }
    }

    /// Gate a desktop app. Any failure or timeout blocks.
    pub async fn check_app(&self, app: &AppCheck) -> GateView {
        match within(self.evaluation_timeout, self.client.evaluate_app(app)).await {
            Ok(decision) => {
                GateView::from_decision(decision, ResourceKind::DesktopApp, &app.app_name, None)
            }
            Err(e) => {
                warn!(resource = %app.app_name, error = %e, "no verdict, keeping app blocked");
                GateView::unverified()
            }
        }
    }

    /// Submit the form's appeal and apply the answer.
    pub async fn submit_appeal(&self, flow: &mut AppealFlow, reason: &str) {
        let Some(FlowRequest::Submit {
            ticket,
            kind,
            link,
            title,
            reason,
        }) = flow.submit(reason)
        else {
            return;
        };
        let result = within(
            self.appeal_timeout,
            self.client
                .submit_appeal(kind, &link, title.as_deref(), &reason),
        )
        .await;
        flow.on_submitted(ticket, result);
    }

    /// Escalate an AI-denied appeal and apply the answer.
    pub async fn escalate(&self, flow: &mut AppealFlow) {
        let Some(FlowRequest::Escalate {
            ticket,
            appeal_id,
            link,
            reason,
        }) = flow.escalate()
        else {
            return;
        };
        let result = within(
            self.appeal_timeout,
            self.client.escalate(&appeal_id, &link, Some(&reason)),
        )
        .await;
        flow.on_escalated(ticket, result);
    }
}

async fn within<T>(limit: Duration, fut: impl Future<Output = Result<T>>) -> Result<T> {
    tokio::time::timeout(limit, fut).await.map_err(|_| {
        VigilError::UpstreamUnavailable(format!("no answer within {}s", limit.as_secs_f32()))
    })?
}
