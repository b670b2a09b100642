//! Parent notifications.
//!
//! The coordinator notifies when an appeal needs a parent verdict and when the
//! AI approved one on its own. Delivery failures are logged by the caller and
//! never change the appeal's outcome.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info, warn};

use vigil_config::{EmailConfig, SharedConfig};
use vigil_core::{AppealRecord, Result, VigilError};

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Notification {
    /// An appeal is escalated and waits for the parent.
    ApprovalNeeded {
        parent_email: String,
        appeal: AppealRecord,
    },
    /// The AI approved an appeal without the parent.
    AutoApproved {
        parent_email: String,
        appeal: AppealRecord,
    },
}

impl Notification {
    pub fn appeal(&self) -> &AppealRecord {
        match self {
            Notification::ApprovalNeeded { appeal, .. } | Notification::AutoApproved { appeal, .. } => {
                appeal
            }
        }
    }

    pub fn event_name(&self) -> &'static str {
        match self {
            Notification::ApprovalNeeded { .. } => "approval_needed",
            Notification::AutoApproved { .. } => "auto_approved",
        }
    }
}

#[async_trait]
pub trait ParentNotifier: Send + Sync {
    async fn notify(&self, notification: &Notification) -> Result<()>;
}

/// Writes notifications to the log.
pub struct LogNotifier;

#[async_trait]
impl ParentNotifier for LogNotifier {
    async fn notify(&self, notification: &Notification) -> Result<()> {
        let appeal = notification.appeal();
        info!(
            event = notification.event_name(),
            approval_id = %appeal.approval_id,
            resource = %appeal.resource,
            "parent notification"
        );
        Ok(())
    }
}

/// Delivers through whatever `[notifications]` configures at the time of
/// each call: an email to the parent, a webhook POST, both, or the log.
pub struct ConfiguredNotifier {
    client: reqwest::Client,
    config: SharedConfig,
}

impl ConfiguredNotifier {
    pub fn new(config: SharedConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| VigilError::Transport(e.to_string()))?;
        Ok(Self { client, config })
    }

    async fn post_webhook(&self, url: &str, notification: &Notification) -> Result<()> {
        let resp = self
            .client
            .post(url)
            .json(notification)
            .send()
            .await
            .map_err(|e| VigilError::Transport(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(VigilError::Transport(format!(
                "webhook returned HTTP {}",
                resp.status()
            )));
        }
        debug!(event = notification.event_name(), "webhook delivered");
        Ok(())
    }

    async fn send_email(&self, email: &EmailConfig, message: &EmailMessage) -> Result<()> {
        let mut req = self.client.post(&email.api_url).json(&json!({
            "from": email.from,
            "to": message.to,
            "subject": message.subject,
            "html": message.html,
        }));
        if let Some(key) = &email.api_key {
            req = req.bearer_auth(key);
        }
        let resp = req
            .send()
            .await
            .map_err(|e| VigilError::Transport(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(VigilError::Transport(format!(
                "mail API returned HTTP {}",
                resp.status()
            )));
        }
        debug!(to = %message.to, "email delivered");
        Ok(())
    }
}

#[async_trait]
impl ParentNotifier for ConfiguredNotifier {
    async fn notify(&self, notification: &Notification) -> Result<()> {
        let (webhook, email, link_base) = self.config.read(|c| {
            (
                c.notifications.webhook_url.clone(),
                c.notifications.email.clone(),
                c.notifications.link_base(&c.server),
            )
        });
        if webhook.is_none() && email.is_none() {
            return LogNotifier.notify(notification).await;
        }

        // Try every channel; report the last failure.
        let mut outcome = Ok(());
        if let Some(url) = webhook
            && let Err(e) = self.post_webhook(&url, notification).await
        {
            outcome = Err(e);
        }
        if let Some(email) = email {
            match notification.email(&link_base) {
                Some(message) => {
                    if let Err(e) = self.send_email(&email, &message).await {
                        outcome = Err(e);
                    }
                }
                None => warn!(
                    event = notification.event_name(),
                    "no parent email in settings, email skipped"
                ),
            }
        }
        outcome
    }
}

/// One rendered message for the parent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub html: String,
}

impl Notification {
    /// Render for email. `None` when the parent has no address on file.
    ///
    /// Approval requests carry one-click approve and deny links under
    /// `link_base`; the approval id in the link is the credential.
    pub fn email(&self, link_base: &str) -> Option<EmailMessage> {
        let (parent_email, appeal) = match self {
            Notification::ApprovalNeeded {
                parent_email,
                appeal,
            }
            | Notification::AutoApproved {
                parent_email,
                appeal,
            } => (parent_email.trim(), appeal),
        };
        if parent_email.is_empty() {
            return None;
        }

        let resource = escape_html(&appeal.resource_link);
        let reason = escape_html(&appeal.child_reason);
        let ai = appeal
            .ai_reasoning
            .as_deref()
            .map(|r| format!("<p><strong>AI review:</strong> {}</p>", escape_html(r)))
            .unwrap_or_default();

        let (subject, html) = match self {
            Notification::ApprovalNeeded { .. } => {
                let id = appeal.approval_id;
                (
                    format!("Vigil: your child asks to open {}", appeal.resource),
                    format!(
                        "<h2>Access request</h2>\
                         <p><strong>Blocked:</strong> {resource}</p>\
                         <p><strong>Your child's reason:</strong> {reason}</p>\
                         {ai}\
                         <p><a href=\"{link_base}/respond/{id}/approve\">Approve</a> \
                         &middot; <a href=\"{link_base}/respond/{id}/deny\">Deny</a></p>\
                         <p>Or run <code>vigil console approve {id}</code>.</p>"
                    ),
                )
            }
            Notification::AutoApproved { .. } => (
                format!("Vigil: {} was approved after an appeal", appeal.resource),
                format!(
                    "<h2>Appeal approved</h2>\
                     <p>Following your guidelines, the AI approved access to {resource}.</p>\
                     <p><strong>Your child's reason:</strong> {reason}</p>\
                     {ai}\
                     <p>You can block it again from the console.</p>"
                ),
            ),
        };
        Some(EmailMessage {
            to: parent_email.to_string(),
            subject,
            html,
        })
    }
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
