use std::sync::Arc;
use tracing::{debug, info, warn};

use vigil_core::{
    Action, Decision, DecisionSource, ListKind, NewEntry, PolicyEntry, ResourceKind, Result,
    normalize_app, normalize_domain,
};
use vigil_moderation::{AppReview, ModerationVerdict, Moderator, PageReview};
use vigil_store::{PolicyStore, ScreenshotStore};

use crate::AppealLimit;
use crate::locks::KeyLocks;

/// Child-facing reason when no verdict could be obtained.
pub const FAIL_CLOSED_REASON: &str = "We were unable to verify that this content is safe.";

/// A page the enforcement point wants to show.
#[derive(Debug, Clone, Default)]
pub struct WebsiteRequest {
    pub url: String,
    pub title: Option<String>,
    pub content: Option<String>,
}

/// The foreground app reported by the desktop monitor.
#[derive(Debug, Clone, Default)]
pub struct AppRequest {
    pub app_name: String,
    pub window_title: Option<String>,
    /// Decoded PNG bytes.
    pub screenshot: Option<Vec<u8>>,
}

/// Computes `allow | block` from the lists and, when neither matches, the
/// moderation capability.
#[derive(Clone)]
pub struct DecisionEngine {
    store: PolicyStore,
    screenshots: Option<ScreenshotStore>,
    moderator: Arc<dyn Moderator>,
    locks: KeyLocks,
    pub(crate) appeal_limit: AppealLimit,
}

impl DecisionEngine {
    pub fn new(
        store: PolicyStore,
        screenshots: Option<ScreenshotStore>,
        moderator: Arc<dyn Moderator>,
        locks: KeyLocks,
        appeal_limit: u32,
    ) -> Self {
        Self {
            store,
            screenshots,
            moderator,
            locks,
            appeal_limit: AppealLimit::Fixed(appeal_limit),
        }
    }

    pub async fn evaluate_website(&self, request: &WebsiteRequest) -> Result<Decision> {
        let domain = normalize_domain(&request.url)?;

        if let Some(entry) = self.store.get_entry(ResourceKind::Website, &domain)? {
            return Ok(self.from_entry(&entry, DecisionSource::Blacklist));
        }

        let settings = self.store.settings()?;
        let review = PageReview {
            url: request.url.clone(),
            title: request.title.clone(),
            content: request.content.clone(),
            guidelines: settings.monitoring_prompt,
        };

        match self.moderator.review_page(&review).await {
            Ok(verdict) => {
                self.settle(ResourceKind::Website, &domain, verdict, None)
                    .await
            }
            Err(e) if e.is_upstream() => Ok(self.fail_closed(ResourceKind::Website, &domain, &e)),
            Err(e) => Err(e),
        }
    }

    pub async fn evaluate_app(&self, request: &AppRequest) -> Result<Decision> {
        let app = normalize_app(&request.app_name)?;

        if let Some(entry) = self.store.get_entry(ResourceKind::DesktopApp, &app)? {
            return Ok(self.from_entry(&entry, DecisionSource::Blacklist));
        }

        let settings = self.store.settings()?;
        if !settings.desktop_monitoring_enabled {
            debug!(resource = %app, "desktop monitoring disabled, allowing");
            return Ok(Decision {
                action: Action::Allow,
                reason: String::new(),
                appeals_used: 0,
                appeal_enabled: false,
                source: DecisionSource::MonitoringDisabled,
            });
        }

        let review = AppReview {
            app_name: request.app_name.clone(),
            window_title: request.window_title.clone(),
            screenshot: request.screenshot.clone(),
            guidelines: settings.monitoring_prompt,
        };

        match self.moderator.review_app(&review).await {
            Ok(verdict) => {
                let screenshot_ref = if verdict.is_allowed() {
                    None
                } else {
                    self.keep_screenshot(&app, request.screenshot.as_deref())
                };
                self.settle(ResourceKind::DesktopApp, &app, verdict, screenshot_ref)
                    .await
            }
            Err(e) if e.is_upstream() => Ok(self.fail_closed(ResourceKind::DesktopApp, &app, &e)),
            Err(e) => Err(e),
        }
    }

    /// Whether the child may still appeal this entry.
    pub fn appeal_enabled(&self, entry: &PolicyEntry) -> bool {
        entry.list == ListKind::Blacklist && entry.appeals_used < self.appeal_limit.get()
    }

    fn from_entry(&self, entry: &PolicyEntry, blacklist_source: DecisionSource) -> Decision {
        match entry.list {
            ListKind::Blacklist => Decision {
                action: Action::Block,
                reason: entry.reason.clone(),
                appeals_used: entry.appeals_used,
                appeal_enabled: self.appeal_enabled(entry),
                source: blacklist_source,
            },
            ListKind::Whitelist => Decision {
                action: Action::Allow,
                reason: entry.reason.clone(),
                appeals_used: entry.appeals_used,
                appeal_enabled: false,
                source: DecisionSource::Whitelist,
            },
        }
    }

    /// Turn a moderation verdict into a decision, recording first-time blocks.
    async fn settle(
        &self,
        kind: ResourceKind,
        identifier: &str,
        verdict: ModerationVerdict,
        screenshot_ref: Option<String>,
    ) -> Result<Decision> {
        if verdict.is_allowed() {
            debug!(resource = %identifier, %kind, "moderation allowed");
            return Ok(Decision {
                action: Action::Allow,
                reason: verdict.reasoning,
                appeals_used: 0,
                appeal_enabled: false,
                source: DecisionSource::Moderation,
            });
        }

        let _guard = self.locks.lock(kind, identifier).await;
        let entry = NewEntry::new(kind, identifier, ListKind::Blacklist, &verdict.reasoning)
            .with_parental_reasoning(verdict.parental_reasoning.clone())
            .with_screenshot(screenshot_ref);
        let (stored, inserted) = self.store.insert_if_absent(&entry)?;

        if inserted {
            info!(resource = %identifier, %kind, action = "block", "moderation blocked resource");
            self.store.audit(
                "blocked",
                Some(identifier),
                verdict.parental_reasoning.as_deref().or(Some(&verdict.reasoning)),
            )?;
        } else {
            // A parent edit landed while moderation ran; the stored entry wins.
            debug!(resource = %identifier, list = stored.list.as_str(), "entry appeared during moderation");
        }

        Ok(self.from_entry(&stored, DecisionSource::Moderation))
    }

    fn fail_closed(&self, kind: ResourceKind, identifier: &str, err: &vigil_core::VigilError) -> Decision {
        warn!(resource = %identifier, %kind, error = %err, "moderation unavailable, failing closed");
        Decision {
            action: Action::Block,
            reason: FAIL_CLOSED_REASON.into(),
            appeals_used: 0,
            appeal_enabled: false,
            source: DecisionSource::FailClosed,
        }
    }

    fn keep_screenshot(&self, app: &str, png: Option<&[u8]>) -> Option<String> {
        let (store, png) = (self.screenshots.as_ref()?, png?);
        match store.put(png) {
            Ok(reference) => Some(reference),
            Err(e) => {
                warn!(resource = %app, error = %e, "failed to store screenshot");
                None
            }
        }
    }
}
