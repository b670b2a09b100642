//! # vigil-engine
//!
//! The access-decision and appeal lifecycle:
//!
//! - [`DecisionEngine`] turns a page or app into `allow | block`.
//! - [`AppealCoordinator`] runs the appeal state machine from submission to a
//!   parent verdict.
//! - [`PolicyEditor`] applies the parent's direct list edits.
//!
//! All three share one [`KeyLocks`] so that mutations of the same resource
//! never interleave.

pub mod appeal;
pub mod decision;
pub mod editor;
pub mod locks;
pub mod notify;

pub use appeal::{AppealCoordinator, AppealRequest};
pub use decision::{AppRequest, DecisionEngine, FAIL_CLOSED_REASON, WebsiteRequest};
pub use editor::PolicyEditor;
pub use locks::{KeyGuard, KeyLocks};
pub use notify::{ConfiguredNotifier, EmailMessage, LogNotifier, Notification, ParentNotifier};

use std::sync::Arc;
use vigil_config::SharedConfig;
use vigil_moderation::Moderator;
use vigil_store::{PolicyStore, ScreenshotStore};

/// Appeals a child may file per blocked resource.
#[derive(Debug, Clone)]
pub enum AppealLimit {
    Fixed(u32),
    /// Follows `appeals.max_per_resource` across config reloads.
    Live(SharedConfig),
}

impl AppealLimit {
    pub fn get(&self) -> u32 {
        match self {
            AppealLimit::Fixed(limit) => *limit,
            AppealLimit::Live(config) => config.read(|c| c.appeals.max_per_resource),
        }
    }
}

/// Everything the protocol surface needs, wired to one store and one lock table.
#[derive(Clone)]
pub struct Engine {
    pub store: PolicyStore,
    pub decisions: DecisionEngine,
    pub appeals: AppealCoordinator,
    pub policy: PolicyEditor,
}

impl Engine {
    pub fn new(
        store: PolicyStore,
        screenshots: Option<ScreenshotStore>,
        moderator: Arc<dyn Moderator>,
        notifier: Arc<dyn ParentNotifier>,
        appeal_limit: u32,
    ) -> Self {
        let locks = KeyLocks::new();
        Self {
            decisions: DecisionEngine::new(
                store.clone(),
                screenshots,
                Arc::clone(&moderator),
                locks.clone(),
                appeal_limit,
            ),
            appeals: AppealCoordinator::new(
                store.clone(),
                moderator,
                notifier,
                locks.clone(),
                appeal_limit,
            ),
            policy: PolicyEditor::new(store.clone(), locks),
            store,
        }
    }

    /// Read the appeal limit from `config` on every use instead of the
    /// value given to [`Engine::new`].
    pub fn follow_config(mut self, config: SharedConfig) -> Self {
        let limit = AppealLimit::Live(config);
        self.decisions.appeal_limit = limit.clone();
        self.appeals.appeal_limit = limit;
        self
    }
}
