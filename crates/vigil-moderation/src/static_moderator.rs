//! Scripted moderator for deterministic tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use vigil_core::{Result, VigilError};

use crate::moderator::{AppReview, AppealReview, Moderator, PageReview};
use crate::verdict::ModerationVerdict;

#[derive(Clone)]
enum Script {
    Verdict(ModerationVerdict),
    Unavailable,
}

impl Script {
    fn play(self) -> Result<ModerationVerdict> {
        match self {
            Script::Verdict(v) => Ok(v),
            Script::Unavailable => Err(VigilError::UpstreamUnavailable(
                "static moderator is offline".into(),
            )),
        }
    }
}

/// A moderator that answers from queued verdicts, falling back to a default.
///
/// Every call is counted so tests can assert the capability was (or was not)
/// consulted.
pub struct StaticModerator {
    default: Script,
    queue: Mutex<VecDeque<Script>>,
    delay: Option<Duration>,
    page_calls: AtomicUsize,
    app_calls: AtomicUsize,
    appeal_calls: AtomicUsize,
    last_appeal: Mutex<Option<AppealReview>>,
    last_page: Mutex<Option<PageReview>>,
}

impl StaticModerator {
    fn with_default(default: Script) -> Self {
        Self {
            default,
            queue: Mutex::new(VecDeque::new()),
            delay: None,
            page_calls: AtomicUsize::new(0),
            app_calls: AtomicUsize::new(0),
            appeal_calls: AtomicUsize::new(0),
            last_appeal: Mutex::new(None),
            last_page: Mutex::new(None),
        }
    }

    /// Approves everything unless a queued verdict says otherwise.
    pub fn allowing() -> Self {
        Self::with_default(Script::Verdict(ModerationVerdict::allow("Looks fine")))
    }

    /// Blocks everything with `reason` unless a queued verdict says otherwise.
    pub fn blocking(reason: &str) -> Self {
        Self::with_default(Script::Verdict(
            ModerationVerdict::block(reason).with_parental_reasoning("Matches a blocked category"),
        ))
    }

    /// Every call fails as if the model were unreachable.
    pub fn unavailable() -> Self {
        Self::with_default(Script::Unavailable)
    }

    /// Queue a verdict for the next call of any kind.
    pub fn then(self, verdict: ModerationVerdict) -> Self {
        self.queue.lock().push_back(Script::Verdict(verdict));
        self
    }

    /// Queue an outage for the next call of any kind.
    pub fn then_unavailable(self) -> Self {
        self.queue.lock().push_back(Script::Unavailable);
        self
    }

    /// Sleep before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn page_calls(&self) -> usize {
        self.page_calls.load(Ordering::SeqCst)
    }

    pub fn app_calls(&self) -> usize {
        self.app_calls.load(Ordering::SeqCst)
    }

    pub fn appeal_calls(&self) -> usize {
        self.appeal_calls.load(Ordering::SeqCst)
    }

    pub fn total_calls(&self) -> usize {
        self.page_calls() + self.app_calls() + self.appeal_calls()
    }

    pub fn last_appeal(&self) -> Option<AppealReview> {
        self.last_appeal.lock().clone()
    }

    pub fn last_page(&self) -> Option<PageReview> {
        self.last_page.lock().clone()
    }

    async fn answer(&self) -> Result<ModerationVerdict> {
        let next = self
            .queue
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.default.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        next.play()
    }
}

#[async_trait]
impl Moderator for StaticModerator {
    async fn review_page(&self, page: &PageReview) -> Result<ModerationVerdict> {
        self.page_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_page.lock() = Some(page.clone());
        self.answer().await
    }

    async fn review_app(&self, _app: &AppReview) -> Result<ModerationVerdict> {
        self.app_calls.fetch_add(1, Ordering::SeqCst);
        self.answer().await
    }

    async fn review_appeal(&self, appeal: &AppealReview) -> Result<ModerationVerdict> {
        self.appeal_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_appeal.lock() = Some(appeal.clone());
        self.answer().await
    }
}
