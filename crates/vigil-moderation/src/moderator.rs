use async_trait::async_trait;
use vigil_core::Result;

use crate::verdict::ModerationVerdict;

/// A web page the decision engine could not settle from the lists.
#[derive(Debug, Clone)]
pub struct PageReview {
    pub url: String,
    pub title: Option<String>,
    /// Text already extracted by the enforcement point.
    pub content: Option<String>,
    /// The parent's monitoring guidelines.
    pub guidelines: String,
}

/// A foreground desktop application.
#[derive(Debug, Clone)]
pub struct AppReview {
    pub app_name: String,
    pub window_title: Option<String>,
    /// PNG bytes of the current screen, if the monitor captured one.
    pub screenshot: Option<Vec<u8>>,
    pub guidelines: String,
}

/// A child's appeal against an existing block.
#[derive(Debug, Clone)]
pub struct AppealReview {
    /// The URL or app name as the child submitted it.
    pub resource_link: String,
    pub title: Option<String>,
    /// Reason stored with the blacklist entry.
    pub previous_reason: String,
    pub child_reason: String,
    pub guidelines: String,
}

/// The moderation capability.
///
/// Implementations return [`vigil_core::VigilError`] variants for which
/// `is_upstream()` holds when no verdict could be produced; callers fail
/// closed on those.
#[async_trait]
pub trait Moderator: Send + Sync {
    async fn review_page(&self, page: &PageReview) -> Result<ModerationVerdict>;

    async fn review_app(&self, app: &AppReview) -> Result<ModerationVerdict>;

    async fn review_appeal(&self, appeal: &AppealReview) -> Result<ModerationVerdict>;
}
