//! # vigil-moderation
//!
//! The moderation capability the decision engine and appeal coordinator call.
//!
//! [`Moderator`] is the seam: [`LlmModerator`] asks a language model for a JSON
//! verdict, [`StaticModerator`] answers from a script for tests.

pub mod llm;
pub mod moderator;
pub mod prompts;
pub mod static_moderator;
pub mod verdict;

pub use llm::{LlmModerator, router_from_config};
pub use moderator::{AppReview, AppealReview, Moderator, PageReview};
pub use static_moderator::StaticModerator;
pub use verdict::{ModerationVerdict, parse_verdict};
