//! # vigil-store
//!
//! Durable state for Vigil:
//!
//! - **Policy entries**: one row per website or desktop app, in the whitelist or the blacklist.
//! - **Appeal records**: every appeal ever filed, never deleted.
//! - **Settings**: the parent's versioned settings row.
//! - **Audit log**: append-only trail of decision-changing events.
//! - **Screenshots**: content-addressed image files referenced from blacklist entries.
//!
//! Mutations that touch both an entry and an appeal record run in one SQLite transaction.

pub mod appeals;
pub mod entries;
pub mod screenshots;
pub mod settings;
pub mod store;

pub use screenshots::ScreenshotStore;
pub use store::PolicyStore;
