//! # vigil-core
//!
//! Core types and primitives shared by every Vigil crate: the error taxonomy,
//! policy and appeal records, and resource identifier normalization.

pub mod error;
pub mod message;
pub mod resource;
pub mod types;

pub use error::{Result, VigilError};
pub use message::{Message, MessageContent, Role};
pub use resource::{ResourceKind, normalize_app, normalize_domain, normalize_identifier};
pub use types::*;
