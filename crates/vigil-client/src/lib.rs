//! # vigil-client
//!
//! Clients for the Vigil API:
//!
//! - [`ApiClient`]: typed requests against `/api/v1`
//! - [`EnforcementPoint`]: gates a page or app and drives the child's appeal form
//! - [`OversightConsole`]: the parent's view of lists, pending appeals and settings

pub mod api;
pub mod console;
pub mod enforcement;

pub use api::{ApiClient, AppCheck, PageCheck};
pub use console::{ConsoleSnapshot, Lists, Notice, OversightConsole};
pub use enforcement::{AppealFlow, EnforcementPoint, FlowRequest, FlowState, GateView};
