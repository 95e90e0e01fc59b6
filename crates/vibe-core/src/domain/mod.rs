//! Domain models for vibe.
//!
//! - `RunRequest` / `TriggerEvent`: what starts a run
//! - `RunOutput`: what a finished run returns
//! - `validation`: submission-time checks

pub mod run;
pub mod validation;

pub use run::{RunOutput, RunRequest, TriggerEvent, DEFAULT_TITLE, EVENT_NAME};
pub use validation::{validate_request, ValidationError, MAX_VALUE_CHARS};
