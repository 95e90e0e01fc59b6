//! Durable step execution: memoized steps and bounded attempt retry.

pub mod error;
pub mod executor;
pub mod retry;

pub use error::{StepError, StepResult};
pub use executor::StepContext;
pub use retry::RetryPolicy;
