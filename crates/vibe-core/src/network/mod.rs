//! Network controller and router.

pub mod controller;
pub mod router;

pub use controller::{Completion, Network, NetworkPhase, NetworkResult};
pub use router::{route, Route};
