//! Routing between agent turns.

use crate::state::RunState;

/// Decision taken after each turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// Run the named agent next.
    Next(String),
    Stop,
}

/// Stop once a summary exists; otherwise hand the turn back to the default
/// agent. Pure, so repeated calls on a completed state always stop.
pub fn route(state: &RunState, default_agent: &str) -> Route {
    if state.summary.is_some() {
        Route::Stop
    } else {
        Route::Next(default_agent.to_string())
    }
}
