//! The network loop: drive agent turns until the router stops or the
//! iteration ceiling is reached.

use tracing::{info, instrument};

use super::router::{route, Route};
use crate::agent::Agent;
use crate::model::{LanguageModel, Message};
use crate::obs;
use crate::state::RunState;
use crate::step::{StepContext, StepResult};
use crate::tools::ToolSet;

/// How the loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// The router stopped: a summary was observed.
    Success,
    /// The ceiling was reached without a summary.
    Exhausted,
}

/// Controller states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkPhase {
    Init,
    Iterating { iteration: u32 },
    Done(Completion),
}

/// Result of a network run. The final state stays with the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkResult {
    pub completion: Completion,
    /// Agent turns actually run.
    pub iterations: u32,
}

/// A set of agents sharing one run state.
pub struct Network {
    default_agent: Agent,
    agents: Vec<Agent>,
    max_iterations: u32,
}

impl Network {
    pub fn new(default_agent: Agent, max_iterations: u32) -> Self {
        Self {
            default_agent,
            agents: Vec::new(),
            max_iterations,
        }
    }

    pub fn with_agent(mut self, agent: Agent) -> Self {
        self.agents.push(agent);
        self
    }

    pub fn max_iterations(&self) -> u32 {
        self.max_iterations
    }

    fn agent(&self, name: &str) -> &Agent {
        self.agents
            .iter()
            .find(|a| a.name == name)
            .unwrap_or(&self.default_agent)
    }

    /// Run turns starting from the user's `input`.
    ///
    /// The router is consulted before the ceiling, so a summary produced on
    /// the last permitted turn still counts as success.
    #[instrument(skip_all, fields(run_id = %ctx.run_id(), max_iterations = self.max_iterations))]
    pub async fn run(
        &self,
        ctx: &StepContext,
        model: &dyn LanguageModel,
        tools: &ToolSet,
        input: &str,
        state: &mut RunState,
    ) -> StepResult<NetworkResult> {
        let mut history = vec![Message::User {
            content: input.to_string(),
        }];
        let mut phase = NetworkPhase::Init;
        let mut turns = 0;

        loop {
            phase = match phase {
                NetworkPhase::Init => NetworkPhase::Iterating { iteration: 0 },
                NetworkPhase::Iterating { iteration } => {
                    match route(state, &self.default_agent.name) {
                        Route::Stop => NetworkPhase::Done(Completion::Success),
                        Route::Next(_) if iteration >= self.max_iterations => {
                            NetworkPhase::Done(Completion::Exhausted)
                        }
                        Route::Next(name) => {
                            let agent = self.agent(&name);
                            obs::emit_iteration(
                                &ctx.run_id().0,
                                &agent.name,
                                iteration + 1,
                                self.max_iterations,
                            );
                            agent
                                .run_turn(ctx, model, tools, &mut history, state)
                                .await?;
                            turns += 1;
                            NetworkPhase::Iterating {
                                iteration: iteration + 1,
                            }
                        }
                    }
                }
                NetworkPhase::Done(completion) => {
                    info!(?completion, iterations = turns, "network finished");
                    return Ok(NetworkResult {
                        completion,
                        iterations: turns,
                    });
                }
            };
        }
    }
}
