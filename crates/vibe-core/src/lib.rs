//! vibe core library
//!
//! Durable agent orchestration: a sandbox per run, a coding agent driving
//! sandbox tools over a shared run state, completion detection, and a step
//! ledger that makes every effectful unit replayable.

pub mod agent;
pub mod config;
pub mod domain;
pub mod engine;
pub mod error;
pub mod fakes;
pub mod fragment;
pub mod metrics;
pub mod model;
pub mod network;
pub mod obs;
pub mod prompt;
pub mod sandbox;
pub mod sink;
pub mod state;
pub mod step;
pub mod telemetry;
pub mod tools;
pub mod tree;
pub mod worker;

pub use agent::{Agent, TurnReport, CODE_AGENT};
pub use config::{DockerSandboxConfig, EngineConfig, ModelConfig};
pub use domain::{RunOutput, RunRequest, TriggerEvent, ValidationError, EVENT_NAME};
pub use engine::{CodeAgentEngine, EngineStores, RunReport};
pub use error::{RunError, RunResult};
pub use model::{AssistantMessage, LanguageModel, Message, ModelError, OpenAiChatModel};
pub use network::{route, Completion, Network, NetworkResult, Route};
pub use sandbox::{DockerSandboxProvider, SandboxError, SandboxHandle, SandboxProvider};
pub use sink::{ResultSink, Verdict, GENERIC_ERROR_MESSAGE};
pub use state::{RunState, COMPLETION_MARKER};
pub use step::{RetryPolicy, StepContext, StepError};
pub use tools::{Tool, ToolError, ToolOutcome, ToolSet};
pub use tree::{files_to_tree, TreeItem};
pub use worker::{RunWorker, WorkerEvent};

pub use vibe_state::{OutcomeKind, OutcomeRecord, RunId, RunRecord, RunStatus};
