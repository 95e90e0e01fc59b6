//! Sandbox provider and handle abstractions.
//!
//! A sandbox is a remote, persistent execution environment with a
//! filesystem, a command runner and an exposed network host. It is created
//! once per run and afterwards referenced only by its opaque id: every step
//! that needs it re-resolves the handle through [`SandboxProvider::connect`].

pub mod docker;
pub mod error;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use docker::DockerSandboxProvider;
pub use error::{SandboxError, SandboxResult};

/// Accumulation buffers filled incrementally while a command runs.
///
/// Owned by the caller so partial output survives a timeout or a transport
/// error.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutputBuffers {
    pub stdout: String,
    pub stderr: String,
}

/// Outcome of a command that ran to completion.
///
/// A nonzero exit code is a value, not an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandResult {
    pub fn is_success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Creates and resolves sandboxes.
#[async_trait]
pub trait SandboxProvider: Send + Sync {
    /// Provision a sandbox from `template`, returning its id.
    async fn create(&self, template: &str, timeout: Duration) -> SandboxResult<String>;

    /// Resolve a live sandbox by id. Fails with `SandboxNotFound`.
    async fn connect(&self, sandbox_id: &str) -> SandboxResult<Arc<dyn SandboxHandle>>;
}

/// Operations on one live sandbox.
#[async_trait]
pub trait SandboxHandle: Send + Sync {
    fn id(&self) -> &str;

    /// Run `cmd` through a shell, appending output to `buffers` as it arrives.
    async fn run_command(
        &self,
        cmd: &str,
        timeout: Duration,
        buffers: &mut OutputBuffers,
    ) -> SandboxResult<CommandResult>;

    async fn write_file(&self, path: &str, content: &str) -> SandboxResult<()>;

    /// Read a file. Fails with `FileNotFound`.
    async fn read_file(&self, path: &str) -> SandboxResult<String>;

    /// Externally reachable `host[:port]` for a port inside the sandbox.
    async fn exposed_host(&self, port: u16) -> SandboxResult<String>;

    /// Preview URL for a port inside the sandbox.
    async fn preview_url(&self, port: u16) -> SandboxResult<String> {
        let host = self.exposed_host(port).await?;
        Ok(format!("https://{host}"))
    }
}
