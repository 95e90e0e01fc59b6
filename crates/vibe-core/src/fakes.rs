//! In-memory sandbox provider and scripted model for tests.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use crate::model::{AssistantMessage, InferenceRequest, LanguageModel, ModelError, ModelResult};
use crate::sandbox::{
    CommandResult, OutputBuffers, SandboxError, SandboxHandle, SandboxProvider, SandboxResult,
};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|p| p.into_inner())
}

#[derive(Debug, Clone)]
enum Scripted {
    Done(CommandResult),
    Timeout { partial_stdout: String },
}

#[derive(Debug, Default)]
struct FakeSandboxState {
    files: BTreeMap<String, String>,
    commands: Vec<String>,
    expired: bool,
}

#[derive(Debug, Default)]
struct Inner {
    sandboxes: HashMap<String, FakeSandboxState>,
    created: usize,
    fail_creates: usize,
    fail_writes_to: HashSet<String>,
    scripts: HashMap<String, Scripted>,
}

/// Sandbox provider keeping every sandbox in memory.
#[derive(Debug, Clone, Default)]
pub struct FakeSandboxProvider {
    inner: Arc<Mutex<Inner>>,
}

impl FakeSandboxProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sandboxes created so far.
    pub fn create_count(&self) -> usize {
        lock(&self.inner).created
    }

    pub fn fail_next_creates(&self, n: usize) {
        lock(&self.inner).fail_creates = n;
    }

    /// Make `connect` fail for this sandbox from now on.
    pub fn expire(&self, sandbox_id: &str) {
        if let Some(sbx) = lock(&self.inner).sandboxes.get_mut(sandbox_id) {
            sbx.expired = true;
        }
    }

    /// Every write to `path` fails.
    pub fn fail_writes_to(&self, path: &str) {
        lock(&self.inner).fail_writes_to.insert(path.to_string());
    }

    pub fn script_command(&self, cmd: &str, result: CommandResult) {
        lock(&self.inner)
            .scripts
            .insert(cmd.to_string(), Scripted::Done(result));
    }

    pub fn script_timeout(&self, cmd: &str, partial_stdout: &str) {
        lock(&self.inner).scripts.insert(
            cmd.to_string(),
            Scripted::Timeout {
                partial_stdout: partial_stdout.to_string(),
            },
        );
    }

    pub fn files(&self, sandbox_id: &str) -> BTreeMap<String, String> {
        lock(&self.inner)
            .sandboxes
            .get(sandbox_id)
            .map(|s| s.files.clone())
            .unwrap_or_default()
    }

    pub fn commands(&self, sandbox_id: &str) -> Vec<String> {
        lock(&self.inner)
            .sandboxes
            .get(sandbox_id)
            .map(|s| s.commands.clone())
            .unwrap_or_default()
    }

    /// Seed a file, as if the template shipped it.
    pub fn seed_file(&self, sandbox_id: &str, path: &str, content: &str) {
        lock(&self.inner)
            .sandboxes
            .entry(sandbox_id.to_string())
            .or_default()
            .files
            .insert(path.to_string(), content.to_string());
    }
}

#[async_trait]
impl SandboxProvider for FakeSandboxProvider {
    async fn create(&self, template: &str, _timeout: Duration) -> SandboxResult<String> {
        let mut inner = lock(&self.inner);
        if inner.fail_creates > 0 {
            inner.fail_creates -= 1;
            return Err(SandboxError::Provider(format!(
                "template {template} unavailable"
            )));
        }
        inner.created += 1;
        let id = format!("sbx-{}", inner.created);
        inner.sandboxes.insert(id.clone(), FakeSandboxState::default());
        Ok(id)
    }

    async fn connect(&self, sandbox_id: &str) -> SandboxResult<Arc<dyn SandboxHandle>> {
        let inner = lock(&self.inner);
        match inner.sandboxes.get(sandbox_id) {
            Some(sbx) if !sbx.expired => Ok(Arc::new(FakeSandbox {
                id: sandbox_id.to_string(),
                inner: self.inner.clone(),
            })),
            _ => Err(SandboxError::SandboxNotFound {
                sandbox_id: sandbox_id.to_string(),
            }),
        }
    }
}

struct FakeSandbox {
    id: String,
    inner: Arc<Mutex<Inner>>,
}

#[async_trait]
impl SandboxHandle for FakeSandbox {
    fn id(&self) -> &str {
        &self.id
    }

    async fn run_command(
        &self,
        cmd: &str,
        timeout: Duration,
        buffers: &mut OutputBuffers,
    ) -> SandboxResult<CommandResult> {
        let mut inner = lock(&self.inner);
        let script = inner.scripts.get(cmd).cloned();
        if let Some(sbx) = inner.sandboxes.get_mut(&self.id) {
            sbx.commands.push(cmd.to_string());
        }
        match script {
            Some(Scripted::Timeout { partial_stdout }) => {
                buffers.stdout.push_str(&partial_stdout);
                Err(SandboxError::CommandTimeout {
                    limit_ms: timeout.as_millis() as u64,
                })
            }
            Some(Scripted::Done(result)) => {
                buffers.stdout.push_str(&result.stdout);
                buffers.stderr.push_str(&result.stderr);
                Ok(result)
            }
            None => Ok(CommandResult {
                exit_code: 0,
                stdout: String::new(),
                stderr: String::new(),
            }),
        }
    }

    async fn write_file(&self, path: &str, content: &str) -> SandboxResult<()> {
        let mut inner = lock(&self.inner);
        if inner.fail_writes_to.contains(path) {
            return Err(SandboxError::Provider(format!("write {path} rejected")));
        }
        inner
            .sandboxes
            .entry(self.id.clone())
            .or_default()
            .files
            .insert(path.to_string(), content.to_string());
        Ok(())
    }

    async fn read_file(&self, path: &str) -> SandboxResult<String> {
        lock(&self.inner)
            .sandboxes
            .get(&self.id)
            .and_then(|s| s.files.get(path).cloned())
            .ok_or_else(|| SandboxError::FileNotFound {
                path: path.to_string(),
            })
    }

    async fn exposed_host(&self, port: u16) -> SandboxResult<String> {
        Ok(format!("{port}-{}.sandbox.test", self.id))
    }
}

/// Model returning queued replies in order.
///
/// When the queue is empty the fallback reply is returned, or
/// `ModelError::Exhausted` if none is set.
#[derive(Debug, Default)]
pub struct ScriptedModel {
    replies: Mutex<VecDeque<ModelResult<AssistantMessage>>>,
    fallback: Option<AssistantMessage>,
    calls: AtomicUsize,
    requests: Mutex<Vec<InferenceRequest>>,
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fallback(mut self, reply: AssistantMessage) -> Self {
        self.fallback = Some(reply);
        self
    }

    pub fn push_reply(&self, reply: AssistantMessage) -> &Self {
        lock(&self.replies).push_back(Ok(reply));
        self
    }

    pub fn push_error(&self, error: ModelError) -> &Self {
        lock(&self.replies).push_back(Err(error));
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// System prompts of every request, in call order.
    pub fn systems(&self) -> Vec<String> {
        lock(&self.requests)
            .iter()
            .map(|r| r.system.clone())
            .collect()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn infer(&self, request: &InferenceRequest) -> ModelResult<AssistantMessage> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.requests).push(request.clone());
        match lock(&self.replies).pop_front() {
            Some(reply) => reply,
            None => self
                .fallback
                .clone()
                .ok_or_else(|| ModelError::Exhausted("script exhausted".to_string())),
        }
    }
}
