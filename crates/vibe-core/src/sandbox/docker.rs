//! Docker-backed sandbox provider.
//!
//! Sandboxes are labelled containers driven through the Docker Engine API.
//! Every container carries an expiry label; `connect` removes containers
//! past it and reports them as gone. Files move in and out as tar archives.

use std::collections::HashMap;
use std::io::Read;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use bollard::container::{
    Config, DownloadFromContainerOptions, InspectContainerOptions, LogOutput,
    RemoveContainerOptions, StartContainerOptions, UploadToContainerOptions,
};
use bollard::errors::Error as DockerError;
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::models::{HostConfig, PortBinding};
use bollard::Docker;
use futures::StreamExt;
use regex::Regex;
use tracing::{debug, info, instrument, warn};

use super::error::{SandboxError, SandboxResult};
use super::{CommandResult, OutputBuffers, SandboxHandle, SandboxProvider};
use crate::config::DockerSandboxConfig;

/// Unix timestamp after which a sandbox is treated as gone.
pub const EXPIRES_AT_LABEL: &str = "dev.vibe.expires-at";

/// Container ids and names accepted by `connect`.
fn is_valid_sandbox_id(id: &str) -> bool {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.-]{0,127}$").ok())
        .as_ref()
        .is_some_and(|re| re.is_match(id))
}

fn is_not_found(err: &DockerError) -> bool {
    matches!(
        err,
        DockerError::DockerResponseServerError {
            status_code: 404,
            ..
        }
    )
}

fn provider_error(err: DockerError) -> SandboxError {
    SandboxError::Provider(err.to_string())
}

/// Whether the expiry label of a container lies at or before `now_unix`.
///
/// Containers without a parseable label never expire.
fn is_expired(labels: &HashMap<String, String>, now_unix: i64) -> bool {
    labels
        .get(EXPIRES_AT_LABEL)
        .and_then(|v| v.trim().parse::<i64>().ok())
        .is_some_and(|expires_at| expires_at <= now_unix)
}

/// Whether `labels` carry the provider's `key=value` ownership label.
fn has_label(labels: &HashMap<String, String>, label: &str) -> bool {
    match label.split_once('=') {
        Some((key, value)) => labels.get(key).is_some_and(|v| v == value),
        None => labels.contains_key(label),
    }
}

/// `host:port` published for `port/tcp`, with wildcard binds mapped to
/// `localhost`.
fn host_for_port(ports: &HashMap<String, Option<Vec<PortBinding>>>, port: u16) -> Option<String> {
    let bindings = ports.get(&format!("{port}/tcp"))?.as_ref()?;
    bindings.iter().find_map(|binding| {
        let host_port = binding.host_port.as_deref().filter(|p| !p.is_empty())?;
        let host = match binding.host_ip.as_deref() {
            None | Some("") | Some("0.0.0.0") | Some("::") => "localhost",
            Some(ip) => ip,
        };
        Some(format!("{host}:{host_port}"))
    })
}

/// Single-entry tar archive holding `content` at `path`, relative to `/`.
fn file_archive(path: &str, content: &str) -> std::io::Result<Vec<u8>> {
    let mut header = tar::Header::new_gnu();
    header.set_size(content.len() as u64);
    header.set_mode(0o644);
    header.set_mtime(chrono::Utc::now().timestamp().max(0) as u64);
    let mut builder = tar::Builder::new(Vec::new());
    builder.append_data(
        &mut header,
        path.trim_start_matches('/'),
        content.as_bytes(),
    )?;
    builder.into_inner()
}

/// Content of the file `path` from an archive downloaded for it.
fn file_from_archive(archive: &[u8], path: &str) -> SandboxResult<String> {
    let mut archive = tar::Archive::new(archive);
    let mut entry = match archive.entries()?.next() {
        Some(entry) => entry?,
        None => {
            return Err(SandboxError::FileNotFound {
                path: path.to_string(),
            })
        }
    };
    if !entry.header().entry_type().is_file() {
        return Err(SandboxError::Provider(format!(
            "{path} is not a regular file"
        )));
    }
    let mut bytes = Vec::new();
    entry.read_to_end(&mut bytes)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Provisions sandboxes as Docker containers.
#[derive(Debug, Clone)]
pub struct DockerSandboxProvider {
    client: Docker,
    config: Arc<DockerSandboxConfig>,
}

impl DockerSandboxProvider {
    /// Client from the environment (`DOCKER_HOST`, else the local socket).
    pub fn new(config: DockerSandboxConfig) -> SandboxResult<Self> {
        let client = Docker::connect_with_defaults().map_err(provider_error)?;
        Ok(Self::with_client(client, config))
    }

    pub fn with_client(client: Docker, config: DockerSandboxConfig) -> Self {
        Self {
            client,
            config: Arc::new(config),
        }
    }

    pub fn from_env() -> SandboxResult<Self> {
        Self::new(DockerSandboxConfig::from_env())
    }

    async fn remove(&self, sandbox_id: &str) {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        if let Err(e) = self
            .client
            .remove_container(sandbox_id, Some(options))
            .await
        {
            warn!(sandbox_id, error = %e, "failed to remove expired sandbox");
        }
    }
}

#[async_trait]
impl SandboxProvider for DockerSandboxProvider {
    #[instrument(skip(self))]
    async fn create(&self, template: &str, timeout: Duration) -> SandboxResult<String> {
        let expires_at = chrono::Utc::now().timestamp() + timeout.as_secs() as i64;
        let mut labels = HashMap::from([(EXPIRES_AT_LABEL.to_string(), expires_at.to_string())]);
        match self.config.label.split_once('=') {
            Some((key, value)) => labels.insert(key.to_string(), value.to_string()),
            None => labels.insert(self.config.label.clone(), String::new()),
        };
        let exposed_ports = self
            .config
            .exposed_ports
            .iter()
            .map(|port| (format!("{port}/tcp"), HashMap::new()))
            .collect();

        let config = Config {
            image: Some(template.to_string()),
            labels: Some(labels),
            working_dir: Some(self.config.workdir.clone()),
            exposed_ports: Some(exposed_ports),
            host_config: Some(HostConfig {
                publish_all_ports: Some(true),
                ..Default::default()
            }),
            ..Default::default()
        };
        let container = self
            .client
            .create_container::<String, String>(None, config)
            .await
            .map_err(provider_error)?;
        self.client
            .start_container(&container.id, None::<StartContainerOptions<String>>)
            .await
            .map_err(provider_error)?;

        info!(sandbox_id = %container.id, template, expires_at, "sandbox created");
        Ok(container.id)
    }

    async fn connect(&self, sandbox_id: &str) -> SandboxResult<Arc<dyn SandboxHandle>> {
        let not_found = || SandboxError::SandboxNotFound {
            sandbox_id: sandbox_id.to_string(),
        };
        if !is_valid_sandbox_id(sandbox_id) {
            return Err(not_found());
        }
        let inspect = match self
            .client
            .inspect_container(sandbox_id, None::<InspectContainerOptions>)
            .await
        {
            Ok(inspect) => inspect,
            Err(e) if is_not_found(&e) => return Err(not_found()),
            Err(e) => return Err(provider_error(e)),
        };

        let labels = inspect
            .config
            .and_then(|c| c.labels)
            .unwrap_or_default();
        if !has_label(&labels, &self.config.label) {
            return Err(not_found());
        }
        if is_expired(&labels, chrono::Utc::now().timestamp()) {
            info!(sandbox_id, "sandbox expired");
            self.remove(sandbox_id).await;
            return Err(not_found());
        }
        let running = inspect
            .state
            .and_then(|s| s.running)
            .unwrap_or(false);
        if !running {
            return Err(not_found());
        }

        Ok(Arc::new(DockerSandbox {
            id: sandbox_id.to_string(),
            client: self.client.clone(),
            config: Arc::clone(&self.config),
        }))
    }
}

/// A running container.
#[derive(Debug)]
pub struct DockerSandbox {
    id: String,
    client: Docker,
    config: Arc<DockerSandboxConfig>,
}

impl DockerSandbox {
    fn resolve(&self, path: &str) -> String {
        resolve_path(&self.config.workdir, path)
    }
}

/// Relative paths resolve against the container workdir.
fn resolve_path(workdir: &str, path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("{}/{}", workdir.trim_end_matches('/'), path)
    }
}

#[async_trait]
impl SandboxHandle for DockerSandbox {
    fn id(&self) -> &str {
        &self.id
    }

    #[instrument(skip(self, buffers), fields(sandbox_id = %self.id))]
    async fn run_command(
        &self,
        cmd: &str,
        timeout: Duration,
        buffers: &mut OutputBuffers,
    ) -> SandboxResult<CommandResult> {
        let exec = self
            .client
            .create_exec(
                &self.id,
                CreateExecOptions {
                    cmd: Some(vec!["sh".to_string(), "-lc".to_string(), cmd.to_string()]),
                    working_dir: Some(self.config.workdir.clone()),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    ..Default::default()
                },
            )
            .await
            .map_err(provider_error)?;

        let mut output = match self
            .client
            .start_exec(&exec.id, None)
            .await
            .map_err(provider_error)?
        {
            StartExecResults::Attached { output, .. } => output,
            StartExecResults::Detached => {
                return Err(SandboxError::Provider(
                    "exec was detached unexpectedly".to_string(),
                ))
            }
        };

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let streamed = tokio::time::timeout(timeout, async {
            while let Some(msg) = output.next().await {
                match msg.map_err(provider_error)? {
                    LogOutput::StdOut { message } | LogOutput::Console { message } => {
                        stdout.extend_from_slice(&message)
                    }
                    LogOutput::StdErr { message } => stderr.extend_from_slice(&message),
                    LogOutput::StdIn { .. } => {}
                }
            }
            Ok::<_, SandboxError>(())
        })
        .await;

        buffers.stdout.push_str(&String::from_utf8_lossy(&stdout));
        buffers.stderr.push_str(&String::from_utf8_lossy(&stderr));
        match streamed {
            Ok(result) => result?,
            Err(_) => {
                return Err(SandboxError::CommandTimeout {
                    limit_ms: timeout.as_millis() as u64,
                })
            }
        }

        let inspect = self
            .client
            .inspect_exec(&exec.id)
            .await
            .map_err(provider_error)?;
        let exit_code = inspect
            .exit_code
            .and_then(|code| i32::try_from(code).ok())
            .unwrap_or(-1);
        debug!(exit_code, "command finished");

        Ok(CommandResult {
            exit_code,
            stdout: buffers.stdout.clone(),
            stderr: buffers.stderr.clone(),
        })
    }

    async fn write_file(&self, path: &str, content: &str) -> SandboxResult<()> {
        let target = self.resolve(path);
        let archive = file_archive(&target, content)?;
        let options = UploadToContainerOptions {
            path: "/".to_string(),
            ..Default::default()
        };
        self.client
            .upload_to_container(&self.id, Some(options), archive.into())
            .await
            .map_err(|e| SandboxError::Provider(format!("write {target} failed: {e}")))
    }

    async fn read_file(&self, path: &str) -> SandboxResult<String> {
        let target = self.resolve(path);
        let options = DownloadFromContainerOptions {
            path: target.clone(),
        };
        let mut stream = self
            .client
            .download_from_container(&self.id, Some(options));

        let mut archive = Vec::new();
        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(bytes) => archive.extend_from_slice(&bytes),
                Err(e) if is_not_found(&e) => {
                    return Err(SandboxError::FileNotFound { path: target })
                }
                Err(e) => {
                    return Err(SandboxError::Provider(format!(
                        "read {target} failed: {e}"
                    )))
                }
            }
        }
        file_from_archive(&archive, &target)
    }

    async fn exposed_host(&self, port: u16) -> SandboxResult<String> {
        let inspect = self
            .client
            .inspect_container(&self.id, None::<InspectContainerOptions>)
            .await
            .map_err(provider_error)?;
        let ports = inspect
            .network_settings
            .and_then(|n| n.ports)
            .unwrap_or_default();
        host_for_port(&ports, port)
            .ok_or_else(|| SandboxError::Provider(format!("port {port} is not published")))
    }

    /// Local containers serve plain HTTP.
    async fn preview_url(&self, port: u16) -> SandboxResult<String> {
        let host = self.exposed_host(port).await?;
        Ok(format!("http://{host}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn relative_paths_resolve_under_workdir() {
        assert_eq!(resolve_path("/home/user", "app/page.tsx"), "/home/user/app/page.tsx");
        assert_eq!(resolve_path("/home/user/", "app/page.tsx"), "/home/user/app/page.tsx");
        assert_eq!(resolve_path("/home/user", "/etc/hosts"), "/etc/hosts");
    }

    #[test]
    fn sandbox_id_pattern_rejects_flags() {
        assert!(is_valid_sandbox_id("3f1c9a0b2d4e"));
        assert!(is_valid_sandbox_id("vibe-sbx_1.2"));
        assert!(!is_valid_sandbox_id("--privileged"));
        assert!(!is_valid_sandbox_id(""));
        assert!(!is_valid_sandbox_id("a b"));
    }

    #[test]
    fn expiry_label_is_enforced() {
        let now = 1_700_000_000;
        assert!(is_expired(&labels(&[(EXPIRES_AT_LABEL, "1699999999")]), now));
        assert!(is_expired(&labels(&[(EXPIRES_AT_LABEL, "1700000000")]), now));
        assert!(!is_expired(&labels(&[(EXPIRES_AT_LABEL, "1700000900")]), now));
        assert!(!is_expired(&labels(&[(EXPIRES_AT_LABEL, "soon")]), now));
        assert!(!is_expired(&labels(&[]), now));
    }

    #[test]
    fn ownership_label_must_match() {
        let ours = labels(&[("dev.vibe.sandbox", "1")]);
        assert!(has_label(&ours, "dev.vibe.sandbox=1"));
        assert!(!has_label(&ours, "dev.vibe.sandbox=2"));
        assert!(!has_label(&labels(&[]), "dev.vibe.sandbox=1"));
    }

    #[test]
    fn published_port_maps_wildcard_to_localhost() {
        let binding = |ip: &str, port: &str| PortBinding {
            host_ip: Some(ip.to_string()),
            host_port: Some(port.to_string()),
        };
        let ports = HashMap::from([
            (
                "3000/tcp".to_string(),
                Some(vec![binding("0.0.0.0", "49153"), binding("::", "49153")]),
            ),
            ("8080/tcp".to_string(), Some(vec![binding("127.0.0.1", "49200")])),
            ("9000/tcp".to_string(), None),
        ]);
        assert_eq!(host_for_port(&ports, 3000).as_deref(), Some("localhost:49153"));
        assert_eq!(host_for_port(&ports, 8080).as_deref(), Some("127.0.0.1:49200"));
        assert_eq!(host_for_port(&ports, 9000), None);
        assert_eq!(host_for_port(&ports, 5432), None);
    }

    #[test]
    fn archived_file_reads_back() {
        let archive = file_archive("/home/user/app/page.tsx", "export default 1").unwrap();
        let content = file_from_archive(&archive, "/home/user/app/page.tsx").unwrap();
        assert_eq!(content, "export default 1");
    }

    #[test]
    fn directory_download_is_a_provider_error() {
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Directory);
        header.set_size(0);
        header.set_mode(0o755);
        let mut builder = tar::Builder::new(Vec::new());
        builder
            .append_data(&mut header, "app/", std::io::empty())
            .unwrap();
        let archive = builder.into_inner().unwrap();

        let err = file_from_archive(&archive, "/home/user/app").unwrap_err();
        assert!(matches!(err, SandboxError::Provider(_)));
    }

    #[test]
    fn empty_download_is_file_not_found() {
        let archive = tar::Builder::new(Vec::new()).into_inner().unwrap();
        let err = file_from_archive(&archive, "/home/user/nope.ts").unwrap_err();
        assert!(matches!(err, SandboxError::FileNotFound { .. }));
    }

    #[tokio::test]
    async fn connect_rejects_malformed_id_without_calling_docker() {
        let Ok(client) = Docker::connect_with_local_defaults() else {
            return;
        };
        let provider = DockerSandboxProvider::with_client(client, DockerSandboxConfig::default());
        let err = provider.connect("-rm").await.err().unwrap();
        assert!(matches!(err, SandboxError::SandboxNotFound { .. }));
    }
}
