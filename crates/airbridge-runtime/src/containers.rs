//! Compose workload management.
//!
//! The robot runs at most one compose workload, stored as JSON at a fixed
//! path.  Replacing it takes the old one down (removing its images), writes
//! the new document and brings it up detached.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use airbridge_types::{ContainerState, ContainerUpdate};
use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

pub const COMPOSE_UP: &str = "compose_up";
pub const COMPOSE_DOWN: &str = "compose_down";
pub const COMPOSE_WRITE: &str = "compose_write";
pub const CONTAINERS_DISABLED: &str = "containers_disabled";

#[derive(Error, Debug)]
pub enum ContainerError {
    #[error("failed to run `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` exited with {status}: {stderr}")]
    Failed {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("failed to write compose file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Private registry credentials used for `docker login` at startup.
#[derive(Clone, Default)]
pub struct RegistryLogin {
    pub url: String,
    pub username: String,
    pub password: String,
}

#[async_trait]
pub trait ContainerManager: Send + Sync {
    /// Bring the stored workload up, if there is one.
    async fn start(&self) -> ContainerState;

    /// Replace the stored workload with `compose` and start it.
    async fn put_compose(&self, compose: &Map<String, Value>) -> ContainerState;

    /// Take the stored workload down and forget it.
    async fn remove_compose(&self) -> ContainerState;
}

/// Apply a `containers/config` request.
pub async fn apply_update(manager: &dyn ContainerManager, update: &ContainerUpdate) -> ContainerState {
    match &update.compose {
        Some(compose) => manager.put_compose(compose).await,
        None => manager.remove_compose().await,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// docker compose CLI
// ─────────────────────────────────────────────────────────────────────────────

pub struct ComposeCli {
    /// Program plus leading arguments; `["docker"]` in production.
    program: Vec<String>,
    compose_path: PathBuf,
    /// Serialises workload changes.
    lock: Mutex<()>,
}

impl ComposeCli {
    pub fn new(compose_path: impl Into<PathBuf>) -> Self {
        Self::with_program(vec!["docker".to_string()], compose_path)
    }

    pub fn with_program(program: Vec<String>, compose_path: impl Into<PathBuf>) -> Self {
        Self {
            program,
            compose_path: compose_path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn compose_path(&self) -> &Path {
        &self.compose_path
    }

    /// `docker login` against a private registry.  The password goes through
    /// stdin so it never shows up in the process table.
    pub async fn login(&self, registry: &RegistryLogin) -> Result<(), ContainerError> {
        self.run_with_input(
            &["login", &registry.url, "-u", &registry.username, "--password-stdin"],
            Some(registry.password.as_bytes()),
        )
        .await?;
        info!(registry = %registry.url, "logged into private container registry");
        Ok(())
    }

    async fn run(&self, args: &[&str]) -> Result<(), ContainerError> {
        self.run_with_input(args, None).await
    }

    async fn run_with_input(&self, args: &[&str], input: Option<&[u8]>) -> Result<(), ContainerError> {
        let (program, leading) = match self.program.split_first() {
            Some((program, leading)) => (program.as_str(), leading),
            None => ("docker", &[][..]),
        };
        // Registry details stay out of the log.
        let command = match args.first() {
            Some(&"login") => format!("{program} login"),
            _ => format!("{program} {}", args.join(" ")),
        };
        debug!(%command, "running container command");

        let spawn_err = |source: std::io::Error| ContainerError::Spawn {
            command: command.clone(),
            source,
        };
        let mut child = Command::new(program)
            .args(leading)
            .args(args)
            .stdin(if input.is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(spawn_err)?;
        if let (Some(input), Some(mut stdin)) = (input, child.stdin.take()) {
            stdin.write_all(input).await.map_err(spawn_err)?;
            // Dropping the handle closes the pipe.
        }
        let output = child.wait_with_output().await.map_err(spawn_err)?;
        if output.status.success() {
            Ok(())
        } else {
            Err(ContainerError::Failed {
                command,
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }

    fn path_arg(&self) -> String {
        self.compose_path.to_string_lossy().into_owned()
    }

    async fn up(&self) -> ContainerState {
        if !tokio::fs::try_exists(&self.compose_path).await.unwrap_or(false) {
            info!("no containers to start");
            return ContainerState::down();
        }
        info!(path = %self.compose_path.display(), "attempting docker compose up");
        match self.run(&["compose", "-f", &self.path_arg(), "up", "-d"]).await {
            Ok(()) => ContainerState::up(),
            Err(e) => {
                error!(error = %e, "docker compose up failed");
                ContainerState::error(COMPOSE_UP)
            }
        }
    }

    async fn down(&self) -> ContainerState {
        if !tokio::fs::try_exists(&self.compose_path).await.unwrap_or(false) {
            return ContainerState::down();
        }
        info!(path = %self.compose_path.display(), "attempting docker compose down");
        if let Err(e) = self
            .run(&["compose", "-f", &self.path_arg(), "down", "--rmi", "all"])
            .await
        {
            error!(error = %e, "docker compose down failed");
            return ContainerState::error(COMPOSE_DOWN);
        }
        if let Err(e) = tokio::fs::remove_file(&self.compose_path).await {
            error!(error = %e, "failed to remove compose file");
        }
        ContainerState::down()
    }

    async fn write(&self, compose: &Map<String, Value>) -> Result<(), ContainerError> {
        let write_err = |source: std::io::Error| ContainerError::Write {
            path: self.compose_path.clone(),
            source,
        };
        if let Some(dir) = self.compose_path.parent() {
            tokio::fs::create_dir_all(dir).await.map_err(write_err)?;
        }
        let body = serde_json::to_vec(compose).map_err(|e| write_err(std::io::Error::other(e)))?;
        tokio::fs::write(&self.compose_path, body).await.map_err(write_err)
    }
}

#[async_trait]
impl ContainerManager for ComposeCli {
    async fn start(&self) -> ContainerState {
        let _guard = self.lock.lock().await;
        self.up().await
    }

    async fn put_compose(&self, compose: &Map<String, Value>) -> ContainerState {
        let _guard = self.lock.lock().await;
        let removed = self.down().await;
        if removed.error_code.is_some() {
            return removed;
        }
        if let Err(e) = self.write(compose).await {
            error!(error = %e, "compose write failed");
            return ContainerState::error(COMPOSE_WRITE);
        }
        self.up().await
    }

    async fn remove_compose(&self) -> ContainerState {
        let _guard = self.lock.lock().await;
        self.down().await
    }
}

/// Stand-in used when container management is switched off.
pub struct DisabledContainers;

#[async_trait]
impl ContainerManager for DisabledContainers {
    async fn start(&self) -> ContainerState {
        ContainerState::error(CONTAINERS_DISABLED)
    }

    async fn put_compose(&self, _compose: &Map<String, Value>) -> ContainerState {
        ContainerState::error(CONTAINERS_DISABLED)
    }

    async fn remove_compose(&self) -> ContainerState {
        ContainerState::error(CONTAINERS_DISABLED)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use airbridge_types::ContainerPhase;
    use serde_json::json;
    use tempfile::TempDir;

    /// A `docker` stand-in run through `sh`: records its arguments and fails
    /// any invocation whose arguments match the shell pattern `fail_on`.
    fn fake_docker(dir: &TempDir, fail_on: Option<&str>) -> (Vec<String>, PathBuf) {
        let log = dir.path().join("calls.log");
        let fail = fail_on
            .map(|pattern| format!("case \"$*\" in {pattern}) echo boom >&2; exit 1;; esac\n"))
            .unwrap_or_default();
        let script = format!(
            "{fail}echo \"$@\" >> '{log}'\ncase \"$1\" in login) echo \"stdin:$(cat)\" >> '{log}';; esac\n",
            log = log.display()
        );
        let path = dir.path().join("docker.sh");
        std::fs::write(&path, script).unwrap();
        (vec!["sh".to_string(), path.display().to_string()], log)
    }

    fn calls(log: &Path) -> Vec<String> {
        std::fs::read_to_string(log)
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    #[tokio::test]
    async fn start_without_compose_file_is_down() {
        let dir = TempDir::new().unwrap();
        let (program, log) = fake_docker(&dir, None);
        let cli = ComposeCli::with_program(program, dir.path().join("docker-compose.json"));
        assert_eq!(cli.start().await, ContainerState::down());
        assert!(calls(&log).is_empty());
    }

    #[tokio::test]
    async fn put_writes_and_brings_the_workload_up() {
        let dir = TempDir::new().unwrap();
        let (program, log) = fake_docker(&dir, None);
        let path = dir.path().join("air").join("docker-compose.json");
        let cli = ComposeCli::with_program(program, &path);

        let compose = json!({"services": {"web": {"image": "nginx"}}});
        let state = cli.put_compose(compose.as_object().unwrap()).await;
        assert_eq!(state, ContainerState::up());

        let written: Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(written, compose);
        let calls = calls(&log);
        assert_eq!(calls.len(), 1);
        assert!(calls[0].ends_with("up -d"));
    }

    #[tokio::test]
    async fn put_replaces_an_existing_workload() {
        let dir = TempDir::new().unwrap();
        let (program, log) = fake_docker(&dir, None);
        let path = dir.path().join("docker-compose.json");
        std::fs::write(&path, "{}").unwrap();
        let cli = ComposeCli::with_program(program, &path);

        let state = cli.put_compose(json!({"services": {}}).as_object().unwrap()).await;
        assert_eq!(state.state, ContainerPhase::Up);
        let calls = calls(&log);
        assert!(calls[0].ends_with("down --rmi all"));
        assert!(calls[1].ends_with("up -d"));
    }

    #[tokio::test]
    async fn failed_down_keeps_the_file_and_reports_compose_down() {
        let dir = TempDir::new().unwrap();
        let (program, _log) = fake_docker(&dir, Some(r#"*" down --rmi all""#));
        let path = dir.path().join("docker-compose.json");
        std::fs::write(&path, "{}").unwrap();
        let cli = ComposeCli::with_program(program, &path);

        assert_eq!(cli.remove_compose().await, ContainerState::error(COMPOSE_DOWN));
        assert!(path.exists());
    }

    #[tokio::test]
    async fn failed_up_reports_compose_up() {
        let dir = TempDir::new().unwrap();
        let (program, _log) = fake_docker(&dir, Some(r#"*" up -d""#));
        let cli = ComposeCli::with_program(program, dir.path().join("docker-compose.json"));
        let state = cli.put_compose(json!({}).as_object().unwrap()).await;
        assert_eq!(state, ContainerState::error(COMPOSE_UP));
    }

    #[tokio::test]
    async fn remove_deletes_the_compose_file() {
        let dir = TempDir::new().unwrap();
        let (program, _log) = fake_docker(&dir, None);
        let path = dir.path().join("docker-compose.json");
        std::fs::write(&path, "{}").unwrap();
        let cli = ComposeCli::with_program(program, &path);

        let update = ContainerUpdate { uuid: "c-1".to_string(), compose: None };
        assert_eq!(apply_update(&cli, &update).await, ContainerState::down());
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn login_failure_is_an_error_without_credentials_in_it() {
        let dir = TempDir::new().unwrap();
        let (program, _log) = fake_docker(&dir, Some(r#""login "*"#));
        let cli = ComposeCli::with_program(program, dir.path().join("docker-compose.json"));
        let registry = RegistryLogin {
            url: "registry.example".to_string(),
            username: "bot".to_string(),
            password: "hunter2".to_string(),
        };
        let err = cli.login(&registry).await.unwrap_err();
        assert!(!err.to_string().contains("hunter2"));
    }

    #[tokio::test]
    async fn login_passes_the_password_on_stdin() {
        let dir = TempDir::new().unwrap();
        let (program, log) = fake_docker(&dir, None);
        let cli = ComposeCli::with_program(program, dir.path().join("docker-compose.json"));
        let registry = RegistryLogin {
            url: "registry.example".to_string(),
            username: "bot".to_string(),
            password: "hunter2".to_string(),
        };
        cli.login(&registry).await.unwrap();

        let calls = calls(&log);
        assert_eq!(calls, ["login registry.example -u bot --password-stdin", "stdin:hunter2"]);
    }

    #[tokio::test]
    async fn disabled_manager_answers_with_containers_disabled() {
        let update = ContainerUpdate { uuid: "c-1".to_string(), compose: None };
        let state = apply_update(&DisabledContainers, &update).await;
        assert_eq!(state.error_code.as_deref(), Some(CONTAINERS_DISABLED));
    }
}
