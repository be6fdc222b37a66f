//! Container runtime readiness: the runtime installer boundary.
//!
//! A host may only initialize or join a cluster once its container runtime
//! answers. [`CommandRuntime`] shells out to a probe command (and an
//! optional install command); [`StaticRuntime`] is a fixed answer for
//! hosts managed elsewhere and for tests.

use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use corral_core::RuntimeSettings;

use crate::error::{ClusterError, ClusterResult};

/// What a ready runtime reports about itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeInfo {
    pub version: String,
}

/// A container runtime that can be checked (and made) ready.
///
/// `ensure_ready` must be idempotent: calling it on a ready host is a no-op
/// that returns the same info.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn ensure_ready(&self) -> ClusterResult<RuntimeInfo>;
}

/// Runtime checked by running external commands.
#[derive(Debug, Clone)]
pub struct CommandRuntime {
    probe: Vec<String>,
    install: Option<Vec<String>>,
    timeout: Duration,
}

impl CommandRuntime {
    pub fn new(settings: &RuntimeSettings) -> Self {
        Self {
            probe: settings.probe.clone(),
            install: settings.install.clone(),
            timeout: Duration::from_secs(120),
        }
    }

    /// Set the per-command timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn run(&self, argv: &[String]) -> Result<String, String> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| "empty command".to_string())?;

        let output = tokio::time::timeout(
            self.timeout,
            Command::new(program)
                .args(args)
                .stdin(Stdio::null())
                .kill_on_drop(true)
                .output(),
        )
        .await
        .map_err(|_| format!("`{program}` timed out after {:?}", self.timeout))?
        .map_err(|e| format!("`{program}` could not be started: {e}"))?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            Err(format!("`{program}` exited with {}: {stderr}", output.status))
        }
    }

    async fn probe(&self) -> Result<RuntimeInfo, String> {
        let stdout = self.run(&self.probe).await?;
        let version = stdout.lines().next().unwrap_or_default().trim().to_string();
        Ok(RuntimeInfo {
            version: if version.is_empty() {
                "unknown".to_string()
            } else {
                version
            },
        })
    }
}

#[async_trait]
impl ContainerRuntime for CommandRuntime {
    async fn ensure_ready(&self) -> ClusterResult<RuntimeInfo> {
        let first_failure = match self.probe().await {
            Ok(info) => {
                debug!(version = %info.version, "container runtime ready");
                return Ok(info);
            }
            Err(e) => e,
        };

        let Some(install) = &self.install else {
            return Err(ClusterError::RuntimeUnavailable(first_failure));
        };

        warn!(error = %first_failure, "container runtime not ready, running installer");
        self.run(install)
            .await
            .map_err(ClusterError::RuntimeUnavailable)?;

        let info = self
            .probe()
            .await
            .map_err(ClusterError::RuntimeUnavailable)?;
        info!(version = %info.version, "container runtime installed");
        Ok(info)
    }
}

type Attempt = Option<Result<RuntimeInfo, String>>;

/// One `ensure_ready` attempt at a time, shared by every caller.
///
/// The attempt runs on its own task: a caller that stops waiting (an HTTP
/// request that timed out, say) leaves the installer running, and the next
/// caller attaches to it instead of starting over. Once an attempt has
/// finished, the next call starts a fresh one.
pub(crate) struct SharedReadiness {
    runtime: Arc<dyn ContainerRuntime>,
    current: Mutex<Option<watch::Receiver<Attempt>>>,
}

impl SharedReadiness {
    pub(crate) fn new(runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self {
            runtime,
            current: Mutex::new(None),
        }
    }

    pub(crate) async fn ensure_ready(&self) -> ClusterResult<RuntimeInfo> {
        let mut attempt = self.attach()?;
        let finished = attempt.wait_for(Option::is_some).await;
        let outcome = finished
            .map_err(|_| ClusterError::RuntimeUnavailable("runtime check was aborted".to_string()))?
            .clone();
        match outcome {
            Some(result) => result.map_err(ClusterError::RuntimeUnavailable),
            None => Err(ClusterError::RuntimeUnavailable("runtime check was aborted".to_string())),
        }
    }

    fn attach(&self) -> ClusterResult<watch::Receiver<Attempt>> {
        let mut current = self
            .current
            .lock()
            .map_err(|_| ClusterError::RuntimeUnavailable("runtime state poisoned".to_string()))?;
        if let Some(running) = current.as_ref().filter(|rx| rx.borrow().is_none()) {
            debug!("joining in-flight runtime check");
            return Ok(running.clone());
        }

        let (tx, rx) = watch::channel(None);
        let runtime = self.runtime.clone();
        tokio::spawn(async move {
            let result = runtime.ensure_ready().await.map_err(|e| match e {
                ClusterError::RuntimeUnavailable(reason) => reason,
                other => other.to_string(),
            });
            let _ = tx.send(Some(result));
        });
        *current = Some(rx.clone());
        Ok(rx)
    }
}

/// Runtime whose readiness is set by the caller.
#[derive(Debug)]
pub struct StaticRuntime {
    version: Mutex<Option<String>>,
}

impl StaticRuntime {
    /// A runtime that reports ready with `version`.
    pub fn ready(version: &str) -> Self {
        Self {
            version: Mutex::new(Some(version.to_string())),
        }
    }

    /// A runtime that is down.
    pub fn unavailable() -> Self {
        Self {
            version: Mutex::new(None),
        }
    }

    /// Bring the runtime up (`Some`) or take it down (`None`).
    pub fn set_version(&self, version: Option<&str>) {
        if let Ok(mut guard) = self.version.lock() {
            *guard = version.map(str::to_string);
        }
    }
}

#[async_trait]
impl ContainerRuntime for StaticRuntime {
    async fn ensure_ready(&self) -> ClusterResult<RuntimeInfo> {
        let version = self
            .version
            .lock()
            .map_err(|_| ClusterError::RuntimeUnavailable("runtime state poisoned".to_string()))?
            .clone();
        version
            .map(|version| RuntimeInfo { version })
            .ok_or_else(|| ClusterError::RuntimeUnavailable("runtime is not running".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(probe: &[&str], install: Option<&[&str]>) -> RuntimeSettings {
        RuntimeSettings {
            probe: probe.iter().map(|s| s.to_string()).collect(),
            install: install.map(|cmd| cmd.iter().map(|s| s.to_string()).collect()),
        }
    }

    #[tokio::test]
    async fn static_runtime_toggles() {
        let runtime = StaticRuntime::unavailable();
        assert!(matches!(
            runtime.ensure_ready().await,
            Err(ClusterError::RuntimeUnavailable(_))
        ));

        runtime.set_version(Some("27.1.1"));
        assert_eq!(runtime.ensure_ready().await.unwrap().version, "27.1.1");
        // Idempotent.
        assert_eq!(runtime.ensure_ready().await.unwrap().version, "27.1.1");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn command_probe_reads_version_from_stdout() {
        let runtime = CommandRuntime::new(&settings(&["echo", "24.0.7"], None));
        assert_eq!(runtime.ensure_ready().await.unwrap().version, "24.0.7");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn command_probe_failure_without_installer() {
        let runtime = CommandRuntime::new(&settings(&["false"], None));
        assert!(matches!(
            runtime.ensure_ready().await,
            Err(ClusterError::RuntimeUnavailable(_))
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn installer_runs_when_probe_fails() {
        let dir = tempfile::tempdir().unwrap();
        let flag = dir.path().join("installed");
        let flag = flag.to_str().unwrap();

        let probe_script = format!("test -f {flag} && echo 25.0.0");
        let install_script = format!("touch {flag}");
        let runtime = CommandRuntime::new(&settings(
            &["sh", "-c", probe_script.as_str()],
            Some(&["sh", "-c", install_script.as_str()]),
        ));

        assert_eq!(runtime.ensure_ready().await.unwrap().version, "25.0.0");
    }

    #[tokio::test]
    async fn missing_binary_is_unavailable() {
        let runtime = CommandRuntime::new(&settings(&["corral-no-such-runtime-binary"], None))
            .with_timeout(Duration::from_secs(5));
        assert!(matches!(
            runtime.ensure_ready().await,
            Err(ClusterError::RuntimeUnavailable(_))
        ));
    }

    #[cfg(unix)]
    fn slow_installer(dir: &std::path::Path) -> CommandRuntime {
        let marker = dir.join("engine-version");
        let marker = marker.to_str().unwrap();
        let probe = format!("cat {marker}");
        let install = format!("sleep 1 && echo 27.1.1 >> {marker}");
        CommandRuntime::new(&settings(
            &["sh", "-c", probe.as_str()],
            Some(&["sh", "-c", install.as_str()]),
        ))
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn abandoned_install_keeps_running() {
        let dir = tempfile::tempdir().unwrap();
        let shared = SharedReadiness::new(Arc::new(slow_installer(dir.path())));

        let gave_up =
            tokio::time::timeout(Duration::from_millis(200), shared.ensure_ready()).await;
        assert!(gave_up.is_err());

        // The retry attaches to the install already underway.
        let info = shared.ensure_ready().await.unwrap();
        assert_eq!(info.version, "27.1.1");
        let written = std::fs::read_to_string(dir.path().join("engine-version")).unwrap();
        assert_eq!(written.lines().count(), 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn concurrent_callers_share_one_install() {
        let dir = tempfile::tempdir().unwrap();
        let shared = SharedReadiness::new(Arc::new(slow_installer(dir.path())));

        let (a, b) = tokio::join!(shared.ensure_ready(), shared.ensure_ready());
        assert_eq!(a.unwrap().version, "27.1.1");
        assert_eq!(b.unwrap().version, "27.1.1");
        let written = std::fs::read_to_string(dir.path().join("engine-version")).unwrap();
        assert_eq!(written.lines().count(), 1);
    }

    #[tokio::test]
    async fn finished_attempt_is_not_reused() {
        let runtime = Arc::new(StaticRuntime::unavailable());
        let shared = SharedReadiness::new(runtime.clone());
        assert!(shared.ensure_ready().await.is_err());

        runtime.set_version(Some("27.1.1"));
        assert_eq!(shared.ensure_ready().await.unwrap().version, "27.1.1");
    }

    #[tokio::test]
    async fn empty_probe_is_unavailable() {
        let runtime = CommandRuntime::new(&settings(&[], None));
        assert!(runtime.ensure_ready().await.is_err());
    }
}
