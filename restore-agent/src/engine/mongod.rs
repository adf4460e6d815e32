//! `mongod` process control.
//!
//! Each start reserves a free loopback port, spawns the binary with the
//! minimal config plus the variant's parameters, and polls until the port
//! accepts connections.

use super::{EngineProcess, EngineProcessControl, EngineVariant};
use crate::config::EngineConfig;
use crate::utils::errors::{AgentError, Result};
use async_trait::async_trait;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::net::{IpAddr, SocketAddr, TcpListener};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const READINESS_POLL_INTERVAL: Duration = Duration::from_millis(250);
const CONNECT_PROBE_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct MongodProcessControl {
    binary: PathBuf,
    bind_ip: IpAddr,
    startup_timeout: Duration,
    shutdown_grace: Duration,
    cancel: CancellationToken,
}

impl MongodProcessControl {
    pub fn new(config: &EngineConfig, cancel: CancellationToken) -> Result<Self> {
        let bind_ip = config.bind_ip.parse().map_err(|e| {
            AgentError::Config(format!("invalid engine.bind_ip {:?}: {}", config.bind_ip, e))
        })?;

        Ok(Self {
            binary: config.binary.clone(),
            bind_ip,
            startup_timeout: config.startup_timeout(),
            shutdown_grace: config.shutdown_grace(),
            cancel,
        })
    }

    fn reserve_port(&self) -> Result<u16> {
        let listener = TcpListener::bind(SocketAddr::new(self.bind_ip, 0))?;
        Ok(listener.local_addr()?.port())
    }

    fn command(&self, config_path: &Path, port: u16, variant: EngineVariant) -> Command {
        let mut command = Command::new(&self.binary);
        command
            .arg("--config")
            .arg(config_path)
            .arg("--port")
            .arg(port.to_string())
            .arg("--bind_ip")
            .arg(self.bind_ip.to_string());
        for parameter in variant.set_parameters() {
            command.arg("--setParameter").arg(parameter);
        }
        command.stdin(Stdio::null()).kill_on_drop(true);
        command
    }

    /// Poll until `addr` accepts a TCP connection, the child exits, the startup
    /// timeout passes, or the restore is cancelled.
    async fn wait_until_listening(&self, child: &mut Child, addr: SocketAddr) -> Result<()> {
        let started = Instant::now();
        loop {
            if self.cancel.is_cancelled() {
                return Err(AgentError::Cancelled);
            }
            if let Some(status) = child.try_wait()? {
                return Err(AgentError::Process(format!(
                    "engine exited during startup with {status}"
                )));
            }
            if let Ok(Ok(_)) = tokio::time::timeout(CONNECT_PROBE_TIMEOUT, TcpStream::connect(addr)).await {
                return Ok(());
            }
            if started.elapsed() >= self.startup_timeout {
                return Err(AgentError::Process(format!(
                    "engine not listening on {} after {:?}",
                    addr, self.startup_timeout
                )));
            }

            tokio::select! {
                _ = self.cancel.cancelled() => return Err(AgentError::Cancelled),
                _ = tokio::time::sleep(READINESS_POLL_INTERVAL) => {}
            }
        }
    }
}

#[async_trait]
impl EngineProcessControl for MongodProcessControl {
    async fn start_with_variant(
        &self,
        config_path: &Path,
        variant: EngineVariant,
    ) -> Result<Box<dyn EngineProcess>> {
        let port = self.reserve_port()?;
        let addr = SocketAddr::new(self.bind_ip, port);

        info!(
            binary = %self.binary.display(),
            config = %config_path.display(),
            %variant,
            %addr,
            "Starting engine"
        );

        let mut child = self.command(config_path, port, variant).spawn().map_err(|e| {
            AgentError::Process(format!("failed to spawn {}: {}", self.binary.display(), e))
        })?;

        if let Err(e) = self.wait_until_listening(&mut child, addr).await {
            // No handle escapes a failed start, so reap the child here
            warn!(%variant, error = %e, "Engine failed to come up, killing it");
            if let Err(kill_err) = child.kill().await {
                warn!(error = %kill_err, "Failed to kill engine after failed start");
            }
            return Err(e);
        }

        info!(%variant, %addr, pid = ?child.id(), "Engine is accepting connections");

        Ok(Box::new(MongodProcess {
            child,
            uri: format!("mongodb://{addr}/?directConnection=true"),
            variant,
            shutdown_grace: self.shutdown_grace,
            cancel: self.cancel.clone(),
        }))
    }
}

/// Running `mongod` child.
#[derive(Debug)]
pub struct MongodProcess {
    child: Child,
    uri: String,
    variant: EngineVariant,
    shutdown_grace: Duration,
    cancel: CancellationToken,
}

impl MongodProcess {
    fn check_status(&self, status: std::process::ExitStatus) -> Result<()> {
        if status.success() {
            info!(variant = %self.variant, "Engine exited cleanly");
            Ok(())
        } else {
            Err(AgentError::Process(format!(
                "engine ({}) exited with {}",
                self.variant, status
            )))
        }
    }
}

#[async_trait]
impl EngineProcess for MongodProcess {
    fn uri(&self) -> &str {
        &self.uri
    }

    fn variant(&self) -> EngineVariant {
        self.variant
    }

    fn terminate(&mut self) -> Result<()> {
        let Some(pid) = self.child.id() else {
            // Already reaped
            return Ok(());
        };

        debug!(pid, variant = %self.variant, "Sending SIGTERM to engine");
        let raw = i32::try_from(pid)
            .map_err(|_| AgentError::Process(format!("pid {pid} out of range")))?;
        kill(Pid::from_raw(raw), Signal::SIGTERM)
            .map_err(|e| AgentError::Process(format!("failed to signal engine {pid}: {e}")))
    }

    async fn wait(&mut self) -> Result<()> {
        let exited = tokio::select! {
            status = self.child.wait() => Some(status),
            _ = self.cancel.cancelled() => None,
        };

        let status = match exited {
            Some(status) => status?,
            None => {
                warn!(
                    variant = %self.variant,
                    grace = ?self.shutdown_grace,
                    "Restore cancelled, giving engine time to exit"
                );
                match tokio::time::timeout(self.shutdown_grace, self.child.wait()).await {
                    Ok(status) => status?,
                    Err(_) => {
                        warn!(variant = %self.variant, "Engine did not exit within grace period, killing it");
                        self.child.kill().await?;
                        return Err(AgentError::Process(format!(
                            "engine ({}) killed after {:?} grace period",
                            self.variant, self.shutdown_grace
                        )));
                    }
                }
            }
        };

        self.check_status(status)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    fn engine_config(binary: PathBuf) -> EngineConfig {
        EngineConfig {
            binary,
            startup_timeout_secs: 1,
            shutdown_grace_secs: 1,
            ..EngineConfig::default()
        }
    }

    fn script(dir: &TempDir, body: &str) -> PathBuf {
        let path = dir.path().join("fake-mongod");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn sleeping_process(cancel: CancellationToken, grace: Duration) -> MongodProcess {
        let child = Command::new("sleep").arg("30").kill_on_drop(true).spawn().unwrap();
        MongodProcess {
            child,
            uri: "mongodb://127.0.0.1:1/".to_string(),
            variant: EngineVariant::DisableSessionCacheRefresh,
            shutdown_grace: grace,
            cancel,
        }
    }

    #[test]
    fn test_command_line() {
        let control = MongodProcessControl::new(
            &engine_config(PathBuf::from("mongod")),
            CancellationToken::new(),
        )
        .unwrap();

        let command = control.command(
            Path::new("/etc/minimal.conf"),
            27018,
            EngineVariant::RecoverOplogAsStandalone,
        );
        let args: Vec<String> = command
            .as_std()
            .get_args()
            .map(|a| a.to_string_lossy().to_string())
            .collect();

        assert_eq!(
            args,
            vec![
                "--config",
                "/etc/minimal.conf",
                "--port",
                "27018",
                "--bind_ip",
                "127.0.0.1",
                "--setParameter",
                "recoverFromOplogAsStandalone=true",
                "--setParameter",
                "takeUnstableCheckpointOnShutdown=true",
            ]
        );
    }

    #[test]
    fn test_invalid_bind_ip() {
        let mut config = EngineConfig::default();
        config.bind_ip = "localhost:27017".to_string();
        let err = MongodProcessControl::new(&config, CancellationToken::new()).unwrap_err();
        assert!(matches!(err, AgentError::Config(_)));
    }

    #[tokio::test]
    async fn test_start_fails_when_binary_missing() {
        let control = MongodProcessControl::new(
            &engine_config(PathBuf::from("/nonexistent/mongod")),
            CancellationToken::new(),
        )
        .unwrap();

        let err = control
            .start_with_variant(Path::new("/dev/null"), EngineVariant::DisableSessionCacheRefresh)
            .await
            .err()
            .unwrap();
        assert!(err.to_string().contains("failed to spawn"));
    }

    #[tokio::test]
    async fn test_start_fails_when_engine_exits_early() {
        let dir = TempDir::new().unwrap();
        let control = MongodProcessControl::new(
            &engine_config(script(&dir, "exit 3")),
            CancellationToken::new(),
        )
        .unwrap();

        let err = control
            .start_with_variant(Path::new("/dev/null"), EngineVariant::DisableSessionCacheRefresh)
            .await
            .err()
            .unwrap();
        assert!(err.to_string().contains("exited during startup"));
    }

    #[tokio::test]
    async fn test_start_times_out_when_engine_never_listens() {
        let dir = TempDir::new().unwrap();
        let control = MongodProcessControl::new(
            &engine_config(script(&dir, "exec sleep 30")),
            CancellationToken::new(),
        )
        .unwrap();

        let err = control
            .start_with_variant(Path::new("/dev/null"), EngineVariant::RecoverOplogAsStandalone)
            .await
            .err()
            .unwrap();
        assert!(err.to_string().contains("not listening"));
    }

    #[tokio::test]
    async fn test_terminate_then_wait_reports_signal_exit() {
        let mut process = sleeping_process(CancellationToken::new(), Duration::from_secs(1));

        process.terminate().unwrap();
        let err = process.wait().await.unwrap_err();
        assert!(matches!(err, AgentError::Process(_)));
    }

    #[tokio::test]
    async fn test_wait_kills_after_grace_when_cancelled() {
        let cancel = CancellationToken::new();
        let mut process = sleeping_process(cancel.clone(), Duration::from_millis(100));
        cancel.cancel();

        let started = Instant::now();
        let err = process.wait().await.unwrap_err();
        assert!(err.to_string().contains("grace period"));
        assert!(started.elapsed() < Duration::from_secs(10));
    }
}
