//! Admin sessions driven through the engine's command-line shell.
//!
//! Every operation runs one `<shell> <uri> --quiet --norc --eval <script>`
//! invocation. A non-zero shell exit is an operation failure.

use super::{AdminConnector, AdminService};
use crate::config::EngineConfig;
use crate::models::OplogTimestamp;
use crate::utils::cancel::cancellable;
use crate::utils::errors::{AgentError, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

const PING_SCRIPT: &str = r#"
const reply = db.adminCommand({ ping: 1 });
if (reply.ok !== 1) {
  throw new Error('ping failed: ' + JSON.stringify(reply));
}
"#;

// The server drops the connection while acting on shutdown; only other errors count.
const SHUTDOWN_SCRIPT: &str = r#"
try {
  db.getSiblingDB('admin').shutdownServer({ force: false });
} catch (e) {
  if (!/(closed|network|ECONNRESET|socket|connection)/i.test(String(e))) {
    throw e;
  }
}
"#;

fn fix_system_data_script(last_write: OplogTimestamp) -> String {
    format!(
        r#"
const local = db.getSiblingDB('local');
local.getCollection('replset.minvalid').deleteMany({{}});
local.getCollection('replset.minvalid').insertOne({{
  _id: ObjectId(),
  t: NumberLong(-1),
  ts: Timestamp({{ t: 0, i: 1 }})
}});
local.getCollection('replset.election').drop();
local.getCollection('replset.oplogTruncateAfterPoint').updateOne(
  {{ _id: 'oplogTruncateAfterPoint' }},
  {{ $set: {{ oplogTruncateAfterPoint: Timestamp({{ t: {ts}, i: {inc} }}) }} }},
  {{ upsert: true }}
);
db.getSiblingDB('config').getCollection('system.sessions').drop();
"#,
        ts = last_write.ts,
        inc = last_write.inc,
    )
}

/// Append `appName` as an encoded query pair so reserved characters in the
/// name cannot leak into the URI authority.
fn with_app_name(uri: &str, app_name: &str) -> Result<String> {
    let mut url = reqwest::Url::parse(uri)
        .map_err(|e| AgentError::Admin(format!("invalid engine uri {uri:?}: {e}")))?;
    url.query_pairs_mut().append_pair("appName", app_name);
    Ok(url.to_string())
}

#[derive(Debug, Clone)]
pub struct ShellAdminConnector {
    shell: PathBuf,
    timeout: Duration,
    app_name: String,
    cancel: CancellationToken,
}

impl ShellAdminConnector {
    pub fn new(config: &EngineConfig, cancel: CancellationToken) -> Self {
        let host = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "localhost".to_string());

        Self {
            shell: config.admin_shell.clone(),
            timeout: config.admin_timeout(),
            app_name: format!("restore-agent@{host}"),
            cancel,
        }
    }
}

#[async_trait]
impl AdminConnector for ShellAdminConnector {
    async fn connect(&self, uri: &str) -> Result<Box<dyn AdminService>> {
        let service = ShellAdminService {
            shell: self.shell.clone(),
            uri: with_app_name(uri, &self.app_name)?,
            timeout: self.timeout,
            cancel: self.cancel.clone(),
        };

        service.run_script("ping", PING_SCRIPT, true).await?;
        debug!(uri = %uri, "Admin session bound");
        Ok(Box::new(service))
    }
}

#[derive(Debug, Clone)]
pub struct ShellAdminService {
    shell: PathBuf,
    uri: String,
    timeout: Duration,
    cancel: CancellationToken,
}

impl ShellAdminService {
    /// Run one script. Operations that tear the engine down pass
    /// `observe_cancel = false` so they still complete after cancellation.
    async fn run_script(
        &self,
        operation: &'static str,
        script: &str,
        observe_cancel: bool,
    ) -> Result<String> {
        let mut command = Command::new(&self.shell);
        command
            .arg(&self.uri)
            .arg("--quiet")
            .arg("--norc")
            .arg("--eval")
            .arg(script)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let run = async {
            let output = tokio::time::timeout(self.timeout, command.output())
                .await
                .map_err(|_| {
                    AgentError::Admin(format!("{operation} timed out after {:?}", self.timeout))
                })?
                .map_err(|e| {
                    AgentError::Admin(format!("failed to run {}: {}", self.shell.display(), e))
                })?;

            if output.status.success() {
                Ok(String::from_utf8_lossy(&output.stdout).into_owned())
            } else {
                let stderr = String::from_utf8_lossy(&output.stderr);
                Err(AgentError::Admin(format!(
                    "{operation} exited with {}: {}",
                    output.status,
                    stderr.trim()
                )))
            }
        };

        if observe_cancel {
            cancellable(&self.cancel, run).await
        } else {
            run.await
        }
    }
}

#[async_trait]
impl AdminService for ShellAdminService {
    async fn fix_system_data_after_restore(&self, last_write: OplogTimestamp) -> Result<()> {
        info!(last_write = %last_write, "Fixing system data after restore");
        self.run_script("fix system data", &fix_system_data_script(last_write), true)
            .await?;
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        info!("Requesting engine shutdown");
        self.run_script("shutdown", SHUTDOWN_SCRIPT, false).await?;
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    /// Fake shell that records its argv (one per line) and exits with `code`.
    fn fake_shell(dir: &TempDir, code: i32) -> PathBuf {
        let path = dir.path().join("fake-shell");
        let log = dir.path().join("argv.log");
        std::fs::write(
            &path,
            format!(
                "#!/bin/sh\nfor a in \"$@\"; do printf '%s\\n' \"$a\" >> '{}'; done\necho 'MongoServerError: boom' >&2\nexit {}\n",
                log.display(),
                code
            ),
        )
        .unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn connector(shell: PathBuf, cancel: CancellationToken) -> ShellAdminConnector {
        let config = EngineConfig {
            admin_shell: shell,
            admin_timeout_secs: 10,
            ..EngineConfig::default()
        };
        ShellAdminConnector::new(&config, cancel)
    }

    fn recorded(dir: &TempDir) -> String {
        std::fs::read_to_string(dir.path().join("argv.log")).unwrap_or_default()
    }

    #[test]
    fn test_fix_script_embeds_timestamp() {
        let script = fix_system_data_script(OplogTimestamp::new(1700000000, 7));
        assert!(script.contains("oplogTruncateAfterPoint: Timestamp({ t: 1700000000, i: 7 })"));
        assert!(script.contains("replset.minvalid"));
        assert!(script.contains("system.sessions"));
    }

    #[test]
    fn test_with_app_name() {
        assert_eq!(
            with_app_name("mongodb://127.0.0.1:1/?directConnection=true", "ra").unwrap(),
            "mongodb://127.0.0.1:1/?directConnection=true&appName=ra"
        );
        assert_eq!(
            with_app_name("mongodb://h:1/", "ra").unwrap(),
            "mongodb://h:1/?appName=ra"
        );
        assert_eq!(
            with_app_name("mongodb://h:1/", "restore-agent@vm").unwrap(),
            "mongodb://h:1/?appName=restore-agent%40vm"
        );
    }

    #[test]
    fn test_invalid_uri_is_admin_error() {
        let err = with_app_name("not a uri", "ra").unwrap_err();
        assert!(matches!(err, AgentError::Admin(_)));
    }

    #[tokio::test]
    async fn test_connection_string_keeps_engine_authority() {
        let dir = TempDir::new().unwrap();
        let connector = connector(fake_shell(&dir, 0), CancellationToken::new());
        assert!(connector.app_name.contains('@'));

        connector
            .connect("mongodb://127.0.0.1:4242/?directConnection=true")
            .await
            .unwrap();

        let argv = recorded(&dir);
        let uri = argv.lines().next().unwrap();
        assert!(!uri.contains('@'), "unencoded @ in {uri}");

        let parsed = reqwest::Url::parse(uri).unwrap();
        assert_eq!(parsed.host_str(), Some("127.0.0.1"));
        assert_eq!(parsed.port(), Some(4242));
        assert_eq!(parsed.username(), "");
        assert!(parsed.password().is_none());
        assert!(parsed.query_pairs().any(|(k, v)| k == "directConnection" && v == "true"));

        let app_name = parsed
            .query_pairs()
            .find(|(k, _)| k == "appName")
            .map(|(_, v)| v.into_owned());
        assert_eq!(app_name, Some(connector.app_name.clone()));
    }

    #[tokio::test]
    async fn test_session_runs_scripts_against_uri() {
        let dir = TempDir::new().unwrap();
        let connector = connector(fake_shell(&dir, 0), CancellationToken::new());

        let session = connector.connect("mongodb://127.0.0.1:4242/").await.unwrap();
        session
            .fix_system_data_after_restore(OplogTimestamp::new(55, 1))
            .await
            .unwrap();
        session.shutdown().await.unwrap();

        let argv = recorded(&dir);
        assert!(argv.contains("mongodb://127.0.0.1:4242/?appName=restore-agent%40"));
        assert!(argv.contains("--eval"));
        assert!(argv.contains("ping: 1"));
        assert!(argv.contains("Timestamp({ t: 55, i: 1 })"));
        assert!(argv.contains("shutdownServer"));
    }

    #[tokio::test]
    async fn test_failing_shell_reports_stderr() {
        let dir = TempDir::new().unwrap();
        let connector = connector(fake_shell(&dir, 1), CancellationToken::new());

        let err = connector.connect("mongodb://127.0.0.1:4242/").await.err().unwrap();
        match err {
            AgentError::Admin(msg) => {
                assert!(msg.starts_with("ping exited with"));
                assert!(msg.contains("MongoServerError: boom"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_shutdown_still_runs_after_cancellation() {
        let dir = TempDir::new().unwrap();
        let cancel = CancellationToken::new();
        let service = ShellAdminService {
            shell: fake_shell(&dir, 0),
            uri: "mongodb://127.0.0.1:4242/".to_string(),
            timeout: Duration::from_secs(10),
            cancel: cancel.clone(),
        };
        cancel.cancel();

        let fix = service
            .fix_system_data_after_restore(OplogTimestamp::new(1, 1))
            .await
            .unwrap_err();
        assert!(fix.is_cancelled());

        service.shutdown().await.unwrap();
        assert!(recorded(&dir).contains("shutdownServer"));
    }
}
