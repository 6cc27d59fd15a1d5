use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use parking_lot::Mutex;
use ptt_contracts::handshake::{HandshakeLine, MAGIC_COOKIE_KEY, MAGIC_COOKIE_VALUE};
use serde::Deserialize;
use serde_json::{Map, Value};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader, Lines};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tracing::{debug, error, info, trace, warn};

use super::PluginError;

/// A spawned plugin executable.
///
/// The child is spawned with `kill_on_drop`, so dropping the last handle
/// terminates it even when [`PluginProcess::terminate`] never ran.
#[derive(Debug)]
pub struct PluginProcess {
    file: String,
    pid: Option<u32>,
    child: Mutex<Option<Child>>,
}

impl PluginProcess {
    /// Spawns `path` and waits up to `handshake_timeout` for its handshake
    /// line. The child is killed on any failure.
    pub async fn launch(
        path: &Path,
        handshake_timeout: Duration,
    ) -> Result<(Self, HandshakeLine), PluginError> {
        Self::launch_command(file_label(path), Command::new(path), handshake_timeout)
            .await
    }

    pub(crate) async fn launch_command(
        file: String,
        mut command: Command,
        handshake_timeout: Duration,
    ) -> Result<(Self, HandshakeLine), PluginError> {
        command
            .env(MAGIC_COOKIE_KEY, MAGIC_COOKIE_VALUE)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|source| PluginError::Spawn {
            file: file.clone(),
            source,
        })?;
        let pid = child.id();
        debug!(plugin = %file, pid, "plugin process spawned");

        let stdout = child.stdout.take();
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_stderr(file.clone(), stderr));
        }
        let process = Self {
            file,
            pid,
            child: Mutex::new(Some(child)),
        };

        let handshake = match stdout {
            Some(stdout) => read_handshake(&process.file, stdout, handshake_timeout).await,
            None => Err(PluginError::HandshakeClosed(process.file.clone())),
        };
        match handshake {
            Ok(line) => Ok((process, line)),
            Err(err) => {
                process.kill().await;
                Err(err)
            }
        }
    }

    pub fn file(&self) -> &str {
        &self.file
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Whether the child is still running and has not been reaped.
    pub fn is_running(&self) -> bool {
        self.child
            .lock()
            .as_mut()
            .is_some_and(|child| matches!(child.try_wait(), Ok(None)))
    }

    /// Kills the child right away.
    pub async fn kill(&self) {
        self.terminate(Duration::ZERO).await;
    }

    /// Gives the child `grace` to exit by itself, then kills it.
    ///
    /// Safe to call more than once and on a child that already died.
    pub async fn terminate(&self, grace: Duration) {
        let child = self.child.lock().take();
        let Some(mut child) = child else {
            return;
        };

        match tokio::time::timeout(grace, child.wait()).await {
            Ok(Ok(status)) => {
                debug!(plugin = %self.file, %status, "plugin exited");
                return;
            }
            Ok(Err(err)) => {
                warn!(plugin = %self.file, error = %err, "failed to poll plugin process")
            }
            Err(_) => {}
        }

        match child.kill().await {
            Ok(()) => info!(plugin = %self.file, pid = self.pid, "plugin terminated"),
            Err(err) => {
                warn!(plugin = %self.file, error = %err, "failed to terminate plugin")
            }
        }
    }
}

pub(crate) fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

async fn read_handshake(
    file: &str,
    stdout: ChildStdout,
    timeout: Duration,
) -> Result<HandshakeLine, PluginError> {
    let mut lines = BufReader::new(stdout).lines();
    let line = match tokio::time::timeout(timeout, lines.next_line()).await {
        Err(_) => {
            return Err(PluginError::HandshakeTimeout {
                file: file.to_string(),
                timeout,
            });
        }
        Ok(Err(err)) => return Err(PluginError::Io(err)),
        Ok(Ok(None)) => return Err(PluginError::HandshakeClosed(file.to_string())),
        Ok(Ok(Some(line))) => line,
    };

    let contract = |source| PluginError::Contract {
        file: file.to_string(),
        source,
    };
    let handshake: HandshakeLine = line.parse().map_err(contract)?;
    handshake.verify().map_err(contract)?;
    debug!(plugin = %file, socket = %handshake.socket.display(), "handshake accepted");

    tokio::spawn(forward_stdout(file.to_string(), lines));
    Ok(handshake)
}

async fn forward_stdout<R>(file: String, mut lines: Lines<BufReader<R>>)
where
    R: AsyncRead + Unpin,
{
    while let Ok(Some(line)) = lines.next_line().await {
        debug!(target: "ptt::plugin", plugin = %file, stream = "stdout", "{line}");
    }
}

async fn forward_stderr(file: String, stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        relay_log_line(&file, &line);
    }
    trace!(plugin = %file, "plugin stderr closed");
}

/// One line of the JSON format plugins log in.
#[derive(Debug, Deserialize)]
struct PluginLogLine {
    level: String,
    #[serde(default)]
    target: String,
    #[serde(default)]
    fields: Map<String, Value>,
}

/// Re-emits a plugin log line under the host subscriber, at the level the
/// plugin recorded it. Lines that are not JSON are logged at debug.
fn relay_log_line(file: &str, line: &str) {
    let Ok(mut record) = serde_json::from_str::<PluginLogLine>(line) else {
        debug!(target: "ptt::plugin", plugin = %file, "{line}");
        return;
    };
    let message = match record.fields.remove("message") {
        Some(Value::String(message)) => message,
        Some(other) => other.to_string(),
        None => String::new(),
    };
    let fields = Value::Object(record.fields);
    let origin = record.target;

    match record.level.as_str() {
        "ERROR" => error!(target: "ptt::plugin", plugin = %file, %origin, %fields, "{message}"),
        "WARN" => warn!(target: "ptt::plugin", plugin = %file, %origin, %fields, "{message}"),
        "INFO" => info!(target: "ptt::plugin", plugin = %file, %origin, %fields, "{message}"),
        "DEBUG" => debug!(target: "ptt::plugin", plugin = %file, %origin, %fields, "{message}"),
        _ => trace!(target: "ptt::plugin", plugin = %file, %origin, %fields, "{message}"),
    }
}

#[cfg(test)]
mod tests {
    use ptt_contracts::ContractError;

    use super::*;

    fn shell(script: &str) -> Command {
        let mut command = Command::new("/bin/sh");
        command.arg("-c").arg(script);
        command
    }

    #[tokio::test]
    async fn valid_handshake_line_is_returned() {
        let (process, line) = PluginProcess::launch_command(
            "ok.plugin".into(),
            shell("echo \"1|1|unix|/tmp/ptt-test.sock|json\"; sleep 30"),
            Duration::from_secs(5),
        )
        .await
        .unwrap();

        assert_eq!(line.socket, Path::new("/tmp/ptt-test.sock"));
        assert!(process.is_running());
        process.kill().await;
        assert!(!process.is_running());
        // Second termination is a no-op.
        process.kill().await;
    }

    #[tokio::test]
    async fn version_mismatch_fails_the_launch() {
        let err = PluginProcess::launch_command(
            "old.plugin".into(),
            shell("echo \"1|7|unix|/tmp/ptt-test.sock|json\"; sleep 30"),
            Duration::from_secs(5),
        )
        .await
        .unwrap_err();

        assert!(matches!(
            err,
            PluginError::Contract {
                source: ContractError::VersionMismatch { found: 7, .. },
                ..
            }
        ));
    }

    #[tokio::test]
    async fn silent_plugin_times_out() {
        let err = PluginProcess::launch_command(
            "mute.plugin".into(),
            shell("sleep 30"),
            Duration::from_millis(200),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, PluginError::HandshakeTimeout { .. }));
    }

    #[tokio::test]
    async fn early_exit_is_reported() {
        let err = PluginProcess::launch_command(
            "crash.plugin".into(),
            shell("echo boom >&2; exit 3"),
            Duration::from_secs(5),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, PluginError::HandshakeClosed(_)));
    }

    #[tokio::test]
    async fn missing_executable_is_a_spawn_error() {
        let err = PluginProcess::launch(
            Path::new("/nonexistent/ghost.plugin"),
            Duration::from_secs(1),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, PluginError::Spawn { .. }));
    }

    #[test]
    fn plugin_json_log_lines_parse() {
        let record: PluginLogLine = serde_json::from_str(
            r#"{"timestamp":"t","level":"WARN","fields":{"message":"hi","n":1},"target":"demo"}"#,
        )
        .unwrap();
        assert_eq!(record.level, "WARN");
        assert_eq!(record.target, "demo");
        assert_eq!(record.fields.get("n"), Some(&Value::from(1)));

        assert!(serde_json::from_str::<PluginLogLine>("plain text").is_err());
    }
}
