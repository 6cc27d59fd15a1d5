//! Entry point for plugin binaries.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use rand::Rng;
use rand::distr::Alphanumeric;
use tokio::net::UnixListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use crate::error::ContractError;
use crate::handshake::{HandshakeLine, MAGIC_COOKIE_KEY, check_magic_cookie};
use crate::module::{Module, ModuleCall, ModuleReply, ModuleService};
use crate::rpc::serve_connection;

/// Logs JSON lines to stderr, where the host picks them up and re-emits them
/// under its own subscriber.
pub fn init_plugin_tracing() {
    let _ = tracing_subscriber::fmt()
        .json()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .with_current_span(false)
        .try_init();
}

/// Serves `module` to the host that launched this process.
///
/// Verifies the magic cookie, binds a private Unix socket, announces it with
/// the handshake line on stdout, then serves the host's single connection
/// until it hangs up.
pub async fn serve_plugin<M: Module>(module: M) -> Result<(), ContractError> {
    if let Err(err) = check_magic_cookie() {
        eprintln!(
            "{err}\n(expected environment variable {MAGIC_COOKIE_KEY} to be set by the host)"
        );
        return Err(err);
    }

    let socket = socket_path();
    let listener = UnixListener::bind(&socket)?;
    let _cleanup = SocketCleanup(socket.clone());

    {
        let mut stdout = std::io::stdout().lock();
        writeln!(stdout, "{}", HandshakeLine::new(&socket))?;
        stdout.flush()?;
    }
    debug!(socket = %socket.display(), "waiting for host connection");

    let (stream, _) = listener.accept().await?;
    drop(listener);
    info!("host connected");

    let service = Arc::new(ModuleService::new(Arc::new(module)));
    serve_connection::<_, ModuleCall, ModuleReply, _>(
        stream,
        service,
        CancellationToken::new(),
    )
    .await?;
    info!("host disconnected; exiting");
    Ok(())
}

fn socket_path() -> PathBuf {
    let suffix: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(12)
        .map(char::from)
        .collect();
    std::env::temp_dir().join(format!("ptt-plugin-{suffix}.sock"))
}

struct SocketCleanup(PathBuf);

impl Drop for SocketCleanup {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.0);
    }
}
