//! Daemon runtime: poll-timer sync loop + collector timer + socket server.
//!
//! Four long-lived tasks share a broadcast shutdown channel: the poll
//! timer (runs a sync cycle every `poll_interval_secs` when the sync mode
//! is `auto`), the collector timer, the Unix-socket control server, and
//! log rotation. A ctrl-c handler feeds the same shutdown channel. Cycle
//! exclusivity lives in the orchestrator itself — a control request that
//! lands mid-cycle is answered with "already running", never queued.

use std::fs;
use std::io::ErrorKind;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, Mutex};

use patrol_core::ledger::{self, Ledger};
use patrol_core::settings::{self, SyncMode};
use patrol_core::types::ItemKey;
use patrol_git::{GhClient, GitWorkspaces, Host, Workspaces};
use patrol_sync::{
    run_gc, CycleOptions, CycleOutcome, Orchestrator, SettingsGenerator,
};

use crate::error::{io_err, DaemonError};
use crate::paths::{logs_dir, run_dir, socket_path};
use crate::protocol::{DaemonRequest, DaemonResponse};

/// Start the daemon runtime and block the current thread until it exits.
pub fn start_blocking(home: &Path) -> Result<(), DaemonError> {
    init_tracing();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(home.to_path_buf()))
}

/// Run the daemon runtime.
pub async fn run(home: PathBuf) -> Result<(), DaemonError> {
    ensure_runtime_dirs(&home)?;
    let started_at_unix = unix_seconds_now();

    let host: Arc<dyn Host> = Arc::new(GhClient::new());
    let workspaces: Arc<dyn Workspaces> = Arc::new(GitWorkspaces::new(&home));
    let ledger = Arc::new(Mutex::new(ledger::load_at(&home)));
    let orchestrator = Arc::new(Orchestrator::new(
        &home,
        host.clone(),
        workspaces.clone(),
        Arc::new(SettingsGenerator::new(&home)),
        ledger.clone(),
    ));

    let (shutdown_tx, _) = broadcast::channel::<()>(16);

    let poll_handle = {
        let shutdown = shutdown_tx.clone();
        let home = home.clone();
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move {
            let result = poll_task(home, orchestrator, shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let gc_handle = {
        let shutdown = shutdown_tx.clone();
        let home = home.clone();
        let host = host.clone();
        let workspaces = workspaces.clone();
        let ledger = ledger.clone();
        tokio::spawn(async move {
            let result = gc_task(home, host, workspaces, ledger, shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let socket_handle = {
        let shutdown = shutdown_tx.clone();
        let home = home.clone();
        let host = host.clone();
        let workspaces = workspaces.clone();
        let ledger = ledger.clone();
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move {
            let result = socket_server_task(
                home,
                orchestrator,
                host,
                workspaces,
                ledger,
                shutdown.clone(),
                shutdown.subscribe(),
                started_at_unix,
            )
            .await;
            let _ = shutdown.send(());
            result
        })
    };

    let rotation_handle = {
        let shutdown = shutdown_tx.clone();
        let home = home.clone();
        tokio::spawn(async move {
            let result = log_rotation_task(home, shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let signal_handle = {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            let mut shutdown_rx = shutdown.subscribe();
            tokio::select! {
                _ = shutdown_rx.recv() => Ok(()),
                signal = tokio::signal::ctrl_c() => {
                    match signal {
                        Ok(()) => {
                            tracing::info!("received ctrl-c, shutting down daemon");
                            let _ = shutdown.send(());
                            Ok(())
                        }
                        Err(err) => Err(DaemonError::Protocol(format!("ctrl-c handler failed: {err}"))),
                    }
                }
            }
        })
    };

    let (poll_result, gc_result, socket_result, rotation_result, signal_result) = tokio::join!(
        poll_handle,
        gc_handle,
        socket_handle,
        rotation_handle,
        signal_handle
    );

    handle_join("poll", poll_result)?;
    handle_join("collector", gc_result)?;
    handle_join("socket_server", socket_result)?;
    handle_join("log_rotation", rotation_result)?;
    handle_join("signal_handler", signal_result)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Timer tasks
// ---------------------------------------------------------------------------

async fn poll_task(
    home: PathBuf,
    orchestrator: Arc<Orchestrator>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    loop {
        // Settings are re-read every tick so cadence and mode changes
        // apply without a restart.
        let wait = Duration::from_secs(settings::load_at(&home).poll_interval_secs.max(15));
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = tokio::time::sleep(wait) => {
                if settings::load_at(&home).sync_mode != SyncMode::Auto {
                    continue;
                }
                match orchestrator.run_cycle(CycleOptions::default()).await {
                    Ok(CycleOutcome::Completed(report)) => {
                        tracing::info!(
                            processed = report.processed.len(),
                            unchanged = report.unchanged,
                            duration_ms = report.duration_ms as u64,
                            "scheduled sync cycle completed",
                        );
                    }
                    Ok(CycleOutcome::AlreadyRunning) => {
                        tracing::debug!("cycle still in flight; poll tick skipped");
                    }
                    Err(err) => {
                        tracing::error!(error = %err, "scheduled sync cycle failed");
                    }
                }
            }
        }
    }
    Ok(())
}

async fn gc_task(
    home: PathBuf,
    host: Arc<dyn Host>,
    workspaces: Arc<dyn Workspaces>,
    ledger: Arc<Mutex<Ledger>>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    loop {
        let settings = settings::load_at(&home);
        let wait = Duration::from_secs(settings.gc_interval_secs.max(60));
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = tokio::time::sleep(wait) => {
                let settings = settings::load_at(&home);
                run_gc(&home, host.as_ref(), workspaces.as_ref(), &ledger, &settings).await;
            }
        }
    }
    Ok(())
}

async fn log_rotation_task(
    home: PathBuf,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let mut interval = tokio::time::interval(Duration::from_secs(60));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    interval.tick().await; // consume the immediate first tick

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = interval.tick() => {
                let home = home.clone();
                tokio::task::spawn_blocking(move || {
                    crate::log_rotation::rotate_logs(&home);
                })
                .await
                .ok();
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Socket server
// ---------------------------------------------------------------------------

#[allow(clippy::too_many_arguments)]
async fn socket_server_task(
    home: PathBuf,
    orchestrator: Arc<Orchestrator>,
    host: Arc<dyn Host>,
    workspaces: Arc<dyn Workspaces>,
    ledger: Arc<Mutex<Ledger>>,
    shutdown_tx: broadcast::Sender<()>,
    mut shutdown_rx: broadcast::Receiver<()>,
    started_at_unix: u64,
) -> Result<(), DaemonError> {
    let socket = socket_path(&home);
    prepare_socket_for_bind(&socket)?;

    let listener = UnixListener::bind(&socket).map_err(|e| io_err(&socket, e))?;
    set_socket_permissions(&socket)?;

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            accepted = listener.accept() => {
                let (stream, _) = accepted.map_err(|e| io_err(&socket, e))?;
                let home = home.clone();
                let orchestrator = orchestrator.clone();
                let host = host.clone();
                let workspaces = workspaces.clone();
                let ledger = ledger.clone();
                let shutdown_tx = shutdown_tx.clone();
                tokio::spawn(async move {
                    let client = SocketClient {
                        home,
                        orchestrator,
                        host,
                        workspaces,
                        ledger,
                        shutdown_tx,
                        started_at_unix,
                    };
                    if let Err(err) = client.handle(stream).await {
                        tracing::error!(error = %err, "socket client error");
                    }
                });
            }
        }
    }

    if socket.exists() {
        let _ = fs::remove_file(&socket);
    }
    Ok(())
}

struct SocketClient {
    home: PathBuf,
    orchestrator: Arc<Orchestrator>,
    host: Arc<dyn Host>,
    workspaces: Arc<dyn Workspaces>,
    ledger: Arc<Mutex<Ledger>>,
    shutdown_tx: broadcast::Sender<()>,
    started_at_unix: u64,
}

impl SocketClient {
    async fn handle(&self, stream: UnixStream) -> Result<(), DaemonError> {
        let (reader, mut writer) = stream.into_split();
        let mut lines = BufReader::new(reader).lines();

        while let Some(line) = lines
            .next_line()
            .await
            .map_err(|e| io_err("daemon socket read", e))?
        {
            if line.trim().is_empty() {
                continue;
            }

            let request: DaemonRequest = match serde_json::from_str(&line) {
                Ok(request) => request,
                Err(err) => {
                    write_response(
                        &mut writer,
                        &DaemonResponse::error(format!("invalid request JSON: {err}")),
                    )
                    .await?;
                    continue;
                }
            };

            let cmd = request.cmd.clone();
            let response = self.dispatch(request).await;
            write_response(&mut writer, &response).await?;
            if cmd == "stop" {
                break;
            }
        }
        Ok(())
    }

    async fn dispatch(&self, request: DaemonRequest) -> DaemonResponse {
        match request.cmd.as_str() {
            "status" => DaemonResponse::ok(self.status_payload().await),
            "sync" => self.run_sync(request).await,
            "pending" => match self.orchestrator.pending().await {
                Ok(items) => DaemonResponse::ok(json!(items)),
                Err(err) => DaemonResponse::error(err.to_string()),
            },
            "gc" => {
                let settings = settings::load_at(&self.home);
                let report = run_gc(
                    &self.home,
                    self.host.as_ref(),
                    self.workspaces.as_ref(),
                    &self.ledger,
                    &settings,
                )
                .await;
                DaemonResponse::ok(json!(report))
            }
            "stop" => {
                let _ = self.shutdown_tx.send(());
                DaemonResponse::ok(json!({ "stopping": true }))
            }
            other => DaemonResponse::error(format!("unknown command '{other}'")),
        }
    }

    async fn run_sync(&self, request: DaemonRequest) -> DaemonResponse {
        let selected = match request.items.as_deref().map(parse_items) {
            Some(Ok(keys)) => Some(keys),
            Some(Err(message)) => return DaemonResponse::error(message),
            None => None,
        };
        let opts = CycleOptions {
            selected,
            force: request.force.unwrap_or(false),
            instructions: request.instructions,
        };
        match self.orchestrator.run_cycle(opts).await {
            Ok(CycleOutcome::Completed(report)) => {
                DaemonResponse::ok(json!({ "status": "completed", "report": report }))
            }
            // Expected condition, not an error: the caller is told a
            // cycle is already in flight and nothing was queued.
            Ok(CycleOutcome::AlreadyRunning) => {
                DaemonResponse::ok(json!({ "status": "already-running" }))
            }
            Err(err) => DaemonResponse::error(err.to_string()),
        }
    }

    async fn status_payload(&self) -> Value {
        let settings = settings::load_at(&self.home);
        let tracked_items = {
            let ledger = self.ledger.lock().await;
            ledger.len()
        };
        json!({
            "running": true,
            "syncing": self.orchestrator.is_syncing(),
            "label": crate::paths::DAEMON_LABEL,
            "started_at_unix": self.started_at_unix,
            "sync_mode": settings.sync_mode,
            "poll_interval_secs": settings.poll_interval_secs,
            "tracked_items": tracked_items,
            "socket": socket_path(&self.home).display().to_string(),
        })
    }
}

/// Parse `owner/name#number` selections; the whole request is rejected on
/// the first malformed item.
fn parse_items(items: &[String]) -> Result<Vec<ItemKey>, String> {
    items
        .iter()
        .map(|raw| ItemKey::parse(raw).map_err(|err| err.to_string()))
        .collect()
}

// ---------------------------------------------------------------------------
// Plumbing
// ---------------------------------------------------------------------------

fn ensure_runtime_dirs(home: &Path) -> Result<(), DaemonError> {
    for dir in [
        patrol_core::paths::patrol_root(home),
        run_dir(home),
        logs_dir(home),
    ] {
        if !dir.exists() {
            fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
        }
    }
    Ok(())
}

fn prepare_socket_for_bind(socket: &Path) -> Result<(), DaemonError> {
    if !socket.exists() {
        return Ok(());
    }

    match StdUnixStream::connect(socket) {
        Ok(_) => {
            return Err(DaemonError::Protocol(format!(
                "daemon socket already in use: {}",
                socket.display()
            )));
        }
        Err(err) => {
            tracing::warn!(
                socket = %socket.display(),
                error = %err,
                "removing stale daemon socket before bind",
            );
        }
    }

    match fs::remove_file(socket) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_err(socket, err)),
    }
}

async fn write_response(
    writer: &mut OwnedWriteHalf,
    response: &DaemonResponse,
) -> Result<(), DaemonError> {
    let payload = serde_json::to_string(response)?;
    writer
        .write_all(payload.as_bytes())
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .write_all(b"\n")
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .flush()
        .await
        .map_err(|e| io_err("daemon socket flush", e))?;
    Ok(())
}

fn handle_join(
    task: &str,
    result: Result<Result<(), DaemonError>, tokio::task::JoinError>,
) -> Result<(), DaemonError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(DaemonError::Protocol(format!(
            "{task} task join failure: {err}"
        ))),
    }
}

fn unix_seconds_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[cfg(unix)]
fn set_socket_permissions(path: &Path) -> Result<(), DaemonError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|e| io_err(path, e))
}

#[cfg(not(unix))]
fn set_socket_permissions(_path: &Path) -> Result<(), DaemonError> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::{broadcast, mpsc};

    #[test]
    fn parse_items_accepts_canonical_keys() {
        let items = vec![
            "acme/widgets#42".to_string(),
            "beta/tools#7".to_string(),
        ];
        let keys = parse_items(&items).unwrap();
        assert_eq!(keys.len(), 2);
        assert_eq!(keys[0].to_string(), "acme/widgets#42");
    }

    #[test]
    fn parse_items_rejects_whole_batch_on_bad_key() {
        let items = vec!["acme/widgets#42".to_string(), "nonsense".to_string()];
        assert!(parse_items(&items).is_err());
    }

    #[tokio::test]
    async fn protocol_status_and_stop_over_in_memory_channels() {
        let (request_tx, mut request_rx) = mpsc::channel::<Vec<u8>>(8);
        let (response_tx, mut response_rx) = mpsc::channel::<Vec<u8>>(8);
        let (shutdown_tx, mut shutdown_rx) = broadcast::channel::<()>(1);

        tokio::spawn(async move {
            while let Some(bytes) = request_rx.recv().await {
                let line = String::from_utf8(bytes).expect("utf8");
                let request: DaemonRequest = serde_json::from_str(line.trim()).expect("request");
                let response = match request.cmd.as_str() {
                    "status" => DaemonResponse::ok(json!({ "running": true })),
                    "stop" => {
                        let _ = shutdown_tx.send(());
                        DaemonResponse::ok(json!({ "stopping": true }))
                    }
                    other => DaemonResponse::error(format!("unknown command '{other}'")),
                };
                let encoded = serde_json::to_vec(&response).expect("encode response");
                if response_tx.send(encoded).await.is_err() {
                    break;
                }
            }
        });

        request_tx
            .send(br#"{"cmd":"status"}"#.to_vec())
            .await
            .expect("send status request");
        let status: serde_json::Value =
            serde_json::from_slice(&response_rx.recv().await.expect("status response"))
                .expect("decode status");
        assert_eq!(status["ok"], serde_json::Value::Bool(true));

        request_tx
            .send(br#"{"cmd":"stop"}"#.to_vec())
            .await
            .expect("send stop request");
        let stop: serde_json::Value =
            serde_json::from_slice(&response_rx.recv().await.expect("stop response"))
                .expect("decode stop");
        assert_eq!(stop["ok"], serde_json::Value::Bool(true));

        shutdown_rx.recv().await.expect("shutdown signal");
    }
}
