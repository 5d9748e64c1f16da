use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use notify::{recommended_watcher, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc, oneshot, RwLock};
use tokio::time::Instant;

use rudi_core::config::{self, Config, NodeConfig};
use rudi_core::store::{FileStore, Store};
use rudi_core::types::MetadataId;
use rudi_portal::{DispatchOutcome, PortalError, SyncEngine, WaitingEntry};

use crate::callback;
use crate::error::{io_err, DaemonError};
use crate::paths::{run_dir, socket_path, watched_dir, DEBOUNCE_WINDOW};
use crate::protocol::{DaemonRequest, DaemonResponse, ResponseError};

/// Counters reported by `status`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SendStats {
    pub created: u64,
    pub updated: u64,
    pub already_current: u64,
    pub skipped: u64,
    pub failed: u64,
    pub purged: u64,
    pub last_send_at: Option<DateTime<Utc>>,
}

impl SendStats {
    fn record(&mut self, result: &Result<DispatchOutcome, PortalError>, now: DateTime<Utc>) {
        match result {
            Ok(DispatchOutcome::Created { .. }) => self.created += 1,
            Ok(DispatchOutcome::Updated { .. }) => self.updated += 1,
            Ok(DispatchOutcome::AlreadyCurrent) => self.already_current += 1,
            Ok(DispatchOutcome::Skipped { .. }) => {
                self.skipped += 1;
                return;
            }
            Err(_) => self.failed += 1,
        }
        self.last_send_at = Some(now);
    }
}

struct SendJob {
    metadata_id: MetadataId,
    source: &'static str,
    respond_to: oneshot::Sender<Result<SendSummary, ResponseError>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SendSummary {
    pub metadata_id: MetadataId,
    pub source: String,
    pub outcome: DispatchOutcome,
    pub duration_ms: u128,
}

/// State shared by the socket handlers.
#[derive(Clone)]
struct Shared {
    home: PathBuf,
    node: NodeConfig,
    engine: Arc<SyncEngine>,
    stats: Arc<RwLock<SendStats>>,
    started_at: DateTime<Utc>,
}

/// Load the node configuration, start the runtime and block the current
/// thread until it exits.
pub fn start_blocking(home: &Path) -> Result<(), DaemonError> {
    init_tracing();
    let config = config::load_at(home)?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(home.to_path_buf(), config))
}

/// Run the daemon against the document store under `home` and the real Portal.
pub async fn run(home: PathBuf, config: Config) -> Result<(), DaemonError> {
    if config.portal.is_connection_disabled() {
        tracing::warn!("no portal_url configured, records will not be sent");
    }
    let store: Arc<dyn Store> = Arc::new(FileStore::new(&home));
    let engine = Arc::new(SyncEngine::with_http(config.portal, store));
    run_with_engine(home, config.node, engine).await
}

/// Run the daemon tasks around an already wired engine.
pub async fn run_with_engine(
    home: PathBuf,
    node: NodeConfig,
    engine: Arc<SyncEngine>,
) -> Result<(), DaemonError> {
    ensure_runtime_dirs(&home)?;

    let listener = callback::bind(&node.callback_addr).await?;
    let shared = Shared {
        home: home.clone(),
        node,
        engine: engine.clone(),
        stats: Arc::new(RwLock::new(SendStats::default())),
        started_at: Utc::now(),
    };

    let (send_tx, send_rx) = mpsc::channel::<SendJob>(64);
    let (shutdown_tx, _) = broadcast::channel::<()>(16);

    let watcher_handle = {
        let shutdown = shutdown_tx.clone();
        let home = home.clone();
        let engine = engine.clone();
        let send_tx = send_tx.clone();
        tokio::spawn(async move {
            let result = watcher_task(home, engine, send_tx, shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let processor_handle = {
        let shutdown = shutdown_tx.clone();
        let engine = engine.clone();
        let stats = shared.stats.clone();
        tokio::spawn(async move {
            let result = send_processor_task(engine, stats, send_rx, shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let sweep_handle = {
        let shutdown = shutdown_tx.clone();
        let shared = shared.clone();
        tokio::spawn(async move {
            let result = sweep_task(shared, shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let socket_handle = {
        let shutdown = shutdown_tx.clone();
        let shared = shared.clone();
        let send_tx = send_tx.clone();
        tokio::spawn(async move {
            let result =
                socket_server_task(shared, send_tx, shutdown.clone(), shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let callback_handle = {
        let shutdown = shutdown_tx.clone();
        let engine = engine.clone();
        tokio::spawn(async move {
            let result = callback::serve(listener, engine, shutdown.subscribe()).await;
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

    // Only the spawned tasks hold senders from here on.
    drop(send_tx);

    let (watcher_result, processor_result, sweep_result, socket_result, callback_result, signal_result) =
        tokio::join!(
            watcher_handle,
            processor_handle,
            sweep_handle,
            socket_handle,
            callback_handle,
            signal_handle
        );

    handle_join("watcher", watcher_result)?;
    handle_join("send_processor", processor_result)?;
    handle_join("waiting_room_sweep", sweep_result)?;
    handle_join("socket_server", socket_result)?;
    handle_join("report_callback", callback_result)?;
    handle_join("signal_handler", signal_result)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Watcher
// ---------------------------------------------------------------------------

async fn watcher_task(
    home: PathBuf,
    engine: Arc<SyncEngine>,
    send_tx: mpsc::Sender<SendJob>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let dir = watched_dir(&home);
    if !dir.exists() {
        fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
    }
    // Event paths arrive canonicalized on some platforms.
    let dir = fs::canonicalize(&dir).unwrap_or(dir);

    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<notify::Result<Event>>();
    let mut watcher: RecommendedWatcher = recommended_watcher(move |event| {
        let _ = event_tx.send(event);
    })?;
    watcher.watch(&dir, RecursiveMode::NonRecursive)?;
    tracing::info!(path = %dir.display(), "watching metadata directory");

    let mut debounce = HashMap::<PathBuf, Instant>::new();

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            event = event_rx.recv() => {
                let Some(event) = event else { break };
                let event = match event {
                    Ok(event) => event,
                    Err(err) => {
                        tracing::warn!(error = %err, "watcher event error");
                        continue;
                    }
                };
                if !is_relevant_event_kind(&event.kind) {
                    continue;
                }

                for path in event.paths {
                    let Some(metadata_id) = metadata_id_for_path(&path, &dir) else {
                        continue;
                    };
                    if !should_process_event(&mut debounce, &path, Instant::now()) {
                        continue;
                    }
                    if !has_undispatched_edit(&engine, &metadata_id).await {
                        continue;
                    }

                    match enqueue_send(&send_tx, metadata_id, "watcher").await {
                        Ok(summary) => {
                            tracing::info!(
                                metadata_id = %summary.metadata_id,
                                outcome = ?summary.outcome,
                                duration_ms = summary.duration_ms,
                                "watcher-triggered send completed",
                            );
                        }
                        Err(err) => {
                            tracing::error!(metadata_id = %metadata_id, error = %err, "watcher-triggered send failed");
                        }
                    }
                }
            }
        }
    }

    Ok(())
}

/// Whether the stored record carries an `updatedAt` the engine has not yet
/// brought to the Portal. The engine's own writes (send stamp, report
/// outcome) keep `updatedAt` and are not local edits.
async fn has_undispatched_edit(engine: &SyncEngine, metadata_id: &MetadataId) -> bool {
    let updated_at = match engine.store().get_metadata_by_id(metadata_id).await {
        Ok(Some(metadata)) => metadata.updated_at,
        Ok(None) => return false,
        Err(err) => {
            tracing::warn!(%metadata_id, error = %err, "changed record could not be read");
            return false;
        }
    };
    match engine.last_dispatched(metadata_id) {
        Some(sent) if updated_at <= sent => {
            tracing::debug!(%metadata_id, %updated_at, "record unchanged since last dispatch");
            false
        }
        _ => true,
    }
}

fn is_relevant_event_kind(kind: &EventKind) -> bool {
    matches!(kind, EventKind::Create(_) | EventKind::Modify(_))
}

/// `<dir>/<global_id>.json` → `global_id`. Temp files and stray names
/// yield `None`.
fn metadata_id_for_path(path: &Path, dir: &Path) -> Option<MetadataId> {
    if path.parent() != Some(dir) {
        return None;
    }
    let is_json = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    if !is_json {
        return None;
    }
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .and_then(|stem| stem.parse().ok())
}

fn should_process_event(
    debounce: &mut HashMap<PathBuf, Instant>,
    path: &Path,
    now: Instant,
) -> bool {
    should_process_event_with_threshold(debounce, path, now, DEBOUNCE_WINDOW)
}

fn should_process_event_with_threshold(
    debounce: &mut HashMap<PathBuf, Instant>,
    path: &Path,
    now: Instant,
    threshold: Duration,
) -> bool {
    debounce.retain(|_, seen_at| now.duration_since(*seen_at) <= Duration::from_secs(30));
    match debounce.get(path) {
        Some(last_seen) if now.duration_since(*last_seen) < threshold => false,
        _ => {
            debounce.insert(path.to_path_buf(), now);
            true
        }
    }
}

// ---------------------------------------------------------------------------
// Send processor
// ---------------------------------------------------------------------------

async fn send_processor_task(
    engine: Arc<SyncEngine>,
    stats: Arc<RwLock<SendStats>>,
    mut send_rx: mpsc::Receiver<SendJob>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            maybe_job = send_rx.recv() => {
                let Some(job) = maybe_job else { break };
                let started = Instant::now();

                let result = engine.send_metadata_to_portal(&job.metadata_id).await;
                stats.write().await.record(&result, Utc::now());

                let outcome = match result {
                    Ok(outcome) => Ok(SendSummary {
                        metadata_id: job.metadata_id,
                        source: job.source.to_string(),
                        outcome,
                        duration_ms: started.elapsed().as_millis(),
                    }),
                    Err(err) => Err(ResponseError::from(err.payload("send"))),
                };
                let _ = job.respond_to.send(outcome);
            }
        }
    }

    Ok(())
}

async fn enqueue_send(
    send_tx: &mpsc::Sender<SendJob>,
    metadata_id: MetadataId,
    source: &'static str,
) -> Result<SendSummary, DaemonError> {
    let (tx, rx) = oneshot::channel();
    send_tx
        .send(SendJob {
            metadata_id,
            source,
            respond_to: tx,
        })
        .await
        .map_err(|_| DaemonError::ChannelClosed("send queue"))?;

    let outcome = rx
        .await
        .map_err(|_| DaemonError::ChannelClosed("send response"))?;
    outcome.map_err(DaemonError::Remote)
}

// ---------------------------------------------------------------------------
// Waiting-room sweep
// ---------------------------------------------------------------------------

async fn sweep_task(
    shared: Shared,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let mut interval = tokio::time::interval(shared.node.sweep_interval());
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    interval.tick().await; // first tick fires immediately

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = interval.tick() => {
                sweep_waiting_room(&shared).await;
            }
        }
    }
    Ok(())
}

async fn sweep_waiting_room(shared: &Shared) -> Vec<WaitingEntry> {
    let purged = shared.engine.waiting_room().purge_expired(Utc::now());
    for entry in &purged {
        tracing::warn!(
            metadata_id = %entry.metadata_id,
            wait_since = %entry.wait_since,
            report_id = ?entry.report_id,
            "no integration report before timeout, record may be sent again",
        );
    }
    if !purged.is_empty() {
        shared.stats.write().await.purged += purged.len() as u64;
    }
    purged
}

// ---------------------------------------------------------------------------
// Control socket
// ---------------------------------------------------------------------------

async fn socket_server_task(
    shared: Shared,
    send_tx: mpsc::Sender<SendJob>,
    shutdown_tx: broadcast::Sender<()>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let socket = socket_path(&shared.home);
    prepare_socket_for_bind(&socket)?;

    let listener = UnixListener::bind(&socket).map_err(|e| io_err(&socket, e))?;
    set_socket_permissions(&socket)?;

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            accepted = listener.accept() => {
                let (stream, _) = accepted.map_err(|e| io_err(&socket, e))?;
                let shared = shared.clone();
                let send_tx = send_tx.clone();
                let shutdown_tx = shutdown_tx.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_socket_client(stream, shared, send_tx, shutdown_tx).await {
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

async fn handle_socket_client(
    stream: UnixStream,
    shared: Shared,
    send_tx: mpsc::Sender<SendJob>,
    shutdown_tx: broadcast::Sender<()>,
) -> Result<(), DaemonError> {
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
                let error = ResponseError::new("invalid_request", format!("invalid request JSON: {err}"), "daemon");
                write_response(&mut writer, &DaemonResponse::error(error)).await?;
                continue;
            }
        };

        let response = match request.cmd.as_str() {
            "status" => DaemonResponse::ok(build_status_payload(&shared).await),
            "send" => handle_send(&send_tx, request.id.as_deref()).await,
            "purge" => {
                let purged = sweep_waiting_room(&shared).await;
                DaemonResponse::ok(json!({ "purged": purged }))
            }
            "stop" => {
                let _ = shutdown_tx.send(());
                DaemonResponse::ok(json!({ "stopping": true }))
            }
            other => DaemonResponse::error(ResponseError::new(
                "invalid_request",
                format!("unknown command '{other}'"),
                "daemon",
            )),
        };

        write_response(&mut writer, &response).await?;
        if request.cmd == "stop" {
            break;
        }
    }

    Ok(())
}

async fn handle_send(send_tx: &mpsc::Sender<SendJob>, id: Option<&str>) -> DaemonResponse {
    let Some(id) = id else {
        return DaemonResponse::error(ResponseError::new("invalid_request", "send needs an id", "send"));
    };
    let metadata_id: MetadataId = match id.parse() {
        Ok(metadata_id) => metadata_id,
        Err(err) => {
            return DaemonResponse::error(ResponseError::new(
                "invalid_request",
                format!("bad metadata id '{id}': {err}"),
                "send",
            ))
        }
    };
    match enqueue_send(send_tx, metadata_id, "socket").await {
        Ok(summary) => DaemonResponse::ok(json!(summary)),
        Err(DaemonError::Remote(error)) => DaemonResponse::error(error),
        Err(err) => DaemonResponse::error(ResponseError::new("daemon", err.to_string(), "send")),
    }
}

async fn build_status_payload(shared: &Shared) -> Value {
    let stats = shared.stats.read().await.clone();
    let waiting = shared.engine.waiting_room().snapshot(Utc::now());

    json!({
        "running": true,
        "started_at": shared.started_at,
        "portal_enabled": !shared.engine.config().is_connection_disabled(),
        "waiting_room": waiting,
        "counters": stats,
        "socket": socket_path(&shared.home).display().to_string(),
        "metadata_dir": watched_dir(&shared.home).display().to_string(),
        "callback_addr": shared.node.callback_addr,
    })
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

fn ensure_runtime_dirs(home: &Path) -> Result<(), DaemonError> {
    for dir in [watched_dir(home), run_dir(home)] {
        if !dir.exists() {
            fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
        }
    }
    Ok(())
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

pub fn init_tracing() {
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

#[cfg(test)]
mod tests {
    use super::*;

    use rudi_core::config::PortalConfig;
    use rudi_core::store::MemoryStore;
    use rudi_core::types::{Media, MediaStatus, Metadata};
    use rudi_portal::SkipReason;
    use tempfile::TempDir;
    use tokio::time::advance;

    fn shared(home: &Path, config: PortalConfig) -> (Shared, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let engine = Arc::new(SyncEngine::with_http(config, store.clone()));
        let shared = Shared {
            home: home.to_path_buf(),
            node: NodeConfig::default(),
            engine,
            stats: Arc::new(RwLock::new(SendStats::default())),
            started_at: Utc::now(),
        };
        (shared, store)
    }

    #[tokio::test(start_paused = true, flavor = "current_thread")]
    async fn debounce_coalesces_rapid_events() {
        let threshold = Duration::from_millis(100);
        let mut debounce = HashMap::<PathBuf, Instant>::new();
        let path = PathBuf::from("/tmp/metadata/record.json");
        let mut sends = 0usize;

        for _ in 0..5 {
            if should_process_event_with_threshold(&mut debounce, &path, Instant::now(), threshold) {
                sends += 1;
            }
            advance(Duration::from_millis(10)).await;
        }
        assert_eq!(sends, 1, "rapid saves should collapse to one send");

        advance(Duration::from_millis(150)).await;
        assert!(should_process_event_with_threshold(
            &mut debounce,
            &path,
            Instant::now(),
            threshold
        ));
    }

    #[test]
    fn only_metadata_documents_map_to_ids() {
        let dir = PathBuf::from("/home/node/.rudi/metadata");
        let id = MetadataId::new_v4();

        assert_eq!(metadata_id_for_path(&dir.join(format!("{id}.json")), &dir), Some(id));
        assert_eq!(metadata_id_for_path(&dir.join(format!("{id}.json.tmp")), &dir), None);
        assert_eq!(metadata_id_for_path(&dir.join("notes.json"), &dir), None);
        assert_eq!(
            metadata_id_for_path(&dir.join("nested").join(format!("{id}.json")), &dir),
            None
        );
    }

    #[test]
    fn stats_count_outcomes_and_stamp_attempts() {
        let now = Utc::now();
        let mut stats = SendStats::default();

        stats.record(&Ok(DispatchOutcome::Skipped { reason: SkipReason::MediaPending }), now);
        assert_eq!(stats.skipped, 1);
        assert!(stats.last_send_at.is_none(), "skips are not send attempts");

        stats.record(&Ok(DispatchOutcome::Created { report_id: None }), now);
        stats.record(&Err(PortalError::InvalidReport("x".into())), now);
        assert_eq!(stats.created, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.last_send_at, Some(now));
    }

    #[tokio::test]
    async fn status_payload_lists_waiting_entries_and_counters() {
        let home = TempDir::new().expect("home");
        let (shared, _) = shared(home.path(), PortalConfig::default());
        let id = MetadataId::new_v4();
        shared.engine.waiting_room().admit(id, Utc::now(), Utc::now());
        shared.stats.write().await.created = 2;

        let payload = build_status_payload(&shared).await;

        assert_eq!(payload["running"], json!(true));
        assert_eq!(payload["portal_enabled"], json!(false));
        assert_eq!(payload["counters"]["created"], json!(2));
        let waiting = payload["waiting_room"].as_array().expect("waiting room array");
        assert_eq!(waiting.len(), 1);
        assert_eq!(waiting[0]["metadata_id"], json!(id.to_string()));
    }

    #[tokio::test]
    async fn processor_runs_jobs_and_answers_each() {
        let home = TempDir::new().expect("home");
        let config = PortalConfig {
            portal_url: Some("http://127.0.0.1:9/api".into()),
            ..PortalConfig::default()
        };
        let (shared, store) = shared(home.path(), config);
        let mut meta = Metadata::new(MetadataId::new_v4(), "Traffic", Utc::now());
        meta.media.push(Media {
            media_id: MetadataId::new_v4().0,
            media_name: None,
            file_storage_status: MediaStatus::Missing,
            file_status_update: None,
            extra: Default::default(),
        });
        store.save_metadata(&meta).await.expect("save");

        let (send_tx, send_rx) = mpsc::channel(4);
        let (shutdown_tx, _) = broadcast::channel(1);
        let processor = tokio::spawn(send_processor_task(
            shared.engine.clone(),
            shared.stats.clone(),
            send_rx,
            shutdown_tx.subscribe(),
        ));

        let summary = enqueue_send(&send_tx, meta.global_id, "test").await.expect("summary");
        assert_eq!(
            summary.outcome,
            DispatchOutcome::Skipped { reason: SkipReason::MediaPending }
        );

        let missing = enqueue_send(&send_tx, MetadataId::new_v4(), "test").await.unwrap_err();
        assert!(matches!(missing, DaemonError::Remote(ref e) if e.kind == "not_found"), "got: {missing}");

        let stats = shared.stats.read().await.clone();
        assert_eq!((stats.skipped, stats.failed), (1, 1));

        drop(send_tx);
        tokio_test::assert_ok!(processor.await.expect("join"));
    }
}
