// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Local widget processes.
//!
//! Each widget is spawned with `PORT` and `WIDGET_ID` in its environment,
//! polled on `http://127.0.0.1:{port}/` until it answers, then connected
//! to on `ws://127.0.0.1:{port}/ws` for push messages. Crashes are restarted
//! with a linearly growing delay until `max_restarts` is spent.

use std::collections::{HashMap, HashSet};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::future::{join_all, BoxFuture};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{oneshot, watch, Mutex};
use tokio::task::JoinHandle;

#[cfg(feature = "telemetry")]
use tracing::instrument;

#[cfg(feature = "telemetry")]
use std::time::Instant;

#[cfg(feature = "telemetry")]
use crate::telemetry::metrics::GLOBAL_METRICS;

use crate::mcp::codec::RequestIds;
use crate::mcp::events::{EventBus, Subscription};
use crate::mcp::http::post_rpc;
use crate::mcp::path::effective_path;
use crate::mcp::types::{parse_list, tool_content, ToolDescriptor};
use crate::mcp::McpError;

use super::error::{ProcessError, ProcessResult};
use super::health::{wait_for_ready, Liveness};
use super::ports::allocate_port;
use super::push::{self, PumpEnd, PushStream};
use super::types::{
    OrchestratorSettings, ProcessEvent, ProcessRecord, ProcessStatus, WidgetManifest,
};

const PUSH_CLOSE_WAIT: Duration = Duration::from_secs(1);

/// Running push-socket task.
struct PushHandle {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl PushHandle {
    async fn close(self) {
        let PushHandle { shutdown, mut task } = self;
        let _ = shutdown.send(());
        if tokio::time::timeout(PUSH_CLOSE_WAIT, &mut task).await.is_err() {
            task.abort();
        }
    }
}

/// Table slot for one widget.
struct Entry {
    record: ProcessRecord,
    manifest: WidgetManifest,
    /// Bumped on every launch; exit monitors and delayed restarts from an
    /// older launch leave the slot alone.
    generation: u64,
    stop_requested: bool,
    /// Asks the exit monitor to kill the child.
    kill: Option<oneshot::Sender<()>>,
    liveness: Option<watch::Receiver<Liveness>>,
    push: Option<PushHandle>,
}

enum Reservation {
    Existing(ProcessRecord),
    Reserved { port: u16, generation: u64 },
    Abandoned,
}

enum Promotion {
    Running(ProcessRecord),
    Exited,
    Cancelled,
}

struct Inner {
    settings: OrchestratorSettings,
    http: reqwest::Client,
    events: EventBus<ProcessEvent>,
    table: Mutex<HashMap<String, Entry>>,
    generations: AtomicU64,
    ids: RequestIds,
}

/// Spawns and supervises locally hosted tool servers.
#[derive(Clone)]
pub struct ProcessOrchestrator {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ProcessOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessOrchestrator")
            .field("settings", &self.inner.settings)
            .finish_non_exhaustive()
    }
}

impl Default for ProcessOrchestrator {
    fn default() -> Self {
        Self::new(OrchestratorSettings::default())
    }
}

impl ProcessOrchestrator {
    pub fn new(settings: OrchestratorSettings) -> Self {
        Self {
            inner: Arc::new(Inner {
                settings,
                http: reqwest::Client::new(),
                events: EventBus::new(),
                table: Mutex::new(HashMap::new()),
                generations: AtomicU64::new(0),
                ids: RequestIds::new(),
            }),
        }
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.inner.settings
    }

    /// Start a widget and wait until it is ready with its push socket open.
    ///
    /// Returns the existing record when the widget is already running.
    #[cfg_attr(
        feature = "telemetry",
        instrument(skip(self, manifest), fields(server_id = %manifest.id))
    )]
    pub async fn start(&self, manifest: WidgetManifest) -> ProcessResult<ProcessRecord> {
        #[cfg(feature = "telemetry")]
        let started = Instant::now();

        let server_id = manifest.id.clone();
        let result = self.inner.clone().launch(manifest, 0, None).await;

        #[cfg(feature = "telemetry")]
        GLOBAL_METRICS.record_operation("orchestrate.start", started.elapsed());

        result?.ok_or(ProcessError::NotRunning(server_id))
    }

    /// Stop a widget: SIGTERM, a grace period, then kill. Unknown ids are a no-op.
    #[cfg_attr(feature = "telemetry", instrument(skip(self)))]
    pub async fn stop(&self, server_id: &str) -> ProcessResult<()> {
        let inner = &self.inner;
        let (generation, pid, kill, liveness, push) = {
            let mut table = inner.table.lock().await;
            let Some(entry) = table.get_mut(server_id) else {
                return Ok(());
            };
            match entry.record.status {
                ProcessStatus::Stopping => return Ok(()),
                ProcessStatus::Stopped | ProcessStatus::Error => {
                    table.remove(server_id);
                    return Ok(());
                }
                ProcessStatus::Starting | ProcessStatus::Running => {}
            }
            entry.stop_requested = true;
            entry.record.status = ProcessStatus::Stopping;
            (
                entry.generation,
                entry.record.pid,
                entry.kill.take(),
                entry.liveness.clone(),
                entry.push.take(),
            )
        };

        if let Some(push) = push {
            push.close().await;
        }

        let exit_code = inner.terminate(server_id, pid, kill, liveness).await;

        {
            let mut table = inner.table.lock().await;
            if table
                .get(server_id)
                .is_some_and(|entry| entry.generation == generation)
            {
                table.remove(server_id);
            }
        }

        tracing::info!(server_id, exit_code = ?exit_code, "widget stopped");
        inner.events.emit(&ProcessEvent::Stopped {
            server_id: server_id.to_string(),
            exit_code,
        });
        Ok(())
    }

    /// Stop every widget.
    pub async fn stop_all(&self) {
        let ids: Vec<String> = self.inner.table.lock().await.keys().cloned().collect();
        for (id, result) in ids
            .iter()
            .zip(join_all(ids.iter().map(|id| self.stop(id))).await)
        {
            if let Err(e) = result {
                tracing::warn!(server_id = %id, "failed to stop widget: {}", e);
            }
        }
    }

    /// Invoke a tool on a running widget over `POST /mcp`.
    pub async fn call_tool(
        &self,
        server_id: &str,
        name: &str,
        arguments: Value,
    ) -> ProcessResult<Value> {
        let params = json!({ "name": name, "arguments": arguments });
        let result = self.rpc(server_id, "tools/call", Some(params)).await?;
        Ok(tool_content(result))
    }

    /// Ask a running widget for its tools.
    pub async fn list_tools(&self, server_id: &str) -> ProcessResult<Vec<ToolDescriptor>> {
        let result = self.rpc(server_id, "tools/list", None).await?;
        Ok(parse_list(&result, "tools").map_err(McpError::from)?)
    }

    pub async fn status(&self, server_id: &str) -> Option<ProcessStatus> {
        self.record(server_id).await.map(|record| record.status)
    }

    pub async fn record(&self, server_id: &str) -> Option<ProcessRecord> {
        let table = self.inner.table.lock().await;
        table.get(server_id).map(|entry| entry.record.clone())
    }

    /// All records, sorted by server id.
    pub async fn records(&self) -> Vec<ProcessRecord> {
        let table = self.inner.table.lock().await;
        let mut records: Vec<ProcessRecord> =
            table.values().map(|entry| entry.record.clone()).collect();
        records.sort_by(|a, b| a.server_id.cmp(&b.server_id));
        records
    }

    /// Register a lifecycle and push event handler.
    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&ProcessEvent) + Send + Sync + 'static,
    {
        self.inner.events.subscribe(handler)
    }

    async fn rpc(&self, server_id: &str, method: &str, params: Option<Value>) -> ProcessResult<Value> {
        let port = {
            let table = self.inner.table.lock().await;
            match table.get(server_id) {
                Some(entry) if entry.record.status == ProcessStatus::Running => entry.record.port,
                _ => return Err(ProcessError::NotRunning(server_id.to_string())),
            }
        };

        let url = format!("http://127.0.0.1:{}/mcp", port);
        let reply = post_rpc(
            &self.inner.http,
            &url,
            None,
            self.inner.ids.next(),
            method,
            params,
            self.inner.settings.request_timeout(),
        )
        .await?;
        Ok(reply.result)
    }
}

impl Inner {
    /// Spawn, wait for readiness, and open the push socket.
    ///
    /// `expected` carries the generation a delayed restart was scheduled
    /// from; the restart is abandoned when the slot has moved on. Boxed
    /// because restarts re-enter here from the exit monitor.
    fn launch(
        self: Arc<Self>,
        manifest: WidgetManifest,
        restart_count: u32,
        expected: Option<u64>,
    ) -> BoxFuture<'static, ProcessResult<Option<ProcessRecord>>> {
        Box::pin(async move {
            let id = manifest.id.clone();
            let (port, generation) = match self.reserve(&manifest, restart_count, expected).await? {
                Reservation::Existing(record) => return Ok(Some(record)),
                Reservation::Abandoned => return Ok(None),
                Reservation::Reserved { port, generation } => (port, generation),
            };

            let mut child = match spawn_widget(&manifest, port) {
                Ok(child) => child,
                Err(e) => {
                    self.fail_start(&id, generation, &e).await;
                    return Err(e);
                }
            };
            let pid = child.id();
            tracing::info!(server_id = %id, pid = ?pid, port, restart_count, "spawned widget");

            if let Some(stdout) = child.stdout.take() {
                tokio::spawn(log_output(stdout, id.clone(), "stdout"));
            }
            if let Some(stderr) = child.stderr.take() {
                tokio::spawn(log_output(stderr, id.clone(), "stderr"));
            }

            let (kill_tx, kill_rx) = oneshot::channel();
            let (live_tx, live_rx) = watch::channel(Liveness::Alive);
            tokio::spawn(self.clone().monitor(id.clone(), generation, child, kill_rx, live_tx));

            let kill_tx = {
                let mut table = self.table.lock().await;
                match table.get_mut(&id) {
                    Some(entry) if entry.generation == generation && !entry.stop_requested => {
                        entry.record.pid = pid;
                        entry.kill = Some(kill_tx);
                        entry.liveness = Some(live_rx.clone());
                        None
                    }
                    _ => Some(kill_tx),
                }
            };
            if let Some(kill_tx) = kill_tx {
                let _ = kill_tx.send(());
                return Err(ProcessError::NotRunning(id));
            }

            let ready = wait_for_ready(
                &self.http,
                &id,
                port,
                &format!("http://127.0.0.1:{}/", port),
                self.settings.ready_timeout(),
                self.settings.ready_poll(),
                live_rx,
            )
            .await;
            let stream = match ready {
                Ok(()) => push::connect(&push::push_url(port), self.settings.push_connect_timeout())
                    .await
                    .map_err(|message| ProcessError::push_socket(&id, message)),
                Err(e) => Err(e),
            };
            let stream = match stream {
                Ok(stream) => stream,
                Err(e) => {
                    self.fail_start(&id, generation, &e).await;
                    return Err(e);
                }
            };

            match self.promote(&id, generation, port, stream).await {
                Promotion::Running(record) => {
                    tracing::info!(server_id = %id, port, "widget running");
                    self.events.emit(&ProcessEvent::Started {
                        server_id: id,
                        port,
                    });
                    Ok(Some(record))
                }
                Promotion::Exited => {
                    let e = ProcessError::ExitedBeforeReady { server_id: id.clone() };
                    self.fail_start(&id, generation, &e).await;
                    Err(e)
                }
                Promotion::Cancelled => Err(ProcessError::NotRunning(id)),
            }
        })
    }

    async fn reserve(
        &self,
        manifest: &WidgetManifest,
        restart_count: u32,
        expected: Option<u64>,
    ) -> ProcessResult<Reservation> {
        let mut table = self.table.lock().await;

        match (table.get(&manifest.id), expected) {
            (Some(entry), Some(generation)) => {
                if entry.generation != generation || entry.record.status != ProcessStatus::Stopped {
                    return Ok(Reservation::Abandoned);
                }
            }
            (None, Some(_)) => return Ok(Reservation::Abandoned),
            (Some(entry), None) => match entry.record.status {
                ProcessStatus::Running => return Ok(Reservation::Existing(entry.record.clone())),
                status @ (ProcessStatus::Starting | ProcessStatus::Stopping) => {
                    return Err(ProcessError::Busy {
                        server_id: manifest.id.clone(),
                        status,
                    })
                }
                ProcessStatus::Stopped | ProcessStatus::Error => {}
            },
            (None, None) => {}
        }

        let in_use: HashSet<u16> = table
            .values()
            .filter(|entry| entry.record.server_id != manifest.id && entry.record.status.holds_port())
            .map(|entry| entry.record.port)
            .collect();

        let port = match manifest.port {
            Some(port) if in_use.contains(&port) => {
                return Err(ProcessError::PortUnavailable(format!(
                    "port {} is held by another widget",
                    port
                )))
            }
            Some(port) => port,
            None => allocate_port(self.settings.base_port, &in_use)?,
        };

        let generation = self.generations.fetch_add(1, Ordering::Relaxed) + 1;
        table.insert(
            manifest.id.clone(),
            Entry {
                record: ProcessRecord {
                    server_id: manifest.id.clone(),
                    pid: None,
                    port,
                    status: ProcessStatus::Starting,
                    started_at: Utc::now(),
                    restart_count,
                },
                manifest: manifest.clone(),
                generation,
                stop_requested: false,
                kill: None,
                liveness: None,
                push: None,
            },
        );

        Ok(Reservation::Reserved { port, generation })
    }

    async fn promote(
        self: &Arc<Self>,
        id: &str,
        generation: u64,
        port: u16,
        stream: PushStream,
    ) -> Promotion {
        let mut table = self.table.lock().await;
        let Some(entry) = table
            .get_mut(id)
            .filter(|entry| entry.generation == generation && !entry.stop_requested)
        else {
            return Promotion::Cancelled;
        };

        if entry
            .liveness
            .as_ref()
            .is_some_and(|liveness| liveness.borrow().is_exited())
        {
            return Promotion::Exited;
        }

        entry.record.status = ProcessStatus::Running;
        entry.push = Some(self.spawn_push(id.to_string(), generation, port, stream));
        Promotion::Running(entry.record.clone())
    }

    /// Mark a failed launch as errored and kill whatever was spawned.
    async fn fail_start(&self, id: &str, generation: u64, error: &ProcessError) {
        let kill = {
            let mut table = self.table.lock().await;
            let Some(entry) = table.get_mut(id).filter(|entry| entry.generation == generation) else {
                return;
            };
            if entry.stop_requested {
                return;
            }
            entry.record.status = ProcessStatus::Error;
            entry.record.pid = None;
            entry.kill.take()
        };

        if let Some(kill) = kill {
            let _ = kill.send(());
        }
        tracing::warn!(server_id = id, "widget failed to start: {}", error);
        self.events.emit(&ProcessEvent::Error {
            server_id: id.to_string(),
            message: error.to_string(),
        });
    }

    /// Own the child until it exits, then publish its exit.
    async fn monitor(
        self: Arc<Self>,
        id: String,
        generation: u64,
        mut child: Child,
        kill: oneshot::Receiver<()>,
        liveness: watch::Sender<Liveness>,
    ) {
        let status = tokio::select! {
            status = child.wait() => status,
            Ok(()) = kill => {
                if let Err(e) = child.start_kill() {
                    tracing::warn!(server_id = %id, "failed to kill widget: {}", e);
                }
                child.wait().await
            }
        };

        let code = match status {
            Ok(status) => status.code(),
            Err(e) => {
                tracing::warn!(server_id = %id, "failed to reap widget: {}", e);
                None
            }
        };
        let _ = liveness.send(Liveness::Exited(code));
        self.handle_exit(&id, generation, code).await;
    }

    /// Unexpected exit of a running widget: mark stopped, maybe restart.
    async fn handle_exit(self: &Arc<Self>, id: &str, generation: u64, code: Option<i32>) {
        let (push, restart) = {
            let mut table = self.table.lock().await;
            let Some(entry) = table.get_mut(id) else {
                return;
            };
            if entry.generation != generation
                || entry.stop_requested
                || entry.record.status != ProcessStatus::Running
            {
                return;
            }

            entry.record.status = ProcessStatus::Stopped;
            entry.record.pid = None;
            entry.kill = None;

            let crashed = code != Some(0);
            let restart = if crashed && entry.record.restart_count < self.settings.max_restarts {
                entry.record.restart_count += 1;
                Some((entry.manifest.clone(), entry.record.restart_count))
            } else {
                None
            };
            (entry.push.take(), restart)
        };

        if let Some(push) = push {
            push.close().await;
        }

        tracing::info!(server_id = id, exit_code = ?code, "widget exited");
        self.events.emit(&ProcessEvent::Stopped {
            server_id: id.to_string(),
            exit_code: code,
        });

        let Some((manifest, attempt)) = restart else {
            return;
        };

        let delay = self.settings.restart_delay(attempt);
        tracing::warn!(
            server_id = id,
            attempt,
            delay_ms = delay.as_millis() as u64,
            "restarting crashed widget"
        );
        self.events.emit(&ProcessEvent::Restarting {
            server_id: id.to_string(),
            attempt,
            delay_ms: delay.as_millis() as u64,
        });

        let inner = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let id = manifest.id.clone();
            match inner.launch(manifest, attempt, Some(generation)).await {
                Ok(Some(_)) => {}
                Ok(None) => tracing::debug!(server_id = %id, "restart abandoned"),
                Err(e) => tracing::warn!(server_id = %id, "restart failed: {}", e),
            }
        });
    }

    /// SIGTERM, wait, then kill. Returns the exit code when one was observed.
    async fn terminate(
        &self,
        server_id: &str,
        pid: Option<u32>,
        kill: Option<oneshot::Sender<()>>,
        liveness: Option<watch::Receiver<Liveness>>,
    ) -> Option<i32> {
        let Some(mut liveness) = liveness else {
            if let Some(kill) = kill {
                let _ = kill.send(());
            }
            return None;
        };
        let grace = self.settings.stop_grace();

        if send_sigterm(server_id, pid) {
            if let Ok(Ok(state)) =
                tokio::time::timeout(grace, liveness.wait_for(Liveness::is_exited)).await
            {
                return exit_code(*state);
            }
            tracing::warn!(server_id, "widget ignored SIGTERM, killing");
        }

        if let Some(kill) = kill {
            let _ = kill.send(());
        }
        let code = match tokio::time::timeout(grace, liveness.wait_for(Liveness::is_exited)).await {
            Ok(Ok(state)) => exit_code(*state),
            _ => None,
        };
        code
    }

    fn spawn_push(
        self: &Arc<Self>,
        id: String,
        generation: u64,
        port: u16,
        stream: PushStream,
    ) -> PushHandle {
        let (shutdown, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(self.clone().run_push(id, generation, port, stream, shutdown_rx));
        PushHandle { shutdown, task }
    }

    /// Forward push messages; reconnect while the widget keeps running.
    async fn run_push(
        self: Arc<Self>,
        id: String,
        generation: u64,
        port: u16,
        mut stream: PushStream,
        mut shutdown: oneshot::Receiver<()>,
    ) {
        let url = push::push_url(port);
        loop {
            let events = &self.events;
            let end = push::pump(stream, &mut shutdown, |payload| {
                events.emit(&ProcessEvent::Push {
                    server_id: id.clone(),
                    payload,
                })
            })
            .await;
            if end == PumpEnd::Shutdown {
                return;
            }
            tracing::debug!(server_id = %id, "push socket closed");

            stream = loop {
                tokio::select! {
                    _ = tokio::time::sleep(self.settings.push_reconnect()) => {}
                    _ = &mut shutdown => return,
                }
                if !self.is_running(&id, generation).await {
                    return;
                }
                match push::connect(&url, self.settings.push_connect_timeout()).await {
                    Ok(stream) => {
                        tracing::debug!(server_id = %id, "push socket reconnected");
                        break stream;
                    }
                    Err(e) => tracing::debug!(server_id = %id, "push reconnect failed: {}", e),
                }
            };
        }
    }

    async fn is_running(&self, id: &str, generation: u64) -> bool {
        let table = self.table.lock().await;
        table.get(id).is_some_and(|entry| {
            entry.generation == generation && entry.record.status == ProcessStatus::Running
        })
    }
}

fn exit_code(state: Liveness) -> Option<i32> {
    match state {
        Liveness::Exited(code) => code,
        Liveness::Alive => None,
    }
}

fn spawn_widget(manifest: &WidgetManifest, port: u16) -> ProcessResult<Child> {
    let mut cmd = Command::new(&manifest.command);
    cmd.args(&manifest.args)
        .env("PATH", effective_path(&manifest.command))
        .env("PORT", port.to_string())
        .env("WIDGET_ID", &manifest.id)
        .envs(&manifest.env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    if let Some(dir) = &manifest.cwd {
        cmd.current_dir(dir);
    }

    cmd.spawn().map_err(|e| {
        ProcessError::spawn_failed(&manifest.id, format!("{}: {}", manifest.command, e))
    })
}

#[cfg(unix)]
fn send_sigterm(server_id: &str, pid: Option<u32>) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let Some(raw) = pid.and_then(|pid| i32::try_from(pid).ok()) else {
        return false;
    };
    match kill(Pid::from_raw(raw), Signal::SIGTERM) {
        // Already gone; the monitor reports the exit.
        Ok(()) | Err(Errno::ESRCH) => true,
        Err(e) => {
            tracing::warn!(server_id, pid = raw, "SIGTERM failed: {}", e);
            false
        }
    }
}

#[cfg(not(unix))]
fn send_sigterm(_server_id: &str, _pid: Option<u32>) -> bool {
    false
}

async fn log_output<R: AsyncRead + Unpin>(reader: R, server_id: String, stream: &'static str) {
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        tracing::debug!(server_id = %server_id, stream, "{}", line);
    }
}
