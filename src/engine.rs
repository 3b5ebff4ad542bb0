//! Session wiring and the single-task event loop.
//!
//! All engine-owned state (store, orchestrator, logs, subscribers) lives in
//! one task and is only touched from inside the `select!` loop, so nothing
//! here needs a lock. HTTP exchanges run as separate tasks in a `JoinSet`;
//! their results come back into the loop and are applied there, so a slow
//! server never stalls the streams, the timers or the command channel.
//! Other tasks talk to the engine through `EngineHandle`.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::data::api::SignalApi;
use crate::data::snapshot::{Snapshot, SnapshotLoader};
use crate::data::types::{Direction, ScanConfig, ScanProgressEvent, Signal};
use crate::error::{EngineError, EngineResult};
use crate::monitoring::log_buffer::{LogBuffer, LogEntry};
use crate::scan::orchestrator::{ApiCall, ScanOrchestrator, ScanPhase, ScanTimings, TriggerOutcome};
use crate::scan::timer::{sleep_until, Deadline};
use crate::store::preferences::{PreferenceStore, Preferences};
use crate::store::reconciliation::{ReconciliationStore, SortKey, ViewFilter};
use crate::stream::decoder::{ProgressFrameDecoder, SignalFrameDecoder};
use crate::stream::subscriber::{
    ReconnectPolicy, StreamEvent, StreamSubscriber, SubscriberState, SubscriberStats,
};
use crate::stream::transport::FrameTransport;

const COMMAND_BUFFER: usize = 64;

/// The state one operator session sees.
pub struct Session {
    loader: SnapshotLoader,
    store: ReconciliationStore,
    orchestrator: ScanOrchestrator,
    logs: LogBuffer,
}

impl Session {
    pub fn new(
        loader: SnapshotLoader,
        store: ReconciliationStore,
        orchestrator: ScanOrchestrator,
        logs: LogBuffer,
    ) -> Self {
        Self {
            loader,
            store,
            orchestrator,
            logs,
        }
    }

    /// Replace the current view with a loaded snapshot. On failure the
    /// current view is left exactly as it was.
    pub fn apply_snapshot(&mut self, result: EngineResult<Snapshot>) -> EngineResult<usize> {
        match result {
            Ok(snapshot) => {
                let count = snapshot.signals.len();
                self.store.hydrate(snapshot.signals);
                self.orchestrator.adopt_config(snapshot.scan_config);
                Ok(count)
            }
            Err(e) => {
                warn!("Snapshot load failed, keeping current view: {}", e);
                Err(e)
            }
        }
    }

    pub fn apply_signal(&mut self, signal: Signal) {
        debug!(
            "{} {} conviction {:.0}",
            signal.symbol, signal.direction, signal.conviction
        );
        self.store.upsert(signal);
    }

    pub fn apply_progress(&mut self, event: ScanProgressEvent) -> Option<ApiCall<EngineResult<Value>>> {
        self.orchestrator.on_progress(event, &mut self.logs)
    }

    pub fn trigger_scan(&mut self) -> Option<ApiCall<TriggerOutcome>> {
        self.orchestrator.trigger_scan(&mut self.logs)
    }

    pub fn on_trigger_result(&mut self, outcome: TriggerOutcome) -> EngineResult<ScanPhase> {
        self.orchestrator.on_trigger_result(outcome, &mut self.logs)
    }

    pub fn poll_timers(&mut self, now: Instant) {
        if let Err(e) = self.orchestrator.poll_timers(now, &mut self.logs) {
            warn!("{}", e);
        }
    }
}

/// What the caller wants to see; dismissed alerts are always hidden.
#[derive(Debug, Clone, Default)]
pub struct ViewRequest {
    pub direction: Option<Direction>,
    pub min_conviction: Option<f64>,
    pub include_pending: bool,
    pub watchlist_only: bool,
    pub sort: SortKey,
}

#[derive(Debug, Clone)]
pub struct EngineStatus {
    pub phase: ScanPhase,
    pub scan_config: ScanConfig,
    pub progress: Option<ScanProgressEvent>,
    pub signals: usize,
    pub signal_capacity: usize,
    pub scan_timeouts: u64,
    pub signal_stream: (SubscriberState, SubscriberStats),
    pub progress_stream: (SubscriberState, SubscriberStats),
}

pub enum EngineCommand {
    TriggerScan(oneshot::Sender<EngineResult<ScanPhase>>),
    SetInterval(u32, oneshot::Sender<EngineResult<ScanConfig>>),
    Reload(oneshot::Sender<EngineResult<usize>>),
    View(ViewRequest, oneshot::Sender<Vec<Signal>>),
    Logs(oneshot::Sender<Vec<LogEntry>>),
    Status(oneshot::Sender<EngineStatus>),
    Shutdown,
}

/// A finished HTTP exchange, with whoever is waiting on it.
enum Completion {
    Snapshot(EngineResult<Snapshot>, Option<oneshot::Sender<EngineResult<usize>>>),
    Trigger(TriggerOutcome, oneshot::Sender<EngineResult<ScanPhase>>),
    Interval(EngineResult<Value>, oneshot::Sender<EngineResult<ScanConfig>>),
    ConfigRefresh(EngineResult<Value>),
}

#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineCommand>,
}

impl EngineHandle {
    #[cfg(test)]
    pub(crate) fn from_sender(tx: mpsc::Sender<EngineCommand>) -> Self {
        Self { tx }
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> EngineCommand,
    ) -> EngineResult<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(build(reply))
            .await
            .map_err(|_| EngineError::Stopped)?;
        rx.await.map_err(|_| EngineError::Stopped)
    }

    pub async fn trigger_scan(&self) -> EngineResult<ScanPhase> {
        self.request(EngineCommand::TriggerScan).await?
    }

    pub async fn set_interval(&self, minutes: u32) -> EngineResult<ScanConfig> {
        self.request(|reply| EngineCommand::SetInterval(minutes, reply)).await?
    }

    pub async fn reload(&self) -> EngineResult<usize> {
        self.request(EngineCommand::Reload).await?
    }

    pub async fn view(&self, request: ViewRequest) -> EngineResult<Vec<Signal>> {
        self.request(|reply| EngineCommand::View(request, reply)).await
    }

    pub async fn logs(&self) -> EngineResult<Vec<LogEntry>> {
        self.request(EngineCommand::Logs).await
    }

    pub async fn status(&self) -> EngineResult<EngineStatus> {
        self.request(EngineCommand::Status).await
    }

    pub async fn shutdown(&self) {
        let _ = self.tx.send(EngineCommand::Shutdown).await;
    }
}

pub struct Engine {
    session: Session,
    preferences: Arc<dyn PreferenceStore>,
    signals: StreamSubscriber<SignalFrameDecoder>,
    progress: StreamSubscriber<ProgressFrameDecoder>,
    signal_url: String,
    progress_url: String,
    reconnect: ReconnectPolicy,
    signal_reopen: Deadline,
    progress_reopen: Deadline,
    default_min_conviction: f64,
    commands: mpsc::Receiver<EngineCommand>,
    calls: JoinSet<Completion>,
}

impl Engine {
    pub fn new(
        config: &Config,
        api: Arc<dyn SignalApi>,
        transport: Arc<dyn FrameTransport>,
        preferences: Arc<dyn PreferenceStore>,
    ) -> (Self, EngineHandle) {
        let timings = ScanTimings {
            watchdog: config.scan.watchdog(),
            completion_grace: config.scan.completion_grace(),
        };
        let session = Session::new(
            SnapshotLoader::new(api.clone(), config.query.clone()),
            ReconciliationStore::new(config.store.max_signals),
            ScanOrchestrator::new(api, preferences.clone(), timings),
            LogBuffer::new(config.scan.log_capacity),
        );

        let (tx, commands) = mpsc::channel(COMMAND_BUFFER);
        let engine = Self {
            session,
            preferences,
            signals: StreamSubscriber::new("signal-stream", SignalFrameDecoder, transport.clone()),
            progress: StreamSubscriber::new("progress-stream", ProgressFrameDecoder, transport),
            signal_url: config.streams.signal_url.clone(),
            progress_url: config.streams.progress_url.clone(),
            reconnect: ReconnectPolicy::new(config.streams.reconnect, config.streams.reconnect_delay()),
            signal_reopen: Deadline::default(),
            progress_reopen: Deadline::default(),
            default_min_conviction: config.store.min_conviction,
            commands,
            calls: JoinSet::new(),
        };

        (engine, EngineHandle { tx })
    }

    pub async fn run(mut self) {
        self.spawn_reload(None);
        self.signals.open(&self.signal_url);
        self.progress.open(&self.progress_url);

        loop {
            let scan_timer = self.session.orchestrator.next_deadline();

            tokio::select! {
                event = self.signals.next(), if self.signals.is_active() => {
                    if let Some(event) = event {
                        self.on_signal_event(event);
                    }
                }
                event = self.progress.next(), if self.progress.is_active() => {
                    if let Some(event) = event {
                        self.on_progress_event(event);
                    }
                }
                Some(joined) = self.calls.join_next(), if !self.calls.is_empty() => match joined {
                    Ok(done) => self.on_completion(done),
                    Err(e) => warn!("HTTP call task failed: {}", e),
                },
                _ = sleep_until(scan_timer) => {
                    self.session.poll_timers(Instant::now());
                }
                _ = sleep_until(self.signal_reopen.at()) => {
                    self.signal_reopen.disarm();
                    self.signals.reopen();
                }
                _ = sleep_until(self.progress_reopen.at()) => {
                    self.progress_reopen.disarm();
                    self.progress.reopen();
                }
                command = self.commands.recv() => match command {
                    Some(EngineCommand::Shutdown) | None => break,
                    Some(command) => self.handle_command(command),
                },
            }
        }

        // waiting callers see `Stopped`
        self.calls.abort_all();
        self.signals.close();
        self.progress.close();
        info!("Engine stopped");
    }

    fn spawn_reload(&mut self, reply: Option<oneshot::Sender<EngineResult<usize>>>) {
        let loader = self.session.loader.clone();
        self.calls
            .spawn(async move { Completion::Snapshot(loader.load().await, reply) });
    }

    fn on_completion(&mut self, done: Completion) {
        match done {
            Completion::Snapshot(result, reply) => {
                let result = self.session.apply_snapshot(result);
                match reply {
                    Some(reply) => {
                        let _ = reply.send(result);
                    }
                    None => {
                        if let Ok(count) = result {
                            info!("Loaded {} signals", count);
                        }
                    }
                }
            }
            Completion::Trigger(outcome, reply) => {
                let _ = reply.send(self.session.on_trigger_result(outcome));
            }
            Completion::Interval(result, reply) => {
                let _ = reply.send(self.session.orchestrator.on_interval_result(result));
            }
            Completion::ConfigRefresh(result) => self.session.orchestrator.on_config_result(result),
        }
    }

    fn on_signal_event(&mut self, event: StreamEvent<Signal>) {
        match event {
            StreamEvent::Opened => {}
            StreamEvent::Message(signal) => self.session.apply_signal(signal),
            StreamEvent::Closed(reason) => {
                if let Some(delay) = self.reconnect.next_attempt(&reason) {
                    info!("Signal stream reconnecting in {:?}", delay);
                    self.signal_reopen.arm(delay);
                }
            }
        }
    }

    fn on_progress_event(&mut self, event: StreamEvent<ScanProgressEvent>) {
        match event {
            StreamEvent::Opened => {}
            StreamEvent::Message(progress) => {
                if let Some(refresh) = self.session.apply_progress(progress) {
                    self.calls
                        .spawn(async move { Completion::ConfigRefresh(refresh.await) });
                }
            }
            StreamEvent::Closed(reason) => {
                if let Some(delay) = self.reconnect.next_attempt(&reason) {
                    info!("Progress stream reconnecting in {:?}", delay);
                    self.progress_reopen.arm(delay);
                }
            }
        }
    }

    /// Answers reads at once; HTTP-backed commands reply when their call finishes.
    fn handle_command(&mut self, command: EngineCommand) {
        match command {
            EngineCommand::TriggerScan(reply) => match self.session.trigger_scan() {
                Some(call) => {
                    self.calls
                        .spawn(async move { Completion::Trigger(call.await, reply) });
                }
                None => {
                    let _ = reply.send(Ok(self.session.orchestrator.phase()));
                }
            },
            EngineCommand::SetInterval(minutes, reply) => {
                match self.session.orchestrator.set_interval(minutes) {
                    Ok(call) => {
                        self.calls
                            .spawn(async move { Completion::Interval(call.await, reply) });
                    }
                    Err(e) => {
                        let _ = reply.send(Err(e));
                    }
                }
            }
            EngineCommand::Reload(reply) => self.spawn_reload(Some(reply)),
            EngineCommand::View(request, reply) => {
                let filter = self.filter_for(&request);
                let _ = reply.send(self.session.store.view(&filter, request.sort));
            }
            EngineCommand::Logs(reply) => {
                let _ = reply.send(self.session.logs.view());
            }
            EngineCommand::Status(reply) => {
                let _ = reply.send(self.status());
            }
            EngineCommand::Shutdown => {}
        }
    }

    fn filter_for(&self, request: &ViewRequest) -> ViewFilter {
        let prefs = Preferences::new(self.preferences.as_ref());

        let exclude_ids = prefs
            .dismissed_alerts()
            .unwrap_or_else(|e| {
                warn!("Could not read dismissed alerts: {}", e);
                Vec::new()
            })
            .into_iter()
            .collect();

        let symbols = if request.watchlist_only {
            let watchlist = prefs.watchlist().unwrap_or_else(|e| {
                warn!("Could not read watchlist: {}", e);
                Vec::new()
            });
            Some(watchlist.into_iter().collect())
        } else {
            None
        };

        ViewFilter {
            direction: request.direction,
            min_conviction: request.min_conviction.unwrap_or(self.default_min_conviction),
            require_rationale: !request.include_pending,
            symbols,
            exclude_ids,
        }
    }

    fn status(&self) -> EngineStatus {
        let orchestrator = &self.session.orchestrator;
        EngineStatus {
            phase: orchestrator.phase(),
            scan_config: orchestrator.config().clone(),
            progress: orchestrator.progress().cloned(),
            signals: self.session.store.len(),
            signal_capacity: self.session.store.capacity(),
            scan_timeouts: orchestrator.timeouts(),
            signal_stream: (self.signals.state().clone(), self.signals.stats()),
            progress_stream: (self.progress.state().clone(), self.progress.stats()),
        }
    }
}
