use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::Serialize;
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::data::api::SignalApi;
use crate::data::normalize::decode_scan_config;
use crate::data::types::{ScanConfig, ScanInterval, ScanProgressEvent, ScanStatus};
use crate::error::{EngineError, EngineResult};
use crate::monitoring::log_buffer::{LogBuffer, LogEntry};
use crate::scan::timer::Deadline;
use crate::store::preferences::{PreferenceStore, Preferences};

/// An HTTP exchange handed to the event loop to run off-loop. Owns
/// everything it needs, so it can be spawned.
pub type ApiCall<T> = BoxFuture<'static, T>;

/// Client-side view of the remote scan job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ScanPhase {
    Idle,
    Starting,
    InProgress,
    /// Finished; shown briefly before dropping back to `Idle`.
    Completed,
}

impl ScanPhase {
    pub fn is_busy(&self) -> bool {
        matches!(self, ScanPhase::Starting | ScanPhase::InProgress)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ScanTimings {
    /// Longest we wait for a terminal transition once out of `Idle`.
    pub watchdog: Duration,
    pub completion_grace: Duration,
}

impl Default for ScanTimings {
    fn default() -> Self {
        Self {
            watchdog: Duration::from_secs(120),
            completion_grace: Duration::from_secs(3),
        }
    }
}

/// Result of the trigger exchange: the crawl acknowledgement, then the
/// config refresh that follows a successful crawl.
#[derive(Debug)]
pub struct TriggerOutcome {
    pub crawl: EngineResult<()>,
    pub config: Option<EngineResult<Value>>,
}

/// Scan state machine. Never awaits anything itself: commands hand back an
/// `ApiCall` for the caller to run, and the answer comes back through the
/// matching `on_*_result` method. Phase and watchdog stay as set while a
/// call is in flight.
pub struct ScanOrchestrator {
    api: Arc<dyn SignalApi>,
    preferences: Arc<dyn PreferenceStore>,
    timings: ScanTimings,
    phase: ScanPhase,
    config: ScanConfig,
    progress: Option<ScanProgressEvent>,
    watchdog: Deadline,
    grace: Deadline,
    timeouts: u64,
}

impl ScanOrchestrator {
    pub fn new(
        api: Arc<dyn SignalApi>,
        preferences: Arc<dyn PreferenceStore>,
        timings: ScanTimings,
    ) -> Self {
        Self {
            api,
            preferences,
            timings,
            phase: ScanPhase::Idle,
            config: ScanConfig::default(),
            progress: None,
            watchdog: Deadline::default(),
            grace: Deadline::default(),
            timeouts: 0,
        }
    }

    pub fn phase(&self) -> ScanPhase {
        self.phase
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    pub fn progress(&self) -> Option<&ScanProgressEvent> {
        self.progress.as_ref()
    }

    pub fn timeouts(&self) -> u64 {
        self.timeouts
    }

    /// Take the configuration from a freshly loaded snapshot.
    pub fn adopt_config(&mut self, config: ScanConfig) {
        self.config = config;
    }

    /// Ask the server to start a scan. While one is already starting or
    /// running this returns `None` and nothing is sent.
    pub fn trigger_scan(&mut self, logs: &mut LogBuffer) -> Option<ApiCall<TriggerOutcome>> {
        if self.phase.is_busy() {
            debug!("Scan already {:?}, ignoring trigger", self.phase);
            return None;
        }

        self.enter(ScanPhase::Starting);
        logs.append(LogEntry::info("Scan requested"));

        let api = self.api.clone();
        Some(
            async move {
                let crawl = api.trigger_crawl().await;
                let config = match crawl {
                    Ok(()) => Some(api.scan_config().await),
                    Err(_) => None,
                };
                TriggerOutcome { crawl, config }
            }
            .boxed(),
        )
    }

    /// Apply the trigger exchange. A failed crawl puts a still-`Starting`
    /// machine back to `Idle` and leaves one error line.
    pub fn on_trigger_result(
        &mut self,
        outcome: TriggerOutcome,
        logs: &mut LogBuffer,
    ) -> EngineResult<ScanPhase> {
        if let Err(e) = outcome.crawl {
            if self.phase == ScanPhase::Starting {
                self.reset_to_idle();
            }
            logs.append(LogEntry::error(format!("Scan trigger failed: {}", e)));
            return Err(e);
        }

        if let Some(config) = outcome.config {
            self.on_config_result(config);
        }
        Ok(self.phase)
    }

    /// Validate the cadence and build the update request.
    pub fn set_interval(&self, minutes: u32) -> EngineResult<ApiCall<EngineResult<Value>>> {
        let interval = ScanInterval::try_from(minutes)?;
        let api = self.api.clone();
        Ok(async move {
            api.update_scan_config(interval.minutes(), interval.is_enabled())
                .await
        }
        .boxed())
    }

    /// Apply the server's answer to an interval change. On any failure the
    /// previous configuration stays in place and the error goes back.
    pub fn on_interval_result(&mut self, result: EngineResult<Value>) -> EngineResult<ScanConfig> {
        let config = decode_scan_config(&result?)?;

        info!("Scan interval now {}", config.interval);
        self.config = config.clone();

        if let Err(e) = Preferences::new(self.preferences.as_ref()).remember_interval(config.interval) {
            warn!("Could not remember scan interval: {}", e);
        }
        Ok(config)
    }

    pub fn refresh_config(&self) -> ApiCall<EngineResult<Value>> {
        let api = self.api.clone();
        async move { api.scan_config().await }.boxed()
    }

    /// A refresh that fails or does not decode keeps the current config.
    pub fn on_config_result(&mut self, result: EngineResult<Value>) {
        match result.and_then(|body| decode_scan_config(&body)) {
            Ok(config) => self.config = config,
            Err(e) => warn!("Scan config refresh failed: {}", e),
        }
    }

    /// Fold one progress-stream event into the machine. A `completed` event
    /// asks for a config refresh to pick up the new last scan time.
    pub fn on_progress(
        &mut self,
        event: ScanProgressEvent,
        logs: &mut LogBuffer,
    ) -> Option<ApiCall<EngineResult<Value>>> {
        if let Some(line) = &event.log {
            logs.append(LogEntry::info(line.clone()));
        }
        let status = event.status;
        self.progress = Some(event);

        match status {
            ScanStatus::Starting => self.enter(ScanPhase::Starting),
            ScanStatus::Screening | ScanStatus::Processing => self.enter(ScanPhase::InProgress),
            ScanStatus::Completed => {
                self.phase = ScanPhase::Completed;
                self.watchdog.disarm();
                self.grace.arm(self.timings.completion_grace);
                info!("Scan completed");
                return Some(self.refresh_config());
            }
        }
        None
    }

    /// Earliest pending timer, for the event loop to sleep on.
    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.watchdog.at(), self.grace.at()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Fire whatever timers are due. A watchdog expiry forces `Idle` and
    /// reports `ProtocolTimeout`; the remote scan may well still be running.
    pub fn poll_timers(&mut self, now: Instant, logs: &mut LogBuffer) -> EngineResult<()> {
        if self.grace.take_expired(now) && self.phase == ScanPhase::Completed {
            self.phase = ScanPhase::Idle;
            debug!("Scan phase back to Idle");
        }

        if self.watchdog.take_expired(now) {
            let ceiling = self.timings.watchdog;
            self.reset_to_idle();
            self.timeouts += 1;
            logs.append(LogEntry::warn(format!(
                "Scan timeout: no completion within {}s, no longer waiting",
                ceiling.as_secs()
            )));
            return Err(EngineError::ProtocolTimeout(ceiling));
        }
        Ok(())
    }

    fn enter(&mut self, phase: ScanPhase) {
        self.grace.disarm();
        self.phase = phase;
        self.watchdog.arm_if_idle(self.timings.watchdog);
    }

    fn reset_to_idle(&mut self) {
        self.phase = ScanPhase::Idle;
        self.progress = None;
        self.watchdog.disarm();
        self.grace.disarm();
    }
}
