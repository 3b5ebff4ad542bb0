//! In-process fakes for the HTTP and stream collaborators.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use futures::channel::mpsc;
use futures::StreamExt;
use serde_json::{json, Value};

use crate::config::QueryConfig;
use crate::data::api::SignalApi;
use crate::error::{EngineError, EngineResult};
use crate::stream::transport::{FrameStream, FrameTransport};

/// Scripted `SignalApi`. Empty scripts fall back to benign defaults.
#[derive(Default)]
pub struct FakeApi {
    pub recommendations: Mutex<VecDeque<EngineResult<Value>>>,
    pub configs: Mutex<VecDeque<EngineResult<Value>>>,
    pub updates: Mutex<VecDeque<EngineResult<Value>>>,
    pub crawls: Mutex<VecDeque<EngineResult<()>>>,
    pub crawl_calls: AtomicUsize,
    pub config_calls: AtomicUsize,
    pub update_calls: Mutex<Vec<(u32, bool)>>,
    pub hang_crawl: AtomicBool,
}

impl FakeApi {
    pub fn push_recommendations(&self, result: EngineResult<Value>) {
        self.recommendations.lock().unwrap().push_back(result);
    }

    pub fn push_config(&self, result: EngineResult<Value>) {
        self.configs.lock().unwrap().push_back(result);
    }

    pub fn push_update(&self, result: EngineResult<Value>) {
        self.updates.lock().unwrap().push_back(result);
    }

    pub fn push_crawl(&self, result: EngineResult<()>) {
        self.crawls.lock().unwrap().push_back(result);
    }

    /// Make every later `trigger_crawl` wait forever.
    pub fn hang_crawls(&self) {
        self.hang_crawl.store(true, Ordering::SeqCst);
    }

    pub fn crawl_count(&self) -> usize {
        self.crawl_calls.load(Ordering::SeqCst)
    }

    pub fn config_count(&self) -> usize {
        self.config_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SignalApi for FakeApi {
    async fn active_recommendations(&self, _query: &QueryConfig) -> EngineResult<Value> {
        self.recommendations
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(json!([])))
    }

    async fn scan_config(&self) -> EngineResult<Value> {
        self.config_calls.fetch_add(1, Ordering::SeqCst);
        self.configs.lock().unwrap().pop_front().unwrap_or_else(|| {
            Ok(json!({ "intervalMinutes": 0, "enabled": false, "lastScanTime": null }))
        })
    }

    async fn update_scan_config(&self, interval_minutes: u32, enabled: bool) -> EngineResult<Value> {
        self.update_calls.lock().unwrap().push((interval_minutes, enabled));
        self.updates.lock().unwrap().pop_front().unwrap_or_else(|| {
            Ok(json!({
                "intervalMinutes": interval_minutes,
                "enabled": enabled,
                "lastScanTime": null
            }))
        })
    }

    async fn trigger_crawl(&self) -> EngineResult<()> {
        self.crawl_calls.fetch_add(1, Ordering::SeqCst);
        if self.hang_crawl.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        self.crawls.lock().unwrap().pop_front().unwrap_or(Ok(()))
    }
}

/// Hands out one pre-made channel per `connect` call.
#[derive(Default)]
pub struct ChannelTransport {
    sessions: Mutex<VecDeque<mpsc::UnboundedReceiver<EngineResult<String>>>>,
    pub connects: AtomicUsize,
}

impl ChannelTransport {
    /// Queue a session and return the sender that feeds it. Dropping the
    /// sender ends the session as a remote close.
    pub fn add_session(&self) -> mpsc::UnboundedSender<EngineResult<String>> {
        let (tx, rx) = mpsc::unbounded();
        self.sessions.lock().unwrap().push_back(rx);
        tx
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FrameTransport for ChannelTransport {
    async fn connect(&self, url: &str) -> EngineResult<FrameStream> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        match self.sessions.lock().unwrap().pop_front() {
            Some(rx) => Ok(rx.boxed()),
            None => Err(EngineError::Transport(format!("connection refused: {}", url))),
        }
    }
}
