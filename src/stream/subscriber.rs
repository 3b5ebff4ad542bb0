use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::stream::decoder::FrameDecoder;
use crate::stream::transport::FrameTransport;

const FRAME_BUFFER: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// `close()` was called. Terminal.
    Explicit,
    /// The remote side ended the connection.
    Remote,
    /// Connect or read failure.
    Error(String),
}

impl CloseReason {
    pub fn is_transient(&self) -> bool {
        !matches!(self, CloseReason::Explicit)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriberState {
    Connecting,
    Open,
    Closed(CloseReason),
}

/// What the owner sees from `next()`.
#[derive(Debug)]
pub enum StreamEvent<F> {
    Opened,
    Message(F),
    Closed(CloseReason),
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SubscriberStats {
    pub sessions: u64,
    pub delivered: u64,
    pub ignored: u64,
    pub malformed: u64,
}

enum PumpEvent {
    Opened,
    Frame(String),
    Closed(CloseReason),
}

/// Owns one push connection at a time.
///
/// A background pump reads raw frames from the transport; decoding happens
/// on the owner's side in `next()`, so frames are handed over strictly in
/// arrival order and anything still buffered when `close()` runs is dropped.
/// The subscriber never reconnects on its own.
pub struct StreamSubscriber<D: FrameDecoder> {
    name: &'static str,
    decoder: D,
    transport: Arc<dyn FrameTransport>,
    url: Option<String>,
    state: SubscriberState,
    rx: Option<mpsc::Receiver<PumpEvent>>,
    pump: Option<JoinHandle<()>>,
    stats: SubscriberStats,
}

impl<D: FrameDecoder> StreamSubscriber<D> {
    pub fn new(name: &'static str, decoder: D, transport: Arc<dyn FrameTransport>) -> Self {
        Self {
            name,
            decoder,
            transport,
            url: None,
            state: SubscriberState::Closed(CloseReason::Explicit),
            rx: None,
            pump: None,
            stats: SubscriberStats::default(),
        }
    }

    pub fn state(&self) -> &SubscriberState {
        &self.state
    }

    pub fn stats(&self) -> SubscriberStats {
        self.stats
    }

    /// True while there is a session whose events have not been fully consumed.
    pub fn is_active(&self) -> bool {
        self.rx.is_some()
    }

    pub fn open(&mut self, url: &str) {
        self.stop_pump();

        let (tx, rx) = mpsc::channel(FRAME_BUFFER);
        let transport = self.transport.clone();
        let target = url.to_string();
        self.pump = Some(tokio::spawn(pump(self.name, transport, target, tx)));

        self.url = Some(url.to_string());
        self.rx = Some(rx);
        self.state = SubscriberState::Connecting;
        self.stats.sessions += 1;
        debug!("[{}] connecting to {}", self.name, url);
    }

    /// Reopen the last URL. Returns false if `open` was never called.
    pub fn reopen(&mut self) -> bool {
        match self.url.clone() {
            Some(url) => {
                self.open(&url);
                true
            }
            None => false,
        }
    }

    pub fn close(&mut self) {
        self.stop_pump();
        self.state = SubscriberState::Closed(CloseReason::Explicit);
        info!("[{}] closed", self.name);
    }

    /// Next delivered event, or `None` when no session is active.
    /// Cancel-safe: dropping the future loses no frames.
    pub async fn next(&mut self) -> Option<StreamEvent<D::Frame>> {
        loop {
            let received = self.rx.as_mut()?.recv().await;

            match received {
                Some(PumpEvent::Opened) => {
                    self.state = SubscriberState::Open;
                    info!("[{}] stream open", self.name);
                    return Some(StreamEvent::Opened);
                }
                Some(PumpEvent::Frame(raw)) => match self.decoder.decode(&raw) {
                    Ok(Some(frame)) => {
                        self.stats.delivered += 1;
                        return Some(StreamEvent::Message(frame));
                    }
                    Ok(None) => {
                        self.stats.ignored += 1;
                    }
                    Err(e) => {
                        self.stats.malformed += 1;
                        debug!("[{}] dropping malformed frame: {}", self.name, e);
                    }
                },
                Some(PumpEvent::Closed(reason)) => return Some(self.finish(reason)),
                None => return Some(self.finish(CloseReason::Remote)),
            }
        }
    }

    fn finish(&mut self, reason: CloseReason) -> StreamEvent<D::Frame> {
        self.rx = None;
        self.pump = None;
        warn!("[{}] stream closed: {:?}", self.name, reason);
        self.state = SubscriberState::Closed(reason.clone());
        StreamEvent::Closed(reason)
    }

    fn stop_pump(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
        self.rx = None;
    }
}

impl<D: FrameDecoder> Drop for StreamSubscriber<D> {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
    }
}

async fn pump(
    name: &'static str,
    transport: Arc<dyn FrameTransport>,
    url: String,
    tx: mpsc::Sender<PumpEvent>,
) {
    let mut frames = match transport.connect(&url).await {
        Ok(frames) => frames,
        Err(e) => {
            warn!("[{}] connect failed: {}", name, e);
            let _ = tx.send(PumpEvent::Closed(CloseReason::Error(e.to_string()))).await;
            return;
        }
    };

    if tx.send(PumpEvent::Opened).await.is_err() {
        return;
    }

    while let Some(item) = frames.next().await {
        let event = match item {
            Ok(text) => PumpEvent::Frame(text),
            Err(e) => {
                let _ = tx.send(PumpEvent::Closed(CloseReason::Error(e.to_string()))).await;
                return;
            }
        };
        if tx.send(event).await.is_err() {
            // owner closed or dropped us
            return;
        }
    }

    let _ = tx.send(PumpEvent::Closed(CloseReason::Remote)).await;
}

/// Fixed-delay reopen after a transient close. No backoff.
#[derive(Debug, Clone, Copy)]
pub struct ReconnectPolicy {
    pub enabled: bool,
    pub delay: Duration,
}

impl ReconnectPolicy {
    pub fn new(enabled: bool, delay: Duration) -> Self {
        Self { enabled, delay }
    }

    /// How long to wait before reopening, or `None` to stay closed.
    pub fn next_attempt(&self, reason: &CloseReason) -> Option<Duration> {
        if self.enabled && reason.is_transient() {
            Some(self.delay)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::types::ScanStatus;
    use crate::error::EngineError;
    use crate::stream::decoder::{ProgressFrameDecoder, SignalFrameDecoder};
    use crate::testing::ChannelTransport;

    fn signal_frame(symbol: &str, conviction: u32) -> String {
        format!(
            r#"{{"type":"NEW_RECOMMENDATION","data":{{"symbol":"{}","direction":"BUY","conviction":{}}}}}"#,
            symbol, conviction
        )
    }

    async fn opened<D: FrameDecoder>(sub: &mut StreamSubscriber<D>) {
        assert!(matches!(sub.next().await, Some(StreamEvent::Opened)));
        assert_eq!(sub.state(), &SubscriberState::Open);
    }

    #[tokio::test]
    async fn test_frames_delivered_in_arrival_order() {
        let transport = Arc::new(ChannelTransport::default());
        let tx = transport.add_session();
        let mut sub = StreamSubscriber::new("signals", SignalFrameDecoder, transport.clone());

        sub.open("ws://test/signals");
        assert_eq!(sub.state(), &SubscriberState::Connecting);
        opened(&mut sub).await;

        for (i, symbol) in ["TCS", "INFY", "WIPRO"].iter().enumerate() {
            tx.unbounded_send(Ok(signal_frame(symbol, 50 + i as u32))).unwrap();
        }

        let mut seen = Vec::new();
        for _ in 0..3 {
            match sub.next().await {
                Some(StreamEvent::Message(signal)) => seen.push(signal.symbol),
                other => panic!("unexpected event: {:?}", other),
            }
        }
        assert_eq!(seen, vec!["TCS", "INFY", "WIPRO"]);
        assert_eq!(sub.stats().delivered, 3);
    }

    #[tokio::test]
    async fn test_malformed_and_unknown_frames_swallowed() {
        let transport = Arc::new(ChannelTransport::default());
        let tx = transport.add_session();
        let mut sub = StreamSubscriber::new("signals", SignalFrameDecoder, transport.clone());
        sub.open("ws://test/signals");
        opened(&mut sub).await;

        tx.unbounded_send(Ok("{broken".to_string())).unwrap();
        tx.unbounded_send(Ok(r#"{"type":"PING"}"#.to_string())).unwrap();
        tx.unbounded_send(Ok(signal_frame("TCS", 85))).unwrap();

        match sub.next().await {
            Some(StreamEvent::Message(signal)) => assert_eq!(signal.symbol, "TCS"),
            other => panic!("unexpected event: {:?}", other),
        }
        let stats = sub.stats();
        assert_eq!(stats.malformed, 1);
        assert_eq!(stats.ignored, 1);
        assert_eq!(sub.state(), &SubscriberState::Open);
    }

    #[tokio::test]
    async fn test_remote_close_is_transient() {
        let transport = Arc::new(ChannelTransport::default());
        let tx = transport.add_session();
        let mut sub = StreamSubscriber::new("progress", ProgressFrameDecoder, transport.clone());
        sub.open("ws://test/progress");
        opened(&mut sub).await;

        tx.unbounded_send(Ok(r#"{"status":"starting","current":0,"total":10}"#.to_string()))
            .unwrap();
        drop(tx);

        match sub.next().await {
            Some(StreamEvent::Message(event)) => assert_eq!(event.status, ScanStatus::Starting),
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(matches!(
            sub.next().await,
            Some(StreamEvent::Closed(CloseReason::Remote))
        ));
        assert!(!sub.is_active());
        assert!(sub.next().await.is_none());
    }

    #[tokio::test]
    async fn test_read_error_closes_with_error() {
        let transport = Arc::new(ChannelTransport::default());
        let tx = transport.add_session();
        let mut sub = StreamSubscriber::new("signals", SignalFrameDecoder, transport.clone());
        sub.open("ws://test/signals");
        opened(&mut sub).await;

        tx.unbounded_send(Err(EngineError::Transport("reset by peer".to_string())))
            .unwrap();
        match sub.next().await {
            Some(StreamEvent::Closed(reason)) => {
                assert!(matches!(reason, CloseReason::Error(_)));
                assert!(reason.is_transient());
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_connect_failure_reported_as_close() {
        let transport = Arc::new(ChannelTransport::default());
        let mut sub = StreamSubscriber::new("signals", SignalFrameDecoder, transport.clone());
        sub.open("ws://test/signals");

        assert!(matches!(
            sub.next().await,
            Some(StreamEvent::Closed(CloseReason::Error(_)))
        ));
        assert_eq!(transport.connect_count(), 1);
    }

    #[tokio::test]
    async fn test_frames_in_flight_after_close_are_dropped() {
        let transport = Arc::new(ChannelTransport::default());
        let tx = transport.add_session();
        let mut sub = StreamSubscriber::new("signals", SignalFrameDecoder, transport.clone());
        sub.open("ws://test/signals");
        opened(&mut sub).await;

        tx.unbounded_send(Ok(signal_frame("TCS", 60))).unwrap();
        tx.unbounded_send(Ok(signal_frame("INFY", 70))).unwrap();
        // let the pump move both frames into the buffer
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        sub.close();
        assert_eq!(sub.state(), &SubscriberState::Closed(CloseReason::Explicit));
        assert!(sub.next().await.is_none());
        assert_eq!(sub.stats().delivered, 0);
        // the transport side now has nobody listening
        tokio::task::yield_now().await;
        let _ = tx.unbounded_send(Ok(signal_frame("WIPRO", 80)));
        assert!(sub.next().await.is_none());
    }

    #[tokio::test]
    async fn test_reopen_uses_last_url() {
        let transport = Arc::new(ChannelTransport::default());
        let first = transport.add_session();
        let second = transport.add_session();
        let mut sub = StreamSubscriber::new("signals", SignalFrameDecoder, transport.clone());

        assert!(!sub.reopen());
        sub.open("ws://test/signals");
        opened(&mut sub).await;
        drop(first);
        assert!(matches!(sub.next().await, Some(StreamEvent::Closed(_))));

        assert!(sub.reopen());
        opened(&mut sub).await;
        second.unbounded_send(Ok(signal_frame("HDFC", 90))).unwrap();
        assert!(matches!(sub.next().await, Some(StreamEvent::Message(_))));
        assert_eq!(sub.stats().sessions, 2);
        assert_eq!(transport.connect_count(), 2);
    }

    #[test]
    fn test_reconnect_policy() {
        let policy = ReconnectPolicy::new(true, Duration::from_secs(5));
        assert_eq!(policy.next_attempt(&CloseReason::Remote), Some(Duration::from_secs(5)));
        assert_eq!(
            policy.next_attempt(&CloseReason::Error("timeout".to_string())),
            Some(Duration::from_secs(5))
        );
        assert_eq!(policy.next_attempt(&CloseReason::Explicit), None);

        let disabled = ReconnectPolicy::new(false, Duration::from_secs(5));
        assert_eq!(disabled.next_attempt(&CloseReason::Remote), None);
    }
}
