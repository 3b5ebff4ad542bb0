use std::sync::Arc;

use tracing::info;

use crate::config::QueryConfig;
use crate::data::api::SignalApi;
use crate::data::normalize::{decode_scan_config, decode_signal_list};
use crate::data::types::{ScanConfig, Signal};
use crate::error::EngineResult;

#[derive(Debug, Clone)]
pub struct Snapshot {
    pub signals: Vec<Signal>,
    pub scan_config: ScanConfig,
}

/// One-shot fetch of the current signal list and scan configuration.
/// Never retries; the caller keeps its existing state when this fails.
#[derive(Clone)]
pub struct SnapshotLoader {
    api: Arc<dyn SignalApi>,
    query: QueryConfig,
}

impl SnapshotLoader {
    pub fn new(api: Arc<dyn SignalApi>, query: QueryConfig) -> Self {
        Self { api, query }
    }

    pub async fn load(&self) -> EngineResult<Snapshot> {
        let (signals_body, config_body) = tokio::try_join!(
            self.api.active_recommendations(&self.query),
            self.api.scan_config(),
        )?;

        let signals = decode_signal_list(&signals_body);
        let scan_config = decode_scan_config(&config_body)?;

        info!(
            "Snapshot loaded: {} signals, scan interval {}",
            signals.len(),
            scan_config.interval
        );

        Ok(Snapshot {
            signals,
            scan_config,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use crate::testing::FakeApi;
    use serde_json::json;

    fn loader(api: &Arc<FakeApi>) -> SnapshotLoader {
        SnapshotLoader::new(api.clone(), QueryConfig::default())
    }

    #[tokio::test]
    async fn test_load_wrapped_response() {
        let api = Arc::new(FakeApi::default());
        api.push_recommendations(Ok(json!({
            "data": [{ "symbol": "TCS", "direction": "BULLISH", "conviction": 40 }]
        })));
        api.push_config(Ok(json!({ "intervalMinutes": 5, "enabled": true, "lastScanTime": null })));

        let snapshot = loader(&api).load().await.unwrap();
        assert_eq!(snapshot.signals.len(), 1);
        assert_eq!(snapshot.scan_config.interval.minutes(), 5);
    }

    #[tokio::test]
    async fn test_empty_signal_set_is_not_an_error() {
        let api = Arc::new(FakeApi::default());
        api.push_recommendations(Ok(json!({ "status": "ok" })));

        let snapshot = loader(&api).load().await.unwrap();
        assert!(snapshot.signals.is_empty());
    }

    #[tokio::test]
    async fn test_transport_failure_surfaces() {
        let api = Arc::new(FakeApi::default());
        api.push_recommendations(Err(EngineError::Transport("connection reset".to_string())));

        let result = loader(&api).load().await;
        assert!(matches!(result, Err(EngineError::Transport(_))));
    }

    #[tokio::test]
    async fn test_undecodable_config_is_decode_error() {
        let api = Arc::new(FakeApi::default());
        api.push_config(Ok(json!("maintenance")));

        let result = loader(&api).load().await;
        assert!(matches!(result, Err(EngineError::Decode(_))));
    }
}
