use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;

use crate::config::QueryConfig;
use crate::error::{EngineError, EngineResult};

/// The request/response side of the signal service.
#[async_trait]
pub trait SignalApi: Send + Sync {
    /// `GET /recommendations/active`, raw body in whatever shape the server chose.
    async fn active_recommendations(&self, query: &QueryConfig) -> EngineResult<Value>;

    /// `GET /scan/config`
    async fn scan_config(&self) -> EngineResult<Value>;

    /// `POST /scan/config?interval&enabled`, returns the effective configuration.
    async fn update_scan_config(&self, interval_minutes: u32, enabled: bool) -> EngineResult<Value>;

    /// `POST /crawl`, acknowledgement only.
    async fn trigger_crawl(&self) -> EngineResult<()>;
}

pub struct HttpSignalApi {
    client: Client,
    base_url: String,
}

impl HttpSignalApi {
    pub fn new(base_url: String) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

#[async_trait]
impl SignalApi for HttpSignalApi {
    async fn active_recommendations(&self, query: &QueryConfig) -> EngineResult<Value> {
        let mut params = vec![
            ("risk", query.risk.clone()),
            ("horizon", query.horizon.clone()),
        ];
        if !query.sectors.is_empty() {
            params.push(("sectors", query.sectors.join(",")));
        }

        let body = self
            .client
            .get(self.url("/recommendations/active"))
            .query(&params)
            .send()
            .await?
            .error_for_status()?
            .json::<Value>()
            .await?;

        Ok(body)
    }

    async fn scan_config(&self) -> EngineResult<Value> {
        let body = self
            .client
            .get(self.url("/scan/config"))
            .send()
            .await?
            .error_for_status()?
            .json::<Value>()
            .await?;

        Ok(body)
    }

    async fn update_scan_config(&self, interval_minutes: u32, enabled: bool) -> EngineResult<Value> {
        let body = self
            .client
            .post(self.url("/scan/config"))
            .query(&[
                ("interval", interval_minutes.to_string()),
                ("enabled", enabled.to_string()),
            ])
            .send()
            .await?
            .error_for_status()?
            .json::<Value>()
            .await?;

        Ok(body)
    }

    async fn trigger_crawl(&self) -> EngineResult<()> {
        let response = self.client.post(self.url("/crawl")).send().await?;
        if !response.status().is_success() {
            return Err(EngineError::Transport(format!(
                "crawl trigger rejected: HTTP {}",
                response.status()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let api = HttpSignalApi::new("http://localhost:8000/api/".to_string());
        assert_eq!(api.url("/scan/config"), "http://localhost:8000/api/scan/config");
    }
}
