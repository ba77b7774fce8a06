use async_trait::async_trait;
use chrono::Utc;
use gobet_common::config::CatalogConfig;
use gobet_common::error::UpstreamFetchError;
use serde_json::{json, Value};
use tracing::debug;

/// Raw upstream payloads; shaping them is the gateway's job.
#[async_trait]
pub trait CatalogFeed: Send + Sync {
    async fn fetch_games(&self) -> Result<Value, UpstreamFetchError>;

    async fn fetch_events(&self) -> Result<Value, UpstreamFetchError>;

    async fn fetch_stream(&self, event_id: &str) -> Result<Value, UpstreamFetchError>;
}

/// The two RapidAPI catalogues: casino games, and live TV for sports events.
pub struct RapidApiFeed {
    http: reqwest::Client,
    config: CatalogConfig,
}

impl RapidApiFeed {
    pub fn new(config: CatalogConfig) -> Result<Self, UpstreamFetchError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| UpstreamFetchError::Http(e.to_string()))?;
        Ok(Self { http, config })
    }

    async fn get(
        &self,
        host: &str,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<Value, UpstreamFetchError> {
        let key = self
            .config
            .api_key
            .as_deref()
            .ok_or(UpstreamFetchError::NotConfigured)?;
        let url = format!("https://{host}{path}");
        debug!(%url, "fetching feed");

        let response = self
            .http
            .get(&url)
            .query(query)
            .header("x-rapidapi-key", key)
            .header("x-rapidapi-host", host)
            .send()
            .await
            .map_err(|e| UpstreamFetchError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(UpstreamFetchError::Status(status.as_u16()));
        }
        response
            .json::<Value>()
            .await
            .map_err(|e| UpstreamFetchError::Malformed(e.to_string()))
    }
}

#[async_trait]
impl CatalogFeed for RapidApiFeed {
    async fn fetch_games(&self) -> Result<Value, UpstreamFetchError> {
        self.get(&self.config.games_host, "/", &[]).await
    }

    /// Events come from the built-in board.
    async fn fetch_events(&self) -> Result<Value, UpstreamFetchError> {
        Ok(builtin_events())
    }

    async fn fetch_stream(&self, event_id: &str) -> Result<Value, UpstreamFetchError> {
        self.get(&self.config.odds_host, "/api/v3/livetv", &[("eventid", event_id)])
            .await
    }
}

/// Offline feed: no games, the built-in event board, no streams.
#[derive(Debug, Default, Clone, Copy)]
pub struct StaticFeed;

#[async_trait]
impl CatalogFeed for StaticFeed {
    async fn fetch_games(&self) -> Result<Value, UpstreamFetchError> {
        Ok(json!([]))
    }

    async fn fetch_events(&self) -> Result<Value, UpstreamFetchError> {
        Ok(builtin_events())
    }

    async fn fetch_stream(&self, _event_id: &str) -> Result<Value, UpstreamFetchError> {
        Ok(Value::Null)
    }
}

pub fn builtin_events() -> Value {
    json!([
        {
            "id": "evt-live-1",
            "name": "Live Football",
            "participants": ["Team A", "Team B"],
            "startTime": Utc::now().to_rfc3339(),
            "live": true,
            "markets": [
                {
                    "name": "Match Winner",
                    "odds": [
                        { "name": "Team A", "value": 2.1 },
                        { "name": "Draw", "value": 3.0 },
                        { "name": "Team B", "value": 2.9 }
                    ]
                }
            ]
        }
    ])
}
