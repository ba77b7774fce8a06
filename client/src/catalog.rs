//! Normalizes upstream catalogue payloads into domain records.
//!
//! Upstream shapes drift: games may carry `title` or `name`, `image` or
//! `imageUrl`, numeric or string ids. Records that cannot be made whole are
//! skipped with a warning rather than failing the whole listing.

use crate::services::CatalogFeed;
use chrono::{DateTime, Utc};
use gobet_common::config::CatalogConfig;
use gobet_common::{Game, GameCategory, Market, Outcome, SportEvent};
use serde_json::Value;
use tracing::{debug, warn};

/// Events plus the stream for the first live one.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Sportsbook {
    pub events: Vec<SportEvent>,
    pub live_stream_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Lobby {
    pub games: Vec<Game>,
    pub sportsbook: Sportsbook,
}

pub struct CatalogGateway<F: CatalogFeed> {
    feed: F,
    fallback_stream_url: String,
}

impl<F: CatalogFeed> CatalogGateway<F> {
    pub fn new(feed: F, config: &CatalogConfig) -> Self {
        Self {
            feed,
            fallback_stream_url: config.fallback_stream_url.clone(),
        }
    }

    /// Games in `category`; "All" and "Casino" list everything. Any
    /// upstream failure yields an empty list.
    pub async fn games(&self, category: &str) -> Vec<Game> {
        let payload = match self.feed.fetch_games().await {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "game feed unavailable");
                return Vec::new();
            }
        };
        filter_games(normalize_games(&payload), category)
    }

    pub async fn events(&self) -> Vec<SportEvent> {
        match self.feed.fetch_events().await {
            Ok(payload) => normalize_events(&payload),
            Err(e) => {
                warn!(error = %e, "event feed unavailable");
                Vec::new()
            }
        }
    }

    /// Always yields something playable: the feed's URL or the fallback.
    pub async fn stream_url(&self, event_id: &str) -> String {
        match self.feed.fetch_stream(event_id).await {
            Ok(payload) => stream_url_from(&payload).unwrap_or_else(|| {
                debug!(%event_id, "no stream in payload, using fallback");
                self.fallback_stream_url.clone()
            }),
            Err(e) => {
                warn!(%event_id, error = %e, "stream lookup failed, using fallback");
                self.fallback_stream_url.clone()
            }
        }
    }

    /// Loads events first, then the stream of the first live one.
    pub async fn sportsbook(&self) -> Sportsbook {
        let events = self.events().await;
        let live_stream_url = match events.iter().find(|event| event.live) {
            Some(event) => Some(self.stream_url(&event.id).await),
            None => None,
        };
        Sportsbook {
            events,
            live_stream_url,
        }
    }

    /// Games and the sportsbook load concurrently.
    pub async fn lobby(&self, category: &str) -> Lobby {
        let (games, sportsbook) = futures::join!(self.games(category), self.sportsbook());
        Lobby { games, sportsbook }
    }
}

fn filter_games(games: Vec<Game>, category: &str) -> Vec<Game> {
    match category.trim() {
        "All" | "Casino" => games,
        other => match GameCategory::parse(other) {
            Some(wanted) => {
                let games: Vec<Game> = games
                    .into_iter()
                    .filter(|game| game.category == wanted)
                    .collect();
                debug!(category = wanted.as_str(), count = games.len(), "filtered games");
                games
            }
            None => {
                warn!(category = %other, "unknown game category");
                Vec::new()
            }
        },
    }
}

/// Accepts a bare array or one wrapped under `key` / `data`.
fn records<'a>(payload: &'a Value, key: &str) -> &'a [Value] {
    let list = payload
        .as_array()
        .or_else(|| payload.get(key).and_then(Value::as_array))
        .or_else(|| payload.get("data").and_then(Value::as_array));
    match list {
        Some(list) => list,
        None => {
            warn!(key, "payload carries no list, treating as empty");
            &[]
        }
    }
}

fn text(value: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|key| value.get(*key))
        .find_map(|field| match field {
            Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
}

pub fn normalize_games(payload: &Value) -> Vec<Game> {
    records(payload, "games")
        .iter()
        .filter_map(normalize_game)
        .collect()
}

pub fn normalize_game(raw: &Value) -> Option<Game> {
    let Some(id) = text(raw, &["id"]) else {
        warn!(record = %raw, "skipping game without id");
        return None;
    };
    let Some(name) = text(raw, &["title", "name"]) else {
        warn!(%id, "skipping game without a name");
        return None;
    };
    let category = match raw.get("category").and_then(Value::as_str) {
        Some(label) => GameCategory::parse(label).unwrap_or_else(|| {
            debug!(%id, %label, "unknown game category, filing under Casino");
            GameCategory::Casino
        }),
        None => GameCategory::Casino,
    };
    Some(Game {
        id,
        name,
        // an explicit provider is kept verbatim, even when blank
        provider: match raw.get("provider") {
            Some(Value::String(provider)) => provider.clone(),
            _ => "Unknown".into(),
        },
        category,
        image_url: text(raw, &["image", "imageUrl", "image_url"]).unwrap_or_default(),
    })
}

pub fn normalize_events(payload: &Value) -> Vec<SportEvent> {
    records(payload, "events")
        .iter()
        .filter_map(normalize_event)
        .collect()
}

pub fn normalize_event(raw: &Value) -> Option<SportEvent> {
    let id = text(raw, &["id"])?;
    let Some(name) = text(raw, &["name"]) else {
        warn!(%id, "skipping event without a name");
        return None;
    };

    let participants: Vec<String> = raw
        .get("participants")
        .and_then(Value::as_array)
        .map(|list| list.iter().filter_map(|p| p.as_str().map(String::from)).collect())
        .unwrap_or_default();
    let participants: [String; 2] = match participants.try_into() {
        Ok(pair) => pair,
        Err(found) => {
            warn!(%id, found = found.len(), "event needs exactly two participants, skipping");
            return None;
        }
    };

    let start_time = match text(raw, &["startTime", "start_time"])
        .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
    {
        Some(time) => time.with_timezone(&Utc),
        None => {
            warn!(%id, "event start time missing or unparseable, skipping");
            return None;
        }
    };

    let markets = raw
        .get("markets")
        .and_then(Value::as_array)
        .map(|list| list.iter().filter_map(normalize_market).collect())
        .unwrap_or_default();

    Some(SportEvent {
        id,
        name,
        participants,
        start_time,
        live: raw.get("live").and_then(Value::as_bool).unwrap_or(false),
        markets,
    })
}

fn normalize_market(raw: &Value) -> Option<Market> {
    let name = text(raw, &["name"])?;
    let odds = raw
        .get("odds")
        .and_then(Value::as_array)
        .map(|list| {
            list.iter()
                .filter_map(|outcome| {
                    Some(Outcome {
                        name: text(outcome, &["name"])?,
                        value: outcome.get("value").and_then(Value::as_f64)?,
                    })
                })
                .collect()
        })
        .unwrap_or_default();
    Some(Market { name, odds })
}

fn stream_url_from(payload: &Value) -> Option<String> {
    ["Url", "url"]
        .iter()
        .filter_map(|key| payload.get(*key).and_then(Value::as_str))
        .find(|url| !url.trim().is_empty())
        .map(String::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::StaticFeed;
    use async_trait::async_trait;
    use gobet_common::error::UpstreamFetchError;
    use serde_json::json;

    struct CannedFeed {
        games: Result<Value, UpstreamFetchError>,
        stream: Result<Value, UpstreamFetchError>,
    }

    #[async_trait]
    impl CatalogFeed for CannedFeed {
        async fn fetch_games(&self) -> Result<Value, UpstreamFetchError> {
            self.games.clone()
        }
        async fn fetch_events(&self) -> Result<Value, UpstreamFetchError> {
            StaticFeed.fetch_events().await
        }
        async fn fetch_stream(&self, _event_id: &str) -> Result<Value, UpstreamFetchError> {
            self.stream.clone()
        }
    }

    fn mixed_games() -> Value {
        json!([
            { "id": 7, "title": "Book of Ra", "provider": "Novomatic", "image": "ra.png", "category": "Slots" },
            { "id": "lr-1", "name": "Lightning Roulette", "imageUrl": "lr.png", "category": "Live Casino" },
            { "title": "No Id Here" },
            { "id": "bj", "name": "Blackjack" }
        ])
    }

    #[test]
    fn games_accept_either_field_spelling() {
        let games = normalize_games(&mixed_games());
        assert_eq!(games.len(), 3);
        assert_eq!(games[0].id, "7");
        assert_eq!(games[0].name, "Book of Ra");
        assert_eq!(games[0].image_url, "ra.png");
        assert_eq!(games[0].provider, "Novomatic");
        assert_eq!(games[0].category, GameCategory::Slots);
        assert_eq!(games[1].category, GameCategory::LiveCasino);
        assert_eq!(games[1].image_url, "lr.png");
        assert_eq!(games[1].provider, "Unknown");
        assert_eq!(games[2].category, GameCategory::Casino);
    }

    #[test]
    fn wrapped_payloads_are_unwrapped() {
        let games = normalize_games(&json!({ "games": [{ "id": 1, "name": "Keno" }] }));
        assert_eq!(games.len(), 1);
        assert!(normalize_games(&json!({ "error": "quota" })).is_empty());
    }

    #[test]
    fn category_filter() {
        let games = normalize_games(&mixed_games());
        assert_eq!(filter_games(games.clone(), "All").len(), 3);
        assert_eq!(filter_games(games.clone(), "Casino").len(), 3);
        let slots = filter_games(games.clone(), "Slots");
        assert_eq!(slots.len(), 1);
        assert_eq!(slots[0].name, "Book of Ra");
        assert!(filter_games(games, "Bingo").is_empty());
    }

    #[test]
    fn game_survives_serialization() {
        for (i, category) in [GameCategory::Slots, GameCategory::LiveCasino, GameCategory::Casino]
            .into_iter()
            .enumerate()
        {
            let game = Game {
                id: format!("g-{i}"),
                name: format!("{} table", category.as_str()),
                provider: if i == 0 { String::new() } else { "Evolution".into() },
                category,
                image_url: format!("https://img.example/{i}.png"),
            };
            let raw = serde_json::to_value(&game).unwrap();
            assert_eq!(normalize_game(&raw), Some(game));
        }
    }

    #[test]
    fn missing_provider_reads_as_unknown() {
        let game = normalize_game(&json!({ "id": 3, "name": "Keno" })).unwrap();
        assert_eq!(game.provider, "Unknown");
    }

    #[test]
    fn event_survives_serialization() {
        let event = SportEvent {
            id: "e1".into(),
            name: "Derby".into(),
            participants: ["Home".into(), "Away".into()],
            start_time: Utc::now(),
            live: false,
            markets: vec![Market {
                name: "Match Winner".into(),
                odds: vec![Outcome {
                    name: "Home".into(),
                    value: 1.85,
                }],
            }],
        };
        let raw = serde_json::to_value(&event).unwrap();
        assert_eq!(normalize_event(&raw), Some(event));
    }

    #[test]
    fn malformed_events_are_skipped() {
        let events = normalize_events(&json!([
            { "id": "e1", "name": "Solo", "participants": ["Only"], "startTime": "2024-05-01T18:00:00Z" },
            { "id": "e2", "name": "Undated", "participants": ["A", "B"], "startTime": "tomorrow" },
            { "id": "e3", "name": "Fine", "participants": ["A", "B"], "startTime": "2024-05-01T18:00:00Z",
              "markets": [{ "name": "Totals", "odds": [{ "name": "Over", "value": "x" }, { "name": "Under", "value": 1.9 }] }] }
        ]));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].id, "e3");
        assert!(!events[0].live);
        assert_eq!(events[0].markets[0].odds.len(), 1);
    }

    #[tokio::test]
    async fn failures_degrade_to_empty_and_fallback() {
        let gateway = CatalogGateway::new(
            CannedFeed {
                games: Err(UpstreamFetchError::Status(429)),
                stream: Err(UpstreamFetchError::Http("timeout".into())),
            },
            &CatalogConfig::default(),
        );
        let lobby = gateway.lobby("All").await;
        assert!(lobby.games.is_empty());
        assert_eq!(lobby.sportsbook.events.len(), 1);
        assert_eq!(
            lobby.sportsbook.live_stream_url.as_deref(),
            Some(CatalogConfig::default().fallback_stream_url.as_str())
        );
    }

    #[tokio::test]
    async fn stream_url_prefers_feed_value() {
        let gateway = CatalogGateway::new(
            CannedFeed {
                games: Ok(mixed_games()),
                stream: Ok(json!({ "Url": "https://live.example/e1.m3u8" })),
            },
            &CatalogConfig::default(),
        );
        assert_eq!(
            gateway.stream_url("evt-live-1").await,
            "https://live.example/e1.m3u8"
        );
        assert_eq!(gateway.games("Live Casino").await.len(), 1);
    }
}
