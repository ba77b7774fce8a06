use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, Copy, Hash)]
pub enum GameCategory {
    Slots,
    #[serde(rename = "Live Casino")]
    LiveCasino,
    Casino,
}

impl GameCategory {
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim() {
            "Slots" => Some(GameCategory::Slots),
            "Live Casino" => Some(GameCategory::LiveCasino),
            "Casino" => Some(GameCategory::Casino),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            GameCategory::Slots => "Slots",
            GameCategory::LiveCasino => "Live Casino",
            GameCategory::Casino => "Casino",
        }
    }
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Game {
    pub id: String,
    pub name: String,
    pub provider: String,
    pub category: GameCategory,
    pub image_url: String,
}

/// One named price inside a market, as a decimal multiplier.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
pub struct Outcome {
    pub name: String,
    pub value: f64,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
pub struct Market {
    pub name: String,
    pub odds: Vec<Outcome>,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SportEvent {
    pub id: String,
    pub name: String,
    pub participants: [String; 2],
    pub start_time: DateTime<Utc>,
    pub live: bool,
    pub markets: Vec<Market>,
}

impl SportEvent {
    pub fn market(&self, name: &str) -> Option<&Market> {
        self.markets.iter().find(|market| market.name == name)
    }
}

impl Market {
    pub fn outcome(&self, name: &str) -> Option<&Outcome> {
        self.odds.iter().find(|outcome| outcome.name == name)
    }
}
