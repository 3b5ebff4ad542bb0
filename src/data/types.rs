use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Bullish,
    Bearish,
}

impl Direction {
    /// Map the many upstream spellings onto a direction.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().replace(&[' ', '-'][..], "_").as_str() {
            "BULLISH" | "BULL" | "BUY" | "STRONG_BUY" | "LONG" => Some(Direction::Bullish),
            "BEARISH" | "BEAR" | "SELL" | "STRONG_SELL" | "SHORT" => Some(Direction::Bearish),
            _ => None,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Bullish => f.pad("BULLISH"),
            Direction::Bearish => f.pad("BEARISH"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceLevels {
    pub entry: f64,
    pub stop_loss: f64,
    pub target1: f64,
    pub target2: Option<f64>,
}

/// A trading idea. Keyed by `symbol` inside the store, never mutated in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub id: String,
    pub symbol: String,
    pub name: Option<String>,
    pub sector: Option<String>,
    pub direction: Direction,
    pub conviction: f64,
    pub price_levels: PriceLevels,
    pub score_breakdown: Option<BTreeMap<String, f64>>,
    pub rationale: Option<String>,
    /// Creation instant as reported upstream. `None` when the producer sent none.
    pub timestamp: Option<DateTime<Utc>>,
}

const PENDING_RATIONALES: [&str; 4] = [
    "pending",
    "analysis pending",
    "awaiting analysis",
    "generating rationale",
];

impl Signal {
    /// True once upstream analysis has attached a real rationale.
    pub fn has_rationale(&self) -> bool {
        match self.rationale.as_deref().map(str::trim) {
            None | Some("") => false,
            Some(text) => {
                let lower = text.to_lowercase();
                let lower = lower.trim_end_matches('.');
                !PENDING_RATIONALES.contains(&lower)
            }
        }
    }
}

/// Allowed scan cadences. Zero disables scheduled scans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScanInterval(u32);

impl ScanInterval {
    pub const ALLOWED: [u32; 6] = [0, 1, 5, 10, 30, 60];
    pub const DISABLED: ScanInterval = ScanInterval(0);

    pub fn minutes(&self) -> u32 {
        self.0
    }

    pub fn is_enabled(&self) -> bool {
        self.0 > 0
    }
}

impl TryFrom<u32> for ScanInterval {
    type Error = EngineError;

    fn try_from(minutes: u32) -> Result<Self, Self::Error> {
        if Self::ALLOWED.contains(&minutes) {
            Ok(ScanInterval(minutes))
        } else {
            Err(EngineError::InvalidInterval(minutes))
        }
    }
}

impl fmt::Display for ScanInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_enabled() {
            write!(f, "{}m", self.0)
        } else {
            write!(f, "off")
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanConfig {
    pub interval: ScanInterval,
    pub last_scan_time: Option<DateTime<Utc>>,
}

impl ScanConfig {
    pub fn enabled(&self) -> bool {
        self.interval.is_enabled()
    }
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            interval: ScanInterval::DISABLED,
            last_scan_time: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanStatus {
    Starting,
    Screening,
    Processing,
    Completed,
}

/// One frame of the progress stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanProgressEvent {
    pub status: ScanStatus,
    #[serde(default)]
    pub current: u32,
    #[serde(default)]
    pub total: u32,
    #[serde(default)]
    pub percentage: f64,
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default)]
    pub log: Option<String>,
}

#[cfg(test)]
pub(crate) fn sample_signal(symbol: &str, conviction: f64) -> Signal {
    Signal {
        id: format!("{}-idea", symbol.to_lowercase()),
        symbol: symbol.to_string(),
        name: None,
        sector: None,
        direction: Direction::Bullish,
        conviction,
        price_levels: PriceLevels {
            entry: 100.0,
            stop_loss: 95.0,
            target1: 110.0,
            target2: None,
        },
        score_breakdown: None,
        rationale: Some("Breakout above resistance on volume".to_string()),
        timestamp: DateTime::from_timestamp(1_700_000_000, 0),
    }
}
