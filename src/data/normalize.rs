use std::collections::BTreeMap;

use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;

use crate::data::types::{Direction, PriceLevels, ScanConfig, ScanInterval, Signal};
use crate::error::{EngineError, FrameParseError};

/// Response shapes the recommendations endpoint has been seen to use.
#[derive(Debug, Clone, Copy)]
enum SnapshotShape {
    BareArray,
    Wrapped(&'static str),
}

/// Tried in order; the first match wins.
const SNAPSHOT_SHAPES: [SnapshotShape; 5] = [
    SnapshotShape::BareArray,
    SnapshotShape::Wrapped("recommendations"),
    SnapshotShape::Wrapped("data"),
    SnapshotShape::Wrapped("signals"),
    SnapshotShape::Wrapped("items"),
];

impl SnapshotShape {
    fn extract<'a>(&self, body: &'a Value) -> Option<&'a Vec<Value>> {
        match self {
            SnapshotShape::BareArray => body.as_array(),
            SnapshotShape::Wrapped(key) => body.get(*key).and_then(Value::as_array),
        }
    }
}

/// Find the signal list inside a recommendations response.
/// An unrecognised shape is an empty list, not an error.
pub fn signal_list(body: &Value) -> &[Value] {
    SNAPSHOT_SHAPES
        .iter()
        .find_map(|shape| shape.extract(body))
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

/// Decode every signal in a snapshot body, dropping entries that do not normalise.
pub fn decode_signal_list(body: &Value) -> Vec<Signal> {
    signal_list(body)
        .iter()
        .filter_map(|raw| match decode_signal(raw) {
            Ok(signal) => Some(signal),
            Err(e) => {
                tracing::warn!("Dropping snapshot entry: {}", e);
                None
            }
        })
        .collect()
}

pub fn decode_signal(raw: &Value) -> Result<Signal, FrameParseError> {
    let symbol = first(raw, &["symbol", "ticker"])
        .and_then(text)
        .filter(|s| !s.is_empty())
        .ok_or(FrameParseError::MissingField("symbol"))?;

    let direction_raw = first(raw, &["direction", "signal", "action", "recommendation"])
        .and_then(text)
        .ok_or(FrameParseError::MissingField("direction"))?;
    let direction = Direction::parse(&direction_raw).ok_or(FrameParseError::BadValue {
        field: "direction",
        value: direction_raw,
    })?;

    // Producers disagree on the name; conviction wins when both are present.
    let conviction = first(raw, &["conviction", "confidence"])
        .and_then(number)
        .ok_or(FrameParseError::MissingField("conviction"))?
        .clamp(0.0, 100.0);

    let levels_src = first(raw, &["priceLevels", "price_levels"]).unwrap_or(raw);
    let price_levels = PriceLevels {
        entry: level(levels_src, raw, &["entry", "entryPrice", "entry_price"]).unwrap_or(0.0),
        stop_loss: level(levels_src, raw, &["stopLoss", "stop_loss"]).unwrap_or(0.0),
        target1: level(
            levels_src,
            raw,
            &["target1", "target_1", "targetPrice", "target_price", "target"],
        )
        .unwrap_or(0.0),
        target2: level(levels_src, raw, &["target2", "target_2"]),
    };

    let score_breakdown = first(raw, &["scoreBreakdown", "score_breakdown"])
        .and_then(Value::as_object)
        .map(|obj| {
            obj.iter()
                .filter_map(|(k, v)| number(v).map(|n| (k.clone(), n)))
                .collect::<BTreeMap<_, _>>()
        });

    let timestamp = first(raw, &["timestamp", "createdAt", "created_at"]).and_then(instant);

    let id = first(raw, &["id", "_id", "recommendationId", "recommendation_id"])
        .and_then(text)
        .unwrap_or_else(|| symbol.clone());

    Ok(Signal {
        id,
        symbol,
        name: first(raw, &["name", "companyName", "company_name"]).and_then(text),
        sector: first(raw, &["sector"]).and_then(text),
        direction,
        conviction,
        price_levels,
        score_breakdown,
        rationale: first(raw, &["rationale", "reasoning", "analysis"]).and_then(text),
        timestamp,
    })
}

pub fn decode_scan_config(body: &Value) -> Result<ScanConfig, EngineError> {
    let body = body.get("config").filter(|c| c.is_object()).unwrap_or(body);
    if !body.is_object() {
        return Err(EngineError::Decode(format!("scan config is not an object: {}", body)));
    }

    let explicitly_disabled = body.get("enabled").and_then(Value::as_bool) == Some(false);
    let minutes = first(body, &["intervalMinutes", "interval_minutes", "interval"])
        .map(whole_minutes)
        .transpose()?;

    let interval = match (minutes, explicitly_disabled) {
        (_, true) => ScanInterval::DISABLED,
        (Some(m), false) => ScanInterval::try_from(m)
            .map_err(|_| EngineError::Decode(format!("unsupported scan interval: {}", m)))?,
        (None, false) => {
            return Err(EngineError::Decode("scan config has no interval".to_string()));
        }
    };

    let last_scan_time = first(body, &["lastScanTime", "last_scan_time", "lastScan"])
        .and_then(instant);

    Ok(ScanConfig {
        interval,
        last_scan_time,
    })
}

fn first<'a>(value: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .find_map(|key| value.get(*key).filter(|v| !v.is_null()))
}

fn level(nested: &Value, flat: &Value, keys: &[&str]) -> Option<f64> {
    first(nested, keys)
        .or_else(|| first(flat, keys))
        .and_then(number)
}

/// Interval minutes must be a non-negative integer, as a number or a string.
fn whole_minutes(value: &Value) -> Result<u32, EngineError> {
    let parsed = match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    };
    parsed
        .and_then(|m| u32::try_from(m).ok())
        .ok_or_else(|| EngineError::Decode(format!("scan interval is not whole minutes: {}", value)))
}

fn text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn number(value: &Value) -> Option<f64> {
    value
        .as_f64()
        .or_else(|| value.as_str().and_then(|s| s.trim().parse::<f64>().ok()))
        .filter(|n| n.is_finite())
}

fn instant(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        Value::Number(n) => n
            .as_i64()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw_signal(symbol: &str) -> Value {
        json!({
            "id": format!("rec-{}", symbol),
            "symbol": symbol,
            "direction": "BUY",
            "conviction": 72.5,
            "priceLevels": { "entry": 100.0, "stopLoss": 96.0, "target1": 108.0 },
            "rationale": "Momentum with sector tailwind",
            "timestamp": "2026-01-05T09:30:00Z"
        })
    }

    #[test]
    fn test_snapshot_shapes_in_priority_order() {
        let bare = json!([raw_signal("TCS")]);
        assert_eq!(decode_signal_list(&bare).len(), 1);

        let wrapped = json!({ "recommendations": [raw_signal("TCS"), raw_signal("INFY")] });
        assert_eq!(decode_signal_list(&wrapped).len(), 2);

        let data = json!({ "data": [raw_signal("WIPRO")] });
        assert_eq!(decode_signal_list(&data)[0].symbol, "WIPRO");

        // recommendations beats data when both exist
        let both = json!({ "data": [], "recommendations": [raw_signal("HDFC")] });
        assert_eq!(decode_signal_list(&both)[0].symbol, "HDFC");
    }

    #[test]
    fn test_unknown_shape_is_empty_not_error() {
        assert!(decode_signal_list(&json!({ "message": "no signals" })).is_empty());
        assert!(decode_signal_list(&json!(null)).is_empty());
    }

    #[test]
    fn test_bad_entries_dropped_from_snapshot() {
        let body = json!([raw_signal("TCS"), { "symbol": "XYZ", "direction": "HOLD" }, { "direction": "BUY" }]);
        let signals = decode_signal_list(&body);
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].symbol, "TCS");
    }

    #[test]
    fn test_confidence_fallback_and_flat_levels() {
        let raw = json!({
            "symbol": "RELIANCE",
            "signal": "bearish",
            "confidence": "64",
            "entry_price": 2500,
            "stop_loss": 2560,
            "target": 2400,
            "target_2": 2350,
            "created_at": 1_767_605_400_000_i64
        });
        let signal = decode_signal(&raw).unwrap();
        assert_eq!(signal.direction, Direction::Bearish);
        assert_eq!(signal.conviction, 64.0);
        assert_eq!(signal.id, "RELIANCE");
        assert_eq!(signal.price_levels.entry, 2500.0);
        assert_eq!(signal.price_levels.target1, 2400.0);
        assert_eq!(signal.price_levels.target2, Some(2350.0));
        assert_eq!(signal.timestamp.map(|t| t.timestamp_millis()), Some(1_767_605_400_000));
    }

    #[test]
    fn test_missing_conviction_is_undecodable() {
        let mut raw = raw_signal("TCS");
        raw.as_object_mut().unwrap().remove("conviction");
        assert!(matches!(
            decode_signal(&raw),
            Err(FrameParseError::MissingField("conviction"))
        ));

        raw["confidence"] = json!(null);
        assert!(decode_signal(&raw).is_err());

        raw["confidence"] = json!(55);
        assert_eq!(decode_signal(&raw).unwrap().conviction, 55.0);
    }

    #[test]
    fn test_missing_timestamp_is_stable() {
        let mut raw = raw_signal("TCS");
        raw.as_object_mut().unwrap().remove("timestamp");

        let first = decode_signal(&raw).unwrap();
        let second = decode_signal(&raw).unwrap();
        assert!(first.timestamp.is_none());
        assert_eq!(first, second);
    }

    #[test]
    fn test_conviction_preferred_over_confidence() {
        let mut raw = raw_signal("TCS");
        raw["confidence"] = json!(10);
        raw["conviction"] = json!(140);
        let signal = decode_signal(&raw).unwrap();
        assert_eq!(signal.conviction, 100.0);
    }

    #[test]
    fn test_score_breakdown_keeps_numeric_entries() {
        let mut raw = raw_signal("TCS");
        raw["scoreBreakdown"] = json!({ "technical": 12.5, "fundamental": -4, "note": "n/a" });
        let breakdown = decode_signal(&raw).unwrap().score_breakdown.unwrap();
        assert_eq!(breakdown.len(), 2);
        assert_eq!(breakdown["fundamental"], -4.0);
    }

    #[test]
    fn test_decode_scan_config() {
        let config = decode_scan_config(&json!({
            "intervalMinutes": 10,
            "enabled": true,
            "lastScanTime": null
        }))
        .unwrap();
        assert_eq!(config.interval.minutes(), 10);
        assert!(config.enabled());
        assert!(config.last_scan_time.is_none());

        let snake = decode_scan_config(&json!({
            "interval_minutes": 30,
            "last_scan_time": "2026-01-05T09:30:00Z"
        }))
        .unwrap();
        assert_eq!(snake.interval.minutes(), 30);
        assert!(snake.last_scan_time.is_some());
    }

    #[test]
    fn test_disabled_flag_overrides_interval() {
        let config = decode_scan_config(&json!({ "interval": 5, "enabled": false })).unwrap();
        assert!(!config.enabled());
    }

    #[test]
    fn test_scan_config_decode_errors() {
        assert!(matches!(
            decode_scan_config(&json!({ "interval": 15 })),
            Err(EngineError::Decode(_))
        ));
        assert!(matches!(decode_scan_config(&json!([])), Err(EngineError::Decode(_))));
        assert!(matches!(decode_scan_config(&json!({})), Err(EngineError::Decode(_))));
    }

    #[test]
    fn test_scan_interval_must_be_whole_minutes() {
        for bad in [json!(10.7), json!(-5), json!(-5.0), json!("ten"), json!(true)] {
            assert!(
                matches!(
                    decode_scan_config(&json!({ "intervalMinutes": bad.clone() })),
                    Err(EngineError::Decode(_))
                ),
                "accepted {}",
                bad
            );
        }

        let config = decode_scan_config(&json!({ "intervalMinutes": "60" })).unwrap();
        assert_eq!(config.interval.minutes(), 60);
        let config = decode_scan_config(&json!({ "intervalMinutes": 10 })).unwrap();
        assert_eq!(config.interval.minutes(), 10);
    }
}
