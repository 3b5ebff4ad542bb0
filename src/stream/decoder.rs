use serde_json::Value;

use crate::data::normalize::decode_signal;
use crate::data::types::{ScanProgressEvent, Signal};
use crate::error::FrameParseError;

/// Turns one raw frame into a typed message.
///
/// `Ok(None)` means the frame was well-formed but not addressed to us
/// (unknown `type`, keep-alives) and is ignored without counting as a failure.
pub trait FrameDecoder: Send + 'static {
    type Frame: Send + 'static;

    fn decode(&self, raw: &str) -> Result<Option<Self::Frame>, FrameParseError>;
}

const NEW_RECOMMENDATION: &str = "NEW_RECOMMENDATION";

/// `{"type":"NEW_RECOMMENDATION","data": Signal}`
pub struct SignalFrameDecoder;

impl FrameDecoder for SignalFrameDecoder {
    type Frame = Signal;

    fn decode(&self, raw: &str) -> Result<Option<Signal>, FrameParseError> {
        let frame: Value = serde_json::from_str(raw)?;
        let kind = frame
            .get("type")
            .and_then(Value::as_str)
            .ok_or(FrameParseError::MissingField("type"))?;

        if kind != NEW_RECOMMENDATION {
            return Ok(None);
        }

        let data = frame
            .get("data")
            .ok_or(FrameParseError::MissingField("data"))?;
        decode_signal(data).map(Some)
    }
}

/// Progress frames carry the event at the top level.
pub struct ProgressFrameDecoder;

impl FrameDecoder for ProgressFrameDecoder {
    type Frame = ScanProgressEvent;

    fn decode(&self, raw: &str) -> Result<Option<ScanProgressEvent>, FrameParseError> {
        let frame: Value = serde_json::from_str(raw)?;
        if frame.get("status").is_none() {
            // heartbeat / hello frames
            return Ok(None);
        }

        let mut event: ScanProgressEvent = serde_json::from_value(frame)?;
        event.total = event.total.max(event.current);
        event.percentage = event.percentage.clamp(0.0, 100.0);
        Ok(Some(event))
    }
}
