//! In-band control messages sent by the browser terminal.

use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMessage {
    /// Resize request. Zero dimensions are recognized but carry nothing to apply.
    Resize { cols: u16, rows: u16 },
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    cols: i64,
    rows: i64,
}

/// Negative dimensions become 0, oversized ones saturate.
fn clamp_dimension(value: i64) -> u16 {
    value.clamp(0, i64::from(u16::MAX)) as u16
}

impl ControlMessage {
    /// Classify a text frame. `None` means the frame is terminal data.
    ///
    /// Only a JSON object with a `resize` type and integer `cols`/`rows` is a
    /// control message; arrays and every other shape are data.
    pub fn parse(text: &str) -> Option<Self> {
        let value: Value = serde_json::from_str(text).ok()?;
        if !value.is_object() {
            return None;
        }
        let envelope: Envelope = serde_json::from_value(value).ok()?;
        if envelope.kind.eq_ignore_ascii_case("resize") {
            Some(ControlMessage::Resize {
                cols: clamp_dimension(envelope.cols),
                rows: clamp_dimension(envelope.rows),
            })
        } else {
            None
        }
    }
}
