//! Message decoding capability.
//!
//! Turning raw stored bytes into sender, timestamp, text and concatenation
//! metadata is delegated to a [`MessageDecoder`]. The orchestrator only relies
//! on the trait; [`JsonRecordDecoder`] handles the JSON records written into a
//! spool directory by an upstream modem manager.

use crate::error::DecodeError;
use crate::message::ConcatInfo;
use serde::{Deserialize, Serialize};

/// Fields extracted from one stored fragment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodedMessage {
    pub sender: String,
    pub timestamp: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concat: Option<ConcatInfo>,
}

impl DecodedMessage {
    /// Serialize as a spool record.
    pub fn to_record(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap_or_default()
    }
}

pub trait MessageDecoder: Send + Sync + 'static {
    fn decode(&self, raw: &[u8]) -> Result<DecodedMessage, DecodeError>;
}

/// Decodes spool records of the form
/// `{"sender": "...", "timestamp": "...", "text": "...", "concat": {"reference": 7, "part": 1, "total": 2}}`.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonRecordDecoder;

impl MessageDecoder for JsonRecordDecoder {
    fn decode(&self, raw: &[u8]) -> Result<DecodedMessage, DecodeError> {
        // Producers sometimes leave NUL padding behind a partial rewrite.
        let trimmed = trim_padding(raw);
        if trimmed.is_empty() {
            return Err(DecodeError::Empty);
        }
        let decoded: DecodedMessage = serde_json::from_slice(trimmed)?;
        if let Some(info) = decoded.concat {
            if info.total > 1 && (info.part == 0 || info.part > info.total) {
                return Err(DecodeError::InvalidConcat {
                    part: info.part,
                    total: info.total,
                });
            }
        }
        Ok(decoded)
    }
}

fn trim_padding(raw: &[u8]) -> &[u8] {
    let start = raw
        .iter()
        .position(|b| *b != 0 && !b.is_ascii_whitespace())
        .unwrap_or(raw.len());
    let end = raw
        .iter()
        .rposition(|b| *b != 0 && !b.is_ascii_whitespace())
        .map(|i| i + 1)
        .unwrap_or(start);
    &raw[start..end]
}
