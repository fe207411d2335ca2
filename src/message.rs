//! Message data model shared by the pipeline, the reassembler and consumers.

use serde::{Deserialize, Serialize};

/// Concatenation metadata carried in a fragment's user data header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConcatInfo {
    /// Reference number shared by every part of one logical message.
    pub reference: u16,
    /// 1-based index of this part.
    pub part: u8,
    /// Number of parts the sender announced.
    pub total: u8,
}

impl ConcatInfo {
    /// True when the fragment belongs to a multi-part group.
    pub fn is_multipart(&self) -> bool {
        self.part > 0 && self.total > 1
    }
}

/// One physical message unit as stored on the device, after decoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageFragment {
    /// Device-assigned storage index.
    pub handle: u32,
    pub part_index: u8,
    #[serde(skip)]
    pub raw: Vec<u8>,
    pub text: String,
    pub sender: String,
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concat: Option<ConcatInfo>,
}

impl MessageFragment {
    /// Concatenation key when this fragment is part of a multi-part group.
    pub fn concat_key(&self) -> Option<u16> {
        self.concat
            .filter(ConcatInfo::is_multipart)
            .map(|info| info.reference)
    }
}

/// A user-facing message reassembled from one or more fragments.
///
/// `fragments` is ordered by ascending `part_index` and `full_text` is the
/// concatenation of their texts in that order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogicalMessage {
    pub sender: String,
    pub timestamp: String,
    pub full_text: String,
    pub fragments: Vec<MessageFragment>,
}

impl LogicalMessage {
    pub fn single(fragment: MessageFragment) -> Self {
        Self {
            sender: fragment.sender.clone(),
            timestamp: fragment.timestamp.clone(),
            full_text: fragment.text.clone(),
            fragments: vec![fragment],
        }
    }

    /// Build a message from fragments of one group. Sorts by part index and
    /// takes sender/timestamp from the first part. Returns `None` for an empty
    /// group.
    pub fn from_parts(mut fragments: Vec<MessageFragment>) -> Option<Self> {
        fragments.sort_by_key(|f| (f.part_index, f.handle));
        let first = fragments.first()?;
        let sender = first.sender.clone();
        let timestamp = first.timestamp.clone();
        let full_text = fragments.iter().map(|f| f.text.as_str()).collect();
        Some(Self {
            sender,
            timestamp,
            full_text,
            fragments,
        })
    }

    /// Handle of the first fragment; used as the dedup key across poll cycles.
    pub fn primary_handle(&self) -> u32 {
        self.fragments.first().map(|f| f.handle).unwrap_or_default()
    }

    /// Every storage handle backing this message, in part order.
    pub fn handles(&self) -> Vec<u32> {
        self.fragments.iter().map(|f| f.handle).collect()
    }

    /// True when a multi-part message is missing one or more announced parts.
    pub fn is_incomplete(&self) -> bool {
        match self.fragments.first().and_then(|f| f.concat) {
            Some(info) if info.is_multipart() => self.fragments.len() < info.total as usize,
            _ => false,
        }
    }
}
