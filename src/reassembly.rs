//! Message reassembly.
//!
//! Fragments carrying a multi-part concatenation header are grouped by their
//! reference number, ordered by part index and joined into one
//! [`LogicalMessage`]. Everything else passes through as a single-part
//! message. Output order is unspecified.
//!
//! By default a group is emitted with whatever parts the batch contained, even
//! if some are missing. With [`IncompletePolicy::Hold`] incomplete groups are
//! kept across batches until every announced part arrived or the hold timeout
//! elapsed.

use crate::logutil::mask_sender;
use crate::message::{LogicalMessage, MessageFragment};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncompletePolicy {
    /// Emit a group with the parts present in the batch.
    #[default]
    EmitPartial,
    /// Hold incomplete groups until complete or timed out.
    Hold,
}

/// Group fragments of one batch and build logical messages.
pub fn reassemble(fragments: HashMap<u32, MessageFragment>) -> Vec<LogicalMessage> {
    let mut messages = Vec::new();
    let mut groups: HashMap<u16, Vec<MessageFragment>> = HashMap::new();

    for (_, fragment) in fragments {
        match fragment.concat_key() {
            Some(key) => groups.entry(key).or_default().push(fragment),
            None => messages.push(LogicalMessage::single(fragment)),
        }
    }

    for (reference, parts) in groups {
        if let Some(message) = LogicalMessage::from_parts(parts) {
            if message.is_incomplete() {
                debug!(
                    "Emitting multipart ref={} with {} part(s) present",
                    reference,
                    message.fragments.len()
                );
            }
            messages.push(message);
        }
    }
    messages
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct HeldKey {
    sender: String,
    reference: u16,
}

#[derive(Debug)]
struct HeldGroup {
    total: u8,
    parts: BTreeMap<u8, MessageFragment>,
    first_seen: Instant,
}

impl HeldGroup {
    fn is_complete(&self) -> bool {
        self.parts.len() >= self.total as usize
    }
}

/// Stateful reassembler applying an [`IncompletePolicy`].
#[derive(Debug)]
pub struct Reassembler {
    policy: IncompletePolicy,
    hold_timeout: Duration,
    held: Mutex<HashMap<HeldKey, HeldGroup>>,
}

impl Reassembler {
    pub fn new(policy: IncompletePolicy, hold_timeout: Duration) -> Self {
        Self {
            policy,
            hold_timeout,
            held: Mutex::new(HashMap::new()),
        }
    }

    pub fn policy(&self) -> IncompletePolicy {
        self.policy
    }

    /// Number of multipart groups currently waiting for parts.
    pub fn held_groups(&self) -> usize {
        self.held.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn reassemble(&self, fragments: HashMap<u32, MessageFragment>) -> Vec<LogicalMessage> {
        match self.policy {
            IncompletePolicy::EmitPartial => reassemble(fragments),
            IncompletePolicy::Hold => self.reassemble_holding(fragments, Instant::now()),
        }
    }

    fn reassemble_holding(
        &self,
        fragments: HashMap<u32, MessageFragment>,
        now: Instant,
    ) -> Vec<LogicalMessage> {
        let mut messages = Vec::new();
        let mut held = self.held.lock().unwrap_or_else(|p| p.into_inner());

        for (_, fragment) in fragments {
            let Some(info) = fragment.concat.filter(|c| c.is_multipart()) else {
                messages.push(LogicalMessage::single(fragment));
                continue;
            };
            let key = HeldKey {
                sender: fragment.sender.clone(),
                reference: info.reference,
            };
            let group = held.entry(key).or_insert_with(|| HeldGroup {
                total: info.total,
                parts: BTreeMap::new(),
                first_seen: now,
            });
            group.total = group.total.max(info.total);
            group.parts.insert(fragment.part_index, fragment);
        }

        let ready: Vec<HeldKey> = held
            .iter()
            .filter(|(_, g)| g.is_complete() || now.duration_since(g.first_seen) >= self.hold_timeout)
            .map(|(k, _)| k.clone())
            .collect();

        for key in ready {
            let Some(group) = held.remove(&key) else {
                continue;
            };
            if !group.is_complete() {
                warn!(
                    "Multipart ref={} from {} timed out with {}/{} part(s); emitting partial text",
                    key.reference,
                    mask_sender(&key.sender),
                    group.parts.len(),
                    group.total
                );
            }
            if let Some(message) = LogicalMessage::from_parts(group.parts.into_values().collect()) {
                messages.push(message);
            }
        }
        messages
    }
}

impl Default for Reassembler {
    fn default() -> Self {
        Self::new(IncompletePolicy::EmitPartial, Duration::from_secs(60))
    }
}
