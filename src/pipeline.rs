//! Batch Read Pipeline.
//!
//! Enumerates the stored handles once, fetches and decodes each one, and hands
//! the decoded fragments to the reassembler. Handles are drained from a FIFO
//! queue so they are processed in the order the device listed them. A fetch
//! or decode failure only drops that one handle; the rest of the batch still
//! completes.
//!
//! The caller must hold the operation lock for the whole call.

use crate::bridge::OperationBridge;
use crate::decoder::MessageDecoder;
use crate::error::SmsError;
use crate::message::{LogicalMessage, MessageFragment};
use crate::metrics;
use crate::reassembly::{IncompletePolicy, Reassembler};
use crate::transport::ClientId;
use log::{debug, trace, warn};
use std::collections::{HashMap, VecDeque};

/// Result of one batch read.
#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub messages: Vec<LogicalMessage>,
    /// Handles the device reported.
    pub listed: usize,
    /// Handles dropped because they could not be fetched or decoded.
    pub failed: usize,
}

pub async fn read_all(
    bridge: &OperationBridge,
    decoder: &dyn MessageDecoder,
    reassembler: &Reassembler,
    client: ClientId,
) -> Result<BatchOutcome, SmsError> {
    let handles = bridge.enumerate(client).await?;
    if handles.is_empty() {
        trace!("No stored messages");
        // Held groups still need to expire when their parts are gone.
        let messages = match reassembler.policy() {
            IncompletePolicy::EmitPartial => Vec::new(),
            IncompletePolicy::Hold => reassembler.reassemble(HashMap::new()),
        };
        return Ok(BatchOutcome {
            messages,
            ..BatchOutcome::default()
        });
    }
    debug!("Device lists {} stored message(s)", handles.len());

    let listed = handles.len();
    let mut pending: VecDeque<u32> = handles.into();
    let mut fragments: HashMap<u32, MessageFragment> = HashMap::with_capacity(listed);
    let mut failed = 0usize;

    while let Some(handle) = pending.pop_front() {
        let raw = match bridge.fetch_raw(client, handle).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Skipping message {}: {}", handle, e);
                metrics::inc_fetch_failures();
                failed += 1;
                continue;
            }
        };
        let decoded = match decoder.decode(&raw) {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!("Skipping message {}: undecodable ({})", handle, e);
                metrics::inc_fetch_failures();
                failed += 1;
                continue;
            }
        };
        let part_index = match decoded.concat {
            Some(info) if info.is_multipart() => info.part,
            _ => 1,
        };
        let fragment = MessageFragment {
            handle,
            part_index,
            raw,
            text: decoded.text,
            sender: decoded.sender,
            timestamp: decoded.timestamp,
            concat: decoded.concat,
        };
        debug!(
            "Fragment {}: part {} ref {:?}, {} char(s)",
            handle,
            fragment.part_index,
            fragment.concat_key(),
            fragment.text.chars().count()
        );
        fragments.insert(handle, fragment);
    }

    let messages = reassembler.reassemble(fragments);
    Ok(BatchOutcome {
        messages,
        listed,
        failed,
    })
}
