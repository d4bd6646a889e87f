/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Events emitted by [`MstStorage`](crate::storage::MstStorage).
//!
//! An event for a given action indicates that the action has been completed. Events are published
//! on a channel to the [event bus](crate::event_bus), which runs the handlers registered for them on
//! [`MstNodeSpec`](crate::node::MstNodeSpec), including the default [logging](crate::logging)
//! handlers.

use std::sync::mpsc::Sender;
use std::time::SystemTime;

use crate::types::{
    batch::Batch,
    data_types::{CryptoHash, PeerKey},
};

pub enum Event {
    // Events that change the node's own state.
    InsertBatch(InsertBatchEvent),
    CompleteBatch(CompleteBatchEvent),
    ExpireBatch(ExpireBatchEvent),
    FinalizeBatch(FinalizeBatchEvent),
    // Events that involve gossip with a peer.
    ReceiveState(ReceiveStateEvent),
    ComputeDiff(ComputeDiffEvent),
}

impl Event {
    pub(crate) fn publish(event_publisher: &Option<Sender<Event>>, event: Event) {
        if let Some(event_publisher) = event_publisher {
            // The event bus shutting down first is not an error for storage.
            let _ = event_publisher.send(event);
        }
    }
}

/// A locally created batch was merged into the own state.
pub struct InsertBatchEvent {
    pub timestamp: SystemTime,
    pub batch: CryptoHash,
}

/// A batch gathered enough signatures. `batch` carries all of its signatures and is ready to be
/// handed to ordering.
pub struct CompleteBatchEvent {
    pub timestamp: SystemTime,
    pub batch: Batch,
}

/// A batch was dropped from the own state because it expired.
pub struct ExpireBatchEvent {
    pub timestamp: SystemTime,
    pub batch: CryptoHash,
}

/// `batch` was purged from storage because `transaction` was finalized.
pub struct FinalizeBatchEvent {
    pub timestamp: SystemTime,
    pub transaction: CryptoHash,
    pub batch: CryptoHash,
}

/// A state of `batches` batches was received from `origin` and merged.
pub struct ReceiveStateEvent {
    pub timestamp: SystemTime,
    pub origin: PeerKey,
    pub batches: usize,
}

/// A diff of `batches` batches was computed for `peer`.
pub struct ComputeDiffEvent {
    pub timestamp: SystemTime,
    pub peer: PeerKey,
    pub batches: usize,
}
