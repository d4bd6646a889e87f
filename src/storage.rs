/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Per-node storage of in-progress multi-signature batches.
//!
//! [`MstStorage`] owns two kinds of [`MstState`]:
//!
//! |Variable|Type|Description|
//! |---|---|---|
//! |Own State|[`MstState`]|Every batch this node currently believes is in progress: its own freshly created batches and everything merged in from peers. A superset join of everything ever merged in, minus expired and finalized batches.|
//! |Peer States|[`PeerKey`] -> [`MstState`]|For each peer, the join of every state received from that peer. Used only to avoid retransmitting batches the peer already has. Entries are created on first contact and never removed; their contents shrink through expiry and finalization.|
//! |Finalized|[`MstState`]|Batches removed by finalization, kept until the completer reports them expired. Copies of these batches arriving again from gossip or submission are ignored, so a finalized batch is never re-inserted or reported complete a second time.|
//!
//! # Entry points
//!
//! |Caller|Method|
//! |---|---|
//! |Gossip reception|[`apply`](MstStorage::apply)|
//! |Gossip round|[`get_diff_state`](MstStorage::get_diff_state)|
//! |Local submission|[`update_own_state`](MstStorage::update_own_state), [`batch_in_storage`](MstStorage::batch_in_storage)|
//! |Out-of-band candidates|[`whats_new`](MstStorage::whats_new)|
//! |Consensus|[`process_finalized_transaction`](MstStorage::process_finalized_transaction)|
//! |Expiry timer|[`extract_expired_transactions`](MstStorage::extract_expired_transactions)|
//!
//! Every mutating method returns the batches that it caused to become complete (possibly none) or
//! that it removed, as an `MstState`.
//!
//! # Concurrency
//!
//! `MstStorage` itself is a plain single-owner value. Actors running on different threads share it
//! through [`SharedMstStorage`], which serializes every mutation behind one lock.

use std::{
    collections::{hash_map, HashMap},
    sync::{mpsc::Sender, Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
    time::SystemTime,
};

use crate::{
    completer::Completer,
    events::*,
    state::MstState,
    types::{
        batch::Batch,
        data_types::{CryptoHash, PeerKey, Timestamp},
    },
};

/// Own state plus the last known state of every peer.
pub struct MstStorage {
    completer: Arc<dyn Completer>,
    own_state: MstState,
    peer_states: HashMap<PeerKey, MstState>,
    finalized: MstState,
    event_publisher: Option<Sender<Event>>,
}

impl MstStorage {
    /// Create an empty storage whose states are all bound to `completer`.
    pub fn new(completer: Arc<dyn Completer>) -> MstStorage {
        MstStorage::with_event_publisher(completer, None)
    }

    /// Create an empty storage that publishes [events](crate::events) on `event_publisher`.
    pub fn with_event_publisher(
        completer: Arc<dyn Completer>,
        event_publisher: Option<Sender<Event>>,
    ) -> MstStorage {
        MstStorage {
            own_state: MstState::empty(Arc::clone(&completer)),
            finalized: MstState::empty(Arc::clone(&completer)),
            completer,
            peer_states: HashMap::new(),
            event_publisher,
        }
    }

    pub fn completer(&self) -> &Arc<dyn Completer> {
        &self.completer
    }

    pub fn own_state(&self) -> &MstState {
        &self.own_state
    }

    /// Get the tracked state of `peer_key`, or `None` if this storage never had contact with the peer.
    pub fn peer_state(&self, peer_key: &PeerKey) -> Option<&MstState> {
        self.peer_states.get(peer_key)
    }

    /// Merge `new_state`, received from `peer_key`, into the tracked state of that peer and into the own
    /// state. Batches that were already finalized are skipped. Returns the batches that became complete
    /// in the own state.
    pub fn apply(&mut self, peer_key: &PeerKey, new_state: &MstState) -> MstState {
        Event::publish(
            &self.event_publisher,
            Event::ReceiveState(ReceiveStateEvent {
                timestamp: SystemTime::now(),
                origin: peer_key.clone(),
                batches: new_state.len(),
            }),
        );

        let new_state = self.unfinalized(new_state);
        tracked_state(&mut self.peer_states, &self.completer, peer_key).merge(&new_state);
        let completed = self.own_state.merge(&new_state);
        self.publish_completed(&completed);
        completed
    }

    /// Merge a locally created `batch` into the own state. No peer state is touched. Returns the
    /// batches that became complete.
    ///
    /// A batch that was already finalized is ignored.
    pub fn update_own_state(&mut self, batch: Batch) -> MstState {
        if self.finalized.contains_batch(&batch) {
            log::debug!("Ignoring finalized batch {}", batch.hash());
            return MstState::empty(Arc::clone(&self.completer));
        }

        Event::publish(
            &self.event_publisher,
            Event::InsertBatch(InsertBatchEvent {
                timestamp: SystemTime::now(),
                batch: batch.hash(),
            }),
        );

        let completed = self.own_state.merge_batch(batch);
        self.publish_completed(&completed);
        completed
    }

    /// Drop every expired batch from every peer state and from the own state, and forget finalized
    /// batches that expired. Returns the batches that expired in the own state.
    pub fn extract_expired_transactions(&mut self, now: Timestamp) -> MstState {
        for peer_state in self.peer_states.values_mut() {
            peer_state.erase_expired(now);
        }
        self.finalized.erase_expired(now);
        let expired = self.own_state.extract_expired(now);

        for batch in expired.batches() {
            Event::publish(
                &self.event_publisher,
                Event::ExpireBatch(ExpireBatchEvent {
                    timestamp: SystemTime::now(),
                    batch: batch.hash(),
                }),
            );
        }
        expired
    }

    /// Compute what the own state holds that `peer_key` is not known to hold, excluding batches that
    /// are expired at `now`. This is the payload of a gossip round to that peer.
    pub fn get_diff_state(&mut self, peer_key: &PeerKey, now: Timestamp) -> MstState {
        let peer_state = tracked_state(&mut self.peer_states, &self.completer, peer_key);
        let mut diff = &self.own_state - &*peer_state;
        diff.erase_expired(now);

        Event::publish(
            &self.event_publisher,
            Event::ComputeDiff(ComputeDiffEvent {
                timestamp: SystemTime::now(),
                peer: peer_key.clone(),
                batches: diff.len(),
            }),
        );
        diff
    }

    /// Compute the part of `new_state` that the own state does not hold yet and that was not
    /// finalized, without mutating anything.
    pub fn whats_new(&self, new_state: &MstState) -> MstState {
        &self.unfinalized(new_state) - &self.own_state
    }

    /// Check whether the own state holds `batch`, regardless of signatures. Peer states are not
    /// consulted.
    pub fn batch_in_storage(&self, batch: &Batch) -> bool {
        self.own_state.contains_batch(batch)
    }

    /// Purge every batch identified by `hash` (either as the batch hash or as the hash of one of its
    /// transactions) from every peer state and from the own state. The purged batches are remembered
    /// until they expire.
    pub fn process_finalized_transaction(&mut self, hash: &CryptoHash) {
        for peer_state in self.peer_states.values_mut() {
            self.finalized.merge(&peer_state.erase_by_transaction_hash(hash));
        }
        let finalized = self.own_state.erase_by_transaction_hash(hash);
        self.finalized.merge(&finalized);

        for batch in finalized.batches() {
            Event::publish(
                &self.event_publisher,
                Event::FinalizeBatch(FinalizeBatchEvent {
                    timestamp: SystemTime::now(),
                    transaction: *hash,
                    batch: batch.hash(),
                }),
            );
        }
    }

    // Copy `state` without the batches that were already finalized.
    fn unfinalized(&self, state: &MstState) -> MstState {
        let mut unfinalized = state.clone();
        unfinalized.retain(|batch| !self.finalized.contains_batch(batch));
        unfinalized
    }

    fn publish_completed(&self, completed: &MstState) {
        for batch in completed.batches() {
            Event::publish(
                &self.event_publisher,
                Event::CompleteBatch(CompleteBatchEvent {
                    timestamp: SystemTime::now(),
                    batch: batch.clone(),
                }),
            );
        }
    }
}

// Get the tracked state of `peer_key`, creating an empty one on first contact.
fn tracked_state<'a>(
    peer_states: &'a mut HashMap<PeerKey, MstState>,
    completer: &Arc<dyn Completer>,
    peer_key: &PeerKey,
) -> &'a mut MstState {
    match peer_states.entry(peer_key.clone()) {
        hash_map::Entry::Occupied(entry) => entry.into_mut(),
        hash_map::Entry::Vacant(entry) => {
            log::trace!("Tracking new peer {}", peer_key);
            entry.insert(MstState::empty(Arc::clone(completer)))
        }
    }
}

/// Cloneable, thread-safe handle to an [`MstStorage`].
///
/// Every mutating call holds the write lock for exactly one `MstStorage` operation. Read-only
/// queries hold the read lock, so they may run concurrently with each other but never with a
/// mutation.
#[derive(Clone)]
pub struct SharedMstStorage(Arc<RwLock<MstStorage>>);

impl SharedMstStorage {
    pub fn new(storage: MstStorage) -> SharedMstStorage {
        SharedMstStorage(Arc::new(RwLock::new(storage)))
    }

    pub fn apply(&self, peer_key: &PeerKey, new_state: &MstState) -> MstState {
        self.write().apply(peer_key, new_state)
    }

    pub fn update_own_state(&self, batch: Batch) -> MstState {
        self.write().update_own_state(batch)
    }

    pub fn extract_expired_transactions(&self, now: Timestamp) -> MstState {
        self.write().extract_expired_transactions(now)
    }

    pub fn get_diff_state(&self, peer_key: &PeerKey, now: Timestamp) -> MstState {
        self.write().get_diff_state(peer_key, now)
    }

    pub fn whats_new(&self, new_state: &MstState) -> MstState {
        self.read().whats_new(new_state)
    }

    pub fn batch_in_storage(&self, batch: &Batch) -> bool {
        self.read().batch_in_storage(batch)
    }

    pub fn process_finalized_transaction(&self, hash: &CryptoHash) {
        self.write().process_finalized_transaction(hash)
    }

    /// Get a copy of the own state.
    pub fn own_state(&self) -> MstState {
        self.read().own_state().clone()
    }

    /// Get a copy of the tracked state of `peer_key`, if any.
    pub fn peer_state(&self, peer_key: &PeerKey) -> Option<MstState> {
        self.read().peer_state(peer_key).cloned()
    }

    /// Get a read guard over the storage for running several queries against one consistent view.
    pub fn read(&self) -> RwLockReadGuard<'_, MstStorage> {
        // Storage operations are total, so a guard poisoned by a panicking caller still guards a
        // consistent storage.
        self.0.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, MstStorage> {
        self.0.write().unwrap_or_else(PoisonError::into_inner)
    }
}
