/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The mergeable collection of partially-signed batches, [`MstState`].
//!
//! An `MstState` holds at most one copy of every batch, keyed by the batch's
//! [identity hash](crate::types::batch::Batch::hash). States form a join-semilattice under
//! [`merge`](MstState::merge): merging is commutative and idempotent with respect to the batches and
//! signatures held, and never loses a signature.
//!
//! # Operations
//!
//! |Operation|Mutates `self`|Returns|
//! |---|---|---|
//! |[`merge`](MstState::merge)|yes|Batches that became complete because of the merge.|
//! |[`merge_with_updates`](MstState::merge_with_updates)|yes|Completed batches, and batches that were inserted or gained signatures.|
//! |[`difference`](MstState::difference) (`&a - &b`)|no|Batches of `a` that `b` does not hold, or holds with fewer signatures.|
//! |[`extract_expired`](MstState::extract_expired)|yes|Batches removed because they expired.|
//! |[`erase_expired`](MstState::erase_expired)|yes|Nothing.|
//! |[`erase_by_transaction_hash`](MstState::erase_by_transaction_hash)|yes|Batches removed because they were finalized.|
//!
//! # Completion and expiry
//!
//! Completion is reported by the merge that completes a batch, whatever the batch's age, so a batch
//! that gathers its last signature is reported before any expiry sweep can remove it. After that,
//! `extract_expired` and `erase_expired` apply [`Completer::is_expired`] as is: a complete batch that
//! is never finalized is dropped once the completer reports it expired.

use std::{
    collections::{btree_map, BTreeMap, BTreeSet},
    fmt::{self, Debug, Formatter},
    ops::Sub,
    sync::Arc,
};

use borsh::{BorshDeserialize, BorshSerialize};

use crate::{
    completer::Completer,
    types::{
        batch::{Batch, BatchBytes, BatchError},
        data_types::{CryptoHash, Timestamp},
    },
};

/// Ordered collection of distinct batches bound to a shared [`Completer`].
#[derive(Clone)]
pub struct MstState {
    completer: Arc<dyn Completer>,
    batches: BTreeMap<CryptoHash, Batch>,
    // Every batch in `batches` appears here exactly once, oldest first.
    expiry_index: BTreeSet<(Timestamp, CryptoHash)>,
}

/// Outcome of [`MstState::merge_with_updates`].
#[derive(Clone, Debug)]
pub struct StateUpdateResult {
    /// Batches that transitioned to complete during the merge, as they are after the merge.
    pub completed: MstState,

    /// Batches that were inserted or gained at least one signature during the merge, as they are after
    /// the merge.
    pub updated: MstState,
}

impl MstState {
    /// Create a state with no batches, bound to `completer`.
    pub fn empty(completer: Arc<dyn Completer>) -> MstState {
        MstState {
            completer,
            batches: BTreeMap::new(),
            expiry_index: BTreeSet::new(),
        }
    }

    /// Create a state holding only `batch`.
    pub fn from_batch(completer: Arc<dyn Completer>, batch: Batch) -> MstState {
        let mut state = MstState::empty(completer);
        state.raw_insert(batch);
        state
    }

    /// Rebuild a state from its serializable representation.
    ///
    /// Duplicate batches in `bytes` are merged. Signatures are not verified.
    pub fn from_bytes(
        completer: Arc<dyn Completer>,
        bytes: MstStateBytes,
    ) -> Result<MstState, BatchError> {
        let mut state = MstState::empty(completer);
        for batch_bytes in bytes.0 {
            state.merge_batch(Batch::try_from(batch_bytes)?);
        }
        Ok(state)
    }

    /// Get the serializable representation of this state.
    pub fn to_bytes(&self) -> MstStateBytes {
        MstStateBytes(self.batches.values().map(BatchBytes::from).collect())
    }

    pub fn completer(&self) -> &Arc<dyn Completer> {
        &self.completer
    }

    /// Merge `other` into this state.
    ///
    /// For every batch in `other`: if this state holds a batch with the same hash, the signatures of
    /// both are merged using [`Completer::merge_signatures`]; otherwise the batch is inserted.
    ///
    /// Returns the batches that were not complete (or not present) before the merge and are complete
    /// after it. Batches that were already complete are never reported again.
    pub fn merge(&mut self, other: &MstState) -> MstState {
        self.merge_with_updates(other).completed
    }

    /// Merge a single `batch` into this state. See [`merge`](Self::merge).
    pub fn merge_batch(&mut self, batch: Batch) -> MstState {
        let mut result = self.new_update_result();
        self.insert_one(&mut result, batch);
        result.completed
    }

    /// Merge `other` into this state, reporting both the batches that became complete and the batches
    /// that were inserted or gained signatures.
    pub fn merge_with_updates(&mut self, other: &MstState) -> StateUpdateResult {
        let mut result = self.new_update_result();
        for batch in other.batches.values() {
            self.insert_one(&mut result, batch.clone());
        }
        result
    }

    fn new_update_result(&self) -> StateUpdateResult {
        StateUpdateResult {
            completed: MstState::empty(Arc::clone(&self.completer)),
            updated: MstState::empty(Arc::clone(&self.completer)),
        }
    }

    fn insert_one(&mut self, result: &mut StateUpdateResult, batch: Batch) {
        let completer = Arc::clone(&self.completer);
        match self.batches.entry(batch.hash()) {
            btree_map::Entry::Occupied(mut entry) => {
                let local = entry.get_mut();
                let was_completed = completer.is_completed(local);
                if completer.merge_signatures(local, &batch) {
                    result.updated.raw_insert(local.clone());
                    if !was_completed && completer.is_completed(local) {
                        result.completed.raw_insert(local.clone());
                    }
                }
            }
            btree_map::Entry::Vacant(entry) => {
                if completer.is_completed(&batch) {
                    result.completed.raw_insert(batch.clone());
                }
                result.updated.raw_insert(batch.clone());
                self.expiry_index
                    .insert((batch.created_time(), batch.hash()));
                entry.insert(batch);
            }
        }
    }

    /// Compute the batches of this state that `other` does not know about: those whose hash is absent
    /// from `other`, and those that `other` holds without some of the signatures held here.
    ///
    /// Batches are returned whole, with every signature held in this state. Neither operand is
    /// mutated.
    pub fn difference(&self, other: &MstState) -> MstState {
        let mut difference = MstState::empty(Arc::clone(&self.completer));
        for (hash, batch) in &self.batches {
            let known = other
                .batches
                .get(hash)
                .is_some_and(|theirs| theirs.covers_signatures_of(batch));
            if !known {
                difference.raw_insert(batch.clone());
            }
        }
        difference
    }

    /// Check whether this state holds a batch with the same hash as `batch`, regardless of signatures.
    pub fn contains_batch(&self, batch: &Batch) -> bool {
        self.contains_hash(&batch.hash())
    }

    pub fn contains_hash(&self, hash: &CryptoHash) -> bool {
        self.batches.contains_key(hash)
    }

    /// Remove every batch that the completer reports as expired at `now`, returning the removed
    /// batches.
    pub fn extract_expired(&mut self, now: Timestamp) -> MstState {
        let mut expired = MstState::empty(Arc::clone(&self.completer));
        for hash in self.expired_hashes(now) {
            if let Some(batch) = self.remove(&hash) {
                expired.raw_insert(batch);
            }
        }
        expired
    }

    /// Remove every batch that the completer reports as expired at `now`.
    pub fn erase_expired(&mut self, now: Timestamp) {
        for hash in self.expired_hashes(now) {
            self.remove(&hash);
        }
    }

    fn expired_hashes(&self, now: Timestamp) -> Vec<CryptoHash> {
        self.expiry_index
            .iter()
            .filter_map(|(_, hash)| self.batches.get(hash))
            .filter(|batch| self.completer.is_expired(batch, now))
            .map(Batch::hash)
            .collect()
    }

    /// Remove the batch whose hash is `hash`, along with any batch that contains a transaction whose
    /// hash is `hash`. Returns the removed batches.
    pub fn erase_by_transaction_hash(&mut self, hash: &CryptoHash) -> MstState {
        let matching: Vec<CryptoHash> = self
            .batches
            .values()
            .filter(|batch| batch.hash() == *hash || batch.contains_transaction(hash))
            .map(Batch::hash)
            .collect();

        let mut erased = MstState::empty(Arc::clone(&self.completer));
        for batch_hash in matching {
            if let Some(batch) = self.remove(&batch_hash) {
                erased.raw_insert(batch);
            }
        }
        erased
    }

    /// Keep only the batches for which `keep` returns `true`.
    pub fn retain(&mut self, mut keep: impl FnMut(&Batch) -> bool) {
        let dropped: Vec<CryptoHash> = self
            .batches
            .values()
            .filter(|batch| !keep(batch))
            .map(Batch::hash)
            .collect();
        for hash in dropped {
            self.remove(&hash);
        }
    }

    pub fn get(&self, hash: &CryptoHash) -> Option<&Batch> {
        self.batches.get(hash)
    }

    /// Iterate through the batches in this state in ascending order of their hashes.
    pub fn batches(&self) -> btree_map::Values<'_, CryptoHash, Batch> {
        self.batches.values()
    }

    pub fn hashes(&self) -> btree_map::Keys<'_, CryptoHash, Batch> {
        self.batches.keys()
    }

    pub fn into_batches(self) -> Vec<Batch> {
        self.batches.into_values().collect()
    }

    pub fn len(&self) -> usize {
        self.batches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    // Insert `batch`, replacing any batch with the same hash without merging signatures.
    fn raw_insert(&mut self, batch: Batch) {
        self.expiry_index
            .insert((batch.created_time(), batch.hash()));
        self.batches.insert(batch.hash(), batch);
    }

    fn remove(&mut self, hash: &CryptoHash) -> Option<Batch> {
        let batch = self.batches.remove(hash)?;
        self.expiry_index.remove(&(batch.created_time(), batch.hash()));
        Some(batch)
    }
}

impl Sub<&MstState> for &MstState {
    type Output = MstState;

    fn sub(self, rhs: &MstState) -> MstState {
        self.difference(rhs)
    }
}

/// Two states are equal if they hold the same batches with the same signatures. The completers they
/// are bound to are not compared.
impl PartialEq for MstState {
    fn eq(&self, other: &Self) -> bool {
        self.batches == other.batches
    }
}

impl Eq for MstState {}

impl Debug for MstState {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.batches.values()).finish()
    }
}

/// Intermediate representation of [`MstState`] for serialization and deserialization.
///
/// See [`BatchBytes`] for why batches are not serialized directly.
#[derive(Clone, BorshSerialize, BorshDeserialize)]
pub struct MstStateBytes(Vec<BatchBytes>);

impl MstStateBytes {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{
        completer::DefaultCompleter,
        types::{
            batch::Transaction,
            crypto_primitives::{Keypair, SigningKey},
        },
    };

    const TTL: Duration = Duration::from_millis(1_000);

    fn completer() -> Arc<dyn Completer> {
        Arc::new(DefaultCompleter::new(TTL))
    }

    fn keypair(seed: u8) -> Keypair {
        Keypair::new(SigningKey::from_bytes(&[seed; 32]))
    }

    fn batch(payload: &[u8], signers: &[&Keypair], created: u64) -> Batch {
        Batch::new(
            vec![Transaction::new(payload.to_vec())],
            signers.iter().map(|signer| signer.public()),
            Timestamp::new(created),
        )
        .unwrap()
    }

    fn signed(mut batch: Batch, by: &[&Keypair]) -> Batch {
        for signer in by {
            batch.sign(signer).unwrap();
        }
        batch
    }

    fn state_of(batches: impl IntoIterator<Item = Batch>) -> MstState {
        let mut state = MstState::empty(completer());
        for batch in batches {
            state.merge_batch(batch);
        }
        state
    }

    #[test]
    fn merge_reports_completion_exactly_once() {
        let (alice, bob) = (keypair(1), keypair(2));
        let unsigned = batch(b"a", &[&alice, &bob], 0);

        let mut state = state_of([signed(unsigned.clone(), &[&alice])]);
        let completed = state.merge(&state_of([signed(unsigned.clone(), &[&bob])]));
        assert_eq!(completed.len(), 1);
        assert_eq!(completed.get(&unsigned.hash()).unwrap().signature_count(), 2);

        // The same signatures arriving again complete nothing.
        let completed = state.merge(&state_of([signed(unsigned.clone(), &[&alice, &bob])]));
        assert!(completed.is_empty());
    }

    #[test]
    fn inserting_a_complete_batch_reports_it() {
        let alice = keypair(1);
        let complete = signed(batch(b"a", &[&alice], 0), &[&alice]);

        let mut state = MstState::empty(completer());
        assert_eq!(state.merge_batch(complete.clone()).len(), 1);
        assert!(state.merge_batch(complete).is_empty());
    }

    #[test]
    fn merge_is_commutative_and_idempotent() {
        let (alice, bob, carol) = (keypair(1), keypair(2), keypair(3));
        let shared = batch(b"shared", &[&alice, &bob, &carol], 0);
        let a = state_of([
            signed(shared.clone(), &[&alice]),
            signed(batch(b"only a", &[&alice, &bob], 5), &[&alice]),
        ]);
        let b = state_of([
            signed(shared.clone(), &[&bob, &carol]),
            batch(b"only b", &[&carol, &bob], 7),
        ]);

        let mut a_then_b = a.clone();
        a_then_b.merge(&b);
        let mut b_then_a = b.clone();
        b_then_a.merge(&a);
        assert_eq!(a_then_b, b_then_a);
        assert_eq!(a_then_b.len(), 3);

        let before = a_then_b.clone();
        let update = a_then_b.merge_with_updates(&before);
        assert!(update.completed.is_empty());
        assert!(update.updated.is_empty());
        assert_eq!(a_then_b, before);
    }

    #[test]
    fn merge_never_loses_signatures() {
        let (alice, bob, carol) = (keypair(1), keypair(2), keypair(3));
        let unsigned = batch(b"a", &[&alice, &bob, &carol], 0);
        let mut state = state_of([signed(unsigned.clone(), &[&alice, &bob])]);

        state.merge(&state_of([unsigned.clone()]));
        state.merge(&state_of([signed(unsigned.clone(), &[&carol])]));

        let held = state.get(&unsigned.hash()).unwrap();
        for signer in [&alice, &bob, &carol] {
            assert!(held.has_signature_from(&signer.public()));
        }
    }

    #[test]
    fn updates_contain_new_and_grown_batches_only() {
        let (alice, bob) = (keypair(1), keypair(2));
        let grown = batch(b"grown", &[&alice, &bob], 0);
        let untouched = signed(batch(b"same", &[&alice, &bob], 0), &[&alice]);
        let mut state = state_of([signed(grown.clone(), &[&alice]), untouched.clone()]);

        let fresh = batch(b"fresh", &[&alice, &bob], 0);
        let update = state.merge_with_updates(&state_of([
            signed(grown.clone(), &[&bob]),
            untouched.clone(),
            fresh.clone(),
        ]));

        assert!(update.updated.contains_hash(&grown.hash()));
        assert!(update.updated.contains_hash(&fresh.hash()));
        assert!(!update.updated.contains_hash(&untouched.hash()));
        assert_eq!(update.completed.hashes().copied().collect::<Vec<_>>(), vec![grown.hash()]);
    }

    #[test]
    fn difference_contains_unknown_and_under_signed_batches() {
        let (alice, bob) = (keypair(1), keypair(2));
        let known = signed(batch(b"known", &[&alice, &bob], 0), &[&alice]);
        let under_signed = batch(b"under", &[&alice, &bob], 0);
        let unknown = batch(b"unknown", &[&alice, &bob], 0);

        let mine = state_of([
            known.clone(),
            signed(under_signed.clone(), &[&alice, &bob]),
            unknown.clone(),
        ]);
        let theirs = state_of([
            signed(known.clone(), &[&bob]),
            signed(under_signed.clone(), &[&bob]),
        ]);

        let difference = &mine - &theirs;
        assert!(!difference.contains_batch(&known));
        assert!(difference.contains_batch(&under_signed));
        assert!(difference.contains_batch(&unknown));
        assert_eq!(
            difference.get(&under_signed.hash()).unwrap().signature_count(),
            2
        );
        // Operands are untouched.
        assert_eq!(mine.len(), 3);
        assert_eq!(theirs.len(), 2);
    }

    #[test]
    fn difference_merged_back_reproduces_superset() {
        let (alice, bob) = (keypair(1), keypair(2));
        let first = batch(b"first", &[&alice, &bob], 0);
        let second = batch(b"second", &[&alice, &bob], 3);

        let smaller = state_of([signed(first.clone(), &[&alice])]);
        let mut larger = smaller.clone();
        larger.merge(&state_of([signed(first.clone(), &[&bob]), second.clone()]));

        let mut rebuilt = smaller.clone();
        rebuilt.merge(&(&larger - &smaller));
        assert_eq!(rebuilt, larger);
        assert!((&larger - &rebuilt).is_empty());
    }

    #[test]
    fn extract_expired_removes_stale_batches_whether_complete_or_not() {
        let (alice, bob) = (keypair(1), keypair(2));
        let stale = batch(b"stale", &[&alice, &bob], 0);
        let stale_but_complete = signed(batch(b"done", &[&alice, &bob], 0), &[&alice, &bob]);
        let fresh = batch(b"fresh", &[&alice, &bob], 500);
        let mut state = state_of([stale.clone(), stale_but_complete.clone(), fresh.clone()]);

        let now = Timestamp::new(1_001);
        let expired = state.extract_expired(now);

        assert_eq!(expired.len(), 2);
        assert!(expired.contains_batch(&stale));
        assert!(expired.contains_batch(&stale_but_complete));
        assert_eq!(state.hashes().copied().collect::<Vec<_>>(), vec![fresh.hash()]);
        assert!(state
            .batches()
            .all(|batch| !state.completer().is_expired(batch, now)));
    }

    #[test]
    fn erase_expired_matches_extract_expired() {
        let alice = keypair(1);
        let bob = keypair(2);
        let mut extracted = state_of([batch(b"a", &[&alice, &bob], 0), batch(b"b", &[&alice], 900)]);
        let mut erased = extracted.clone();

        extracted.extract_expired(Timestamp::new(1_500));
        erased.erase_expired(Timestamp::new(1_500));
        assert_eq!(extracted, erased);
        assert_eq!(erased.len(), 1);
    }

    #[test]
    fn erase_by_transaction_hash_matches_batch_or_transaction() {
        let alice = keypair(1);
        let by_batch = batch(b"one", &[&alice], 0);
        let by_transaction = batch(b"two", &[&alice], 0);
        let kept = batch(b"three", &[&alice], 0);
        let mut state = state_of([by_batch.clone(), by_transaction.clone(), kept.clone()]);

        assert_eq!(state.erase_by_transaction_hash(&by_batch.hash()).len(), 1);
        let transaction_hash = by_transaction.transactions()[0].hash();
        assert_eq!(state.erase_by_transaction_hash(&transaction_hash).len(), 1);
        assert!(state.erase_by_transaction_hash(&by_batch.hash()).is_empty());

        assert_eq!(state.hashes().copied().collect::<Vec<_>>(), vec![kept.hash()]);
    }

    #[test]
    fn bytes_round_trip_preserves_content() {
        let (alice, bob) = (keypair(1), keypair(2));
        let state = state_of([
            signed(batch(b"a", &[&alice, &bob], 0), &[&bob]),
            batch(b"b", &[&alice], 10),
        ]);

        let encoded = state.to_bytes().try_to_vec().unwrap();
        let decoded = MstStateBytes::try_from_slice(&encoded).unwrap();
        assert_eq!(decoded.len(), 2);
        assert_eq!(MstState::from_bytes(completer(), decoded).unwrap(), state);
    }

    #[test]
    fn completion_past_the_deadline_is_reported_before_expiry() {
        let (alice, bob) = (keypair(1), keypair(2));
        let late = batch(b"late", &[&alice, &bob], 0);
        let mut state = state_of([signed(late.clone(), &[&alice])]);

        let completed = state.merge(&state_of([signed(late.clone(), &[&bob])]));
        assert!(completed.contains_batch(&late));

        let expired = state.extract_expired(Timestamp::new(5_000));
        assert!(expired.contains_batch(&late));
        assert!(state.is_empty());
    }

    // Completes on the first signature, expires 10ms after creation.
    struct TtlOnlyCompleter;

    impl Completer for TtlOnlyCompleter {
        fn is_completed(&self, batch: &Batch) -> bool {
            batch.signature_count() >= 1
        }

        fn is_expired(&self, batch: &Batch, now: Timestamp) -> bool {
            batch.created_time().int().saturating_add(10) < now.int()
        }
    }

    // Keeps the copy of a batch that arrived first.
    struct FirstCopyCompleter;

    impl Completer for FirstCopyCompleter {
        fn is_completed(&self, batch: &Batch) -> bool {
            batch.signature_count() == batch.signatories().count()
        }

        fn is_expired(&self, _batch: &Batch, _now: Timestamp) -> bool {
            false
        }

        fn merge_signatures(&self, _target: &mut Batch, _source: &Batch) -> bool {
            false
        }
    }

    #[test]
    fn expiry_follows_the_injected_completer() {
        let alice = keypair(1);
        let completer: Arc<dyn Completer> = Arc::new(TtlOnlyCompleter);
        let complete = signed(batch(b"complete", &[&alice], 0), &[&alice]);
        let pending = batch(b"pending", &[&alice], 0);
        let fresh = batch(b"fresh", &[&alice], 100);

        let mut state = MstState::empty(Arc::clone(&completer));
        assert_eq!(state.merge_batch(complete.clone()).len(), 1);
        state.merge_batch(pending.clone());
        state.merge_batch(fresh.clone());

        let now = Timestamp::new(50);
        let expired = state.extract_expired(now);
        assert_eq!(expired.len(), 2);
        assert!(expired.contains_batch(&complete));
        assert!(expired.contains_batch(&pending));
        assert!(state.batches().all(|batch| !completer.is_expired(batch, now)));
        assert!(state.contains_batch(&fresh));

        state.erase_expired(Timestamp::new(1_000_000));
        assert!(state.is_empty());
    }

    #[test]
    fn merge_uses_the_injected_signature_merge() {
        let (alice, bob) = (keypair(1), keypair(2));
        let unsigned = batch(b"a", &[&alice, &bob], 0);
        let completer: Arc<dyn Completer> = Arc::new(FirstCopyCompleter);

        let mut state = MstState::empty(Arc::clone(&completer));
        state.merge_batch(signed(unsigned.clone(), &[&alice]));
        let mut other = MstState::empty(Arc::clone(&completer));
        other.merge_batch(signed(unsigned.clone(), &[&alice, &bob]));

        let update = state.merge_with_updates(&other);
        assert!(update.updated.is_empty());
        assert!(update.completed.is_empty());
        assert_eq!(state.get(&unsigned.hash()).unwrap().signature_count(), 1);

        // The default merge takes the union.
        let mut state = state_of([signed(unsigned.clone(), &[&alice])]);
        let completed = state.merge(&state_of([signed(unsigned.clone(), &[&bob])]));
        assert!(completed.contains_batch(&unsigned));
    }
}
