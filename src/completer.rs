/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Pluggable rules deciding when a batch is complete, when it has expired, and how the signatures of
//! two copies of the same batch are combined.
//!
//! A [`Completer`] is injected once into [`MstStorage`](crate::storage::MstStorage) and shared
//! read-only by every [`MstState`](crate::state::MstState) the storage creates. It must be
//! deterministic and must not change behavior during the lifetime of the states that use it.

use std::time::Duration;

use crate::types::{batch::Batch, data_types::Timestamp};

/// Completion policy for multi-signature batches.
pub trait Completer: Send + Sync {
    /// Check whether `batch` carries enough signatures to be handed to ordering.
    fn is_completed(&self, batch: &Batch) -> bool;

    /// Check whether `batch` should be dropped at time `now` because it waited for signatures for too
    /// long.
    ///
    /// Expiry does not depend on completion: a completed batch that is never finalized is dropped
    /// like any other. Merges report completion before any expiry sweep can see the batch, so a batch
    /// that completes is always reported once, even if its deadline has already passed.
    ///
    /// # Contract
    ///
    /// If a batch is expired at `now`, it is expired at every later time.
    fn is_expired(&self, batch: &Batch, now: Timestamp) -> bool;

    /// Merge the signatures of `source` into `target`, returning whether `target` changed.
    ///
    /// The default implementation takes the union of both signature sets. Overriding
    /// implementations must never remove a signature from `target`.
    ///
    /// # Preconditions
    ///
    /// `target.hash() == source.hash()`.
    fn merge_signatures(&self, target: &mut Batch, source: &Batch) -> bool {
        target.union_signatures(source)
    }
}

/// Completion policy that completes a batch once it carries signatures from a
/// [`quorum`](Batch::quorum) of its signatories, and expires batches `expiration_time` after their
/// creation time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DefaultCompleter {
    expiration_time: Duration,
}

impl DefaultCompleter {
    /// Create a `DefaultCompleter` that expires batches `expiration_time` after they were created.
    pub fn new(expiration_time: Duration) -> DefaultCompleter {
        DefaultCompleter { expiration_time }
    }

    pub fn expiration_time(&self) -> Duration {
        self.expiration_time
    }

    /// Get the last instant at which `batch` is still not expired.
    pub fn deadline(&self, batch: &Batch) -> Timestamp {
        batch.created_time().saturating_add(self.expiration_time)
    }
}

impl Completer for DefaultCompleter {
    fn is_completed(&self, batch: &Batch) -> bool {
        batch.signature_count() >= batch.quorum() as usize
    }

    fn is_expired(&self, batch: &Batch, now: Timestamp) -> bool {
        self.deadline(batch) < now
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        batch::Transaction,
        crypto_primitives::{Keypair, SigningKey},
    };

    const TTL: Duration = Duration::from_secs(60);

    fn keypair(seed: u8) -> Keypair {
        Keypair::new(SigningKey::from_bytes(&[seed; 32]))
    }

    #[test]
    fn completes_at_quorum() {
        let completer = DefaultCompleter::new(TTL);
        let signers: Vec<Keypair> = (1..=3).map(keypair).collect();
        let mut batch = Batch::with_quorum(
            vec![Transaction::new(b"payload".to_vec())],
            signers.iter().map(Keypair::public),
            2,
            Timestamp::new(0),
        )
        .unwrap();

        batch.sign(&signers[0]).unwrap();
        assert!(!completer.is_completed(&batch));
        batch.sign(&signers[2]).unwrap();
        assert!(completer.is_completed(&batch));
    }

    #[test]
    fn expires_strictly_after_deadline() {
        let completer = DefaultCompleter::new(TTL);
        let created = Timestamp::new(10_000);
        let batch = Batch::new(
            vec![Transaction::new(b"payload".to_vec())],
            [keypair(1).public(), keypair(2).public()],
            created,
        )
        .unwrap();

        let deadline = completer.deadline(&batch);
        assert_eq!(deadline, Timestamp::new(70_000));
        assert!(!completer.is_expired(&batch, deadline));
        assert!(completer.is_expired(&batch, Timestamp::new(deadline.int() + 1)));
    }

    #[test]
    fn completed_batches_expire_too() {
        let completer = DefaultCompleter::new(TTL);
        let signer = keypair(1);
        let mut batch = Batch::new(
            vec![Transaction::new(b"payload".to_vec())],
            [signer.public()],
            Timestamp::new(0),
        )
        .unwrap();
        batch.sign(&signer).unwrap();

        assert!(completer.is_completed(&batch));
        assert!(!completer.is_expired(&batch, completer.deadline(&batch)));
        assert!(completer.is_expired(&batch, Timestamp::new(u64::MAX)));
    }
}
