//! Helpers for creating signatories, batches and states in tests.

use std::{sync::Arc, time::Duration};

use rand_core::OsRng;

use mst_rs::{
    completer::{Completer, DefaultCompleter},
    state::MstState,
    types::{
        batch::{Batch, Transaction},
        crypto_primitives::{Keypair, SigningKey},
        data_types::Timestamp,
    },
};

pub(crate) const TTL: Duration = Duration::from_secs(10);

pub(crate) fn completer() -> Arc<dyn Completer> {
    Arc::new(DefaultCompleter::new(TTL))
}

/// Generate `n` random signatories.
pub(crate) fn keypairs(n: usize) -> Vec<Keypair> {
    let mut csprg = OsRng {};
    (0..n)
        .map(|_| Keypair::new(SigningKey::generate(&mut csprg)))
        .collect()
}

/// Create an unsigned batch with a single transaction carrying `payload`, that every one of
/// `signatories` must sign.
pub(crate) fn batch(payload: &str, signatories: &[Keypair], created_time: Timestamp) -> Batch {
    Batch::new(
        vec![Transaction::new(payload.as_bytes().to_vec())],
        signatories.iter().map(Keypair::public),
        created_time,
    )
    .unwrap()
}

/// Get a copy of `batch` carrying, in addition to its signatures, the signatures of `signers`.
pub(crate) fn signed_by(batch: &Batch, signers: &[&Keypair]) -> Batch {
    let mut batch = batch.clone();
    for signer in signers {
        batch.sign(signer).unwrap();
    }
    batch
}

pub(crate) fn state_of(batches: impl IntoIterator<Item = Batch>) -> MstState {
    let mut state = MstState::empty(completer());
    for batch in batches {
        state.merge_batch(batch);
    }
    state
}
