/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definitions for the [`Transaction`] and multi-signature [`Batch`] types.
//!
//! A `Batch` groups one or more transactions that must be signed by a quorum of its required
//! signatories before it can be handed to ordering. The batch's identity is its [`hash`](Batch::hash),
//! which is computed over the batch's unsigned content only, so two copies of the same batch carrying
//! different signatures share the same identity and can be merged.
//!
//! # Signatures
//!
//! Signatories sign the bytes of the batch hash using Ed25519. Collected signatures only ever grow: the
//! only way to drop a signature is to drop the whole batch.

use std::{
    collections::{btree_map, BTreeMap, BTreeSet},
    fmt::{self, Display, Formatter},
};

use borsh::{BorshDeserialize, BorshSerialize};

use super::{
    crypto_primitives::{is_signature_correct, CryptoHasher, Digest, Keypair, VerifyingKey},
    data_types::{CryptoHash, SignatureBytes, Timestamp, VerifyingKeyBytes},
};

/// An unsigned transaction payload together with its SHA256 hash.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Transaction {
    payload: Vec<u8>,
    hash: CryptoHash,
}

impl Transaction {
    /// Create a new `Transaction` wrapping `payload`.
    pub fn new(payload: Vec<u8>) -> Transaction {
        Transaction {
            hash: Transaction::hash_payload(&payload),
            payload,
        }
    }

    pub fn hash_payload(payload: &[u8]) -> CryptoHash {
        let mut hasher = CryptoHasher::new();
        hasher.update(payload);
        CryptoHash::new(hasher.finalize().into())
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub const fn hash(&self) -> CryptoHash {
        self.hash
    }
}

/// A group of transactions, the set of keys that are allowed to sign it, and the signatures collected
/// from those keys so far.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Batch {
    hash: CryptoHash,
    transactions: Vec<Transaction>,
    signatories: BTreeSet<VerifyingKeyBytes>,
    quorum: u32,
    created_time: Timestamp,
    signatures: BTreeMap<VerifyingKeyBytes, SignatureBytes>,
}

impl Batch {
    /// Create a new, unsigned `Batch` that requires a signature from every one of `signatories`.
    pub fn new(
        transactions: Vec<Transaction>,
        signatories: impl IntoIterator<Item = VerifyingKey>,
        created_time: Timestamp,
    ) -> Result<Batch, BatchError> {
        let signatories: BTreeSet<VerifyingKeyBytes> =
            signatories.into_iter().map(|key| key.to_bytes()).collect();
        let quorum = signatories.len() as u32;
        Batch::from_parts(transactions, signatories, quorum, created_time)
    }

    /// Create a new, unsigned `Batch` that becomes complete once `quorum` distinct `signatories` have
    /// signed it.
    pub fn with_quorum(
        transactions: Vec<Transaction>,
        signatories: impl IntoIterator<Item = VerifyingKey>,
        quorum: u32,
        created_time: Timestamp,
    ) -> Result<Batch, BatchError> {
        let signatories = signatories.into_iter().map(|key| key.to_bytes()).collect();
        Batch::from_parts(transactions, signatories, quorum, created_time)
    }

    fn from_parts(
        transactions: Vec<Transaction>,
        signatories: BTreeSet<VerifyingKeyBytes>,
        quorum: u32,
        created_time: Timestamp,
    ) -> Result<Batch, BatchError> {
        if transactions.is_empty() {
            return Err(BatchError::NoTransactions);
        }
        if signatories.is_empty() {
            return Err(BatchError::NoSignatories);
        }
        if quorum == 0 || quorum as usize > signatories.len() {
            return Err(BatchError::InvalidQuorum {
                quorum,
                signatories: signatories.len(),
            });
        }

        Ok(Batch {
            hash: Batch::hash_content(&transactions, &signatories, quorum, created_time),
            transactions,
            signatories,
            quorum,
            created_time,
            signatures: BTreeMap::new(),
        })
    }

    /// Compute the identity hash of a batch from its unsigned content.
    fn hash_content(
        transactions: &[Transaction],
        signatories: &BTreeSet<VerifyingKeyBytes>,
        quorum: u32,
        created_time: Timestamp,
    ) -> CryptoHash {
        let mut hasher = CryptoHasher::new();
        hasher.update((transactions.len() as u64).to_le_bytes());
        for transaction in transactions {
            hasher.update(transaction.hash().bytes());
        }
        hasher.update((signatories.len() as u64).to_le_bytes());
        for signatory in signatories {
            hasher.update(signatory);
        }
        hasher.update(quorum.to_le_bytes());
        hasher.update(created_time.int().to_le_bytes());
        CryptoHash::new(hasher.finalize().into())
    }

    pub const fn hash(&self) -> CryptoHash {
        self.hash
    }

    pub fn transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    /// Check whether `transaction` is the hash of one of the transactions in this batch.
    pub fn contains_transaction(&self, transaction: &CryptoHash) -> bool {
        self.transactions.iter().any(|tx| tx.hash() == *transaction)
    }

    /// Iterate through the keys allowed to sign this batch, in ascending byte order.
    pub fn signatories(&self) -> impl Iterator<Item = &VerifyingKeyBytes> {
        self.signatories.iter()
    }

    pub fn is_signatory(&self, key: &VerifyingKey) -> bool {
        self.signatories.contains(key.as_bytes())
    }

    /// Number of distinct signatories that must sign this batch before it is complete.
    pub const fn quorum(&self) -> u32 {
        self.quorum
    }

    pub const fn created_time(&self) -> Timestamp {
        self.created_time
    }

    /// Iterate through the collected signatures, ordered by signer.
    pub fn signatures(&self) -> btree_map::Iter<'_, VerifyingKeyBytes, SignatureBytes> {
        self.signatures.iter()
    }

    pub fn signature_count(&self) -> usize {
        self.signatures.len()
    }

    pub fn has_signature_from(&self, key: &VerifyingKey) -> bool {
        self.signatures.contains_key(key.as_bytes())
    }

    /// Sign this batch with `keypair` and add the signature to it.
    ///
    /// Returns `Ok(true)` if the signature is new, `Ok(false)` if the batch already carried a
    /// signature from `keypair`.
    pub fn sign(&mut self, keypair: &Keypair) -> Result<bool, BatchError> {
        let signature = keypair.sign(&self.hash.bytes());
        self.add_signature(&keypair.public(), signature)
    }

    /// Add `signature` by `signer` to this batch after checking that `signer` is one of the batch's
    /// signatories and that `signature` is correct.
    ///
    /// Returns `Ok(true)` if the signature is new, `Ok(false)` if the batch already carried a
    /// signature from `signer`, in which case the existing signature is kept.
    pub fn add_signature(
        &mut self,
        signer: &VerifyingKey,
        signature: SignatureBytes,
    ) -> Result<bool, BatchError> {
        if !self.is_signatory(signer) {
            return Err(BatchError::NotASignatory {
                signer: signer.to_bytes(),
            });
        }
        if !self.is_signature_correct(signer, &signature) {
            return Err(BatchError::InvalidSignature {
                signer: signer.to_bytes(),
            });
        }

        if let btree_map::Entry::Vacant(entry) = self.signatures.entry(signer.to_bytes()) {
            entry.insert(signature);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Verify that `signature` is a signature created by `signer` over this batch's hash.
    pub fn is_signature_correct(&self, signer: &VerifyingKey, signature: &SignatureBytes) -> bool {
        is_signature_correct(signer, &self.hash.bytes(), signature)
    }

    /// Verify every collected signature against the batch hash.
    ///
    /// This is the check that a transport layer runs on batches received from untrusted peers before
    /// handing them to [`MstStorage`](crate::storage::MstStorage), which never re-verifies.
    pub fn verify_signatures(&self) -> Result<(), BatchError> {
        for (signer_bytes, signature) in &self.signatures {
            let signer = VerifyingKey::from_bytes(signer_bytes).map_err(|_| {
                BatchError::InvalidSignature {
                    signer: *signer_bytes,
                }
            })?;
            if !self.signatories.contains(signer_bytes)
                || !self.is_signature_correct(&signer, signature)
            {
                return Err(BatchError::InvalidSignature {
                    signer: *signer_bytes,
                });
            }
        }
        Ok(())
    }

    /// Add every signature in `other` that this batch does not carry yet.
    ///
    /// If both batches carry a signature from the same signer and the signatures differ, the smaller
    /// one (in byte order) is kept, so that the result does not depend on the order of merges.
    ///
    /// Returns whether this batch changed.
    ///
    /// # Preconditions
    ///
    /// `self.hash() == other.hash()`.
    pub fn union_signatures(&mut self, other: &Batch) -> bool {
        let mut changed = false;
        for (signer, signature) in &other.signatures {
            if !self.signatories.contains(signer) {
                continue;
            }
            match self.signatures.entry(*signer) {
                btree_map::Entry::Vacant(entry) => {
                    entry.insert(*signature);
                    changed = true;
                }
                btree_map::Entry::Occupied(mut entry) => {
                    if signature < entry.get() {
                        entry.insert(*signature);
                        changed = true;
                    }
                }
            }
        }
        changed
    }

    /// Check whether merging the signatures of `other` into this batch with
    /// [`union_signatures`](Self::union_signatures) would leave it unchanged: for every signer of
    /// `other`, this batch carries a signature from the same signer that is equal to or smaller than
    /// `other`'s.
    pub fn covers_signatures_of(&self, other: &Batch) -> bool {
        other.signatures.iter().all(|(signer, signature)| {
            !self.signatories.contains(signer)
                || matches!(self.signatures.get(signer), Some(own) if own <= signature)
        })
    }
}

/// Intermediate representation of [`Batch`] for safe serialization and deserialization.
///
/// `BatchBytes` does not carry the batch hash: converting it back into a `Batch` with `TryFrom`
/// recomputes the hash from the unsigned content, so a peer cannot attach signatures gathered for one
/// batch to the content of another.
#[derive(Clone, BorshSerialize, BorshDeserialize)]
pub struct BatchBytes {
    transactions: Vec<Vec<u8>>,
    signatories: Vec<VerifyingKeyBytes>,
    quorum: u32,
    created_time: Timestamp,
    signatures: Vec<(VerifyingKeyBytes, SignatureBytes)>,
}

impl From<&Batch> for BatchBytes {
    fn from(batch: &Batch) -> Self {
        BatchBytes {
            transactions: batch
                .transactions
                .iter()
                .map(|tx| tx.payload.clone())
                .collect(),
            signatories: batch.signatories.iter().copied().collect(),
            quorum: batch.quorum,
            created_time: batch.created_time,
            signatures: batch
                .signatures
                .iter()
                .map(|(signer, signature)| (*signer, *signature))
                .collect(),
        }
    }
}

impl TryFrom<BatchBytes> for Batch {
    type Error = BatchError;

    /// Rebuild a `Batch`, rejecting signatures from keys that are not signatories.
    ///
    /// Signatures are not cryptographically verified here. Call
    /// [`verify_signatures`](Batch::verify_signatures) on the result before trusting it.
    fn try_from(bytes: BatchBytes) -> Result<Self, Self::Error> {
        let transactions = bytes.transactions.into_iter().map(Transaction::new).collect();
        let signatories = bytes.signatories.into_iter().collect();
        let mut batch =
            Batch::from_parts(transactions, signatories, bytes.quorum, bytes.created_time)?;
        for (signer, signature) in bytes.signatures {
            if !batch.signatories.contains(&signer) {
                return Err(BatchError::NotASignatory { signer });
            }
            batch.signatures.insert(signer, signature);
        }
        Ok(batch)
    }
}

/// Errors that can occur when building a [`Batch`] or adding signatures to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchError {
    NoTransactions,
    NoSignatories,
    InvalidQuorum {
        quorum: u32,
        signatories: usize,
    },
    NotASignatory {
        signer: VerifyingKeyBytes,
    },
    InvalidSignature {
        signer: VerifyingKeyBytes,
    },
}

impl Display for BatchError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            BatchError::NoTransactions => write!(f, "batch contains no transactions"),
            BatchError::NoSignatories => write!(f, "batch has no signatories"),
            BatchError::InvalidQuorum {
                quorum,
                signatories,
            } => write!(
                f,
                "quorum {} is not between 1 and the number of signatories ({})",
                quorum, signatories
            ),
            BatchError::NotASignatory { signer } => {
                write!(f, "key {:?} is not a signatory of the batch", signer)
            }
            BatchError::InvalidSignature { signer } => {
                write!(f, "signature by key {:?} does not verify", signer)
            }
        }
    }
}

impl std::error::Error for BatchError {}
