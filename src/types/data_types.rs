/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Types that exist only to store bytes, and do not have any major "active" behavior.

use std::{
    fmt::{self, Debug, Display, Formatter, Write},
    time::{Duration, SystemTime},
};

use borsh::{BorshDeserialize, BorshSerialize};

use super::crypto_primitives::VerifyingKey;

/// 32-byte cryptographic hash.
///
/// Within this crate, `CryptoHash`-es are always SHA256 hashes, produced either over the payload of a
/// [`Transaction`](super::batch::Transaction) or over the unsigned content of a
/// [`Batch`](super::batch::Batch).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize)]
pub struct CryptoHash([u8; 32]);

impl CryptoHash {
    /// Create a new `CryptoHash` wrapping `bytes`.
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the inner `[u8; 32]` value of this `CryptoHash`.
    pub const fn bytes(&self) -> [u8; 32] {
        self.0
    }
}

impl Display for CryptoHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&hex_string(&self.0))
    }
}

impl Debug for CryptoHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Ed25519 digital signature.
///
/// These are produced using the [`ed25519_dalek`] crate, whose main definitions are re-exported from
/// the [`crypto_primitives`](super::crypto_primitives) module.
///
/// `SignatureBytes` are totally ordered by their bytes. The order carries no meaning other than giving
/// signature merges a deterministic tie-break.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, BorshDeserialize, BorshSerialize)]
pub struct SignatureBytes([u8; 64]);

impl SignatureBytes {
    /// Create a new `SignatureBytes` wrapping `bytes`.
    pub fn new(bytes: [u8; 64]) -> Self {
        Self(bytes)
    }

    /// Get the inner `[u8; 64]` value of this `SignatureBytes`.
    pub const fn bytes(&self) -> [u8; 64] {
        self.0
    }
}

impl Debug for SignatureBytes {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Internal type used for storing, ordering and serializing values of type [`VerifyingKey`].
pub type VerifyingKeyBytes = [u8; 32];

/// Point in time, in milliseconds since the Unix Epoch.
///
/// Batches carry their creation time as a `Timestamp`, and callers pass the current time into expiry
/// and diff operations as a `Timestamp`. The core never reads the clock by itself.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize,
)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Create a new `Timestamp` wrapping `millis`.
    pub const fn new(millis: u64) -> Self {
        Self(millis)
    }

    /// Get the current wall-clock time as a `Timestamp`.
    pub fn now() -> Self {
        Self::from(SystemTime::now())
    }

    /// Get the inner `u64` (milliseconds since the Unix Epoch) of this `Timestamp`.
    pub const fn int(&self) -> u64 {
        self.0
    }

    /// Get the `Timestamp` that is `duration` after this one, saturating at `u64::MAX` milliseconds.
    pub fn saturating_add(&self, duration: Duration) -> Self {
        let millis = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        Self(self.0.saturating_add(millis))
    }
}

impl From<SystemTime> for Timestamp {
    fn from(time: SystemTime) -> Self {
        // Times before the Unix Epoch are clamped to the Epoch.
        let millis = time
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|since_epoch| u64::try_from(since_epoch.as_millis()).unwrap_or(u64::MAX))
            .unwrap_or(0);
        Self(millis)
    }
}

impl Display for Timestamp {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

/// Identity of a gossip peer: the lowercase hex encoding of the peer's public key.
///
/// Peer keys are compared as plain strings. `"AB"` and `"ab"` are different peers.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize)]
pub struct PeerKey(String);

impl PeerKey {
    /// Create a new `PeerKey` wrapping `hex`.
    pub fn new(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    /// Create the `PeerKey` of the peer identified by `verifying_key`.
    pub fn from_verifying_key(verifying_key: &VerifyingKey) -> Self {
        Self(hex_string(verifying_key.as_bytes()))
    }

    /// Get a reference to the inner hex string of this `PeerKey`.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for PeerKey {
    fn from(hex: &str) -> Self {
        Self::new(hex)
    }
}

impl From<String> for PeerKey {
    fn from(hex: String) -> Self {
        Self(hex)
    }
}

impl Display for PeerKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Debug for PeerKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Debug::fmt(&self.0, f)
    }
}

fn hex_string(bytes: &[u8]) -> String {
    let mut hex = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        // Writing into a `String` cannot fail.
        let _ = write!(hex, "{:02x}", byte);
    }
    hex
}
