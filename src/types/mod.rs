//! Types that are shared by the state, the storage and their callers.
//!
//! The types defined here are either "inert" newtypes that are passed around and inspected
//! ([`data_types`]), cryptographic primitives ([`crypto_primitives`]), or the multi-signature
//! [`Batch`](batch::Batch) that the rest of the crate tracks.

pub mod batch;

pub mod crypto_primitives;

pub mod data_types;
