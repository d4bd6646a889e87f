/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Propagation core for multi-signature transactions (MST).
//!
//! A [batch](types::batch::Batch) that requires signatures from several parties cannot be handed to
//! ordering until a quorum of its signatories have signed it. Until then, every node keeps the
//! partially-signed batches it knows about in an [`MstState`](state::MstState) and gossips signature
//! updates with its peers, so that signatures converge without a central coordinator.
//!
//! # Components
//!
//! 1. [`completer`]: the pluggable policy deciding when a batch is complete or expired.
//! 2. [`state`]: the mergeable collection of batches, with merge, difference and expiry.
//! 3. [`storage`]: the node's own state plus the last known state of each peer, exposing the
//!    operations that gossip, submission, consensus and the expiry timer call into.
//! 4. [`node`]: wiring of a shared storage with [event](events) handlers and [logging].
//!
//! The peer-to-peer transport, the ordering service and signature verification of incoming batches
//! are left to the library user.

pub mod completer;

pub mod config;

pub(crate) mod event_bus;

pub mod events;

pub mod logging;

pub mod node;

pub mod state;

pub mod storage;

pub mod types;
