/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Functions that log out events.
//!
//! The logs defined in this module are printed if the user enabled them via the node's
//! [configuration](crate::config::Configuration).
//!
//! This crate logs using the [log](https://docs.rs/log/latest/log/) crate. To get these messages
//! printed onto a terminal or to a file, set up a
//! [logging implementation](https://docs.rs/log/latest/log/#available-logging-implementations).
//!
//! ## Log message format
//!
//! Log messages are CSVs (Comma Separated Values) with at least two values. The first two values are
//! always:
//! 1. The name of the [event](crate::events) in PascalCase (defined in this module as constants).
//! 2. The time the event was emitted (as number of seconds since the Unix Epoch).
//!
//! The rest of the values differ depending on the kind of event. For example, the following snippet
//! is how a [ReceiveState](crate::events::ReceiveStateEvent) is printed:
//!
//! ```text
//! ReceiveState, 1701329264, 3b6a27b, 4
//! ```
//!
//! In the snippet:
//! - The third value is the first seven characters of the hex peer key of the origin of the state.
//! - The fourth value is the number of batches in the received state.
//!
//! Batch and transaction hashes are printed as the first seven characters of their Base64 encoding.

use crate::events::*;
use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine as _};
use log;
use std::time::SystemTime;

// Names of each event in PascalCase for printing:
pub const INSERT_BATCH: &str = "InsertBatch";
pub const COMPLETE_BATCH: &str = "CompleteBatch";
pub const EXPIRE_BATCH: &str = "ExpireBatch";
pub const FINALIZE_BATCH: &str = "FinalizeBatch";
pub const RECEIVE_STATE: &str = "ReceiveState";
pub const COMPUTE_DIFF: &str = "ComputeDiff";

/// Implemented by event types. Used to get a closure that logs the event.
pub(crate) trait Logger {
    /// Returns a pointer to the default logging handler for a given event type.
    fn get_logger() -> Box<dyn Fn(&Self) + Send>;
}

impl Logger for InsertBatchEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |insert_batch_event: &InsertBatchEvent| {
            log::info!(
                "{}, {}, {}",
                INSERT_BATCH,
                secs_since_unix_epoch(insert_batch_event.timestamp),
                first_seven_base64_chars(&insert_batch_event.batch.bytes())
            )
        };
        Box::new(logger)
    }
}

impl Logger for CompleteBatchEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |complete_batch_event: &CompleteBatchEvent| {
            log::info!(
                "{}, {}, {}, {}",
                COMPLETE_BATCH,
                secs_since_unix_epoch(complete_batch_event.timestamp),
                first_seven_base64_chars(&complete_batch_event.batch.hash().bytes()),
                complete_batch_event.batch.signature_count()
            )
        };
        Box::new(logger)
    }
}

impl Logger for ExpireBatchEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |expire_batch_event: &ExpireBatchEvent| {
            log::info!(
                "{}, {}, {}",
                EXPIRE_BATCH,
                secs_since_unix_epoch(expire_batch_event.timestamp),
                first_seven_base64_chars(&expire_batch_event.batch.bytes())
            )
        };
        Box::new(logger)
    }
}

impl Logger for FinalizeBatchEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |finalize_batch_event: &FinalizeBatchEvent| {
            log::info!(
                "{}, {}, {}, {}",
                FINALIZE_BATCH,
                secs_since_unix_epoch(finalize_batch_event.timestamp),
                first_seven_base64_chars(&finalize_batch_event.transaction.bytes()),
                first_seven_base64_chars(&finalize_batch_event.batch.bytes())
            )
        };
        Box::new(logger)
    }
}

impl Logger for ReceiveStateEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |receive_state_event: &ReceiveStateEvent| {
            log::info!(
                "{}, {}, {}, {}",
                RECEIVE_STATE,
                secs_since_unix_epoch(receive_state_event.timestamp),
                first_seven_chars(receive_state_event.origin.as_str()),
                receive_state_event.batches
            )
        };
        Box::new(logger)
    }
}

impl Logger for ComputeDiffEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |compute_diff_event: &ComputeDiffEvent| {
            log::debug!(
                "{}, {}, {}, {}",
                COMPUTE_DIFF,
                secs_since_unix_epoch(compute_diff_event.timestamp),
                first_seven_chars(compute_diff_event.peer.as_str()),
                compute_diff_event.batches
            )
        };
        Box::new(logger)
    }
}

// Get a more readable representation of a bytesequence by base64-encoding it and taking the first 7 characters.
pub(crate) fn first_seven_base64_chars(bytes: &[u8]) -> String {
    first_seven_chars(&STANDARD_NO_PAD.encode(bytes))
}

fn first_seven_chars(string: &str) -> String {
    string.chars().take(7).collect()
}

// Events created before the Unix Epoch are printed with a timestamp of 0.
pub(crate) fn secs_since_unix_epoch(timestamp: SystemTime) -> u64 {
    timestamp
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|since_epoch| since_epoch.as_secs())
        .unwrap_or(0)
}
