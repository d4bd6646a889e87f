/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Methods to build and start an MST node: a [`SharedMstStorage`] wired to the event bus.
//!
//! ## Starting a node
//!
//! ```no_run
//! use std::time::Duration;
//! use mst_rs::{config::Configuration, node::MstNodeSpec};
//!
//! let configuration = Configuration::builder()
//!     .expiration_time(Duration::from_secs(24 * 60 * 60))
//!     .log_events(true)
//!     .build();
//!
//! let node = MstNodeSpec::builder()
//!     .configuration(configuration)
//!     .on_complete_batch(|_event| {
//!         // Hand the completed batch to ordering.
//!     })
//!     .build()
//!     .start();
//!
//! let storage = node.storage();
//! ```
//!
//! The returned [`MstNode`] owns the event bus thread. Gossip, submission, consensus and the expiry
//! timer each get a clone of [`MstNode::storage`] and call into it from their own threads.

use std::sync::{
    mpsc::{self, Sender},
    Arc,
};
use std::thread::JoinHandle;

use typed_builder::TypedBuilder;

use crate::{
    completer::{Completer, DefaultCompleter},
    config::Configuration,
    event_bus::*,
    events::*,
    storage::{MstStorage, SharedMstStorage},
};

/// Stores the configuration, the completion policy and the event handlers required to start an
/// [`MstNode`].
#[derive(TypedBuilder)]
#[builder(builder_method(doc = "
    Create a builder for building an [MstNodeSpec]. On the builder call the following methods to construct a valid [MstNodeSpec].

    Required:
    - `.configuration(...)`

    Optional:
    - `.completer(...)`
    - `.on_insert_batch(...)`
    - `.on_complete_batch(...)`
    - `.on_expire_batch(...)`
    - `.on_finalize_batch(...)`
    - `.on_receive_state(...)`
    - `.on_compute_diff(...)`
"))]
pub struct MstNodeSpec {
    // Required parameters
    #[builder(setter(
        doc = "Set the [configuration](Configuration) of the node. Required."
    ))]
    configuration: Configuration,
    // Optional parameters
    #[builder(default, setter(transform = |completer: impl Completer + 'static| Some(Arc::new(completer) as Arc<dyn Completer>),
    doc = "Set a custom completion policy. Defaults to a [DefaultCompleter] using the configured expiration time. Optional."))]
    completer: Option<Arc<dyn Completer>>,
    #[builder(default, setter(transform = |handler: impl Fn(&InsertBatchEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<InsertBatchEvent>),
    doc = "Register a handler closure to be invoked after a locally created batch is merged into the own state. Optional."))]
    on_insert_batch: Option<HandlerPtr<InsertBatchEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&CompleteBatchEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<CompleteBatchEvent>),
    doc = "Register a handler closure to be invoked after a batch gathers enough signatures. Optional."))]
    on_complete_batch: Option<HandlerPtr<CompleteBatchEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ExpireBatchEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ExpireBatchEvent>),
    doc = "Register a handler closure to be invoked after a batch expires. Optional."))]
    on_expire_batch: Option<HandlerPtr<ExpireBatchEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&FinalizeBatchEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<FinalizeBatchEvent>),
    doc = "Register a handler closure to be invoked after a batch is purged because it was finalized. Optional."))]
    on_finalize_batch: Option<HandlerPtr<FinalizeBatchEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ReceiveStateEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ReceiveStateEvent>),
    doc = "Register a handler closure to be invoked after a state received from a peer is merged. Optional."))]
    on_receive_state: Option<HandlerPtr<ReceiveStateEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ComputeDiffEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ComputeDiffEvent>),
    doc = "Register a handler closure to be invoked after a gossip diff is computed for a peer. Optional."))]
    on_compute_diff: Option<HandlerPtr<ComputeDiffEvent>>,
}

impl MstNodeSpec {
    /// Create the node's storage and start the event bus thread, returning handles to both in an
    /// [`MstNode`].
    pub fn start(self) -> MstNode {
        let completer = self
            .completer
            .unwrap_or_else(|| Arc::new(DefaultCompleter::from(&self.configuration)));

        let event_handlers = EventHandlers::new(
            self.configuration.log_events,
            self.on_insert_batch,
            self.on_complete_batch,
            self.on_expire_batch,
            self.on_finalize_batch,
            self.on_receive_state,
            self.on_compute_diff,
        );

        if event_handlers.is_empty() {
            return MstNode {
                storage: SharedMstStorage::new(MstStorage::new(completer)),
                event_bus: None,
                event_bus_shutdown: None,
            };
        }

        let (event_publisher, event_subscriber) = mpsc::channel();
        let (event_bus_shutdown, event_bus_shutdown_receiver) = mpsc::channel();
        let event_bus = start_event_bus(event_handlers, event_subscriber, event_bus_shutdown_receiver);

        MstNode {
            storage: SharedMstStorage::new(MstStorage::with_event_publisher(
                completer,
                Some(event_publisher),
            )),
            event_bus: Some(event_bus),
            event_bus_shutdown: Some(event_bus_shutdown),
        }
    }
}

/// A handle to the storage and the event bus thread of a node. When this value is dropped, the event
/// bus handles every event that was already published and then shuts down.
pub struct MstNode {
    storage: SharedMstStorage,
    event_bus: Option<JoinHandle<()>>,
    event_bus_shutdown: Option<Sender<()>>,
}

impl MstNode {
    /// Get a handle to the node's storage. Handles stay usable after the `MstNode` is dropped, but
    /// their events are no longer handled.
    pub fn storage(&self) -> SharedMstStorage {
        self.storage.clone()
    }
}

impl Drop for MstNode {
    fn drop(&mut self) {
        if let Some(shutdown) = self.event_bus_shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(event_bus) = self.event_bus.take() {
            if event_bus.join().is_err() {
                log::error!("Event bus thread panicked");
            }
        }
    }
}
