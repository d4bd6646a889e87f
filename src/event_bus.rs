/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Thread that receives [events](crate::events) published by storage and invokes the handlers
//! registered for them.

use crate::events::*;
use crate::logging::Logger;
use std::sync::mpsc::Receiver;
use std::sync::mpsc::RecvTimeoutError;
use std::sync::mpsc::TryRecvError;
use std::thread;
use std::thread::JoinHandle;
use std::time::Duration;

pub type HandlerPtr<T> = Box<dyn Fn(&T) + Send>;

// How long the event bus waits for an event before checking for the shutdown signal.
const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_millis(50);

pub(crate) struct EventHandlers {
    pub(crate) insert_batch_handlers: Vec<HandlerPtr<InsertBatchEvent>>,
    pub(crate) complete_batch_handlers: Vec<HandlerPtr<CompleteBatchEvent>>,
    pub(crate) expire_batch_handlers: Vec<HandlerPtr<ExpireBatchEvent>>,
    pub(crate) finalize_batch_handlers: Vec<HandlerPtr<FinalizeBatchEvent>>,
    pub(crate) receive_state_handlers: Vec<HandlerPtr<ReceiveStateEvent>>,
    pub(crate) compute_diff_handlers: Vec<HandlerPtr<ComputeDiffEvent>>,
}

impl EventHandlers {
    /// Collect the user-supplied handlers, adding the default logging handler for every event type if
    /// `log_events` is set.
    pub(crate) fn new(
        log_events: bool,
        insert_batch_handler: Option<HandlerPtr<InsertBatchEvent>>,
        complete_batch_handler: Option<HandlerPtr<CompleteBatchEvent>>,
        expire_batch_handler: Option<HandlerPtr<ExpireBatchEvent>>,
        finalize_batch_handler: Option<HandlerPtr<FinalizeBatchEvent>>,
        receive_state_handler: Option<HandlerPtr<ReceiveStateEvent>>,
        compute_diff_handler: Option<HandlerPtr<ComputeDiffEvent>>,
    ) -> EventHandlers {
        EventHandlers {
            insert_batch_handlers: handlers(log_events, insert_batch_handler),
            complete_batch_handlers: handlers(log_events, complete_batch_handler),
            expire_batch_handlers: handlers(log_events, expire_batch_handler),
            finalize_batch_handlers: handlers(log_events, finalize_batch_handler),
            receive_state_handlers: handlers(log_events, receive_state_handler),
            compute_diff_handlers: handlers(log_events, compute_diff_handler),
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.insert_batch_handlers.is_empty()
            && self.complete_batch_handlers.is_empty()
            && self.expire_batch_handlers.is_empty()
            && self.finalize_batch_handlers.is_empty()
            && self.receive_state_handlers.is_empty()
            && self.compute_diff_handlers.is_empty()
    }

    pub(crate) fn fire_handlers(&self, event: Event) {
        match event {
            Event::InsertBatch(insert_batch_event) => self
                .insert_batch_handlers
                .iter()
                .for_each(|handler| handler(&insert_batch_event)),

            Event::CompleteBatch(complete_batch_event) => self
                .complete_batch_handlers
                .iter()
                .for_each(|handler| handler(&complete_batch_event)),

            Event::ExpireBatch(expire_batch_event) => self
                .expire_batch_handlers
                .iter()
                .for_each(|handler| handler(&expire_batch_event)),

            Event::FinalizeBatch(finalize_batch_event) => self
                .finalize_batch_handlers
                .iter()
                .for_each(|handler| handler(&finalize_batch_event)),

            Event::ReceiveState(receive_state_event) => self
                .receive_state_handlers
                .iter()
                .for_each(|handler| handler(&receive_state_event)),

            Event::ComputeDiff(compute_diff_event) => self
                .compute_diff_handlers
                .iter()
                .for_each(|handler| handler(&compute_diff_event)),
        }
    }
}

fn handlers<T: Logger>(log_events: bool, user_handler: Option<HandlerPtr<T>>) -> Vec<HandlerPtr<T>> {
    let mut handlers = Vec::new();
    if log_events {
        handlers.push(T::get_logger());
    }
    if let Some(handler) = user_handler {
        handlers.push(handler);
    }
    handlers
}

/// Start the event bus thread. The thread blocks until an event arrives, and checks
/// `shutdown_signal` only when no event arrived for a while, so every event published before the
/// signal fired is handled before the thread exits.
pub(crate) fn start_event_bus(
    event_handlers: EventHandlers,
    event_subscriber: Receiver<Event>,
    shutdown_signal: Receiver<()>,
) -> JoinHandle<()> {
    thread::spawn(move || loop {
        match event_subscriber.recv_timeout(SHUTDOWN_POLL_INTERVAL) {
            Ok(event) => event_handlers.fire_handlers(event),
            Err(RecvTimeoutError::Timeout) => match shutdown_signal.try_recv() {
                Ok(()) | Err(TryRecvError::Disconnected) => return,
                Err(TryRecvError::Empty) => continue,
            },
            Err(RecvTimeoutError::Disconnected) => return,
        }
    })
}
