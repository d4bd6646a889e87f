/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Configuration of an [`MstNode`](crate::node::MstNode) as specified by the operator.

use std::time::Duration;

use typed_builder::TypedBuilder;

use crate::completer::DefaultCompleter;

/// Stores the user-defined parameters of multi-signature batch propagation, that is:
/// 1. The expiration time, which defines how long a batch is tracked after its creation
///    time before it is dropped.
/// 2. The "Log Events" flag, if set to "true" then logs should be printed.
///
/// ## Expiration time
///
/// The expiration time configures the [`DefaultCompleter`] used when no custom
/// [`Completer`](crate::completer::Completer) is given to
/// [`MstNodeSpec`](crate::node::MstNodeSpec). All nodes gossiping with each other should use the
/// same expiration time, otherwise a node may keep gossiping batches that its peers already dropped.
///
/// ## Log Events
///
/// This crate logs using the [log](https://docs.rs/log/latest/log/) crate. To get these messages
/// printed onto a terminal or to a file, set up a [logging
/// implementation](https://docs.rs/log/latest/log/#available-logging-implementations).
#[derive(Clone, Debug, TypedBuilder)]
#[builder(builder_method(doc = "
    Create a builder for building a [Configuration]. On the builder call the following methods to construct a valid [Configuration].

    Required:
    - `.expiration_time(...)`
    - `.log_events(...)`
"))]
pub struct Configuration {
    #[builder(setter(
        doc = "Set how long a batch is tracked after its creation time. Required."
    ))]
    pub expiration_time: Duration,
    #[builder(setter(doc = "Enable logging? Required."))]
    pub log_events: bool,
}

impl From<&Configuration> for DefaultCompleter {
    fn from(configuration: &Configuration) -> Self {
        DefaultCompleter::new(configuration.expiration_time)
    }
}
