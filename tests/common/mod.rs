pub(crate) mod batches;

pub(crate) mod logging;
