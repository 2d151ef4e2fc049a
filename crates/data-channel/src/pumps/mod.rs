//! Per-connection WebSocket tasks.

pub(crate) mod read;
pub(crate) mod write;
