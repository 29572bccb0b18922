//! Synchronization utilities for coordinating Tokio tasks.

pub(crate) mod drain;
