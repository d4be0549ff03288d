//! Domain layer
//!
//! Ports (traits) that separate the reconcile logic from the cluster.

pub mod ports;

pub use ports::*;
