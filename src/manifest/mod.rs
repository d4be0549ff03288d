//! Manifest handling
//!
//! - `object`: the `KubeObject` sum type over supported kinds
//! - `decode`: multi-document YAML into typed objects
//! - `apply`: get-or-create / get-or-update / delete against the cluster

pub mod apply;
pub mod decode;
pub mod object;

pub use apply::*;
pub use decode::*;
pub use object::*;
