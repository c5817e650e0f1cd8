//! Network layer correlation
//!
//! Captured exchanges are merged into one [`NetworkRequest`] per (URL, method) and bound to the
//! markup, style and script records that reference them.

pub mod correlator;
pub mod request;

pub use correlator::NetworkCorrelator;
pub use request::{HttpMessage, NetworkRequest, RequestFlow};
