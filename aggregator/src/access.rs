//! Access logging for the HTTP surface.
//!
//! Events are emitted via `tracing` with a dedicated target so they can be
//! filtered (`RUST_LOG=flowd::access=info`) and formatted separately from
//! application logs.

use std::net::SocketAddr;
use tracing::{info, warn};

pub const ACCESS_TARGET: &str = "flowd::access";

/// Log one completed request. Server errors are logged at `warn`.
pub fn request(src: SocketAddr, method: &str, path: &str, status: u16, elapsed_ms: f64) {
    if status >= 500 {
        warn!(
            target: ACCESS_TARGET,
            src = %src,
            method = %method,
            path = %path,
            status = status,
            elapsed_ms = elapsed_ms,
        );
    } else {
        info!(
            target: ACCESS_TARGET,
            src = %src,
            method = %method,
            path = %path,
            status = status,
            elapsed_ms = elapsed_ms,
        );
    }
}
