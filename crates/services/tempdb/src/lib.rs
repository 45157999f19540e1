pub mod ports;
pub mod service;

use std::sync::LazyLock;

pub use self::{
    ports::{PortRange, PortsExhausted},
    service::{Handle, ServerOptions, StartError, new},
};

/// Whether to keep the data directory after the server is stopped
///
/// This is set to `false` by default, but can be overridden by the `KEEP_TEMP_DIRS` environment
/// variable.
pub static KEEP_TEMP_DIRS: LazyLock<bool> = LazyLock::new(|| {
    std::env::var("KEEP_TEMP_DIRS")
        .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
        .unwrap_or(false)
});
