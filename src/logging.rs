//! Console logging for the desktop binary.
//!
//! Filtering follows `RUST_LOG` (default `warn`), e.g. `RUST_LOG=tagtree=debug`
//! shows every flatten pass and path resolution. Records from the `log`
//! macros used across the crate are forwarded into the subscriber.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

pub fn init() {
    let console_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let console_layer = fmt::layer()
        .with_target(true)
        .with_line_number(true)
        .with_filter(console_filter);

    if let Err(err) = tracing_subscriber::registry()
        .with(console_layer)
        .try_init()
    {
        eprintln!("Warning: Could not initialize logging: {err}");
    }
}
