//! Shared setup for integration tests.
//!
//! ```rust,ignore
//! mod common;
//!
//! #[test]
//! fn my_test() {
//!     common::init_tracing();
//!     // ...
//! }
//! ```
//!
//! Filter events with `RUST_LOG`, for example
//! `RUST_LOG=skiptower=trace cargo test --test stress_tests`.

#![allow(dead_code)]

use std::sync::Once;

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

static INIT: Once = Once::new();

/// Installs a console subscriber. Only the first call has any effect.
pub fn init_tracing() {
    INIT.call_once(setup_tracing);
}

fn make_filter(default_level: Level) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(format!("{default_level}")))
}

fn setup_tracing() {
    let console_layer = tracing_subscriber::fmt::layer()
        .with_test_writer()
        .with_thread_ids(true)
        .with_target(true)
        .with_line_number(true)
        .compact()
        .with_filter(make_filter(Level::WARN));

    // Another test binary harness may already have installed one.
    let _ = Registry::default().with(console_layer).try_init();
}
