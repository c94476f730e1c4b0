//! Logging for msgpipe, compiled in only with the `tracing` feature.
//!
//! Library code logs through the crate-private `trace!`, `debug!`, `info!`,
//! `warn!` and `error!` macros. With the feature off they all expand to
//! nothing, so field expressions are never evaluated.

/// Installs a global subscriber that prints msgpipe events to stderr.
///
/// The filter comes from `RUST_LOG` and falls back to `msgpipe=trace`. Lines
/// carry the thread name and the time since startup, which is enough to follow
/// readers and writers handing the pipe back and forth. Calling this again, or
/// after another subscriber was installed, does nothing.
///
/// Without the `tracing` feature this is a no-op.
#[cfg(feature = "tracing")]
pub fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(concat!(env!("CARGO_CRATE_NAME"), "=trace")));

    let layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_names(true)
        .with_timer(fmt::time::uptime());

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(layer)
        .try_init();
}

#[cfg(not(feature = "tracing"))]
pub const fn init_tracing() {}

#[cfg(feature = "tracing")]
pub(crate) use tracing::{debug, error, info, trace, warn};

#[cfg(not(feature = "tracing"))]
macro_rules! discard {
    ($($arg:tt)*) => {};
}

#[cfg(not(feature = "tracing"))]
pub(crate) use discard as debug;
#[cfg(not(feature = "tracing"))]
pub(crate) use discard as error;
#[cfg(not(feature = "tracing"))]
pub(crate) use discard as info;
#[cfg(not(feature = "tracing"))]
pub(crate) use discard as trace;
#[cfg(not(feature = "tracing"))]
pub(crate) use discard as warn;
