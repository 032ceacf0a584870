//! Logging configuration for the analysis
//!
//! Thin wrappers over `log` and `env_logger`. Level conventions:
//!
//! - `error!` - internal inconsistencies that should always be shown
//! - `warn!` - suspicious inputs the analysis degrades around
//! - `info!` - per-routine progress
//! - `debug!` - per-node walking and merge decisions
//! - `trace!` - per-expression lattice updates and exit routing
//!
//! Set `RUST_LOG` to control output at runtime, e.g.
//! `RUST_LOG=flowguard::driver=debug` to watch one module.

use env_logger::Builder;
use log::LevelFilter;
use std::io::Write;
use std::sync::Once;

static INIT: Once = Once::new();

/// Initialize logging with sensible defaults (Warn level).
///
/// This only initializes once; subsequent calls are no-ops.
pub fn init() {
    init_with_level(LevelFilter::Warn);
}

/// Initialize logging with a specific level.
///
/// This only initializes once; subsequent calls are no-ops.
pub fn init_with_level(level: LevelFilter) {
    INIT.call_once(|| {
        Builder::new()
            .filter_level(level)
            .format(|buf, record| {
                writeln!(
                    buf,
                    "[{:5}] {}:{} - {}",
                    record.level(),
                    record.file().unwrap_or("unknown"),
                    record.line().unwrap_or(0),
                    record.args()
                )
            })
            .init();
    });
}

/// Initialize logging from the RUST_LOG environment variable.
///
/// If RUST_LOG is not set, defaults to Warn level.
pub fn init_from_env() {
    INIT.call_once(|| {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    });
}

/// Initialize logging for tests.
///
/// Quiet unless RUST_LOG is set explicitly; safe to call from every test.
pub fn init_test() {
    // try_init() doesn't panic if already initialized
    let _ = env_logger::builder()
        .filter_level(LevelFilter::Warn)
        .is_test(true)
        .try_init();
}
