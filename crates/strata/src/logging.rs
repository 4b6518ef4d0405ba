//! Logger setup.
//!
//! The crate logs through the `log` facade. Binaries call [`init_logger`] once
//! at startup to route records to `env_logger`, which honours `RUST_LOG`.

/// Install `env_logger`, defaulting to `info` when `RUST_LOG` is unset.
///
/// Calling it again (or after another logger was installed) does nothing.
pub fn init_logger() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .try_init();
}

/// Logger for tests: captured by the test harness, `debug` by default.
pub fn init_test_logger() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug"))
        .is_test(true)
        .try_init();
}
