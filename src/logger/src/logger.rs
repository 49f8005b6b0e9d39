use std::io::Write;
use env_logger::{Builder, Env};

/// Initialise process-wide logging.
///
/// Honours `RUST_LOG`, defaulting to `info`. Calling it again is a no-op.
pub fn setup_logging() {
    let result = Builder::from_env(Env::default().default_filter_or("info"))
        .format(|buf, record| {
            writeln!(
                buf,
                "{} [{}] {}: {}",
                buf.timestamp_millis(),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .try_init();

    if result.is_err() {
        log::debug!("Logging already initialised");
    }
}
