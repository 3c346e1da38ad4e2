//! Process-wide diagnostic output.

use std::sync::Once;
use tracing_subscriber::EnvFilter;

/// Environment variable holding an `EnvFilter` directive for harness output.
pub const LOG_ENV: &str = "SQLHARNESS_LOG";

const DEFAULT_DIRECTIVE: &str = "sqlharness=info";

static INIT: Once = Once::new();

/// Install the harness's `tracing` subscriber.
///
/// Output goes through libtest's capture. Only the first call does anything,
/// and a global subscriber installed elsewhere is left in place.
pub fn init_logging() {
    INIT.call_once(|| {
        let filter =
            EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVE));
        let installed = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init()
            .is_ok();
        if installed {
            tracing::debug!("Harness logging initialised");
        }
    });
}
