//! Structured logging setup.

use tracing_subscriber::{fmt, EnvFilter};

use crate::types::{PenumbraError, Result};

/// Installs a global `fmt` subscriber filtered by `filter`, an `EnvFilter`
/// directive such as `"info"` or `"penumbra::engine=debug"`.
pub fn init_logging(filter: &str) -> Result<()> {
    fmt()
        .with_env_filter(
            EnvFilter::try_new(filter)
                .map_err(|e| PenumbraError::Config(format!("invalid log filter: {e}")))?,
        )
        .with_target(true)
        .with_thread_ids(true)
        .try_init()
        .map_err(|_| PenumbraError::Config("logging already initialized".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_initialisation_fails() {
        let _ = init_logging("warn");
        assert!(init_logging("warn").is_err());
    }
}
