//! Process wide log output.
use thiserror::Error;
use tracing::Level;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("could not start logging: {0}")]
    Init(String),
}

/// Level actually used, debug mode always logs at debug level or finer.
pub fn effective_level(level: Level, debug: bool) -> Level {
    if debug && level < Level::DEBUG {
        Level::DEBUG
    } else {
        level
    }
}

/// Installs the global subscriber. `level` is the default directive, `RUST_LOG` takes
/// precedence when it is set.
pub fn try_init(level: Level) -> Result<(), LoggingError> {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(level).into())
        .from_env_lossy();

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_names(true),
        )
        .try_init()
        .map_err(|err| LoggingError::Init(err.to_string()))
}
