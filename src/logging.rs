use std::fmt::Debug;
use std::str::FromStr;
use thiserror::Error;
use tracing::metadata::LevelFilter;
use tracing_subscriber::fmt::format::PrettyFields;
use tracing_subscriber::EnvFilter;

#[derive(Error, Debug)]
pub enum LoggingError {
    #[error("invalid log level: `{0}`")]
    InvalidLevel(String),

    #[error("init logging error: `{0}`")]
    TryInitError(String),
}

pub struct Logging;

impl Logging {
    /// Installs the global subscriber. `RUST_LOG` directives take precedence over `level`.
    pub fn try_init(level: &str) -> Result<(), LoggingError> {
        tracing_subscriber::fmt()
            .with_env_filter(Self::env_filter(level)?)
            .fmt_fields(PrettyFields::new())
            .try_init()
            .map_err(|_| {
                LoggingError::TryInitError(
                    "unable to set runtime control global logging subscriber".to_string(),
                )
            })
    }

    fn env_filter(level: &str) -> Result<EnvFilter, LoggingError> {
        let level = LevelFilter::from_str(level)
            .map_err(|_| LoggingError::InvalidLevel(level.to_string()))?;
        Ok(EnvFilter::builder()
            .with_default_directive(level.into())
            .from_env_lossy())
    }
}
