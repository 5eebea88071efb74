//! Logger setup for the three deployment profiles.

use clap::ValueEnum;
use flexi_logger::{
    colored_opt_format, opt_format, Cleanup, Criterion, Duplicate, FileSpec, FlexiLoggerError,
    Logger, LoggerHandle, Naming,
};
use std::path::PathBuf;

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Environment {
    /// Colored output on stderr only
    Local,
    /// Stderr plus rotating log files
    Dev,
    /// Rotating log files only
    Prod,
}

impl Environment {
    fn default_level(self) -> &'static str {
        match self {
            Environment::Local | Environment::Dev => "debug",
            Environment::Prod => "info",
        }
    }
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    pub env: Environment,
    pub directory: PathBuf,
    pub basename: String,
    pub rotate_bytes: u64,
    pub keep_files: usize,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            env: Environment::Local,
            directory: PathBuf::from("logs"),
            basename: "chess_party".to_string(),
            rotate_bytes: 10 * 1024 * 1024,
            keep_files: 7,
        }
    }
}

/// Starts the global logger. Keep the returned handle alive for the life of
/// the process; dropping it flushes and stops file output.
pub fn setup_logging(config: &LogConfig) -> Result<LoggerHandle, FlexiLoggerError> {
    let logger = Logger::try_with_env_or_str(config.env.default_level())?;

    let logger = match config.env {
        Environment::Local => logger.log_to_stderr().format(colored_opt_format),
        Environment::Dev | Environment::Prod => {
            let logger = logger
                .log_to_file(
                    FileSpec::default()
                        .directory(&config.directory)
                        .basename(&config.basename),
                )
                .format(opt_format)
                .rotate(
                    Criterion::Size(config.rotate_bytes),
                    Naming::Numbers,
                    Cleanup::KeepLogFiles(config.keep_files),
                );
            if config.env == Environment::Dev {
                logger.duplicate_to_stderr(Duplicate::All)
            } else {
                logger
            }
        }
    };

    logger.start()
}
