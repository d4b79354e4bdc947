use std::path::{Path, PathBuf};

use error_stack::Report;
use log4rs::{
    append::{
        console::{ConsoleAppender, Target},
        file::FileAppender,
    },
    config::{Appender, Root},
    encode::pattern::PatternEncoder,
    Config,
};

#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("Could not open log file {}", .0.display())]
    LogFile(PathBuf),
    #[error("Invalid logging configuration")]
    Config,
    #[error("Could not install the logger")]
    Init,
}

/// Log to stderr at `level`, and also to `log_file` if given, so that every
/// skipped candidate and fallback of a run can be reviewed afterwards.
pub fn init_logging(level: log::LevelFilter, log_file: Option<&Path>) -> error_stack::Result<(), LoggingError> {
    let stderr = ConsoleAppender::builder()
        .encoder(Box::new(PatternEncoder::new(
            "{h({d(%Y-%m-%d %H:%M:%S)} [{l}] from line {L} in {M})} - {m}{n}",
        )))
        .target(Target::Stderr)
        .build();

    let mut builder = Config::builder().appender(Appender::builder().build("stderr", Box::new(stderr)));
    let mut root = Root::builder().appender("stderr");

    if let Some(path) = log_file {
        let file = FileAppender::builder()
            .encoder(Box::new(PatternEncoder::new("{d(%Y-%m-%d %H:%M:%S)} [{l}] {M} - {m}{n}")))
            .append(false)
            .build(path)
            .map_err(|e| Report::new(LoggingError::LogFile(path.to_path_buf())).attach_printable(e.to_string()))?;
        builder = builder.appender(Appender::builder().build("file", Box::new(file)));
        root = root.appender("file");
    }

    let config = builder
        .build(root.build(level))
        .map_err(|e| Report::new(LoggingError::Config).attach_printable(e.to_string()))?;

    log4rs::init_config(config).map_err(|e| Report::new(LoggingError::Init).attach_printable(e.to_string()))?;
    Ok(())
}
