use simplelog::{
    ColorChoice, CombinedLogger, ConfigBuilder, LevelFilter, SharedLogger, TermLogger,
    TerminalMode, WriteLogger,
};
use std::fs::OpenOptions;
use std::path::Path;

/// Initializes the logging system.
///
/// Sets up a file logger at `log_path` and, in debug builds, a terminal
/// logger. The file is opened for appending because secondary instances
/// write into the same log as the running primary.
pub fn init_logging(log_level: LevelFilter, log_path: impl AsRef<Path>) {
    let path = log_path.as_ref();

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
        if !parent.exists() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                eprintln!("Failed to create log directory: {}", e);
            }
        }
    }

    let mut loggers: Vec<Box<dyn SharedLogger>> = Vec::new();

    match OpenOptions::new().create(true).append(true).open(path) {
        Ok(log_file) => {
            let config = ConfigBuilder::new()
                .set_time_format_rfc3339()
                .set_location_level(LevelFilter::Info)
                .build();
            loggers.push(WriteLogger::new(LevelFilter::Trace, config, log_file));
        }
        Err(e) => {
            eprintln!("Failed to create log file at {}: {}", path.display(), e);
        }
    }

    if cfg!(debug_assertions) {
        loggers.push(TermLogger::new(
            LevelFilter::Trace,
            ConfigBuilder::new().build(),
            TerminalMode::Mixed,
            ColorChoice::Auto,
        ));
    }

    if let Err(e) = CombinedLogger::init(loggers) {
        eprintln!("Failed to initialize logger: {}", e);
        return;
    }
    // Loggers accept everything; the global max level does the filtering so
    // it can be changed once the configuration is loaded.
    set_log_level(log_level);

    log::info!(
        "Logging initialized at level {} to file: {} (pid {})",
        log_level,
        path.display(),
        std::process::id()
    );
}

pub fn set_log_level(level: LevelFilter) {
    log::set_max_level(level);
}

pub fn log_level_from_str(level: &str) -> LevelFilter {
    match level.to_lowercase().as_str() {
        "off" => LevelFilter::Off,
        "error" => LevelFilter::Error,
        "warn" => LevelFilter::Warn,
        "info" => LevelFilter::Info,
        "debug" => LevelFilter::Debug,
        "trace" => LevelFilter::Trace,
        _ => LevelFilter::Info,
    }
}
