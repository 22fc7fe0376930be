mod app_dirs;
mod app_state;
mod channel;
mod client;
pub mod config;
mod error;
mod logging;
mod server;
mod single_instance;
mod singleton;

use app_state::{AppEvent, AppState, DocumentHost};
use config::{ArbitrationFallback, Config};
use simplelog::LevelFilter;
use single_instance::SingleInstance;
use singleton::InstanceRole;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::mpsc;

/// Command line: `mdview [--log-level=<lvl>] [--config-path=<path>] [--create-config] [FILE]`
#[derive(Debug, Default, PartialEq)]
struct LaunchArgs {
    log_level: Option<LevelFilter>,
    config_path_override: Option<PathBuf>,
    create_config: bool,
    file_to_open: Option<PathBuf>,
}

impl LaunchArgs {
    /// Takes raw OS arguments: a file name need not be valid UTF-8.
    fn parse<I: IntoIterator<Item = OsString>>(args: I) -> Self {
        let mut parsed = LaunchArgs::default();
        // Skip the executable name
        for arg in args.into_iter().skip(1) {
            if !arg.as_encoded_bytes().starts_with(b"--") {
                if parsed.file_to_open.is_none() {
                    parsed.file_to_open = Some(PathBuf::from(arg));
                }
                continue;
            }
            let Some(flag) = arg.to_str() else {
                continue;
            };
            if let Some(lvl) = flag.strip_prefix("--log-level=") {
                parsed.log_level = Some(logging::log_level_from_str(lvl));
            } else if let Some(path) = flag.strip_prefix("--config-path=") {
                parsed.config_path_override = Some(PathBuf::from(path));
            } else if flag == "--create-config" {
                parsed.create_config = true;
            }
        }
        parsed
    }
}

fn main() {
    let args = LaunchArgs::parse(std::env::args_os());

    if let Err(e) = app_dirs::ensure_app_dirs_exist() {
        eprintln!("Error: failed to create application directories: {e}");
        std::process::exit(1);
    }

    let log_file_path = app_dirs::get_log_file_path(args.config_path_override.as_deref())
        .unwrap_or_else(|| PathBuf::from("mdview.log"));
    logging::init_logging(args.log_level.unwrap_or(LevelFilter::Info), &log_file_path);

    let config_file_path = app_dirs::get_config_file_path(args.config_path_override.as_deref())
        .unwrap_or_else(|| PathBuf::from("configuration.json"));
    log::info!("Using configuration file: {}", config_file_path.display());

    let config = Config::load_or_create(&config_file_path).unwrap_or_else(|e| {
        eprintln!("Error: failed to load or create configuration file: {e}");
        std::process::exit(1);
    });

    if args.create_config {
        return;
    }

    // The command line wins over the configured level
    if args.log_level.is_none() {
        logging::set_log_level(logging::log_level_from_str(&config.log_level));
    }
    log::info!("Startup file: {:?}", args.file_to_open);

    let mut instance = SingleInstance::in_dir(
        &app_dirs::get_runtime_dir(),
        config.connect_timeout(),
        config.read_timeout(),
    );

    let role = instance.try_become_primary();
    log::debug!("Instance state: {:?}", instance.state());

    match role {
        Ok(InstanceRole::Secondary) => {
            forward_to_primary(&instance, args.file_to_open.as_deref());
        }
        Ok(InstanceRole::Primary) => {
            log::info!("Application starting as primary instance");
            run_primary(&mut instance, args.file_to_open.as_deref());
        }
        Err(e) => match config.arbitration_fallback {
            ArbitrationFallback::Abort => {
                error::show_native_error_dialog(&e.to_string(), "MdView Error");
                std::process::exit(1);
            }
            ArbitrationFallback::ProceedUnguarded => {
                log::warn!("{e}; continuing without single-instance protection");
                run_viewer(AppState::new(), None, args.file_to_open.as_deref());
            }
        },
    }
}

fn forward_to_primary(instance: &SingleInstance, file_to_open: Option<&Path>) {
    let Some(file) = file_to_open else {
        log::info!("Another instance is already running and there is no file to forward. Exiting.");
        return;
    };
    if let Some(line) = forward_line(file) {
        instance.send_to_primary(&line);
    }
    log::info!("Secondary instance exiting");
}

/// The line to send for `file`, or `None` if the channel cannot carry it.
fn forward_line(file: &Path) -> Option<String> {
    // Relative paths mean nothing in the primary's working directory
    let path = std::path::absolute(file).unwrap_or_else(|_| file.to_path_buf());
    match path.to_str() {
        Some(line) => Some(line.to_string()),
        None => {
            log::warn!(
                "Cannot forward {} to the running instance: path is not valid UTF-8",
                path.display()
            );
            None
        }
    }
}

fn run_primary(instance: &mut SingleInstance, file_to_open: Option<&Path>) {
    let (tx, rx) = mpsc::channel();

    if let Err(e) = instance.start_server(tx.clone()) {
        log::error!("Failed to start message channel: {e}");
    }

    let shutdown_tx = tx.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        let _ = shutdown_tx.send(AppEvent::Shutdown);
    }) {
        log::warn!("Failed to install shutdown handler: {e}");
    }

    run_viewer(AppState::new(), Some(rx), file_to_open);
    instance.shutdown();
    log::info!("Application stopped");
}

/// The viewer's event loop. Without a receiver there is nothing to wait for
/// beyond the startup file.
fn run_viewer(
    mut state: AppState,
    events: Option<mpsc::Receiver<AppEvent>>,
    file_to_open: Option<&Path>,
) {
    if let Some(file) = file_to_open {
        if let Err(e) = state.open_file(file) {
            log::warn!("{e}");
        }
    }

    match events {
        Some(rx) => {
            for event in rx {
                if !state.handle_event(event) {
                    break;
                }
            }
        }
        None => {
            let (tx, rx) = mpsc::channel();
            if let Err(e) = ctrlc::set_handler(move || {
                let _ = tx.send(AppEvent::Shutdown);
            }) {
                log::warn!("Failed to install shutdown handler: {e}");
            }
            let _ = rx.recv();
        }
    }
    log::info!("Closing viewer with {} open document(s)", state.documents().len());
}
