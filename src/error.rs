use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    /// The instance lock could not be created or queried, so primacy is unknown.
    #[error("Cannot determine primary instance: {0}")]
    Arbitration(String),

    #[error("Message channel error: {0}")]
    Channel(String),

    /// An instance operation was called in a state that does not allow it.
    #[error("Instance lifecycle error: {0}")]
    Lifecycle(String),

    #[error("Document error: {0}")]
    Document(String),
}

pub type AppResult<T> = Result<T, AppError>;

impl From<serde_json::Error> for AppError {
    fn from(error: serde_json::Error) -> Self {
        AppError::Config(format!("JSON error: {}", error))
    }
}

// Helper for showing native error dialogs on Windows
#[cfg(target_os = "windows")]
pub fn show_native_error_dialog(msg: &str, caption: &str) {
    use std::ptr;
    use winapi::um::winuser::{MB_ICONERROR, MB_OK, MessageBoxW};
    let msg_w: Vec<u16> = msg.encode_utf16().chain(std::iter::once(0)).collect();
    let caption_w: Vec<u16> = caption.encode_utf16().chain(std::iter::once(0)).collect();
    unsafe {
        MessageBoxW(
            ptr::null_mut(),
            msg_w.as_ptr(),
            caption_w.as_ptr(),
            MB_OK | MB_ICONERROR,
        );
    }
}

#[cfg(not(target_os = "windows"))]
pub fn show_native_error_dialog(msg: &str, caption: &str) {
    eprintln!("{caption}: {msg}");
}
