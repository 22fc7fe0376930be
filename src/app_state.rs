use crate::error::{AppError, AppResult};
use std::path::{Path, PathBuf};
use std::sync::mpsc::Sender;

/// Messages handed to the host's event loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppEvent {
    /// A secondary instance asked us to open this path.
    FileReceived(String),
    Shutdown,
}

pub type EventSender = Sender<AppEvent>;

/// The window side of the viewer: what the event loop drives.
pub trait DocumentHost {
    fn open_file(&mut self, path: &Path) -> AppResult<()>;
    fn bring_to_front(&mut self);
}

/// Open documents of the running viewer, in tab order.
#[derive(Debug, Default)]
pub struct AppState {
    documents: Vec<PathBuf>,
    active: Option<usize>,
}

impl AppState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn documents(&self) -> &[PathBuf] {
        &self.documents
    }

    pub fn active_document(&self) -> Option<&Path> {
        self.active.map(|i| self.documents[i].as_path())
    }

    /// Applies one event. Returns false once the loop should stop.
    pub fn handle_event(&mut self, event: AppEvent) -> bool {
        match event {
            AppEvent::FileReceived(path) => {
                self.bring_to_front();
                if let Err(e) = self.open_file(Path::new(&path)) {
                    log::warn!("{}", e);
                }
                log::debug!("Active document: {:?}", self.active_document());
                true
            }
            AppEvent::Shutdown => {
                log::info!("Shutdown requested");
                false
            }
        }
    }
}

impl DocumentHost for AppState {
    fn open_file(&mut self, path: &Path) -> AppResult<()> {
        if !path.is_file() {
            return Err(AppError::Document(format!(
                "File not found: {}",
                path.display()
            )));
        }

        if let Some(index) = self.documents.iter().position(|p| p == path) {
            log::info!("File already open, activating existing tab: {}", path.display());
            self.active = Some(index);
            return Ok(());
        }

        log::info!("Opening {}", path.display());
        self.documents.push(path.to_path_buf());
        self.active = Some(self.documents.len() - 1);
        Ok(())
    }

    fn bring_to_front(&mut self) {
        log::debug!("Bringing viewer window to front");
    }
}
