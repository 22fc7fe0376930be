//! Accept loop run by the primary instance.
//!
//! One connection is serviced at a time: accept, read one line, forward it
//! to the host as `AppEvent::FileReceived`, close, repeat. Connections that
//! arrive meanwhile wait in the listen backlog, so delivery follows accept
//! order.

use crate::app_state::{AppEvent, EventSender};
use crate::channel::{self, ChannelEndpoint, ChannelListener, LocalStream};
use crate::error::{AppError, AppResult};
use std::io::{self, Read};
use std::net::Shutdown;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

// Pause after a failed accept so a persistent fault can't spin the loop.
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);
const WAKE_TIMEOUT: Duration = Duration::from_millis(500);
const STOP_TIMEOUT: Duration = Duration::from_secs(2);
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Longest line accepted from a secondary, terminator included.
pub const MAX_LINE_BYTES: usize = 64 * 1024;

/// The connection currently being read, so `cancel` can cut it short.
type CurrentConnection = Arc<Mutex<Option<LocalStream>>>;

pub struct ChannelServer;

impl ChannelServer {
    /// Binds `endpoint` and runs the accept loop on a background thread.
    ///
    /// `read_timeout` bounds the whole line, not each read, so a client that
    /// trickles bytes is dropped as surely as one that sends nothing.
    pub fn start(
        endpoint: ChannelEndpoint,
        events: EventSender,
        read_timeout: Duration,
    ) -> AppResult<ServerHandle> {
        let listener = ChannelListener::bind(&endpoint).map_err(|e| {
            AppError::Channel(format!("failed to listen on {}: {}", endpoint, e))
        })?;
        log::info!("Channel server listening on {}", endpoint);

        let shutdown = Arc::new(AtomicBool::new(false));
        let current = CurrentConnection::default();
        let loop_shutdown = shutdown.clone();
        let loop_current = current.clone();
        let thread = thread::Builder::new()
            .name("channel-server".to_string())
            .spawn(move || accept_loop(listener, loop_shutdown, loop_current, events, read_timeout))?;

        Ok(ServerHandle {
            endpoint,
            shutdown,
            current,
            wake_failed: AtomicBool::new(false),
            thread: Some(thread),
        })
    }
}

pub struct ServerHandle {
    endpoint: ChannelEndpoint,
    shutdown: Arc<AtomicBool>,
    current: CurrentConnection,
    wake_failed: AtomicBool,
    thread: Option<JoinHandle<()>>,
}

impl ServerHandle {
    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Asks the loop to stop. A connection being read is shut down. A blocked
    /// accept is woken by a throwaway connection, which the loop drops
    /// without raising an event.
    pub fn cancel(&self) {
        if self.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(stream) = lock_current(&self.current).as_ref() {
            if let Err(e) = stream.shutdown(Shutdown::Both) {
                log::debug!("Failed to shut down pending channel connection: {}", e);
            }
        }
        if !self.is_running() {
            return;
        }
        match channel::connect(&self.endpoint, WAKE_TIMEOUT) {
            Ok(_) => log::debug!("Woke channel server for shutdown"),
            Err(e) => {
                log::warn!("Channel server wake-up connect to {} failed: {}", self.endpoint, e);
                // The loop may have exited on its own while we were connecting
                self.wake_failed.store(self.is_running(), Ordering::SeqCst);
            }
        }
    }

    /// Cancels and waits for the loop to finish, for at most a couple of
    /// seconds. A loop that cannot be woken is left running detached.
    pub fn stop(mut self) {
        self.cancel();
        self.join();
    }

    fn join(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };

        if self.wake_failed.load(Ordering::SeqCst) {
            log::warn!("Channel server could not be woken, detaching its thread");
            return;
        }

        let deadline = Instant::now() + STOP_TIMEOUT;
        while !thread.is_finished() {
            if Instant::now() >= deadline {
                log::warn!(
                    "Channel server did not stop within {:?}, detaching its thread",
                    STOP_TIMEOUT
                );
                return;
            }
            thread::sleep(STOP_POLL_INTERVAL);
        }

        if thread.join().is_err() {
            log::error!("Channel server thread panicked");
        }
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.cancel();
        self.join();
    }
}

fn lock_current(current: &CurrentConnection) -> MutexGuard<'_, Option<LocalStream>> {
    current.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn accept_loop(
    listener: ChannelListener,
    shutdown: Arc<AtomicBool>,
    current: CurrentConnection,
    events: EventSender,
    read_timeout: Duration,
) {
    loop {
        let accepted = listener.accept();
        if shutdown.load(Ordering::SeqCst) {
            break;
        }

        let stream = match accepted {
            Ok(stream) => stream,
            Err(e) => {
                log::warn!("Channel server accept error: {}", e);
                thread::sleep(ACCEPT_RETRY_DELAY);
                continue;
            }
        };

        // Publish the connection before the flag check, so a cancel racing
        // with us either sees it or is seen by us.
        *lock_current(&current) = stream.try_clone().ok();
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        let message = read_message(stream, read_timeout);
        lock_current(&current).take();
        if shutdown.load(Ordering::SeqCst) {
            break;
        }

        match message {
            Ok(Some(path)) => {
                log::info!("Received file from secondary instance: {}", path);
                if events.send(AppEvent::FileReceived(path)).is_err() {
                    log::debug!("Event receiver closed, stopping channel server");
                    break;
                }
            }
            Ok(None) => log::debug!("Ignoring blank message"),
            Err(e) => log::warn!("Channel server error: {}", e),
        }
    }
    log::info!("Channel server stopped");
}

/// Reads the single line a secondary sends. Blank lines yield `None`.
///
/// The line must be complete within `read_timeout` and no longer than
/// [`MAX_LINE_BYTES`]. End of stream also ends the line.
fn read_message(mut stream: LocalStream, read_timeout: Duration) -> io::Result<Option<String>> {
    let deadline = Instant::now() + read_timeout;
    let mut line = Vec::new();
    let mut chunk = [0u8; 1024];

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("no complete line within {:?}", read_timeout),
            ));
        }
        stream.set_read_timeout(Some(remaining))?;

        let read = match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(read) => read,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };

        let received = &chunk[..read];
        let end = received.iter().position(|b| *b == b'\n');
        line.extend_from_slice(&received[..end.map_or(read, |i| i + 1)]);
        if line.len() > MAX_LINE_BYTES {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("line exceeds {} bytes", MAX_LINE_BYTES),
            ));
        }
        if end.is_some() {
            break;
        }
    }

    let line = String::from_utf8(line)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    Ok(parse_line(&line))
}

fn parse_line(line: &str) -> Option<String> {
    let path = line.trim_end_matches(['\r', '\n']);
    if path.trim().is_empty() {
        None
    } else {
        Some(path.to_string())
    }
}
