use crate::channel::{self, ChannelEndpoint};
use std::io::{self, Write};
use std::time::Duration;

/// Forwards `path` to the primary instance as a single line.
///
/// One attempt only. On failure the request is dropped and the reason logged;
/// the caller exits either way.
pub fn send_to_primary(endpoint: &ChannelEndpoint, path: &str, timeout: Duration) -> bool {
    match try_send(endpoint, path, timeout) {
        Ok(()) => {
            log::info!("Sent file to primary instance: {:?}", path);
            true
        }
        Err(e) => {
            log::warn!("Failed to send file to primary instance, request dropped: {}", e);
            false
        }
    }
}

fn try_send(endpoint: &ChannelEndpoint, path: &str, timeout: Duration) -> io::Result<()> {
    if path.contains(['\n', '\r']) {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("path {:?} contains a line break", path),
        ));
    }

    let mut stream = channel::connect(endpoint, timeout)?;
    stream.write_all(path.as_bytes())?;
    stream.write_all(b"\n")?;
    stream.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app_state::AppEvent;
    use crate::server::ChannelServer;
    use std::collections::HashSet;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Instant;
    use tempfile::TempDir;

    const TIMEOUT: Duration = Duration::from_secs(1);

    fn endpoint(dir: &TempDir, name: &str) -> ChannelEndpoint {
        ChannelEndpoint::new(format!("{name}_{}", std::process::id()), dir.path())
    }

    #[test]
    fn test_send_reaches_server() {
        let dir = TempDir::new().unwrap();
        let endpoint = endpoint(&dir, "Send_Pipe");
        let (tx, rx) = mpsc::channel();
        let server = ChannelServer::start(endpoint.clone(), tx, TIMEOUT).unwrap();

        assert!(send_to_primary(&endpoint, "/home/me/README.md", TIMEOUT));
        assert_eq!(
            rx.recv_timeout(TIMEOUT).unwrap(),
            AppEvent::FileReceived("/home/me/README.md".into())
        );

        server.stop();
    }

    #[test]
    fn test_empty_path_is_sent_but_not_delivered() {
        let dir = TempDir::new().unwrap();
        let endpoint = endpoint(&dir, "Empty_Pipe");
        let (tx, rx) = mpsc::channel();
        let server = ChannelServer::start(endpoint.clone(), tx, TIMEOUT).unwrap();

        assert!(send_to_primary(&endpoint, "", TIMEOUT));
        assert!(send_to_primary(&endpoint, "marker.md", TIMEOUT));
        // Connections are serviced in order, so the marker proves the blank
        // line was consumed without an event
        assert_eq!(
            rx.recv_timeout(TIMEOUT).unwrap(),
            AppEvent::FileReceived("marker.md".into())
        );

        server.stop();
    }

    #[test]
    fn test_fails_without_primary() {
        let dir = TempDir::new().unwrap();
        let endpoint = endpoint(&dir, "Nobody_Pipe");
        let started = Instant::now();
        assert!(!send_to_primary(&endpoint, "a.md", TIMEOUT));
        assert!(started.elapsed() < TIMEOUT + Duration::from_millis(500));
    }

    #[test]
    fn test_refuses_path_with_line_break() {
        let dir = TempDir::new().unwrap();
        let endpoint = endpoint(&dir, "Break_Pipe");
        let (tx, rx) = mpsc::channel();
        let server = ChannelServer::start(endpoint.clone(), tx, TIMEOUT).unwrap();

        assert!(!send_to_primary(&endpoint, "two\nlines.md", TIMEOUT));
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());

        server.stop();
    }

    #[test]
    fn test_concurrent_senders_each_delivered_once() {
        const SENDERS: usize = 6;
        let dir = TempDir::new().unwrap();
        let endpoint = endpoint(&dir, "Burst_Pipe");
        let (tx, rx) = mpsc::channel();
        let server = ChannelServer::start(endpoint.clone(), tx, TIMEOUT).unwrap();

        let senders: Vec<_> = (0..SENDERS)
            .map(|i| {
                let endpoint = endpoint.clone();
                thread::spawn(move || send_to_primary(&endpoint, &format!("doc{i}.md"), TIMEOUT))
            })
            .collect();
        for sender in senders {
            assert!(sender.join().unwrap());
        }

        let mut received = HashSet::new();
        for _ in 0..SENDERS {
            match rx.recv_timeout(TIMEOUT).unwrap() {
                AppEvent::FileReceived(path) => assert!(received.insert(path)),
                other => panic!("unexpected event {:?}", other),
            }
        }
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
        let expected: HashSet<_> = (0..SENDERS).map(|i| format!("doc{i}.md")).collect();
        assert_eq!(received, expected);

        server.stop();
    }
}
