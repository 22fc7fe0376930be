//! Named local message channel.
//!
//! On Unix the channel is a stream socket in the runtime directory. On
//! Windows the primary listens on an ephemeral loopback TCP port and records
//! it in a port file in the runtime directory. The runtime directory is
//! per-user, so each user's launches only ever find their own primary.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Stable across releases so that old and new versions can talk to each other.
pub const CHANNEL_NAME: &str = "MdView_Pipe";

#[derive(Debug, Clone)]
pub struct ChannelEndpoint {
    name: String,
    dir: PathBuf,
}

impl ChannelEndpoint {
    pub fn new(name: impl Into<String>, dir: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            dir: dir.into(),
        }
    }

    /// The application's channel inside `runtime_dir`.
    pub fn in_dir(runtime_dir: &Path) -> Self {
        Self::new(CHANNEL_NAME, runtime_dir)
    }

    /// Socket file backing the channel on Unix.
    pub fn socket_path(&self) -> PathBuf {
        self.dir.join(format!("{}.sock", self.name))
    }

    /// File holding the primary's loopback port on Windows.
    pub fn port_path(&self) -> PathBuf {
        self.dir.join(format!("{}.port", self.name))
    }
}

impl std::fmt::Display for ChannelEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if cfg!(unix) {
            write!(f, "{}", self.socket_path().display())
        } else {
            write!(f, "{}", self.port_path().display())
        }
    }
}

/// Reads the port a primary recorded with [`write_port_file`].
pub fn read_port_file(path: &Path) -> io::Result<u16> {
    let contents = std::fs::read_to_string(path)?;
    contents.trim().parse().map_err(|e| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("bad port file {}: {}", path.display(), e),
        )
    })
}

/// Records `port` so that a reader never sees a half-written file.
pub fn write_port_file(path: &Path, port: u16) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let staging = path.with_extension("port.tmp");
    std::fs::write(&staging, port.to_string())?;
    std::fs::rename(&staging, path)
}

#[cfg(unix)]
pub mod platform {
    use super::ChannelEndpoint;
    use std::io;
    use std::os::unix::net::{UnixListener, UnixStream};
    use std::path::PathBuf;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    pub type LocalStream = UnixStream;

    pub struct ChannelListener {
        listener: UnixListener,
        path: PathBuf,
    }

    impl ChannelListener {
        /// Binds the endpoint. Only the lock holder calls this, so a socket
        /// file that is already there was left by a dead primary.
        pub fn bind(endpoint: &ChannelEndpoint) -> io::Result<Self> {
            let path = endpoint.socket_path();
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            if path.exists() {
                log::debug!("Removing stale channel socket {}", path.display());
                std::fs::remove_file(&path)?;
            }
            let listener = UnixListener::bind(&path)?;
            Ok(Self { listener, path })
        }

        pub fn accept(&self) -> io::Result<LocalStream> {
            self.listener.accept().map(|(stream, _)| stream)
        }
    }

    impl Drop for ChannelListener {
        fn drop(&mut self) {
            let _ = std::fs::remove_file(&self.path);
        }
    }

    /// Unix sockets have no connect timeout, so the connect runs on a helper
    /// thread. If it times out the thread is left to finish on its own.
    pub fn connect(endpoint: &ChannelEndpoint, timeout: Duration) -> io::Result<LocalStream> {
        let path = endpoint.socket_path();
        let (tx, rx) = mpsc::channel();
        thread::Builder::new()
            .name("channel-connect".to_string())
            .spawn(move || {
                let _ = tx.send(UnixStream::connect(path));
            })?;

        match rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(_) => Err(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("no answer from {} within {:?}", endpoint, timeout),
            )),
        }
    }
}

#[cfg(windows)]
pub mod platform {
    use super::{ChannelEndpoint, read_port_file, write_port_file};
    use std::io;
    use std::net::{Ipv4Addr, SocketAddr, TcpListener, TcpStream};
    use std::path::PathBuf;
    use std::time::Duration;

    pub type LocalStream = TcpStream;

    pub struct ChannelListener {
        listener: TcpListener,
        port_path: PathBuf,
    }

    impl ChannelListener {
        /// Binds an ephemeral loopback port and publishes it in the port file.
        /// Only the lock holder calls this, so an existing port file is stale.
        pub fn bind(endpoint: &ChannelEndpoint) -> io::Result<Self> {
            let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))?;
            let port = listener.local_addr()?.port();
            let port_path = endpoint.port_path();
            write_port_file(&port_path, port)?;
            log::debug!("Channel listening on 127.0.0.1:{} ({})", port, port_path.display());
            Ok(Self {
                listener,
                port_path,
            })
        }

        pub fn accept(&self) -> io::Result<LocalStream> {
            self.listener.accept().map(|(stream, _)| stream)
        }
    }

    impl Drop for ChannelListener {
        fn drop(&mut self) {
            let _ = std::fs::remove_file(&self.port_path);
        }
    }

    /// A missing port file means no primary is listening.
    pub fn connect(endpoint: &ChannelEndpoint, timeout: Duration) -> io::Result<LocalStream> {
        let port = read_port_file(&endpoint.port_path())?;
        let address = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
        TcpStream::connect_timeout(&address, timeout)
    }
}

pub use platform::{ChannelListener, LocalStream};

/// Connects to the endpoint, giving up after `timeout`.
pub fn connect(endpoint: &ChannelEndpoint, timeout: Duration) -> io::Result<LocalStream> {
    let stream = platform::connect(endpoint, timeout)?;
    stream.set_write_timeout(Some(timeout))?;
    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::thread;
    use tempfile::TempDir;

    #[test]
    fn test_port_file_roundtrip_and_rejects_garbage() {
        let dir = TempDir::new().unwrap();
        let endpoint = ChannelEndpoint::new("Port_Pipe", dir.path().join("nested"));
        let path = endpoint.port_path();
        assert_eq!(path, dir.path().join("nested").join("Port_Pipe.port"));

        write_port_file(&path, 50123).unwrap();
        assert_eq!(read_port_file(&path).unwrap(), 50123);
        assert!(!path.with_extension("port.tmp").exists());

        std::fs::write(&path, "not a port").unwrap();
        let err = read_port_file(&path).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);

        let missing = read_port_file(&dir.path().join("gone.port")).unwrap_err();
        assert_eq!(missing.kind(), io::ErrorKind::NotFound);
    }

    #[cfg(windows)]
    #[test]
    fn test_endpoint_is_scoped_to_its_runtime_dir() {
        let first_user = TempDir::new().unwrap();
        let second_user = TempDir::new().unwrap();
        let mine = ChannelEndpoint::new(CHANNEL_NAME, first_user.path());
        let theirs = ChannelEndpoint::new(CHANNEL_NAME, second_user.path());

        let listener = ChannelListener::bind(&mine).unwrap();
        assert!(mine.port_path().exists());

        // Same channel name, other runtime dir: nothing to connect to
        let err = connect(&theirs, Duration::from_millis(500)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
        assert!(connect(&mine, Duration::from_millis(500)).is_ok());

        drop(listener);
        assert!(!mine.port_path().exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_socket_path_uses_name() {
        let endpoint = ChannelEndpoint::new("Test_Pipe", "/run/user/1000");
        assert_eq!(
            endpoint.socket_path(),
            PathBuf::from("/run/user/1000/Test_Pipe.sock")
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_bind_replaces_stale_socket_and_cleans_up() {
        let dir = TempDir::new().unwrap();
        let endpoint = ChannelEndpoint::new("Stale_Pipe", dir.path());
        std::fs::write(endpoint.socket_path(), b"").unwrap();

        let listener = ChannelListener::bind(&endpoint).unwrap();
        assert!(endpoint.socket_path().exists());
        drop(listener);
        assert!(!endpoint.socket_path().exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_connect_without_listener_fails_fast() {
        let dir = TempDir::new().unwrap();
        let endpoint = ChannelEndpoint::new("Missing_Pipe", dir.path());
        let started = std::time::Instant::now();
        assert!(connect(&endpoint, Duration::from_millis(500)).is_err());
        assert!(started.elapsed() < Duration::from_millis(1000));
    }

    #[test]
    fn test_connect_and_accept() {
        let dir = TempDir::new().unwrap();
        let endpoint = ChannelEndpoint::new(
            format!("Accept_Pipe_{}", std::process::id()),
            dir.path(),
        );
        let listener = ChannelListener::bind(&endpoint).unwrap();

        let client_endpoint = endpoint.clone();
        let client = thread::spawn(move || {
            let mut stream = connect(&client_endpoint, Duration::from_secs(1)).unwrap();
            stream.write_all(b"hello\n").unwrap();
        });

        let mut stream = listener.accept().unwrap();
        let mut received = String::new();
        stream.read_to_string(&mut received).unwrap();
        client.join().unwrap();
        assert_eq!(received, "hello\n");
    }
}
