use crate::app_state::EventSender;
use crate::channel::ChannelEndpoint;
use crate::client;
use crate::error::{AppError, AppResult};
use crate::server::{ChannelServer, ServerHandle};
use crate::singleton::{InstanceArbiter, InstanceRole};
use std::path::Path;
use std::time::Duration;

/// Where this process is in the single-instance lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceState {
    Unstarted,
    Primary,
    Listening,
    Secondary,
    ArbitrationFailed,
    Released,
}

/// Owns the instance lock, the channel endpoint and, in the primary, the
/// running channel server.
pub struct SingleInstance {
    arbiter: InstanceArbiter,
    endpoint: ChannelEndpoint,
    connect_timeout: Duration,
    read_timeout: Duration,
    server: Option<ServerHandle>,
    state: InstanceState,
}

impl SingleInstance {
    pub fn new(
        arbiter: InstanceArbiter,
        endpoint: ChannelEndpoint,
        connect_timeout: Duration,
        read_timeout: Duration,
    ) -> Self {
        Self {
            arbiter,
            endpoint,
            connect_timeout,
            read_timeout,
            server: None,
            state: InstanceState::Unstarted,
        }
    }

    /// Lock and channel under `runtime_dir`, using the application names.
    pub fn in_dir(runtime_dir: &Path, connect_timeout: Duration, read_timeout: Duration) -> Self {
        Self::new(
            InstanceArbiter::in_dir(runtime_dir),
            ChannelEndpoint::in_dir(runtime_dir),
            connect_timeout,
            read_timeout,
        )
    }

    pub fn state(&self) -> InstanceState {
        self.state
    }

    /// Arbitrates once. Later calls repeat the first outcome, except after
    /// `shutdown`, when the instance is spent.
    pub fn try_become_primary(&mut self) -> AppResult<InstanceRole> {
        match self.state {
            InstanceState::Unstarted => {}
            InstanceState::Primary | InstanceState::Listening => return Ok(InstanceRole::Primary),
            InstanceState::Secondary => return Ok(InstanceRole::Secondary),
            InstanceState::ArbitrationFailed => {
                return Err(AppError::Arbitration(
                    "an earlier arbitration attempt already failed".to_string(),
                ));
            }
            InstanceState::Released => {
                return Err(AppError::Lifecycle(
                    "cannot arbitrate after the instance was shut down".to_string(),
                ));
            }
        }

        match self.arbiter.try_become_primary() {
            Ok(InstanceRole::Primary) => {
                self.state = InstanceState::Primary;
                Ok(InstanceRole::Primary)
            }
            Ok(InstanceRole::Secondary) => {
                self.state = InstanceState::Secondary;
                Ok(InstanceRole::Secondary)
            }
            Err(e) => {
                log::error!("{}", e);
                self.state = InstanceState::ArbitrationFailed;
                Err(e)
            }
        }
    }

    /// Starts listening for secondary instances. Valid once, and only after
    /// becoming primary.
    pub fn start_server(&mut self, events: EventSender) -> AppResult<()> {
        if self.state != InstanceState::Primary {
            return Err(AppError::Lifecycle(format!(
                "cannot start channel server in state {:?}",
                self.state
            )));
        }
        let server = ChannelServer::start(self.endpoint.clone(), events, self.read_timeout)?;
        self.server = Some(server);
        self.state = InstanceState::Listening;
        Ok(())
    }

    pub fn send_to_primary(&self, path: &str) -> bool {
        client::send_to_primary(&self.endpoint, path, self.connect_timeout)
    }

    /// Stops the server and releases the lock. Safe to call more than once.
    pub fn shutdown(&mut self) {
        if let Some(server) = self.server.take() {
            server.stop();
        }
        if self.arbiter.is_primary() {
            self.arbiter.release_primary();
            self.state = InstanceState::Released;
        }
    }
}

impl Drop for SingleInstance {
    fn drop(&mut self) {
        self.shutdown();
    }
}
