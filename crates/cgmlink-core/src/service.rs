//! The service actor that owns the connection core.
//!
//! [`CgmService`] spawns one task that owns a [`ConnectionManager`]. User
//! commands arrive on a bounded channel with oneshot replies; radio and
//! vendor callbacks arrive on the unbounded callback inbox. Both are applied
//! one at a time on that task, so no state is ever shared across threads.
//! Observers follow the state through a `watch` channel and everything else
//! through the event broadcast.
//!
//! # Example
//!
//! ```no_run
//! use cgmlink_core::mock::{MockHandshakeFactory, MockRadio};
//! use cgmlink_core::{CgmConfig, CgmService, ConnectionManager, callback_channel};
//!
//! # async fn example() -> cgmlink_core::Result<()> {
//! let (callbacks, inbox) = callback_channel();
//! let radio = MockRadio::powered_on();
//! radio.respond_via(callbacks.clone());
//! let manager = ConnectionManager::new(
//!     CgmConfig::default(),
//!     radio,
//!     MockHandshakeFactory::responding(callbacks),
//! )?;
//!
//! let service = CgmService::spawn(manager, inbox);
//! service.start_scan().await?;
//! println!("{}", service.state());
//! service.shutdown().await;
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use cgmlink_types::{ConnectionState, DeviceCandidate, DeviceId, PairingCredential};

use crate::error::{Error, Result};
use crate::events::{CallbackReceiver, EventDispatcher, EventReceiver};
use crate::manager::{CgmSnapshot, ConnectionManager};

const COMMAND_CAPACITY: usize = 32;

#[derive(Debug)]
enum Command {
    StartScan(oneshot::Sender<()>),
    Connect {
        device: DeviceId,
        serial: String,
        reply: oneshot::Sender<Result<()>>,
    },
    Disconnect(oneshot::Sender<()>),
    AutoReconnect {
        credential: PairingCredential,
        reply: oneshot::Sender<()>,
    },
    Snapshot(oneshot::Sender<CgmSnapshot>),
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Command::StartScan(_) => "start_scan",
            Command::Connect { .. } => "connect",
            Command::Disconnect(_) => "disconnect",
            Command::AutoReconnect { .. } => "auto_reconnect",
            Command::Snapshot(_) => "snapshot",
        }
    }
}

/// Handle to the running connection core.
#[derive(Debug)]
pub struct CgmService {
    commands: mpsc::Sender<Command>,
    state: watch::Receiver<ConnectionState>,
    events: EventDispatcher,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl CgmService {
    /// Spawn the actor on the current runtime.
    ///
    /// `callbacks` must be the receiving half of the channel whose sender was
    /// given to the radio and handshake factory inside `manager`.
    pub fn spawn(manager: ConnectionManager, callbacks: CallbackReceiver) -> Self {
        let (commands, command_rx) = mpsc::channel(COMMAND_CAPACITY);
        let state = manager.subscribe_state();
        let events = manager.events().clone();
        let cancel = CancellationToken::new();

        let task = tokio::spawn(run(manager, command_rx, callbacks, cancel.clone()));

        Self {
            commands,
            state,
            events,
            cancel,
            task,
        }
    }

    /// Clear candidates and start scanning.
    pub async fn start_scan(&self) -> Result<()> {
        self.request(Command::StartScan).await
    }

    /// Open a session with `device`, authenticated by `serial`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidCredential`] if the serial is empty or
    /// malformed. Connection failures are reported through the state.
    pub async fn connect(&self, device: DeviceId, serial: &str) -> Result<()> {
        let serial = serial.to_string();
        self.request(|reply| Command::Connect {
            device,
            serial,
            reply,
        })
        .await?
    }

    /// Open a session with a scanned candidate.
    pub async fn connect_candidate(&self, candidate: &DeviceCandidate, serial: &str) -> Result<()> {
        self.connect(candidate.id.clone(), serial).await
    }

    /// Tear down the session and go to `disconnected`.
    pub async fn disconnect(&self) -> Result<()> {
        self.request(Command::Disconnect).await
    }

    /// Reconnect to a stored pairing, scanning if the radio no longer knows
    /// the device.
    pub async fn auto_reconnect(&self, credential: PairingCredential) -> Result<()> {
        self.request(|reply| Command::AutoReconnect { credential, reply })
            .await
    }

    pub async fn snapshot(&self) -> Result<CgmSnapshot> {
        self.request(Command::Snapshot).await
    }

    /// The current state.
    pub fn state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    /// A receiver that always holds the latest state.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Subscribe to core events.
    pub fn subscribe(&self) -> EventReceiver {
        self.events.subscribe()
    }

    /// Wait until the state satisfies `predicate`, up to `timeout`.
    ///
    /// Returns `None` on timeout or if the service stopped.
    pub async fn wait_for_state(
        &self,
        timeout: Duration,
        predicate: impl FnMut(&ConnectionState) -> bool,
    ) -> Option<ConnectionState> {
        let mut rx = self.state.clone();
        match tokio::time::timeout(timeout, rx.wait_for(predicate)).await {
            Ok(Ok(state)) => Some((*state).clone()),
            _ => None,
        }
    }

    /// Disconnect and stop the actor.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            debug!("Service task ended abnormally: {}", e);
        }
    }

    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(build(reply))
            .await
            .map_err(|_| Error::ServiceShutdown)?;
        rx.await.map_err(|_| Error::ServiceShutdown)
    }
}

async fn run(
    mut manager: ConnectionManager,
    mut commands: mpsc::Receiver<Command>,
    mut callbacks: CallbackReceiver,
    cancel: CancellationToken,
) {
    info!("Connection service started");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("Connection service cancelled");
                break;
            }
            cmd = commands.recv() => match cmd {
                Some(cmd) => handle_command(&mut manager, cmd),
                None => {
                    debug!("All service handles dropped");
                    break;
                }
            },
            Some(callback) = callbacks.recv() => manager.handle_callback(callback),
        }
    }

    manager.disconnect();
    info!("Connection service stopped");
}

fn handle_command(manager: &mut ConnectionManager, cmd: Command) {
    debug!(command = cmd.name(), "Handling command");
    // A dropped reply receiver just means the caller stopped waiting.
    match cmd {
        Command::StartScan(reply) => {
            manager.start_scan();
            let _ = reply.send(());
        }
        Command::Connect {
            device,
            serial,
            reply,
        } => {
            let _ = reply.send(manager.connect(&device, &serial));
        }
        Command::Disconnect(reply) => {
            manager.disconnect();
            let _ = reply.send(());
        }
        Command::AutoReconnect { credential, reply } => {
            manager.auto_reconnect(credential);
            let _ = reply.send(());
        }
        Command::Snapshot(reply) => {
            let _ = reply.send(manager.snapshot());
        }
    }
}
