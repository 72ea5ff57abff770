//! Connection core for continuous glucose monitor (CGM) transmitters.
//!
//! This crate discovers nearby transmitters, opens an authenticated session
//! with one of them through a vendor handshake, keeps the link alive across
//! transient radio drops, and turns the transmitter's samples into readings.
//!
//! # Features
//!
//! - **Device directory**: deduplicated scan candidates filtered by name
//! - **Link session**: one credential-bound session at a time, stale
//!   callbacks filtered by device identifier
//! - **State machine**: `disconnected -> scanning -> connecting -> connected`
//!   plus `error(reason)`, observable through a `watch` channel
//! - **Keep-alive policy**: a bounded reconnect budget on link loss
//! - **Reading ingest**: mg/dL normalization, a 24-hour window, and
//!   fire-and-forget persistence
//! - **Auto-reconnect**: resolve a stored pairing without scanning when the
//!   platform still knows the device
//!
//! # Architecture
//!
//! All state lives in a [`ConnectionManager`] owned by the [`CgmService`]
//! actor task. The [`Radio`] and [`Handshake`] seams never mutate state;
//! they post callbacks through a [`CallbackSender`] and the actor applies
//! them in delivery order. [`BtleRadio`] is the btleplug implementation of
//! the radio; the vendor handshake is always supplied by the caller.
//!
//! # Platform Differences
//!
//! - **macOS**: devices are identified by the UUID CoreBluetooth assigns.
//!   It is stable per Mac but may change after a Bluetooth reset.
//! - **Linux/Windows**: devices are identified by MAC address.
//!
//! A stored pairing therefore may fail to resolve after a platform reset;
//! auto-reconnect falls back to a full scan in that case.
//!
//! # Quick Start
//!
//! ```no_run
//! use cgmlink_core::mock::MockHandshakeFactory;
//! use cgmlink_core::{BtleRadio, CgmConfig, CgmService, ConnectionManager, callback_channel};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let (callbacks, inbox) = callback_channel();
//!     let radio = BtleRadio::new(callbacks.clone()).await?;
//!     let handshakes = MockHandshakeFactory::responding(callbacks);
//!     let manager = ConnectionManager::new(CgmConfig::default(), radio, handshakes)?;
//!
//!     let service = CgmService::spawn(manager, inbox);
//!     let mut events = service.subscribe();
//!     service.start_scan().await?;
//!
//!     while let Ok(event) = events.recv().await {
//!         println!("{:?}", event);
//!     }
//!     Ok(())
//! }
//! ```

pub mod btle;
pub mod directory;
pub mod error;
pub mod events;
pub mod ingest;
pub mod manager;
pub mod mock;
pub mod radio;
pub mod reconnect;
pub mod service;
pub mod session;
pub mod state;
pub mod vendor;

pub use btle::BtleRadio;
pub use directory::{DEFAULT_NAME_FILTERS, DeviceDirectory, NameFilter};
pub use error::{Error, Result};
pub use events::{
    Callback, CallbackReceiver, CallbackSender, CgmEvent, EventDispatcher, EventReceiver,
    EventSender, callback_channel,
};
pub use ingest::{DEFAULT_RETENTION, ReadingIngest, ReadingSink, ReadingWindow};
pub use manager::{CgmConfig, CgmSnapshot, ConnectionManager};
pub use radio::{Advertisement, Radio, RadioEvent};
pub use reconnect::{DEFAULT_MAX_ATTEMPTS, ReconnectDecision, ReconnectPolicy};
pub use service::CgmService;
pub use session::LinkSession;
pub use state::{StateMachine, Transition};
pub use vendor::{Handshake, HandshakeFactory, VendorEvent, VendorEventKind, VendorSample};

// Re-export the data model for convenience.
pub use cgmlink_types;
pub use cgmlink_types::{
    ConnectionState, DeviceCandidate, DeviceId, GlucoseUnit, PairingCredential, RadioState,
    Reading, Trend,
};
