//! [`Radio`] over the platform BLE stack via btleplug.
//!
//! A background task follows the adapter's event stream and posts
//! [`RadioEvent`]s into the service inbox. Requests from the core are spawned
//! as short tasks on the runtime that created the radio, so no method blocks.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use btleplug::api::{
    Central, CentralEvent, CentralState, Manager as _, Peripheral as _, ScanFilter,
};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use futures::{Stream, StreamExt};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use cgmlink_types::{DeviceId, RadioState};

use crate::error::{Error, Result};
use crate::events::CallbackSender;
use crate::radio::{Advertisement, Radio, RadioEvent};

/// Default time allowed for a radio-level connect.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

const ZERO_ADDRESS: &str = "00:00:00:00:00:00";

type EventStream = Pin<Box<dyn Stream<Item = CentralEvent> + Send>>;

/// Get the first available Bluetooth adapter.
pub async fn get_adapter() -> Result<Adapter> {
    let manager = Manager::new().await?;
    let adapters = manager.adapters().await?;
    adapters.into_iter().next().ok_or(Error::NoAdapter)
}

/// Map the adapter's power state onto ours.
pub fn radio_state(state: CentralState) -> RadioState {
    match state {
        CentralState::PoweredOn => RadioState::PoweredOn,
        CentralState::PoweredOff => RadioState::PoweredOff,
        _ => RadioState::Unknown,
    }
}

/// The identifier a peripheral is known by: its MAC address, or the
/// platform peripheral id where the address is hidden (macOS reports all
/// zeroes).
fn identifier_for(address: &str, peripheral_id: impl FnOnce() -> String) -> String {
    if address == ZERO_ADDRESS {
        peripheral_id()
    } else {
        address.to_string()
    }
}

/// Whether `identifier` names `device`. CoreBluetooth UUIDs compare by
/// value so a stored id matches regardless of case or hyphenation; MAC
/// addresses compare case-insensitively.
fn same_identifier(identifier: &str, device: &DeviceId) -> bool {
    match (Uuid::parse_str(identifier), Uuid::parse_str(device.as_str())) {
        (Ok(a), Ok(b)) => a == b,
        _ => identifier.eq_ignore_ascii_case(device.as_str()),
    }
}

fn format_peripheral_id(id: &PeripheralId) -> String {
    format!("{:?}", id)
        .trim_start_matches("PeripheralId(")
        .trim_end_matches(')')
        .to_string()
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Peripherals seen so far, in both directions.
#[derive(Default)]
struct Known {
    by_device: HashMap<DeviceId, Peripheral>,
    by_peripheral: HashMap<PeripheralId, DeviceId>,
}

#[derive(Clone, Default)]
struct Shared {
    state: Arc<RwLock<RadioState>>,
    known: Arc<Mutex<Known>>,
}

impl Shared {
    fn set_state(&self, state: RadioState) {
        *self.state.write().unwrap_or_else(PoisonError::into_inner) = state;
    }

    fn state(&self) -> RadioState {
        *self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn remember(&self, device: DeviceId, peripheral: Peripheral) {
        let mut known = lock(&self.known);
        known.by_peripheral.insert(peripheral.id(), device.clone());
        known.by_device.insert(device, peripheral);
    }

    fn peripheral(&self, device: &DeviceId) -> Option<Peripheral> {
        lock(&self.known).by_device.get(device).cloned()
    }

    fn device(&self, id: &PeripheralId) -> Option<DeviceId> {
        lock(&self.known).by_peripheral.get(id).cloned()
    }
}

/// btleplug-backed radio.
pub struct BtleRadio {
    adapter: Adapter,
    shared: Shared,
    callbacks: CallbackSender,
    runtime: Handle,
    pump: JoinHandle<()>,
    connect_timeout: Duration,
}

impl std::fmt::Debug for BtleRadio {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BtleRadio")
            .field("state", &self.shared.state())
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

impl BtleRadio {
    /// Open the first adapter and start following its events.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoAdapter`] when the machine has no Bluetooth adapter,
    /// or [`Error::Bluetooth`] if the platform stack refuses access.
    pub async fn new(callbacks: CallbackSender) -> Result<Self> {
        let adapter = get_adapter().await?;
        Self::with_adapter(adapter, callbacks).await
    }

    /// Use a specific adapter.
    pub async fn with_adapter(adapter: Adapter, callbacks: CallbackSender) -> Result<Self> {
        let shared = Shared::default();
        let initial = match adapter.adapter_state().await {
            Ok(state) => radio_state(state),
            Err(e) => {
                debug!("Adapter state unavailable ({}); assuming powered on", e);
                RadioState::PoweredOn
            }
        };
        shared.set_state(initial);
        info!("Bluetooth adapter ready ({})", initial);

        let events = adapter.events().await?;
        let runtime = Handle::current();
        let pump = runtime.spawn(pump_events(
            adapter.clone(),
            events,
            shared.clone(),
            callbacks.clone(),
        ));

        Ok(Self {
            adapter,
            shared,
            callbacks,
            runtime,
            pump,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        })
    }

    /// Set the time allowed for a radio-level connect.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Poll the adapter until it reports powered on, up to `timeout`.
    ///
    /// Some platforms report `Unknown` for a moment after the adapter is
    /// opened.
    pub async fn wait_until_ready(&self, timeout: Duration) -> RadioState {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Ok(state) = self.adapter.adapter_state().await {
                self.shared.set_state(radio_state(state));
            }
            let state = self.shared.state();
            if state.is_powered_on() || tokio::time::Instant::now() >= deadline {
                return state;
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
    }
}

impl Drop for BtleRadio {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

impl Radio for BtleRadio {
    fn state(&self) -> RadioState {
        self.shared.state()
    }

    fn start_scan(&mut self) {
        let adapter = self.adapter.clone();
        self.runtime.spawn(async move {
            if let Err(e) = adapter.start_scan(ScanFilter::default()).await {
                warn!("Failed to start scan: {}", e);
            }
        });
    }

    fn stop_scan(&mut self) {
        let adapter = self.adapter.clone();
        self.runtime.spawn(async move {
            if let Err(e) = adapter.stop_scan().await {
                debug!("Failed to stop scan: {}", e);
            }
        });
    }

    fn connect(&mut self, device: &DeviceId) {
        let peripheral = self.shared.peripheral(device);
        let callbacks = self.callbacks.clone();
        let device = device.clone();
        let timeout = self.connect_timeout;

        self.runtime.spawn(async move {
            let Some(peripheral) = peripheral else {
                callbacks.radio(RadioEvent::ConnectFailed {
                    device,
                    reason: Some("device not found".to_string()),
                });
                return;
            };

            let event = match tokio::time::timeout(timeout, peripheral.connect()).await {
                Ok(Ok(())) => RadioEvent::Connected(device),
                Ok(Err(e)) => RadioEvent::ConnectFailed {
                    device,
                    reason: Some(e.to_string()),
                },
                Err(_) => RadioEvent::ConnectFailed {
                    device,
                    reason: Some(format!("timed out after {}s", timeout.as_secs())),
                },
            };
            callbacks.radio(event);
        });
    }

    fn cancel_connection(&mut self, device: &DeviceId) {
        let Some(peripheral) = self.shared.peripheral(device) else {
            return;
        };
        let device = device.clone();
        self.runtime.spawn(async move {
            match peripheral.is_connected().await {
                Ok(true) => {
                    if let Err(e) = peripheral.disconnect().await {
                        warn!("Failed to disconnect {}: {}", device, e);
                    }
                }
                Ok(false) => {}
                Err(e) => debug!("Could not query link to {}: {}", device, e),
            }
        });
    }

    fn resolve(&mut self, device: &DeviceId) {
        let adapter = self.adapter.clone();
        let shared = self.shared.clone();
        let callbacks = self.callbacks.clone();
        let device = device.clone();

        self.runtime.spawn(async move {
            let found = shared.peripheral(&device).is_some()
                || find_known_peripheral(&adapter, &shared, &device).await;
            callbacks.radio(RadioEvent::Resolved { device, found });
        });
    }
}

/// Look through the peripherals the platform already knows about.
async fn find_known_peripheral(adapter: &Adapter, shared: &Shared, device: &DeviceId) -> bool {
    let peripherals = match adapter.peripherals().await {
        Ok(peripherals) => peripherals,
        Err(e) => {
            debug!("Could not list known peripherals: {}", e);
            return false;
        }
    };

    for peripheral in peripherals {
        let Ok(Some(props)) = peripheral.properties().await else {
            continue;
        };
        let id = peripheral.id();
        let identifier = identifier_for(&props.address.to_string(), || format_peripheral_id(&id));
        if same_identifier(&identifier, device) {
            debug!("Resolved {} without scanning", device);
            shared.remember(device.clone(), peripheral);
            return true;
        }
    }
    false
}

async fn describe(adapter: &Adapter, shared: &Shared, id: &PeripheralId) -> Option<Advertisement> {
    let peripheral = adapter.peripheral(id).await.ok()?;
    let props = peripheral.properties().await.ok()??;
    let identifier = identifier_for(&props.address.to_string(), || format_peripheral_id(id));
    let device = DeviceId::new(identifier).ok()?;
    shared.remember(device.clone(), peripheral);
    Some(Advertisement {
        id: device,
        name: props.local_name,
        rssi: props.rssi,
    })
}

async fn pump_events(
    adapter: Adapter,
    mut events: EventStream,
    shared: Shared,
    callbacks: CallbackSender,
) {
    while let Some(event) = events.next().await {
        match event {
            CentralEvent::StateUpdate(state) => {
                let state = radio_state(state);
                shared.set_state(state);
                callbacks.radio(RadioEvent::StateChanged(state));
            }
            CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => {
                if let Some(adv) = describe(&adapter, &shared, &id).await {
                    callbacks.radio(RadioEvent::Advertisement(adv));
                }
            }
            CentralEvent::DeviceDisconnected(id) => {
                if let Some(device) = shared.device(&id) {
                    callbacks.radio(RadioEvent::Disconnected {
                        device,
                        error: None,
                    });
                }
            }
            _ => {}
        }
    }
    debug!("Adapter event stream ended");
}
