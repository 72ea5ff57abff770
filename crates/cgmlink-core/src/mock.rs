//! Mock radio and handshake implementations for testing.
//!
//! These stand in for the BLE stack and the vendor SDK so the whole
//! connection core can be driven without hardware.
//!
//! # Features
//!
//! - **Call recording**: every [`Radio`] request is kept as a [`RadioCall`]
//! - **Auto-responses**: once given a [`CallbackSender`], the mocks answer
//!   connects, resolves and handshake resumes the way a healthy transmitter
//!   would
//! - **Failure injection**: refuse radio connects with a reason
//! - **Simulated glucose**: [`SimulatedGlucose`] produces a plausible
//!   random-walk sample series

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use time::OffsetDateTime;

use cgmlink_types::{DeviceId, PairingCredential, RadioState};

use crate::events::CallbackSender;
use crate::radio::{Advertisement, Radio, RadioEvent};
use crate::vendor::{Handshake, HandshakeFactory, VendorEvent, VendorEventKind, VendorSample};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A request the core made of the radio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RadioCall {
    StartScan,
    StopScan,
    Connect(DeviceId),
    CancelConnection(DeviceId),
    Resolve(DeviceId),
}

#[derive(Debug, Default)]
struct RadioInner {
    state: RadioState,
    calls: Vec<RadioCall>,
    responder: Option<CallbackSender>,
    known: HashSet<DeviceId>,
    advertisements: Vec<Advertisement>,
    connect_failure: Option<String>,
}

/// A scriptable [`Radio`]. Clones share state, so a test can keep one handle
/// while the core owns another.
///
/// # Example
///
/// ```
/// use cgmlink_core::mock::{MockRadio, RadioCall};
/// use cgmlink_core::Radio;
///
/// let mut radio = MockRadio::powered_on();
/// let observer = radio.clone();
/// radio.start_scan();
/// assert_eq!(observer.calls(), vec![RadioCall::StartScan]);
/// ```
#[derive(Debug, Clone, Default)]
pub struct MockRadio {
    inner: Arc<Mutex<RadioInner>>,
}

impl MockRadio {
    pub fn new(state: RadioState) -> Self {
        let radio = Self::default();
        lock(&radio.inner).state = state;
        radio
    }

    pub fn powered_on() -> Self {
        Self::new(RadioState::PoweredOn)
    }

    /// Answer requests by posting callbacks through `callbacks`.
    pub fn respond_via(&self, callbacks: CallbackSender) {
        lock(&self.inner).responder = Some(callbacks);
    }

    /// Change the power state without announcing it.
    pub fn set_state(&self, state: RadioState) {
        lock(&self.inner).state = state;
    }

    /// Change the power state and, when responding, post the change.
    pub fn power(&self, state: RadioState) {
        let responder = {
            let mut inner = lock(&self.inner);
            inner.state = state;
            inner.responder.clone()
        };
        if let Some(tx) = responder {
            tx.radio(RadioEvent::StateChanged(state));
        }
    }

    /// Make `device` resolvable without a scan.
    pub fn add_known(&self, device: DeviceId) {
        lock(&self.inner).known.insert(device);
    }

    /// Advertisement replayed every time a scan starts.
    pub fn add_advertisement(&self, adv: Advertisement) {
        lock(&self.inner).advertisements.push(adv);
    }

    /// Fail radio connects with `reason` (or succeed again with `None`).
    pub fn fail_connects(&self, reason: Option<&str>) {
        lock(&self.inner).connect_failure = reason.map(str::to_string);
    }

    /// Post a link loss for `device`.
    pub fn drop_link(&self, device: &DeviceId, error: Option<&str>) {
        if let Some(tx) = lock(&self.inner).responder.clone() {
            tx.radio(RadioEvent::Disconnected {
                device: device.clone(),
                error: error.map(str::to_string),
            });
        }
    }

    pub fn calls(&self) -> Vec<RadioCall> {
        lock(&self.inner).calls.clone()
    }

    pub fn take_calls(&self) -> Vec<RadioCall> {
        std::mem::take(&mut lock(&self.inner).calls)
    }

    fn record(&self, call: RadioCall) -> Option<CallbackSender> {
        let mut inner = lock(&self.inner);
        inner.calls.push(call);
        inner.responder.clone()
    }
}

impl Radio for MockRadio {
    fn state(&self) -> RadioState {
        lock(&self.inner).state
    }

    fn start_scan(&mut self) {
        if let Some(tx) = self.record(RadioCall::StartScan) {
            let advertisements = lock(&self.inner).advertisements.clone();
            for adv in advertisements {
                tx.radio(RadioEvent::Advertisement(adv));
            }
        }
    }

    fn stop_scan(&mut self) {
        self.record(RadioCall::StopScan);
    }

    fn connect(&mut self, device: &DeviceId) {
        if let Some(tx) = self.record(RadioCall::Connect(device.clone())) {
            let failure = lock(&self.inner).connect_failure.clone();
            match failure {
                Some(reason) => tx.radio(RadioEvent::ConnectFailed {
                    device: device.clone(),
                    reason: Some(reason),
                }),
                None => tx.radio(RadioEvent::Connected(device.clone())),
            }
        }
    }

    fn cancel_connection(&mut self, device: &DeviceId) {
        self.record(RadioCall::CancelConnection(device.clone()));
    }

    fn resolve(&mut self, device: &DeviceId) {
        if let Some(tx) = self.record(RadioCall::Resolve(device.clone())) {
            let found = lock(&self.inner).known.contains(device);
            tx.radio(RadioEvent::Resolved {
                device: device.clone(),
                found,
            });
        }
    }
}

/// Observable state of one mock handshake.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HandshakeStatus {
    pub stay_connected: bool,
    pub resumes: u32,
    pub stopped: bool,
}

/// Test-side handle to a handshake the factory created.
#[derive(Debug, Clone)]
pub struct MockHandshakeHandle {
    device: DeviceId,
    serial: String,
    status: Arc<Mutex<HandshakeStatus>>,
    responder: Option<CallbackSender>,
}

impl MockHandshakeHandle {
    pub fn device(&self) -> &DeviceId {
        &self.device
    }

    /// The serial the handshake was created with.
    pub fn serial(&self) -> &str {
        &self.serial
    }

    pub fn status(&self) -> HandshakeStatus {
        lock(&self.status).clone()
    }

    /// Flip the keep-alive flag as the handshake itself would.
    pub fn set_stay_connected(&self, stay_connected: bool) {
        lock(&self.status).stay_connected = stay_connected;
    }

    /// Post a vendor callback as this handshake. No-op without a responder.
    pub fn emit(&self, kind: VendorEventKind) {
        if let Some(tx) = &self.responder {
            tx.vendor(VendorEvent::new(self.device.clone(), kind));
        }
    }

    pub fn send_sample(&self, sample: VendorSample) {
        self.emit(VendorEventKind::Sample(sample));
    }
}

struct MockHandshake {
    device: DeviceId,
    status: Arc<Mutex<HandshakeStatus>>,
    responder: Option<CallbackSender>,
    auto_connect: bool,
}

impl Handshake for MockHandshake {
    fn device_id(&self) -> &DeviceId {
        &self.device
    }

    fn resume(&mut self) {
        let stopped = {
            let mut status = lock(&self.status);
            status.resumes += 1;
            status.stopped
        };
        if stopped || !self.auto_connect {
            return;
        }
        if let Some(tx) = &self.responder {
            tx.vendor(VendorEvent::new(
                self.device.clone(),
                VendorEventKind::Connected,
            ));
        }
    }

    fn stop(&mut self) {
        lock(&self.status).stopped = true;
    }

    fn stay_connected(&self) -> bool {
        lock(&self.status).stay_connected
    }

    fn set_stay_connected(&mut self, stay_connected: bool) {
        lock(&self.status).stay_connected = stay_connected;
    }
}

/// A [`HandshakeFactory`] for tests and simulations.
#[derive(Debug, Clone, Default)]
pub struct MockHandshakeFactory {
    created: Arc<Mutex<Vec<MockHandshakeHandle>>>,
    responder: Option<CallbackSender>,
    auto_connect: bool,
}

impl MockHandshakeFactory {
    /// A factory whose handshakes only record calls.
    pub fn new() -> Self {
        Self::default()
    }

    /// A factory whose handshakes post `Connected` on every resume.
    pub fn responding(callbacks: CallbackSender) -> Self {
        Self {
            created: Arc::default(),
            responder: Some(callbacks),
            auto_connect: true,
        }
    }

    /// A factory whose handshakes stay silent on resume; tests post vendor
    /// callbacks through [`MockHandshakeHandle::emit`].
    pub fn manual(callbacks: CallbackSender) -> Self {
        Self {
            created: Arc::default(),
            responder: Some(callbacks),
            auto_connect: false,
        }
    }

    /// Every handshake created so far, oldest first.
    pub fn created(&self) -> Vec<MockHandshakeHandle> {
        lock(&self.created).clone()
    }

    pub fn last(&self) -> Option<MockHandshakeHandle> {
        lock(&self.created).last().cloned()
    }
}

impl HandshakeFactory for MockHandshakeFactory {
    fn create(&mut self, credential: &PairingCredential) -> Box<dyn Handshake> {
        let status = Arc::new(Mutex::new(HandshakeStatus::default()));
        lock(&self.created).push(MockHandshakeHandle {
            device: credential.device_id().clone(),
            serial: credential.serial().to_string(),
            status: status.clone(),
            responder: self.responder.clone(),
        });
        Box::new(MockHandshake {
            device: credential.device_id().clone(),
            status,
            responder: self.responder.clone(),
            auto_connect: self.auto_connect,
        })
    }
}

/// Random-walk glucose generator.
#[derive(Debug, Clone)]
pub struct SimulatedGlucose {
    value: f64,
}

impl Default for SimulatedGlucose {
    fn default() -> Self {
        Self::new(110.0)
    }
}

impl SimulatedGlucose {
    pub fn new(start_mg_per_dl: f64) -> Self {
        Self {
            value: start_mg_per_dl.clamp(40.0, 400.0),
        }
    }

    /// Next sample, taken at `at`. Values stay within the sensor range of
    /// 40 to 400 mg/dL; the trend is the step in tenths of mg/dL per minute
    /// assuming five-minute spacing.
    pub fn next_sample(&mut self, at: OffsetDateTime) -> VendorSample {
        let step: f64 = rand::random_range(-8.0..=8.0);
        let next = (self.value + step).clamp(40.0, 400.0);
        let trend = ((next - self.value) * 2.0).round().clamp(-127.0, 127.0) as i8;
        self.value = next;
        VendorSample::mg_per_dl(next.round(), at).with_trend(trend)
    }

    /// `count` samples ending at `end`, `spacing` apart, oldest first.
    pub fn backfill(
        &mut self,
        end: OffsetDateTime,
        count: usize,
        spacing: time::Duration,
    ) -> Vec<VendorSample> {
        (0..count)
            .rev()
            .map(|i| self.next_sample(end - spacing * i as u32))
            .collect()
    }
}
