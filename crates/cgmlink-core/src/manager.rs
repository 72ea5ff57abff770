//! The connection core: one owner for directory, session, state and ingest.
//!
//! [`ConnectionManager`] is deliberately synchronous. Every method applies one
//! user command or one callback to the state and returns; requests to the
//! radio and the handshake are fire-and-forget. The
//! [`CgmService`](crate::service::CgmService) actor owns a manager and feeds
//! it from its inbox, which is what makes all mutation single-threaded.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use cgmlink_types::{
    ConnectionState, DeviceCandidate, DeviceId, PairingCredential, RadioState, Reading,
};

use crate::directory::{DEFAULT_NAME_FILTERS, DeviceDirectory, NameFilter};
use crate::error::{Error, Result};
use crate::events::{Callback, CgmEvent, EventDispatcher};
use crate::ingest::{DEFAULT_RETENTION, ReadingIngest, ReadingSink};
use crate::radio::{Advertisement, Radio, RadioEvent};
use crate::reconnect::{ReconnectDecision, ReconnectPolicy};
use crate::session::LinkSession;
use crate::state::{StateMachine, Transition};
use crate::vendor::{HandshakeFactory, VendorEvent, VendorEventKind, VendorSample};

/// Detail recorded when the radio goes away.
pub const RADIO_OFF_DETAIL: &str = "Bluetooth is turned off or not authorized";

/// Detail recorded when the keep-alive budget runs out.
pub const KEEP_ALIVE_FAILED_DETAIL: &str = "failed to keep transmitter alive";

/// Configuration for the connection core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CgmConfig {
    /// Advertised-name substrings that mark a transmitter.
    pub name_filters: Vec<String>,
    /// Keep-alive policy applied to radio-level drops.
    pub reconnect: ReconnectPolicy,
    /// Span of the in-memory reading window.
    pub retention: Duration,
    /// Capacity of the event broadcast channel.
    pub event_capacity: usize,
    /// User scope readings are persisted under. `None` disables persistence.
    pub user_scope: Option<String>,
}

impl Default for CgmConfig {
    fn default() -> Self {
        Self {
            name_filters: DEFAULT_NAME_FILTERS.iter().map(|s| s.to_string()).collect(),
            reconnect: ReconnectPolicy::default(),
            retention: DEFAULT_RETENTION,
            event_capacity: 100,
            user_scope: None,
        }
    }
}

impl CgmConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the advertised-name allow-list.
    pub fn name_filters<I, S>(mut self, filters: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.name_filters = filters.into_iter().map(Into::into).collect();
        self
    }

    /// Set the reconnect budget for dropped links.
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.reconnect = self.reconnect.max_attempts(attempts);
        self
    }

    pub fn retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    pub fn user_scope(mut self, scope: impl Into<String>) -> Self {
        self.user_scope = Some(scope.into());
        self
    }

    /// Validate the configuration and return an error if invalid.
    ///
    /// Checks that:
    /// - at least one non-empty name filter is set
    /// - `max_attempts` is at least 1
    /// - `retention` and `event_capacity` are non-zero
    pub fn validate(&self) -> Result<()> {
        if self.name_filters.is_empty() || self.name_filters.iter().any(|f| f.is_empty()) {
            return Err(Error::invalid_config(
                "name_filters must contain at least one non-empty pattern",
            ));
        }
        self.reconnect.validate()?;
        if self.retention.is_zero() {
            return Err(Error::invalid_config("retention must be > 0"));
        }
        if self.event_capacity == 0 {
            return Err(Error::invalid_config("event_capacity must be > 0"));
        }
        if matches!(self.user_scope.as_deref(), Some(s) if s.trim().is_empty()) {
            return Err(Error::invalid_config("user_scope must not be blank"));
        }
        Ok(())
    }
}

/// Point-in-time view of the core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CgmSnapshot {
    pub state: ConnectionState,
    pub last_error: Option<String>,
    pub candidates: Vec<DeviceCandidate>,
    pub selected: Option<DeviceId>,
    pub attempts: u32,
    /// Window readings, newest first.
    pub readings: Vec<Reading>,
}

/// The connection core. See the [module docs](self).
pub struct ConnectionManager {
    config: CgmConfig,
    radio: Box<dyn Radio>,
    handshakes: Box<dyn HandshakeFactory>,
    directory: DeviceDirectory,
    session: Option<LinkSession>,
    pending_resolve: Option<PairingCredential>,
    state: StateMachine,
    ingest: ReadingIngest,
    events: EventDispatcher,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("state", self.state.current())
            .field("session", &self.session)
            .field("candidates", &self.directory.len())
            .finish()
    }
}

impl ConnectionManager {
    /// Build a manager. Fails only if `config` is invalid.
    pub fn new(
        config: CgmConfig,
        radio: impl Radio,
        handshakes: impl HandshakeFactory,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            directory: DeviceDirectory::new(NameFilter::new(config.name_filters.clone())),
            ingest: ReadingIngest::new(config.retention),
            events: EventDispatcher::new(config.event_capacity),
            radio: Box::new(radio),
            handshakes: Box::new(handshakes),
            session: None,
            pending_resolve: None,
            state: StateMachine::new(),
            config,
        })
    }

    /// Forward readings to `sink` under the configured user scope.
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn ReadingSink>) -> Self {
        self.ingest = ReadingIngest::new(self.config.retention)
            .with_sink(sink, self.config.user_scope.clone());
        self
    }

    pub fn config(&self) -> &CgmConfig {
        &self.config
    }

    pub fn state(&self) -> &ConnectionState {
        self.state.current()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.state.last_error()
    }

    pub fn candidates(&self) -> &[DeviceCandidate] {
        self.directory.candidates()
    }

    pub fn selected(&self) -> Option<&DeviceId> {
        self.session.as_ref().map(LinkSession::device_id)
    }

    /// Attempts spent by the active session, 0 without one.
    pub fn attempts(&self) -> u32 {
        self.session.as_ref().map_or(0, LinkSession::attempts)
    }

    pub fn readings(&self) -> &[Reading] {
        self.ingest.window().readings()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn events(&self) -> &EventDispatcher {
        &self.events
    }

    pub fn snapshot(&self) -> CgmSnapshot {
        CgmSnapshot {
            state: self.state.current().clone(),
            last_error: self.state.last_error().map(str::to_string),
            candidates: self.directory.candidates().to_vec(),
            selected: self.selected().cloned(),
            attempts: self.attempts(),
            readings: self.readings().to_vec(),
        }
    }

    // --- Commands ---

    /// Clear candidates and start listening for transmitters.
    ///
    /// Any active session is torn down first. With the radio off the state
    /// becomes the radio-unavailable error and no scan starts.
    pub fn start_scan(&mut self) {
        self.pending_resolve = None;
        if !self.radio.state().is_powered_on() {
            warn!("Cannot scan: radio is {}", self.radio.state());
            self.transition(Transition::RadioUnavailable);
            return;
        }

        self.end_session();
        self.state.clear_last_error();
        self.directory.clear();
        self.publish_candidates();

        info!("Scanning for transmitters matching {:?}", self.config.name_filters);
        self.transition(Transition::ScanStarted);
        self.radio.start_scan();
    }

    /// Open a session with `device` authenticated by `serial`.
    ///
    /// The serial is normalized first; a malformed one is rejected before
    /// anything else happens. With the radio off the state becomes the
    /// radio-unavailable error. An existing session is superseded.
    pub fn connect(&mut self, device: &DeviceId, serial: &str) -> Result<()> {
        let credential = PairingCredential::new(serial, device.clone())?;
        self.connect_with(credential);
        Ok(())
    }

    fn connect_with(&mut self, credential: PairingCredential) {
        self.pending_resolve = None;
        if !self.radio.state().is_powered_on() {
            warn!("Cannot connect: radio is {}", self.radio.state());
            self.transition(Transition::RadioUnavailable);
            return;
        }

        self.radio.stop_scan();
        self.end_session();
        self.state.clear_last_error();

        let device = credential.device_id().clone();
        info!("Connecting to {}", device);
        let handshake = self.handshakes.create(&credential);
        self.session = Some(LinkSession::new(credential, handshake));
        self.radio.connect(&device);
        self.transition(Transition::ConnectRequested);
    }

    /// Tear down the active session and go to `disconnected`. Candidates are
    /// kept. Calling it again is harmless.
    pub fn disconnect(&mut self) {
        self.pending_resolve = None;
        if *self.state.current() == ConnectionState::Scanning {
            self.radio.stop_scan();
        }
        if self.end_session() {
            info!("Disconnected by user");
        }
        self.state.clear_last_error();
        self.transition(Transition::UserDisconnected);
    }

    /// Reconnect to a previously paired transmitter.
    ///
    /// Asks the radio whether it still knows the device; when it does the
    /// session opens directly, otherwise a full scan starts.
    pub fn auto_reconnect(&mut self, credential: PairingCredential) {
        if !self.radio.state().is_powered_on() {
            self.start_scan();
            return;
        }
        info!("Resolving paired transmitter {}", credential.device_id());
        self.radio.resolve(credential.device_id());
        self.pending_resolve = Some(credential);
    }

    // --- Callbacks ---

    pub fn handle_callback(&mut self, callback: Callback) {
        match callback {
            Callback::Radio(event) => self.handle_radio(event),
            Callback::Vendor(event) => self.handle_vendor(event),
        }
    }

    pub fn handle_radio(&mut self, event: RadioEvent) {
        match event {
            RadioEvent::StateChanged(radio) => self.on_radio_state(radio),
            RadioEvent::Advertisement(adv) => self.on_advertisement(adv),
            RadioEvent::Connected(device) => {
                let Some(session) = self.matching_session(&device) else {
                    return;
                };
                debug!("Radio link up for {}; resuming handshake", device);
                session.resume();
            }
            RadioEvent::ConnectFailed { device, reason } => {
                if self.matching_session(&device).is_none() {
                    return;
                }
                let reason = reason.unwrap_or_else(|| "unknown error".to_string());
                warn!("Connection to {} failed: {}", device, reason);
                self.end_session();
                self.state.set_last_error(reason.clone());
                self.transition(Transition::ConnectFailed(reason));
            }
            RadioEvent::Disconnected { device, error } => self.on_link_lost(&device, error),
            RadioEvent::Resolved { device, found } => self.on_resolved(device, found),
        }
    }

    pub fn handle_vendor(&mut self, event: VendorEvent) {
        let VendorEvent { device, kind } = event;
        let Some(session) = self.matching_session(&device) else {
            return;
        };

        match kind {
            VendorEventKind::Connected => {
                session.reset_attempts();
                let credential = session.credential().clone();
                self.state.clear_last_error();
                if self.transition(Transition::HandshakeCompleted) {
                    info!("Transmitter {} authenticated", device);
                    self.events.send(CgmEvent::Paired { credential });
                }
            }
            VendorEventKind::Error(message) => {
                warn!("Handshake error from {}: {}", device, message);
            }
            VendorEventKind::Sample(sample) => self.ingest_samples(&[sample], false),
            VendorEventKind::Backfill(samples) => {
                debug!("Backfill of {} samples from {}", samples.len(), device);
                self.ingest_samples(&samples, true);
            }
            VendorEventKind::UnknownData(data) => {
                debug!("Ignoring {} bytes of unknown data from {}", data.len(), device);
            }
        }
    }

    fn on_radio_state(&mut self, radio: RadioState) {
        debug!("Radio state: {}", radio);
        if radio.is_powered_on() {
            if self.state.current().is_radio_unavailable() {
                info!("Radio back on; resuming scan");
                self.start_scan();
            }
        } else if radio.is_unavailable() {
            self.state.set_last_error(RADIO_OFF_DETAIL);
            self.transition(Transition::RadioUnavailable);
        }
    }

    fn on_advertisement(&mut self, adv: Advertisement) {
        if *self.state.current() != ConnectionState::Scanning {
            debug!("Ignoring advertisement from {} outside a scan", adv.id);
            return;
        }
        if self.directory.offer(&adv) {
            self.publish_candidates();
        }
    }

    fn on_link_lost(&mut self, device: &DeviceId, error: Option<String>) {
        let policy = self.config.reconnect.clone();
        let Some(session) = self.matching_session(device) else {
            return;
        };

        match policy.on_disconnect(session.attempts(), error.as_deref(), session.stay_connected()) {
            ReconnectDecision::Resume { attempt } => {
                info!(
                    "Link to {} dropped ({}); resuming ({}/{})",
                    device,
                    error.as_deref().unwrap_or("clean"),
                    attempt,
                    policy.max_attempts
                );
                session.set_attempts(attempt);
                session.resume();
            }
            ReconnectDecision::Hold { attempt } => {
                debug!("Link to {} closed while winding down ({})", device, attempt);
                session.set_attempts(attempt);
            }
            ReconnectDecision::Escalate { reason } => {
                warn!("Giving up on {}: {}", device, reason);
                session.disable_keep_alive();
                self.end_session();
                let detail = error.as_deref().unwrap_or(KEEP_ALIVE_FAILED_DETAIL);
                self.state.set_last_error(detail);
                self.transition(Transition::LinkLost(reason));
            }
        }
    }

    fn on_resolved(&mut self, device: DeviceId, found: bool) {
        let Some(credential) = self.pending_resolve.take_if(|c| c.device_id() == &device) else {
            debug!("Ignoring stale resolve result for {}", device);
            return;
        };
        if found {
            self.connect_with(credential);
        } else {
            info!("Paired transmitter {} not known to the radio; scanning", device);
            self.start_scan();
        }
    }

    // --- Helpers ---

    /// The active session if it belongs to `device`.
    fn matching_session(&mut self, device: &DeviceId) -> Option<&mut LinkSession> {
        match self.session.as_mut() {
            Some(session) if session.matches(device) => Some(session),
            _ => {
                debug!("Ignoring callback for unselected device {}", device);
                None
            }
        }
    }

    /// Tear down the session, if any, and cancel its radio link.
    fn end_session(&mut self) -> bool {
        let Some(session) = self.session.take() else {
            return false;
        };
        let device = session.teardown();
        self.radio.cancel_connection(&device);
        true
    }

    fn transition(&mut self, transition: Transition) -> bool {
        match self.state.apply(transition) {
            Some(state) => {
                self.events.send(CgmEvent::StateChanged { state });
                true
            }
            None => false,
        }
    }

    fn publish_candidates(&self) {
        self.events.send(CgmEvent::CandidatesUpdated {
            candidates: self.directory.candidates().to_vec(),
        });
    }

    fn ingest_samples(&mut self, samples: &[VendorSample], backfill: bool) {
        let now = OffsetDateTime::now_utc();
        for sample in samples {
            if let Some(reading) = self.ingest.ingest(sample, now) {
                self.events.send(CgmEvent::Reading { reading, backfill });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventReceiver;
    use crate::mock::{MockHandshakeFactory, MockRadio, RadioCall};
    use bytes::Bytes;
    use cgmlink_types::{GlucoseUnit, RADIO_UNAVAILABLE_REASON};

    struct Harness {
        manager: ConnectionManager,
        radio: MockRadio,
        factory: MockHandshakeFactory,
        events: EventReceiver,
    }

    fn harness_with(config: CgmConfig) -> Harness {
        let radio = MockRadio::powered_on();
        let factory = MockHandshakeFactory::new();
        let manager = ConnectionManager::new(config, radio.clone(), factory.clone()).unwrap();
        let events = manager.events().subscribe();
        Harness {
            manager,
            radio,
            factory,
            events,
        }
    }

    fn harness() -> Harness {
        harness_with(CgmConfig::default())
    }

    fn id(s: &str) -> DeviceId {
        DeviceId::new(s).unwrap()
    }

    fn error(reason: &str) -> ConnectionState {
        ConnectionState::Error(reason.to_string())
    }

    fn drain(rx: &mut EventReceiver) -> Vec<CgmEvent> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            out.push(event);
        }
        out
    }

    fn vendor(device: &str, kind: VendorEventKind) -> VendorEvent {
        VendorEvent::new(id(device), kind)
    }

    fn drop_link(device: &str, err: Option<&str>) -> RadioEvent {
        RadioEvent::Disconnected {
            device: id(device),
            error: err.map(str::to_string),
        }
    }

    /// Connect to `device` and complete the handshake.
    fn connect_fully(h: &mut Harness, device: &str) {
        h.manager.connect(&id(device), "ab12cd").unwrap();
        h.manager.handle_radio(RadioEvent::Connected(id(device)));
        h.manager
            .handle_vendor(vendor(device, VendorEventKind::Connected));
        assert_eq!(h.manager.state(), &ConnectionState::Connected);
    }

    fn minutes_ago(m: i64) -> OffsetDateTime {
        OffsetDateTime::now_utc() - time::Duration::minutes(m)
    }

    // --- Scanning ---

    #[test]
    fn test_scan_requires_radio() {
        let mut h = harness();
        h.radio.set_state(RadioState::PoweredOff);
        h.manager.start_scan();
        assert_eq!(h.manager.state(), &error(RADIO_UNAVAILABLE_REASON));
        assert!(h.radio.calls().is_empty());
    }

    #[test]
    fn test_scan_deduplicates_advertisements() {
        let mut h = harness();
        h.manager.start_scan();
        assert_eq!(h.manager.state(), &ConnectionState::Scanning);
        assert_eq!(h.radio.calls(), vec![RadioCall::StartScan]);

        for _ in 0..5 {
            h.manager.handle_radio(RadioEvent::Advertisement(Advertisement::named(
                id("dev-1"),
                "Dexcom-ABC123",
            )));
        }
        h.manager
            .handle_radio(RadioEvent::Advertisement(Advertisement::named(id("x"), "Fitbit")));

        assert_eq!(h.manager.candidates().len(), 1);
        let updates = drain(&mut h.events)
            .into_iter()
            .filter(|e| matches!(e, CgmEvent::CandidatesUpdated { candidates } if !candidates.is_empty()))
            .count();
        assert_eq!(updates, 1);
    }

    #[test]
    fn test_advertisements_ignored_outside_scan() {
        let mut h = harness();
        h.manager
            .handle_radio(RadioEvent::Advertisement(Advertisement::named(id("a"), "Dexcom-A")));
        assert!(h.manager.candidates().is_empty());
    }

    #[test]
    fn test_rescan_clears_candidates() {
        let mut h = harness();
        h.manager.start_scan();
        h.manager
            .handle_radio(RadioEvent::Advertisement(Advertisement::named(id("a"), "Dexcom-A")));
        assert_eq!(h.manager.candidates().len(), 1);
        h.manager.start_scan();
        assert!(h.manager.candidates().is_empty());
    }

    // --- Connecting ---

    #[test]
    fn test_connect_normalizes_serial() {
        let mut h = harness();
        h.manager.start_scan();
        h.radio.take_calls();

        h.manager.connect(&id("dev-1"), "  ab12cd  ").unwrap();

        let handshake = h.factory.last().unwrap();
        assert_eq!(handshake.serial(), "AB12CD");
        assert_eq!(handshake.device(), &id("dev-1"));
        assert!(handshake.status().stay_connected);
        assert_eq!(
            h.radio.calls(),
            vec![RadioCall::StopScan, RadioCall::Connect(id("dev-1"))]
        );
        assert_eq!(h.manager.state(), &ConnectionState::Connecting);
        assert_eq!(h.manager.selected(), Some(&id("dev-1")));
        assert_eq!(h.manager.attempts(), 0);
    }

    #[test]
    fn test_connect_rejects_bad_serial_without_side_effects() {
        let mut h = harness();
        let err = h.manager.connect(&id("dev-1"), "   ").unwrap_err();
        assert!(matches!(err, Error::InvalidCredential(_)));
        assert_eq!(h.manager.state(), &ConnectionState::Disconnected);
        assert!(h.radio.calls().is_empty());
        assert!(h.factory.created().is_empty());
    }

    #[test]
    fn test_connect_requires_radio() {
        let mut h = harness();
        h.radio.set_state(RadioState::Unauthorized);
        h.manager.connect(&id("dev-1"), "AB12CD").unwrap();
        assert_eq!(h.manager.state(), &error(RADIO_UNAVAILABLE_REASON));
        assert!(h.manager.selected().is_none());
    }

    #[test]
    fn test_radio_link_resumes_handshake() {
        let mut h = harness();
        h.manager.connect(&id("dev-1"), "AB12CD").unwrap();
        h.manager.handle_radio(RadioEvent::Connected(id("dev-1")));
        assert_eq!(h.factory.last().unwrap().status().resumes, 1);
        assert_eq!(h.manager.state(), &ConnectionState::Connecting);
    }

    #[test]
    fn test_handshake_completion_connects_and_pairs() {
        let mut h = harness();
        connect_fully(&mut h, "dev-1");
        let paired = drain(&mut h.events).into_iter().find_map(|e| match e {
            CgmEvent::Paired { credential } => Some(credential),
            _ => None,
        });
        let credential = paired.unwrap();
        assert_eq!(credential.serial(), "AB12CD");
        assert_eq!(credential.device_id(), &id("dev-1"));
    }

    #[test]
    fn test_connect_failure_is_terminal() {
        let mut h = harness();
        h.manager.connect(&id("dev-1"), "AB12CD").unwrap();
        h.manager.handle_radio(RadioEvent::ConnectFailed {
            device: id("dev-1"),
            reason: Some("peer removed pairing".into()),
        });
        assert_eq!(
            h.manager.state(),
            &error("connection failed: peer removed pairing")
        );
        assert_eq!(h.manager.last_error(), Some("peer removed pairing"));
        assert!(h.manager.selected().is_none());
        assert!(h.factory.last().unwrap().status().stopped);
    }

    #[test]
    fn test_connect_failure_without_reason() {
        let mut h = harness();
        h.manager.connect(&id("dev-1"), "AB12CD").unwrap();
        h.manager.handle_radio(RadioEvent::ConnectFailed {
            device: id("dev-1"),
            reason: None,
        });
        assert_eq!(h.manager.state(), &error("connection failed: unknown error"));
    }

    #[test]
    fn test_new_connect_supersedes_session() {
        let mut h = harness();
        h.manager.connect(&id("a"), "AAA111").unwrap();
        h.manager.connect(&id("b"), "BBB222").unwrap();

        let created = h.factory.created();
        assert!(created[0].status().stopped);
        assert!(!created[1].status().stopped);
        assert!(h.radio.calls().contains(&RadioCall::CancelConnection(id("a"))));

        // The old handshake finishing late must not connect us.
        h.manager.handle_vendor(vendor("a", VendorEventKind::Connected));
        assert_eq!(h.manager.state(), &ConnectionState::Connecting);
        h.manager.handle_vendor(vendor("b", VendorEventKind::Connected));
        assert_eq!(h.manager.state(), &ConnectionState::Connected);
    }

    // --- Keep-alive ---

    #[test]
    fn test_transport_errors_escalate_at_budget() {
        let mut h = harness();
        connect_fully(&mut h, "dev-1");

        for n in 1..=2 {
            h.manager.handle_radio(drop_link("dev-1", Some("timeout")));
            assert_eq!(h.manager.state(), &ConnectionState::Connected);
            assert_eq!(h.manager.attempts(), n);
        }
        assert_eq!(h.factory.last().unwrap().status().resumes, 3);

        // The third consecutive failure surfaces.
        h.manager.handle_radio(drop_link("dev-1", Some("timeout")));
        assert_eq!(h.manager.state(), &error("disconnected: timeout"));
        assert_eq!(h.manager.last_error(), Some("timeout"));
        let status = h.factory.last().unwrap().status();
        assert!(!status.stay_connected);
        assert!(status.stopped);
        assert_eq!(status.resumes, 3);
    }

    #[test]
    fn test_clean_escalation_reports_keep_alive_failure() {
        let mut h = harness_with(CgmConfig::default().max_attempts(1));
        connect_fully(&mut h, "dev-1");
        h.manager.handle_radio(drop_link("dev-1", None));
        h.manager.handle_radio(drop_link("dev-1", None));
        assert_eq!(h.manager.last_error(), Some(KEEP_ALIVE_FAILED_DETAIL));
    }

    #[test]
    fn test_wound_down_handshake_is_not_resumed() {
        let mut h = harness();
        connect_fully(&mut h, "dev-1");
        let handshake = h.factory.last().unwrap();
        handshake.set_stay_connected(false);
        let resumes = handshake.status().resumes;

        h.manager.handle_radio(drop_link("dev-1", None));
        assert_eq!(h.manager.state(), &ConnectionState::Connected);
        assert_eq!(h.manager.attempts(), 1);
        assert_eq!(handshake.status().resumes, resumes);
    }

    #[test]
    fn test_clean_disconnects_escalate_after_three() {
        let mut h = harness();
        connect_fully(&mut h, "dev-1");

        for n in 1..=3 {
            h.manager.handle_radio(drop_link("dev-1", None));
            assert_eq!(h.manager.state(), &ConnectionState::Connected);
            assert_eq!(h.manager.attempts(), n);
        }
        h.manager.handle_radio(drop_link("dev-1", None));
        assert_eq!(
            h.manager.state(),
            &error("lost connection after 3 attempts")
        );
    }

    #[test]
    fn test_handshake_resets_attempts() {
        let mut h = harness();
        connect_fully(&mut h, "dev-1");
        h.manager.handle_radio(drop_link("dev-1", None));
        h.manager.handle_radio(drop_link("dev-1", Some("timeout")));
        assert_eq!(h.manager.attempts(), 2);

        h.manager.handle_vendor(vendor("dev-1", VendorEventKind::Connected));
        assert_eq!(h.manager.attempts(), 0);
        assert!(h.manager.last_error().is_none());

        // The budget is whole again.
        for _ in 0..3 {
            h.manager.handle_radio(drop_link("dev-1", None));
        }
        assert_eq!(h.manager.state(), &ConnectionState::Connected);
    }

    #[test]
    fn test_custom_budget() {
        let mut h = harness_with(CgmConfig::default().max_attempts(1));
        connect_fully(&mut h, "dev-1");
        h.manager.handle_radio(drop_link("dev-1", None));
        assert_eq!(h.manager.state(), &ConnectionState::Connected);
        h.manager.handle_radio(drop_link("dev-1", None));
        assert_eq!(
            h.manager.state(),
            &error("lost connection after 1 attempts")
        );
    }

    #[test]
    fn test_foreign_callbacks_are_ignored() {
        let mut h = harness();
        connect_fully(&mut h, "dev-1");
        h.manager.handle_radio(drop_link("dev-1", None));
        drain(&mut h.events);

        h.manager.handle_radio(drop_link("other", Some("boom")));
        h.manager.handle_radio(RadioEvent::ConnectFailed {
            device: id("other"),
            reason: None,
        });
        h.manager.handle_vendor(vendor("other", VendorEventKind::Connected));
        h.manager.handle_vendor(vendor(
            "other",
            VendorEventKind::Sample(VendorSample::mg_per_dl(100.0, minutes_ago(1))),
        ));

        assert_eq!(h.manager.state(), &ConnectionState::Connected);
        assert_eq!(h.manager.attempts(), 1);
        assert!(h.manager.readings().is_empty());
        assert!(drain(&mut h.events).is_empty());
    }

    // --- Disconnect ---

    #[test]
    fn test_disconnect_is_idempotent() {
        let mut h = harness();
        h.manager.start_scan();
        h.manager
            .handle_radio(RadioEvent::Advertisement(Advertisement::named(id("dev-1"), "Dexcom-1")));
        connect_fully(&mut h, "dev-1");

        h.manager.disconnect();
        assert_eq!(h.manager.state(), &ConnectionState::Disconnected);
        h.manager.disconnect();
        assert_eq!(h.manager.state(), &ConnectionState::Disconnected);

        assert!(h.manager.selected().is_none());
        assert_eq!(h.manager.attempts(), 0);
        assert_eq!(h.manager.candidates().len(), 1);
        assert!(h.factory.last().unwrap().status().stopped);
        let cancels = h
            .radio
            .calls()
            .into_iter()
            .filter(|c| *c == RadioCall::CancelConnection(id("dev-1")))
            .count();
        assert_eq!(cancels, 1);
    }

    #[test]
    fn test_disconnect_stops_scan() {
        let mut h = harness();
        h.manager.start_scan();
        h.manager.disconnect();
        assert_eq!(h.radio.calls().last(), Some(&RadioCall::StopScan));
    }

    // --- Radio power ---

    #[test]
    fn test_radio_power_cycle_resumes_scanning() {
        let mut h = harness();
        connect_fully(&mut h, "dev-1");

        h.radio.set_state(RadioState::PoweredOff);
        h.manager
            .handle_radio(RadioEvent::StateChanged(RadioState::PoweredOff));
        assert_eq!(h.manager.state(), &error(RADIO_UNAVAILABLE_REASON));
        assert_eq!(h.manager.last_error(), Some(RADIO_OFF_DETAIL));

        h.radio.set_state(RadioState::PoweredOn);
        h.manager
            .handle_radio(RadioEvent::StateChanged(RadioState::PoweredOn));
        assert_eq!(h.manager.state(), &ConnectionState::Scanning);
        assert!(h.manager.selected().is_none());
    }

    #[test]
    fn test_power_on_does_not_clear_other_errors() {
        let mut h = harness();
        h.manager.connect(&id("dev-1"), "AB12CD").unwrap();
        h.manager.handle_radio(RadioEvent::ConnectFailed {
            device: id("dev-1"),
            reason: Some("busy".into()),
        });
        h.manager
            .handle_radio(RadioEvent::StateChanged(RadioState::PoweredOn));
        assert_eq!(h.manager.state(), &error("connection failed: busy"));
    }

    #[test]
    fn test_resetting_radio_is_not_an_error() {
        let mut h = harness();
        connect_fully(&mut h, "dev-1");
        h.manager
            .handle_radio(RadioEvent::StateChanged(RadioState::Resetting));
        assert_eq!(h.manager.state(), &ConnectionState::Connected);
    }

    // --- Auto-reconnect ---

    fn stored() -> PairingCredential {
        PairingCredential::new("AB12CD", id("dev-1")).unwrap()
    }

    #[test]
    fn test_auto_reconnect_connects_when_resolved() {
        let mut h = harness();
        h.manager.auto_reconnect(stored());
        assert_eq!(h.radio.calls(), vec![RadioCall::Resolve(id("dev-1"))]);

        h.manager.handle_radio(RadioEvent::Resolved {
            device: id("dev-1"),
            found: true,
        });
        assert_eq!(h.manager.state(), &ConnectionState::Connecting);
        assert_eq!(h.factory.last().unwrap().serial(), "AB12CD");
    }

    #[test]
    fn test_auto_reconnect_scans_when_unknown() {
        let mut h = harness();
        h.manager.auto_reconnect(stored());
        h.manager.handle_radio(RadioEvent::Resolved {
            device: id("dev-1"),
            found: false,
        });
        assert_eq!(h.manager.state(), &ConnectionState::Scanning);
        assert!(h.factory.created().is_empty());
    }

    #[test]
    fn test_stale_resolve_is_ignored() {
        let mut h = harness();
        h.manager.auto_reconnect(stored());
        h.manager.disconnect();
        h.manager.handle_radio(RadioEvent::Resolved {
            device: id("dev-1"),
            found: true,
        });
        assert_eq!(h.manager.state(), &ConnectionState::Disconnected);
    }

    #[test]
    fn test_auto_reconnect_with_radio_off() {
        let mut h = harness();
        h.radio.set_state(RadioState::PoweredOff);
        h.manager.auto_reconnect(stored());
        assert_eq!(h.manager.state(), &error(RADIO_UNAVAILABLE_REASON));
    }

    // --- Readings ---

    #[test]
    fn test_samples_fill_window_newest_first() {
        let mut h = harness();
        connect_fully(&mut h, "dev-1");
        drain(&mut h.events);

        h.manager.handle_vendor(vendor(
            "dev-1",
            VendorEventKind::Backfill(vec![
                VendorSample::mg_per_dl(100.0, minutes_ago(15)),
                VendorSample::mg_per_dl(105.0, minutes_ago(10)),
                VendorSample::mg_per_dl(999.0, minutes_ago(25 * 60)),
            ]),
        ));
        h.manager.handle_vendor(vendor(
            "dev-1",
            VendorEventKind::Sample(VendorSample {
                quantity: Some(6.0),
                unit: GlucoseUnit::MmolPerL,
                read_at: minutes_ago(5),
                trend: Some(4),
            }),
        ));
        h.manager.handle_vendor(vendor(
            "dev-1",
            VendorEventKind::Sample(VendorSample {
                quantity: None,
                unit: GlucoseUnit::MgPerDl,
                read_at: minutes_ago(0),
                trend: None,
            }),
        ));

        let values: Vec<f64> = h.manager.readings().iter().map(|r| r.value.round()).collect();
        assert_eq!(values, [108.0, 105.0, 100.0]);

        let flags: Vec<bool> = drain(&mut h.events)
            .into_iter()
            .filter_map(|e| match e {
                CgmEvent::Reading { backfill, .. } => Some(backfill),
                _ => None,
            })
            .collect();
        assert_eq!(flags, [true, true, false]);
    }

    #[test]
    fn test_vendor_errors_and_unknown_data_do_not_change_state() {
        let mut h = harness();
        h.manager.connect(&id("dev-1"), "AB12CD").unwrap();
        h.manager
            .handle_vendor(vendor("dev-1", VendorEventKind::Error("auth retry".into())));
        h.manager.handle_vendor(vendor(
            "dev-1",
            VendorEventKind::UnknownData(Bytes::from_static(&[0x31, 0x00])),
        ));
        assert_eq!(h.manager.state(), &ConnectionState::Connecting);
    }

    // --- Config and snapshot ---

    #[test]
    fn test_config_validation() {
        assert!(CgmConfig::default().validate().is_ok());
        assert!(CgmConfig::default().name_filters(Vec::<String>::new()).validate().is_err());
        assert!(CgmConfig::default().name_filters([""]).validate().is_err());
        assert!(CgmConfig::default().max_attempts(0).validate().is_err());
        assert!(CgmConfig::default().retention(Duration::ZERO).validate().is_err());
        assert!(CgmConfig::default().event_capacity(0).validate().is_err());
        assert!(CgmConfig::default().user_scope("  ").validate().is_err());
        assert!(
            ConnectionManager::new(
                CgmConfig::default().max_attempts(0),
                MockRadio::powered_on(),
                MockHandshakeFactory::new()
            )
            .is_err()
        );
    }

    #[test]
    fn test_snapshot() {
        let mut h = harness();
        connect_fully(&mut h, "dev-1");
        h.manager.handle_radio(drop_link("dev-1", None));
        let snap = h.manager.snapshot();
        assert_eq!(snap.state, ConnectionState::Connected);
        assert_eq!(snap.selected, Some(id("dev-1")));
        assert_eq!(snap.attempts, 1);
        assert!(snap.last_error.is_none());
        assert!(snap.readings.is_empty());
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        fn foreign_event() -> impl Strategy<Value = Callback> {
            prop_oneof![
                proptest::option::of("[a-z]{1,8}").prop_map(|err| Callback::Radio(
                    RadioEvent::Disconnected {
                        device: DeviceId::new("intruder").unwrap(),
                        error: err,
                    }
                )),
                Just(Callback::Radio(RadioEvent::Connected(
                    DeviceId::new("intruder").unwrap()
                ))),
                Just(Callback::Radio(RadioEvent::ConnectFailed {
                    device: DeviceId::new("intruder").unwrap(),
                    reason: None,
                })),
                Just(Callback::Vendor(VendorEvent::new(
                    DeviceId::new("intruder").unwrap(),
                    VendorEventKind::Connected
                ))),
                (40.0f64..400.0).prop_map(|v| Callback::Vendor(VendorEvent::new(
                    DeviceId::new("intruder").unwrap(),
                    VendorEventKind::Sample(VendorSample::mg_per_dl(v, OffsetDateTime::now_utc()))
                ))),
            ]
        }

        proptest! {
            /// Callbacks for a device other than the selected one never
            /// mutate state, attempts, or the reading window.
            #[test]
            fn foreign_callbacks_never_mutate(
                prior_drops in 0u32..3,
                events in proptest::collection::vec(foreign_event(), 0..30),
            ) {
                let mut h = harness();
                connect_fully(&mut h, "dev-1");
                for _ in 0..prior_drops {
                    h.manager.handle_radio(drop_link("dev-1", None));
                }
                let before = h.manager.snapshot();

                for event in events {
                    h.manager.handle_callback(event);
                }

                prop_assert_eq!(h.manager.snapshot(), before);
            }
        }
    }
}
