//! Simulated transmitter session.
//!
//! Drives the real connection core against a mock radio and handshake:
//! scan (or auto-reconnect from the stored pairing), connect, backfill,
//! live readings with periodic link drops, then disconnect. Readings and
//! the pairing go to the local store.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use cgmlink_core::mock::{MockHandshakeFactory, MockRadio, SimulatedGlucose};
use cgmlink_core::{
    Advertisement, CgmConfig, CgmEvent, CgmService, ConnectionManager, DeviceCandidate,
    EventReceiver, VendorEventKind, callback_channel,
};
use cgmlink_store::Store;
use cgmlink_types::{ConnectionState, DeviceId, GlucoseUnit, PairingCredential};
use time::OffsetDateTime;
use tokio::sync::Mutex;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use crate::cli::DemoArgs;
use crate::format::{format_live_reading, format_snapshot_text, format_state};
use crate::sink::StoreSink;
use crate::util::open_store;

const SIMULATED_DEVICE: &str = "SIM-8G-0001";
const SIMULATED_NAME: &str = "Dexcom 8G";

/// Sample spacing on the simulated timeline.
const SAMPLE_SPACING: time::Duration = time::Duration::minutes(5);

const STEP_TIMEOUT: Duration = Duration::from_secs(5);

/// Output settings for the session.
#[derive(Debug, Clone, Copy)]
pub struct DemoOutput {
    pub unit: GlucoseUnit,
    pub no_color: bool,
    pub quiet: bool,
}

pub async fn cmd_demo(
    args: &DemoArgs,
    config: CgmConfig,
    database: &Path,
    out: DemoOutput,
) -> Result<()> {
    let scope = config.user_scope.clone();
    let store = Arc::new(Mutex::new(open_store(database)?));
    let stored = if args.fresh {
        None
    } else {
        store.lock().await.load_pairing()?
    };

    let (callbacks, inbox) = callback_channel();
    let device = DeviceId::new(SIMULATED_DEVICE)?;
    let radio = MockRadio::powered_on();
    radio.respond_via(callbacks.clone());
    radio.add_known(device.clone());
    radio.add_advertisement(Advertisement::named(device.clone(), SIMULATED_NAME).with_rssi(-58));
    radio.add_advertisement(
        Advertisement::named(DeviceId::new("SIM-AUDIO-7")?, "Headphones").with_rssi(-41),
    );

    let handshakes = MockHandshakeFactory::responding(callbacks);
    let manager = ConnectionManager::new(config, radio.clone(), handshakes.clone())?
        .with_sink(Arc::new(StoreSink::new(store.clone())));
    let service = CgmService::spawn(manager, inbox);
    let printer = tokio::spawn(print_events(service.subscribe(), store.clone(), out));

    let credential = stored.map(|p| p.credential()).transpose()?;
    if let Err(e) = connect(&service, credential, &args.serial).await {
        service.shutdown().await;
        let _ = printer.await;
        return Err(e);
    }

    let handshake = handshakes
        .last()
        .context("Session opened without a handshake")?;
    let mut glucose = SimulatedGlucose::default();
    let interval = Duration::from_millis(args.interval_ms);
    let start = OffsetDateTime::now_utc() - SAMPLE_SPACING * args.readings;

    if args.backfill > 0 {
        let samples = glucose.backfill(start - SAMPLE_SPACING, args.backfill, SAMPLE_SPACING);
        handshake.emit(VendorEventKind::Backfill(samples));
    }

    for i in 0..args.readings {
        tokio::time::sleep(interval).await;
        handshake.send_sample(glucose.next_sample(start + SAMPLE_SPACING * i));

        let sent = i + 1;
        if args.drop_every > 0 && sent % args.drop_every == 0 && sent < args.readings {
            info!("Simulating a radio drop after {} readings", sent);
            radio.drop_link(&device, Some("connection timed out"));
        }
    }

    // Persistence is fire-and-forget; give the last writes a moment.
    tokio::time::sleep(interval.max(Duration::from_millis(100))).await;
    let snapshot = service.snapshot().await?;
    service.disconnect().await?;
    service.shutdown().await;
    let _ = printer.await;

    println!();
    print!("{}", format_snapshot_text(&snapshot, out.unit, out.no_color));
    match scope {
        Some(scope) => {
            let count = store.lock().await.count_readings(Some(&scope))?;
            println!("Stored:      {} reading(s) for {}", count, scope);
        }
        None => println!("Stored:      nothing (pass --user to persist readings)"),
    }
    Ok(())
}

/// Open a session: auto-reconnect from `stored` when present, otherwise
/// scan and pick the first candidate.
async fn connect(
    service: &CgmService,
    stored: Option<PairingCredential>,
    serial: &str,
) -> Result<()> {
    match stored {
        Some(credential) => {
            info!("Reconnecting to stored transmitter {}", credential.device_id());
            service.auto_reconnect(credential).await?;
        }
        None => service.start_scan().await?,
    }

    let state = service
        .wait_for_state(STEP_TIMEOUT, |s| {
            matches!(
                s,
                ConnectionState::Scanning | ConnectionState::Connected | ConnectionState::Error(_)
            )
        })
        .await;

    // A stored pairing the radio no longer knows falls back to a scan.
    if state == Some(ConnectionState::Scanning) {
        let candidate = wait_for_candidate(service).await?;
        service.connect_candidate(&candidate, serial).await?;
    }

    match service
        .wait_for_state(STEP_TIMEOUT, |s| {
            matches!(s, ConnectionState::Connected | ConnectionState::Error(_))
        })
        .await
    {
        Some(ConnectionState::Connected) => Ok(()),
        Some(state) => bail!("Connection failed: {}", state),
        None => bail!("Timed out waiting for the transmitter"),
    }
}

async fn wait_for_candidate(service: &CgmService) -> Result<DeviceCandidate> {
    let deadline = tokio::time::Instant::now() + STEP_TIMEOUT;
    loop {
        if let Some(candidate) = service.snapshot().await?.candidates.into_iter().next() {
            return Ok(candidate);
        }
        if tokio::time::Instant::now() >= deadline {
            bail!("No transmitter found");
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Print core events and save the pairing when a handshake succeeds.
async fn print_events(mut events: EventReceiver, store: Arc<Mutex<Store>>, out: DemoOutput) {
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(n)) => {
                warn!("Missed {} events", n);
                continue;
            }
            Err(RecvError::Closed) => break,
        };

        match event {
            CgmEvent::StateChanged { state } => {
                if !out.quiet {
                    println!("State: {}", format_state(&state, out.no_color));
                }
            }
            CgmEvent::CandidatesUpdated { candidates } => {
                if !out.quiet && !candidates.is_empty() {
                    println!("Found {} transmitter(s)", candidates.len());
                }
            }
            CgmEvent::Reading { reading, backfill } => {
                println!(
                    "{}",
                    format_live_reading(&reading, backfill, out.unit, out.no_color)
                );
            }
            CgmEvent::Paired { credential } => {
                match store.lock().await.save_pairing(&credential) {
                    Ok(_) => info!("Saved pairing for {}", credential.device_id()),
                    Err(e) => warn!("Failed to save pairing: {}", e),
                }
            }
            _ => {}
        }
    }
}
