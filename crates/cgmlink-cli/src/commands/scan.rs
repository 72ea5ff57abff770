//! Scan command implementation.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use cgmlink_core::mock::MockHandshakeFactory;
use cgmlink_core::{BtleRadio, CgmConfig, CgmService, ConnectionManager, callback_channel};
use cgmlink_types::ConnectionState;
use tracing::info;

use crate::cli::OutputFormat;
use crate::format::{format_candidates_csv, format_candidates_json, format_candidates_text};
use crate::style;
use crate::util::write_output;

/// How long to wait for the adapter to report its power state.
const ADAPTER_READY_TIMEOUT: Duration = Duration::from_secs(3);

pub async fn cmd_scan(
    timeout: u64,
    format: OutputFormat,
    output: Option<&PathBuf>,
    quiet: bool,
    config: CgmConfig,
) -> Result<()> {
    let (callbacks, inbox) = callback_channel();
    let radio = BtleRadio::new(callbacks)
        .await
        .context("Failed to open the Bluetooth adapter")?;
    let radio_state = radio.wait_until_ready(ADAPTER_READY_TIMEOUT).await;
    info!("Adapter is {}", radio_state);

    // A scan never opens a session, so no handshake is ever created.
    let manager = ConnectionManager::new(config, radio, MockHandshakeFactory::new())?;
    let service = CgmService::spawn(manager, inbox);

    let spinner = (!quiet && matches!(format, OutputFormat::Text))
        .then(|| style::scanning_spinner(timeout));

    service.start_scan().await?;
    if let ConnectionState::Error(reason) = service.state() {
        if let Some(sp) = spinner {
            sp.finish_and_clear();
        }
        service.shutdown().await;
        bail!("Scan failed: {}", reason);
    }

    tokio::time::sleep(Duration::from_secs(timeout)).await;
    let snapshot = service.snapshot().await?;
    service.shutdown().await;

    if let Some(sp) = spinner {
        sp.finish_and_clear();
    }

    let content = match format {
        OutputFormat::Text => format_candidates_text(&snapshot.candidates),
        OutputFormat::Json => format_candidates_json(&snapshot.candidates)?,
        OutputFormat::Csv => format_candidates_csv(&snapshot.candidates),
    };
    write_output(output, &content)
}
