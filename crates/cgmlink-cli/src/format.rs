//! Output formatting for CLI commands.

use std::fmt::Write as _;

use anyhow::Result;
use cgmlink_core::CgmSnapshot;
use cgmlink_store::{ReadingStats, StoredPairing, StoredReading};
use cgmlink_types::{ConnectionState, DeviceCandidate, GlucoseUnit, Reading};
use owo_colors::OwoColorize;

use crate::util::format_time;

/// Glucose thresholds in mg/dL.
pub mod glucose {
    /// Below this is low.
    pub const LOW: f64 = 70.0;
    /// Above this is high.
    pub const HIGH: f64 = 180.0;
}

/// Format a glucose value in `unit`, colored by range.
pub fn format_glucose(mg_per_dl: f64, unit: GlucoseUnit, no_color: bool) -> String {
    let text = match unit {
        GlucoseUnit::MgPerDl => format!("{:.0} {}", mg_per_dl, unit),
        GlucoseUnit::MmolPerL => format!("{:.1} {}", unit.from_mg_per_dl(mg_per_dl), unit),
    };
    if no_color {
        return text;
    }

    if mg_per_dl < glucose::LOW {
        format!("{}", text.red())
    } else if mg_per_dl > glucose::HIGH {
        format!("{}", text.yellow())
    } else {
        format!("{}", text.green())
    }
}

pub fn format_state(state: &ConnectionState, no_color: bool) -> String {
    let text = state.to_string();
    if no_color {
        return text;
    }
    match state {
        ConnectionState::Connected => format!("{}", text.green()),
        ConnectionState::Error(_) => format!("{}", text.red()),
        ConnectionState::Disconnected => format!("{}", text.dimmed()),
        _ => format!("{}", text.cyan()),
    }
}

/// One line for a live reading.
pub fn format_live_reading(
    reading: &Reading,
    backfill: bool,
    unit: GlucoseUnit,
    no_color: bool,
) -> String {
    let arrow = reading.trend_arrow().map(|t| t.arrow()).unwrap_or(" ");
    let tag = if backfill { " (backfill)" } else { "" };
    format!(
        "{}  {} {}{}",
        format_time(reading.timestamp),
        format_glucose(reading.value, unit, no_color),
        arrow,
        tag
    )
}

// ============================================================================
// Scan
// ============================================================================

pub fn format_candidates_text(candidates: &[DeviceCandidate]) -> String {
    if candidates.is_empty() {
        return "No transmitters found.\n".to_string();
    }

    let mut out = format!("Found {} transmitter(s):\n\n", candidates.len());
    for candidate in candidates {
        let rssi = candidate
            .rssi
            .map(|r| format!("{} dBm", r))
            .unwrap_or_else(|| "-".to_string());
        let _ = writeln!(
            out,
            "  {:<24} {:<40} {}",
            candidate.name,
            candidate.id.as_str(),
            rssi
        );
    }
    out
}

pub fn format_candidates_json(candidates: &[DeviceCandidate]) -> Result<String> {
    Ok(serde_json::to_string_pretty(candidates)? + "\n")
}

pub fn format_candidates_csv(candidates: &[DeviceCandidate]) -> String {
    let mut out = "name,id,rssi\n".to_string();
    for candidate in candidates {
        let rssi = candidate.rssi.map(|r| r.to_string()).unwrap_or_default();
        let _ = writeln!(
            out,
            "{},{},{}",
            csv_field(&candidate.name),
            csv_field(candidate.id.as_str()),
            rssi
        );
    }
    out
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

// ============================================================================
// Stored readings
// ============================================================================

pub fn format_readings_text(
    readings: &[StoredReading],
    unit: GlucoseUnit,
    no_color: bool,
) -> String {
    if readings.is_empty() {
        return "No readings stored.\n".to_string();
    }

    let mut out = String::new();
    for reading in readings {
        let arrow = reading.trend_arrow().map(|t| t.arrow()).unwrap_or(" ");
        let _ = writeln!(
            out,
            "{}  {:<8} {} {}",
            format_time(reading.captured_at),
            reading.scope,
            format_glucose(reading.value, unit, no_color),
            arrow
        );
    }
    out
}

pub fn format_readings_json(readings: &[StoredReading]) -> Result<String> {
    Ok(serde_json::to_string_pretty(readings)? + "\n")
}

pub fn format_stats_text(stats: &ReadingStats, unit: GlucoseUnit) -> String {
    if stats.count == 0 {
        return "No readings in range.\n".to_string();
    }

    let value = |v: Option<f64>| {
        v.map(|v| format_glucose(v, unit, true))
            .unwrap_or_else(|| "-".to_string())
    };
    let percent = |n: u64| n as f64 * 100.0 / stats.count as f64;

    let mut out = String::new();
    let _ = writeln!(out, "Readings:      {}", stats.count);
    let _ = writeln!(out, "Mean:          {}", value(stats.mean));
    let _ = writeln!(out, "Min / Max:     {} / {}", value(stats.min), value(stats.max));
    let _ = writeln!(out, "Below range:   {:.1}%", percent(stats.below_range));
    let _ = writeln!(out, "In range:      {:.1}%", percent(stats.in_range));
    let _ = writeln!(out, "Above range:   {:.1}%", percent(stats.above_range));
    out
}

// ============================================================================
// Pairing and session summary
// ============================================================================

pub fn format_pairing_text(pairing: Option<&StoredPairing>) -> String {
    let Some(pairing) = pairing else {
        return "No transmitter paired.\n".to_string();
    };

    let mut out = String::new();
    let _ = writeln!(out, "Serial:          {}", pairing.serial);
    let _ = writeln!(out, "Device:          {}", pairing.device_id);
    let _ = writeln!(out, "Paired at:       {}", format_time(pairing.paired_at));
    if let Some(at) = pairing.last_connected_at {
        let _ = writeln!(out, "Last connected:  {}", format_time(at));
    }
    out
}

pub fn format_snapshot_text(snapshot: &CgmSnapshot, unit: GlucoseUnit, no_color: bool) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "State:       {}", format_state(&snapshot.state, no_color));
    if let Some(error) = &snapshot.last_error {
        let _ = writeln!(out, "Last error:  {}", error);
    }
    let _ = writeln!(out, "Window:      {} reading(s)", snapshot.readings.len());
    if let Some(latest) = snapshot.readings.first() {
        let _ = writeln!(
            out,
            "Latest:      {}",
            format_live_reading(latest, false, unit, no_color)
        );
    }
    out
}
