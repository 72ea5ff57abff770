//! Utility functions for CLI operations.

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use cgmlink_store::Store;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{Date, OffsetDateTime};

/// Parse a time given as RFC3339 or as a UTC calendar date (YYYY-MM-DD).
pub fn parse_time(s: &str) -> Result<OffsetDateTime> {
    let s = s.trim();
    if let Ok(time) = OffsetDateTime::parse(s, &Rfc3339) {
        return Ok(time);
    }
    if let Ok(date) = Date::parse(s, format_description!("[year]-[month]-[day]")) {
        return Ok(date.midnight().assume_utc());
    }
    bail!(
        "Invalid time '{}'. Use RFC3339 (2025-06-01T08:00:00Z) or YYYY-MM-DD",
        s
    )
}

/// Format a timestamp as RFC3339, falling back to the debug form.
pub fn format_time(time: OffsetDateTime) -> String {
    time.format(&Rfc3339)
        .unwrap_or_else(|_| format!("{:?}", time))
}

/// Write output to file or stdout.
pub fn write_output(output: Option<&PathBuf>, content: &str) -> Result<()> {
    match output {
        Some(path) => {
            std::fs::write(path, content)
                .with_context(|| format!("Failed to write to {}", path.display()))?;
        }
        None => {
            print!("{}", content);
            io::stdout().flush()?;
        }
    }
    Ok(())
}

pub fn open_store(path: &Path) -> Result<Store> {
    Store::open(path).with_context(|| format!("Failed to open database {}", path.display()))
}
