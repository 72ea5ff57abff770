//! Readings command: query the local store.

use std::path::PathBuf;

use anyhow::{Context, Result};
use cgmlink_store::{ReadingQuery, Store};
use cgmlink_types::GlucoseUnit;
use time::OffsetDateTime;

use crate::cli::{OutputFormat, RangeArgs, ReadingsAction};
use crate::format::{format_readings_json, format_readings_text, format_stats_text};
use crate::util::{parse_time, write_output};

/// Shared settings for the readings commands.
#[derive(Debug, Clone, Copy)]
pub struct ReadingsContext<'a> {
    pub scope: Option<&'a str>,
    pub unit: GlucoseUnit,
    pub output: Option<&'a PathBuf>,
    pub no_color: bool,
}

pub fn cmd_readings(action: ReadingsAction, store: &Store, ctx: ReadingsContext<'_>) -> Result<()> {
    match action {
        ReadingsAction::List {
            range,
            count,
            format,
        } => {
            let unit = range.unit.map(Into::into).unwrap_or(ctx.unit);
            let mut query = build_query(&range, ctx.scope)?;
            if count > 0 {
                query = query.limit(count);
            }

            let content = match format {
                OutputFormat::Text => {
                    format_readings_text(&store.query_readings(&query)?, unit, ctx.no_color)
                }
                OutputFormat::Json => format_readings_json(&store.query_readings(&query)?)?,
                OutputFormat::Csv => {
                    let mut buf = Vec::new();
                    store.export_csv(&query, unit, &mut buf)?;
                    String::from_utf8(buf).context("CSV export produced invalid UTF-8")?
                }
            };
            write_output(ctx.output, &content)
        }
        ReadingsAction::Stats { range, format } => {
            let unit = range.unit.map(Into::into).unwrap_or(ctx.unit);
            let stats = store.reading_stats(&build_query(&range, ctx.scope)?)?;
            let content = match format {
                OutputFormat::Json => serde_json::to_string_pretty(&stats)? + "\n",
                _ => format_stats_text(&stats, unit),
            };
            write_output(ctx.output, &content)
        }
        ReadingsAction::Prune { older_than_hours } => {
            let hours = i64::try_from(older_than_hours).context("Age is too large")?;
            let cutoff = OffsetDateTime::now_utc() - time::Duration::hours(hours);
            let deleted = store.prune_before(cutoff)?;
            println!("Deleted {} reading(s).", deleted);
            Ok(())
        }
    }
}

fn build_query(range: &RangeArgs, scope: Option<&str>) -> Result<ReadingQuery> {
    let mut query = ReadingQuery::new();
    if let Some(scope) = scope {
        query = query.scope(scope);
    }
    if let Some(since) = &range.since {
        query = query.since(parse_time(since)?);
    }
    if let Some(until) = &range.until {
        query = query.until(parse_time(until)?);
    }
    Ok(query)
}
