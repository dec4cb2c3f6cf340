//! Timestamp normalization.
//!
//! All `@timestamp` values produced by this crate use one UTC format with
//! microsecond precision and no zone suffix, e.g.
//! `2024-03-01T23:59:59.000000`. Tool files carry epoch milliseconds (csv)
//! or epoch seconds (stdout logs, json records); the run's own dates come
//! from `metadata.log` in a handful of historical spellings.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Duration, NaiveDateTime};

use crate::counters::{Counter, Counters};

/// Output format of every normalized `@timestamp`.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f";

const ISO_SECONDS: &str = "%Y-%m-%dT%H:%M:%S";
const COMPACT_DATE_SECONDS: &str = "%Y%m%dT%H:%M:%S";

pub fn format_ts(ts: &NaiveDateTime) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

fn from_epoch_micros(micros: f64) -> Option<NaiveDateTime> {
    if !micros.is_finite() {
        return None;
    }
    let micros = micros.round() as i64;
    let secs = micros.div_euclid(1_000_000);
    let nanos = (micros.rem_euclid(1_000_000) * 1_000) as u32;
    DateTime::from_timestamp(secs, nanos).map(|dt| dt.naive_utc())
}

/// Parse a csv `timestamp_ms` cell.
pub fn parse_epoch_millis(raw: &str) -> Option<NaiveDateTime> {
    let ms: f64 = raw.trim().parse().ok()?;
    from_epoch_micros(ms * 1_000.0)
}

pub fn from_epoch_seconds(secs: f64) -> Option<NaiveDateTime> {
    from_epoch_micros(secs * 1_000_000.0)
}

/// Parse an epoch-seconds string (`timestamp: 1700000000.25`).
pub fn parse_epoch_seconds(raw: &str) -> Option<NaiveDateTime> {
    let secs: f64 = raw.trim().parse().ok()?;
    from_epoch_seconds(secs)
}

/// UTC day (`YYYY-MM-DD`) of a normalized timestamp string.
///
/// Used to pick the daily index a document lands in, so it only looks at
/// the document's own timestamp.
pub fn day_bucket(ts: &str) -> &str {
    ts.split_once('T').map(|(day, _)| day).unwrap_or(ts)
}

/// Parse a run date that may or may not carry fractional seconds.
pub fn parse_run_date(raw: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f").ok()
}

/// Normalize a `metadata.log` date.
///
/// Older harness versions wrote `_` between date and time and sometimes a
/// compact `YYYYMMDD` date. Both are rewritten to `YYYY-MM-DDTHH:MM:SS`;
/// fractional seconds are preserved verbatim.
pub fn fix_date_format(raw: &str) -> Result<String> {
    let rts = raw.trim().replace('_', "T");
    let (base, frac) = match rts.rfind('.') {
        Some(pos) => rts.split_at(pos),
        None => (rts.as_str(), ""),
    };
    if NaiveDateTime::parse_from_str(base, ISO_SECONDS).is_ok() {
        return Ok(format!("{}{}", base, frac));
    }
    let parsed = NaiveDateTime::parse_from_str(base, COMPACT_DATE_SECONDS)
        .map_err(|e| anyhow!("unrecognized date '{}': {}", raw, e))?;
    Ok(format!("{}{}", parsed.format(ISO_SECONDS), frac))
}

/// Convert a local-time run `date` to UTC.
///
/// `local` and `utc` are supposed to describe nearly the same instant, so
/// the difference between them, rounded to a tenth of an hour, is taken as
/// the local zone offset.
pub fn local_to_utc(local: &str, utc: &str) -> Result<String> {
    let strip = |s: &str| -> String {
        match s.rfind('.') {
            Some(pos) => s[..pos].to_string(),
            None => s.to_string(),
        }
    };
    let lts = NaiveDateTime::parse_from_str(&strip(local), ISO_SECONDS)
        .map_err(|e| anyhow!("bad local date '{}': {}", local, e))?;
    let uts = NaiveDateTime::parse_from_str(&strip(utc), ISO_SECONDS)
        .map_err(|e| anyhow!("bad utc date '{}': {}", utc, e))?;

    let hours = (lts - uts).num_seconds() as f64 / 3600.0;
    let rounded = (hours * 10.0).round() / 10.0;
    let shifted = lts - Duration::seconds((rounded * 3600.0) as i64);
    Ok(shifted.format(ISO_SECONDS).to_string())
}

/// Start and end of the run, used to flag tool samples taken outside it.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunWindow {
    pub start: Option<NaiveDateTime>,
    pub end: Option<NaiveDateTime>,
}

impl RunWindow {
    pub fn new(start_run: &str, end_run: &str) -> Self {
        Self {
            start: parse_run_date(start_run),
            end: parse_run_date(end_run),
        }
    }

    /// Count a sample outside the window. The sample itself is kept.
    pub fn check(&self, ts: &NaiveDateTime, counters: &mut Counters) {
        if matches!(self.start, Some(start) if *ts < start) {
            counters.incr(Counter::ToolTsBeforeStartRunTs);
        }
        if matches!(self.end, Some(end) if *ts > end) {
            counters.incr(Counter::ToolTsAfterEndRunTs);
        }
    }
}
