//! Time/partition math: epoch-nanos to calendar conversion and the
//! resolution classifier that picks a partition's rotation increment from
//! its format string.

use crate::error::{Result, TdbError};
use crate::units::NANOS_PER_SECOND;

const SECOND_FMTS: &[&str] = &["%S", "%X", "%T", "%r"];
const MINUTE_FMTS: &[&str] = &["%M", "%R", "%c"];
const HOUR_FMTS: &[&str] = &["%H", "%I"];
const DAY_FMTS: &[&str] = &["%j", "%d", "%e", "%x", "%a", "%A", "%u", "%w", "%D", "%F"];
const MONTH_FMTS: &[&str] = &["%b", "%h", "%B", "%m"];
const YEAR_FMTS: &[&str] = &["%C", "%g", "%G", "%y", "%Y"];

const DAYS_IN_MONTH: [i64; 12] = [31, 28, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31];

fn is_leap(year: i32) -> bool {
    if year % 400 == 0 {
        true
    } else if year % 100 == 0 {
        false
    } else {
        year % 4 == 0
    }
}

/// Turns an epoch-nanosecond timestamp into a UTC `jiff::Zoned`.
pub fn to_utc(epoch_nanos: i64) -> Result<jiff::Zoned> {
    let secs = epoch_nanos.div_euclid(NANOS_PER_SECOND);
    let nanos = epoch_nanos.rem_euclid(NANOS_PER_SECOND) as i32;
    let ts = jiff::Timestamp::new(secs, nanos)
        .map_err(|e| TdbError::InvalidArgument(format!("timestamp {epoch_nanos} out of range: {e}")))?;
    Ok(ts.to_zoned(jiff::tz::TimeZone::UTC))
}

/// Classifies a `strftime`-style format string by its *finest* resolution
/// specifier present, returning the partition increment in nanoseconds for
/// the calendar month/year containing `zoned` (month length and leap years
/// matter only when month or year granularity was chosen).
///
/// Week specifiers (`%V %U %W`) are not recognized as increment drivers;
/// a format string using only those is rejected.
pub fn resolution_increment_nanos(fmt: &str, zoned: &jiff::Zoned) -> Result<i64> {
    if SECOND_FMTS.iter().any(|s| fmt.contains(s)) {
        return Ok(NANOS_PER_SECOND);
    }
    if MINUTE_FMTS.iter().any(|s| fmt.contains(s)) {
        return Ok(60 * NANOS_PER_SECOND);
    }
    if HOUR_FMTS.iter().any(|s| fmt.contains(s)) {
        return Ok(3600 * NANOS_PER_SECOND);
    }
    if fmt.contains("%p") {
        return Ok(43_200 * NANOS_PER_SECOND);
    }
    if DAY_FMTS.iter().any(|s| fmt.contains(s)) {
        return Ok(86_400 * NANOS_PER_SECOND);
    }
    if MONTH_FMTS.iter().any(|s| fmt.contains(s)) {
        let month = zoned.month() as usize; // 1-12
        let mut days = DAYS_IN_MONTH[month - 1];
        if month == 2 && is_leap(zoned.year() as i32) {
            days += 1;
        }
        return Ok(86_400 * days * NANOS_PER_SECOND);
    }
    if YEAR_FMTS.iter().any(|s| fmt.contains(s)) {
        let days = if is_leap(zoned.year() as i32) { 366 } else { 365 };
        return Ok(86_400 * days * NANOS_PER_SECOND);
    }

    Err(TdbError::InvalidArgument(format!(
        "partition format {fmt:?} has no recognized resolution specifier"
    )))
}

/// `ts_min = ts - (ts mod Δ)`.
pub fn min_partition_ts(fmt: &str, epoch_nanos: i64) -> Result<i64> {
    let zoned = to_utc(epoch_nanos)?;
    let delta = resolution_increment_nanos(fmt, &zoned)?;
    Ok(epoch_nanos - epoch_nanos.rem_euclid(delta))
}

/// `ts_max = ((ts / Δ) + 1) * Δ`.
pub fn max_partition_ts(fmt: &str, epoch_nanos: i64) -> Result<i64> {
    let zoned = to_utc(epoch_nanos)?;
    let delta = resolution_increment_nanos(fmt, &zoned)?;
    Ok((epoch_nanos.div_euclid(delta) + 1) * delta)
}

/// Renders the partition name for `epoch_nanos` under `fmt`.
pub fn render_partition_name(fmt: &str, epoch_nanos: i64) -> Result<String> {
    let zoned = to_utc(epoch_nanos)?;
    let name = jiff::fmt::strtime::format(fmt, &zoned)
        .map_err(|e| TdbError::InvalidArgument(format!("bad partition format {fmt:?}: {e}")))?;
    if name.len() > crate::units::PATH_MAX {
        return Err(TdbError::Exhausted(format!(
            "partition name exceeds PATH_MAX ({} bytes)",
            crate::units::PATH_MAX
        )));
    }
    Ok(name)
}
