//! Modified Julian Date codec (spec §4.1) and the UTC time arithmetic that
//! Service/Time tables (TDT, TOT, EIT — out of scope for this crate, but
//! consumers of it) build on.
//!
//! Grounded on the teacher's `psi/tdt.rs`, which stops at splitting a TDT/TOT
//! section into its raw MJD+BCD bytes and checking the CRC; this module adds
//! the actual MJD↔UTC conversion the teacher never performed.

use crate::error::{CoreError, Result};
use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, TimeZone, Timelike, Utc};

/// Byte counts `decode` accepts: date-only, date+hour/minute, date+time.
const MJD_SIZES: [usize; 3] = [2, 4, 5];

fn bcd_to_decimal(byte: u8) -> Result<u8> {
    let hi = byte >> 4;
    let lo = byte & 0x0F;
    if hi > 9 || lo > 9 {
        return Err(CoreError::Format(format!("invalid BCD byte 0x{byte:02X}")));
    }
    Ok(hi * 10 + lo)
}

fn decimal_to_bcd(value: u8) -> u8 {
    debug_assert!(value < 100);
    ((value / 10) << 4) | (value % 10)
}

/// Decodes 2, 4, or 5 bytes into a UTC instant.
///
/// - 2 bytes: date only, time defaults to midnight.
/// - 4 bytes: date plus BCD hour/minute, seconds default to zero (the
///   "middle case" spec.md §9 flags as asymmetric with `encode`).
/// - 5 bytes: date plus full BCD hour/minute/second.
pub fn decode(bytes: &[u8]) -> Result<DateTime<Utc>> {
    if !MJD_SIZES.contains(&bytes.len()) {
        return Err(CoreError::Format(format!(
            "MJD byte count must be 2, 4, or 5, got {}",
            bytes.len()
        )));
    }

    let mjd = u16::from_be_bytes([bytes[0], bytes[1]]) as f64;

    let y_prime = ((mjd - 15078.2) / 365.25).floor();
    let m_prime = ((mjd - 14956.1 - (y_prime * 365.25).floor()) / 30.6001).floor();
    let day = mjd - 14956.0 - (y_prime * 365.25).floor() - (m_prime * 30.6001).floor();
    let k = if m_prime == 14.0 || m_prime == 15.0 { 1.0 } else { 0.0 };
    let year = 1900.0 + y_prime + k;
    let month = m_prime - 1.0 - 12.0 * k;

    let date = NaiveDate::from_ymd_opt(year as i32, month as u32, day as u32)
        .ok_or_else(|| CoreError::Format(format!("MJD {mjd} decodes to an invalid calendar date")))?;

    let (hour, minute, second) = match bytes.len() {
        2 => (0, 0, 0),
        4 => (bcd_to_decimal(bytes[2])?, bcd_to_decimal(bytes[3])?, 0),
        5 => (
            bcd_to_decimal(bytes[2])?,
            bcd_to_decimal(bytes[3])?,
            bcd_to_decimal(bytes[4])?,
        ),
        _ => unreachable!("size already validated"),
    };

    let time = NaiveTime::from_hms_opt(hour as u32, minute as u32, second as u32)
        .ok_or_else(|| CoreError::Format(format!("invalid time of day {hour:02}:{minute:02}:{second:02}")))?;

    Ok(Utc.from_utc_datetime(&date.and_time(time)))
}

/// Encodes a UTC instant into 2, 4, or 5 bytes. `size` must be one of those
/// three values; 4-byte encoding is never accepted (spec.md §9 preserves the
/// asymmetry the source exhibits rather than invent a lossy round-trip).
pub fn encode(time: DateTime<Utc>, size: usize) -> Result<Vec<u8>> {
    if size != 2 && size != 5 {
        return Err(CoreError::Format(format!(
            "MJD encode only supports size 2 or 5, got {size}"
        )));
    }

    let naive = time.naive_utc();
    let date = naive.date();
    let (year, month, day) = (date.year(), date.month(), date.day());

    if date < NaiveDate::from_ymd_opt(1900, 3, 1).expect("valid literal date") {
        return Err(CoreError::Format(
            "MJD encode requires a date on or after 1900-03-01".to_string(),
        ));
    }

    if size == 2 {
        let tod = naive.time();
        if tod != NaiveTime::from_hms_opt(0, 0, 0).expect("valid literal time") {
            return Err(CoreError::Format(
                "2-byte MJD encoding cannot carry a non-midnight time of day".to_string(),
            ));
        }
    }

    let k: i64 = if month == 1 || month == 2 { 1 } else { 0 };
    let year = year as i64;
    let mjd = 14956
        + day as i64
        + (((year - 1900 - k) as f64 * 365.25).floor() as i64)
        + (((month as i64 + 1 + k * 12) as f64 * 30.6001).floor() as i64);

    let mjd = u16::try_from(mjd)
        .map_err(|_| CoreError::Format(format!("MJD value {mjd} out of u16 range")))?;

    let mut out = mjd.to_be_bytes().to_vec();
    if size == 5 {
        let tod = naive.time();
        out.push(decimal_to_bcd(tod.hour() as u8));
        out.push(decimal_to_bcd(tod.minute() as u8));
        out.push(decimal_to_bcd(tod.second() as u8));
    }
    Ok(out)
}
