// src/gps/nmea.rs
//! NMEA sentence parsing into location fixes

use super::fix::LocationFix;
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};

const KNOTS_TO_MPS: f64 = 1852.0 / 3600.0;

/// Parse a single NMEA sentence into a location fix.
///
/// Only position-bearing sentences (`RMC`, `GGA`) produce a fix. Sentences
/// with a bad checksum, a void status or no position are ignored.
pub fn parse_nmea_sentence(line: &str) -> Option<LocationFix> {
    let line = line.trim();
    if !checksum_ok(line) {
        return None;
    }

    let body = line.split('*').next().unwrap_or(line);
    let parts: Vec<&str> = body.split(',').collect();

    let talker = parts.first()?;
    if talker.len() != 6 || !talker.is_ascii() || !talker.starts_with('$') {
        return None;
    }

    match &talker[3..] {
        "RMC" => parse_rmc(&parts),
        "GGA" => parse_gga(&parts),
        _ => None,
    }
}

/// Parse RMC (Recommended Minimum Course) sentence
fn parse_rmc(parts: &[&str]) -> Option<LocationFix> {
    if parts.len() < 10 {
        return None;
    }

    // Status (field 2): A = valid, V = void
    if parts[2] != "A" {
        return None;
    }

    let latitude = parse_angle(parts[3], parts[4], "S")?;
    let longitude = parse_angle(parts[5], parts[6], "W")?;

    // Speed over ground in knots (field 7)
    let speed_mps = parts[7]
        .parse::<f64>()
        .ok()
        .map(|knots| knots * KNOTS_TO_MPS);

    let timestamp = parse_time(parts[1])
        .and_then(|time| parse_date(parts[9]).map(|date| date.and_time(time)))
        .map(|naive| Utc.from_utc_datetime(&naive))
        .unwrap_or_else(Utc::now);

    Some(LocationFix {
        latitude,
        longitude,
        speed_mps,
        timestamp,
    })
}

/// Parse GGA (Global Positioning System Fix Data) sentence
fn parse_gga(parts: &[&str]) -> Option<LocationFix> {
    if parts.len() < 10 {
        return None;
    }

    // Fix quality (field 6): 0 = no fix
    match parts[6].parse::<u8>() {
        Ok(quality) if quality > 0 => {}
        _ => return None,
    }

    let latitude = parse_angle(parts[2], parts[3], "S")?;
    let longitude = parse_angle(parts[4], parts[5], "W")?;

    // GGA carries no date; pin the time of day to the nearest UTC date
    let timestamp = parse_time(parts[1])
        .map(|time| nearest_at(time, Utc::now()))
        .unwrap_or_else(Utc::now);

    Some(LocationFix {
        latitude,
        longitude,
        speed_mps: None,
        timestamp,
    })
}

/// Convert `ddmm.mmmm` / `dddmm.mmmm` plus hemisphere into signed degrees
fn parse_angle(value: &str, hemisphere: &str, negative: &str) -> Option<f64> {
    if value.is_empty() || hemisphere.is_empty() {
        return None;
    }
    let raw = value.parse::<f64>().ok()?;
    let degrees = (raw / 100.0) as i32;
    let minutes = raw % 100.0;
    let angle = degrees as f64 + minutes / 60.0;
    Some(if hemisphere == negative { -angle } else { angle })
}

fn parse_time(value: &str) -> Option<NaiveTime> {
    if value.len() < 6 || !value.is_ascii() {
        return None;
    }
    let hour = value[0..2].parse().ok()?;
    let minute = value[2..4].parse().ok()?;
    let seconds: f64 = value[4..].parse().ok()?;
    let millis = ((seconds.fract()) * 1000.0).round() as u32;
    NaiveTime::from_hms_milli_opt(hour, minute, seconds.trunc() as u32, millis)
}

fn parse_date(value: &str) -> Option<NaiveDate> {
    if value.len() != 6 || !value.is_ascii() {
        return None;
    }
    let day = value[0..2].parse().ok()?;
    let month = value[2..4].parse().ok()?;
    let yy: i32 = value[4..6].parse().ok()?;
    let year = if yy >= 80 { 1900 + yy } else { 2000 + yy };
    NaiveDate::from_ymd_opt(year, month, day)
}

/// The instant with time of day `time` closest to `now`, so a receiver
/// just either side of UTC midnight lands on the right date
fn nearest_at(time: NaiveTime, now: DateTime<Utc>) -> DateTime<Utc> {
    let candidate = Utc.from_utc_datetime(&now.date_naive().and_time(time));
    let offset = candidate.signed_duration_since(now);
    if offset > Duration::hours(12) {
        candidate - Duration::days(1)
    } else if offset < -Duration::hours(12) {
        candidate + Duration::days(1)
    } else {
        candidate
    }
}

/// Verify the `*HH` checksum when one is present
fn checksum_ok(line: &str) -> bool {
    let Some(body) = line.strip_prefix('$') else {
        return false;
    };
    match body.split_once('*') {
        Some((payload, checksum)) => {
            let expected = match u8::from_str_radix(checksum.trim(), 16) {
                Ok(value) => value,
                Err(_) => return false,
            };
            payload.bytes().fold(0u8, |acc, b| acc ^ b) == expected
        }
        None => true,
    }
}
