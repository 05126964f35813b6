use crate::{ArcStr, PatientId};
use chrono::{NaiveDate, NaiveDateTime};
use serde::{de, Deserialize, Deserializer, Serializer};
use std::{fs, io, path::Path};

/// Converts a not found error to Ok(false)
pub fn path_exists(path: &Path) -> io::Result<bool> {
    match fs::metadata(path) {
        Ok(_) => Ok(true),
        Err(e) if matches!(e.kind(), io::ErrorKind::NotFound) => Ok(false),
        Err(e) => Err(e),
    }
}

// Helpers for serde to parse fields with quirks.

/// True for the values the extracts use to mean "nothing here".
fn is_missing(s: &str) -> bool {
    s.is_empty() || s.eq_ignore_ascii_case("null") || s.eq_ignore_ascii_case("nan")
}

/// Parse a string, but map "null" and "nan" to `None` (in addition to the default "" -> None
/// mapping)
pub fn optional_string<'de, D>(d: D) -> Result<Option<ArcStr>, D::Error>
where
    D: Deserializer<'de>,
{
    let s: Option<String> = Deserialize::deserialize(d)?;
    Ok(s.and_then(|s| {
        let s = s.trim();
        if is_missing(s) {
            None
        } else {
            Some(s.into())
        }
    }))
}

/// Parse an integer that might have been written out as a float (`"31.0"`).
///
/// Used for the numeric categorical columns (province, membership segment, flags). Anything that
/// isn't a whole number is treated as missing.
pub fn parse_whole(s: &str) -> Option<i64> {
    let s = s.trim();
    if is_missing(s) {
        return None;
    }
    if let Ok(v) = s.parse::<i64>() {
        return Some(v);
    }
    let v = s.parse::<f64>().ok()?;
    if v.is_finite() && v == v.trunc() {
        Some(v as i64)
    } else {
        None
    }
}

/// Lenient whole number, see `parse_whole`.
pub fn opt_whole<'de, D>(d: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let s: Option<String> = Deserialize::deserialize(d)?;
    Ok(s.as_deref().and_then(parse_whole))
}

/// Parse a patient key.
///
/// Keys are whole numbers, but statistical exports sometimes write them as floats. Empty cells
/// are `None`. Anything else is an error: a corrupt key would silently detach visits from their
/// patient.
pub fn parse_patient_id(s: &str) -> Result<Option<PatientId>, String> {
    let s = s.trim();
    if is_missing(s) {
        return Ok(None);
    }
    match parse_whole(s) {
        Some(v) if v >= 0 => Ok(Some(v as PatientId)),
        _ => Err(format!("invalid patient key \"{}\"", s)),
    }
}

pub fn opt_patient_id<'de, D>(d: D) -> Result<Option<PatientId>, D::Error>
where
    D: Deserializer<'de>,
{
    let s: Option<String> = Deserialize::deserialize(d)?;
    match s {
        Some(s) => parse_patient_id(&s).map_err(de::Error::custom),
        None => Ok(None),
    }
}

/// Visit keys are matched as text, with a trailing `.0` from float exports stripped.
pub fn opt_visit_key<'de, D>(d: D) -> Result<Option<ArcStr>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(optional_string(d)?.map(|s| match s.strip_suffix(".0") {
        Some(stripped) if !stripped.is_empty() && stripped.bytes().all(|b| b.is_ascii_digit()) => {
            stripped.into()
        }
        _ => s,
    }))
}

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d/%m/%Y", "%Y/%m/%d", "%d-%m-%Y"];
const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%d/%m/%Y %H:%M:%S",
];

/// Parse a date in any of the formats seen in the extracts, ignoring any time part.
///
/// Returns `None` for anything we can't make sense of.
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    if is_missing(s) {
        return None;
    }
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
        .or_else(|| {
            DATETIME_FORMATS
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
                .map(|dt| dt.date())
        })
}

/// A date that may be missing or garbled. Garbled dates are treated as missing.
pub fn opt_date<'de, D>(d: D) -> Result<Option<NaiveDate>, D::Error>
where
    D: Deserializer<'de>,
{
    let s: Option<String> = Deserialize::deserialize(d)?;
    Ok(s.as_deref().and_then(parse_date))
}

/// Write an optional date as ISO `YYYY-MM-DD`, or an empty cell.
pub fn ser_opt_date<S>(date: &Option<NaiveDate>, s: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match date {
        Some(date) => s.collect_str(&date.format("%Y-%m-%d")),
        None => s.serialize_str(""),
    }
}

pub fn header(header: &str) {
    let len = header.len();
    print!("\n{}\n", header);
    for _ in 0..len {
        print!("=");
    }
    println!("\n")
}

/// `part / total` as a percentage, rounded to 1 decimal place. `None` for an empty total.
pub fn percent(part: usize, total: usize) -> Option<f64> {
    if total == 0 {
        None
    } else {
        Some(round_to(part as f64 / total as f64 * 100., 1))
    }
}

pub fn round_to(v: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (v * factor).round() / factor
}
