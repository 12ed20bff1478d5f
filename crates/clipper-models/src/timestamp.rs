//! Timestamp parsing for trim requests.
//!
//! Trim offsets may be sent either as plain seconds or as clock strings
//! (`HH:MM:SS`, `MM:SS`, `SS`, each with optional `.mmm`).

use thiserror::Error;

/// Maximum accepted offset (24 hours in seconds).
pub const MAX_OFFSET_SECS: f64 = 86400.0;

/// Timestamp parsing error.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TimestampError {
    #[error("timestamp cannot be empty")]
    Empty,

    #[error("timestamp cannot be negative")]
    Negative,

    #[error("invalid {0} value: {1}")]
    InvalidValue(&'static str, String),

    #[error("invalid timestamp format '{0}', use HH:MM:SS, MM:SS or SS (optionally with .mmm)")]
    InvalidFormat(String),

    #[error("timestamp exceeds maximum allowed offset ({0} seconds)")]
    ExceedsMax(f64),
}

/// Parse a timestamp string to total seconds.
///
/// # Examples
/// ```
/// use clipper_models::timestamp::parse_timestamp;
/// assert_eq!(parse_timestamp("01:30:00").unwrap(), 5400.0);
/// assert_eq!(parse_timestamp("05:30").unwrap(), 330.0);
/// assert_eq!(parse_timestamp("90").unwrap(), 90.0);
/// ```
pub fn parse_timestamp(ts: &str) -> Result<f64, TimestampError> {
    let ts = ts.trim();
    if ts.is_empty() {
        return Err(TimestampError::Empty);
    }

    let parts: Vec<&str> = ts.split(':').collect();
    if parts.len() > 3 {
        return Err(TimestampError::InvalidFormat(ts.to_string()));
    }

    const UNITS: [(&str, f64); 3] = [("seconds", 1.0), ("minutes", 60.0), ("hours", 3600.0)];

    let mut total = 0.0;
    for (part, (unit, scale)) in parts.iter().rev().zip(UNITS.iter()) {
        let value: f64 = part
            .parse()
            .map_err(|_| TimestampError::InvalidValue(unit, part.to_string()))?;
        if !value.is_finite() {
            return Err(TimestampError::InvalidValue(unit, part.to_string()));
        }
        if value < 0.0 {
            return Err(TimestampError::Negative);
        }
        total += value * scale;
    }

    if total > MAX_OFFSET_SECS {
        return Err(TimestampError::ExceedsMax(MAX_OFFSET_SECS));
    }

    Ok(total)
}

/// Format seconds into HH:MM:SS or HH:MM:SS.mmm.
pub fn format_seconds(total_secs: f64) -> String {
    let hours = (total_secs / 3600.0).floor() as u32;
    let mins = ((total_secs % 3600.0) / 60.0).floor() as u32;
    let secs = total_secs % 60.0;

    if (secs - secs.floor()).abs() > 0.0001 {
        format!("{:02}:{:02}:{:06.3}", hours, mins, secs)
    } else {
        format!("{:02}:{:02}:{:02}", hours, mins, secs.floor() as u32)
    }
}
