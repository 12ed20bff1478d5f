//! Transformation operations.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;

use crate::timestamp::parse_timestamp;

/// Errors raised while turning a request into an [`Operation`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum OperationError {
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("Invalid operation: field `{field}` {reason}")]
    InvalidField { field: String, reason: String },
}

impl OperationError {
    pub fn invalid_field(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// A single parameterized video transformation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Operation {
    /// Cut `duration` seconds starting at `start`.
    Trim { start: f64, duration: f64 },
    /// Scale to an exact frame size.
    Resize { width: u32, height: u32 },
    /// Drop colour information.
    Grayscale,
    /// Re-mux/re-encode into another container format.
    FormatConvert { format: String },
    /// Remove the audio stream.
    AudioMute,
    /// Scale audio volume by `level` (1.0 = unchanged).
    AudioVolume { level: f64 },
}

impl Operation {
    /// Wire tag of the operation.
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Trim { .. } => "trim",
            Operation::Resize { .. } => "resize",
            Operation::Grayscale => "grayscale",
            Operation::FormatConvert { .. } => "format_convert",
            Operation::AudioMute => "audio_mute",
            Operation::AudioVolume { .. } => "audio_volume",
        }
    }

    /// Container extension the output must carry, if the operation changes it.
    pub fn output_extension(&self) -> Option<&str> {
        match self {
            Operation::FormatConvert { format } => Some(format.as_str()),
            _ => None,
        }
    }

    /// Build an operation from a request tag and its flattened parameters.
    ///
    /// Accepts the canonical snake_case tags plus the short aliases used by
    /// older clients (`format`, `mute`, `volume`). Numeric parameters may be
    /// JSON numbers or numeric strings; trim offsets also accept clock
    /// strings such as `00:01:30`.
    pub fn from_request(tag: &str, params: &Map<String, Value>) -> Result<Self, OperationError> {
        let normalized = tag.trim().to_ascii_lowercase().replace('-', "_");

        match normalized.as_str() {
            "trim" => Ok(Operation::Trim {
                start: seconds_field(params, "start")?.unwrap_or(0.0),
                duration: seconds_field(params, "duration")?
                    .ok_or_else(|| OperationError::invalid_field("duration", "is required"))?,
            }),
            "resize" => Ok(Operation::Resize {
                width: dimension_field(params, "width")?,
                height: dimension_field(params, "height")?,
            }),
            "grayscale" | "greyscale" => Ok(Operation::Grayscale),
            "format_convert" | "format" | "convert" => Ok(Operation::FormatConvert {
                format: string_field(params, "format")?,
            }),
            "audio_mute" | "mute" | "remove_audio" => Ok(Operation::AudioMute),
            "audio_volume" | "volume" => Ok(Operation::AudioVolume {
                level: number_field(params, "level")?
                    .ok_or_else(|| OperationError::invalid_field("level", "is required"))?,
            }),
            _ => Err(OperationError::Unsupported(tag.to_string())),
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Trim { start, duration } => write!(f, "trim({start}s+{duration}s)"),
            Operation::Resize { width, height } => write!(f, "resize({width}x{height})"),
            Operation::FormatConvert { format } => write!(f, "format_convert({format})"),
            Operation::AudioVolume { level } => write!(f, "audio_volume({level})"),
            other => f.write_str(other.name()),
        }
    }
}

fn number_field(params: &Map<String, Value>, field: &str) -> Result<Option<f64>, OperationError> {
    match params.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_f64()
            .map(Some)
            .ok_or_else(|| OperationError::invalid_field(field, "must be a number")),
        Some(Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .map(Some)
            .map_err(|_| OperationError::invalid_field(field, "must be a number")),
        Some(_) => Err(OperationError::invalid_field(field, "must be a number")),
    }
}

fn seconds_field(params: &Map<String, Value>, field: &str) -> Result<Option<f64>, OperationError> {
    match params.get(field) {
        Some(Value::String(s)) => parse_timestamp(s)
            .map(Some)
            .map_err(|e| OperationError::invalid_field(field, e.to_string())),
        _ => number_field(params, field),
    }
}

fn dimension_field(params: &Map<String, Value>, field: &str) -> Result<u32, OperationError> {
    let value = match params.get(field) {
        None | Some(Value::Null) => return Err(OperationError::invalid_field(field, "is required")),
        Some(Value::Number(n)) => n.as_i64(),
        Some(Value::String(s)) => s.trim().parse::<i64>().ok(),
        Some(_) => None,
    }
    .ok_or_else(|| OperationError::invalid_field(field, "must be an integer"))?;

    if value <= 0 {
        return Err(OperationError::invalid_field(field, "must be greater than 0"));
    }
    u32::try_from(value).map_err(|_| OperationError::invalid_field(field, "is too large"))
}

fn string_field(params: &Map<String, Value>, field: &str) -> Result<String, OperationError> {
    match params.get(field) {
        Some(Value::String(s)) => Ok(s.trim().to_string()),
        None | Some(Value::Null) => Err(OperationError::invalid_field(field, "is required")),
        Some(_) => Err(OperationError::invalid_field(field, "must be a string")),
    }
}

/// Target frame size for fluent render options.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ResizeOptions {
    pub width: u32,
    pub height: u32,
}

/// Audio handling for fluent render options.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AudioOptions {
    /// Drop the audio stream entirely. Takes precedence over `volume`.
    #[serde(default)]
    pub remove: bool,
    /// Volume multiplier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<f64>,
}

/// Option set for a render job.
///
/// Unlike [`Operation`], several options can be combined in one pass. They
/// are always applied in the order scale, format, audio mode, audio volume.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TransformOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resize: Option<ResizeOptions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio: Option<AudioOptions>,
}

impl TransformOptions {
    /// Container extension the output must carry, if a format is requested.
    pub fn output_extension(&self) -> Option<&str> {
        self.format.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn test_from_request_trim() {
        let op = Operation::from_request("trim", &params(json!({"start": 0, "duration": 2}))).unwrap();
        assert_eq!(op, Operation::Trim { start: 0.0, duration: 2.0 });

        let op = Operation::from_request("trim", &params(json!({"start": "00:01:00", "duration": "2.5"})))
            .unwrap();
        assert_eq!(op, Operation::Trim { start: 60.0, duration: 2.5 });
    }

    #[test]
    fn test_from_request_trim_requires_duration() {
        let err = Operation::from_request("trim", &params(json!({"start": 1}))).unwrap_err();
        assert!(matches!(err, OperationError::InvalidField { ref field, .. } if field == "duration"));
    }

    #[test]
    fn test_from_request_resize() {
        let op = Operation::from_request("resize", &params(json!({"width": "640", "height": 360}))).unwrap();
        assert_eq!(op, Operation::Resize { width: 640, height: 360 });

        let err = Operation::from_request("resize", &params(json!({"width": -1, "height": 360}))).unwrap_err();
        assert!(matches!(err, OperationError::InvalidField { ref field, .. } if field == "width"));

        let err = Operation::from_request("resize", &params(json!({"width": 1.5, "height": 360}))).unwrap_err();
        assert!(matches!(err, OperationError::InvalidField { ref field, .. } if field == "width"));
    }

    #[test]
    fn test_from_request_aliases() {
        let empty = Map::new();
        assert_eq!(Operation::from_request("Grayscale", &empty).unwrap(), Operation::Grayscale);
        assert_eq!(Operation::from_request("audio-mute", &empty).unwrap(), Operation::AudioMute);
        assert_eq!(
            Operation::from_request("format", &params(json!({"format": "webm"}))).unwrap(),
            Operation::FormatConvert { format: "webm".to_string() }
        );
        assert_eq!(
            Operation::from_request("volume", &params(json!({"level": 0.5}))).unwrap(),
            Operation::AudioVolume { level: 0.5 }
        );
    }

    #[test]
    fn test_from_request_unsupported() {
        let err = Operation::from_request("unsupported-op", &Map::new()).unwrap_err();
        assert_eq!(err, OperationError::Unsupported("unsupported-op".to_string()));
    }

    #[test]
    fn test_operation_wire_format() {
        let op = Operation::Resize { width: 1280, height: 720 };
        let json = serde_json::to_value(&op).unwrap();
        assert_eq!(json, json!({"type": "resize", "width": 1280, "height": 720}));

        let decoded: Operation = serde_json::from_value(json!({"type": "audio_mute"})).unwrap();
        assert_eq!(decoded, Operation::AudioMute);
    }

    #[test]
    fn test_output_extension() {
        assert_eq!(
            Operation::FormatConvert { format: "mkv".to_string() }.output_extension(),
            Some("mkv")
        );
        assert_eq!(Operation::Grayscale.output_extension(), None);
    }
}
