// rules-engine-core/src/point.rs
// ============================================================================
// Module: Point Model
// Description: Typed telemetry record with tags, quality, and composite payloads.
// Purpose: The single unit of data the rules engine evaluates rules against.
// Dependencies: serde::{Deserialize, Serialize}, std::collections::HashMap
// ============================================================================

//! ## Overview
//! A [`Point`] is one telemetry observation from a southbound adapter: a
//! scalar or composite value, tagged and timestamped. Composite payloads are
//! modeled as a capability-bearing enum (each variant exposes
//! [`CompositeData::derived_values`]) rather than as dynamic dispatch over a
//! loosely typed map, so the condition evaluator's field accessor can resolve
//! `<composite-subfield>` paths without reflection.
//!
//! `timestamp` is monotonic per `(device_id, key)` within one production
//! session but may regress across sessions (e.g. after an adapter restart);
//! callers must not rely on global monotonicity.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::HashMap;

use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Data Type Tag
// ============================================================================

/// The declared type of a [`Point`]'s value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    /// 64-bit signed integer.
    Int,
    /// IEEE-754 double.
    Float,
    /// Boolean.
    Bool,
    /// UTF-8 string.
    String,
    /// One of the [`CompositeData`] variants.
    Composite,
}

// ============================================================================
// SECTION: Scalar Value
// ============================================================================

/// A scalar telemetry value.
///
/// Numeric comparison and coercion rules live in [`crate::value`]; this type
/// only carries the tagged representation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScalarValue {
    /// Integer reading.
    Int(i64),
    /// Floating-point reading.
    Float(f64),
    /// Boolean reading.
    Bool(bool),
    /// String reading.
    String(String),
}

// ============================================================================
// SECTION: Composite Payloads
// ============================================================================

/// A geographic fix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Location {
    /// Latitude in degrees.
    pub latitude: f64,
    /// Longitude in degrees.
    pub longitude: f64,
    /// Altitude in meters, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub altitude: Option<f64>,
    /// Horizontal accuracy in meters, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,
    /// Ground speed in meters/second, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
    /// Heading in degrees from true north, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heading: Option<f64>,
}

/// A 3-D vector (e.g. accelerometer or gyroscope reading).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Vector3D {
    /// X component.
    pub x: f64,
    /// Y component.
    pub y: f64,
    /// Z component.
    pub z: f64,
}

impl Vector3D {
    /// Euclidean magnitude of this vector.
    #[must_use]
    pub fn magnitude(&self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }
}

/// An RGBA color sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Color {
    /// Red channel, 0.0-1.0.
    pub r: f64,
    /// Green channel, 0.0-1.0.
    pub g: f64,
    /// Blue channel, 0.0-1.0.
    pub b: f64,
    /// Alpha channel, 0.0-1.0.
    #[serde(default = "Color::default_alpha")]
    pub a: f64,
}

impl Color {
    const fn default_alpha() -> f64 {
        1.0
    }

    /// Hue in degrees [0, 360).
    #[must_use]
    pub fn hue(&self) -> f64 {
        let (max, min) = self.max_min();
        let delta = max - min;
        if delta.abs() < f64::EPSILON {
            return 0.0;
        }
        let hue = if (max - self.r).abs() < f64::EPSILON {
            60.0 * (((self.g - self.b) / delta) % 6.0)
        } else if (max - self.g).abs() < f64::EPSILON {
            60.0 * (((self.b - self.r) / delta) + 2.0)
        } else {
            60.0 * (((self.r - self.g) / delta) + 4.0)
        };
        if hue < 0.0 {
            hue + 360.0
        } else {
            hue
        }
    }

    /// Lightness in [0, 1].
    #[must_use]
    pub fn lightness(&self) -> f64 {
        let (max, min) = self.max_min();
        (max + min) / 2.0
    }

    /// Saturation in [0, 1].
    #[must_use]
    pub fn saturation(&self) -> f64 {
        let (max, min) = self.max_min();
        let lightness = self.lightness();
        let delta = max - min;
        if delta.abs() < f64::EPSILON {
            return 0.0;
        }
        delta / (1.0 - (2.0f64.mul_add(lightness, -1.0)).abs())
    }

    fn max_min(&self) -> (f64, f64) {
        let max = self.r.max(self.g).max(self.b);
        let min = self.r.min(self.g).min(self.b);
        (max, min)
    }
}

/// A labeled, arbitrary-dimension numeric vector (e.g. a sensor array).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct GenericVector {
    /// Component values.
    pub values: Vec<f64>,
    /// Optional unit label (e.g. "m/s").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    /// Optional per-component labels.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,
}

impl GenericVector {
    /// Euclidean length of this vector.
    #[must_use]
    pub fn length(&self) -> f64 {
        self.values.iter().map(|v| v * v).sum::<f64>().sqrt()
    }

    /// Value at a labeled component, if present.
    #[must_use]
    pub fn by_label(&self, label: &str) -> Option<f64> {
        self.labels
            .iter()
            .position(|candidate| candidate == label)
            .and_then(|index| self.values.get(index).copied())
    }
}

/// One sample of a time series payload.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeSeriesSample {
    /// Seconds since the Unix epoch.
    pub timestamp: f64,
    /// Sample value.
    pub value: f64,
}

/// An ordered series of timestamped samples.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TimeSeries {
    /// Samples in chronological order.
    pub samples: Vec<TimeSeriesSample>,
    /// Optional unit label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

impl TimeSeries {
    /// Resolves a numeric index into the series, allowing negative indices
    /// to count backward from the end (`-1` is the last sample).
    #[must_use]
    pub fn sample_at(&self, index: i64) -> Option<TimeSeriesSample> {
        let len = i64::try_from(self.samples.len()).ok()?;
        let resolved = if index < 0 { len + index } else { index };
        usize::try_from(resolved)
            .ok()
            .and_then(|i| self.samples.get(i))
            .copied()
    }
}

/// A composite, multi-field telemetry payload.
///
/// Each variant is a capability-bearing leaf: [`CompositeData::derived_values`]
/// exposes the scalar subfields the condition evaluator's dotted-path field
/// accessor resolves, without reflecting over an untyped map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CompositeData {
    /// Geographic fix.
    Location(Location),
    /// 3-D vector.
    Vector3D(Vector3D),
    /// RGBA color.
    Color(Color),
    /// Arbitrary-dimension numeric vector.
    Vector(GenericVector),
    /// Plain numeric array (no labels/units).
    Array(Vec<f64>),
    /// Row-major numeric matrix.
    Matrix(Vec<Vec<f64>>),
    /// Timestamped sample series.
    TimeSeries(TimeSeries),
}

impl CompositeData {
    /// Resolves a derived scalar subfield by name.
    ///
    /// Field names match the condition evaluator's field accessor contract
    /// (`magnitude`, `hue`, row/col pairs like `0_1`, etc).
    #[must_use]
    #[allow(clippy::too_many_lines, reason = "one match arm per composite kind and subfield, kept flat rather than split across helpers")]
    pub fn derived_value(&self, field: &str) -> Option<f64> {
        match self {
            Self::Location(location) => match field {
                "latitude" => Some(location.latitude),
                "longitude" => Some(location.longitude),
                "altitude" => location.altitude,
                "accuracy" => location.accuracy,
                "speed" => location.speed,
                "heading" => location.heading,
                _ => None,
            },
            Self::Vector3D(vector) => match field {
                "x" => Some(vector.x),
                "y" => Some(vector.y),
                "z" => Some(vector.z),
                "magnitude" => Some(vector.magnitude()),
                _ => None,
            },
            Self::Color(color) => match field {
                "r" => Some(color.r),
                "g" => Some(color.g),
                "b" => Some(color.b),
                "a" => Some(color.a),
                "hue" => Some(color.hue()),
                "saturation" => Some(color.saturation()),
                "lightness" => Some(color.lightness()),
                _ => None,
            },
            Self::Vector(vector) => match field {
                "dimension" => Some(vector.values.len() as f64),
                "length" => Some(vector.length()),
                _ => field
                    .parse::<usize>()
                    .ok()
                    .and_then(|index| vector.values.get(index).copied())
                    .or_else(|| vector.by_label(field)),
            },
            Self::Array(values) => field
                .parse::<usize>()
                .ok()
                .and_then(|index| values.get(index).copied()),
            Self::Matrix(rows) => {
                let (row, col) = field.split_once('_')?;
                let row: usize = row.parse().ok()?;
                let col: usize = col.parse().ok()?;
                rows.get(row).and_then(|r| r.get(col)).copied()
            }
            Self::TimeSeries(series) => match field {
                "length" => Some(series.samples.len() as f64),
                "first_timestamp" => series.samples.first().map(|s| s.timestamp),
                "last_timestamp" => series.samples.last().map(|s| s.timestamp),
                "first_value" => series.samples.first().map(|s| s.value),
                "last_value" => series.samples.last().map(|s| s.value),
                _ => field
                    .parse::<i64>()
                    .ok()
                    .and_then(|index| series.sample_at(index))
                    .map(|sample| sample.value),
            },
        }
    }

    /// All named derived subfields this variant exposes, each with its
    /// current value. Used by diagnostics and by the `<composite>.*`
    /// wildcard field accessor.
    #[must_use]
    pub fn derived_values(&self) -> HashMap<String, f64> {
        let names: &[&str] = match self {
            Self::Location(_) => &["latitude", "longitude", "altitude", "accuracy", "speed", "heading"],
            Self::Vector3D(_) => &["x", "y", "z", "magnitude"],
            Self::Color(_) => &["r", "g", "b", "a", "hue", "saturation", "lightness"],
            Self::Vector(_) => &["dimension", "length"],
            Self::Array(_) | Self::Matrix(_) => &[],
            Self::TimeSeries(_) => &["length", "first_timestamp", "last_timestamp", "first_value", "last_value"],
        };
        names
            .iter()
            .filter_map(|&name| self.derived_value(name).map(|value| (name.to_string(), value)))
            .collect()
    }
}

// ============================================================================
// SECTION: Point
// ============================================================================

/// A single telemetry observation.
///
/// # Invariants
/// - `timestamp` is monotonic per `(device_id, key)` within one production
///   session; it may regress across sessions.
/// - `tags` is returned only by copy (see [`Point::get_tags_copy`]) so
///   concurrent readers never observe a torn map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Point {
    /// Identifier of the originating device.
    pub device_id: String,
    /// The telemetry key (e.g. `"temperature"`).
    pub key: String,
    /// The scalar value, present unless `composite` carries the payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<ScalarValue>,
    /// The declared type of this point's payload.
    #[serde(rename = "type")]
    pub data_type: DataType,
    /// Seconds since the Unix epoch.
    pub timestamp: f64,
    /// Vendor/adapter quality code; 0 conventionally means "good".
    #[serde(default)]
    pub quality: i32,
    /// Free-form tags, treated as copy-on-read.
    #[serde(default)]
    pub tags: HashMap<String, String>,
    /// Composite payload, present when `data_type == Composite`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub composite: Option<CompositeData>,
}

impl Point {
    /// Looks up a single tag value.
    #[must_use]
    pub fn get_tag(&self, name: &str) -> Option<&str> {
        self.tags.get(name).map(String::as_str)
    }

    /// Returns a defensive copy of all tags.
    ///
    /// Concurrent callers each get their own owned map; no aliasing with the
    /// point's internal storage is possible.
    #[must_use]
    pub fn get_tags_copy(&self) -> HashMap<String, String> {
        self.tags.clone()
    }
}
