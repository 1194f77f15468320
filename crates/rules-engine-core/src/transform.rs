// rules-engine-core/src/transform.rs
// ============================================================================
// Module: Transform Handler
// Description: Pure, deterministic value transforms plus post-processing.
// Purpose: scale/offset/unit_convert/format/expression/lookup/round/clamp/map.
// Dependencies: crate::condition::expression::ExpressionParser, crate::value
// ============================================================================

//! ## Overview
//! Every transform kind is a pure function of the input value; none read or
//! write engine state. [`apply`] performs the transform itself; the
//! post-processing order (transform, then optional precision rounding, then
//! optional type conversion, then `output_key`, then the `timestamp=now`
//! stamp) lives in [`apply`].

use std::collections::HashMap;

use serde::Deserialize;
use serde::Serialize;

use crate::clock::Clock;
use crate::condition::expression::ExpressionParser;
use crate::error::ConfigError;
use crate::error::ValueCoercionError;
use crate::point::Point;
use crate::point::ScalarValue;
use crate::value;

/// Temperature/length/weight unit families supported by `unit_convert`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Unit {
    /// Celsius.
    C,
    /// Fahrenheit.
    F,
    /// Kelvin.
    K,
    /// Millimeters.
    Mm,
    /// Centimeters.
    Cm,
    /// Meters.
    M,
    /// Kilometers.
    Km,
    /// Inches.
    In,
    /// Feet.
    Ft,
    /// Milligrams.
    Mg,
    /// Grams.
    G,
    /// Kilograms.
    Kg,
    /// Ounces.
    Oz,
    /// Pounds.
    Lb,
}

impl Unit {
    /// Converts `value` from `self` to `target`, round-tripping through a
    /// canonical unit for the family (Celsius, meters, grams).
    ///
    /// # Errors
    ///
    /// Returns [`ValueCoercionError::Incompatible`] when `self` and `target`
    /// belong to different unit families.
    pub fn convert(self, value: f64, target: Self) -> Result<f64, ValueCoercionError> {
        let canonical = self.to_canonical(value).ok_or_else(|| incompatible(self, target))?;
        target.from_canonical(canonical).ok_or_else(|| incompatible(self, target))
    }

    fn family(self) -> &'static str {
        match self {
            Self::C | Self::F | Self::K => "temperature",
            Self::Mm | Self::Cm | Self::M | Self::Km | Self::In | Self::Ft => "length",
            Self::Mg | Self::G | Self::Kg | Self::Oz | Self::Lb => "weight",
        }
    }

    fn to_canonical(self, value: f64) -> Option<f64> {
        Some(match self {
            Self::C => value,
            Self::F => (value - 32.0) * 5.0 / 9.0,
            Self::K => value - 273.15,
            Self::Mm => value / 1000.0,
            Self::Cm => value / 100.0,
            Self::M => value,
            Self::Km => value * 1000.0,
            Self::In => value * 0.0254,
            Self::Ft => value * 0.3048,
            Self::Mg => value / 1_000_000.0,
            Self::G => value / 1000.0,
            Self::Kg => value,
            Self::Oz => value * 0.028_349_523_125,
            Self::Lb => value * 0.453_592_37,
        })
    }

    fn from_canonical(self, canonical: f64) -> Option<f64> {
        Some(match self {
            Self::C => canonical,
            Self::F => canonical * 9.0 / 5.0 + 32.0,
            Self::K => canonical + 273.15,
            Self::Mm => canonical * 1000.0,
            Self::Cm => canonical * 100.0,
            Self::M => canonical,
            Self::Km => canonical / 1000.0,
            Self::In => canonical / 0.0254,
            Self::Ft => canonical / 0.3048,
            Self::Mg => canonical * 1_000_000.0,
            Self::G => canonical * 1000.0,
            Self::Kg => canonical,
            Self::Oz => canonical / 0.028_349_523_125,
            Self::Lb => canonical / 0.453_592_37,
        })
    }
}

fn incompatible(from: Unit, to: Unit) -> ValueCoercionError {
    ValueCoercionError::Incompatible {
        from: format!("{:?} ({})", from, from.family()),
        to: format!("{:?} ({})", to, to.family()),
    }
}

/// The wire-visible `transform` parameters for one transform kind.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransformKind {
    /// `v * factor`.
    Scale {
        /// Multiplicative factor.
        factor: f64,
    },
    /// `v + offset`.
    Offset {
        /// Additive offset.
        offset: f64,
    },
    /// Unit conversion within a family.
    UnitConvert {
        /// Source unit.
        from: Unit,
        /// Target unit.
        to: Unit,
    },
    /// Printf-style format string (`{value}` substituted).
    Format {
        /// Format template; `{value}` is replaced with the formatted input.
        template: String,
    },
    /// Arithmetic parser with variable `x` bound to the input value.
    Expression {
        /// Expression text using `x` as the input variable.
        expression: String,
    },
    /// Stringified value → replacement; `default` used when absent, else error.
    Lookup {
        /// Replacement table.
        table: HashMap<String, ScalarValue>,
        /// Fallback key when the input isn't in `table`.
        #[serde(default)]
        default: Option<String>,
    },
    /// Half-away-from-zero rounding to `decimals` places.
    Round {
        /// Number of decimal places.
        decimals: i32,
    },
    /// Clamp to `[min, max]`.
    Clamp {
        /// Inclusive lower bound.
        min: f64,
        /// Inclusive upper bound.
        max: f64,
    },
    /// Stringified value → replacement; original value returned when absent.
    Map {
        /// Replacement table.
        table: HashMap<String, ScalarValue>,
    },
}

/// How a transform error is handled when applying an action's `error_action`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ErrorAction {
    /// Propagate the error (`ActionResult.success = false`).
    #[default]
    Error,
    /// Pass the original point through unchanged.
    Ignore,
    /// Substitute `default_value`.
    Default,
}

/// Requested output-type coercion, applied after precision rounding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputType {
    /// Coerce to `String`.
    String,
    /// Coerce to `Int`.
    Int,
    /// Coerce to `Float`.
    Float,
    /// Coerce to `Bool`.
    Bool,
}

/// Full `transform` action configuration, including post-processing.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TransformConfig {
    /// The transform to apply.
    #[serde(flatten)]
    pub kind: TransformKind,
    /// Overwrites `point.key` with this value when set.
    #[serde(default)]
    pub output_key: Option<String>,
    /// Coerces the result to this type after precision rounding.
    #[serde(default)]
    pub output_type: Option<OutputType>,
    /// Decimal places for post-transform rounding.
    #[serde(default)]
    pub precision: Option<i32>,
    /// What to do when the transform itself fails.
    #[serde(default)]
    pub error_action: ErrorAction,
    /// Substituted value when `error_action == Default`.
    #[serde(default)]
    pub default_value: Option<ScalarValue>,
}

/// Half-away-from-zero rounding (not banker's rounding) to `decimals` places.
#[must_use]
pub fn round_half_away_from_zero(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

fn apply_kind(kind: &TransformKind, value: &ScalarValue) -> Result<ScalarValue, ValueCoercionError> {
    match kind {
        TransformKind::Scale { factor } => numeric_result(value, |v| v * factor),
        TransformKind::Offset { offset } => numeric_result(value, |v| v + offset),
        TransformKind::UnitConvert { from, to } => {
            let numeric = require_numeric(value)?;
            from.convert(numeric, *to).map(ScalarValue::Float)
        }
        TransformKind::Format { template } => Ok(ScalarValue::String(template.replace("{value}", &value::as_string(value)))),
        TransformKind::Expression { expression } => {
            let numeric = require_numeric(value)?;
            let mut variables = HashMap::new();
            variables.insert("x".to_string(), numeric);
            let result = ExpressionParser::new(expression)
                .evaluate_numeric(&variables)
                .map_err(|err| ValueCoercionError::Incompatible {
                    from: "expression".to_string(),
                    to: err.to_string(),
                })?;
            Ok(ScalarValue::Float(result))
        }
        TransformKind::Lookup { table, default } => {
            let key = value::as_string(value);
            table.get(&key).cloned().map_or_else(
                || {
                    default
                        .as_ref()
                        .and_then(|default_key| table.get(default_key).cloned())
                        .ok_or_else(|| ValueCoercionError::Incompatible {
                            from: key.clone(),
                            to: "lookup table entry".to_string(),
                        })
                },
                Ok,
            )
        }
        TransformKind::Round { decimals } => numeric_result(value, |v| round_half_away_from_zero(v, *decimals)),
        TransformKind::Clamp { min, max } => numeric_result(value, |v| v.clamp(*min, *max)),
        TransformKind::Map { table } => {
            let key = value::as_string(value);
            Ok(table.get(&key).cloned().unwrap_or_else(|| value.clone()))
        }
    }
}

fn require_numeric(value: &ScalarValue) -> Result<f64, ValueCoercionError> {
    value::as_numeric(value).ok_or_else(|| ValueCoercionError::Incompatible {
        from: value::as_string(value),
        to: "numeric".to_string(),
    })
}

fn numeric_result(value: &ScalarValue, f: impl FnOnce(f64) -> f64) -> Result<ScalarValue, ValueCoercionError> {
    require_numeric(value).map(|numeric| ScalarValue::Float(f(numeric)))
}

fn coerce_output_type(value: ScalarValue, output_type: OutputType) -> ScalarValue {
    match output_type {
        OutputType::String => ScalarValue::String(value::as_string(&value)),
        OutputType::Bool => ScalarValue::Bool(value::as_bool(&value)),
        OutputType::Int => ScalarValue::Int(value::as_numeric(&value).unwrap_or(0.0) as i64),
        OutputType::Float => ScalarValue::Float(value::as_numeric(&value).unwrap_or(0.0)),
    }
}

/// Applies `config` to `point`, implementing the full post-processing
/// order: transform, optional precision rounding, optional type coercion,
/// `output_key` overwrite, then `timestamp = now`.
///
/// # Errors
///
/// Returns [`ConfigError`] when `error_action == Error` (the default) and the
/// transform itself fails; with `Ignore`, the original point is returned
/// unchanged; with `Default`, `default_value` is substituted.
pub fn apply(config: &TransformConfig, point: &Point, clock: &dyn Clock) -> Result<Point, ConfigError> {
    let Some(input) = point.value.clone() else {
        return Err(ConfigError::InvalidValue {
            key: "value".to_string(),
            message: "transform requires a scalar point value".to_string(),
        });
    };

    let transformed = match apply_kind(&config.kind, &input) {
        Ok(value) => value,
        Err(err) => match config.error_action {
            ErrorAction::Error => {
                return Err(ConfigError::InvalidValue {
                    key: "transform".to_string(),
                    message: err.to_string(),
                })
            }
            ErrorAction::Ignore => return Ok(point.clone()),
            ErrorAction::Default => config.default_value.clone().ok_or_else(|| ConfigError::MissingKey {
                key: "default_value".to_string(),
            })?,
        },
    };

    let rounded = if let Some(decimals) = config.precision {
        value::as_numeric(&transformed).map_or(transformed, |numeric| ScalarValue::Float(round_half_away_from_zero(numeric, decimals)))
    } else {
        transformed
    };

    let typed = config.output_type.map_or(rounded.clone(), |output_type| coerce_output_type(rounded, output_type));

    let mut output = point.clone();
    output.value = Some(typed);
    if let Some(output_key) = &config.output_key {
        output.key = output_key.clone();
    }
    output.timestamp = clock.now_unix_secs();
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::point::DataType;
    use std::collections::HashMap as Map;

    fn point(value: f64) -> Point {
        Point {
            device_id: "d1".to_string(),
            key: "t".to_string(),
            value: Some(ScalarValue::Float(value)),
            data_type: DataType::Float,
            timestamp: 0.0,
            quality: 0,
            tags: Map::new(),
            composite: None,
        }
    }

    #[test]
    fn clamp_then_round_matches_end_to_end_scenario() {
        let config = TransformConfig {
            kind: TransformKind::Clamp { min: 0.0, max: 3.0 },
            output_key: Some("t_clamped".to_string()),
            output_type: None,
            precision: Some(2),
            error_action: ErrorAction::Error,
            default_value: None,
        };
        let result = apply(&config, &point(3.14159), &SystemClock).expect("valid transform");
        assert_eq!(result.value, Some(ScalarValue::Float(3.0)));
        assert_eq!(result.key, "t_clamped");
    }

    #[test]
    fn clamp_floors_negative_to_minimum() {
        let config = TransformConfig {
            kind: TransformKind::Clamp { min: 0.0, max: 3.0 },
            output_key: None,
            output_type: None,
            precision: None,
            error_action: ErrorAction::Error,
            default_value: None,
        };
        let result = apply(&config, &point(-1.0), &SystemClock).expect("valid transform");
        assert_eq!(result.value, Some(ScalarValue::Float(0.0)));
    }

    #[test]
    fn temperature_round_trip_is_stable_within_tolerance() {
        let celsius = 21.5;
        let to_fahrenheit = Unit::C.convert(celsius, Unit::F).expect("valid conversion");
        let back_to_celsius = Unit::F.convert(to_fahrenheit, Unit::C).expect("valid conversion");
        assert!((celsius - back_to_celsius).abs() < 1e-6);
    }

    #[test]
    fn length_round_trip_is_stable_within_tolerance() {
        let meters = 12.34;
        let to_feet = Unit::M.convert(meters, Unit::Ft).expect("valid conversion");
        let back_to_meters = Unit::Ft.convert(to_feet, Unit::M).expect("valid conversion");
        assert!((meters - back_to_meters).abs() < 1e-6);
    }

    #[test]
    fn weight_round_trip_is_stable_within_tolerance() {
        let kilograms = 7.5;
        let to_pounds = Unit::Kg.convert(kilograms, Unit::Lb).expect("valid conversion");
        let back_to_kilograms = Unit::Lb.convert(to_pounds, Unit::Kg).expect("valid conversion");
        assert!((kilograms - back_to_kilograms).abs() < 1e-6);
    }

    #[test]
    fn incompatible_unit_families_are_rejected() {
        assert!(Unit::C.convert(10.0, Unit::Kg).is_err());
    }

    #[test]
    fn lookup_falls_back_to_default_entry() {
        let mut table = Map::new();
        table.insert("on".to_string(), ScalarValue::Bool(true));
        table.insert("unknown".to_string(), ScalarValue::Bool(false));
        let kind = TransformKind::Lookup { table, default: Some("unknown".to_string()) };
        let result = apply_kind(&kind, &ScalarValue::String("off".to_string())).expect("default entry exists");
        assert_eq!(result, ScalarValue::Bool(false));
    }

    #[test]
    fn map_passes_through_when_key_absent() {
        let kind = TransformKind::Map { table: Map::new() };
        let result = apply_kind(&kind, &ScalarValue::String("anything".to_string())).expect("map never fails");
        assert_eq!(result, ScalarValue::String("anything".to_string()));
    }
}
