//! Action and observation spaces and their wire descriptions.

use rand::Rng;
use serde::Serialize;
use serde_json::{Value, json};

use super::EngineError;

/// Magnitude substituted for infinite bounds on the wire.
pub const WIRE_INFINITY: f64 = 1e100;

/// Engine-side description of an action or observation domain.
///
/// Bounds are kept exactly as the engine reports them, infinities included.
/// Use [`Space::describe`] to obtain a JSON-safe rendition.
#[derive(Debug, Clone, PartialEq)]
pub enum Space {
    /// Integers in `0..n`.
    Discrete {
        /// Number of distinct values.
        n: u64,
    },
    /// Real-valued tensor with element-wise bounds (flattened, row-major).
    Box {
        /// Tensor shape.
        shape: Vec<usize>,
        /// Lower bound per element.
        low: Vec<f64>,
        /// Upper bound per element.
        high: Vec<f64>,
    },
    /// Vector of independent integer ranges `low[i]..=high[i]`.
    MultiDiscrete {
        /// Number of components.
        n: usize,
        /// Lower bound per component.
        low: Vec<f64>,
        /// Upper bound per component.
        high: Vec<f64>,
    },
    /// Legacy matrix of `[n, low, high]` rows.
    HighLow {
        /// Number of rows in the matrix.
        num_rows: usize,
        /// Matrix contents, flattened row-major.
        matrix: Vec<f64>,
    },
}

/// JSON-safe description of a [`Space`].
///
/// Serialises with a `name` tag, for example
/// `{"name":"Discrete","n":2}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "name")]
pub enum SpaceDescription {
    /// Integers in `0..n`.
    Discrete { n: u64 },
    /// Real-valued tensor with clamped bounds.
    Box {
        shape: Vec<usize>,
        low: Vec<f64>,
        high: Vec<f64>,
    },
    /// Vector of independent integer ranges.
    MultiDiscrete {
        n: usize,
        low: Vec<f64>,
        high: Vec<f64>,
    },
    /// Legacy matrix form.
    HighLow { num_rows: usize, matrix: Vec<f64> },
}

/// Maps a float onto a value strict JSON can carry.
///
/// Infinities become `±1e100` and NaN becomes `0.0`.
#[must_use]
pub fn wire_float(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else if value == f64::INFINITY {
        WIRE_INFINITY
    } else if value == f64::NEG_INFINITY {
        -WIRE_INFINITY
    } else {
        value
    }
}

fn wire_floats(values: &[f64]) -> Vec<f64> {
    values.iter().copied().map(wire_float).collect()
}

impl Space {
    /// Builds a box space whose elements share the same bounds.
    #[must_use]
    pub fn uniform_box(shape: Vec<usize>, low: f64, high: f64) -> Self {
        let len = shape.iter().product();
        Self::Box {
            shape,
            low: vec![low; len],
            high: vec![high; len],
        }
    }

    /// Produces the wire description, clamping non-finite bounds.
    #[must_use]
    pub fn describe(&self) -> SpaceDescription {
        match self {
            Self::Discrete { n } => SpaceDescription::Discrete { n: *n },
            Self::Box { shape, low, high } => SpaceDescription::Box {
                shape: shape.clone(),
                low: wire_floats(low),
                high: wire_floats(high),
            },
            Self::MultiDiscrete { n, low, high } => SpaceDescription::MultiDiscrete {
                n: *n,
                low: wire_floats(low),
                high: wire_floats(high),
            },
            Self::HighLow { num_rows, matrix } => SpaceDescription::HighLow {
                num_rows: *num_rows,
                matrix: wire_floats(matrix),
            },
        }
    }

    /// Draws a random member of the space as a JSON value.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Value {
        match self {
            Self::Discrete { n } => json!(rng.gen_range(0..(*n).max(1))),
            Self::Box { low, high, .. } => {
                let values: Vec<f64> = low
                    .iter()
                    .zip(high)
                    .map(|(lo, hi)| sample_interval(rng, *lo, *hi))
                    .collect();
                json!(values)
            }
            Self::MultiDiscrete { low, high, .. } => {
                let values: Vec<i64> = low
                    .iter()
                    .zip(high)
                    .map(|(lo, hi)| sample_integer(rng, *lo, *hi))
                    .collect();
                json!(values)
            }
            Self::HighLow { num_rows, matrix } => {
                let values: Vec<i64> = matrix
                    .chunks(3)
                    .take(*num_rows)
                    .map(|row| match row {
                        [_, lo, hi] => sample_integer(rng, *lo, *hi),
                        _ => 0,
                    })
                    .collect();
                json!(values)
            }
        }
    }

    /// Interprets a JSON action as a discrete choice.
    ///
    /// Accepts integers, floats (truncated), and single-element arrays.
    pub fn discrete_action(&self, action: &Value) -> Result<u64, EngineError> {
        let Self::Discrete { n } = self else {
            return Err(EngineError::invalid_action("space is not discrete"));
        };
        let choice = match action {
            Value::Array(items) if items.len() == 1 => return self.discrete_action(&items[0]),
            Value::Number(number) => number
                .as_u64()
                .or_else(|| number.as_f64().filter(|v| *v >= 0.0).map(|v| v as u64)),
            _ => None,
        }
        .ok_or_else(|| EngineError::invalid_action(format!("expected an integer, got {action}")))?;
        if choice >= *n {
            return Err(EngineError::invalid_action(format!(
                "action {choice} outside 0..{n}"
            )));
        }
        Ok(choice)
    }

    /// Interprets a JSON action as a real vector, clipped to the box bounds.
    pub fn box_action(&self, action: &Value) -> Result<Vec<f64>, EngineError> {
        let Self::Box { low, high, .. } = self else {
            return Err(EngineError::invalid_action("space is not a box"));
        };
        let values: Vec<f64> = match action {
            Value::Array(items) => items
                .iter()
                .map(|item| {
                    item.as_f64().ok_or_else(|| {
                        EngineError::invalid_action(format!("expected a number, got {item}"))
                    })
                })
                .collect::<Result<_, _>>()?,
            Value::Number(number) => vec![number.as_f64().unwrap_or_default()],
            other => {
                return Err(EngineError::invalid_action(format!(
                    "expected a numeric array, got {other}"
                )));
            }
        };
        if values.len() != low.len() {
            return Err(EngineError::invalid_action(format!(
                "expected {} components, got {}",
                low.len(),
                values.len()
            )));
        }
        Ok(values
            .iter()
            .zip(low.iter().zip(high))
            .map(|(value, (lo, hi))| value.clamp(*lo, *hi))
            .collect())
    }
}

fn sample_interval<R: Rng + ?Sized>(rng: &mut R, low: f64, high: f64) -> f64 {
    match (low.is_finite(), high.is_finite()) {
        (true, true) if low < high => rng.gen_range(low..high),
        (true, true) => low,
        (true, false) => low + exponential(rng),
        (false, true) => high - exponential(rng),
        (false, false) => standard_normal(rng),
    }
}

fn sample_integer<R: Rng + ?Sized>(rng: &mut R, low: f64, high: f64) -> i64 {
    let lo = low as i64;
    let hi = high as i64;
    if lo >= hi { lo } else { rng.gen_range(lo..=hi) }
}

fn exponential<R: Rng + ?Sized>(rng: &mut R) -> f64 {
    let u: f64 = rng.r#gen::<f64>().max(1e-300);
    -u.ln()
}

fn standard_normal<R: Rng + ?Sized>(rng: &mut R) -> f64 {
    let u1: f64 = rng.r#gen::<f64>().max(1e-300);
    let u2: f64 = rng.r#gen();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}
