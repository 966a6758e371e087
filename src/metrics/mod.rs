// src/metrics/mod.rs

//! Handler return values and the timeseries built from them.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

pub mod aggregator;
pub mod recorder;

pub use aggregator::{CompareOp, Comparison, MetricAggregator, MetricSample, MetricSeries};
pub use recorder::{LogRecorder, MemoryRecorder, Recorder};

/// A single recorded value.
///
/// Integers are kept as `i128` so token amounts in wei compare and record
/// exactly.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Datapoint {
    Bool(bool),
    Int(i128),
    Float(f64),
}

impl Datapoint {
    /// Lossy numeric view, for display and plotting. `true` is 1.
    pub fn as_f64(&self) -> f64 {
        match *self {
            Datapoint::Bool(b) => {
                if b {
                    1.0
                } else {
                    0.0
                }
            }
            Datapoint::Int(i) => i as f64,
            Datapoint::Float(f) => f,
        }
    }

    pub fn is_nan(&self) -> bool {
        matches!(self, Datapoint::Float(f) if f.is_nan())
    }

    /// Exact ordering. Integers (and bools as 0/1) compare as integers;
    /// an integer against a float compares without rounding the integer.
    /// `None` when either side is NaN.
    pub fn compare(&self, other: &Datapoint) -> Option<Ordering> {
        match (self.as_int(), other.as_int()) {
            (Some(a), Some(b)) => Some(a.cmp(&b)),
            (Some(a), None) => cmp_int_float(a, other.as_f64()),
            (None, Some(b)) => cmp_int_float(b, self.as_f64()).map(Ordering::reverse),
            (None, None) => self.as_f64().partial_cmp(&other.as_f64()),
        }
    }

    fn as_int(&self) -> Option<i128> {
        match *self {
            Datapoint::Bool(b) => Some(i128::from(b)),
            Datapoint::Int(i) => Some(i),
            Datapoint::Float(_) => None,
        }
    }

    /// Scalars convert; everything else is `None`.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(b) => Some(Datapoint::Bool(*b)),
            Value::Number(n) => n
                .as_i64()
                .map(|i| Datapoint::Int(i.into()))
                .or_else(|| n.as_u64().map(|u| Datapoint::Int(u.into())))
                .or_else(|| n.as_f64().map(Datapoint::Float)),
            _ => None,
        }
    }
}

/// `i` against `f`, exactly.
fn cmp_int_float(i: i128, f: f64) -> Option<Ordering> {
    if f.is_nan() {
        return None;
    }
    // 2^127; every i128 lies in [-2^127, 2^127).
    const BOUND: f64 = 170_141_183_460_469_231_731_687_303_715_884_105_728.0;
    let floor = f.floor();
    if floor >= BOUND {
        return Some(Ordering::Less);
    }
    if floor < -BOUND {
        return Some(Ordering::Greater);
    }
    let whole = floor as i128;
    if floor == f {
        Some(i.cmp(&whole))
    } else if i <= whole {
        Some(Ordering::Less)
    } else {
        Some(Ordering::Greater)
    }
}

impl fmt::Display for Datapoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Datapoint::Bool(b) => write!(f, "{b}"),
            Datapoint::Int(i) => write!(f, "{i}"),
            Datapoint::Float(x) => write!(f, "{x}"),
        }
    }
}

impl From<bool> for Datapoint {
    fn from(v: bool) -> Self {
        Datapoint::Bool(v)
    }
}

macro_rules! int_datapoint {
    ($($t:ty),*) => {
        $(
            impl From<$t> for Datapoint {
                fn from(v: $t) -> Self {
                    Datapoint::Int(v.into())
                }
            }
        )*
    };
}

int_datapoint!(i32, i64, i128, u32, u64);

impl TryFrom<u128> for Datapoint {
    type Error = std::num::TryFromIntError;

    fn try_from(v: u128) -> Result<Self, Self::Error> {
        i128::try_from(v).map(Datapoint::Int)
    }
}

impl From<f64> for Datapoint {
    fn from(v: f64) -> Self {
        Datapoint::Float(v)
    }
}

/// What a handler returned.
///
/// `Single` values are recorded under the handler's own name; `Named`
/// values under each key.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum Measurement {
    #[default]
    None,
    Single(Datapoint),
    Named(BTreeMap<String, Datapoint>),
}

impl Measurement {
    pub fn single(value: impl Into<Datapoint>) -> Self {
        Measurement::Single(value.into())
    }

    pub fn named<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Datapoint>,
    {
        Measurement::Named(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Convert a free-form JSON result. Unsupported values are dropped with
    /// a warning rather than failing the task.
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => Measurement::None,
            Value::Object(map) => {
                let mut named = BTreeMap::new();
                for (key, v) in map {
                    match Datapoint::from_json(v) {
                        Some(dp) => {
                            named.insert(key.clone(), dp);
                        }
                        None => warn!(metric = %key, value = %v, "dropping unsupported metric value"),
                    }
                }
                if named.is_empty() {
                    Measurement::None
                } else {
                    Measurement::Named(named)
                }
            }
            other => match Datapoint::from_json(other) {
                Some(dp) => Measurement::Single(dp),
                None => {
                    warn!(value = %other, "dropping unsupported handler result");
                    Measurement::None
                }
            },
        }
    }

    /// `(metric name, value)` pairs for a result of `handler`.
    pub fn datapoints<'a>(&'a self, handler: &'a str) -> Vec<(&'a str, Datapoint)> {
        match self {
            Measurement::None => Vec::new(),
            Measurement::Single(dp) => vec![(handler, *dp)],
            Measurement::Named(map) => map.iter().map(|(k, v)| (k.as_str(), *v)).collect(),
        }
    }
}

impl From<Datapoint> for Measurement {
    fn from(dp: Datapoint) -> Self {
        Measurement::Single(dp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_objects_become_named_and_skip_junk() {
        let m = Measurement::from_json(&json!({"count": 3, "ratio": 0.5, "ok": true, "who": "x"}));
        assert_eq!(
            m,
            Measurement::named([
                ("count", Datapoint::Int(3)),
                ("ok", Datapoint::Bool(true)),
                ("ratio", Datapoint::Float(0.5)),
            ])
        );
    }

    #[test]
    fn large_integers_stay_exact() {
        let wei = Measurement::from_json(&json!({"wei": 10_000_000_000_000_000_000u64}));
        assert_eq!(
            wei,
            Measurement::named([("wei", Datapoint::Int(10_000_000_000_000_000_000))])
        );

        assert_eq!(
            Measurement::single(u64::MAX),
            Measurement::Single(Datapoint::Int(u64::MAX as i128))
        );

        let above_f64 = Datapoint::Int(9_007_199_254_740_993);
        assert_eq!(
            above_f64.compare(&Datapoint::Float(9_007_199_254_740_992.0)),
            Some(Ordering::Greater)
        );
        assert_eq!(
            Datapoint::Int(3).compare(&Datapoint::Float(2.5)),
            Some(Ordering::Greater)
        );
        assert_eq!(
            Datapoint::Int(-3).compare(&Datapoint::Float(-2.5)),
            Some(Ordering::Less)
        );
        assert_eq!(
            Datapoint::Bool(true).compare(&Datapoint::Int(1)),
            Some(Ordering::Equal)
        );
        assert_eq!(Datapoint::Int(1).compare(&Datapoint::Float(f64::NAN)), None);
        assert!(Datapoint::try_from(u128::MAX).is_err());
    }

    #[test]
    fn scalars_are_recorded_under_handler_name() {
        let m = Measurement::from_json(&json!(7));
        assert_eq!(m.datapoints("counter"), vec![("counter", Datapoint::Int(7))]);
        assert_eq!(Measurement::from_json(&json!([1, 2])), Measurement::None);
    }
}
