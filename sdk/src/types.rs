//! Typed values carried by tasks and outputs

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Declared type of the class attribute of a dataset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClassAttributeType {
    Integer,
    Real,
    Text,
}

/// Error raised when a raw label cannot be read as the declared class type
#[derive(Debug, Clone, PartialEq, Error)]
#[error("cannot read '{raw}' as a {expected} class value")]
pub struct ClassParseError {
    pub raw: String,
    pub expected: &'static str,
}

impl ClassAttributeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClassAttributeType::Integer => "integer",
            ClassAttributeType::Real => "real",
            ClassAttributeType::Text => "text",
        }
    }

    /// Read a raw label as a value of this type.
    ///
    /// Integer labels also accept integral real spellings such as `1.0`,
    /// which is how many learners print integer classes.
    pub fn parse(&self, raw: &str) -> Result<ClassValue, ClassParseError> {
        let trimmed = raw.trim();
        let error = || ClassParseError {
            raw: trimmed.to_string(),
            expected: self.as_str(),
        };

        match self {
            ClassAttributeType::Integer => {
                if let Ok(value) = trimmed.parse::<i64>() {
                    return Ok(ClassValue::Integer(value));
                }
                match trimmed.parse::<f64>() {
                    Ok(value) if value.is_finite() && value.fract() == 0.0 => {
                        Ok(ClassValue::Integer(value as i64))
                    }
                    _ => Err(error()),
                }
            }
            ClassAttributeType::Real => trimmed
                .parse::<f64>()
                .map(ClassValue::Real)
                .map_err(|_| error()),
            ClassAttributeType::Text => Ok(ClassValue::Text(trimmed.to_string())),
        }
    }
}

impl fmt::Display for ClassAttributeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed class label
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ClassValue {
    Integer(i64),
    Real(f64),
    Text(String),
}

impl fmt::Display for ClassValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClassValue::Integer(v) => write!(f, "{}", v),
            ClassValue::Real(v) => write!(f, "{}", v),
            ClassValue::Text(v) => f.write_str(v),
        }
    }
}

/// A scalar task parameter
///
/// Parameters reach the external executable as strings, both as environment
/// variables and as `.properties` entries. Structured values are rejected
/// when the task is deserialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParameterValue {
    Bool(bool),
    Integer(i64),
    Real(f64),
    Text(String),
}

impl fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParameterValue::Bool(true) => f.write_str("True"),
            ParameterValue::Bool(false) => f.write_str("False"),
            ParameterValue::Integer(v) => write!(f, "{}", v),
            ParameterValue::Real(v) => f.write_str(&render_real(*v)),
            ParameterValue::Text(v) => f.write_str(v),
        }
    }
}

/// Shortest round-trip form, fixed notation for decimal exponents in
/// `-4..16` and `1e-05` style otherwise. Integral values keep `.0`.
fn render_real(value: f64) -> String {
    if value.is_nan() {
        return "nan".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "inf" } else { "-inf" }.to_string();
    }

    let scientific = format!("{:e}", value);
    let (mantissa, exponent) = scientific
        .split_once('e')
        .unwrap_or((scientific.as_str(), "0"));
    let exponent: i32 = exponent.parse().unwrap_or(0);

    if (-4..16).contains(&exponent) {
        let fixed = value.to_string();
        if fixed.contains('.') {
            fixed
        } else {
            format!("{}.0", fixed)
        }
    } else {
        let sign = if exponent < 0 { '-' } else { '+' };
        format!("{}e{}{:02}", mantissa, sign, exponent.abs())
    }
}

/// Ordered mapping of parameter names to scalar values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Parameters(BTreeMap<String, ParameterValue>);

impl Parameters {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Add a parameter
    pub fn with(mut self, key: impl Into<String>, value: ParameterValue) -> Self {
        self.0.insert(key.into(), value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: ParameterValue) {
        self.0.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&ParameterValue> {
        self.0.get(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ParameterValue)> {
        self.0.iter()
    }

    /// Every value rendered as its string form, keyed by the original name
    pub fn to_strings(&self) -> BTreeMap<String, String> {
        self.0
            .iter()
            .map(|(k, v)| (k.clone(), v.to_string()))
            .collect()
    }
}

impl FromIterator<(String, ParameterValue)> for Parameters {
    fn from_iter<I: IntoIterator<Item = (String, ParameterValue)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Evaluation metrics of a fused ensemble
///
/// Field names on the wire follow the keys the result consumers already read
/// (`f-measure`, `mcc`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    #[serde(rename = "f-measure")]
    pub f_measure: f64,
    pub mcc: f64,
    pub true_positives: u64,
    pub false_positives: u64,
    pub true_negatives: u64,
    pub false_negatives: u64,
}
