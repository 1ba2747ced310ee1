use serde::{
    Deserialize,
    Serialize,
};
use std::collections::BTreeMap;
use std::fmt::Display;

use crate::errors::{
    CcsPredError,
    Result,
};

/// A single hyperparameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Display for ParamValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParamValue::Bool(x) => write!(f, "{}", x),
            ParamValue::Int(x) => write!(f, "{}", x),
            ParamValue::Float(x) => write!(f, "{}", x),
            ParamValue::Text(x) => write!(f, "{:?}", x),
        }
    }
}

impl From<f64> for ParamValue {
    fn from(x: f64) -> Self {
        Self::Float(x)
    }
}

impl From<i64> for ParamValue {
    fn from(x: i64) -> Self {
        Self::Int(x)
    }
}

impl From<bool> for ParamValue {
    fn from(x: bool) -> Self {
        Self::Bool(x)
    }
}

impl From<&str> for ParamValue {
    fn from(x: &str) -> Self {
        Self::Text(x.to_string())
    }
}

/// Named parameters for one estimator instance.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EstimatorParams(BTreeMap<String, ParamValue>);

impl EstimatorParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, value: impl Into<ParamValue>) -> Self {
        self.0.insert(name.to_string(), value.into());
        self
    }

    pub fn insert(&mut self, name: String, value: ParamValue) {
        self.0.insert(name, value);
    }

    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.0.get(name)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> + '_ {
        self.0.keys().map(|k| k.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Numeric parameter, integers are widened.
    pub fn get_f64(&self, name: &'static str) -> Result<Option<f64>> {
        match self.0.get(name) {
            None => Ok(None),
            Some(ParamValue::Float(x)) => Ok(Some(*x)),
            Some(ParamValue::Int(x)) => Ok(Some(*x as f64)),
            Some(other) => Err(CcsPredError::config(
                name,
                format!("expected a number, got {}", other),
            )),
        }
    }

    pub fn get_bool(&self, name: &'static str) -> Result<Option<bool>> {
        match self.0.get(name) {
            None => Ok(None),
            Some(ParamValue::Bool(x)) => Ok(Some(*x)),
            Some(other) => Err(CcsPredError::config(
                name,
                format!("expected a boolean, got {}", other),
            )),
        }
    }

    /// Fails on any key not in `known`.
    pub fn check_known(&self, known: &[&str], estimator: &str) -> Result<()> {
        match self.keys().find(|k| !known.contains(k)) {
            Some(k) => Err(CcsPredError::config(
                "per_estimator_grid",
                format!("unknown parameter '{}' for {}", k, estimator),
            )),
            None => Ok(()),
        }
    }
}

impl Display for EstimatorParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{{")?;
        for (i, (k, v)) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}: {}", k, v)?;
        }
        write!(f, "}}")
    }
}

impl FromIterator<(String, ParamValue)> for EstimatorParams {
    fn from_iter<T: IntoIterator<Item = (String, ParamValue)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_values_keep_their_kind() {
        let p: EstimatorParams =
            serde_json::from_str(r#"{"C": 100, "gamma": 0.01, "fit_intercept": true}"#).unwrap();
        assert_eq!(p.get("C"), Some(&ParamValue::Int(100)));
        assert_eq!(p.get_f64("C").unwrap(), Some(100.0));
        assert_eq!(p.get_f64("gamma").unwrap(), Some(0.01));
        assert_eq!(p.get_bool("fit_intercept").unwrap(), Some(true));
        assert!(p.get_f64("fit_intercept").is_err());
        assert_eq!(p.to_string(), "{C: 100, fit_intercept: true, gamma: 0.01}");
    }
}
