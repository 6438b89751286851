//! Core row types for the presence time series
//!
//! All timestamps are Unix seconds (UTC). Buckets are aligned to the
//! configured bucket width by [`super::bucket::round_up`].

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Where an observation came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    /// Directly extracted from a capture file
    Original,
    /// Inferred by forward extrapolation or gap filling
    Synthetic,
}

impl Origin {
    pub fn as_str(&self) -> &'static str {
        match self {
            Origin::Original => "original",
            Origin::Synthetic => "synthetic",
        }
    }
}

/// Provenance of a count sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CountMethod {
    /// Counted directly from observations
    Original,
    /// Linear interpolation between known neighbours
    Interpolated,
    /// Copied from the same bucket one week earlier
    SameWeekday,
    /// Copied from the same bucket one day earlier
    SamePriorDay,
    /// Nothing better available
    Zero,
}

impl CountMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            CountMethod::Original => "original",
            CountMethod::Interpolated => "interpolated",
            CountMethod::SameWeekday => "same_weekday",
            CountMethod::SamePriorDay => "same_prior_day",
            CountMethod::Zero => "zero",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} value: {value}")]
pub struct ParseEnumError {
    kind: &'static str,
    value: String,
}

impl FromStr for Origin {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "original" => Ok(Origin::Original),
            "synthetic" => Ok(Origin::Synthetic),
            other => Err(ParseEnumError {
                kind: "origin",
                value: other.to_string(),
            }),
        }
    }
}

impl FromStr for CountMethod {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "original" => Ok(CountMethod::Original),
            "interpolated" => Ok(CountMethod::Interpolated),
            "same_weekday" => Ok(CountMethod::SameWeekday),
            "same_prior_day" => Ok(CountMethod::SamePriorDay),
            "zero" => Ok(CountMethod::Zero),
            other => Err(ParseEnumError {
                kind: "count method",
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for CountMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ToSql for Origin {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for Origin {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e| FromSqlError::Other(Box::new(e)))
    }
}

impl ToSql for CountMethod {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for CountMethod {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e| FromSqlError::Other(Box::new(e)))
    }
}

/// "address was believed present during bucket"
///
/// `(bucket, address)` is unique in the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Observation {
    pub bucket: i64,
    pub address: String,
    pub origin: Origin,
}

impl Observation {
    pub fn new(bucket: i64, address: impl Into<String>, origin: Origin) -> Self {
        Self {
            bucket,
            address: address.into(),
            origin,
        }
    }
}

/// "count distinct addresses were present during bucket"
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountSample {
    pub bucket: i64,
    pub count: u32,
    pub method: CountMethod,
}

impl CountSample {
    pub fn new(bucket: i64, count: u32, method: CountMethod) -> Self {
        Self {
            bucket,
            count,
            method,
        }
    }

    pub fn is_original(&self) -> bool {
        self.method == CountMethod::Original
    }
}
