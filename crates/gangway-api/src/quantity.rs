//! Kubernetes-style resource quantities.
//!
//! Accepts plain numbers (`"2"`, `"0.5"`), milli-units (`"500m"`), decimal
//! SI suffixes (`"1G"`) and binary suffixes (`"4Gi"`). Quantities are parsed
//! once at deserialization time so the rest of the scheduler only ever sees
//! numeric values.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ApiError;

/// Resource name → quantity, as found on pods, nodes and queues.
pub type ResourceList = BTreeMap<String, Quantity>;

/// A parsed quantity. Keeps the original text for display and round-tripping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Quantity {
    raw: String,
    value: f64,
}

impl Quantity {
    /// Parse a quantity string.
    pub fn parse(input: &str) -> Result<Self, ApiError> {
        let raw = input.trim();
        let invalid = || ApiError::InvalidQuantity(input.to_string());

        let split = raw
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(raw.len());
        let (number, suffix) = raw.split_at(split);
        if number.is_empty() {
            return Err(invalid());
        }
        let number: f64 = number.parse().map_err(|_| invalid())?;

        let multiplier = match suffix {
            "" => 1.0,
            "m" => 1e-3,
            "k" => 1e3,
            "M" => 1e6,
            "G" => 1e9,
            "T" => 1e12,
            "P" => 1e15,
            "Ki" => 1024.0,
            "Mi" => 1024.0_f64.powi(2),
            "Gi" => 1024.0_f64.powi(3),
            "Ti" => 1024.0_f64.powi(4),
            "Pi" => 1024.0_f64.powi(5),
            _ => return Err(invalid()),
        };

        Ok(Self {
            raw: raw.to_string(),
            value: number * multiplier,
        })
    }

    /// Value in base units (cores, bytes, devices).
    pub fn value(&self) -> f64 {
        self.value
    }

    /// Value in thousandths of a base unit.
    pub fn milli_value(&self) -> f64 {
        self.value * 1000.0
    }
}

impl FromStr for Quantity {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Quantity {
    type Error = ApiError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Quantity> for String {
    fn from(q: Quantity) -> Self {
        q.raw
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}
