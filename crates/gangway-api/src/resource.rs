//! Multi-dimensional resource vectors.
//!
//! A `Resource` holds CPU (milli-cores), memory (bytes) and any number of
//! scalar extended resources (milli-units, e.g. `nvidia.com/gpu`). All
//! comparisons tolerate differences below [`MIN_RESOURCE`] so that repeated
//! add/sub cycles on floats never flip a fit decision.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::quantity::ResourceList;

pub const CPU: &str = "cpu";
pub const MEMORY: &str = "memory";
/// Pod-count capacity. Tracked on the node, never part of a `Resource`.
pub const PODS: &str = "pods";

/// Differences below this are treated as equal.
pub const MIN_RESOURCE: f64 = 0.1;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub milli_cpu: f64,
    pub memory: f64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub scalars: BTreeMap<String, f64>,
}

impl Resource {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn new(milli_cpu: f64, memory: f64) -> Self {
        Self {
            milli_cpu,
            memory,
            scalars: BTreeMap::new(),
        }
    }

    /// Builder-style scalar setter (value in milli-units).
    pub fn with_scalar(mut self, name: &str, milli_value: f64) -> Self {
        self.scalars.insert(name.to_string(), milli_value);
        self
    }

    /// Convert a resource list. The `pods` entry is skipped.
    pub fn from_list(list: &ResourceList) -> Self {
        let mut res = Self::empty();
        for (name, quantity) in list {
            match name.as_str() {
                CPU => res.milli_cpu += quantity.milli_value(),
                MEMORY => res.memory += quantity.value(),
                PODS => {}
                other => {
                    *res.scalars.entry(other.to_string()).or_insert(0.0) += quantity.milli_value();
                }
            }
        }
        res
    }

    pub fn get(&self, name: &str) -> f64 {
        match name {
            CPU => self.milli_cpu,
            MEMORY => self.memory,
            other => self.scalars.get(other).copied().unwrap_or(0.0),
        }
    }

    pub fn set(&mut self, name: &str, value: f64) {
        match name {
            CPU => self.milli_cpu = value,
            MEMORY => self.memory = value,
            other => {
                self.scalars.insert(other.to_string(), value);
            }
        }
    }

    /// Dimension names, cpu and memory first, then scalars in name order.
    pub fn resource_names(&self) -> Vec<String> {
        let mut names = vec![CPU.to_string(), MEMORY.to_string()];
        names.extend(self.scalars.keys().cloned());
        names
    }

    /// True when every dimension is below the tolerance.
    pub fn is_empty(&self) -> bool {
        self.milli_cpu < MIN_RESOURCE
            && self.memory < MIN_RESOURCE
            && self.scalars.values().all(|v| *v < MIN_RESOURCE)
    }

    pub fn is_zero(&self, name: &str) -> bool {
        self.get(name) < MIN_RESOURCE
    }

    pub fn add(&mut self, rr: &Resource) -> &mut Self {
        self.milli_cpu += rr.milli_cpu;
        self.memory += rr.memory;
        for (name, value) in &rr.scalars {
            *self.scalars.entry(name.clone()).or_insert(0.0) += value;
        }
        self
    }

    /// Subtract, clamping every dimension at zero.
    pub fn sub(&mut self, rr: &Resource) -> &mut Self {
        self.milli_cpu = (self.milli_cpu - rr.milli_cpu).max(0.0);
        self.memory = (self.memory - rr.memory).max(0.0);
        for (name, value) in &rr.scalars {
            let entry = self.scalars.entry(name.clone()).or_insert(0.0);
            *entry = (*entry - value).max(0.0);
        }
        self
    }

    pub fn multi(&mut self, ratio: f64) -> &mut Self {
        self.milli_cpu *= ratio;
        self.memory *= ratio;
        for value in self.scalars.values_mut() {
            *value *= ratio;
        }
        self
    }

    /// Per-dimension minimum of `self` and `rr`.
    pub fn min_dimension(&mut self, rr: &Resource) -> &mut Self {
        self.milli_cpu = self.milli_cpu.min(rr.milli_cpu);
        self.memory = self.memory.min(rr.memory);
        for (name, value) in self.scalars.iter_mut() {
            *value = value.min(rr.scalars.get(name).copied().unwrap_or(0.0));
        }
        self
    }

    /// `self <= rr` on every dimension of `self`.
    pub fn less_equal(&self, rr: &Resource) -> bool {
        le(self.milli_cpu, rr.milli_cpu)
            && le(self.memory, rr.memory)
            && self
                .scalars
                .iter()
                .all(|(name, value)| le(*value, rr.scalars.get(name).copied().unwrap_or(0.0)))
    }

    /// `self <= rr`, checked only on the dimensions `req` asks for.
    pub fn less_equal_with_dimension(&self, rr: &Resource, req: &Resource) -> bool {
        if req.milli_cpu > 0.0 && !le(self.milli_cpu, rr.milli_cpu) {
            return false;
        }
        if req.memory > 0.0 && !le(self.memory, rr.memory) {
            return false;
        }
        req.scalars
            .iter()
            .filter(|(_, v)| **v > 0.0)
            .all(|(name, _)| le(self.get(name), rr.get(name)))
    }

    /// First dimension on which `self` (a request) exceeds `available`.
    pub fn insufficient_dimension(&self, available: &Resource) -> Option<String> {
        self.resource_names()
            .into_iter()
            .find(|name| !le(self.get(name), available.get(name)))
    }
}

fn le(l: f64, r: f64) -> bool {
    l < r || (l - r).abs() < MIN_RESOURCE
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cpu {:.2}, memory {:.2}", self.milli_cpu, self.memory)?;
        for (name, value) in &self.scalars {
            write!(f, ", {name} {value:.2}")?;
        }
        Ok(())
    }
}

/// Ratio `l / r`; a zero denominator yields 1 when anything is used, 0 otherwise.
pub fn share(l: f64, r: f64) -> f64 {
    if r < MIN_RESOURCE {
        if l < MIN_RESOURCE { 0.0 } else { 1.0 }
    } else {
        l / r
    }
}

/// The dominant resource of `allocated` relative to `total`, with its share.
pub fn dominant_share(allocated: &Resource, total: &Resource) -> (String, f64) {
    let mut names = total.resource_names();
    for name in allocated.scalars.keys() {
        if !total.scalars.contains_key(name) {
            names.push(name.clone());
        }
    }

    let mut dominant = (String::new(), 0.0);
    for name in names {
        let s = share(allocated.get(&name), total.get(&name));
        if s > dominant.1 {
            dominant = (name, s);
        }
    }
    dominant
}
