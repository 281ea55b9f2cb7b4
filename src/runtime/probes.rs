//! Probe set, probe selection and the enabled-lane layout
//!
//! Selection expressions are comma-separated lists of probe names, probe
//! indices or inclusive index ranges (`"CLK,2,4-6"`). Selection is
//! all-or-nothing: any bad token leaves every probe untouched.

use crate::{FeedError, Result};
use std::collections::BTreeSet;
use std::fmt;

/// One logical digital input channel
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Probe {
    pub index: usize,
    pub name: String,
    pub enabled: bool,
}

/// Ordered probes of a capture source. Indices are dense (`probes[i].index == i`).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProbeSet {
    probes: Vec<Probe>,
}

impl ProbeSet {
    /// Create a probe set from names; every probe starts enabled
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let probes = names
            .into_iter()
            .enumerate()
            .map(|(index, name)| Probe {
                index,
                name: name.into(),
                enabled: true,
            })
            .collect();
        Self { probes }
    }

    /// Create `count` probes named after their index ("0", "1", ...)
    pub fn numbered(count: usize) -> Self {
        Self::new((0..count).map(|i| i.to_string()))
    }

    pub fn len(&self) -> usize {
        self.probes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.probes.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Probe> {
        self.probes.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Probe> {
        self.probes.iter()
    }

    /// Find a probe by exact name
    pub fn by_name(&self, name: &str) -> Option<&Probe> {
        self.probes.iter().find(|p| p.name == name)
    }

    /// Number of enabled probes
    pub fn enabled_count(&self) -> usize {
        self.probes.iter().filter(|p| p.enabled).count()
    }

    /// Names of the enabled probes, in probe order
    pub fn enabled_names(&self) -> Vec<String> {
        self.probes
            .iter()
            .filter(|p| p.enabled)
            .map(|p| p.name.clone())
            .collect()
    }

    /// Apply a selection expression. `None` enables every probe.
    ///
    /// Returns the number of enabled probes afterwards.
    pub fn select(&mut self, expression: Option<&str>) -> Result<usize> {
        let selected = match expression {
            None => (0..self.probes.len()).collect(),
            Some(expr) => self.parse_selection(expr)?,
        };

        for probe in &mut self.probes {
            probe.enabled = selected.contains(&probe.index);
        }
        Ok(selected.len())
    }

    fn parse_selection(&self, expr: &str) -> Result<BTreeSet<usize>> {
        let mut selected = BTreeSet::new();

        for token in expr.split(',') {
            let token = token.trim();
            if token.is_empty() {
                return Err(FeedError::InvalidSelection(format!(
                    "empty probe reference in '{}'",
                    expr
                )));
            }

            if let Some(probe) = self.by_name(token) {
                selected.insert(probe.index);
            } else if let Some((first, last)) = token.split_once('-')
                && let (Ok(first), Ok(last)) =
                    (first.trim().parse::<usize>(), last.trim().parse::<usize>())
            {
                if first > last {
                    return Err(FeedError::InvalidSelection(format!(
                        "reversed probe range '{}'",
                        token
                    )));
                }
                if last >= self.probes.len() {
                    return Err(FeedError::InvalidSelection(format!(
                        "probe range '{}' exceeds {} probes",
                        token,
                        self.probes.len()
                    )));
                }
                selected.extend(first..=last);
            } else if let Ok(index) = token.parse::<usize>() {
                if index >= self.probes.len() {
                    return Err(FeedError::InvalidSelection(format!(
                        "probe index {} out of range (device has {} probes)",
                        index,
                        self.probes.len()
                    )));
                }
                selected.insert(index);
            } else {
                return Err(FeedError::InvalidSelection(format!(
                    "unknown probe '{}'",
                    token
                )));
            }
        }

        Ok(selected)
    }

    /// Compute the enabled-lane layout over the first `probe_count` probes
    /// (the count announced by a meta packet).
    pub fn enabled_lanes(&self, probe_count: usize) -> EnabledLanes {
        EnabledLanes::new(
            self.probes
                .iter()
                .take(probe_count)
                .filter(|p| p.enabled)
                .map(|p| p.index)
                .collect(),
        )
    }
}

/// Bytes needed to hold `lanes` packed bits
#[inline]
pub fn unit_size_for(lanes: usize) -> usize {
    lanes.div_ceil(8)
}

/// Ordered probe indices of the enabled lanes, in probe order
///
/// The list length is the lane count; no terminator is stored.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EnabledLanes {
    lanes: Vec<usize>,
}

impl EnabledLanes {
    pub fn new(lanes: Vec<usize>) -> Self {
        Self { lanes }
    }

    pub fn len(&self) -> usize {
        self.lanes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lanes.is_empty()
    }

    pub fn as_slice(&self) -> &[usize] {
        &self.lanes
    }

    /// Byte width of one packed sample
    pub fn unit_size(&self) -> usize {
        unit_size_for(self.lanes.len())
    }

    /// Highest source bit referenced, if any lane is enabled
    pub fn max_lane(&self) -> Option<usize> {
        self.lanes.iter().copied().max()
    }

    /// True when lane `i` is source bit `i` for every lane, so packing a
    /// sample of `source_unit_size` bytes is a byte-for-byte copy.
    pub fn is_identity_for(&self, source_unit_size: usize) -> bool {
        self.lanes.len() == source_unit_size * 8
            && self.lanes.iter().enumerate().all(|(i, &lane)| i == lane)
    }
}

impl fmt::Display for EnabledLanes {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}", self.lanes)
    }
}
