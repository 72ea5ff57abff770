//! Discovered transmitters for the current scan.

use tracing::debug;

use cgmlink_types::{DeviceCandidate, DeviceId};

use crate::radio::Advertisement;

/// Default advertised-name substrings that mark a CGM transmitter.
pub const DEFAULT_NAME_FILTERS: &[&str] = &["Dexcom", "CGM"];

/// Case-sensitive allow-list of advertised-name substrings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameFilter {
    patterns: Vec<String>,
}

impl NameFilter {
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            patterns: patterns.into_iter().map(Into::into).collect(),
        }
    }

    /// Whether `name` contains any of the configured substrings.
    pub fn matches(&self, name: &str) -> bool {
        self.patterns.iter().any(|p| name.contains(p.as_str()))
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }
}

impl Default for NameFilter {
    fn default() -> Self {
        Self::new(DEFAULT_NAME_FILTERS.iter().copied())
    }
}

/// The candidates seen since the last [`clear`](Self::clear), in discovery
/// order and unique by device identifier.
#[derive(Debug, Clone, Default)]
pub struct DeviceDirectory {
    filter: NameFilter,
    candidates: Vec<DeviceCandidate>,
}

impl DeviceDirectory {
    pub fn new(filter: NameFilter) -> Self {
        Self {
            filter,
            candidates: Vec::new(),
        }
    }

    /// Offer an advertisement. Returns `true` when it added a new candidate.
    ///
    /// Advertisements without a name, with a name outside the allow-list, or
    /// from an identifier already listed are ignored.
    pub fn offer(&mut self, adv: &Advertisement) -> bool {
        let Some(name) = adv.name.as_deref() else {
            return false;
        };
        if !self.filter.matches(name) {
            return false;
        }
        if self.contains(&adv.id) {
            return false;
        }

        debug!("New candidate {} ({})", name, adv.id);
        self.candidates.push(DeviceCandidate {
            id: adv.id.clone(),
            name: name.to_string(),
            rssi: adv.rssi,
        });
        true
    }

    pub fn contains(&self, id: &DeviceId) -> bool {
        self.candidates.iter().any(|c| &c.id == id)
    }

    pub fn get(&self, id: &DeviceId) -> Option<&DeviceCandidate> {
        self.candidates.iter().find(|c| &c.id == id)
    }

    pub fn candidates(&self) -> &[DeviceCandidate] {
        &self.candidates
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn clear(&mut self) {
        self.candidates.clear();
    }

    pub fn filter(&self) -> &NameFilter {
        &self.filter
    }
}
