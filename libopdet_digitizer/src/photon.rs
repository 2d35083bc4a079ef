use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Compact photon record: detected photon counts binned by arrival time (integer ns).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SimPhotonsLite {
    pub channel: u32,
    pub detected: BTreeMap<i32, u32>,
}

/// A single detected photon
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct OnePhoton {
    /// Arrival time in ns
    pub time: f64,
}

/// Complete photon record: one entry per detected photon.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SimPhotons {
    pub channel: u32,
    pub photons: Vec<OnePhoton>,
}

/// Which form of photon record a collection (or a run) uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhotonForm {
    Lite,
    Full,
}

/// The per-channel records of one collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhotonRecords {
    Lite(Vec<SimPhotonsLite>),
    Full(Vec<SimPhotons>),
}

/// One input collection of photon records for a processing unit.
///
/// A unit usually carries several collections, one per light-propagation path
/// (for example `direct` and `reflected`), which may describe the same channels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhotonCollection {
    pub label: String,
    pub records: PhotonRecords,
}

impl PhotonCollection {
    pub fn lite(label: &str, records: Vec<SimPhotonsLite>) -> Self {
        Self {
            label: label.to_string(),
            records: PhotonRecords::Lite(records),
        }
    }

    pub fn full(label: &str, records: Vec<SimPhotons>) -> Self {
        Self {
            label: label.to_string(),
            records: PhotonRecords::Full(records),
        }
    }

    pub fn form(&self) -> PhotonForm {
        match self.records {
            PhotonRecords::Lite(_) => PhotonForm::Lite,
            PhotonRecords::Full(_) => PhotonForm::Full,
        }
    }
}

/// One batch of photon data digitized together (typically one readout window).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessingUnit {
    pub id: u64,
    pub collections: Vec<PhotonCollection>,
}

/// The merged photon content of one channel for one unit.
///
/// Binned (lite) and per-photon (full) content are kept side by side and handed to
/// the digitizers uniformly as `(time_ns, count)` hits.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PhotonRecord {
    binned: BTreeMap<i32, u32>,
    times: Vec<f64>,
}

/// Shared empty record for channels nothing landed on
pub static EMPTY_RECORD: PhotonRecord = PhotonRecord {
    binned: BTreeMap::new(),
    times: Vec::new(),
};

impl PhotonRecord {
    /// Add binned counts, summing bins that already exist
    pub fn merge_lite(&mut self, lite: &SimPhotonsLite) {
        for (time, count) in lite.detected.iter() {
            let bin = self.binned.entry(*time).or_insert(0);
            *bin = bin.saturating_add(*count);
        }
    }

    /// Add individual photons
    pub fn merge_full(&mut self, full: &SimPhotons) {
        self.times.extend(full.photons.iter().map(|p| p.time));
    }

    pub fn is_empty(&self) -> bool {
        self.n_photons() == 0
    }

    /// Total number of photons in the record
    pub fn n_photons(&self) -> u64 {
        self.binned.values().map(|c| *c as u64).sum::<u64>() + self.times.len() as u64
    }

    /// Every hit as `(time_ns, count)`; binned hits first, in time order
    pub fn hits(&self) -> impl Iterator<Item = (f64, u32)> + '_ {
        self.binned
            .iter()
            .filter(|(_, count)| **count > 0)
            .map(|(time, count)| (*time as f64, *count))
            .chain(self.times.iter().map(|time| (*time, 1)))
    }
}
