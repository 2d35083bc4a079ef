use fxhash::FxHashMap;

use super::photon::{PhotonCollection, PhotonForm, PhotonRecord, PhotonRecords, EMPTY_RECORD};

/// Channel id -> merged photon record for one processing unit.
///
/// Built once by the orchestrating thread before a unit is dispatched, then only
/// read (never copied) by the workers while the unit is in flight.
#[derive(Debug, Clone, Default)]
pub struct PhotonIndex {
    records: FxHashMap<u32, PhotonRecord>,
    n_skipped: usize,
}

impl PhotonIndex {
    /// Build the index from every collection of a unit that matches `form`.
    ///
    /// Records for the same channel coming from different collections (or repeated
    /// within one) are merged. Collections of the other form are skipped and counted.
    pub fn build(collections: &[PhotonCollection], form: PhotonForm) -> Self {
        let mut index = Self::default();
        for collection in collections {
            if collection.form() != form {
                spdlog::warn!(
                    "Photon collection '{}' is {:?} but {:?} photons were requested, skipping it",
                    collection.label,
                    collection.form(),
                    form
                );
                index.n_skipped += 1;
                continue;
            }
            index.add_collection(collection);
        }
        index
    }

    /// Merge every record of a collection into the index, regardless of its form
    pub fn add_collection(&mut self, collection: &PhotonCollection) {
        match &collection.records {
            PhotonRecords::Lite(lites) => {
                for lite in lites {
                    self.records
                        .entry(lite.channel)
                        .or_default()
                        .merge_lite(lite);
                }
            }
            PhotonRecords::Full(fulls) => {
                for full in fulls {
                    self.records
                        .entry(full.channel)
                        .or_default()
                        .merge_full(full);
                }
            }
        }
    }

    /// Record for a channel. Channels nothing landed on get the empty record.
    pub fn get(&self, channel: u32) -> &PhotonRecord {
        self.records.get(&channel).unwrap_or(&EMPTY_RECORD)
    }

    /// Number of channels with at least one record
    pub fn n_channels(&self) -> usize {
        self.records.len()
    }

    /// Number of collections skipped because of their form
    pub fn n_skipped(&self) -> usize {
        self.n_skipped
    }

    pub fn total_photons(&self) -> u64 {
        self.records.values().map(|r| r.n_photons()).sum()
    }
}
