// The photon detector map is a flat CSV of `channel,pd_type`. Channels are expected to
// run from 0 without gaps, since the DigitizerPool partitions the range [0, n_channels)
// and asks the map for the type of every channel in it. A gap is reported when the
// pool is built, not here.
use std::fs::File;
use std::io::Read;
use std::path::Path;

use fxhash::FxHashMap;

use super::error::ChannelMapError;
use super::pd_type::{DeviceKind, PdType};

const ENTRIES_PER_LINE: usize = 2; //Number of elements in a single row in the CSV file

/// Load the default map for windows
#[cfg(target_family = "windows")]
fn load_default_map() -> String {
    String::from(include_str!("data\\default_pd_map.csv"))
}

/// Load the default map for macos and linux
#[cfg(target_family = "unix")]
fn load_default_map() -> String {
    String::from(include_str!("data/default_pd_map.csv"))
}

/// Answers "what kind of photon detector is this channel?".
///
/// The DigitizerPool uses this to pick a digitization algorithm per channel.
pub trait ChannelTypeLookup: Send + Sync {
    /// The detector type of a channel, or None if the channel is unknown
    fn pd_type(&self, channel: u32) -> Option<PdType>;

    /// Number of channels described
    fn size(&self) -> usize;
}

/// PdChannelMap maps readout channel numbers to photon detector types.
///
/// The map is read from a CSV file with a header row followed by one `channel,pd_type`
/// row per channel. If no file is given, the map bundled with the library is used.
#[derive(Debug, Clone, Default)]
pub struct PdChannelMap {
    map: FxHashMap<u32, PdType>,
}

impl PdChannelMap {
    /// Create a new PdChannelMap
    /// If the path is None, we load the default that is bundled with the library
    pub fn new(path: Option<&Path>) -> Result<Self, ChannelMapError> {
        let mut contents = String::new();
        if let Some(p) = path {
            let mut file = File::open(p)?;
            file.read_to_string(&mut contents)?;
        } else {
            contents = load_default_map();
        }
        Self::from_csv(&contents)
    }

    /// Parse the map from CSV text (header included)
    pub fn from_csv(contents: &str) -> Result<Self, ChannelMapError> {
        let mut pm = PdChannelMap::default();

        let mut lines = contents.lines();
        lines.next(); // Skip the header
        for line in lines.filter(|l| !l.trim().is_empty()) {
            let entries: Vec<&str> = line.split_terminator(',').collect();
            if entries.len() != ENTRIES_PER_LINE {
                return Err(ChannelMapError::BadFileFormat);
            }

            let channel: u32 = entries[0].trim().parse()?;
            let pd_type: PdType = entries[1].parse()?;
            if pm.map.insert(channel, pd_type).is_some() {
                return Err(ChannelMapError::DuplicateChannel(channel));
            }
        }

        Ok(pm)
    }

    /// Build a map directly from a list of types, where the channel is the list index
    pub fn from_types(types: &[PdType]) -> Self {
        Self {
            map: types
                .iter()
                .enumerate()
                .map(|(ch, pd)| (ch as u32, *pd))
                .collect(),
        }
    }

    /// Does any channel in [0, n_channels) use the given kind of device
    pub fn has_kind(&self, kind: DeviceKind, n_channels: usize) -> bool {
        (0..n_channels as u32).any(|ch| self.pd_type(ch).map(|pd| pd.kind()) == Some(kind))
    }

    /// The first channel in [0, n_channels) which has no entry, if any
    pub fn first_missing(&self, n_channels: usize) -> Option<u32> {
        (0..n_channels as u32).find(|ch| !self.map.contains_key(ch))
    }
}

impl ChannelTypeLookup for PdChannelMap {
    fn pd_type(&self, channel: u32) -> Option<PdType> {
        self.map.get(&channel).copied()
    }

    fn size(&self) -> usize {
        self.map.len()
    }
}

//Unit tests
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_map() {
        let map = match PdChannelMap::new(None) {
            Ok(m) => m,
            Err(_) => {
                panic!();
            }
        };
        assert_eq!(map.size(), 312);
        assert_eq!(map.pd_type(0), Some(PdType::PmtCoated));
        assert_eq!(map.pd_type(4), Some(PdType::PmtUncoated));
        assert_eq!(map.pd_type(7), Some(PdType::XarapucaVis));
        assert_eq!(map.pd_type(312), None);
        assert!(map.first_missing(312).is_none());
        assert!(map.has_kind(DeviceKind::Arapuca, 312));
    }

    #[test]
    fn test_bad_rows() {
        assert!(matches!(
            PdChannelMap::from_csv("channel,pd_type\n0,pmt_coated,extra\n"),
            Err(ChannelMapError::BadFileFormat)
        ));
        assert!(matches!(
            PdChannelMap::from_csv("channel,pd_type\n0,pmt_coated\n0,xarapuca_vis\n"),
            Err(ChannelMapError::DuplicateChannel(0))
        ));
        assert!(matches!(
            PdChannelMap::from_csv("channel,pd_type\n0,silicon\n"),
            Err(ChannelMapError::BadPdType(_))
        ));
        assert!(matches!(
            PdChannelMap::from_csv("channel,pd_type\nzero,pmt_coated\n"),
            Err(ChannelMapError::ParsingError(_))
        ));
    }

    #[test]
    fn test_missing_channels() {
        let map =
            PdChannelMap::from_csv("channel,pd_type\n0,pmt_coated\n2,arapuca_vis\n").unwrap();
        assert_eq!(map.first_missing(3), Some(1));
        assert!(!map.has_kind(DeviceKind::Arapuca, 2));
        assert!(map.has_kind(DeviceKind::Arapuca, 3));
    }
}
