use std::collections::VecDeque;
use std::path::Path;

use super::error::SourceError;
use super::photon::ProcessingUnit;

/// Where processing units come from
pub trait PhotonSource {
    /// The next unit, or None once the source is exhausted
    fn next_unit(&mut self) -> Result<Option<ProcessingUnit>, SourceError>;

    /// Number of units left, if known up front
    fn remaining(&self) -> Option<usize> {
        None
    }
}

/// Processing units read from a YAML file holding a list of units.
///
/// ```yml
/// - id: 0
///   collections:
///     - label: direct
///       records: !lite
///         - channel: 3
///           detected: {120: 2, 121: 1}
/// ```
#[derive(Debug, Clone, Default)]
pub struct YamlPhotonSource {
    units: VecDeque<ProcessingUnit>,
}

impl YamlPhotonSource {
    pub fn open(path: &Path) -> Result<Self, SourceError> {
        if !path.exists() {
            return Err(SourceError::BadFilePath(path.to_path_buf()));
        }
        let yaml_str = std::fs::read_to_string(path)?;
        let source = Self::from_yaml(&yaml_str)?;
        spdlog::info!(
            "Loaded {} processing units from {}",
            source.units.len(),
            path.display()
        );
        Ok(source)
    }

    pub fn from_yaml(yaml_str: &str) -> Result<Self, SourceError> {
        let units: Vec<ProcessingUnit> = serde_yaml::from_str(yaml_str)?;
        Ok(Self::from_units(units))
    }

    pub fn from_units(units: Vec<ProcessingUnit>) -> Self {
        Self {
            units: units.into(),
        }
    }
}

impl PhotonSource for YamlPhotonSource {
    fn next_unit(&mut self) -> Result<Option<ProcessingUnit>, SourceError> {
        Ok(self.units.pop_front())
    }

    fn remaining(&self) -> Option<usize> {
        Some(self.units.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::photon::{PhotonForm, PhotonRecords};

    #[test]
    fn test_read_units() {
        let yaml = r#"
- id: 0
  collections:
    - label: direct
      records: !lite
        - channel: 3
          detected: {120: 2, 121: 1}
    - label: reflected
      records: !full
        - channel: 4
          photons:
            - time: 10.5
- id: 7
  collections: []
"#;
        let mut source = YamlPhotonSource::from_yaml(yaml).unwrap();
        assert_eq!(source.remaining(), Some(2));

        let first = source.next_unit().unwrap().unwrap();
        assert_eq!(first.id, 0);
        assert_eq!(first.collections.len(), 2);
        assert_eq!(first.collections[1].form(), PhotonForm::Full);
        match &first.collections[0].records {
            PhotonRecords::Lite(records) => {
                assert_eq!(records[0].channel, 3);
                assert_eq!(records[0].detected.get(&120), Some(&2));
            }
            PhotonRecords::Full(_) => panic!("expected lite records"),
        }

        assert_eq!(source.next_unit().unwrap().unwrap().id, 7);
        assert!(source.next_unit().unwrap().is_none());
        assert_eq!(source.remaining(), Some(0));
    }

    #[test]
    fn test_bad_input() {
        assert!(matches!(
            YamlPhotonSource::open(Path::new("/no/such/units.yml")),
            Err(SourceError::BadFilePath(_))
        ));
        assert!(matches!(
            YamlPhotonSource::from_yaml("id: [oops"),
            Err(SourceError::ParsingError(_))
        ));
    }
}
