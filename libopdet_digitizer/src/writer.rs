use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use super::builder::ChannelFault;
use super::error::WriterError;
use super::pool::DigitizedUnit;
use super::waveform::OpDetWaveform;

/// This is the version of the output format
const FORMAT_VERSION: &str = "1.0";

/// One document of the output stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitRecord {
    pub unit_id: u64,
    pub waveforms: Vec<OpDetWaveform>,
    pub faults: Vec<ChannelFault>,
}

/// Writes the triggered waveforms of every unit as a YAML stream, one document per unit.
///
/// The first document is a small header carrying the format version.
#[derive(Debug)]
pub struct WaveformWriter {
    file: BufWriter<File>,
    path: PathBuf,
    n_units: u64,
    n_waveforms: u64,
    n_faults: u64,
}

impl WaveformWriter {
    /// Create the writer, opening a file at path and writing the header document
    pub fn new(path: &Path) -> Result<Self, WriterError> {
        let mut file = BufWriter::new(File::create(path)?);
        let version = format!("{}:{}", env!("CARGO_PKG_NAME"), FORMAT_VERSION);
        writeln!(file, "---\nversion: {version}")?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
            n_units: 0,
            n_waveforms: 0,
            n_faults: 0,
        })
    }

    /// Append the triggered waveforms and faults of a unit
    pub fn write_unit(&mut self, unit: &DigitizedUnit) -> Result<(), WriterError> {
        let record = UnitRecord {
            unit_id: unit.unit_id,
            waveforms: unit.flat_triggered().cloned().collect(),
            faults: unit.faults.clone(),
        };
        let yaml_str = serde_yaml::to_string(&record)?;
        writeln!(self.file, "---")?;
        self.file.write_all(yaml_str.as_bytes())?;

        self.n_units += 1;
        self.n_waveforms += record.waveforms.len() as u64;
        self.n_faults += record.faults.len() as u64;
        Ok(())
    }

    /// Flush everything, consume the writer
    pub fn close(mut self) -> Result<(), WriterError> {
        self.file.flush()?;
        if self.n_faults > 0 {
            spdlog::warn!(
                "{} channel faults were recorded in {}",
                self.n_faults,
                self.path.display()
            );
        }
        spdlog::info!(
            "{} units with {} waveforms written to {}",
            self.n_units,
            self.n_waveforms,
            self.path.display()
        );
        Ok(())
    }
}

/// Read back the unit documents of a file written by WaveformWriter
pub fn read_unit_records(path: &Path) -> Result<Vec<UnitRecord>, WriterError> {
    let yaml_str = std::fs::read_to_string(path)?;
    let mut records = Vec::new();
    // Skip the header document
    for document in serde_yaml::Deserializer::from_str(&yaml_str).skip(1) {
        records.push(UnitRecord::deserialize(document)?);
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::Phase;

    #[test]
    fn test_write_and_read_back() {
        let path = std::env::temp_dir().join("opdet_digitizer_writer_test.yml");
        let unit = DigitizedUnit {
            unit_id: 9,
            triggered: vec![
                vec![OpDetWaveform::new(0, -500, vec![1, 2, 3])],
                vec![],
                vec![
                    OpDetWaveform::new(2, -500, vec![4]),
                    OpDetWaveform::new(2, 100, vec![5, 6]),
                ],
            ],
            faults: vec![ChannelFault {
                channel: 1,
                phase: Phase::Build,
                message: String::from("bad gain"),
            }],
            ..Default::default()
        };

        let mut writer = WaveformWriter::new(&path).unwrap();
        writer.write_unit(&unit).unwrap();
        writer
            .write_unit(&DigitizedUnit {
                unit_id: 10,
                ..Default::default()
            })
            .unwrap();
        writer.close().unwrap();

        let records = read_unit_records(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].unit_id, 9);
        assert_eq!(records[0].waveforms.len(), 3);
        assert_eq!(records[0].waveforms[2].adcs, vec![5, 6]);
        assert_eq!(records[0].faults[0].phase, Phase::Build);
        assert_eq!(records[1].unit_id, 10);
        assert!(records[1].waveforms.is_empty());
    }
}
