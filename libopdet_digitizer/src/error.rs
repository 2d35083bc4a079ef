use std::path::PathBuf;
use thiserror::Error;

use super::worker_status::UnitStatus;

#[derive(Debug, Error)]
pub enum PdTypeError {
    #[error("Found invalid photon detector type keyword: {0}")]
    InvalidKeyword(String),
}

#[derive(Debug, Error)]
pub enum ChannelMapError {
    #[error("PdChannelMap failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("PdChannelMap failed to parse an integer: {0}")]
    ParsingError(#[from] std::num::ParseIntError),
    #[error("PdChannelMap failed to parse a detector type: {0}")]
    BadPdType(#[from] PdTypeError),
    #[error("PdChannelMap was given a file with the incorrect format; most likely the number of columns is incorrect")]
    BadFileFormat,
    #[error("PdChannelMap found channel {0} more than once")]
    DuplicateChannel(u32),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration as file {0:?} does not exist")]
    BadFilePath(PathBuf),
    #[error("Config failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Config failed to parse YAML: {0}")]
    ParsingError(#[from] serde_yaml::Error),
    #[error("Config failed to load the channel map: {0}")]
    MapError(#[from] ChannelMapError),
    #[error("Config requested zero worker threads; at least one is required")]
    ZeroWorkers,
    #[error("Config describes zero channels; at least one is required")]
    ZeroChannels,
    #[error("Config requested {0} channels but the channel map only knows {1}")]
    ChannelsOutsideMap(usize, usize),
    #[error("Config has no {0} digitizer section, but the channel map contains {0} channels")]
    MissingAlgorithm(&'static str),
    #[error("Config has an invalid enable window [{0}, {1}] us")]
    BadEnableWindow(f64, f64),
    #[error("Config has an invalid sampling frequency {0} GHz")]
    BadSampling(f64),
    #[error("Config results in a waveform with zero samples")]
    ZeroSamples,
}

#[derive(Debug, Clone, Error)]
pub enum DigitizerError {
    #[error("Channel {0} has no photon detector type in the channel map")]
    UnknownChannel(u32),
    #[error("Digitizer for channel {0} returned {1} samples; expected {2}")]
    WrongSampleCount(u32, usize, usize),
    #[error("Digitizer for channel {0} failed: {1}")]
    Failed(u32, String),
}

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("DigitizerPool failed due to configuration error: {0}")]
    ConfigError(#[from] ConfigError),
    #[error("DigitizerPool failed to spawn worker thread {0}: {1}")]
    SpawnError(usize, std::io::Error),
    #[error("DigitizerPool was terminated; no further units can be processed")]
    Terminated,
    #[error("DigitizerPool has no digitized unit waiting for trigger extraction")]
    NoPendingUnit,
    #[error("DigitizerPool unit {0} failed with {1} channel fault(s)")]
    UnitFailed(u64, usize),
    #[error("DigitizerPool failed to join {0} worker thread(s)")]
    JoinError(usize),
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Could not open photon source because file {0:?} does not exist")]
    BadFilePath(PathBuf),
    #[error("Photon source failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Photon source failed to parse YAML: {0}")]
    ParsingError(#[from] serde_yaml::Error),
}

#[derive(Debug, Error)]
pub enum WriterError {
    #[error("WaveformWriter failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("WaveformWriter failed to convert to yaml: {0}")]
    ParsingError(#[from] serde_yaml::Error),
}

#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error("Processor failed due to Config error: {0}")]
    ConfigError(#[from] ConfigError),
    #[error("Processor failed due to DigitizerPool error: {0}")]
    PoolError(#[from] PoolError),
    #[error("Processor failed due to photon source error: {0}")]
    SourceError(#[from] SourceError),
    #[error("Processor failed due to WaveformWriter error: {0}")]
    WriterError(#[from] WriterError),
    #[error("Processor failed due to Send error: {0}")]
    SendError(#[from] std::sync::mpsc::SendError<UnitStatus>),
}
