use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::channel_map::{ChannelTypeLookup, PdChannelMap};
use super::constants::{DEFAULT_ENABLE_WINDOW_US, DEFAULT_SAMPLING_GHZ, DEFAULT_SEED, NS_PER_US};
use super::digitizer::{ArapucaConfig, DigitizerSet, PmtConfig, SampleWindow};
use super::error::ConfigError;
use super::pd_type::DeviceKind;
use super::photon::PhotonForm;
use super::pool::PoolSettings;
use super::trigger::TriggerConfig;

/// Structure representing the application configuration. Contains pathing and digitization
/// settings. Configs are seralizable and deserializable to YAML using serde and serde_yaml
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// YAML file of processing units
    pub input_path: PathBuf,
    /// YAML stream the triggered waveforms are written to
    pub output_path: PathBuf,
    pub channel_map_path: Option<PathBuf>,
    /// Digitize only the first n channels; all channels of the map when null
    pub n_channels: Option<usize>,
    pub n_threads: usize,
    pub photon_form: PhotonForm,
    /// Start and stop of the digitized window relative to the unit time (us)
    pub enable_window_us: [f64; 2],
    pub sampling_ghz: f64,
    /// Derived from the enable window and the sampling when null
    pub n_samples: Option<usize>,
    pub seed: u64,
    pub fail_on_fault: bool,
    pub pmt: Option<PmtConfig>,
    pub arapuca: Option<ArapucaConfig>,
    pub trigger: TriggerConfig,
}

impl Default for Config {
    /// Generate a new Config object. Paths will be empty/invalid
    fn default() -> Self {
        Self {
            input_path: PathBuf::from("None"),
            output_path: PathBuf::from("None"),
            channel_map_path: None,
            n_channels: None,
            n_threads: 1,
            photon_form: PhotonForm::Lite,
            enable_window_us: DEFAULT_ENABLE_WINDOW_US,
            sampling_ghz: DEFAULT_SAMPLING_GHZ,
            n_samples: None,
            seed: DEFAULT_SEED,
            fail_on_fault: false,
            pmt: Some(PmtConfig::default()),
            arapuca: Some(ArapucaConfig::default()),
            trigger: TriggerConfig {
                trigger_times_ns: vec![0.0],
                ..Default::default()
            },
        }
    }
}

impl Config {
    /// Read the configuration in a YAML file
    /// Returns a Config if successful
    pub fn read_config_file(config_path: &Path) -> Result<Self, ConfigError> {
        if !config_path.exists() {
            return Err(ConfigError::BadFilePath(config_path.to_path_buf()));
        }

        let yaml_str = std::fs::read_to_string(config_path)?;

        Ok(serde_yaml::from_str::<Self>(&yaml_str)?)
    }

    /// Write the configuration to a YAML file
    pub fn write_config_file(&self, config_path: &Path) -> Result<(), ConfigError> {
        let yaml_str = serde_yaml::to_string(self)?;
        std::fs::write(config_path, yaml_str)?;
        Ok(())
    }

    pub fn is_n_threads_valid(&self) -> bool {
        self.n_threads >= 1
    }

    /// Load the channel map, falling back to the bundled map
    pub fn load_channel_map(&self) -> Result<PdChannelMap, ConfigError> {
        Ok(PdChannelMap::new(self.channel_map_path.as_deref())?)
    }

    /// Number of channels to digitize given the loaded map
    pub fn channel_count(&self, map: &PdChannelMap) -> usize {
        self.n_channels.unwrap_or(map.size())
    }

    /// The window every waveform spans
    pub fn sample_window(&self) -> Result<SampleWindow, ConfigError> {
        let [start, stop] = self.enable_window_us;
        if !(start.is_finite() && stop.is_finite() && start < stop) {
            return Err(ConfigError::BadEnableWindow(start, stop));
        }
        if !(self.sampling_ghz.is_finite() && self.sampling_ghz > 0.0) {
            return Err(ConfigError::BadSampling(self.sampling_ghz));
        }
        let n_samples = match self.n_samples {
            Some(n) => n,
            None => ((stop - start) * NS_PER_US * self.sampling_ghz).ceil() as usize,
        };
        if n_samples == 0 {
            return Err(ConfigError::ZeroSamples);
        }
        Ok(SampleWindow {
            start_ns: start * NS_PER_US,
            sampling: self.sampling_ghz,
            n_samples,
        })
    }

    /// Build the configured digitizers. Sections without matching channels are ignored.
    pub fn digitizers(&self, map: &PdChannelMap) -> DigitizerSet {
        let n_channels = self.channel_count(map);
        let pmt = self
            .pmt
            .as_ref()
            .filter(|_| map.has_kind(DeviceKind::Pmt, n_channels));
        let arapuca = self
            .arapuca
            .as_ref()
            .filter(|_| map.has_kind(DeviceKind::Arapuca, n_channels));
        if self.pmt.is_some() && pmt.is_none() {
            spdlog::info!("No pmt channels in the map; ignoring the pmt section");
        }
        if self.arapuca.is_some() && arapuca.is_none() {
            spdlog::info!("No arapuca channels in the map; ignoring the arapuca section");
        }
        DigitizerSet::from_configs(pmt, arapuca, self.sampling_ghz)
    }

    /// Everything the DigitizerPool needs, checked against the map
    pub fn pool_settings(&self, map: &PdChannelMap) -> Result<PoolSettings, ConfigError> {
        if !self.is_n_threads_valid() {
            return Err(ConfigError::ZeroWorkers);
        }
        let n_channels = self.channel_count(map);
        if n_channels == 0 {
            return Err(ConfigError::ZeroChannels);
        }
        if let Some(missing) = map.first_missing(n_channels) {
            spdlog::error!("Channel {missing} is not in the channel map");
            return Err(ConfigError::ChannelsOutsideMap(n_channels, map.size()));
        }
        Ok(PoolSettings {
            n_workers: self.n_threads,
            n_channels,
            window: self.sample_window()?,
            readout: self.trigger.readout,
            photon_form: self.photon_form,
            seed: self.seed,
            fail_on_fault: self.fail_on_fault,
        })
    }
}
