//! Per-device digitization algorithms.
//!
//! The DigitizerPool only needs the [`DeviceDigitizer`] trait: given a channel's merged
//! photon record and the sampling window, produce the ADC samples. Two reference
//! algorithms are provided, one for PMT-like devices and one for (X)Arapuca-like
//! devices. They share a simple pulse model: every detected photoelectron adds a
//! two-exponential pulse on top of a baseline, followed by gaussian electronics noise
//! and ADC saturation. They are deliberately simple and are not a detector response model.
use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::constants::{ADC_SATURATION, PULSE_TEMPLATE_FALL_TIMES};
use super::error::DigitizerError;
use super::pd_type::{DeviceKind, PdType};
use super::photon::PhotonRecord;

/// Random number generator handed to the digitizers
pub type DigiRng = ChaCha8Rng;

/// Seed the generator for one channel of one unit.
///
/// The stream only depends on the base seed, the unit and the channel, never on
/// which worker happens to digitize the channel, so results are reproducible for
/// any thread count.
pub fn channel_rng(base_seed: u64, unit_id: u64, channel: u32) -> DigiRng {
    let seed = base_seed
        .wrapping_add(unit_id << 32)
        .wrapping_add(channel as u64);
    ChaCha8Rng::seed_from_u64(seed)
}

/// The time window every waveform of a unit spans
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampleWindow {
    /// Time of the first sample (ns)
    pub start_ns: f64,
    /// Sampling frequency (GHz, i.e. samples per ns)
    pub sampling: f64,
    pub n_samples: usize,
}

impl SampleWindow {
    /// Fractional sample index of a time in ns
    pub fn sample_of(&self, time_ns: f64) -> f64 {
        (time_ns - self.start_ns) * self.sampling
    }

    /// Time of a sample in ns
    pub fn time_of(&self, sample: usize) -> f64 {
        self.start_ns + sample as f64 / self.sampling
    }
}

/// A digitization algorithm for one family of photon detectors.
///
/// Implementations are shared by every worker thread of the pool, so they must not
/// keep per-call state; randomness comes only from the `rng` they are handed.
pub trait DeviceDigitizer: Send + Sync {
    /// Produce exactly `window.n_samples` ADC samples for `channel`.
    ///
    /// An empty record must still produce a baseline (plus noise) waveform.
    fn digitize(
        &self,
        channel: u32,
        pd_type: PdType,
        record: &PhotonRecord,
        window: &SampleWindow,
        rng: &mut DigiRng,
    ) -> Result<Vec<u16>, DigitizerError>;
}

/// Settings of the PMT-like reference digitizer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PmtConfig {
    /// Baseline in ADC counts; PMT pulses go down from it
    pub baseline: f64,
    /// Peak height of a single photoelectron in ADC counts
    pub pe_amplitude: f64,
    pub rise_time_ns: f64,
    pub fall_time_ns: f64,
    /// Delay between photon arrival and the start of the pulse
    pub transit_time_ns: f64,
    pub qe_coated: f64,
    pub qe_uncoated: f64,
    pub noise_rms: f64,
}

impl Default for PmtConfig {
    fn default() -> Self {
        Self {
            baseline: 8000.0,
            pe_amplitude: 25.0,
            rise_time_ns: 3.8,
            fall_time_ns: 13.7,
            transit_time_ns: 55.1,
            qe_coated: 0.03,
            qe_uncoated: 0.03,
            noise_rms: 2.6,
        }
    }
}

/// Settings of the Arapuca-like reference digitizer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArapucaConfig {
    /// Baseline in ADC counts; Arapuca pulses go up from it
    pub baseline: f64,
    pub pe_amplitude: f64,
    pub rise_time_ns: f64,
    pub fall_time_ns: f64,
    pub transit_time_ns: f64,
    pub efficiency_vuv: f64,
    pub efficiency_vis: f64,
    pub noise_rms: f64,
}

impl Default for ArapucaConfig {
    fn default() -> Self {
        Self {
            baseline: 1500.0,
            pe_amplitude: 12.0,
            rise_time_ns: 9.0,
            fall_time_ns: 450.0,
            transit_time_ns: 0.0,
            efficiency_vuv: 0.021,
            efficiency_vis: 0.021,
            noise_rms: 2.0,
        }
    }
}

/// Single photoelectron response sampled at the digitizer frequency
#[derive(Debug, Clone)]
struct PulseShape {
    template: Vec<f64>,
    /// +1 for positive pulses, -1 for negative pulses
    polarity: f64,
}

impl PulseShape {
    fn new(amplitude: f64, rise_ns: f64, fall_ns: f64, sampling: f64, polarity: f64) -> Self {
        let length = (PULSE_TEMPLATE_FALL_TIMES * fall_ns * sampling).ceil().max(1.0) as usize;
        let shape = |t: f64| {
            if rise_ns > 0.0 && rise_ns != fall_ns {
                (-t / fall_ns).exp() - (-t / rise_ns).exp()
            } else {
                (-t / fall_ns).exp()
            }
        };
        let raw: Vec<f64> = (0..length).map(|k| shape(k as f64 / sampling)).collect();
        let peak = raw.iter().copied().fold(0.0, f64::max);
        let scale = if peak > 0.0 { amplitude / peak } else { 0.0 };
        Self {
            template: raw.into_iter().map(|v| v * scale).collect(),
            polarity,
        }
    }

    /// Add `n_pe` pulses starting at fractional sample `start`
    fn add_to(&self, signal: &mut [f64], start: f64, n_pe: u32) {
        let first = start.floor() as i64;
        for (k, value) in self.template.iter().enumerate() {
            let idx = first + k as i64;
            if idx < 0 {
                continue;
            }
            let Some(sample) = signal.get_mut(idx as usize) else {
                break;
            };
            *sample += self.polarity * value * n_pe as f64;
        }
    }
}

/// Keep each of `count` photons with probability `efficiency`
fn thin(count: u32, efficiency: f64, rng: &mut DigiRng) -> u32 {
    if efficiency >= 1.0 {
        return count;
    }
    if efficiency <= 0.0 {
        return 0;
    }
    (0..count).filter(|_| rng.gen::<f64>() < efficiency).count() as u32
}

/// Standard normal deviate (Box-Muller)
fn gaussian(rng: &mut DigiRng) -> f64 {
    let u1: f64 = 1.0 - rng.gen::<f64>();
    let u2: f64 = rng.gen::<f64>();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}

/// Shared synthesis: pulses, baseline, noise, saturation
fn synthesize(
    shape: &PulseShape,
    baseline: f64,
    noise_rms: f64,
    transit_time_ns: f64,
    efficiency: f64,
    record: &PhotonRecord,
    window: &SampleWindow,
    rng: &mut DigiRng,
) -> Vec<u16> {
    let mut signal = vec![0.0; window.n_samples];
    for (time, count) in record.hits() {
        let n_pe = thin(count, efficiency, rng);
        if n_pe == 0 {
            continue;
        }
        let start = window.sample_of(time + transit_time_ns);
        if start >= window.n_samples as f64 {
            continue;
        }
        shape.add_to(&mut signal, start, n_pe);
    }

    signal
        .into_iter()
        .map(|value| {
            let noise = if noise_rms > 0.0 {
                noise_rms * gaussian(rng)
            } else {
                0.0
            };
            (baseline + value + noise)
                .round()
                .clamp(0.0, ADC_SATURATION as f64) as u16
        })
        .collect()
}

/// Reference digitizer for PMT-like devices
#[derive(Debug, Clone)]
pub struct PmtDigitizer {
    config: PmtConfig,
    shape: PulseShape,
}

impl PmtDigitizer {
    pub fn new(config: &PmtConfig, sampling: f64) -> Self {
        Self {
            config: config.clone(),
            shape: PulseShape::new(
                config.pe_amplitude,
                config.rise_time_ns,
                config.fall_time_ns,
                sampling,
                -1.0,
            ),
        }
    }
}

impl DeviceDigitizer for PmtDigitizer {
    fn digitize(
        &self,
        channel: u32,
        pd_type: PdType,
        record: &PhotonRecord,
        window: &SampleWindow,
        rng: &mut DigiRng,
    ) -> Result<Vec<u16>, DigitizerError> {
        let efficiency = match pd_type {
            PdType::PmtCoated => self.config.qe_coated,
            PdType::PmtUncoated => self.config.qe_uncoated,
            other => {
                return Err(DigitizerError::Failed(
                    channel,
                    format!("PMT digitizer cannot handle {other} channels"),
                ))
            }
        };
        Ok(synthesize(
            &self.shape,
            self.config.baseline,
            self.config.noise_rms,
            self.config.transit_time_ns,
            efficiency,
            record,
            window,
            rng,
        ))
    }
}

/// Reference digitizer for Arapuca-like devices
#[derive(Debug, Clone)]
pub struct ArapucaDigitizer {
    config: ArapucaConfig,
    shape: PulseShape,
}

impl ArapucaDigitizer {
    pub fn new(config: &ArapucaConfig, sampling: f64) -> Self {
        Self {
            config: config.clone(),
            shape: PulseShape::new(
                config.pe_amplitude,
                config.rise_time_ns,
                config.fall_time_ns,
                sampling,
                1.0,
            ),
        }
    }
}

impl DeviceDigitizer for ArapucaDigitizer {
    fn digitize(
        &self,
        channel: u32,
        pd_type: PdType,
        record: &PhotonRecord,
        window: &SampleWindow,
        rng: &mut DigiRng,
    ) -> Result<Vec<u16>, DigitizerError> {
        let efficiency = match pd_type {
            PdType::XarapucaVuv | PdType::ArapucaVuv => self.config.efficiency_vuv,
            PdType::XarapucaVis | PdType::ArapucaVis => self.config.efficiency_vis,
            other => {
                return Err(DigitizerError::Failed(
                    channel,
                    format!("Arapuca digitizer cannot handle {other} channels"),
                ))
            }
        };
        Ok(synthesize(
            &self.shape,
            self.config.baseline,
            self.config.noise_rms,
            self.config.transit_time_ns,
            efficiency,
            record,
            window,
            rng,
        ))
    }
}

/// The digitizers available to a pool, one per device kind
#[derive(Clone, Default)]
pub struct DigitizerSet {
    pub pmt: Option<Arc<dyn DeviceDigitizer>>,
    pub arapuca: Option<Arc<dyn DeviceDigitizer>>,
}

impl DigitizerSet {
    /// Build the reference digitizers from their (optional) configurations
    pub fn from_configs(
        pmt: Option<&PmtConfig>,
        arapuca: Option<&ArapucaConfig>,
        sampling: f64,
    ) -> Self {
        Self {
            pmt: pmt.map(|c| Arc::new(PmtDigitizer::new(c, sampling)) as Arc<dyn DeviceDigitizer>),
            arapuca: arapuca
                .map(|c| Arc::new(ArapucaDigitizer::new(c, sampling)) as Arc<dyn DeviceDigitizer>),
        }
    }

    pub fn for_kind(&self, kind: DeviceKind) -> Option<&dyn DeviceDigitizer> {
        match kind {
            DeviceKind::Pmt => self.pmt.as_deref(),
            DeviceKind::Arapuca => self.arapuca.as_deref(),
        }
    }
}

impl std::fmt::Debug for DigitizerSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DigitizerSet")
            .field("pmt", &self.pmt.is_some())
            .field("arapuca", &self.arapuca.is_some())
            .finish()
    }
}
