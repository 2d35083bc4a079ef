use fxhash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::constants::{DEFAULT_POSTTRIGGER_SAMPLES, DEFAULT_PRETRIGGER_SAMPLES};
use super::digitizer::SampleWindow;
use super::waveform::OpDetWaveform;

/// Supplies the trigger locations of a channel.
///
/// The trigger decision itself happens elsewhere; the pool only consumes its result
/// when cutting readout windows out of the full waveforms.
pub trait TriggerLocationProvider: Send + Sync {
    /// Sample offsets (into the full waveform) at which `channel` was triggered
    fn trigger_offsets(&self, channel: u32, window: &SampleWindow) -> Vec<usize>;
}

/// How many samples to keep around each trigger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadoutWindow {
    pub pretrigger: usize,
    pub posttrigger: usize,
}

impl Default for ReadoutWindow {
    fn default() -> Self {
        Self {
            pretrigger: DEFAULT_PRETRIGGER_SAMPLES,
            posttrigger: DEFAULT_POSTTRIGGER_SAMPLES,
        }
    }
}

/// Trigger section of the configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TriggerConfig {
    /// Trigger times (ns) applied to every channel
    pub trigger_times_ns: Vec<f64>,
    /// Extra trigger times (ns) for specific channels
    pub channel_trigger_times_ns: BTreeMap<u32, Vec<f64>>,
    pub readout: ReadoutWindow,
}

/// Trigger locations given up front as times, shared by all units
#[derive(Debug, Clone, Default)]
pub struct FixedTriggerLocations {
    global: Vec<f64>,
    per_channel: FxHashMap<u32, Vec<f64>>,
}

impl FixedTriggerLocations {
    pub fn new(config: &TriggerConfig) -> Self {
        Self {
            global: config.trigger_times_ns.clone(),
            per_channel: config
                .channel_trigger_times_ns
                .iter()
                .map(|(ch, times)| (*ch, times.clone()))
                .collect(),
        }
    }
}

impl TriggerLocationProvider for FixedTriggerLocations {
    fn trigger_offsets(&self, channel: u32, window: &SampleWindow) -> Vec<usize> {
        let extra = self.per_channel.get(&channel).map(|v| v.as_slice()).unwrap_or(&[]);
        let mut offsets: Vec<usize> = self
            .global
            .iter()
            .chain(extra.iter())
            .map(|time| window.sample_of(*time))
            .filter(|sample| *sample >= 0.0 && *sample < window.n_samples as f64)
            .map(|sample| sample.floor() as usize)
            .collect();
        offsets.sort_unstable();
        offsets.dedup();
        offsets
    }
}

/// Cut the readout windows around `offsets` out of a full waveform.
///
/// Each trigger keeps `[offset - pretrigger, offset + posttrigger)` clipped to the
/// waveform. Windows of the same channel that overlap or touch are merged so no
/// sample is read out twice. Timestamps are shifted to the first kept sample.
pub fn extract_windows(
    waveform: &OpDetWaveform,
    offsets: &[usize],
    readout: &ReadoutWindow,
    window: &SampleWindow,
) -> Vec<OpDetWaveform> {
    let len = waveform.adcs.len();
    let mut spans: Vec<(usize, usize)> = offsets
        .iter()
        .filter(|offset| **offset < len)
        .map(|offset| {
            (
                offset.saturating_sub(readout.pretrigger),
                (offset + readout.posttrigger).min(len),
            )
        })
        .filter(|(start, stop)| start < stop)
        .collect();
    spans.sort_unstable();

    let mut merged: Vec<(usize, usize)> = Vec::with_capacity(spans.len());
    for (start, stop) in spans {
        match merged.last_mut() {
            Some(last) if start <= last.1 => last.1 = last.1.max(stop),
            _ => merged.push((start, stop)),
        }
    }

    merged
        .into_iter()
        .map(|(start, stop)| {
            let shift = (start as f64 / window.sampling).round() as i64;
            OpDetWaveform::new(
                waveform.channel,
                waveform.timestamp + shift,
                waveform.adcs[start..stop].to_vec(),
            )
        })
        .collect()
}
