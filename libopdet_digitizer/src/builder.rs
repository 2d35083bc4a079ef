use serde::{Deserialize, Serialize};
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

use super::channel_map::ChannelTypeLookup;
use super::digitizer::{channel_rng, DigitizerSet, SampleWindow};
use super::error::DigitizerError;
use super::partition::ChannelRange;
use super::photon_index::PhotonIndex;
use super::trigger::{extract_windows, ReadoutWindow, TriggerLocationProvider};
use super::waveform::{OpDetWaveform, SharedBuffer};

/// Which half of a unit's work a dispatch asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Synthesize the full waveform of every channel
    Build,
    /// Cut the trigger windows out of the full waveforms
    ApplyTrigger,
}

/// A channel whose processing failed. The channel is skipped, not the unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelFault {
    pub channel: u32,
    pub phase: Phase,
    pub message: String,
}

/// Counts, per buffer index, how many times it was written and by which worker.
#[derive(Debug)]
pub struct IndexAudit {
    writes: Vec<AtomicU32>,
    owners: Vec<AtomicUsize>,
}

impl IndexAudit {
    pub fn new(len: usize) -> Self {
        Self {
            writes: (0..len).map(|_| AtomicU32::new(0)).collect(),
            owners: (0..len).map(|_| AtomicUsize::new(usize::MAX)).collect(),
        }
    }

    fn record(&self, idx: usize, worker: usize) {
        self.writes[idx].fetch_add(1, Ordering::Relaxed);
        self.owners[idx].store(worker, Ordering::Relaxed);
    }

    /// Snapshot of the audit. Only meaningful once the unit's barrier has completed.
    pub fn snapshot(&self) -> OwnershipAudit {
        OwnershipAudit {
            writes: self.writes.iter().map(|w| w.load(Ordering::Relaxed)).collect(),
            owners: self
                .owners
                .iter()
                .map(|o| match o.load(Ordering::Relaxed) {
                    usize::MAX => None,
                    worker => Some(worker),
                })
                .collect(),
        }
    }
}

/// Who wrote each index of a buffer, and how many times
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OwnershipAudit {
    pub writes: Vec<u32>,
    pub owners: Vec<Option<usize>>,
}

impl OwnershipAudit {
    /// True if every index was written exactly once
    pub fn written_once(&self) -> bool {
        self.writes.iter().all(|w| *w == 1)
    }
}

/// Everything the workers share for a single processing unit.
///
/// Created by the orchestrator before the unit is dispatched and handed to every
/// worker behind an `Arc`. Workers drop their handle before signalling finish, so
/// once the rendezvous returns the orchestrator owns the context alone again.
#[derive(Debug)]
pub struct UnitContext {
    pub unit_id: u64,
    pub index: PhotonIndex,
    pub waveforms: SharedBuffer<OpDetWaveform>,
    pub triggered: SharedBuffer<Vec<OpDetWaveform>>,
    /// One fault list per worker
    pub faults: SharedBuffer<Vec<ChannelFault>>,
    pub build_audit: IndexAudit,
    pub trigger_audit: IndexAudit,
    /// Workers that completed the current phase
    pub completed: AtomicUsize,
}

impl UnitContext {
    pub fn new(unit_id: u64, index: PhotonIndex, n_channels: usize, n_workers: usize) -> Self {
        Self {
            unit_id,
            index,
            waveforms: SharedBuffer::new(n_channels),
            triggered: SharedBuffer::new(n_channels),
            faults: SharedBuffer::new(n_workers),
            build_audit: IndexAudit::new(n_channels),
            trigger_audit: IndexAudit::new(n_channels),
            completed: AtomicUsize::new(0),
        }
    }

    /// Number of faults recorded so far. Requires exclusive access.
    pub fn n_faults(&mut self) -> usize {
        self.faults.as_slice().iter().map(|f| f.len()).sum()
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        String::from("unknown panic")
    }
}

/// The per-worker half of the pool: turns one ChannelRange of a unit into waveforms.
///
/// One builder is shared by all workers. It only ever writes the indices of the range
/// it is given, so workers with disjoint ranges never touch the same buffer slot.
#[derive(Clone)]
pub struct WaveformBuilder {
    pub(crate) map: Arc<dyn ChannelTypeLookup>,
    pub(crate) digitizers: DigitizerSet,
    pub(crate) triggers: Arc<dyn TriggerLocationProvider>,
    pub(crate) window: SampleWindow,
    pub(crate) readout: ReadoutWindow,
    pub(crate) seed: u64,
}

impl WaveformBuilder {
    pub fn new(
        map: Arc<dyn ChannelTypeLookup>,
        digitizers: DigitizerSet,
        triggers: Arc<dyn TriggerLocationProvider>,
        window: SampleWindow,
        readout: ReadoutWindow,
        seed: u64,
    ) -> Self {
        Self {
            map,
            digitizers,
            triggers,
            window,
            readout,
            seed,
        }
    }

    pub fn window(&self) -> &SampleWindow {
        &self.window
    }

    fn timestamp(&self) -> i64 {
        self.window.start_ns.round() as i64
    }

    /// Digitize a single channel of a unit
    pub fn digitize_channel(
        &self,
        channel: u32,
        index: &PhotonIndex,
        unit_id: u64,
    ) -> Result<OpDetWaveform, DigitizerError> {
        let pd_type = self
            .map
            .pd_type(channel)
            .ok_or(DigitizerError::UnknownChannel(channel))?;
        let digitizer = self.digitizers.for_kind(pd_type.kind()).ok_or_else(|| {
            DigitizerError::Failed(
                channel,
                format!("no {} digitizer configured", pd_type.kind().name()),
            )
        })?;
        let mut rng = channel_rng(self.seed, unit_id, channel);
        let adcs = digitizer.digitize(channel, pd_type, index.get(channel), &self.window, &mut rng)?;
        if adcs.len() != self.window.n_samples {
            return Err(DigitizerError::WrongSampleCount(
                channel,
                adcs.len(),
                self.window.n_samples,
            ));
        }
        Ok(OpDetWaveform::new(channel, self.timestamp(), adcs))
    }

    /// Phase 1: write one full waveform per channel of `range` into the unit's
    /// waveform buffer.
    ///
    /// A channel that fails (error or panic) gets an empty waveform and a fault entry
    /// in this worker's fault list.
    pub fn build_waveforms(&self, worker: usize, range: ChannelRange, unit: &UnitContext) {
        // SAFETY: the pool hands each worker its own range, ranges never overlap, and
        // the orchestrator does not look at the buffers until every worker signalled.
        let slots = unsafe { unit.waveforms.range_mut(range.start, range.count) };
        let faults = unsafe { &mut unit.faults.range_mut(worker, 1)[0] };

        for (slot, channel) in slots.iter_mut().zip(range.channels()) {
            let result = catch_unwind(AssertUnwindSafe(|| {
                self.digitize_channel(channel, &unit.index, unit.unit_id)
            }));
            *slot = match result {
                Ok(Ok(waveform)) => waveform,
                Ok(Err(e)) => {
                    faults.push(ChannelFault {
                        channel,
                        phase: Phase::Build,
                        message: e.to_string(),
                    });
                    OpDetWaveform::new(channel, self.timestamp(), Vec::new())
                }
                Err(payload) => {
                    faults.push(ChannelFault {
                        channel,
                        phase: Phase::Build,
                        message: format!("panicked: {}", panic_message(payload)),
                    });
                    OpDetWaveform::new(channel, self.timestamp(), Vec::new())
                }
            };
            unit.build_audit.record(channel as usize, worker);
        }
    }

    /// Phase 2: cut the trigger windows of every channel of `range` and append them to
    /// the channel's entry of the triggered buffer.
    ///
    /// Must only run after phase 1 finished on every worker; the pool's barrier
    /// guarantees it. Channels whose phase 1 failed produce nothing.
    pub fn apply_trigger_windows(&self, worker: usize, range: ChannelRange, unit: &UnitContext) {
        // SAFETY: as in build_waveforms; the full waveforms are only read in this
        // worker's own range and nobody writes them during phase 2.
        let waveforms = unsafe { unit.waveforms.range(range.start, range.count) };
        let slots = unsafe { unit.triggered.range_mut(range.start, range.count) };
        let faults = unsafe { &mut unit.faults.range_mut(worker, 1)[0] };

        for (waveform, slot) in waveforms.iter().zip(slots.iter_mut()) {
            let channel = waveform.channel;
            if !waveform.is_empty() {
                let result = catch_unwind(AssertUnwindSafe(|| {
                    let offsets = self.triggers.trigger_offsets(channel, &self.window);
                    extract_windows(waveform, &offsets, &self.readout, &self.window)
                }));
                match result {
                    Ok(mut windows) => slot.append(&mut windows),
                    Err(payload) => faults.push(ChannelFault {
                        channel,
                        phase: Phase::ApplyTrigger,
                        message: format!("panicked: {}", panic_message(payload)),
                    }),
                }
            }
            unit.trigger_audit.record(channel as usize, worker);
        }
    }
}

impl std::fmt::Debug for WaveformBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WaveformBuilder")
            .field("n_channels", &self.map.size())
            .field("digitizers", &self.digitizers)
            .field("window", &self.window)
            .field("readout", &self.readout)
            .field("seed", &self.seed)
            .finish()
    }
}
