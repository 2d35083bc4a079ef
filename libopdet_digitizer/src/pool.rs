//! The persistent digitization worker pool.
//!
//! A `DigitizerPool` owns N long-lived worker threads. Each processing unit goes through
//! two dispatches (phases): first every worker synthesizes the full waveforms of its
//! channel range, then every worker cuts the trigger windows out of them. A dispatch
//! works like this:
//!
//! 1. The orchestrator (the thread owning the pool) publishes the per-unit context and
//!    the phase, then issues one start token to every worker (N tokens in total).
//! 2. Each worker wakes on its token, checks the termination flag, runs the phase over
//!    its own channels and adds one finish token.
//! 3. The orchestrator takes N finish tokens at once. Only then does it read the
//!    buffers, switch phase or move to the next unit.
//!
//! Workers write straight into shared buffers without locks; each index has exactly one
//! writer because the channel ranges are disjoint.
//!
//! Start tokens are addressed: worker `i` only ever consumes tokens from its own gate,
//! so a fast worker can never take a slow worker's token and run its range twice.
//!
//! Termination: the flag is set once, then exactly one more start token is issued to
//! every worker (N in total). A worker that observes the flag adds a finish token and
//! exits, so neither an idle worker nor an orchestrator waiting on an in-flight unit is
//! left blocked. A unit interrupted this way is reported as `PoolError::Terminated`.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;

use super::builder::{ChannelFault, OwnershipAudit, Phase, UnitContext, WaveformBuilder};
use super::channel_map::ChannelTypeLookup;
use super::digitizer::{DigitizerSet, SampleWindow};
use super::error::{ConfigError, PoolError};
use super::partition::{create_ranges, ChannelRange};
use super::pd_type::DeviceKind;
use super::photon::{PhotonForm, ProcessingUnit};
use super::photon_index::PhotonIndex;
use super::semaphore::Semaphore;
use super::trigger::{ReadoutWindow, TriggerLocationProvider};
use super::waveform::OpDetWaveform;

/// Validated, pool-level settings
#[derive(Debug, Clone, PartialEq)]
pub struct PoolSettings {
    pub n_workers: usize,
    pub n_channels: usize,
    pub window: SampleWindow,
    pub readout: ReadoutWindow,
    pub photon_form: PhotonForm,
    pub seed: u64,
    /// Turn any channel fault into a failure of the whole unit
    pub fail_on_fault: bool,
}

impl PoolSettings {
    /// Check the settings against the channel map and the available digitizers
    pub fn validate(
        &self,
        map: &dyn ChannelTypeLookup,
        digitizers: &DigitizerSet,
    ) -> Result<(), ConfigError> {
        if self.n_workers == 0 {
            return Err(ConfigError::ZeroWorkers);
        }
        if self.n_channels == 0 {
            return Err(ConfigError::ZeroChannels);
        }
        if self.n_channels > map.size() {
            return Err(ConfigError::ChannelsOutsideMap(self.n_channels, map.size()));
        }
        if !(self.window.sampling > 0.0 && self.window.sampling.is_finite()) {
            return Err(ConfigError::BadSampling(self.window.sampling));
        }
        if self.window.n_samples == 0 {
            return Err(ConfigError::ZeroSamples);
        }
        for kind in [DeviceKind::Pmt, DeviceKind::Arapuca] {
            if digitizers.for_kind(kind).is_some() {
                continue;
            }
            let used = (0..self.n_channels as u32)
                .any(|ch| map.pd_type(ch).map(|pd| pd.kind()) == Some(kind));
            if used {
                return Err(ConfigError::MissingAlgorithm(kind.name()));
            }
        }
        if let Some(ch) = (0..self.n_channels as u32).find(|ch| map.pd_type(*ch).is_none()) {
            return Err(ConfigError::ChannelsOutsideMap(ch as usize + 1, map.size()));
        }
        Ok(())
    }
}

/// What one dispatch hands to the workers
#[derive(Clone)]
struct Dispatch {
    phase: Phase,
    unit: Arc<UnitContext>,
}

/// State shared by the orchestrator and every worker for the pool's lifetime
struct PoolShared {
    gates: Vec<Semaphore>,
    finish: Semaphore,
    terminate: AtomicBool,
    dispatch: Mutex<Option<Dispatch>>,
    builder: WaveformBuilder,
}

impl PoolShared {
    fn current_dispatch(&self) -> Option<Dispatch> {
        self.dispatch
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn publish(&self, dispatch: Option<Dispatch>) {
        *self.dispatch.lock().unwrap_or_else(PoisonError::into_inner) = dispatch;
    }

    fn is_terminated(&self) -> bool {
        self.terminate.load(Ordering::Acquire)
    }

    /// Set the flag and release every worker once. Only the first call does anything.
    fn request_termination(&self) -> bool {
        if self.terminate.swap(true, Ordering::AcqRel) {
            return false;
        }
        for gate in self.gates.iter() {
            gate.increment(1);
        }
        true
    }
}

/// The body of every worker thread
fn worker_loop(worker: usize, range: ChannelRange, shared: Arc<PoolShared>) {
    spdlog::debug!(
        "Digitizer worker {worker} owns channels [{}, {})",
        range.start,
        range.end()
    );
    loop {
        shared.gates[worker].decrement(1);
        if shared.is_terminated() {
            spdlog::debug!("Digitizer worker {worker} exiting");
            shared.finish.increment(1);
            return;
        }

        if let Some(Dispatch { phase, unit }) = shared.current_dispatch() {
            match phase {
                Phase::Build => shared.builder.build_waveforms(worker, range, &unit),
                Phase::ApplyTrigger => shared.builder.apply_trigger_windows(worker, range, &unit),
            }
            unit.completed.fetch_add(1, Ordering::AcqRel);
            // The orchestrator reclaims the context after the rendezvous
            drop(unit);
        }
        shared.finish.increment(1);
    }
}

/// Requests termination of a pool from any thread.
#[derive(Clone)]
pub struct TerminationHandle {
    shared: Arc<PoolShared>,
}

impl TerminationHandle {
    /// Stop the pool's workers after their current dispatch.
    ///
    /// Idempotent. Returns true only for the call that actually stopped the pool.
    pub fn request(&self) -> bool {
        self.shared.request_termination()
    }

    pub fn is_requested(&self) -> bool {
        self.shared.is_terminated()
    }
}

/// The result of running both phases on a unit
#[derive(Debug, Clone, Default)]
pub struct DigitizedUnit {
    pub unit_id: u64,
    /// One full waveform per channel, indexed by channel
    pub waveforms: Vec<OpDetWaveform>,
    /// The trigger windows of every channel, indexed by channel
    pub triggered: Vec<Vec<OpDetWaveform>>,
    /// Channels skipped in either phase, ordered by phase then channel
    pub faults: Vec<ChannelFault>,
    pub build_audit: OwnershipAudit,
    pub trigger_audit: OwnershipAudit,
}

impl DigitizedUnit {
    /// All trigger windows in channel order
    pub fn flat_triggered(&self) -> impl Iterator<Item = &OpDetWaveform> {
        self.triggered.iter().flatten()
    }
}

/// Orchestrator of the persistent digitization workers.
///
/// States: idle (workers parked on their gates), dispatched, awaiting completion, and
/// finally stopped. `digitize_unit` runs phase 1 and keeps the unit pending;
/// `extract_triggered` runs phase 2 on the pending unit and hands everything back.
pub struct DigitizerPool {
    shared: Arc<PoolShared>,
    workers: Vec<JoinHandle<()>>,
    ranges: Vec<ChannelRange>,
    settings: PoolSettings,
    pending: Option<UnitContext>,
}

impl DigitizerPool {
    /// Validate the settings and start the worker threads.
    ///
    /// Configuration problems are reported here, before any thread exists.
    pub fn new(
        settings: PoolSettings,
        map: Arc<dyn ChannelTypeLookup>,
        digitizers: DigitizerSet,
        triggers: Arc<dyn TriggerLocationProvider>,
    ) -> Result<Self, PoolError> {
        settings.validate(map.as_ref(), &digitizers)?;

        let builder = WaveformBuilder::new(
            map,
            digitizers,
            triggers,
            settings.window,
            settings.readout,
            settings.seed,
        );
        let shared = Arc::new(PoolShared {
            gates: (0..settings.n_workers).map(|_| Semaphore::new(0)).collect(),
            finish: Semaphore::new(0),
            terminate: AtomicBool::new(false),
            dispatch: Mutex::new(None),
            builder,
        });
        let ranges = create_ranges(settings.n_channels, settings.n_workers);

        let mut pool = Self {
            shared,
            workers: Vec::with_capacity(settings.n_workers),
            ranges,
            settings,
            pending: None,
        };
        for (worker, range) in pool.ranges.clone().into_iter().enumerate() {
            let shared = pool.shared.clone();
            let handle = std::thread::Builder::new()
                .name(format!("opdet-digitizer-{worker}"))
                .spawn(move || worker_loop(worker, range, shared))
                .map_err(|e| PoolError::SpawnError(worker, e))?;
            // Dropping the half-built pool on error stops the threads already started
            pool.workers.push(handle);
        }

        let waveform_bytes =
            pool.settings.n_channels * pool.settings.window.n_samples * std::mem::size_of::<u16>();
        spdlog::info!(
            "Started DigitizerPool with {} workers over {} channels ({} per unit)",
            pool.settings.n_workers,
            pool.settings.n_channels,
            human_bytes::human_bytes(waveform_bytes as f64)
        );
        Ok(pool)
    }

    pub fn settings(&self) -> &PoolSettings {
        &self.settings
    }

    pub fn ranges(&self) -> &[ChannelRange] {
        &self.ranges
    }

    pub fn n_workers(&self) -> usize {
        self.workers.len()
    }

    pub fn termination_handle(&self) -> TerminationHandle {
        TerminationHandle {
            shared: self.shared.clone(),
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.shared.is_terminated()
    }

    /// Phase 1 for a unit: build the photon index and digitize every channel.
    ///
    /// Returns the full waveforms, one per channel. The unit stays pending until
    /// `extract_triggered` is called.
    pub fn digitize_unit(&mut self, unit: &ProcessingUnit) -> Result<&[OpDetWaveform], PoolError> {
        let index = PhotonIndex::build(&unit.collections, self.settings.photon_form);
        spdlog::debug!(
            "Unit {}: indexed {} photons on {} channels",
            unit.id,
            index.total_photons(),
            index.n_channels()
        );
        self.digitize_index(unit.id, index)
    }

    /// Phase 1 from an index the caller already built (or reuses)
    pub fn digitize_index(
        &mut self,
        unit_id: u64,
        index: PhotonIndex,
    ) -> Result<&[OpDetWaveform], PoolError> {
        if let Some(stale) = self.pending.take() {
            spdlog::warn!(
                "Unit {} was digitized but never triggered, discarding it",
                stale.unit_id
            );
        }

        let context = UnitContext::new(
            unit_id,
            index,
            self.settings.n_channels,
            self.settings.n_workers,
        );
        let mut context = self.run_phase(Phase::Build, context)?;
        self.check_faults(&mut context)?;

        let pending = self.pending.insert(context);
        Ok(pending.waveforms.as_slice())
    }

    /// Phase 2 for the pending unit: cut the trigger windows and return the whole unit
    pub fn extract_triggered(&mut self) -> Result<DigitizedUnit, PoolError> {
        let context = self.pending.take().ok_or(PoolError::NoPendingUnit)?;
        let mut context = self.run_phase(Phase::ApplyTrigger, context)?;
        self.check_faults(&mut context)?;

        let mut faults: Vec<ChannelFault> = context.faults.into_vec().into_iter().flatten().collect();
        faults.sort_by_key(|f| (f.phase == Phase::ApplyTrigger, f.channel));
        Ok(DigitizedUnit {
            unit_id: context.unit_id,
            build_audit: context.build_audit.snapshot(),
            trigger_audit: context.trigger_audit.snapshot(),
            waveforms: context.waveforms.into_vec(),
            triggered: context.triggered.into_vec(),
            faults,
        })
    }

    /// Both phases in one call
    pub fn process_unit(&mut self, unit: &ProcessingUnit) -> Result<DigitizedUnit, PoolError> {
        self.digitize_unit(unit)?;
        self.extract_triggered()
    }

    /// Stop and join every worker
    pub fn shutdown(mut self) -> Result<(), PoolError> {
        self.stop()
    }

    /// One dispatch/rendezvous cycle
    fn run_phase(&mut self, phase: Phase, context: UnitContext) -> Result<UnitContext, PoolError> {
        if self.shared.is_terminated() {
            return Err(PoolError::Terminated);
        }
        let n_workers = self.settings.n_workers;
        let unit = Arc::new(context);
        unit.completed.store(0, Ordering::Release);

        self.shared.publish(Some(Dispatch {
            phase,
            unit: unit.clone(),
        }));
        for gate in self.shared.gates.iter() {
            gate.increment(1);
        }
        self.shared.finish.decrement(n_workers);
        self.shared.publish(None);

        if unit.completed.load(Ordering::Acquire) < n_workers {
            spdlog::warn!(
                "Unit {} was interrupted by termination during {:?}",
                unit.unit_id,
                phase
            );
            return Err(PoolError::Terminated);
        }
        // Every worker dropped its handle before signalling, so this is the last one
        Arc::try_unwrap(unit).map_err(|_| PoolError::Terminated)
    }

    fn check_faults(&self, context: &mut UnitContext) -> Result<(), PoolError> {
        let n_faults = context.n_faults();
        if n_faults == 0 {
            return Ok(());
        }
        for fault in context.faults.as_slice().iter().flatten() {
            spdlog::warn!(
                "Unit {}: channel {} skipped during {:?}: {}",
                context.unit_id,
                fault.channel,
                fault.phase,
                fault.message
            );
        }
        if self.settings.fail_on_fault {
            Err(PoolError::UnitFailed(context.unit_id, n_faults))
        } else {
            Ok(())
        }
    }

    fn stop(&mut self) -> Result<(), PoolError> {
        if self.workers.is_empty() {
            return Ok(());
        }
        self.shared.request_termination();
        let mut failed = 0;
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                failed += 1;
            }
        }
        self.pending = None;
        if failed > 0 {
            spdlog::error!("{failed} digitizer worker(s) could not be joined");
            return Err(PoolError::JoinError(failed));
        }
        spdlog::info!("DigitizerPool stopped");
        Ok(())
    }
}

impl Drop for DigitizerPool {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

impl std::fmt::Debug for DigitizerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DigitizerPool")
            .field("settings", &self.settings)
            .field("ranges", &self.ranges)
            .field("n_workers", &self.workers.len())
            .field("terminated", &self.shared.is_terminated())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel_map::PdChannelMap;
    use crate::digitizer::{DeviceDigitizer, DigiRng, PmtConfig};
    use crate::error::DigitizerError;
    use crate::pd_type::PdType;
    use crate::photon::{PhotonCollection, PhotonRecord, SimPhotonsLite};
    use crate::trigger::{FixedTriggerLocations, TriggerConfig};
    use std::collections::BTreeMap;
    use std::sync::atomic::AtomicUsize;
    use std::time::{Duration, Instant};

    const N_SAMPLES: usize = 200;

    fn settings(n_workers: usize, n_channels: usize) -> PoolSettings {
        PoolSettings {
            n_workers,
            n_channels,
            window: SampleWindow {
                start_ns: -100.0,
                sampling: 0.5,
                n_samples: N_SAMPLES,
            },
            readout: ReadoutWindow {
                pretrigger: 10,
                posttrigger: 30,
            },
            photon_form: PhotonForm::Lite,
            seed: 11,
            fail_on_fault: false,
        }
    }

    fn triggers(times: Vec<f64>) -> Arc<dyn TriggerLocationProvider> {
        Arc::new(FixedTriggerLocations::new(&TriggerConfig {
            trigger_times_ns: times,
            channel_trigger_times_ns: BTreeMap::new(),
            readout: ReadoutWindow::default(),
        }))
    }

    fn pmt_map(n_channels: usize) -> Arc<dyn ChannelTypeLookup> {
        Arc::new(PdChannelMap::from_types(&vec![PdType::PmtCoated; n_channels]))
    }

    fn reference_pool(n_workers: usize, n_channels: usize) -> DigitizerPool {
        DigitizerPool::new(
            settings(n_workers, n_channels),
            pmt_map(n_channels),
            DigitizerSet::from_configs(Some(&PmtConfig::default()), None, 0.5),
            triggers(vec![0.0]),
        )
        .unwrap()
    }

    fn unit(id: u64, channels: &[u32]) -> ProcessingUnit {
        ProcessingUnit {
            id,
            collections: vec![PhotonCollection::lite(
                "direct",
                channels
                    .iter()
                    .map(|ch| SimPhotonsLite {
                        channel: *ch,
                        detected: BTreeMap::from([(0, 200)]),
                    })
                    .collect(),
            )],
        }
    }

    /// Sleeps a little per channel and counts how many channels it finished
    struct SlowCounter {
        done: Arc<AtomicUsize>,
        delay: Duration,
    }

    impl DeviceDigitizer for SlowCounter {
        fn digitize(
            &self,
            channel: u32,
            _pd_type: PdType,
            _record: &PhotonRecord,
            window: &SampleWindow,
            _rng: &mut DigiRng,
        ) -> Result<Vec<u16>, DigitizerError> {
            // Uneven delays so workers finish in a different order than they started
            std::thread::sleep(self.delay * (1 + channel % 3));
            self.done.fetch_add(1, Ordering::SeqCst);
            Ok(vec![channel as u16; window.n_samples])
        }
    }

    fn slow_pool(n_workers: usize, n_channels: usize, delay: Duration) -> (DigitizerPool, Arc<AtomicUsize>) {
        let done = Arc::new(AtomicUsize::new(0));
        let digitizer: Arc<dyn DeviceDigitizer> = Arc::new(SlowCounter {
            done: done.clone(),
            delay,
        });
        let pool = DigitizerPool::new(
            settings(n_workers, n_channels),
            pmt_map(n_channels),
            DigitizerSet {
                pmt: Some(digitizer),
                arapuca: None,
            },
            triggers(vec![]),
        )
        .unwrap();
        (pool, done)
    }

    #[test]
    fn test_config_errors_before_threads() {
        let digis = DigitizerSet::from_configs(Some(&PmtConfig::default()), None, 0.5);
        let zero_workers = DigitizerPool::new(settings(0, 4), pmt_map(4), digis.clone(), triggers(vec![]));
        assert!(matches!(
            zero_workers,
            Err(PoolError::ConfigError(ConfigError::ZeroWorkers))
        ));
        let zero_channels = DigitizerPool::new(settings(2, 0), pmt_map(4), digis.clone(), triggers(vec![]));
        assert!(matches!(
            zero_channels,
            Err(PoolError::ConfigError(ConfigError::ZeroChannels))
        ));
        let arapuca_map: Arc<dyn ChannelTypeLookup> =
            Arc::new(PdChannelMap::from_types(&[PdType::PmtCoated, PdType::XarapucaVuv]));
        let missing = DigitizerPool::new(settings(1, 2), arapuca_map, digis.clone(), triggers(vec![]));
        assert!(matches!(
            missing,
            Err(PoolError::ConfigError(ConfigError::MissingAlgorithm("arapuca")))
        ));
        let too_many = DigitizerPool::new(settings(1, 5), pmt_map(4), digis, triggers(vec![]));
        assert!(matches!(
            too_many,
            Err(PoolError::ConfigError(ConfigError::ChannelsOutsideMap(5, 4)))
        ));
    }

    #[test]
    fn test_every_channel_written_once() {
        let mut pool = reference_pool(5, 37);
        let result = pool.process_unit(&unit(0, &[3, 17, 36])).unwrap();
        assert_eq!(result.waveforms.len(), 37);
        assert_eq!(result.triggered.len(), 37);
        assert!(result.build_audit.written_once());
        assert!(result.trigger_audit.written_once());
        for (worker, range) in pool.ranges().iter().enumerate() {
            for ch in range.as_range() {
                assert_eq!(result.build_audit.owners[ch], Some(worker));
                assert_eq!(result.trigger_audit.owners[ch], Some(worker));
            }
        }
        for (idx, wf) in result.waveforms.iter().enumerate() {
            assert_eq!(wf.channel, idx as u32);
            assert_eq!(wf.len(), N_SAMPLES);
        }
        assert!(result.faults.is_empty());
        pool.shutdown().unwrap();
    }

    #[test]
    fn test_barrier_waits_for_every_worker() {
        let n_channels = 24;
        let (mut pool, done) = slow_pool(4, n_channels, Duration::from_millis(2));
        for unit_id in 0..3 {
            pool.digitize_unit(&unit(unit_id, &[])).unwrap();
            // Sampled right after the rendezvous
            assert_eq!(done.load(Ordering::SeqCst), n_channels * (unit_id as usize + 1));
            pool.extract_triggered().unwrap();
        }
        pool.shutdown().unwrap();
    }

    #[test]
    fn test_runs_are_bit_identical() {
        let mut pool = reference_pool(3, 16);
        let first = pool.process_unit(&unit(4, &[2, 9])).unwrap();
        let second = pool.process_unit(&unit(4, &[2, 9])).unwrap();
        assert_eq!(first.waveforms, second.waveforms);
        assert_eq!(first.triggered, second.triggered);

        // The partition doesn't change the result either
        let mut other = reference_pool(7, 16);
        let third = other.process_unit(&unit(4, &[2, 9])).unwrap();
        assert_eq!(first.waveforms, third.waveforms);
    }

    #[test]
    fn test_more_workers_than_channels() {
        let mut pool = reference_pool(6, 4);
        let result = pool.process_unit(&unit(1, &[0])).unwrap();
        assert_eq!(result.waveforms.len(), 4);
        assert!(result.build_audit.written_once());
        assert_eq!(pool.n_workers(), 6);
        pool.shutdown().unwrap();
    }

    #[test]
    fn test_fault_policy() {
        struct Broken;
        impl DeviceDigitizer for Broken {
            fn digitize(
                &self,
                channel: u32,
                _pd_type: PdType,
                _record: &PhotonRecord,
                window: &SampleWindow,
                _rng: &mut DigiRng,
            ) -> Result<Vec<u16>, DigitizerError> {
                if channel == 2 {
                    panic!("broken channel");
                }
                Ok(vec![1; window.n_samples])
            }
        }

        let make = |fail_on_fault: bool| {
            let mut s = settings(2, 4);
            s.fail_on_fault = fail_on_fault;
            DigitizerPool::new(
                s,
                pmt_map(4),
                DigitizerSet {
                    pmt: Some(Arc::new(Broken)),
                    arapuca: None,
                },
                triggers(vec![0.0]),
            )
            .unwrap()
        };

        let mut lenient = make(false);
        let result = lenient.process_unit(&unit(0, &[])).unwrap();
        assert_eq!(result.faults.len(), 1);
        assert_eq!(result.faults[0].channel, 2);
        assert!(result.waveforms[2].is_empty());
        assert!(result.triggered[2].is_empty());
        assert_eq!(result.waveforms[3].adcs, vec![1; N_SAMPLES]);
        // The pool is still usable
        assert!(lenient.process_unit(&unit(1, &[])).is_ok());

        let mut strict = make(true);
        assert!(matches!(
            strict.digitize_unit(&unit(0, &[])),
            Err(PoolError::UnitFailed(0, 1))
        ));
        assert!(matches!(strict.extract_triggered(), Err(PoolError::NoPendingUnit)));
        strict.shutdown().unwrap();
    }

    /// Triggers every channel at sample 50 except one, which panics
    struct PanickyTriggers {
        bad_channel: u32,
    }

    impl TriggerLocationProvider for PanickyTriggers {
        fn trigger_offsets(&self, channel: u32, _window: &SampleWindow) -> Vec<usize> {
            if channel == self.bad_channel {
                panic!("no trigger record for channel {channel}");
            }
            vec![50]
        }
    }

    #[test]
    fn test_trigger_fault_policy() {
        struct BadLastChannel;
        impl DeviceDigitizer for BadLastChannel {
            fn digitize(
                &self,
                channel: u32,
                _pd_type: PdType,
                _record: &PhotonRecord,
                window: &SampleWindow,
                _rng: &mut DigiRng,
            ) -> Result<Vec<u16>, DigitizerError> {
                if channel == 3 {
                    return Err(DigitizerError::Failed(3, String::from("dead channel")));
                }
                Ok(vec![2; window.n_samples])
            }
        }

        let make = |fail_on_fault: bool, digitizer: Arc<dyn DeviceDigitizer>| {
            let mut s = settings(2, 4);
            s.fail_on_fault = fail_on_fault;
            DigitizerPool::new(
                s,
                pmt_map(4),
                DigitizerSet {
                    pmt: Some(digitizer),
                    arapuca: None,
                },
                Arc::new(PanickyTriggers { bad_channel: 1 }),
            )
            .unwrap()
        };

        // Worker 0 hits the trigger fault, worker 1 the build fault
        let broken: Arc<dyn DeviceDigitizer> = Arc::new(BadLastChannel);
        let mut lenient = make(false, broken);
        let result = lenient.process_unit(&unit(0, &[])).unwrap();
        let faults: Vec<(u32, Phase)> = result.faults.iter().map(|f| (f.channel, f.phase)).collect();
        assert_eq!(faults, vec![(3, Phase::Build), (1, Phase::ApplyTrigger)]);
        assert!(result.faults[1].message.contains("no trigger record for channel 1"));
        assert_eq!(result.waveforms[1].adcs, vec![2; N_SAMPLES]);
        assert!(result.triggered[1].is_empty());
        assert!(result.triggered[3].is_empty());
        assert_eq!(result.triggered[0].len(), 1);
        assert_eq!(result.triggered[2].len(), 1);
        assert!(result.trigger_audit.written_once());
        assert!(lenient.process_unit(&unit(1, &[])).is_ok());
        lenient.shutdown().unwrap();

        // Phase 1 is clean, so the unit is only rejected once the windows are cut
        let reference: Arc<dyn DeviceDigitizer> =
            Arc::new(crate::digitizer::PmtDigitizer::new(&PmtConfig::default(), 0.5));
        let mut strict = make(true, reference);
        assert_eq!(strict.digitize_unit(&unit(0, &[])).unwrap().len(), 4);
        assert!(matches!(
            strict.extract_triggered(),
            Err(PoolError::UnitFailed(0, 1))
        ));
        assert!(matches!(strict.extract_triggered(), Err(PoolError::NoPendingUnit)));
        assert!(matches!(
            strict.process_unit(&unit(1, &[])),
            Err(PoolError::UnitFailed(1, 1))
        ));
        strict.shutdown().unwrap();
    }

    #[test]
    fn test_shutdown_mid_flight() {
        let (mut pool, _done) = slow_pool(3, 30, Duration::from_millis(5));
        let handle = pool.termination_handle();

        let stopper = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(15));
            assert!(handle.request());
            assert!(!handle.request());
        });
        let started = Instant::now();
        let result = pool.digitize_unit(&unit(0, &[])).map(|w| w.len());
        stopper.join().unwrap();
        // Either the unit made it before the request or it was cut short; it never hangs
        assert!(matches!(result, Ok(30) | Err(PoolError::Terminated)));
        assert!(matches!(
            pool.digitize_unit(&unit(1, &[])),
            Err(PoolError::Terminated)
        ));
        pool.shutdown().unwrap();
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn test_termination_while_idle() {
        let mut pool = reference_pool(4, 8);
        pool.process_unit(&unit(0, &[1])).unwrap();
        assert!(pool.termination_handle().request());
        assert!(pool.is_terminated());
        pool.shutdown().unwrap();
    }

    #[test]
    fn test_extract_without_unit() {
        let mut pool = reference_pool(2, 4);
        assert!(matches!(pool.extract_triggered(), Err(PoolError::NoPendingUnit)));
    }
}
