use std::sync::mpsc::Sender;
use std::sync::Arc;

use super::config::Config;
use super::error::{PoolError, ProcessorError};
use super::pool::{DigitizerPool, TerminationHandle};
use super::source::{PhotonSource, YamlPhotonSource};
use super::trigger::FixedTriggerLocations;
use super::worker_status::UnitStatus;
use super::writer::WaveformWriter;

/// Run every unit of `source` through the pool and write the triggered waveforms.
///
/// A unit rejected because of channel faults (`fail_on_fault`) is reported and skipped;
/// the run goes on with the next unit. Returns the number of units written.
pub fn process_units(
    pool: &mut DigitizerPool,
    source: &mut dyn PhotonSource,
    writer: &mut WaveformWriter,
    tx: &Sender<UnitStatus>,
) -> Result<usize, ProcessorError> {
    let n_units = source.remaining();
    let mut units_seen = 0;
    let mut units_written = 0;
    while let Some(unit) = source.next_unit()? {
        units_seen += 1;
        let digitized = match pool.process_unit(&unit) {
            Ok(digitized) => digitized,
            Err(PoolError::UnitFailed(unit_id, n_faults)) => {
                spdlog::error!("Unit {unit_id} rejected with {n_faults} channel fault(s), skipping it");
                tx.send(UnitStatus::new(unit_id, units_seen, n_units, 0, n_faults))?;
                continue;
            }
            Err(e) => return Err(e.into()),
        };
        writer.write_unit(&digitized)?;
        units_written += 1;

        let n_windows = digitized.triggered.iter().map(|w| w.len()).sum();
        spdlog::debug!(
            "Unit {} done: {} trigger windows, {} faults",
            unit.id,
            n_windows,
            digitized.faults.len()
        );
        tx.send(UnitStatus::new(
            unit.id,
            units_seen,
            n_units,
            n_windows,
            digitized.faults.len(),
        ))?;
    }
    if units_written < units_seen {
        spdlog::warn!(
            "{} of {units_seen} units were rejected",
            units_seen - units_written
        );
    }
    Ok(units_written)
}

/// Build the pool described by the config
pub fn create_pool(config: &Config) -> Result<DigitizerPool, ProcessorError> {
    let map = config.load_channel_map()?;
    let settings = config.pool_settings(&map)?;
    let digitizers = config.digitizers(&map);
    let triggers = FixedTriggerLocations::new(&config.trigger);
    Ok(DigitizerPool::new(
        settings,
        Arc::new(map),
        digitizers,
        Arc::new(triggers),
    )?)
}

/// The main loop of opdet_digitizer.
///
/// This takes in a config (and progress monitor) and digitizes every unit of the input.
/// The pool's termination handle is handed to `on_start` so a caller can stop the run
/// from another thread.
pub fn process_with_handle(
    config: Config,
    tx: Sender<UnitStatus>,
    on_start: impl FnOnce(TerminationHandle),
) -> Result<(), ProcessorError> {
    let mut source = YamlPhotonSource::open(&config.input_path)?;
    let mut pool = create_pool(&config)?;
    on_start(pool.termination_handle());
    let mut writer = WaveformWriter::new(&config.output_path)?;

    let result = process_units(&mut pool, &mut source, &mut writer, &tx);
    // Keep whatever was written before a failure
    let closed = writer.close();
    let stopped = pool.shutdown();
    let units_done = match result {
        Ok(n) => n,
        Err(e) => {
            if let Err(close_err) = closed {
                spdlog::error!("Failed to close the output after an error: {close_err}");
            }
            if let Err(stop_err) = stopped {
                spdlog::error!("Failed to stop the pool after an error: {stop_err}");
            }
            return Err(e);
        }
    };
    closed?;
    stopped?;
    spdlog::info!("Digitized {units_done} units.");
    Ok(())
}

/// The function to be called by a separate thread (typically the CLI)
pub fn process(config: Config, tx: Sender<UnitStatus>) -> Result<(), ProcessorError> {
    process_with_handle(config, tx, |_| ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel_map::PdChannelMap;
    use crate::digitizer::{DeviceDigitizer, DigiRng, DigitizerSet, SampleWindow};
    use crate::error::DigitizerError;
    use crate::pd_type::PdType;
    use crate::photon::{PhotonCollection, PhotonForm, PhotonRecord, ProcessingUnit, SimPhotonsLite};
    use crate::pool::PoolSettings;
    use crate::source::YamlPhotonSource;
    use crate::trigger::{ReadoutWindow, TriggerConfig};
    use crate::worker_status::BarColor;
    use crate::writer::read_unit_records;
    use std::collections::BTreeMap;
    use std::sync::mpsc::channel;

    fn units(n: u64) -> Vec<ProcessingUnit> {
        (0..n)
            .map(|id| ProcessingUnit {
                id,
                collections: vec![PhotonCollection::lite(
                    "direct",
                    vec![SimPhotonsLite {
                        channel: 1,
                        detected: BTreeMap::from([(0, 50)]),
                    }],
                )],
            })
            .collect()
    }

    fn config(tag: &str) -> Config {
        let dir = std::env::temp_dir();
        Config {
            input_path: dir.join(format!("opdet_digitizer_{tag}_in.yml")),
            output_path: dir.join(format!("opdet_digitizer_{tag}_out.yml")),
            n_channels: Some(16),
            n_threads: 3,
            enable_window_us: [-0.2, 0.8],
            ..Default::default()
        }
    }

    #[test]
    fn test_process_file() {
        let config = config("process");
        std::fs::write(&config.input_path, serde_yaml::to_string(&units(3)).unwrap()).unwrap();

        let (tx, rx) = channel();
        process(config.clone(), tx).unwrap();
        let statuses: Vec<UnitStatus> = rx.iter().collect();
        assert_eq!(statuses.len(), 3);
        assert_eq!(statuses[2].units_done, 3);
        assert_eq!(statuses[2].progress, Some(1.0));
        // One trigger at t = 0 on every channel
        assert!(statuses.iter().all(|s| s.n_windows == 16 && s.n_faults == 0));

        let records = read_unit_records(&config.output_path).unwrap();
        std::fs::remove_file(&config.input_path).unwrap();
        std::fs::remove_file(&config.output_path).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(
            records.iter().map(|r| r.unit_id).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
    }

    #[test]
    fn test_missing_input() {
        let config = config("missing");
        let (tx, _rx) = channel();
        assert!(matches!(
            process(config, tx),
            Err(ProcessorError::SourceError(_))
        ));
    }

    #[test]
    fn test_stopped_run_keeps_output() {
        let config = config("stopped");
        std::fs::write(&config.input_path, serde_yaml::to_string(&units(2)).unwrap()).unwrap();

        let (tx, _rx) = channel();
        let result = process_with_handle(config.clone(), tx, |handle| {
            handle.request();
        });
        assert!(matches!(
            result,
            Err(ProcessorError::PoolError(PoolError::Terminated))
        ));
        assert!(read_unit_records(&config.output_path).unwrap().is_empty());
        std::fs::remove_file(&config.input_path).unwrap();
        std::fs::remove_file(&config.output_path).unwrap();
    }

    /// Fails every channel that received photons
    struct FailsOnLight;

    impl DeviceDigitizer for FailsOnLight {
        fn digitize(
            &self,
            channel: u32,
            _pd_type: PdType,
            record: &PhotonRecord,
            window: &SampleWindow,
            _rng: &mut DigiRng,
        ) -> Result<Vec<u16>, DigitizerError> {
            if !record.is_empty() {
                return Err(DigitizerError::Failed(channel, String::from("saturated gain")));
            }
            Ok(vec![10; window.n_samples])
        }
    }

    #[test]
    fn test_rejected_unit_does_not_stop_the_run() {
        let settings = PoolSettings {
            n_workers: 2,
            n_channels: 4,
            window: SampleWindow {
                start_ns: 0.0,
                sampling: 1.0,
                n_samples: 64,
            },
            readout: ReadoutWindow {
                pretrigger: 4,
                posttrigger: 8,
            },
            photon_form: PhotonForm::Lite,
            seed: 3,
            fail_on_fault: true,
        };
        let triggers = FixedTriggerLocations::new(&TriggerConfig {
            trigger_times_ns: vec![20.0],
            ..Default::default()
        });
        let mut pool = DigitizerPool::new(
            settings,
            Arc::new(PdChannelMap::from_types(&[PdType::PmtCoated; 4])),
            DigitizerSet {
                pmt: Some(Arc::new(FailsOnLight)),
                arapuca: None,
            },
            Arc::new(triggers),
        )
        .unwrap();

        // Only the middle unit carries light
        let mut all_units = units(3);
        all_units[0].collections.clear();
        all_units[2].collections.clear();
        let mut source = YamlPhotonSource::from_units(all_units);

        let path = std::env::temp_dir().join("opdet_digitizer_rejected_out.yml");
        let mut writer = WaveformWriter::new(&path).unwrap();
        let (tx, rx) = channel();
        let written = process_units(&mut pool, &mut source, &mut writer, &tx).unwrap();
        writer.close().unwrap();
        drop(tx);

        assert_eq!(written, 2);
        assert_eq!(source.remaining(), Some(0));
        let statuses: Vec<UnitStatus> = rx.iter().collect();
        assert_eq!(
            statuses.iter().map(|s| s.unit_id).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
        assert_eq!(statuses[1].n_faults, 1);
        assert_eq!(statuses[1].color, BarColor::MAGENTA);
        assert_eq!(statuses[2].progress, Some(1.0));

        let records = read_unit_records(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(
            records.iter().map(|r| r.unit_id).collect::<Vec<_>>(),
            vec![0, 2]
        );
        pool.shutdown().unwrap();
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_processing_error_wins_over_close_error() {
        let mut config = config("close_error");
        // Every flush to this device fails
        config.output_path = std::path::PathBuf::from("/dev/full");
        std::fs::write(&config.input_path, serde_yaml::to_string(&units(1)).unwrap()).unwrap();

        let (tx, _rx) = channel();
        let result = process_with_handle(config.clone(), tx, |handle| {
            handle.request();
        });
        std::fs::remove_file(&config.input_path).unwrap();
        assert!(matches!(
            result,
            Err(ProcessorError::PoolError(PoolError::Terminated))
        ));
    }
}
