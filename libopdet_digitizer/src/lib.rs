//! # opdet_digitizer
//!
//! opdet_digitizer turns simulated photon detector hits into digitized waveforms, written
//! in Rust. It takes the photons detected on every optical channel of a processing unit
//! (typically one readout window of a simulated event), synthesizes the full ADC waveform
//! of each channel and then cuts the trigger windows out of them.
//!
//! The work is spread over a persistent pool of worker threads. Every worker owns a fixed,
//! contiguous range of channels for the lifetime of the pool and writes its results
//! straight into shared per-unit buffers. The orchestrator and the workers rendezvous
//! twice per unit (once after the full waveforms are built, once after the trigger
//! windows are cut) through counting semaphores.
//!
//! ## Building & Install
//!
//! To build and install the CLI use `cargo install --path ./opdet_digitizer_cli` from the
//! top level repository. To use the CLI see the `opdet_digitizer_cli` section below.
//!
//! ## Configuration
//!
//! A template configuration can be generated with `opdet_digitizer_cli new -p config.yml`.
//! The YAML format of a configuration file is as follows:
//!
//! ```yml
//! input_path: units.yml
//! output_path: waveforms.yml
//! channel_map_path: null
//! n_channels: null
//! n_threads: 1
//! photon_form: lite
//! enable_window_us: [-1.0, 9.0]
//! sampling_ghz: 0.5
//! n_samples: null
//! seed: 23504
//! fail_on_fault: false
//! pmt:
//!   baseline: 8000.0
//!   ...
//! arapuca:
//!   baseline: 1500.0
//!   ...
//! trigger:
//!   trigger_times_ns: [0.0]
//!   channel_trigger_times_ns: {}
//!   readout:
//!     pretrigger: 250
//!     posttrigger: 5000
//! ```
//!
//! - `channel_map_path`: if `null`, the bundled default map is used.
//! - `n_channels`: digitize only channels `[0, n_channels)`; all channels of the map if `null`.
//! - `n_threads`: number of persistent digitizer workers. Must be at least 1. If there are
//! more workers than channels, the extra workers get empty ranges.
//! - `photon_form`: `lite` (binned counts) or `full` (one entry per photon). Collections of
//! the other form are skipped with a warning.
//! - `n_samples`: if `null`, derived from the enable window and the sampling frequency.
//! - `fail_on_fault`: by default a channel whose digitization fails is skipped (left empty)
//! and reported; with `true` the whole unit fails instead.
//! - `pmt`/`arapuca`: settings of the reference digitizers. A section is required as soon
//! as the digitized channels contain a device of that kind.
//!
//! ### Channel Map Format
//!
//! The channel map is a CSV file with a header and two columns:
//!
//! ```csv
//! channel,pd_type
//! ```
//!
//! Supported photon detector types are:
//!
//! - `pmt_coated`
//! - `pmt_uncoated`
//! - `xarapuca_vuv`
//! - `xarapuca_vis`
//! - `arapuca_vuv`
//! - `arapuca_vis`
//!
//! ## Output
//!
//! opdet_digitizer writes two files: a YAML stream with one document per processing unit
//! (its trigger windows and the channels that were skipped), and a log file.
pub mod builder;
pub mod channel_map;
pub mod config;
pub mod constants;
pub mod digitizer;
pub mod error;
pub mod partition;
pub mod pd_type;
pub mod photon;
pub mod photon_index;
pub mod pool;
pub mod process;
pub mod semaphore;
pub mod source;
pub mod trigger;
pub mod waveform;
pub mod worker_status;
pub mod writer;
