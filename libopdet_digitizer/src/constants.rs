// Digitizer electronics
pub const ADC_BITS: u32 = 14;
pub const ADC_SATURATION: u16 = (1 << ADC_BITS) - 1;
// Single PE templates are cut after this many fall times
pub const PULSE_TEMPLATE_FALL_TIMES: f64 = 5.0;

// Default readout
pub const DEFAULT_ENABLE_WINDOW_US: [f64; 2] = [-1.0, 9.0];
pub const DEFAULT_SAMPLING_GHZ: f64 = 0.5;
pub const NS_PER_US: f64 = 1000.0;

// Default trigger readout window (samples)
pub const DEFAULT_PRETRIGGER_SAMPLES: usize = 250;
pub const DEFAULT_POSTTRIGGER_SAMPLES: usize = 5000;

// Default seed for the digitization random streams
pub const DEFAULT_SEED: u64 = 0x5BD0;

// Log file written by the CLI
pub const LOG_FILE_NAME: &str = "opdet_digitizer.log";
