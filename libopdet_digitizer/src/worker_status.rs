#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum BarColor {
    #[default]
    CYAN,
    MAGENTA,
}

/// Progress message sent by the processing loop after every unit
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UnitStatus {
    /// Fraction of the input processed, if the input size is known
    pub progress: Option<f32>,
    pub unit_id: u64,
    pub units_done: usize,
    pub n_windows: usize,
    pub n_faults: usize,
    pub color: BarColor,
}

impl UnitStatus {
    pub fn new(
        unit_id: u64,
        units_done: usize,
        n_units: Option<usize>,
        n_windows: usize,
        n_faults: usize,
    ) -> Self {
        Self {
            progress: n_units
                .filter(|n| *n > 0)
                .map(|n| units_done as f32 / n as f32),
            unit_id,
            units_done,
            n_windows,
            n_faults,
            // Units with skipped channels stand out in the progress bar
            color: if n_faults > 0 {
                BarColor::MAGENTA
            } else {
                BarColor::CYAN
            },
        }
    }
}
