use crate::digitizer::{CHANNELS_PER_GROUP, N_GROUPS};
use ndarray::Array2;

/// Decoded waveforms for one hardware group of one event.
///
/// The waveform data is stored as a 2-D contiguous array, one row per
/// channel. `n_samples` carries the actual per-channel slice lengths so the
/// aggregator can check them against the configured record length instead
/// of assuming the fixed-length framing holds.
#[derive(Debug, Clone)]
pub struct GroupWaveforms {
    pub present: bool,
    pub samples: Array2<f32>,
    pub n_samples: [usize; CHANNELS_PER_GROUP],
}

impl GroupWaveforms {
    pub fn new(record_length: usize) -> Self {
        Self {
            present: false,
            samples: Array2::zeros((CHANNELS_PER_GROUP, record_length)),
            n_samples: [0; CHANNELS_PER_GROUP],
        }
    }
}

/// One decoded trigger: a fixed pair of groups, each with its presence flag.
#[derive(Debug, Clone)]
pub struct DecodedEvent {
    pub groups: [GroupWaveforms; N_GROUPS],
}

impl DecodedEvent {
    pub fn new(record_length: usize) -> Self {
        Self {
            groups: [
                GroupWaveforms::new(record_length),
                GroupWaveforms::new(record_length),
            ],
        }
    }
}
