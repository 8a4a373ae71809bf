use crate::config::AcquisitionConfig;
use crate::event::DecodedEvent;
use thiserror::Error;

/// Number of channel groups on the board.
pub const N_GROUPS: usize = 2;
/// Channels per group.
pub const CHANNELS_PER_GROUP: usize = 8;
/// Wire channel ids are `channel + group * GROUP_STRIDE`. The stride of 9
/// (not 8) is kept for compatibility with existing clients; ids 8 and 17
/// are never produced.
pub const GROUP_STRIDE: usize = 9;
/// Channel-id capacity implied by the stride.
pub const MAX_CHANNELS: usize = 18;

#[derive(Debug, Error)]
pub enum DigitizerError {
    #[error("digitizer is not open")]
    NotOpen,
    #[error("{op} failed: {reason}")]
    Fault { op: &'static str, reason: String },
}

impl DigitizerError {
    pub fn fault(op: &'static str, reason: impl Into<String>) -> Self {
        Self::Fault {
            op,
            reason: reason.into(),
        }
    }
}

/// Capability interface to a multichannel waveform digitizer.
///
/// The register-level driver for a physical board lives outside this crate;
/// anything that can open, start, probe and decode events can serve the
/// acquisition session. [`crate::SimDigitizer`] is the in-crate
/// implementation.
pub trait Digitizer {
    fn open(&mut self) -> Result<(), DigitizerError>;
    fn close(&mut self) -> Result<(), DigitizerError>;
    fn configure(&mut self, config: &AcquisitionConfig) -> Result<(), DigitizerError>;
    fn start(&mut self) -> Result<(), DigitizerError>;
    fn stop(&mut self) -> Result<(), DigitizerError>;

    /// Board model name; valid once the digitizer is open.
    fn model(&self) -> &str;

    fn is_board_ready(&mut self) -> Result<bool, DigitizerError>;
    fn is_running(&mut self) -> Result<bool, DigitizerError>;
    fn is_event_ready(&mut self) -> Result<bool, DigitizerError>;

    fn send_software_trigger(&mut self) -> Result<(), DigitizerError>;

    /// One raw read-and-decode pass. Returns however many events the board
    /// had buffered, up to the configured block-transfer limit.
    fn read_batch(&mut self) -> Result<Vec<DecodedEvent>, DigitizerError>;
}
