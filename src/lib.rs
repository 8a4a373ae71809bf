//! Remote acquisition server for multichannel waveform digitizers.
//!
//! Clients speak a line-command protocol over TCP (`start`, `swtrg`,
//! `readout`, `download`, ...); `download` streams the captured waveforms
//! back as a three-block binary frame (header, channel list, samples). The
//! physical board sits behind the [`Digitizer`] capability trait, so the
//! same server runs against real hardware or the bundled simulator.

pub mod command;
pub mod config;
pub mod data;
pub mod digitizer;
pub mod event;
pub mod server;
pub mod session;
pub mod sim;
pub mod stats;

pub use command::{dispatch, Dispatch};
pub use config::{
    AcquisitionConfig, AcquisitionSettings, Conf, MaskValue, ServerSettings, ALLOWED_FREQUENCIES,
};
pub use data::{FramingMismatch, SessionData, SessionHeader, HEADER_SIZE};
pub use digitizer::{
    Digitizer, DigitizerError, CHANNELS_PER_GROUP, GROUP_STRIDE, MAX_CHANNELS, N_GROUPS,
};
pub use event::{DecodedEvent, GroupWaveforms};
pub use server::{Server, ServerExit};
pub use session::{AcqState, CommandError, Session};
pub use sim::SimDigitizer;
pub use stats::ReadoutStats;
