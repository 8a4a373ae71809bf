use crate::config::AcquisitionConfig;
use crate::data::{FramingMismatch, SessionData};
use crate::digitizer::{Digitizer, DigitizerError};
use crate::stats::ReadoutStats;
use log::{debug, info};
use std::thread;
use std::time::Duration;
use thiserror::Error;

/// Delay between consecutive software triggers.
const SWTRG_DELAY: Duration = Duration::from_millis(1);

/// Acquisition state. Configuration commands are legal in `Idle`, triggering
/// and readout in `Running`; there is no terminal state, shutdown is a
/// process exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcqState {
    Idle,
    Running,
}

/// Everything a command can fail with. Every variant is recovered at the
/// command boundary: the reply carries the message and the connection stays
/// open.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("the board is not ready to start acquisition")]
    NotReady,
    #[error("acquisition is already running")]
    AlreadyRunning,
    #[error("acquisition is not running")]
    NotRunning,
    #[error("cannot change configuration, acquisition is running")]
    ConfigWhileRunning,
    #[error("[ERROR] {0}")]
    BadArgument(String),
    #[error("[ERROR] {0}")]
    Hardware(#[from] DigitizerError),
    #[error("readout timeout")]
    ReadoutTimeout,
    #[error("[ERROR] {0}")]
    Framing(#[from] FramingMismatch),
    #[error("[ERROR] unknown command: {0}")]
    UnknownCommand(String),
}

/// The acquisition session: digitizer handle, runtime configuration, state
/// machine and the process-wide download frame, owned together so tests can
/// run independent sessions side by side.
pub struct Session<D: Digitizer> {
    digitizer: D,
    model: String,
    config: AcquisitionConfig,
    state: AcqState,
    data: SessionData,
    stats: ReadoutStats,
}

impl<D: Digitizer> Session<D> {
    /// Open and configure the digitizer; the session starts `Idle`.
    pub fn open(mut digitizer: D, config: AcquisitionConfig) -> Result<Self, DigitizerError> {
        digitizer.open()?;
        let model = digitizer.model().to_string();
        info!("digitizer open: {model}");
        digitizer.configure(&config)?;
        info!(
            "digitizer configured: {} MHz, record length {}, group mask 0x{:x}, channel mask 0x{:x}",
            config.frequency, config.record_length, config.group_mask, config.channel_mask
        );
        Ok(Self {
            digitizer,
            model,
            config,
            state: AcqState::Idle,
            data: SessionData::default(),
            stats: ReadoutStats::new(),
        })
    }

    pub fn close(&mut self) -> Result<(), DigitizerError> {
        info!("closing digitizer");
        self.digitizer.close()
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn state(&self) -> AcqState {
        self.state
    }

    pub fn config(&self) -> &AcquisitionConfig {
        &self.config
    }

    pub fn data(&self) -> &SessionData {
        &self.data
    }

    pub fn stats(&self) -> &ReadoutStats {
        &self.stats
    }

    pub fn start(&mut self) -> Result<(), CommandError> {
        if !self.digitizer.is_board_ready()? {
            return Err(CommandError::NotReady);
        }
        if self.state == AcqState::Running || self.digitizer.is_running()? {
            return Err(CommandError::AlreadyRunning);
        }
        self.digitizer.start()?;
        self.state = AcqState::Running;
        info!("acquisition started");
        Ok(())
    }

    pub fn stop(&mut self) -> Result<(), CommandError> {
        if self.state != AcqState::Running {
            return Err(CommandError::NotRunning);
        }
        self.digitizer.stop()?;
        self.state = AcqState::Idle;
        info!("acquisition stopped");
        Ok(())
    }

    /// Issue `count` software triggers, one millisecond apart. A
    /// non-positive count sends none. Returns the number sent.
    pub fn send_software_triggers(&mut self, count: i64) -> Result<u32, CommandError> {
        if self.state != AcqState::Running {
            return Err(CommandError::NotRunning);
        }
        debug!("sending {count} software triggers");
        let mut sent = 0;
        for _ in 0..count.max(0) {
            self.digitizer.send_software_trigger()?;
            sent += 1;
            thread::sleep(SWTRG_DELAY);
        }
        Ok(sent)
    }

    /// One readout pass: poll for event-ready, read and decode a batch, and
    /// rebuild the download frame from it. Returns the number of events.
    pub fn readout(&mut self) -> Result<usize, CommandError> {
        if self.state != AcqState::Running {
            return Err(CommandError::NotRunning);
        }
        self.data
            .begin_readout(self.config.record_length, self.config.frequency);

        match self.readout_inner() {
            Ok(n_events) => Ok(n_events),
            Err(e) => {
                // No self-consistent frame exists after an aborted readout,
                // whatever aborted it: drop the previous one rather than
                // leaving its samples downloadable under a zeroed header.
                self.data.clear();
                Err(e)
            }
        }
    }

    fn readout_inner(&mut self) -> Result<usize, CommandError> {
        debug!("polling for event ready");
        if !self.poll_event_ready()? {
            return Err(CommandError::ReadoutTimeout);
        }

        let events = self.digitizer.read_batch()?;
        self.data.clear_samples();
        for event in &events {
            self.data.fill_event(event, self.config.channel_mask)?;
        }
        self.data.finish_readout(events.len());
        self.stats
            .record(events.len(), self.data.samples_len() * 4);
        info!("readout completed: {} events", events.len());
        Ok(events.len())
    }

    fn poll_event_ready(&mut self) -> Result<bool, CommandError> {
        let interval = Duration::from_millis(self.config.poll_interval_ms.max(1));
        let mut waited_ms = 0u64;
        while waited_ms < self.config.readout_timeout_ms {
            thread::sleep(interval);
            waited_ms += interval.as_millis() as u64;
            if self.digitizer.is_event_ready()? {
                return Ok(true);
            }
        }
        Ok(self.digitizer.is_event_ready()?)
    }

    pub fn set_sampling(&mut self, frequency: u16) -> Result<(), CommandError> {
        if self.state == AcqState::Running {
            return Err(CommandError::ConfigWhileRunning);
        }
        let previous = self.config.frequency;
        self.config.frequency = frequency;
        if let Err(fault) = self.digitizer.configure(&self.config) {
            self.config.frequency = previous;
            return Err(fault.into());
        }
        info!("sampling frequency configured: {frequency}");
        Ok(())
    }

    pub fn set_group_mask(&mut self, mask: u32) -> Result<(), CommandError> {
        if self.state == AcqState::Running {
            return Err(CommandError::ConfigWhileRunning);
        }
        let previous = self.config.group_mask;
        self.config.group_mask = mask;
        if let Err(fault) = self.digitizer.configure(&self.config) {
            self.config.group_mask = previous;
            return Err(fault.into());
        }
        info!("group enable mask configured: 0x{mask:x}");
        Ok(())
    }

    /// The channel mask only restricts which channels the aggregator copies
    /// into the buffer; no hardware call is involved.
    pub fn set_channel_mask(&mut self, mask: u32) -> Result<(), CommandError> {
        if self.state == AcqState::Running {
            return Err(CommandError::ConfigWhileRunning);
        }
        self.config.channel_mask = mask;
        info!("channel mask configured: 0x{mask:x}");
        Ok(())
    }

    /// Assemble the three download blocks and the sizes reply line.
    pub fn download_frame(&self) -> (String, [Vec<u8>; 3]) {
        let header = self.data.header.to_bytes().to_vec();
        let channels = self.data.channel_bytes();
        let samples = self.data.sample_bytes();
        let reply = format!(
            "sending header,channels,data: {},{},{} bytes",
            header.len(),
            channels.len(),
            samples.len()
        );
        (reply, [header, channels, samples])
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::digitizer::CHANNELS_PER_GROUP;
    use crate::event::DecodedEvent;
    use std::collections::VecDeque;

    /// Scripted digitizer for exercising gating and failure paths. Each
    /// readout consumes the next entry of `batches`; event-ready fires as
    /// long as entries remain.
    pub(crate) struct FakeDigitizer {
        pub board_ready: bool,
        pub hw_running: bool,
        pub fail_start: bool,
        pub batches: VecDeque<Result<Vec<DecodedEvent>, DigitizerError>>,
        pub triggers_sent: u32,
        pub configure_calls: u32,
    }

    impl FakeDigitizer {
        pub fn new() -> Self {
            Self {
                board_ready: true,
                hw_running: false,
                fail_start: false,
                batches: VecDeque::new(),
                triggers_sent: 0,
                configure_calls: 0,
            }
        }

        pub fn with_batch(n_events: usize, record_length: usize) -> Self {
            let mut fake = Self::new();
            fake.batches.push_back(Ok((0..n_events)
                .map(|_| {
                    let mut event = DecodedEvent::new(record_length);
                    event.groups[0].present = true;
                    event.groups[0].n_samples = [record_length; CHANNELS_PER_GROUP];
                    event
                })
                .collect()));
            fake
        }
    }

    impl Digitizer for FakeDigitizer {
        fn open(&mut self) -> Result<(), DigitizerError> {
            Ok(())
        }

        fn close(&mut self) -> Result<(), DigitizerError> {
            Ok(())
        }

        fn configure(&mut self, _config: &AcquisitionConfig) -> Result<(), DigitizerError> {
            self.configure_calls += 1;
            Ok(())
        }

        fn start(&mut self) -> Result<(), DigitizerError> {
            if self.fail_start {
                return Err(DigitizerError::fault("start acquisition", "bus error"));
            }
            Ok(())
        }

        fn stop(&mut self) -> Result<(), DigitizerError> {
            Ok(())
        }

        fn model(&self) -> &str {
            "FAKE-742"
        }

        fn is_board_ready(&mut self) -> Result<bool, DigitizerError> {
            Ok(self.board_ready)
        }

        fn is_running(&mut self) -> Result<bool, DigitizerError> {
            Ok(self.hw_running)
        }

        fn is_event_ready(&mut self) -> Result<bool, DigitizerError> {
            Ok(!self.batches.is_empty())
        }

        fn send_software_trigger(&mut self) -> Result<(), DigitizerError> {
            self.triggers_sent += 1;
            Ok(())
        }

        fn read_batch(&mut self) -> Result<Vec<DecodedEvent>, DigitizerError> {
            self.batches.pop_front().unwrap_or_else(|| Ok(Vec::new()))
        }
    }

    pub(crate) fn test_config(record_length: u16) -> AcquisitionConfig {
        AcquisitionConfig {
            record_length,
            readout_timeout_ms: 5,
            poll_interval_ms: 1,
            ..AcquisitionConfig::default()
        }
    }

    fn session(fake: FakeDigitizer, record_length: u16) -> Session<FakeDigitizer> {
        Session::open(fake, test_config(record_length)).unwrap()
    }

    #[test]
    fn start_requires_board_ready() {
        let mut fake = FakeDigitizer::new();
        fake.board_ready = false;
        let mut session = session(fake, 4);
        assert!(matches!(session.start(), Err(CommandError::NotReady)));
        assert_eq!(session.state(), AcqState::Idle);
    }

    #[test]
    fn start_twice_is_already_running() {
        let mut session = session(FakeDigitizer::new(), 4);
        session.start().unwrap();
        assert!(matches!(session.start(), Err(CommandError::AlreadyRunning)));
        assert_eq!(session.state(), AcqState::Running);
    }

    #[test]
    fn start_honors_hardware_running_probe() {
        let mut fake = FakeDigitizer::new();
        fake.hw_running = true;
        let mut session = session(fake, 4);
        assert!(matches!(session.start(), Err(CommandError::AlreadyRunning)));
    }

    #[test]
    fn start_fault_leaves_state_idle() {
        let mut fake = FakeDigitizer::new();
        fake.fail_start = true;
        let mut session = session(fake, 4);
        assert!(matches!(session.start(), Err(CommandError::Hardware(_))));
        assert_eq!(session.state(), AcqState::Idle);
    }

    #[test]
    fn stop_while_idle_is_not_running() {
        let mut session = session(FakeDigitizer::new(), 4);
        assert!(matches!(session.stop(), Err(CommandError::NotRunning)));
    }

    #[test]
    fn config_commands_rejected_while_running() {
        let mut session = session(FakeDigitizer::new(), 4);
        session.start().unwrap();
        let before = session.config().clone();
        assert!(matches!(
            session.set_sampling(2500),
            Err(CommandError::ConfigWhileRunning)
        ));
        assert!(matches!(
            session.set_group_mask(1),
            Err(CommandError::ConfigWhileRunning)
        ));
        assert!(matches!(
            session.set_channel_mask(1),
            Err(CommandError::ConfigWhileRunning)
        ));
        assert_eq!(session.config(), &before);
    }

    #[test]
    fn config_commands_apply_while_idle() {
        let mut session = session(FakeDigitizer::new(), 4);
        session.set_sampling(750).unwrap();
        session.set_group_mask(0x1).unwrap();
        session.set_channel_mask(0x0F).unwrap();
        assert_eq!(session.config().frequency, 750);
        assert_eq!(session.config().group_mask, 0x1);
        assert_eq!(session.config().channel_mask, 0x0F);
    }

    #[test]
    fn swtrg_requires_running_and_counts() {
        let mut session = session(FakeDigitizer::new(), 4);
        assert!(matches!(
            session.send_software_triggers(3),
            Err(CommandError::NotRunning)
        ));
        session.start().unwrap();
        assert_eq!(session.send_software_triggers(3).unwrap(), 3);
        assert_eq!(session.send_software_triggers(-5).unwrap(), 0);
    }

    #[test]
    fn readout_fills_header_and_buffer() {
        let mut session = session(FakeDigitizer::with_batch(3, 4), 4);
        session.set_channel_mask(0x3).unwrap();
        session.start().unwrap();

        assert_eq!(session.readout().unwrap(), 3);
        let data = session.data();
        assert_eq!(data.header.n_events, 3);
        assert_eq!(data.header.n_channels, 2);
        assert_eq!(data.header.record_length, 4);
        assert_eq!(data.samples_len(), 24);

        let (reply, blocks) = session.download_frame();
        assert_eq!(reply, "sending header,channels,data: 8,2,96 bytes");
        assert_eq!(blocks[0].len(), 8);
        assert_eq!(blocks[1], vec![0u8, 1]);
        assert_eq!(blocks[2].len(), 96);
    }

    #[test]
    fn timeout_clears_stale_buffer() {
        let mut session = session(FakeDigitizer::with_batch(2, 4), 4);
        session.set_channel_mask(0x1).unwrap();
        session.start().unwrap();
        session.readout().unwrap();
        assert_eq!(session.data().samples_len(), 8);

        // the fake's queue is drained, so event-ready never fires again
        assert!(matches!(
            session.readout(),
            Err(CommandError::ReadoutTimeout)
        ));
        assert_eq!(session.data().header.n_events, 0);
        assert_eq!(session.data().samples_len(), 0);
        let (reply, _) = session.download_frame();
        assert_eq!(reply, "sending header,channels,data: 8,0,0 bytes");
    }

    #[test]
    fn framing_mismatch_aborts_readout() {
        let mut fake = FakeDigitizer::with_batch(1, 4);
        fake.batches[0].as_mut().unwrap()[0].groups[0].n_samples[0] = 3;
        let mut session = session(fake, 4);
        session.start().unwrap();

        assert!(matches!(session.readout(), Err(CommandError::Framing(_))));
        assert_eq!(session.data().samples_len(), 0);
        assert_eq!(session.data().header.n_events, 0);
    }

    #[test]
    fn hardware_fault_mid_readout_clears_frame() {
        let mut fake = FakeDigitizer::with_batch(1, 4);
        fake.batches
            .push_back(Err(DigitizerError::fault("read data", "bus error")));
        let mut session = session(fake, 4);
        session.set_channel_mask(0x1).unwrap();
        session.start().unwrap();
        session.readout().unwrap();
        assert_eq!(session.data().samples_len(), 4);

        // the faulting read must not leave the previous samples
        // downloadable under a zeroed header
        assert!(matches!(session.readout(), Err(CommandError::Hardware(_))));
        assert_eq!(session.data().header.n_events, 0);
        assert_eq!(session.data().samples_len(), 0);
        let (reply, _) = session.download_frame();
        assert_eq!(reply, "sending header,channels,data: 8,0,0 bytes");
    }

    #[test]
    fn download_before_first_readout_is_all_zeros() {
        let session = session(FakeDigitizer::new(), 4);
        let (reply, blocks) = session.download_frame();
        assert_eq!(reply, "sending header,channels,data: 8,0,0 bytes");
        assert_eq!(blocks[0], vec![0u8; 8]);
        assert!(blocks[1].is_empty());
        assert!(blocks[2].is_empty());
    }
}
