use crate::config::AcquisitionConfig;
use crate::digitizer::{Digitizer, DigitizerError, CHANNELS_PER_GROUP};
use crate::event::DecodedEvent;
use rand::Rng;

/// Software-only digitizer for running the server without a physical board.
///
/// Software triggers queue events; each queued event decodes to a pulse plus
/// noise on every channel of every enabled group, `record_length` samples
/// long. Board-ready tracks the open state, event-ready the trigger queue.
pub struct SimDigitizer {
    open: bool,
    running: bool,
    config: AcquisitionConfig,
    pending_events: u32,
}

impl SimDigitizer {
    pub fn new() -> Self {
        Self {
            open: false,
            running: false,
            config: AcquisitionConfig::default(),
            pending_events: 0,
        }
    }

    fn synth_event(&self) -> DecodedEvent {
        let record_length = self.config.record_length as usize;
        let mut event = DecodedEvent::new(record_length);
        let mut rng = rand::rng();
        let mid = record_length as f32 / 2.0;
        for (igr, group) in event.groups.iter_mut().enumerate() {
            if self.config.group_mask & (1 << igr) == 0 {
                continue;
            }
            group.present = true;
            for ich in 0..CHANNELS_PER_GROUP {
                group.n_samples[ich] = record_length;
                for (i, v) in group.samples.row_mut(ich).iter_mut().enumerate() {
                    let t = i as f32 - mid;
                    let pulse = 800.0 * (-t * t / (2.0 * 64.0 * 64.0)).exp();
                    *v = 2048.0 + pulse + rng.random_range(-4.0..4.0);
                }
            }
        }
        event
    }

    fn require_open(&self) -> Result<(), DigitizerError> {
        if self.open {
            Ok(())
        } else {
            Err(DigitizerError::NotOpen)
        }
    }
}

impl Default for SimDigitizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Digitizer for SimDigitizer {
    fn open(&mut self) -> Result<(), DigitizerError> {
        self.open = true;
        Ok(())
    }

    fn close(&mut self) -> Result<(), DigitizerError> {
        self.open = false;
        self.running = false;
        self.pending_events = 0;
        Ok(())
    }

    fn configure(&mut self, config: &AcquisitionConfig) -> Result<(), DigitizerError> {
        self.require_open()?;
        self.config = config.clone();
        Ok(())
    }

    fn start(&mut self) -> Result<(), DigitizerError> {
        self.require_open()?;
        self.running = true;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), DigitizerError> {
        self.require_open()?;
        self.running = false;
        Ok(())
    }

    fn model(&self) -> &str {
        "DT5742B-SIM"
    }

    fn is_board_ready(&mut self) -> Result<bool, DigitizerError> {
        Ok(self.open)
    }

    fn is_running(&mut self) -> Result<bool, DigitizerError> {
        Ok(self.running)
    }

    fn is_event_ready(&mut self) -> Result<bool, DigitizerError> {
        Ok(self.pending_events > 0)
    }

    fn send_software_trigger(&mut self) -> Result<(), DigitizerError> {
        self.require_open()?;
        if self.running {
            self.pending_events += 1;
        }
        Ok(())
    }

    fn read_batch(&mut self) -> Result<Vec<DecodedEvent>, DigitizerError> {
        self.require_open()?;
        let count = self.pending_events.min(self.config.max_block_transfer);
        self.pending_events -= count;
        Ok((0..count).map(|_| self.synth_event()).collect())
    }
}
