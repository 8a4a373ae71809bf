use crate::digitizer::{CHANNELS_PER_GROUP, GROUP_STRIDE, MAX_CHANNELS};
use crate::event::DecodedEvent;
use thiserror::Error;

/// Size of the wire-encoded [`SessionHeader`].
pub const HEADER_SIZE: usize = 8;

/// Header of the three-block download frame: four little-endian `u16`
/// fields, 8 bytes total. `n_events`/`n_channels` stay 0 until a readout
/// completes without error.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionHeader {
    pub n_events: u16,
    pub n_channels: u16,
    pub record_length: u16,
    pub frequency: u16,
}

impl SessionHeader {
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut bytes = [0u8; HEADER_SIZE];
        bytes[0..2].copy_from_slice(&self.n_events.to_le_bytes());
        bytes[2..4].copy_from_slice(&self.n_channels.to_le_bytes());
        bytes[4..6].copy_from_slice(&self.record_length.to_le_bytes());
        bytes[6..8].copy_from_slice(&self.frequency.to_le_bytes());
        bytes
    }
}

/// A channel slice whose length differs from the advertised record length.
/// The download frame carries no per-slice markers, so such a slice would
/// make the whole buffer undecodable.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("framing mismatch on channel {channel}: got {actual} samples, record length is {expected}")]
pub struct FramingMismatch {
    pub channel: u8,
    pub expected: u16,
    pub actual: usize,
}

/// The process-wide acquisition frame: header, channel list and flat sample
/// buffer. There is exactly one per server, shared across client
/// connections; `readout` rebuilds it and `download` serializes it.
#[derive(Debug, Default)]
pub struct SessionData {
    pub header: SessionHeader,
    has_channel: [bool; MAX_CHANNELS],
    channels: Vec<u8>,
    samples: Vec<f32>,
}

impl SessionData {
    /// First step of a readout: fresh header and presence bitmap. The
    /// sample buffer is only reset once the hardware read succeeds, in
    /// [`Self::clear_samples`].
    pub fn begin_readout(&mut self, record_length: u16, frequency: u16) {
        self.header = SessionHeader {
            n_events: 0,
            n_channels: 0,
            record_length,
            frequency,
        };
        self.has_channel = [false; MAX_CHANNELS];
        self.channels.clear();
    }

    pub fn clear_samples(&mut self) {
        self.samples.clear();
    }

    /// Drop the whole frame. Used when a readout times out or aborts, so no
    /// stale data is downloadable under a zeroed header.
    pub fn clear(&mut self) {
        self.header.n_events = 0;
        self.header.n_channels = 0;
        self.has_channel = [false; MAX_CHANNELS];
        self.channels.clear();
        self.samples.clear();
    }

    /// Append one event's samples: for each present group, each channel
    /// whose bit is set in `channel_mask` contributes `record_length`
    /// samples in ascending channel-id order.
    pub fn fill_event(
        &mut self,
        event: &DecodedEvent,
        channel_mask: u32,
    ) -> Result<(), FramingMismatch> {
        for (igr, group) in event.groups.iter().enumerate() {
            if !group.present {
                continue;
            }
            let mask = channel_mask >> (CHANNELS_PER_GROUP * igr);
            for ich in 0..CHANNELS_PER_GROUP {
                if mask & (1 << ich) == 0 {
                    continue;
                }
                let id = (ich + igr * GROUP_STRIDE) as u8;
                let n = group.n_samples[ich];
                if n != self.header.record_length as usize {
                    return Err(FramingMismatch {
                        channel: id,
                        expected: self.header.record_length,
                        actual: n,
                    });
                }
                self.has_channel[id as usize] = true;
                self.samples
                    .extend(group.samples.row(ich).iter().take(n).copied());
            }
        }
        Ok(())
    }

    /// Rebuild the channel list from the presence bitmap and finalize the
    /// header counts.
    pub fn finish_readout(&mut self, n_events: usize) {
        self.channels.clear();
        for (id, &present) in self.has_channel.iter().enumerate() {
            if present {
                self.channels.push(id as u8);
            }
        }
        self.header.n_channels = self.channels.len() as u16;
        self.header.n_events = n_events as u16;
    }

    pub fn channels(&self) -> &[u8] {
        &self.channels
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn samples_len(&self) -> usize {
        self.samples.len()
    }

    pub fn channel_bytes(&self) -> Vec<u8> {
        self.channels.clone()
    }

    /// Little-endian IEEE-754 encoding of the sample buffer, 4 bytes per
    /// sample.
    pub fn sample_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.samples.len() * 4);
        for sample in &self.samples {
            bytes.extend_from_slice(&sample.to_le_bytes());
        }
        bytes
    }
}
