use confique::Config;
use serde::Deserialize;

/// Sampling frequencies (MHz) the DRS4 chip supports.
pub const ALLOWED_FREQUENCIES: [u16; 4] = [5000, 2500, 1000, 750];

#[derive(Config, Debug, Clone)]
pub struct Conf {
    #[config(nested)]
    pub server: ServerSettings,
    #[config(nested)]
    pub acquisition: AcquisitionSettings,
}

#[derive(Config, Debug, Clone)]
pub struct ServerSettings {
    #[config(default = "0.0.0.0")]
    pub bind: String,
    #[config(default = 30001)]
    pub port: u16,
    /// How often the accept loop checks the shutdown channel while no
    /// client is connected.
    #[config(default = 50)]
    pub accept_poll_ms: u64,
    /// Per-connection receive timeout, so the shutdown channel is also
    /// observed while a client is idle.
    #[config(default = 200)]
    pub recv_timeout_ms: u64,
}

#[derive(Config, Debug, Clone)]
pub struct AcquisitionSettings {
    /// Sampling frequency in MHz: 5000, 2500, 1000 or 750.
    #[config(default = 5000)]
    pub frequency: u16,
    /// Samples per channel per triggered event.
    #[config(default = 1024)]
    pub record_length: u16,
    /// Maximum events per block transfer.
    #[config(default = 1024)]
    pub max_block_transfer: u32,
    #[config(default = 32768)]
    pub trigger_dc_offset: u32,
    #[config(default = 20934)]
    pub trigger_threshold: u32,
    #[config(default = 0)]
    pub software_trigger_count: u32,
    #[config(default = 3)]
    pub group_mask: MaskValue,
    #[config(default = 65535)]
    pub channel_mask: MaskValue,
    /// Upper bound on the event-ready poll loop, in milliseconds.
    #[config(default = 1000)]
    pub readout_timeout_ms: u64,
    /// Sleep between event-ready probes, in milliseconds.
    #[config(default = 1)]
    pub poll_interval_ms: u64,
}

/// A bit mask written either as an integer or as a hex string
/// (`"0xff"` or `"ff"`), mirroring what the wire commands accept.
#[derive(Deserialize, Clone, Debug)]
#[serde(untagged)]
pub enum MaskValue {
    Value(u32),
    Hex(String),
}

impl MaskValue {
    pub fn bits(&self) -> anyhow::Result<u32> {
        match self {
            MaskValue::Value(v) => Ok(*v),
            MaskValue::Hex(s) => {
                let digits = s
                    .strip_prefix("0x")
                    .or_else(|| s.strip_prefix("0X"))
                    .unwrap_or(s);
                u32::from_str_radix(digits, 16)
                    .map_err(|_| anyhow::anyhow!("invalid hex mask: {s}"))
            }
        }
    }
}

/// Runtime acquisition configuration, mutable through the `sampling`,
/// `grmask` and `chmask` commands while acquisition is idle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcquisitionConfig {
    pub frequency: u16,
    pub record_length: u16,
    pub max_block_transfer: u32,
    pub trigger_dc_offset: u32,
    pub trigger_threshold: u32,
    pub software_trigger_count: u32,
    pub group_mask: u32,
    pub channel_mask: u32,
    pub readout_timeout_ms: u64,
    pub poll_interval_ms: u64,
}

impl AcquisitionConfig {
    pub fn from_settings(settings: &AcquisitionSettings) -> anyhow::Result<Self> {
        Ok(Self {
            frequency: settings.frequency,
            record_length: settings.record_length,
            max_block_transfer: settings.max_block_transfer,
            trigger_dc_offset: settings.trigger_dc_offset,
            trigger_threshold: settings.trigger_threshold,
            software_trigger_count: settings.software_trigger_count,
            group_mask: settings.group_mask.bits()?,
            channel_mask: settings.channel_mask.bits()?,
            readout_timeout_ms: settings.readout_timeout_ms,
            poll_interval_ms: settings.poll_interval_ms,
        })
    }
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            frequency: 5000,
            record_length: 1024,
            max_block_transfer: 1024,
            trigger_dc_offset: 32768,
            trigger_threshold: 20934,
            software_trigger_count: 0,
            group_mask: 0x3,
            channel_mask: 0xFFFF,
            readout_timeout_ms: 1000,
            poll_interval_ms: 1,
        }
    }
}
