use atom_bios::InterpreterConfig;
use bitflags::bitflags;

/// Display controller engine generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DceVersion {
    pub major: u8,
    pub minor: u8,
}

impl DceVersion {
    pub const fn new(major: u8, minor: u8) -> Self {
        Self { major, minor }
    }

    pub fn is_dce3(self) -> bool {
        self.major >= 3
    }

    pub fn is_dce4(self) -> bool {
        self.major >= 4
    }

    pub fn is_dce6(self) -> bool {
        self.major >= 6
    }
}

impl Default for DceVersion {
    fn default() -> Self {
        Self::new(4, 0)
    }
}

bitflags! {
    /// Link features the source (adapter) side supports.
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
    pub struct SourceCaps: u8 {
        const HBR2 = 1 << 0;
        const TPS3 = 1 << 1;
        const SPREAD_SPECTRUM = 1 << 2;
    }
}

impl Default for SourceCaps {
    fn default() -> Self {
        SourceCaps::empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuxConfig {
    /// Attempts per logical transaction. Only defers consume an attempt.
    pub attempts: u32,
    /// Sleep between a defer and the next attempt.
    pub defer_delay_us: u32,
    /// Busy replies retry without consuming an attempt, up to this many times.
    pub busy_retry_limit: u32,
    /// Reply wait hint passed to the transaction table, in microseconds (sent in 10 µs units).
    pub delay_us: u32,
    /// Extension blocks read after the EDID base block.
    pub max_edid_extensions: u8,
}

impl Default for AuxConfig {
    fn default() -> Self {
        Self {
            attempts: 7,
            defer_delay_us: 400,
            busy_retry_limit: 32,
            delay_us: 0,
            max_edid_extensions: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrainingConfig {
    /// Clock recovery gives up after the sink asks for the same swing this many times in a row.
    pub cr_max_same_swing: u32,
    /// Channel equalization gives up once more than this many adjustments failed.
    pub eq_max_attempts: u32,
    /// Settle time after changing the training pattern or lane drive settings.
    pub pattern_settle_us: u32,
    /// Clock recovery status poll interval when the sink does not advertise one.
    pub default_cr_interval_us: u32,
    /// Channel equalization status poll interval when the sink does not advertise one.
    pub default_eq_interval_us: u32,
    /// Wait after waking the sink with SET_POWER.
    pub power_up_delay_us: u32,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            cr_max_same_swing: 5,
            eq_max_attempts: 5,
            pattern_settle_us: 400,
            default_cr_interval_us: 100,
            default_eq_interval_us: 400,
            power_up_delay_us: 1000,
        }
    }
}

/// Everything a [`crate::DisplayDevice`] needs besides the platform and the firmware image.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceConfig {
    pub dce: DceVersion,
    pub source_caps: SourceCaps,
    pub aux: AuxConfig,
    pub training: TrainingConfig,
    pub interpreter: InterpreterConfig,
}
