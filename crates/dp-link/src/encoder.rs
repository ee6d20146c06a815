//! Source-side training commands: parameter packing for the encoder, transmitter and DP
//! encoder service tables.
//!
//! Every electrical change on the source is a firmware table call. Two paths exist for arming
//! the transmitter and picking the training pattern: the per-DIG encoder table, or the older
//! DP encoder service table. [`SourceControl::uses_encoder_table`] picks between them.

use atom_bios::{CommandTable, Outcome};
use gpu_hal::Platform;
use tracing::{debug, warn};

use crate::aux::AuxChannel;
use crate::config::DceVersion;
use crate::error::{LinkError, TrainError};
use crate::link::{RATE_2_70_KHZ, RATE_5_40_KHZ};

pub const ENCODER_DP_LINK_TRAINING_START: u8 = 0x08;
pub const ENCODER_DP_LINK_TRAINING_PATTERN1: u8 = 0x09;
pub const ENCODER_DP_LINK_TRAINING_PATTERN2: u8 = 0x0A;
pub const ENCODER_DP_LINK_TRAINING_COMPLETE: u8 = 0x0B;
pub const ENCODER_DP_LINK_TRAINING_PATTERN3: u8 = 0x13;

pub const SERVICE_DP_TRAINING_START: u8 = 2;
pub const SERVICE_DP_TRAINING_COMPLETE: u8 = 3;
pub const SERVICE_DP_TRAINING_PATTERN_SEL: u8 = 4;

pub const TRANSMITTER_SETUP_VSEMPH: u8 = 11;

const ENCODER_MODE_DP: u32 = 0;

const V1_CONFIG_LINK_RATE_2_70: u32 = 0x01;
const V1_CONFIG_LINK_B: u32 = 0x04;

const V4_CONFIG_LINK_RATE_2_70: u32 = 0x01;
const V4_CONFIG_LINK_RATE_5_40: u32 = 0x02;

const TRANSMITTER_CONFIG_COHERENT: u32 = 0x02;
const TRANSMITTER_CONFIG_LINK_B: u32 = 0x04;
const TRANSMITTER_CONFIG_DIG2: u32 = 0x08;

const SERVICE_CONFIG_DIG2: u32 = 0x04;
const SERVICE_CONFIG_LINK_B: u32 = 0x08;

/// Which transmitter block drives the connector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Transmitter {
    #[default]
    Uniphy,
    Lvtma,
}

impl Transmitter {
    pub fn table(self) -> CommandTable {
        match self {
            Transmitter::Uniphy => CommandTable::UniphyTransmitterControl,
            Transmitter::Lvtma => CommandTable::LvtmaTransmitterControl,
        }
    }
}

/// V4 encoder table bits-per-color code.
fn bpc_code(bpc: u8) -> u32 {
    match bpc {
        6 => 1,
        8 => 2,
        10 => 3,
        12 => 4,
        _ => 0,
    }
}

/// Everything the source tables need to know about one training run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceControl {
    pub dce: DceVersion,
    pub use_encoder_service: bool,
    /// DIG encoder instance (0 or 1).
    pub dig: u8,
    pub link_b: bool,
    pub transmitter: Transmitter,
    pub hpd: Option<u8>,
    pub pixel_clock_khz: u32,
    pub bpc: u8,
    pub lanes: u8,
    pub rate_khz: u32,
}

impl SourceControl {
    /// DCE4 and later always use the encoder table; older parts use it once the service table
    /// is known not to apply.
    pub fn uses_encoder_table(&self) -> bool {
        self.dce.is_dce4() || !self.use_encoder_service
    }

    /// Encoder table index and parameters for `action`.
    pub fn encoder_params(&self, action: u8) -> (u16, [u32; 2]) {
        let clock = (self.pixel_clock_khz / 10) & 0xFFFF;
        let lanes = u32::from(self.lanes);
        if self.dce.is_dce4() {
            let rate = match self.rate_khz {
                RATE_5_40_KHZ => V4_CONFIG_LINK_RATE_5_40,
                RATE_2_70_KHZ => V4_CONFIG_LINK_RATE_2_70,
                _ => 0,
            };
            let config = rate | (u32::from(self.dig) << 4);
            let hpd = self.hpd.map_or(0, |pin| u32::from(pin) + 1);
            (
                CommandTable::DigXEncoderControl.index(),
                [
                    clock | (config << 16) | (u32::from(action) << 24),
                    ENCODER_MODE_DP
                        | (lanes << 8)
                        | (bpc_code(self.bpc) << 16)
                        | (hpd << 24),
                ],
            )
        } else {
            let mut config = 0;
            if self.rate_khz == RATE_2_70_KHZ {
                config |= V1_CONFIG_LINK_RATE_2_70;
            }
            if self.link_b {
                config |= V1_CONFIG_LINK_B;
            }
            let table = if self.dig == 0 {
                CommandTable::Dig1EncoderControl
            } else {
                CommandTable::Dig2EncoderControl
            };
            (
                table.index(),
                [
                    clock | (config << 16) | (u32::from(action) << 24),
                    ENCODER_MODE_DP | (lanes << 8),
                ],
            )
        }
    }

    /// Transmitter table index and parameters that program `lane_set` on every lane.
    pub fn transmitter_params(&self, lane_set: u8) -> (u16, [u32; 2]) {
        let mut config = TRANSMITTER_CONFIG_COHERENT;
        if self.link_b {
            config |= TRANSMITTER_CONFIG_LINK_B;
        }
        if self.dig != 0 {
            config |= TRANSMITTER_CONFIG_DIG2;
        }
        (
            self.transmitter.table().index(),
            [
                (u32::from(lane_set) << 8)
                    | (config << 16)
                    | (u32::from(TRANSMITTER_SETUP_VSEMPH) << 24),
                u32::from(self.lanes),
            ],
        )
    }

    pub fn service_params(&self, action: u8, lane_or_pattern: u8) -> [u32; 2] {
        let mut config = 0;
        if self.dig != 0 {
            config |= SERVICE_CONFIG_DIG2;
        }
        if self.link_b {
            config |= SERVICE_CONFIG_LINK_B;
        }
        [
            ((self.rate_khz / 10) & 0xFFFF) | (config << 16) | (u32::from(action) << 24),
            u32::from(lane_or_pattern) << 8,
        ]
    }

    pub fn start_training<P: Platform>(&self, aux: &mut AuxChannel<'_, P>) -> Result<(), LinkError> {
        if self.uses_encoder_table() {
            self.encoder(aux, ENCODER_DP_LINK_TRAINING_START)
        } else {
            self.service(aux, SERVICE_DP_TRAINING_START, self.lanes)
        }
    }

    pub fn complete_training<P: Platform>(
        &self,
        aux: &mut AuxChannel<'_, P>,
    ) -> Result<(), LinkError> {
        if self.uses_encoder_table() {
            self.encoder(aux, ENCODER_DP_LINK_TRAINING_COMPLETE)
        } else {
            self.service(aux, SERVICE_DP_TRAINING_COMPLETE, 0)
        }
    }

    /// Switches the source to training pattern 1, 2 or 3.
    pub fn select_pattern<P: Platform>(
        &self,
        aux: &mut AuxChannel<'_, P>,
        pattern: u8,
    ) -> Result<(), LinkError> {
        if self.uses_encoder_table() {
            let action = match pattern {
                1 => ENCODER_DP_LINK_TRAINING_PATTERN1,
                3 => ENCODER_DP_LINK_TRAINING_PATTERN3,
                _ => ENCODER_DP_LINK_TRAINING_PATTERN2,
            };
            self.encoder(aux, action)
        } else {
            // The service table only distinguishes pattern 1 from the rest.
            let index = u8::from(pattern != 1);
            self.service(aux, SERVICE_DP_TRAINING_PATTERN_SEL, index)
        }
    }

    pub fn set_drive<P: Platform>(
        &self,
        aux: &mut AuxChannel<'_, P>,
        lane_set: u8,
    ) -> Result<(), LinkError> {
        let (table, params) = self.transmitter_params(lane_set);
        run(aux, table, params)
    }

    fn encoder<P: Platform>(&self, aux: &mut AuxChannel<'_, P>, action: u8) -> Result<(), LinkError> {
        let (table, params) = self.encoder_params(action);
        debug!(table, action, "encoder command");
        run(aux, table, params)
    }

    fn service<P: Platform>(
        &self,
        aux: &mut AuxChannel<'_, P>,
        action: u8,
        lane_or_pattern: u8,
    ) -> Result<(), LinkError> {
        debug!(action, lane_or_pattern, "DP encoder service command");
        run(
            aux,
            CommandTable::DpEncoderService.index(),
            self.service_params(action, lane_or_pattern),
        )
    }
}

fn run<P: Platform>(
    aux: &mut AuxChannel<'_, P>,
    table: u16,
    mut params: [u32; 2],
) -> Result<(), LinkError> {
    match aux.execute(table, &mut params)? {
        Outcome::Completed => Ok(()),
        outcome => {
            warn!(table, ?outcome, "source command did not complete");
            Err(TrainError::SourceCommand { table, outcome }.into())
        }
    }
}
