//! I2C-over-AUX pass-through and EDID retrieval.

use bitflags::bitflags;
use gpu_hal::Platform;
use tracing::debug;

use crate::aux::{AuxChannel, AuxCommand, AuxRequest};
use crate::error::{AuxError, EdidError, LinkError};

pub const DDC_ADDR: u8 = 0x50;
pub const DDC_SEGMENT_ADDR: u8 = 0x30;
pub const EDID_BLOCK_SIZE: usize = 128;
pub const EDID_HEADER: [u8; 8] = [0x00, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x00];
/// Offset of the extension block count in the base block.
const EDID_EXTENSION_COUNT: usize = 126;

bitflags! {
    /// Per-byte I2C transfer mode.
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
    pub struct I2cMode: u8 {
        const START = 1 << 0;
        const WRITE = 1 << 1;
        const READ = 1 << 2;
        const STOP = 1 << 3;
    }
}

impl<P: Platform> AuxChannel<'_, P> {
    /// Moves one byte (or just the address, for bare start/stop) across the sideband.
    ///
    /// Every request except a stop keeps the I2C transaction open (MOT). Returns the byte read
    /// for `READ`, otherwise 0.
    pub fn i2c_transfer(&mut self, address: u8, mode: I2cMode, byte: u8) -> Result<u8, AuxError> {
        let mot = !mode.contains(I2cMode::STOP);
        let payload = [byte];
        let request = if mode.contains(I2cMode::WRITE) {
            AuxRequest {
                command: AuxCommand::I2cWrite { mot },
                address: u16::from(address),
                data: &payload,
                read_len: 0,
            }
        } else if mode.contains(I2cMode::READ) {
            AuxRequest {
                command: AuxCommand::I2cRead { mot },
                address: u16::from(address),
                data: &[],
                read_len: 1,
            }
        } else {
            // Address-only start or stop.
            AuxRequest {
                command: AuxCommand::I2cWrite { mot },
                address: u16::from(address),
                data: &[],
                read_len: 0,
            }
        };

        let reply = self.transact(&request)?;
        Ok(reply.data().first().copied().unwrap_or(0))
    }

    fn read_edid_block(&mut self, index: u8) -> Result<[u8; EDID_BLOCK_SIZE], AuxError> {
        if index >= 2 {
            self.i2c_transfer(DDC_SEGMENT_ADDR, I2cMode::START | I2cMode::WRITE, index / 2)?;
        }
        let offset = (index % 2) * EDID_BLOCK_SIZE as u8;
        self.i2c_transfer(DDC_ADDR, I2cMode::START | I2cMode::WRITE, offset)?;

        let mut block = [0u8; EDID_BLOCK_SIZE];
        for (i, byte) in block.iter_mut().enumerate() {
            let mode = if i == 0 {
                I2cMode::START | I2cMode::READ
            } else {
                I2cMode::READ
            };
            *byte = self.i2c_transfer(DDC_ADDR, mode, 0)?;
        }
        self.i2c_transfer(DDC_ADDR, I2cMode::STOP, 0)?;
        Ok(block)
    }

    /// Reads the EDID base block and up to `max_extensions` extension blocks.
    pub fn read_edid(&mut self, max_extensions: u8) -> Result<Edid, LinkError> {
        let base = self.read_edid_block(0)?;
        if base[..EDID_HEADER.len()] != EDID_HEADER {
            return Err(EdidError::BadHeader.into());
        }
        if !checksum_ok(&base) {
            return Err(EdidError::BadChecksum { block: 0 }.into());
        }

        let advertised = base[EDID_EXTENSION_COUNT];
        let extensions = advertised.min(max_extensions);
        let mut blocks = vec![base];
        for index in 1..=extensions {
            let block = self.read_edid_block(index)?;
            if !checksum_ok(&block) {
                return Err(EdidError::BadChecksum { block: index }.into());
            }
            blocks.push(block);
        }
        debug!(
            channel = self.channel(),
            advertised,
            read = blocks.len(),
            "EDID read"
        );
        Ok(Edid { blocks })
    }
}

pub fn checksum_ok(block: &[u8; EDID_BLOCK_SIZE]) -> bool {
    block.iter().fold(0u8, |acc, &b| acc.wrapping_add(b)) == 0
}

/// Validated EDID: the base block followed by the extension blocks that were read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edid {
    blocks: Vec<[u8; EDID_BLOCK_SIZE]>,
}

impl Edid {
    pub fn base(&self) -> &[u8; EDID_BLOCK_SIZE] {
        &self.blocks[0]
    }

    pub fn blocks(&self) -> &[[u8; EDID_BLOCK_SIZE]] {
        &self.blocks
    }

    /// Extension count advertised by the base block, which may exceed what was read.
    pub fn advertised_extensions(&self) -> u8 {
        self.blocks[0][EDID_EXTENSION_COUNT]
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.blocks.iter().flatten().copied().collect()
    }
}
