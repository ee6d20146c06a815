//! Table dispatch index: logical command/data identifiers to image offsets.

use crate::error::{AttachError, ExecError};
use crate::image::{ByteView, FirmwareImage};

/// Size of the common header at the start of every master, command and data table.
pub const COMMON_HEADER_LEN: usize = 4;
/// Command table code starts after the common header and the two attribute bytes.
pub const COMMAND_HEADER_LEN: usize = 6;

/// Logical command table identifiers, numbered by their slot in the command master table.
///
/// Only the tables the link layer invokes (plus their usual neighbours) are named; any other
/// slot can still be executed by raw index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum CommandTable {
    AsicInit = 0,
    DigXEncoderControl = 4,
    SetPixelClock = 12,
    EnableCrtc = 35,
    SetCrtcTiming = 39,
    ProcessI2cChannelTransaction = 54,
    Dig1EncoderControl = 74,
    Dig2EncoderControl = 75,
    /// Also known as DIG1TransmitterControl.
    UniphyTransmitterControl = 76,
    /// Also known as DIG2TransmitterControl.
    LvtmaTransmitterControl = 77,
    ProcessAuxChannelTransaction = 78,
    DpEncoderService = 79,
    GetVoltageInfo = 80,
}

impl CommandTable {
    #[inline]
    pub const fn index(self) -> u16 {
        self as u16
    }
}

/// Logical data table identifiers, numbered by their slot in the data master table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum DataTable {
    FirmwareInfo = 4,
    GpioI2cInfo = 10,
    VramUsageByFirmware = 11,
    GpioPinLut = 12,
    ObjectHeader = 22,
    IndirectIoAccess = 23,
}

impl DataTable {
    #[inline]
    pub const fn index(self) -> u16 {
        self as u16
    }
}

/// One master table: a common header followed by u16 offsets, zero meaning "absent".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MasterTable {
    offset: u16,
    count: u16,
}

impl MasterTable {
    fn parse(image: &FirmwareImage, offset: u16, what: &'static str) -> Result<Self, AttachError> {
        let bytes = image.bytes();
        let base = usize::from(offset);
        let size = bytes.u16_at(base).ok_or(AttachError::Truncated {
            what,
            offset: base,
            len: bytes.len(),
        })?;
        let size = usize::from(size);
        if size < COMMON_HEADER_LEN || base + size > bytes.len() {
            return Err(AttachError::Truncated {
                what,
                offset: base,
                len: bytes.len(),
            });
        }
        let count = ((size - COMMON_HEADER_LEN) / 2) as u16;
        Ok(Self { offset, count })
    }

    pub fn count(&self) -> u16 {
        self.count
    }

    /// The image offset stored in slot `index`, or `None` when the slot is zero.
    pub fn entry(&self, image: &[u8], index: u16) -> Result<Option<u16>, ExecError> {
        if index >= self.count {
            return Err(ExecError::UnknownTable {
                index,
                count: self.count,
            });
        }
        let slot = usize::from(self.offset) + COMMON_HEADER_LEN + 2 * usize::from(index);
        Ok(image.u16_at(slot).filter(|&offset| offset != 0))
    }
}

/// Command and data master tables, resolved once per image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableIndex {
    commands: MasterTable,
    data: MasterTable,
}

impl TableIndex {
    pub fn build(image: &FirmwareImage) -> Result<Self, AttachError> {
        Ok(Self {
            commands: MasterTable::parse(image, image.command_master(), "command master table")?,
            data: MasterTable::parse(image, image.data_master(), "data master table")?,
        })
    }

    pub fn commands(&self) -> &MasterTable {
        &self.commands
    }

    pub fn data(&self) -> &MasterTable {
        &self.data
    }

    pub fn command_offset(&self, image: &[u8], index: u16) -> Result<Option<u16>, ExecError> {
        self.commands.entry(image, index)
    }

    /// Data table offset; out-of-range slots read as absent.
    pub fn data_offset(&self, image: &[u8], index: u16) -> Option<u16> {
        self.data.entry(image, index).ok().flatten()
    }
}

/// Parsed command table header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableHeader {
    pub offset: u16,
    pub size: u16,
    pub format_revision: u8,
    pub content_revision: u8,
    pub workspace_bytes: u8,
    pub parameter_bytes: u8,
}

impl TableHeader {
    /// Returns `None` when the header or the declared body does not fit in the image.
    pub fn parse(image: &[u8], offset: u16) -> Option<Self> {
        let base = usize::from(offset);
        let size = image.u16_at(base)?;
        if usize::from(size) < COMMAND_HEADER_LEN || base + usize::from(size) > image.len() {
            return None;
        }
        Some(Self {
            offset,
            size,
            format_revision: image.u8_at(base + 2)?,
            content_revision: image.u8_at(base + 3)?,
            workspace_bytes: image.u8_at(base + 4)?,
            parameter_bytes: image.u8_at(base + 5)? & 0x7F,
        })
    }

    pub fn code_start(&self) -> usize {
        usize::from(self.offset) + COMMAND_HEADER_LEN
    }

    pub fn end(&self) -> usize {
        usize::from(self.offset) + usize::from(self.size)
    }

    pub fn workspace_dwords(&self) -> usize {
        usize::from(self.workspace_bytes).div_ceil(4)
    }

    pub fn parameter_dwords(&self) -> usize {
        usize::from(self.parameter_bytes) / 4
    }
}
