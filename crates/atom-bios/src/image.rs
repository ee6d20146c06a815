//! Firmware image container and header validation.

use crate::error::{AttachError, Result};

pub const ROM_SIGNATURE: u16 = 0xAA55;
pub const VENDOR_MAGIC_OFFSET: usize = 0x30;
pub const VENDOR_MAGIC: &[u8] = b" 761295520";
pub const ROM_HEADER_POINTER: usize = 0x48;
pub const ATOM_MAGIC: &[u8] = b"ATOM";

const ROM_HEADER_ATOM_MAGIC: usize = 4;
const ROM_HEADER_COMMAND_MASTER: usize = 0x1E;
const ROM_HEADER_DATA_MASTER: usize = 0x20;

/// Little-endian bounded reads over a byte slice.
///
/// Everything downstream of attach indexes firmware through these helpers, so a corrupt offset
/// turns into `None` instead of a panic.
pub trait ByteView {
    fn u8_at(&self, offset: usize) -> Option<u8>;
    fn u16_at(&self, offset: usize) -> Option<u16>;
    fn u32_at(&self, offset: usize) -> Option<u32>;
}

impl ByteView for [u8] {
    #[inline]
    fn u8_at(&self, offset: usize) -> Option<u8> {
        self.get(offset).copied()
    }

    #[inline]
    fn u16_at(&self, offset: usize) -> Option<u16> {
        let bytes = self.get(offset..offset.checked_add(2)?)?;
        Some(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    #[inline]
    fn u32_at(&self, offset: usize) -> Option<u32> {
        let bytes = self.get(offset..offset.checked_add(4)?)?;
        Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }
}

/// A validated firmware image.
///
/// Owned by the execution context for the life of the device; read-only after attach.
#[derive(Debug, Clone)]
pub struct FirmwareImage {
    bytes: Vec<u8>,
    rom_header: u16,
    command_master: u16,
    data_master: u16,
}

impl FirmwareImage {
    /// Validates the option ROM signature, vendor magic and ATOM ROM header.
    pub fn parse(bytes: Vec<u8>) -> Result<Self> {
        if bytes.len() < ROM_HEADER_POINTER + 2 {
            return Err(AttachError::TooSmall { len: bytes.len() });
        }

        let signature = bytes.u16_at(0).unwrap_or(0);
        if signature != ROM_SIGNATURE {
            return Err(AttachError::BadRomSignature { found: signature });
        }

        let magic = bytes.get(VENDOR_MAGIC_OFFSET..VENDOR_MAGIC_OFFSET + VENDOR_MAGIC.len());
        if magic != Some(VENDOR_MAGIC) {
            return Err(AttachError::BadVendorMagic);
        }

        let rom_header = bytes.u16_at(ROM_HEADER_POINTER).unwrap_or(0);
        let base = usize::from(rom_header);
        if base + ROM_HEADER_DATA_MASTER + 2 > bytes.len() {
            return Err(AttachError::Truncated {
                what: "ROM header",
                offset: base,
                len: bytes.len(),
            });
        }
        let atom = &bytes[base + ROM_HEADER_ATOM_MAGIC..base + ROM_HEADER_ATOM_MAGIC + 4];
        if atom != ATOM_MAGIC {
            return Err(AttachError::BadAtomMagic { offset: rom_header });
        }

        let command_master = bytes.u16_at(base + ROM_HEADER_COMMAND_MASTER).unwrap_or(0);
        let data_master = bytes.u16_at(base + ROM_HEADER_DATA_MASTER).unwrap_or(0);
        if command_master == 0 {
            return Err(AttachError::MissingMasterTable("command"));
        }
        if data_master == 0 {
            return Err(AttachError::MissingMasterTable("data"));
        }

        Ok(Self {
            bytes,
            rom_header,
            command_master,
            data_master,
        })
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn rom_header(&self) -> u16 {
        self.rom_header
    }

    pub fn command_master(&self) -> u16 {
        self.command_master
    }

    pub fn data_master(&self) -> u16 {
        self.data_master
    }
}
