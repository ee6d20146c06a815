//! Register access paths: the direct MMIO path, the indirect-I/O micro-program path, and the
//! PCI/system-I/O port path.
//!
//! Table code never touches a register directly; it goes through whichever [`RegisterPath`] the
//! current port selection picks. Some adapter families require every register access to be
//! remapped by a firmware-supplied program, which is what [`IndirectPath`] runs.

use gpu_hal::{Platform, RegisterAccess, RegisterSpace};
use tracing::trace;

use crate::error::{AttachError, Fault};
use crate::image::ByteView;
use crate::tables::COMMON_HEADER_LEN;

pub const IIO_NOP: u8 = 0;
pub const IIO_START: u8 = 1;
pub const IIO_READ: u8 = 2;
pub const IIO_WRITE: u8 = 3;
pub const IIO_CLEAR: u8 = 4;
pub const IIO_SET: u8 = 5;
pub const IIO_MOVE_INDEX: u8 = 6;
pub const IIO_MOVE_ATTR: u8 = 7;
pub const IIO_MOVE_DATA: u8 = 8;
pub const IIO_END: u8 = 9;

/// Encoded length of each indirect-I/O op, indexed by op byte.
const IIO_LEN: [usize; 10] = [1, 2, 3, 3, 3, 3, 4, 4, 4, 3];

/// Selector bit distinguishing the write program from the read program of a port.
pub const INDIRECT_WRITE: u8 = 0x80;

#[inline]
fn shl(value: u32, shift: u8) -> u32 {
    value.checked_shl(u32::from(shift)).unwrap_or(0)
}

#[inline]
fn shr(value: u32, shift: u8) -> u32 {
    value.checked_shr(u32::from(shift)).unwrap_or(0)
}

/// Low `bits` set.
#[inline]
fn field(bits: u8) -> u32 {
    match bits {
        0 => 0,
        1..=31 => u32::MAX >> (32 - u32::from(bits)),
        _ => u32::MAX,
    }
}

/// The 256-entry indirect-I/O jump table, keyed by program selector.
#[derive(Debug, Clone)]
pub struct IioTable {
    programs: [Option<usize>; 256],
}

impl Default for IioTable {
    fn default() -> Self {
        Self {
            programs: [None; 256],
        }
    }
}

impl IioTable {
    /// Pre-scans the indirect-I/O data table. An absent table yields an empty jump table.
    pub fn scan(image: &[u8], table: Option<u16>) -> Result<Self, AttachError> {
        let mut out = Self::default();
        let Some(table) = table else {
            return Ok(out);
        };

        let base = usize::from(table);
        let end = image
            .u16_at(base)
            .map(|size| base + usize::from(size))
            .filter(|&end| end <= image.len())
            .ok_or(AttachError::Truncated {
                what: "indirect I/O table",
                offset: base,
                len: image.len(),
            })?;

        let at = |pos: usize| -> Result<u8, AttachError> {
            if pos >= end {
                return Err(AttachError::BadIndirectIo {
                    offset: pos,
                    reason: "program runs past the end of the table",
                });
            }
            Ok(image[pos])
        };

        let mut pos = base + COMMON_HEADER_LEN;
        while pos < end && image[pos] == IIO_START {
            let selector = at(pos + 1)?;
            out.programs[usize::from(selector)] = Some(pos + 2);
            pos += 2;
            loop {
                let op = at(pos)?;
                match op {
                    IIO_END => {
                        pos += IIO_LEN[usize::from(IIO_END)];
                        break;
                    }
                    IIO_START => {
                        return Err(AttachError::BadIndirectIo {
                            offset: pos,
                            reason: "program start before end of previous program",
                        })
                    }
                    _ => match IIO_LEN.get(usize::from(op)) {
                        Some(len) => pos += len,
                        None => {
                            return Err(AttachError::BadIndirectIo {
                                offset: pos,
                                reason: "unknown op",
                            })
                        }
                    },
                }
            }
        }
        Ok(out)
    }

    pub fn program(&self, selector: u8) -> Option<usize> {
        self.programs[usize::from(selector)]
    }

    pub fn len(&self) -> usize {
        self.programs.iter().filter(|p| p.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Runs the program for `selector`, threading the register index, data and attribute word
    /// through the 32-bit temporary. Returns the final temporary.
    pub fn run(
        &self,
        image: &[u8],
        hw: &mut dyn Platform,
        selector: u8,
        index: u16,
        data: u32,
        attributes: u16,
    ) -> Result<u32, Fault> {
        let mut pos = self
            .program(selector)
            .ok_or(Fault::MissingIndirectProgram { selector })?;
        let mut temp = u32::from(selector);

        loop {
            let op = image.u8_at(pos).ok_or(Fault::OutOfBounds { offset: pos })?;
            let byte = |n: usize| image.u8_at(pos + n).ok_or(Fault::OutOfBounds { offset: pos + n });
            let word = |n: usize| {
                image
                    .u16_at(pos + n)
                    .ok_or(Fault::OutOfBounds { offset: pos + n })
            };

            match op {
                IIO_NOP => {}
                IIO_READ => {
                    temp = hw.read(RegisterSpace::General, u32::from(word(1)?) << 2);
                }
                IIO_WRITE => {
                    hw.write(RegisterSpace::General, u32::from(word(1)?) << 2, temp);
                }
                IIO_CLEAR => temp &= !shl(field(byte(1)?), byte(2)?),
                IIO_SET => temp |= shl(field(byte(1)?), byte(2)?),
                IIO_MOVE_INDEX | IIO_MOVE_ATTR | IIO_MOVE_DATA => {
                    let source = match op {
                        IIO_MOVE_INDEX => u32::from(index),
                        IIO_MOVE_ATTR => u32::from(attributes),
                        _ => data,
                    };
                    let mask = field(byte(1)?);
                    let dst_shift = byte(3)?;
                    temp &= !shl(mask, dst_shift);
                    temp |= shl(shr(source, byte(2)?) & mask, dst_shift);
                }
                IIO_END => {
                    trace!(selector, index, value = temp, "indirect I/O program done");
                    return Ok(temp);
                }
                _ => return Err(Fault::UnknownOpcode { opcode: op, offset: pos }),
            }
            pos += IIO_LEN[usize::from(op)];
        }
    }
}

/// Strategy for reaching a register named by table code.
pub trait RegisterPath {
    fn read(&mut self, hw: &mut dyn Platform, index: u16) -> Result<u32, Fault>;
    fn write(&mut self, hw: &mut dyn Platform, index: u16, value: u32) -> Result<(), Fault>;
}

/// Plain MMIO: register index `n` lives at byte offset `4 * n` of the general space.
#[derive(Debug, Default, Clone, Copy)]
pub struct DirectPath;

impl RegisterPath for DirectPath {
    fn read(&mut self, hw: &mut dyn Platform, index: u16) -> Result<u32, Fault> {
        Ok(hw.read(RegisterSpace::General, u32::from(index) << 2))
    }

    fn write(&mut self, hw: &mut dyn Platform, index: u16, mut value: u32) -> Result<(), Fault> {
        // Register 0 is the MM index register, which takes a byte address.
        if index == 0 {
            value <<= 2;
        }
        hw.write(RegisterSpace::General, u32::from(index) << 2, value);
        Ok(())
    }
}

/// Routes accesses through the indirect-I/O program selected by the current port id.
#[derive(Debug, Clone, Copy)]
pub struct IndirectPath<'a> {
    pub table: &'a IioTable,
    pub image: &'a [u8],
    pub port: u8,
    pub attributes: u16,
}

impl RegisterPath for IndirectPath<'_> {
    fn read(&mut self, hw: &mut dyn Platform, index: u16) -> Result<u32, Fault> {
        self.table
            .run(self.image, hw, self.port, index, 0, self.attributes)
    }

    fn write(&mut self, hw: &mut dyn Platform, index: u16, value: u32) -> Result<(), Fault> {
        self.table
            .run(
                self.image,
                hw,
                self.port | INDIRECT_WRITE,
                index,
                value,
                self.attributes,
            )
            .map(|_| ())
    }
}

/// PCI configuration or system I/O access with an operand-derived width.
#[derive(Debug, Clone, Copy)]
pub struct PortPath {
    pub space: RegisterSpace,
    pub width_mask: u32,
}

impl RegisterPath for PortPath {
    fn read(&mut self, hw: &mut dyn Platform, index: u16) -> Result<u32, Fault> {
        Ok(hw.read(self.space, u32::from(index)) & self.width_mask)
    }

    fn write(&mut self, hw: &mut dyn Platform, index: u16, value: u32) -> Result<(), Fault> {
        if self.width_mask == u32::MAX {
            hw.write(self.space, u32::from(index), value);
        } else {
            hw.write_masked(self.space, u32::from(index), value, self.width_mask);
        }
        Ok(())
    }
}
