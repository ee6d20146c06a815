//! Execution context, invocation frames and operand access.

use gpu_hal::{Platform, RegisterAccess, RegisterSpace};
use tracing::{debug, warn};

use crate::config::InterpreterConfig;
use crate::error::{AttachError, ExecError, Fault};
use crate::iio::{DirectPath, IioTable, IndirectPath, PortPath, RegisterPath};
use crate::image::{ByteView, FirmwareImage};
use crate::opcodes::{Flow, OPCODES};
use crate::operand::{Alignment, Attribute, OperandKind};
use crate::tables::{DataTable, TableHeader, TableIndex};

/// Workspace indices at and above this value name interpreter pseudo-registers.
pub const WS_QUOTIENT: u8 = 0x40;
pub const WS_REMAINDER: u8 = 0x41;
pub const WS_DATA_PTR: u8 = 0x42;
pub const WS_SHIFT: u8 = 0x43;
pub const WS_OR_MASK: u8 = 0x44;
pub const WS_AND_MASK: u8 = 0x45;
pub const WS_FB_WINDOW: u8 = 0x46;
pub const WS_ATTRIBUTES: u8 = 0x47;
pub const WS_REG_PTR: u8 = 0x48;

/// Offset of `usFirmwareUseInKb` inside the VRAM usage data table.
const FIRMWARE_USE_KB_OFFSET: usize = 8;

/// Register routing selected by the port-selection opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoPort {
    /// Adapter registers. Port id 0 is the direct MMIO path; any other id selects an
    /// indirect-I/O program pair.
    Ati(u8),
    Pci,
    SystemIo,
}

impl Default for IoPort {
    fn default() -> Self {
        IoPort::Ati(0)
    }
}

/// Interpreter registers shared by a top-level invocation and every table it calls.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecState {
    pub port: IoPort,
    pub reg_block: u16,
    pub data_block: u16,
    /// Byte offset of the frame-buffer operand window inside the scratch area.
    pub fb_window: u32,
    /// Quotient of the last division; also receives the product of the last multiplication.
    pub quotient: u32,
    pub remainder: u32,
    pub compare: CompareFlags,
    pub shift: u8,
    pub attributes: u16,
}

/// Outcome of the last COMPARE or TEST.
///
/// TEST only distinguishes zero from nonzero, so after it the ordered jumps see neither
/// `Below` nor `Above`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompareFlags {
    #[default]
    Below,
    Equal,
    Above,
    NotEqual,
}

/// Result of a table invocation that got past argument validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Reached end-of-table.
    Completed,
    /// The master table has no entry for this command on this adapter.
    NotPresent,
    /// Stopped early; the action did not complete.
    Halted(Fault),
}

impl Outcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Outcome::Completed)
    }
}

/// Per-device interpreter state: the firmware image, its dispatch index, the indirect-I/O jump
/// table, the firmware scratch area, and the register state shared across nested calls.
#[derive(Debug)]
pub struct AtomContext {
    image: FirmwareImage,
    index: TableIndex,
    iio: IioTable,
    state: ExecState,
    scratch: Vec<u32>,
    params: Vec<u32>,
    config: InterpreterConfig,
}

impl AtomContext {
    pub fn attach(bytes: Vec<u8>) -> Result<Self, AttachError> {
        Self::attach_with_config(bytes, InterpreterConfig::default())
    }

    /// Validates the image, resolves the master tables, and pre-scans indirect I/O.
    pub fn attach_with_config(
        bytes: Vec<u8>,
        config: InterpreterConfig,
    ) -> Result<Self, AttachError> {
        let image = FirmwareImage::parse(bytes)?;
        let index = TableIndex::build(&image)?;
        let iio = IioTable::scan(
            image.bytes(),
            index.data_offset(image.bytes(), DataTable::IndirectIoAccess.index()),
        )?;

        let scratch_bytes = index
            .data_offset(image.bytes(), DataTable::VramUsageByFirmware.index())
            .and_then(|table| {
                image
                    .bytes()
                    .u16_at(usize::from(table) + FIRMWARE_USE_KB_OFFSET)
            })
            .map(|kb| usize::from(kb) * 1024)
            .filter(|&bytes| bytes != 0)
            .unwrap_or(config.default_scratch_bytes)
            .min(config.max_scratch_bytes);

        debug!(
            len = image.len(),
            commands = index.commands().count(),
            data_tables = index.data().count(),
            iio_programs = iio.len(),
            scratch_bytes,
            "attached firmware image"
        );

        Ok(Self {
            image,
            index,
            iio,
            state: ExecState::default(),
            scratch: vec![0; scratch_bytes.div_ceil(4)],
            params: vec![0; config.param_space_dwords],
            config,
        })
    }

    pub fn image(&self) -> &FirmwareImage {
        &self.image
    }

    pub fn tables(&self) -> &TableIndex {
        &self.index
    }

    pub fn iio(&self) -> &IioTable {
        &self.iio
    }

    /// Register state left behind by the last invocation.
    pub fn state(&self) -> &ExecState {
        &self.state
    }

    pub fn config(&self) -> &InterpreterConfig {
        &self.config
    }

    /// Header of a command table, or `None` when the table is absent or unparseable.
    pub fn command_header(&self, table: u16) -> Option<TableHeader> {
        let offset = self
            .index
            .command_offset(self.image.bytes(), table)
            .ok()
            .flatten()?;
        TableHeader::parse(self.image.bytes(), offset)
    }

    pub fn data_table_offset(&self, table: u16) -> Option<u16> {
        self.index.data_offset(self.image.bytes(), table)
    }

    pub fn scratch_len(&self) -> usize {
        self.scratch.len() * 4
    }

    /// Copies `bytes` into the scratch area at byte `offset`, little-endian within each dword.
    /// Returns `false` (and writes nothing) when the range does not fit.
    pub fn write_scratch(&mut self, offset: usize, bytes: &[u8]) -> bool {
        if offset
            .checked_add(bytes.len())
            .map_or(true, |end| end > self.scratch_len())
        {
            return false;
        }
        for (i, &b) in bytes.iter().enumerate() {
            let at = offset + i;
            let dword = &mut self.scratch[at / 4];
            let shift = (at % 4) * 8;
            *dword = (*dword & !(0xFF << shift)) | (u32::from(b) << shift);
        }
        true
    }

    /// Counterpart of [`AtomContext::write_scratch`].
    pub fn read_scratch(&self, offset: usize, out: &mut [u8]) -> bool {
        if offset
            .checked_add(out.len())
            .map_or(true, |end| end > self.scratch_len())
        {
            return false;
        }
        for (i, b) in out.iter_mut().enumerate() {
            let at = offset + i;
            *b = (self.scratch[at / 4] >> ((at % 4) * 8)) as u8;
        }
        true
    }

    /// Runs command table `table` with `params` as its parameter block.
    ///
    /// `params` is both input and output: slots the table writes are copied back, including
    /// when the table halts part way. An absent table is a no-op reported as
    /// [`Outcome::NotPresent`].
    pub fn execute<P: Platform>(
        &mut self,
        hw: &mut P,
        table: u16,
        params: &mut [u32],
    ) -> Result<Outcome, ExecError> {
        let Some(offset) = self.index.command_offset(self.image.bytes(), table)? else {
            debug!(table, "command table not present");
            return Ok(Outcome::NotPresent);
        };
        if params.len() > self.params.len() {
            return Err(ExecError::ParamsTooLarge {
                len: params.len(),
                max: self.params.len(),
            });
        }

        self.state = ExecState::default();
        self.params.fill(0);
        self.params[..params.len()].copy_from_slice(params);

        let mut exec = Executor {
            image: self.image.bytes(),
            index: &self.index,
            iio: &self.iio,
            state: &mut self.state,
            scratch: &mut self.scratch,
            params: &mut self.params,
            hw,
            config: &self.config,
            steps: 0,
        };
        let result = exec.call(offset, 0, 0);
        let steps = exec.steps;

        params.copy_from_slice(&self.params[..params.len()]);

        match result {
            Ok(()) => {
                debug!(table, steps, "command table completed");
                Ok(Outcome::Completed)
            }
            Err(fault) => {
                warn!(table, steps, %fault, "command table halted");
                Ok(Outcome::Halted(fault))
            }
        }
    }
}

/// One table invocation.
pub(crate) struct Frame {
    pub header: TableHeader,
    pub ip: usize,
    /// First parameter-space dword visible to this table.
    pub ps_base: usize,
    pub workspace: Vec<u32>,
    pub depth: u32,
}

impl Frame {
    /// A fetch of `len` bytes at the current IP, or a fault if it would cross the table end.
    #[inline]
    fn take(&mut self, len: usize) -> Result<usize, Fault> {
        let at = self.ip;
        if at + len > self.header.end() {
            return Err(Fault::OutOfBounds { offset: at });
        }
        self.ip += len;
        Ok(at)
    }

    /// Skips `len` bytes of inline data.
    pub fn skip(&mut self, len: usize) -> Result<(), Fault> {
        self.take(len).map(|_| ())
    }

    /// Next word without consuming it.
    pub fn peek_u16(&self, image: &[u8]) -> Result<u16, Fault> {
        let at = self.ip;
        if at + 2 > self.header.end() {
            return Err(Fault::OutOfBounds { offset: at });
        }
        image.u16_at(at).ok_or(Fault::OutOfBounds { offset: at })
    }

    #[inline]
    pub fn fetch_u8(&mut self, image: &[u8]) -> Result<u8, Fault> {
        let at = self.take(1)?;
        image.u8_at(at).ok_or(Fault::OutOfBounds { offset: at })
    }

    #[inline]
    pub fn fetch_u16(&mut self, image: &[u8]) -> Result<u16, Fault> {
        let at = self.take(2)?;
        image.u16_at(at).ok_or(Fault::OutOfBounds { offset: at })
    }

    #[inline]
    pub fn fetch_u32(&mut self, image: &[u8]) -> Result<u32, Fault> {
        let at = self.take(4)?;
        image.u32_at(at).ok_or(Fault::OutOfBounds { offset: at })
    }

    #[inline]
    pub fn fetch_immediate(&mut self, image: &[u8], alignment: Alignment) -> Result<u32, Fault> {
        match alignment.immediate_len() {
            4 => self.fetch_u32(image),
            2 => self.fetch_u16(image).map(u32::from),
            _ => self.fetch_u8(image).map(u32::from),
        }
    }

    /// Moves the IP to a table-relative target.
    pub fn jump(&mut self, target: u16) -> Result<(), Fault> {
        let dest = usize::from(self.header.offset) + usize::from(target);
        if dest >= self.header.end() {
            return Err(Fault::OutOfBounds { offset: dest });
        }
        self.ip = dest;
        Ok(())
    }
}

/// A decoded operand location.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Place {
    /// Register index with the register block already applied.
    Register(u16),
    Parameter(u8),
    Workspace(u8),
    FrameBuffer(u8),
    Pll(u8),
    MemoryController(u8),
}

/// Borrowed view of an [`AtomContext`] for the duration of one top-level invocation.
pub(crate) struct Executor<'a> {
    pub image: &'a [u8],
    pub index: &'a TableIndex,
    pub iio: &'a IioTable,
    pub state: &'a mut ExecState,
    pub scratch: &'a mut [u32],
    pub params: &'a mut [u32],
    pub hw: &'a mut dyn Platform,
    pub config: &'a InterpreterConfig,
    pub steps: u64,
}

impl Executor<'_> {
    /// Runs the table at `offset` until end-of-table.
    pub fn call(&mut self, offset: u16, ps_base: usize, depth: u32) -> Result<(), Fault> {
        if depth > self.config.max_call_depth {
            return Err(Fault::CallDepth {
                limit: self.config.max_call_depth,
            });
        }
        let header = TableHeader::parse(self.image, offset).ok_or(Fault::OutOfBounds {
            offset: usize::from(offset),
        })?;
        debug!(
            offset,
            size = header.size,
            ws = header.workspace_bytes,
            ps = header.parameter_bytes,
            depth,
            "enter command table"
        );

        let mut frame = Frame {
            header,
            ip: header.code_start(),
            ps_base,
            workspace: vec![0; header.workspace_dwords()],
            depth,
        };

        loop {
            self.steps += 1;
            if self.steps > self.config.max_steps {
                return Err(Fault::StepBudget {
                    limit: self.config.max_steps,
                });
            }
            let at = frame.ip;
            let opcode = frame.fetch_u8(self.image)?;
            let entry = OPCODES
                .get(usize::from(opcode))
                .ok_or(Fault::UnknownOpcode { opcode, offset: at })?;
            match (entry.handler)(self, &mut frame, entry.arg)? {
                Flow::Next => {}
                Flow::End => return Ok(()),
            }
        }
    }

    /// Decodes a destination operand of `kind` at the IP.
    pub fn place(&mut self, frame: &mut Frame, kind: OperandKind) -> Result<Place, Fault> {
        Ok(match kind {
            OperandKind::Register => {
                let index = frame.fetch_u16(self.image)?;
                Place::Register(index.wrapping_add(self.state.reg_block))
            }
            OperandKind::Parameter => Place::Parameter(frame.fetch_u8(self.image)?),
            OperandKind::Workspace => Place::Workspace(frame.fetch_u8(self.image)?),
            OperandKind::FrameBuffer => Place::FrameBuffer(frame.fetch_u8(self.image)?),
            OperandKind::Pll => Place::Pll(frame.fetch_u8(self.image)?),
            OperandKind::MemoryController => Place::MemoryController(frame.fetch_u8(self.image)?),
            // Source-only kinds never select a destination.
            OperandKind::Indirect | OperandKind::Immediate => {
                return Err(Fault::OutOfBounds { offset: frame.ip })
            }
        })
    }

    /// Reads a source operand described by `attr`. Returns the raw value and the alignment
    /// its field is to be extracted with (immediates normalize theirs).
    pub fn source(&mut self, frame: &mut Frame, attr: Attribute) -> Result<(u32, Alignment), Fault> {
        let alignment = attr.source_alignment();
        match attr.source_kind() {
            OperandKind::Immediate => {
                let value = frame.fetch_immediate(self.image, alignment)?;
                Ok((value, alignment.immediate()))
            }
            OperandKind::Indirect => {
                let at = usize::from(frame.fetch_u16(self.image)?)
                    + usize::from(self.state.data_block);
                let value = self
                    .image
                    .u32_at(at)
                    .ok_or(Fault::DataOutOfBounds { offset: at })?;
                Ok((value, alignment))
            }
            kind => {
                let place = self.place(frame, kind)?;
                Ok((self.load(frame, place, alignment)?, alignment))
            }
        }
    }

    /// `width` only matters for PCI/system-I/O ports, whose access size follows the operand.
    pub fn load(&mut self, frame: &Frame, place: Place, width: Alignment) -> Result<u32, Fault> {
        match place {
            Place::Register(index) => self.read_register(index, width),
            Place::Parameter(slot) => {
                let at = frame.ps_base + usize::from(slot);
                self.params
                    .get(at)
                    .copied()
                    .ok_or(Fault::Parameter { index: at })
            }
            Place::Workspace(slot) => self.load_workspace(frame, slot),
            Place::FrameBuffer(slot) => {
                let at = usize::from(slot) + (self.state.fb_window >> 2) as usize;
                self.scratch
                    .get(at)
                    .copied()
                    .ok_or(Fault::Scratch { index: at })
            }
            Place::Pll(index) => Ok(self.hw.read(RegisterSpace::Pll, u32::from(index))),
            Place::MemoryController(index) => Ok(self
                .hw
                .read(RegisterSpace::MemoryController, u32::from(index))),
        }
    }

    pub fn store(
        &mut self,
        frame: &mut Frame,
        place: Place,
        value: u32,
        width: Alignment,
    ) -> Result<(), Fault> {
        match place {
            Place::Register(index) => self.write_register(index, value, width),
            Place::Parameter(slot) => {
                let at = frame.ps_base + usize::from(slot);
                let dst = self
                    .params
                    .get_mut(at)
                    .ok_or(Fault::Parameter { index: at })?;
                *dst = value;
                Ok(())
            }
            Place::Workspace(slot) => self.store_workspace(frame, slot, value),
            Place::FrameBuffer(slot) => {
                let at = usize::from(slot) + (self.state.fb_window >> 2) as usize;
                let dst = self
                    .scratch
                    .get_mut(at)
                    .ok_or(Fault::Scratch { index: at })?;
                *dst = value;
                Ok(())
            }
            Place::Pll(index) => {
                self.hw.write(RegisterSpace::Pll, u32::from(index), value);
                Ok(())
            }
            Place::MemoryController(index) => {
                self.hw
                    .write(RegisterSpace::MemoryController, u32::from(index), value);
                Ok(())
            }
        }
    }

    fn load_workspace(&self, frame: &Frame, slot: u8) -> Result<u32, Fault> {
        let state = &*self.state;
        Ok(match slot {
            WS_QUOTIENT => state.quotient,
            WS_REMAINDER => state.remainder,
            WS_DATA_PTR => u32::from(state.data_block),
            WS_SHIFT => u32::from(state.shift),
            WS_OR_MASK => 1u32.checked_shl(u32::from(state.shift)).unwrap_or(0),
            WS_AND_MASK => !1u32.checked_shl(u32::from(state.shift)).unwrap_or(0),
            WS_FB_WINDOW => state.fb_window,
            WS_ATTRIBUTES => u32::from(state.attributes),
            WS_REG_PTR => u32::from(state.reg_block),
            slot if slot < WS_QUOTIENT => {
                return frame
                    .workspace
                    .get(usize::from(slot))
                    .copied()
                    .ok_or(Fault::Workspace {
                        index: slot,
                        len: frame.workspace.len(),
                    })
            }
            _ => 0,
        })
    }

    fn store_workspace(&mut self, frame: &mut Frame, slot: u8, value: u32) -> Result<(), Fault> {
        let state = &mut *self.state;
        match slot {
            WS_QUOTIENT => state.quotient = value,
            WS_REMAINDER => state.remainder = value,
            WS_DATA_PTR => state.data_block = value as u16,
            WS_SHIFT => state.shift = value as u8,
            WS_FB_WINDOW => state.fb_window = value,
            WS_ATTRIBUTES => state.attributes = value as u16,
            WS_REG_PTR => state.reg_block = value as u16,
            slot if slot < WS_QUOTIENT => {
                let len = frame.workspace.len();
                let dst = frame
                    .workspace
                    .get_mut(usize::from(slot))
                    .ok_or(Fault::Workspace { index: slot, len })?;
                *dst = value;
            }
            // The derived masks and unassigned pseudo-registers are read-only.
            _ => {}
        }
        Ok(())
    }

    fn read_register(&mut self, index: u16, width: Alignment) -> Result<u32, Fault> {
        match self.state.port {
            IoPort::Ati(0) => DirectPath.read(self.hw, index),
            IoPort::Ati(port) => IndirectPath {
                table: self.iio,
                image: self.image,
                port,
                attributes: self.state.attributes,
            }
            .read(self.hw, index),
            IoPort::Pci => PortPath {
                space: RegisterSpace::PciConfig,
                width_mask: width.mask(),
            }
            .read(self.hw, index),
            IoPort::SystemIo => PortPath {
                space: RegisterSpace::SystemIo,
                width_mask: width.mask(),
            }
            .read(self.hw, index),
        }
    }

    fn write_register(&mut self, index: u16, value: u32, width: Alignment) -> Result<(), Fault> {
        match self.state.port {
            IoPort::Ati(0) => DirectPath.write(self.hw, index, value),
            IoPort::Ati(port) => IndirectPath {
                table: self.iio,
                image: self.image,
                port,
                attributes: self.state.attributes,
            }
            .write(self.hw, index, value),
            IoPort::Pci => PortPath {
                space: RegisterSpace::PciConfig,
                width_mask: width.mask(),
            }
            .write(self.hw, index, value),
            IoPort::SystemIo => PortPath {
                space: RegisterSpace::SystemIo,
                width_mask: width.mask(),
            }
            .write(self.hw, index, value),
        }
    }
}
