use crate::iio::{IIO_CLEAR, IIO_END, IIO_MOVE_ATTR, IIO_MOVE_DATA, IIO_MOVE_INDEX, IIO_READ, IIO_SET, IIO_START, IIO_WRITE};
use crate::image::{ATOM_MAGIC, ROM_HEADER_POINTER, ROM_SIGNATURE, VENDOR_MAGIC, VENDOR_MAGIC_OFFSET};
use crate::operand::Alignment;
use crate::tables::{COMMAND_HEADER_LEN, COMMON_HEADER_LEN};

/// Command master table slots emitted by [`ImageBuilder`].
pub const COMMAND_SLOTS: u16 = 81;
/// Data master table slots emitted by [`ImageBuilder`].
pub const DATA_SLOTS: u16 = 34;

const ROM_HEADER_OFFSET: usize = 0x80;
const ROM_HEADER_LEN: usize = 0x24;
const MASTERS_OFFSET: usize = 0x100;

/// Builds a minimal firmware image with the given command and data tables.
///
/// Layout: option ROM signature and vendor magic, a ROM header at `0x80`, both master tables
/// at `0x100`, then every table body back to back in slot order. Tables are stored verbatim so
/// tests can also plant malformed headers.
#[derive(Debug, Clone)]
pub struct ImageBuilder {
    commands: Vec<Option<Vec<u8>>>,
    data: Vec<Option<Vec<u8>>>,
}

impl Default for ImageBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageBuilder {
    pub fn new() -> Self {
        Self {
            commands: vec![None; usize::from(COMMAND_SLOTS)],
            data: vec![None; usize::from(DATA_SLOTS)],
        }
    }

    /// Installs a complete command table (header included), e.g. from [`TableAsm::finish`].
    pub fn command(mut self, slot: u16, table: Vec<u8>) -> Self {
        self.commands[usize::from(slot)] = Some(table);
        self
    }

    /// Installs a data table, prefixing `body` with a common header.
    pub fn data(mut self, slot: u16, body: &[u8]) -> Self {
        let size = (COMMON_HEADER_LEN + body.len()) as u16;
        let mut table = Vec::with_capacity(usize::from(size));
        table.extend_from_slice(&size.to_le_bytes());
        table.extend_from_slice(&[1, 1]);
        table.extend_from_slice(body);
        self.data[usize::from(slot)] = Some(table);
        self
    }

    /// Declares the firmware scratch size in KiB via the VRAM usage data table.
    pub fn scratch_kb(self, kb: u16) -> Self {
        let mut body = [0u8; 8];
        body[4..6].copy_from_slice(&kb.to_le_bytes());
        self.data(crate::tables::DataTable::VramUsageByFirmware.index(), &body)
    }

    pub fn build(self) -> Vec<u8> {
        let mut out = vec![0u8; MASTERS_OFFSET];
        out[0..2].copy_from_slice(&ROM_SIGNATURE.to_le_bytes());
        out[VENDOR_MAGIC_OFFSET..VENDOR_MAGIC_OFFSET + VENDOR_MAGIC.len()]
            .copy_from_slice(VENDOR_MAGIC);
        out[ROM_HEADER_POINTER..ROM_HEADER_POINTER + 2]
            .copy_from_slice(&(ROM_HEADER_OFFSET as u16).to_le_bytes());

        let rom = ROM_HEADER_OFFSET;
        out[rom..rom + 2].copy_from_slice(&(ROM_HEADER_LEN as u16).to_le_bytes());
        out[rom + 4..rom + 8].copy_from_slice(ATOM_MAGIC);

        let command_master = MASTERS_OFFSET;
        let data_master = command_master + COMMON_HEADER_LEN + 2 * self.commands.len();
        let bodies = data_master + COMMON_HEADER_LEN + 2 * self.data.len();
        out[rom + 0x1E..rom + 0x20].copy_from_slice(&(command_master as u16).to_le_bytes());
        out[rom + 0x20..rom + 0x22].copy_from_slice(&(data_master as u16).to_le_bytes());
        out.resize(bodies, 0);

        for (master, tables) in [(command_master, &self.commands), (data_master, &self.data)] {
            let size = (COMMON_HEADER_LEN + 2 * tables.len()) as u16;
            out[master..master + 2].copy_from_slice(&size.to_le_bytes());
            out[master + 2] = 1;
            out[master + 3] = 1;
            for (slot, table) in tables.iter().enumerate() {
                let Some(table) = table else { continue };
                let offset = u16::try_from(out.len()).expect("test image exceeds 64 KiB");
                let entry = master + COMMON_HEADER_LEN + 2 * slot;
                out[entry..entry + 2].copy_from_slice(&offset.to_le_bytes());
                out.extend_from_slice(table);
            }
        }
        out
    }
}

/// Assembles an indirect I/O data table body.
#[derive(Debug, Clone, Default)]
pub struct IioAsm {
    bytes: Vec<u8>,
}

impl IioAsm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(mut self, selector: u8) -> Self {
        self.bytes.extend_from_slice(&[IIO_START, selector]);
        self
    }

    /// Loads the temporary from general register `index` (a register index, not a byte offset).
    pub fn read(mut self, index: u16) -> Self {
        self.bytes.push(IIO_READ);
        self.bytes.extend_from_slice(&index.to_le_bytes());
        self
    }

    pub fn write(mut self, index: u16) -> Self {
        self.bytes.push(IIO_WRITE);
        self.bytes.extend_from_slice(&index.to_le_bytes());
        self
    }

    pub fn clear(mut self, bits: u8, shift: u8) -> Self {
        self.bytes.extend_from_slice(&[IIO_CLEAR, bits, shift]);
        self
    }

    pub fn set(mut self, bits: u8, shift: u8) -> Self {
        self.bytes.extend_from_slice(&[IIO_SET, bits, shift]);
        self
    }

    pub fn move_index(mut self, bits: u8, src_shift: u8, dst_shift: u8) -> Self {
        self.bytes
            .extend_from_slice(&[IIO_MOVE_INDEX, bits, src_shift, dst_shift]);
        self
    }

    pub fn move_attr(mut self, bits: u8, src_shift: u8, dst_shift: u8) -> Self {
        self.bytes
            .extend_from_slice(&[IIO_MOVE_ATTR, bits, src_shift, dst_shift]);
        self
    }

    pub fn move_data(mut self, bits: u8, src_shift: u8, dst_shift: u8) -> Self {
        self.bytes
            .extend_from_slice(&[IIO_MOVE_DATA, bits, src_shift, dst_shift]);
        self
    }

    pub fn end(mut self) -> Self {
        self.bytes.extend_from_slice(&[IIO_END, 0, 0]);
        self
    }

    pub fn finish(self) -> Vec<u8> {
        self.bytes
    }
}

/// Destination operand of an assembled instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dst {
    Reg(u16),
    Ps(u8),
    Ws(u8),
    Fb(u8),
    Pll(u8),
    Mc(u8),
}

impl Dst {
    fn variant(self) -> u8 {
        match self {
            Dst::Reg(_) => 0,
            Dst::Ps(_) => 1,
            Dst::Ws(_) => 2,
            Dst::Fb(_) => 3,
            Dst::Pll(_) => 4,
            Dst::Mc(_) => 5,
        }
    }

    fn emit(self, out: &mut Vec<u8>) {
        match self {
            Dst::Reg(index) => out.extend_from_slice(&index.to_le_bytes()),
            Dst::Ps(i) | Dst::Ws(i) | Dst::Fb(i) | Dst::Pll(i) | Dst::Mc(i) => out.push(i),
        }
    }
}

/// Source operand of an assembled instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Src {
    Reg(u16),
    Ps(u8),
    Ws(u8),
    Fb(u8),
    /// Offset into the current data block.
    Id(u16),
    Imm(u32),
    Pll(u8),
    Mc(u8),
}

impl Src {
    fn kind_bits(self) -> u8 {
        match self {
            Src::Reg(_) => 0,
            Src::Ps(_) => 1,
            Src::Ws(_) => 2,
            Src::Fb(_) => 3,
            Src::Id(_) => 4,
            Src::Imm(_) => 5,
            Src::Pll(_) => 6,
            Src::Mc(_) => 7,
        }
    }

    fn emit(self, out: &mut Vec<u8>, alignment: Alignment) {
        match self {
            Src::Reg(v) | Src::Id(v) => out.extend_from_slice(&v.to_le_bytes()),
            Src::Imm(v) => emit_immediate(out, v, alignment),
            Src::Ps(i) | Src::Ws(i) | Src::Fb(i) | Src::Pll(i) | Src::Mc(i) => out.push(i),
        }
    }
}

fn emit_immediate(out: &mut Vec<u8>, value: u32, alignment: Alignment) {
    match alignment.immediate_len() {
        4 => out.extend_from_slice(&value.to_le_bytes()),
        2 => out.extend_from_slice(&(value as u16).to_le_bytes()),
        _ => out.push(value as u8),
    }
}

/// First opcode of each six-way operand family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Family {
    Move = 1,
    And = 7,
    Or = 13,
    Mul = 31,
    Div = 37,
    Add = 43,
    Sub = 49,
    Compare = 60,
    Test = 74,
    Xor = 103,
    Shl = 109,
    Shr = 115,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cond {
    Always,
    Equal,
    Below,
    Above,
    BelowOrEqual,
    AboveOrEqual,
    NotEqual,
}

/// Forward-referenceable jump target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Label(usize);

/// Command table assembler.
///
/// Jump and switch targets are table-relative, so labels resolve to
/// `COMMAND_HEADER_LEN + code offset`.
#[derive(Debug, Clone, Default)]
pub struct TableAsm {
    code: Vec<u8>,
    workspace_bytes: u8,
    parameter_bytes: u8,
    format_revision: u8,
    content_revision: u8,
    labels: Vec<Option<u16>>,
    fixups: Vec<(usize, Label)>,
}

impl TableAsm {
    pub fn new() -> Self {
        Self {
            format_revision: 1,
            content_revision: 1,
            ..Self::default()
        }
    }

    pub fn workspace(mut self, bytes: u8) -> Self {
        self.workspace_bytes = bytes;
        self
    }

    pub fn params(mut self, bytes: u8) -> Self {
        self.parameter_bytes = bytes;
        self
    }

    pub fn revision(mut self, format: u8, content: u8) -> Self {
        self.format_revision = format;
        self.content_revision = content;
        self
    }

    pub fn label(&mut self) -> Label {
        self.labels.push(None);
        Label(self.labels.len() - 1)
    }

    pub fn bind(&mut self, label: Label) -> &mut Self {
        self.labels[label.0] = Some((COMMAND_HEADER_LEN + self.code.len()) as u16);
        self
    }

    fn target(&mut self, label: Label) {
        self.fixups.push((self.code.len(), label));
        self.code.extend_from_slice(&[0, 0]);
    }

    fn attr(src_kind: u8, src_align: Alignment, dst_pos: u8) -> u8 {
        src_kind | ((src_align as u8) << 3) | ((dst_pos & 3) << 6)
    }

    /// `family` instruction with a field-aligned source written at destination byte `dst_pos`.
    pub fn op(
        &mut self,
        family: Family,
        dst: Dst,
        dst_pos: u8,
        src: Src,
        src_align: Alignment,
    ) -> &mut Self {
        self.code.push(family as u8 + dst.variant());
        self.code.push(Self::attr(src.kind_bits(), src_align, dst_pos));
        dst.emit(&mut self.code);
        src.emit(&mut self.code, src_align);
        self
    }

    /// Full-dword move.
    pub fn mov(&mut self, dst: Dst, src: Src) -> &mut Self {
        self.op(Family::Move, dst, 0, src, Alignment::Dword)
    }

    pub fn mask(
        &mut self,
        dst: Dst,
        dst_pos: u8,
        keep: u32,
        src: Src,
        src_align: Alignment,
    ) -> &mut Self {
        self.code.push(92 + dst.variant());
        self.code.push(Self::attr(src.kind_bits(), src_align, dst_pos));
        dst.emit(&mut self.code);
        emit_immediate(&mut self.code, keep, src_align);
        src.emit(&mut self.code, src_align);
        self
    }

    pub fn clear(&mut self, dst: Dst, field: Alignment) -> &mut Self {
        self.code.push(84 + dst.variant());
        self.code.push(Self::attr(0, field, 0));
        dst.emit(&mut self.code);
        self
    }

    /// Shifts the `field` of `dst` in place, leaving the other bits untouched.
    pub fn shift_field(&mut self, left: bool, dst: Dst, field: Alignment, count: u8) -> &mut Self {
        self.code
            .push(if left { 19 } else { 25 } + dst.variant());
        self.code.push(Self::attr(0, field, 0));
        dst.emit(&mut self.code);
        self.code.push(count);
        self
    }

    pub fn set_ati_port(&mut self, port: u16) -> &mut Self {
        self.code.push(55);
        self.code.extend_from_slice(&port.to_le_bytes());
        self
    }

    pub fn set_pci_port(&mut self) -> &mut Self {
        self.code.push(56);
        self
    }

    pub fn set_sysio_port(&mut self) -> &mut Self {
        self.code.push(57);
        self
    }

    pub fn set_reg_block(&mut self, block: u16) -> &mut Self {
        self.code.push(58);
        self.code.extend_from_slice(&block.to_le_bytes());
        self
    }

    pub fn set_fb_base(&mut self, src: Src, src_align: Alignment) -> &mut Self {
        self.code.push(59);
        self.code.push(Self::attr(src.kind_bits(), src_align, 0));
        src.emit(&mut self.code, src_align);
        self
    }

    pub fn set_data_block(&mut self, selector: u8) -> &mut Self {
        self.code.extend_from_slice(&[102, selector]);
        self
    }

    pub fn switch(&mut self, src: Src, src_align: Alignment, cases: &[(u32, Label)]) -> &mut Self {
        self.code.push(66);
        self.code.push(Self::attr(src.kind_bits(), src_align, 0));
        src.emit(&mut self.code, src_align);
        for &(value, label) in cases {
            self.code.push(b'c');
            emit_immediate(&mut self.code, value, src_align);
            self.target(label);
        }
        self.code.extend_from_slice(&[0x5A, 0x5A]);
        self
    }

    pub fn jump(&mut self, cond: Cond, label: Label) -> &mut Self {
        self.code.push(67 + cond as u8);
        self.target(label);
        self
    }

    pub fn delay_ms(&mut self, ms: u8) -> &mut Self {
        self.code.extend_from_slice(&[80, ms]);
        self
    }

    pub fn delay_us(&mut self, us: u8) -> &mut Self {
        self.code.extend_from_slice(&[81, us]);
        self
    }

    pub fn call_table(&mut self, table: u8) -> &mut Self {
        self.code.extend_from_slice(&[82, table]);
        self
    }

    pub fn nop(&mut self) -> &mut Self {
        self.code.push(90);
        self
    }

    pub fn post_card(&mut self, code: u8) -> &mut Self {
        self.code.extend_from_slice(&[98, code]);
        self
    }

    /// Inline data the IP skips over.
    pub fn data(&mut self, bytes: &[u8]) -> &mut Self {
        self.code.push(122);
        self.code
            .extend_from_slice(&(bytes.len() as u16).to_le_bytes());
        self.code.extend_from_slice(bytes);
        self
    }

    pub fn raw(&mut self, bytes: &[u8]) -> &mut Self {
        self.code.extend_from_slice(bytes);
        self
    }

    pub fn eot(&mut self) -> &mut Self {
        self.code.push(91);
        self
    }

    /// Emits the table header and resolves label fixups.
    pub fn finish(&self) -> Vec<u8> {
        let size = (COMMAND_HEADER_LEN + self.code.len()) as u16;
        let mut out = Vec::with_capacity(usize::from(size));
        out.extend_from_slice(&size.to_le_bytes());
        out.extend_from_slice(&[
            self.format_revision,
            self.content_revision,
            self.workspace_bytes,
            self.parameter_bytes,
        ]);
        out.extend_from_slice(&self.code);
        for &(at, label) in &self.fixups {
            let target = self.labels[label.0].expect("jump to unbound label");
            let pos = COMMAND_HEADER_LEN + at;
            out[pos..pos + 2].copy_from_slice(&target.to_le_bytes());
        }
        out
    }
}
