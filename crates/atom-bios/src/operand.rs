//! Operand attribute decoding: source/destination kinds and alignment tags.

/// Width/position tag of an operand inside a dword.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Alignment {
    Dword = 0,
    Word0 = 1,
    Word8 = 2,
    Word16 = 3,
    Byte0 = 4,
    Byte8 = 5,
    Byte16 = 6,
    Byte24 = 7,
}

const ALIGNMENT_MASK: [u32; 8] = [
    0xFFFF_FFFF,
    0xFFFF,
    0xFFFF,
    0xFFFF,
    0xFF,
    0xFF,
    0xFF,
    0xFF,
];
const ALIGNMENT_SHIFT: [u32; 8] = [0, 0, 8, 16, 0, 8, 16, 24];

impl Alignment {
    pub const ALL: [Alignment; 8] = [
        Alignment::Dword,
        Alignment::Word0,
        Alignment::Word8,
        Alignment::Word16,
        Alignment::Byte0,
        Alignment::Byte8,
        Alignment::Byte16,
        Alignment::Byte24,
    ];

    #[inline]
    pub fn from_bits(bits: u8) -> Self {
        Self::ALL[usize::from(bits & 7)]
    }

    /// Field mask before shifting.
    #[inline]
    pub fn mask(self) -> u32 {
        ALIGNMENT_MASK[self as usize]
    }

    /// Bit position of the field within the dword.
    #[inline]
    pub fn shift(self) -> u32 {
        ALIGNMENT_SHIFT[self as usize]
    }

    /// Immediates are always stored at the bottom of the operand, so only the width survives.
    #[inline]
    pub fn immediate(self) -> Self {
        match self {
            Alignment::Dword => Alignment::Dword,
            Alignment::Word0 | Alignment::Word8 | Alignment::Word16 => Alignment::Word0,
            _ => Alignment::Byte0,
        }
    }

    /// Encoded size in bytes of an immediate with this alignment.
    #[inline]
    pub fn immediate_len(self) -> usize {
        match self.immediate() {
            Alignment::Dword => 4,
            Alignment::Word0 => 2,
            _ => 1,
        }
    }
}

/// Where an operand lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperandKind {
    Register,
    Parameter,
    Workspace,
    FrameBuffer,
    /// Indirect read through the current data block. Source only.
    Indirect,
    /// Inline literal. Source only.
    Immediate,
    Pll,
    MemoryController,
}

impl OperandKind {
    #[inline]
    pub fn from_source_bits(bits: u8) -> Self {
        match bits & 7 {
            0 => OperandKind::Register,
            1 => OperandKind::Parameter,
            2 => OperandKind::Workspace,
            3 => OperandKind::FrameBuffer,
            4 => OperandKind::Indirect,
            5 => OperandKind::Immediate,
            6 => OperandKind::Pll,
            _ => OperandKind::MemoryController,
        }
    }

    /// Destination kind selected by an opcode's offset within a six-way family.
    #[inline]
    pub fn from_destination_variant(variant: u8) -> Self {
        match variant % 6 {
            0 => OperandKind::Register,
            1 => OperandKind::Parameter,
            2 => OperandKind::Workspace,
            3 => OperandKind::FrameBuffer,
            4 => OperandKind::Pll,
            _ => OperandKind::MemoryController,
        }
    }
}

/// The attribute byte that follows most arithmetic/logic opcodes.
///
/// Bits 0-2 select the source kind, bits 3-5 the source alignment and bits 6-7 the destination
/// byte position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attribute(pub u8);

impl Attribute {
    #[inline]
    pub fn source_kind(self) -> OperandKind {
        OperandKind::from_source_bits(self.0)
    }

    #[inline]
    pub fn source_alignment(self) -> Alignment {
        Alignment::from_bits(self.0 >> 3)
    }

    /// Shift applied to the source field when writing it into the destination.
    #[inline]
    pub fn destination_shift(self) -> u32 {
        u32::from(self.0 >> 6) * 8
    }
}
