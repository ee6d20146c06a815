//! Opcode dispatch table and handlers.
//!
//! Dispatch is a flat array indexed by opcode byte. Each entry pairs a handler with a small
//! argument: the destination variant for the six-way operand families, or the branch condition
//! for the jump family. Handlers are entered with the IP just past the opcode byte.

use std::cmp::Ordering;

use gpu_hal::Delay;
use tracing::{debug, trace};

use crate::error::Fault;
use crate::interp::{CompareFlags, Executor, Frame, IoPort, Place};
use crate::operand::{Alignment, Attribute, OperandKind};

/// Terminator of a `SWITCH` case list.
const SWITCH_END: u16 = 0x5A5A;
/// Tag byte introducing each `SWITCH` case.
const SWITCH_CASE: u8 = b'c';

/// `SET_DATA_BLOCK` selector meaning "the currently running table".
const DATA_BLOCK_SELF: u8 = 0xFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Flow {
    Next,
    End,
}

pub(crate) type Handler = fn(&mut Executor<'_>, &mut Frame, u8) -> Result<Flow, Fault>;

#[derive(Clone, Copy)]
pub(crate) struct Op {
    pub handler: Handler,
    pub arg: u8,
}

const fn op(handler: Handler, arg: u8) -> Op {
    Op { handler, arg }
}

/// Six consecutive opcodes sharing a handler, one per destination kind.
macro_rules! family {
    ($handler:expr) => {
        [
            op($handler, 0),
            op($handler, 1),
            op($handler, 2),
            op($handler, 3),
            op($handler, 4),
            op($handler, 5),
        ]
    };
}

const JUMP_ALWAYS: u8 = 0;
const JUMP_EQUAL: u8 = 1;
const JUMP_BELOW: u8 = 2;
const JUMP_ABOVE: u8 = 3;
const JUMP_BELOW_OR_EQUAL: u8 = 4;
const JUMP_ABOVE_OR_EQUAL: u8 = 5;
const JUMP_NOT_EQUAL: u8 = 6;

pub(crate) const OPCODE_COUNT: usize = 123;

const fn build() -> [Op; OPCODE_COUNT] {
    let mut t = [op(unknown, 0); OPCODE_COUNT];

    let groups: [(usize, [Op; 6]); 16] = [
        (1, family!(mov)),
        (7, family!(and)),
        (13, family!(or)),
        (19, family!(shift_field_left)),
        (25, family!(shift_field_right)),
        (31, family!(mul)),
        (37, family!(div)),
        (43, family!(add)),
        (49, family!(sub)),
        (60, family!(compare)),
        (74, family!(test)),
        (84, family!(clear)),
        (92, family!(mask)),
        (103, family!(xor)),
        (109, family!(shl)),
        (115, family!(shr)),
    ];
    let mut g = 0;
    while g < groups.len() {
        let (base, ops) = groups[g];
        let mut i = 0;
        while i < 6 {
            t[base + i] = ops[i];
            i += 1;
        }
        g += 1;
    }

    t[55] = op(set_ati_port, 0);
    t[56] = op(set_pci_port, 0);
    t[57] = op(set_sysio_port, 0);
    t[58] = op(set_reg_block, 0);
    t[59] = op(set_fb_base, 0);
    t[66] = op(switch, 0);
    t[67] = op(jump, JUMP_ALWAYS);
    t[68] = op(jump, JUMP_EQUAL);
    t[69] = op(jump, JUMP_BELOW);
    t[70] = op(jump, JUMP_ABOVE);
    t[71] = op(jump, JUMP_BELOW_OR_EQUAL);
    t[72] = op(jump, JUMP_ABOVE_OR_EQUAL);
    t[73] = op(jump, JUMP_NOT_EQUAL);
    t[80] = op(delay_ms, 0);
    t[81] = op(delay_us, 0);
    t[82] = op(call_table, 0);
    // REPEAT, BEEP, SAVE_REG and RESTORE_REG are reserved and decode as bare opcodes.
    t[83] = op(nop, 0);
    t[90] = op(nop, 0);
    t[91] = op(end_of_table, 0);
    t[98] = op(post_card, 0);
    t[99] = op(nop, 0);
    t[100] = op(nop, 0);
    t[101] = op(nop, 0);
    t[102] = op(set_data_block, 0);
    t[121] = op(debug_byte, 0);
    t[122] = op(data_skip, 0);
    t
}

pub(crate) static OPCODES: [Op; OPCODE_COUNT] = build();

#[inline]
fn field_of(src: u32, alignment: Alignment) -> u32 {
    (src >> alignment.shift()) & alignment.mask()
}

/// Source field moved to the destination byte position.
#[inline]
fn placed(src: u32, alignment: Alignment, dshift: u32) -> u32 {
    field_of(src, alignment) << dshift
}

/// Attribute byte plus destination location, the common prefix of every operand family.
fn prefix(x: &mut Executor<'_>, f: &mut Frame, variant: u8) -> Result<(Attribute, Place), Fault> {
    let attr = Attribute(f.fetch_u8(x.image)?);
    let place = x.place(f, OperandKind::from_destination_variant(variant))?;
    Ok((attr, place))
}

fn unknown(_: &mut Executor<'_>, f: &mut Frame, opcode: u8) -> Result<Flow, Fault> {
    Err(Fault::UnknownOpcode {
        opcode,
        offset: f.ip - 1,
    })
}

fn nop(_: &mut Executor<'_>, _: &mut Frame, _: u8) -> Result<Flow, Fault> {
    Ok(Flow::Next)
}

fn end_of_table(_: &mut Executor<'_>, _: &mut Frame, _: u8) -> Result<Flow, Fault> {
    Ok(Flow::End)
}

fn mov(x: &mut Executor<'_>, f: &mut Frame, variant: u8) -> Result<Flow, Fault> {
    let (attr, place) = prefix(x, f, variant)?;
    let width = attr.source_alignment();
    // A full-dword move replaces the destination, so it is never read.
    let dst = if width != Alignment::Dword {
        x.load(f, place, width)?
    } else {
        0
    };
    let (src, alignment) = x.source(f, attr)?;
    let value = if width == Alignment::Dword {
        src
    } else {
        let dshift = attr.destination_shift();
        (dst & !(alignment.mask() << dshift)) | placed(src, alignment, dshift)
    };
    x.store(f, place, value, width)?;
    Ok(Flow::Next)
}

/// Load destination, load source, write back `apply(dst, placed source)`.
fn alu(
    x: &mut Executor<'_>,
    f: &mut Frame,
    variant: u8,
    apply: impl FnOnce(u32, u32, Alignment, u32) -> u32,
) -> Result<Flow, Fault> {
    let (attr, place) = prefix(x, f, variant)?;
    let width = attr.source_alignment();
    let dst = x.load(f, place, width)?;
    let (src, alignment) = x.source(f, attr)?;
    let value = apply(dst, src, alignment, attr.destination_shift());
    x.store(f, place, value, width)?;
    Ok(Flow::Next)
}

fn and(x: &mut Executor<'_>, f: &mut Frame, variant: u8) -> Result<Flow, Fault> {
    alu(x, f, variant, |dst, src, a, dshift| {
        dst & (placed(src, a, dshift) | !(a.mask() << dshift))
    })
}

fn or(x: &mut Executor<'_>, f: &mut Frame, variant: u8) -> Result<Flow, Fault> {
    alu(x, f, variant, |dst, src, a, dshift| dst | placed(src, a, dshift))
}

fn xor(x: &mut Executor<'_>, f: &mut Frame, variant: u8) -> Result<Flow, Fault> {
    alu(x, f, variant, |dst, src, a, dshift| dst ^ placed(src, a, dshift))
}

fn add(x: &mut Executor<'_>, f: &mut Frame, variant: u8) -> Result<Flow, Fault> {
    alu(x, f, variant, |dst, src, a, dshift| {
        dst.wrapping_add(placed(src, a, dshift))
    })
}

fn sub(x: &mut Executor<'_>, f: &mut Frame, variant: u8) -> Result<Flow, Fault> {
    alu(x, f, variant, |dst, src, a, dshift| {
        dst.wrapping_sub(placed(src, a, dshift))
    })
}

fn shl(x: &mut Executor<'_>, f: &mut Frame, variant: u8) -> Result<Flow, Fault> {
    alu(x, f, variant, |dst, src, a, dshift| {
        dst.checked_shl(placed(src, a, dshift)).unwrap_or(0)
    })
}

fn shr(x: &mut Executor<'_>, f: &mut Frame, variant: u8) -> Result<Flow, Fault> {
    alu(x, f, variant, |dst, src, a, dshift| {
        dst.checked_shr(placed(src, a, dshift)).unwrap_or(0)
    })
}

/// Both operands reduced to the source field width, for the ops that only produce flags or
/// pseudo-register results.
fn fields(x: &mut Executor<'_>, f: &mut Frame, variant: u8) -> Result<(u32, u32), Fault> {
    let (attr, place) = prefix(x, f, variant)?;
    let dst = x.load(f, place, attr.source_alignment())?;
    let (src, alignment) = x.source(f, attr)?;
    let dst = (dst >> attr.destination_shift()) & alignment.mask();
    Ok((dst, field_of(src, alignment)))
}

fn mul(x: &mut Executor<'_>, f: &mut Frame, variant: u8) -> Result<Flow, Fault> {
    let (dst, src) = fields(x, f, variant)?;
    x.state.quotient = dst.wrapping_mul(src);
    Ok(Flow::Next)
}

fn div(x: &mut Executor<'_>, f: &mut Frame, variant: u8) -> Result<Flow, Fault> {
    let (dst, src) = fields(x, f, variant)?;
    let (q, r) = match src {
        0 => (0, 0),
        _ => (dst / src, dst % src),
    };
    x.state.quotient = q;
    x.state.remainder = r;
    Ok(Flow::Next)
}

fn compare(x: &mut Executor<'_>, f: &mut Frame, variant: u8) -> Result<Flow, Fault> {
    let (dst, src) = fields(x, f, variant)?;
    x.state.compare = match dst.cmp(&src) {
        Ordering::Less => CompareFlags::Below,
        Ordering::Equal => CompareFlags::Equal,
        Ordering::Greater => CompareFlags::Above,
    };
    Ok(Flow::Next)
}

fn test(x: &mut Executor<'_>, f: &mut Frame, variant: u8) -> Result<Flow, Fault> {
    let (dst, src) = fields(x, f, variant)?;
    x.state.compare = if dst & src == 0 {
        CompareFlags::Equal
    } else {
        CompareFlags::NotEqual
    };
    Ok(Flow::Next)
}

fn clear(x: &mut Executor<'_>, f: &mut Frame, variant: u8) -> Result<Flow, Fault> {
    let (attr, place) = prefix(x, f, variant)?;
    let width = attr.source_alignment();
    let dst = x.load(f, place, width)?;
    x.store(f, place, dst & !(width.mask() << width.shift()), width)?;
    Ok(Flow::Next)
}

fn shift_field(x: &mut Executor<'_>, f: &mut Frame, variant: u8, left: bool) -> Result<Flow, Fault> {
    let (attr, place) = prefix(x, f, variant)?;
    let width = attr.source_alignment();
    let mask = width.mask() << width.shift();
    let dst = x.load(f, place, width)?;
    let count = u32::from(f.fetch_u8(x.image)?);
    let field = dst & mask;
    let shifted = if left {
        field.checked_shl(count)
    } else {
        field.checked_shr(count)
    }
    .unwrap_or(0);
    x.store(f, place, (shifted & mask) | (dst & !mask), width)?;
    Ok(Flow::Next)
}

fn shift_field_left(x: &mut Executor<'_>, f: &mut Frame, variant: u8) -> Result<Flow, Fault> {
    shift_field(x, f, variant, true)
}

fn shift_field_right(x: &mut Executor<'_>, f: &mut Frame, variant: u8) -> Result<Flow, Fault> {
    shift_field(x, f, variant, false)
}

fn mask(x: &mut Executor<'_>, f: &mut Frame, variant: u8) -> Result<Flow, Fault> {
    let (attr, place) = prefix(x, f, variant)?;
    let width = attr.source_alignment();
    let mut dst = x.load(f, place, width)?;
    let keep = f.fetch_immediate(x.image, width)?;
    let (src, alignment) = x.source(f, attr)?;
    let dshift = attr.destination_shift();
    let m = alignment.mask();
    dst &= (keep << dshift) | !(m << dshift);
    dst |= (src & m) << dshift;
    x.store(f, place, dst, width)?;
    Ok(Flow::Next)
}

fn set_ati_port(x: &mut Executor<'_>, f: &mut Frame, _: u8) -> Result<Flow, Fault> {
    let port = f.fetch_u16(x.image)? as u8;
    x.state.port = IoPort::Ati(port);
    Ok(Flow::Next)
}

fn set_pci_port(x: &mut Executor<'_>, _: &mut Frame, _: u8) -> Result<Flow, Fault> {
    x.state.port = IoPort::Pci;
    Ok(Flow::Next)
}

fn set_sysio_port(x: &mut Executor<'_>, _: &mut Frame, _: u8) -> Result<Flow, Fault> {
    x.state.port = IoPort::SystemIo;
    Ok(Flow::Next)
}

fn set_reg_block(x: &mut Executor<'_>, f: &mut Frame, _: u8) -> Result<Flow, Fault> {
    x.state.reg_block = f.fetch_u16(x.image)?;
    Ok(Flow::Next)
}

fn set_fb_base(x: &mut Executor<'_>, f: &mut Frame, _: u8) -> Result<Flow, Fault> {
    let attr = Attribute(f.fetch_u8(x.image)?);
    let (src, alignment) = x.source(f, attr)?;
    x.state.fb_window = field_of(src, alignment);
    Ok(Flow::Next)
}

fn set_data_block(x: &mut Executor<'_>, f: &mut Frame, _: u8) -> Result<Flow, Fault> {
    let selector = f.fetch_u8(x.image)?;
    x.state.data_block = match selector {
        0 => 0,
        DATA_BLOCK_SELF => f.header.offset,
        n => x.index.data_offset(x.image, u16::from(n)).unwrap_or(0),
    };
    Ok(Flow::Next)
}

fn switch(x: &mut Executor<'_>, f: &mut Frame, _: u8) -> Result<Flow, Fault> {
    let attr = Attribute(f.fetch_u8(x.image)?);
    let (src, alignment) = x.source(f, attr)?;
    let value = field_of(src, alignment);
    let width = attr.source_alignment();

    while f.peek_u16(x.image)? != SWITCH_END {
        let at = f.ip;
        let tag = f.fetch_u8(x.image)?;
        if tag != SWITCH_CASE {
            return Err(Fault::BadSwitch { tag, offset: at });
        }
        let case = f.fetch_immediate(x.image, width)?;
        let target = f.fetch_u16(x.image)?;
        if case == value {
            f.jump(target)?;
            return Ok(Flow::Next);
        }
    }
    f.skip(2)?;
    Ok(Flow::Next)
}

fn jump(x: &mut Executor<'_>, f: &mut Frame, condition: u8) -> Result<Flow, Fault> {
    let target = f.fetch_u16(x.image)?;
    let flags = x.state.compare;
    let taken = match condition {
        JUMP_ALWAYS => true,
        JUMP_EQUAL => flags == CompareFlags::Equal,
        JUMP_BELOW => flags == CompareFlags::Below,
        JUMP_ABOVE => flags == CompareFlags::Above,
        JUMP_BELOW_OR_EQUAL => matches!(flags, CompareFlags::Below | CompareFlags::Equal),
        JUMP_ABOVE_OR_EQUAL => matches!(flags, CompareFlags::Above | CompareFlags::Equal),
        _ => flags != CompareFlags::Equal,
    };
    if taken {
        f.jump(target)?;
    }
    Ok(Flow::Next)
}

fn delay_ms(x: &mut Executor<'_>, f: &mut Frame, _: u8) -> Result<Flow, Fault> {
    let ms = f.fetch_u8(x.image)?;
    x.hw.delay_ms(u32::from(ms));
    Ok(Flow::Next)
}

fn delay_us(x: &mut Executor<'_>, f: &mut Frame, _: u8) -> Result<Flow, Fault> {
    let us = f.fetch_u8(x.image)?;
    x.hw.delay_us(u32::from(us));
    Ok(Flow::Next)
}

fn call_table(x: &mut Executor<'_>, f: &mut Frame, _: u8) -> Result<Flow, Fault> {
    let table = f.fetch_u8(x.image)?;
    match x.index.command_offset(x.image, u16::from(table)) {
        Ok(Some(offset)) => {
            let ps_base = f.ps_base + f.header.parameter_dwords();
            x.call(offset, ps_base, f.depth + 1)?;
        }
        _ => debug!(table, "called table not present, skipping"),
    }
    Ok(Flow::Next)
}

fn post_card(x: &mut Executor<'_>, f: &mut Frame, _: u8) -> Result<Flow, Fault> {
    let code = f.fetch_u8(x.image)?;
    trace!(code, "post card");
    Ok(Flow::Next)
}

fn debug_byte(x: &mut Executor<'_>, f: &mut Frame, _: u8) -> Result<Flow, Fault> {
    let code = f.fetch_u8(x.image)?;
    trace!(code, "table debug marker");
    Ok(Flow::Next)
}

/// Inline data block: a u16 length followed by that many bytes the IP jumps over.
fn data_skip(x: &mut Executor<'_>, f: &mut Frame, _: u8) -> Result<Flow, Fault> {
    let len = f.fetch_u16(x.image)?;
    f.skip(usize::from(len))?;
    Ok(Flow::Next)
}
