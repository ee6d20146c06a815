use gpu_hal::{HostPlatform, RecordingDelay, RegisterFile, RegisterSpace, RegisterWrite};
use pretty_assertions::assert_eq;
use proptest::prelude::*;

use crate::test_utils::{Cond, Dst, Family, IioAsm, ImageBuilder, Src, TableAsm};
use crate::{
    Alignment, AtomContext, AttachError, DataTable, ExecError, Fault, InterpreterConfig, IoPort,
    Outcome, WS_QUOTIENT, WS_REMAINDER,
};

type Hw = HostPlatform<RegisterFile, RecordingDelay>;

const SLOT: u16 = 1;

fn hw() -> Hw {
    HostPlatform::new(RegisterFile::new(), RecordingDelay::new())
}

fn context(table: &TableAsm) -> AtomContext {
    let bytes = ImageBuilder::new().command(SLOT, table.finish()).build();
    AtomContext::attach(bytes).expect("test image attaches")
}

fn run_on(hw: &mut Hw, table: &TableAsm, params: &mut [u32]) -> Outcome {
    context(table)
        .execute(hw, SLOT, params)
        .expect("table invocation is well formed")
}

fn run(table: &TableAsm, params: &mut [u32]) -> Outcome {
    run_on(&mut hw(), table, params)
}

fn reg(index: u16) -> u32 {
    u32::from(index) << 2
}

#[test]
fn byte_move_replaces_only_the_low_byte() {
    let mut table = TableAsm::new();
    table
        .op(Family::Move, Dst::Reg(0x20), 0, Src::Imm(0x12), Alignment::Byte0)
        .eot();

    let mut hw = hw();
    hw.regs.preload(RegisterSpace::General, reg(0x20), 0xABCD);
    assert_eq!(run_on(&mut hw, &table, &mut []), Outcome::Completed);
    assert_eq!(hw.regs.get(RegisterSpace::General, reg(0x20)), 0xAB12);
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 64,
        .. ProptestConfig::default()
    })]

    #[test]
    fn field_moves_leave_other_bits_of_an_all_ones_register(
        value in any::<u32>(),
        align in 0usize..8,
    ) {
        let alignment = Alignment::ALL[align];
        let dst_pos = (alignment.shift() / 8) as u8;
        let mut table = TableAsm::new();
        table
            .op(Family::Move, Dst::Reg(0x40), dst_pos, Src::Imm(value), alignment)
            .eot();

        let mut hw = HostPlatform::new(RegisterFile::with_fill(u32::MAX), RecordingDelay::new());
        prop_assert_eq!(run_on(&mut hw, &table, &mut []), Outcome::Completed);

        let mask = alignment.mask() << alignment.shift();
        let expected = if alignment == Alignment::Dword {
            value
        } else {
            !mask | ((value & alignment.mask()) << alignment.shift())
        };
        prop_assert_eq!(hw.regs.get(RegisterSpace::General, reg(0x40)), expected);
    }

    #[test]
    fn division_sets_quotient_and_remainder(a in any::<u32>(), b in any::<u32>()) {
        let mut table = TableAsm::new().workspace(4);
        table
            .mov(Dst::Ws(0), Src::Ps(0))
            .op(Family::Div, Dst::Ws(0), 0, Src::Ps(1), Alignment::Dword)
            .mov(Dst::Ps(2), Src::Ws(WS_QUOTIENT))
            .mov(Dst::Ps(3), Src::Ws(WS_REMAINDER))
            .eot();

        let mut params = [a, b, 0xFFFF_FFFF, 0xFFFF_FFFF];
        prop_assert_eq!(run(&table, &mut params), Outcome::Completed);
        if b == 0 {
            prop_assert_eq!(&params[2..], &[0, 0]);
        } else {
            prop_assert_eq!(&params[2..], &[a / b, a % b]);
        }
    }
}

#[test]
fn arithmetic_and_logic_ops_apply_to_the_destination() {
    let mut table = TableAsm::new();
    table
        .op(Family::Add, Dst::Ps(0), 0, Src::Imm(0x10), Alignment::Byte0)
        .op(Family::Sub, Dst::Ps(1), 0, Src::Imm(1), Alignment::Byte0)
        .op(Family::Or, Dst::Ps(2), 1, Src::Imm(0xA5), Alignment::Byte0)
        .op(Family::And, Dst::Ps(3), 2, Src::Imm(0x0F), Alignment::Byte0)
        .op(Family::Xor, Dst::Ps(4), 0, Src::Imm(0xFFFF), Alignment::Word0)
        .op(Family::Shl, Dst::Ps(5), 0, Src::Imm(4), Alignment::Byte0)
        .op(Family::Shr, Dst::Ps(6), 0, Src::Imm(8), Alignment::Byte0)
        .eot();

    let mut params = [
        0xFFFF_FFF8,
        0,
        0,
        0xFFFF_FFFF,
        0x1234_5678,
        0x0000_0F0F,
        0xAABB_CCDD,
    ];
    assert_eq!(run(&table, &mut params), Outcome::Completed);
    assert_eq!(
        params,
        [
            0x0000_0008,
            0xFFFF_FFFF,
            0x0000_A500,
            0xFF0F_FFFF,
            0x1234_A987,
            0x0000_F0F0,
            0x00AA_BBCC,
        ]
    );
}

#[test]
fn multiply_reports_through_the_quotient_register() {
    let mut table = TableAsm::new();
    table
        .op(Family::Mul, Dst::Ps(0), 0, Src::Imm(3), Alignment::Byte0)
        .mov(Dst::Ps(1), Src::Ws(WS_QUOTIENT))
        .eot();

    // Only the low byte of the destination takes part.
    let mut params = [0x0000_0107, 0];
    assert_eq!(run(&table, &mut params), Outcome::Completed);
    assert_eq!(params, [0x0000_0107, 21]);
}

#[test]
fn clear_shift_and_mask_rewrite_single_fields() {
    let mut table = TableAsm::new();
    table
        .clear(Dst::Ps(0), Alignment::Byte8)
        .shift_field(true, Dst::Ps(1), Alignment::Byte0, 4)
        .shift_field(false, Dst::Ps(2), Alignment::Word16, 4)
        .mask(Dst::Ps(3), 1, 0x0F, Src::Imm(0x30), Alignment::Byte8)
        .eot();

    let mut params = [0xFFFF_FFFF, 0x1234_5678, 0x1234_5678, 0xFFFF_FFFF];
    assert_eq!(run(&table, &mut params), Outcome::Completed);
    assert_eq!(
        params,
        [0xFFFF_00FF, 0x1234_5680, 0x0123_5678, 0xFFFF_3FFF]
    );
}

#[test]
fn compare_and_branch_drive_a_counted_loop() {
    let mut asm = TableAsm::new().workspace(4);
    let top = asm.label();
    asm.mov(Dst::Ws(0), Src::Imm(0))
        .bind(top)
        .op(Family::Add, Dst::Ws(0), 0, Src::Imm(1), Alignment::Byte0)
        .op(Family::Compare, Dst::Ws(0), 0, Src::Imm(5), Alignment::Byte0)
        .jump(Cond::Below, top)
        .mov(Dst::Ps(0), Src::Ws(0))
        .eot();

    let mut params = [0];
    assert_eq!(run(&asm, &mut params), Outcome::Completed);
    assert_eq!(params, [5]);
}

#[test]
fn test_op_sets_equal_when_no_bits_overlap() {
    let mut asm = TableAsm::new();
    let overlap = asm.label();
    asm.op(Family::Test, Dst::Ps(0), 0, Src::Imm(0xF0), Alignment::Byte0)
        .jump(Cond::NotEqual, overlap)
        .mov(Dst::Ps(1), Src::Imm(1))
        .eot()
        .bind(overlap)
        .mov(Dst::Ps(1), Src::Imm(2))
        .eot();

    let mut params = [0x0F, 0];
    assert_eq!(run(&asm, &mut params), Outcome::Completed);
    assert_eq!(params[1], 1);

    let mut params = [0x1F, 0];
    assert_eq!(run(&asm, &mut params), Outcome::Completed);
    assert_eq!(params[1], 2);
}

/// Runs `COMPARE ws0, 9` against `ws0 = 12` (above), then `TEST ps0, 1`, then a jump.
/// Returns whether the jump was taken.
fn jump_after_test(value: u32, cond: Cond) -> bool {
    let mut asm = TableAsm::new().workspace(1);
    let taken = asm.label();
    asm.mov(Dst::Ws(0), Src::Imm(12))
        .op(Family::Compare, Dst::Ws(0), 0, Src::Imm(9), Alignment::Byte0)
        .op(Family::Test, Dst::Ps(0), 0, Src::Imm(1), Alignment::Byte0)
        .jump(cond, taken)
        .mov(Dst::Ps(1), Src::Imm(0x11))
        .eot()
        .bind(taken)
        .mov(Dst::Ps(1), Src::Imm(0x22))
        .eot();

    let mut params = [value, 0];
    assert_eq!(run(&asm, &mut params), Outcome::Completed);
    params[1] == 0x22
}

#[test]
fn ordered_jumps_after_test_ignore_earlier_compare() {
    let nonzero: Vec<_> = [
        Cond::Below,
        Cond::BelowOrEqual,
        Cond::Above,
        Cond::AboveOrEqual,
        Cond::Equal,
        Cond::NotEqual,
    ]
    .into_iter()
    .map(|cond| (cond, jump_after_test(1, cond)))
    .collect();
    assert_eq!(
        nonzero,
        [
            (Cond::Below, false),
            (Cond::BelowOrEqual, false),
            (Cond::Above, false),
            (Cond::AboveOrEqual, false),
            (Cond::Equal, false),
            (Cond::NotEqual, true),
        ]
    );

    assert!(jump_after_test(2, Cond::BelowOrEqual));
    assert!(jump_after_test(2, Cond::AboveOrEqual));
    assert!(!jump_after_test(2, Cond::Below));
    assert!(!jump_after_test(2, Cond::Above));
}

#[test]
fn switch_jumps_to_the_matching_case() {
    let mut asm = TableAsm::new();
    let one = asm.label();
    let two = asm.label();
    asm.switch(Src::Ps(0), Alignment::Byte0, &[(1, one), (2, two)])
        .mov(Dst::Ps(1), Src::Imm(0xDD))
        .eot()
        .bind(one)
        .mov(Dst::Ps(1), Src::Imm(0x11))
        .eot()
        .bind(two)
        .mov(Dst::Ps(1), Src::Imm(0x22))
        .eot();

    for (selector, expected) in [(1, 0x11), (2, 0x22), (7, 0xDD), (0x102, 0x22)] {
        let mut params = [selector, 0];
        assert_eq!(run(&asm, &mut params), Outcome::Completed);
        assert_eq!(params[1], expected, "selector {selector:#x}");
    }
}

#[test]
fn malformed_switch_case_halts() {
    let mut asm = TableAsm::new();
    asm.raw(&[66, 0x25, 0x01, b'x']).eot();
    let mut ctx = context(&asm);
    let code = ctx.command_header(SLOT).unwrap().code_start();
    assert_eq!(
        ctx.execute(&mut hw(), SLOT, &mut []).unwrap(),
        Outcome::Halted(Fault::BadSwitch {
            tag: b'x',
            offset: code + 3
        })
    );
}

#[test]
fn called_tables_see_a_shifted_parameter_window() {
    let mut caller = TableAsm::new().params(8);
    caller
        .mov(Dst::Ps(1), Src::Imm(0x55))
        .call_table(5)
        .mov(Dst::Ps(0), Src::Imm(0x66))
        .eot();
    let mut callee = TableAsm::new();
    callee
        .mov(Dst::Ps(0), Src::Imm(0x77))
        .set_reg_block(0x100)
        .eot();

    let bytes = ImageBuilder::new()
        .command(SLOT, caller.finish())
        .command(5, callee.finish())
        .build();
    let mut ctx = AtomContext::attach(bytes).unwrap();
    let mut params = [0u32; 4];
    assert_eq!(
        ctx.execute(&mut hw(), SLOT, &mut params).unwrap(),
        Outcome::Completed
    );
    assert_eq!(params, [0x66, 0x55, 0x77, 0]);
    // Register block changes made by a callee persist in the caller.
    assert_eq!(ctx.state().reg_block, 0x100);
}

#[test]
fn calls_to_absent_tables_are_skipped() {
    let mut asm = TableAsm::new();
    asm.call_table(50).call_table(200).mov(Dst::Ps(0), Src::Imm(1)).eot();
    let mut params = [0];
    assert_eq!(run(&asm, &mut params), Outcome::Completed);
    assert_eq!(params, [1]);
}

#[test]
fn recursion_stops_at_the_call_depth_limit() {
    let mut asm = TableAsm::new();
    asm.call_table(SLOT as u8).eot();
    assert_eq!(
        run(&asm, &mut []),
        Outcome::Halted(Fault::CallDepth { limit: 16 })
    );
}

#[test]
fn runaway_loops_exhaust_the_step_budget() {
    let mut asm = TableAsm::new();
    let top = asm.label();
    asm.bind(top).jump(Cond::Always, top).eot();

    let bytes = ImageBuilder::new().command(SLOT, asm.finish()).build();
    let config = InterpreterConfig {
        max_steps: 100,
        ..InterpreterConfig::default()
    };
    let mut ctx = AtomContext::attach_with_config(bytes, config).unwrap();
    assert_eq!(
        ctx.execute(&mut hw(), SLOT, &mut []).unwrap(),
        Outcome::Halted(Fault::StepBudget { limit: 100 })
    );
}

#[test]
fn unknown_opcode_halts_and_the_context_recovers() {
    let mut bad = TableAsm::new();
    bad.mov(Dst::Ps(0), Src::Imm(5)).raw(&[0xFF]).eot();
    let mut good = TableAsm::new();
    good.mov(Dst::Ps(0), Src::Imm(9)).eot();

    let bytes = ImageBuilder::new()
        .command(SLOT, bad.finish())
        .command(2, good.finish())
        .build();
    let mut ctx = AtomContext::attach(bytes).unwrap();
    let mut hw = hw();
    // opcode + attribute + slot + 4-byte immediate
    let bad_at = ctx.command_header(SLOT).unwrap().code_start() + 7;

    let mut params = [0];
    assert_eq!(
        ctx.execute(&mut hw, SLOT, &mut params).unwrap(),
        Outcome::Halted(Fault::UnknownOpcode {
            opcode: 0xFF,
            offset: bad_at
        })
    );
    // Writes made before the fault are still visible.
    assert_eq!(params, [5]);

    assert_eq!(ctx.execute(&mut hw, 2, &mut params).unwrap(), Outcome::Completed);
    assert_eq!(params, [9]);
}

#[test]
fn running_off_the_end_of_a_table_halts() {
    let mut asm = TableAsm::new();
    asm.nop();
    let mut ctx = context(&asm);
    let end = ctx.command_header(SLOT).unwrap().end();
    assert_eq!(
        ctx.execute(&mut hw(), SLOT, &mut []).unwrap(),
        Outcome::Halted(Fault::OutOfBounds { offset: end })
    );
}

#[test]
fn workspace_accesses_are_bounded_by_the_declared_size() {
    let mut asm = TableAsm::new().workspace(4);
    asm.mov(Dst::Ws(3), Src::Imm(1)).eot();
    assert_eq!(
        run(&asm, &mut []),
        Outcome::Halted(Fault::Workspace { index: 3, len: 1 })
    );
}

#[test]
fn absent_and_unknown_tables_are_reported_before_running() {
    let mut asm = TableAsm::new();
    asm.eot();
    let mut ctx = context(&asm);
    let mut hw = hw();

    assert_eq!(ctx.execute(&mut hw, 50, &mut []).unwrap(), Outcome::NotPresent);
    assert_eq!(
        ctx.execute(&mut hw, 200, &mut []),
        Err(ExecError::UnknownTable {
            index: 200,
            count: 81
        })
    );
    assert_eq!(
        ctx.execute(&mut hw, SLOT, &mut [0; 65]),
        Err(ExecError::ParamsTooLarge { len: 65, max: 64 })
    );
    assert!(hw.regs.writes().is_empty());
}

#[test]
fn registers_are_reset_between_invocations() {
    let mut setup = TableAsm::new();
    setup.set_reg_block(0x40).set_pci_port().eot();
    let mut follow_up = TableAsm::new();
    follow_up.mov(Dst::Reg(0x10), Src::Imm(1)).eot();
    let bytes = ImageBuilder::new()
        .command(SLOT, setup.finish())
        .command(2, follow_up.finish())
        .build();
    let mut ctx = AtomContext::attach(bytes).unwrap();
    let mut hw = hw();

    ctx.execute(&mut hw, SLOT, &mut []).unwrap();
    assert_eq!(ctx.state().reg_block, 0x40);
    assert_eq!(ctx.state().port, IoPort::Pci);

    // The second invocation starts from the direct port and a zero register block.
    ctx.execute(&mut hw, 2, &mut []).unwrap();
    assert_eq!(
        hw.regs.writes(),
        &[RegisterWrite {
            space: RegisterSpace::General,
            offset: reg(0x10),
            value: 1
        }]
    );
}

#[test]
fn register_block_offsets_register_operands() {
    let mut asm = TableAsm::new();
    asm.set_reg_block(0x100).mov(Dst::Reg(0x10), Src::Imm(7)).eot();
    let mut hw = hw();
    assert_eq!(run_on(&mut hw, &asm, &mut []), Outcome::Completed);
    assert_eq!(hw.regs.get(RegisterSpace::General, reg(0x110)), 7);
}

#[test]
fn indirect_sources_read_the_current_data_block() {
    let mut asm = TableAsm::new();
    asm.set_data_block(DataTable::FirmwareInfo.index() as u8)
        .mov(Dst::Ps(0), Src::Id(4))
        .eot();
    let bytes = ImageBuilder::new()
        .command(SLOT, asm.finish())
        .data(DataTable::FirmwareInfo.index(), &[0x78, 0x56, 0x34, 0x12])
        .build();
    let mut ctx = AtomContext::attach(bytes).unwrap();
    let mut params = [0];
    ctx.execute(&mut hw(), SLOT, &mut params).unwrap();
    assert_eq!(params, [0x1234_5678]);
}

#[test]
fn frame_buffer_operands_address_the_scratch_window() {
    let mut asm = TableAsm::new();
    asm.set_fb_base(Src::Imm(8), Alignment::Dword)
        .mov(Dst::Fb(1), Src::Imm(0xAABB_CCDD))
        .eot();
    let mut ctx = context(&asm);
    assert_eq!(ctx.scratch_len(), 20 * 1024);
    ctx.execute(&mut hw(), SLOT, &mut []).unwrap();

    let mut out = [0u8; 4];
    assert!(ctx.read_scratch(12, &mut out));
    assert_eq!(out, [0xDD, 0xCC, 0xBB, 0xAA]);
    assert_eq!(ctx.state().fb_window, 8);
}

#[test]
fn scratch_helpers_reject_out_of_range_copies() {
    let mut asm = TableAsm::new();
    asm.eot();
    let bytes = ImageBuilder::new()
        .command(SLOT, asm.finish())
        .scratch_kb(1)
        .build();
    let mut ctx = AtomContext::attach(bytes).unwrap();
    assert_eq!(ctx.scratch_len(), 1024);
    assert!(ctx.write_scratch(1022, &[1, 2]));
    assert!(!ctx.write_scratch(1023, &[1, 2]));
    let mut out = [0u8; 3];
    assert!(!ctx.read_scratch(usize::MAX, &mut out));
}

#[test]
fn pci_port_accesses_use_the_operand_width() {
    let mut asm = TableAsm::new();
    asm.set_pci_port()
        .op(Family::Move, Dst::Reg(0x10), 0, Src::Imm(0xAB), Alignment::Byte0)
        .eot();
    let mut hw = hw();
    hw.regs.preload(RegisterSpace::PciConfig, 0x10, 0x1122_3344);
    assert_eq!(run_on(&mut hw, &asm, &mut []), Outcome::Completed);
    assert_eq!(hw.regs.get(RegisterSpace::PciConfig, 0x10), 0x1122_33AB);
}

#[test]
fn pll_and_memory_controller_operands_use_their_own_spaces() {
    let mut asm = TableAsm::new();
    asm.mov(Dst::Pll(0x2A), Src::Imm(3))
        .mov(Dst::Mc(0x05), Src::Pll(0x2A))
        .eot();
    let mut hw = hw();
    assert_eq!(run_on(&mut hw, &asm, &mut []), Outcome::Completed);
    assert_eq!(hw.regs.get(RegisterSpace::Pll, 0x2A), 3);
    assert_eq!(hw.regs.get(RegisterSpace::MemoryController, 0x05), 3);
}

#[test]
fn delays_reach_the_platform() {
    let mut asm = TableAsm::new();
    asm.delay_ms(2).delay_us(50).post_card(0x11).data(&[1, 2, 3]).eot();
    let mut hw = hw();
    assert_eq!(run_on(&mut hw, &asm, &mut []), Outcome::Completed);
    assert_eq!(hw.delay.waits_us(), &[2000, 50]);
}

#[test]
fn indirect_port_routes_accesses_through_iio_programs() {
    let iio = IioAsm::new()
        .start(1)
        .move_index(16, 0, 0)
        .write(0)
        .read(1)
        .end()
        .start(1 | crate::INDIRECT_WRITE)
        .move_index(16, 0, 0)
        .write(0)
        .move_data(32, 0, 0)
        .write(1)
        .end()
        .finish();

    let mut asm = TableAsm::new();
    asm.set_ati_port(1)
        .mov(Dst::Reg(0x1234), Src::Imm(0xCAFE))
        .mov(Dst::Ps(0), Src::Reg(0x1234))
        .eot();
    let bytes = ImageBuilder::new()
        .command(SLOT, asm.finish())
        .data(DataTable::IndirectIoAccess.index(), &iio)
        .build();
    let mut ctx = AtomContext::attach(bytes).unwrap();
    assert_eq!(ctx.iio().len(), 2);

    let mut hw = hw();
    let mut params = [0];
    assert_eq!(
        ctx.execute(&mut hw, SLOT, &mut params).unwrap(),
        Outcome::Completed
    );
    assert_eq!(params, [0xCAFE]);
    assert_eq!(ctx.state().port, IoPort::Ati(1));
    let writes: Vec<_> = hw.regs.writes().iter().map(|w| (w.offset, w.value)).collect();
    assert_eq!(writes, vec![(0, 0x1234), (4, 0xCAFE), (0, 0x1234)]);
}

#[test]
fn missing_iio_program_halts() {
    let mut asm = TableAsm::new();
    asm.set_ati_port(3).mov(Dst::Reg(1), Src::Imm(1)).eot();
    assert_eq!(
        run(&asm, &mut []),
        Outcome::Halted(Fault::MissingIndirectProgram {
            selector: 3 | crate::INDIRECT_WRITE
        })
    );
}

#[test]
fn malformed_iio_table_is_rejected_at_attach() {
    let iio = IioAsm::new().start(1).start(2).finish();
    let bytes = ImageBuilder::new()
        .data(DataTable::IndirectIoAccess.index(), &iio)
        .build();
    assert!(matches!(
        AtomContext::attach(bytes),
        Err(AttachError::BadIndirectIo { .. })
    ));
}

#[test]
fn attach_validates_rom_headers() {
    let good = ImageBuilder::new().build();

    assert_eq!(
        AtomContext::attach(vec![0; 16]).unwrap_err(),
        AttachError::TooSmall { len: 16 }
    );

    let mut bad = good.clone();
    bad[0] = 0;
    assert_eq!(
        AtomContext::attach(bad).unwrap_err(),
        AttachError::BadRomSignature { found: 0xAA00 }
    );

    let mut bad = good.clone();
    bad[0x31] = b'X';
    assert_eq!(
        AtomContext::attach(bad).unwrap_err(),
        AttachError::BadVendorMagic
    );

    let mut bad = good.clone();
    bad[0x84] = b'M';
    assert_eq!(
        AtomContext::attach(bad).unwrap_err(),
        AttachError::BadAtomMagic { offset: 0x80 }
    );

    let mut bad = good;
    bad[0x80 + 0x1E] = 0;
    bad[0x80 + 0x1F] = 0;
    assert_eq!(
        AtomContext::attach(bad).unwrap_err(),
        AttachError::MissingMasterTable("command")
    );
}
