use std::collections::VecDeque;

use atom_bios::test_utils::{Dst, Family, ImageBuilder, Src, TableAsm, COMMAND_SLOTS};
use atom_bios::{Alignment, CommandTable};
use gpu_hal::{Delay, RecordingDelay, RegisterAccess, RegisterFile, RegisterSpace};

use crate::dpcd::{
    INTERLANE_ALIGN_DONE, LANE0_1_STATUS, LANE_CHANNEL_EQ_DONE, LANE_COUNT_SET, LANE_CR_DONE,
    LANE_SYMBOL_LOCKED, TRAINING_LANE0_SET, TRAINING_PATTERN_SET,
};
use crate::sideband::{DDC_ADDR, DDC_SEGMENT_ADDR, EDID_BLOCK_SIZE, EDID_HEADER};

/// Register index of the simulated AUX engine block.
pub const AUX_BLOCK: u16 = 0x1800;
const AUX_REQUEST: u16 = 0;
const AUX_CONTROL: u16 = 5;
const AUX_STATUS: u16 = 6;
const AUX_LENGTH: u16 = 7;
const AUX_REPLY: u16 = 8;

/// Register index of the first parameter log register pair. Table `t` logs its two parameter
/// dwords to `LOG_BASE + 2t` and `LOG_BASE + 2t + 1`.
pub const LOG_BASE: u16 = 0x1A00;

/// Tables that are the source side of link training.
pub const SOURCE_TABLES: [CommandTable; 6] = [
    CommandTable::DigXEncoderControl,
    CommandTable::Dig1EncoderControl,
    CommandTable::Dig2EncoderControl,
    CommandTable::UniphyTransmitterControl,
    CommandTable::LvtmaTransmitterControl,
    CommandTable::DpEncoderService,
];

const DPCD_SIZE: usize = 0x1000;

fn general(index: u16) -> u32 {
    u32::from(index) << 2
}

/// The transaction table: copies the request frame from scratch into the engine, rings the
/// doorbell with the channel dword, then copies status, length and reply back.
pub fn aux_table() -> Vec<u8> {
    let mut asm = TableAsm::new().params(8);
    asm.set_reg_block(AUX_BLOCK)
        .set_fb_base(Src::Ps(0), Alignment::Word0);
    for i in 0..5u8 {
        asm.mov(Dst::Reg(AUX_REQUEST + u16::from(i)), Src::Fb(i));
    }
    asm.mov(Dst::Reg(AUX_CONTROL), Src::Ps(1))
        .op(Family::Move, Dst::Ps(1), 1, Src::Reg(AUX_STATUS), Alignment::Byte0)
        .op(Family::Move, Dst::Ps(1), 2, Src::Reg(AUX_LENGTH), Alignment::Byte0)
        .set_fb_base(Src::Ps(0), Alignment::Word16);
    for i in 0..4u8 {
        asm.mov(Dst::Fb(i), Src::Reg(AUX_REPLY + u16::from(i)));
    }
    asm.eot();
    asm.finish()
}

/// A table that records its two parameter dwords in its log register pair.
pub fn logging_table(table: u16, content_revision: u8) -> Vec<u8> {
    let mut asm = TableAsm::new().params(8).revision(1, content_revision);
    asm.mov(Dst::Reg(LOG_BASE + 2 * table), Src::Ps(0))
        .mov(Dst::Reg(LOG_BASE + 2 * table + 1), Src::Ps(1))
        .eot();
    asm.finish()
}

/// Firmware with the AUX table and every source table installed.
#[derive(Debug, Clone)]
pub struct SimFirmware {
    service_revision: Option<u8>,
}

impl Default for SimFirmware {
    fn default() -> Self {
        Self {
            service_revision: Some(1),
        }
    }
}

impl SimFirmware {
    pub fn new() -> Self {
        Self::default()
    }

    /// Content revision of the DP encoder service table, or `None` to leave it out.
    pub fn service_revision(mut self, revision: Option<u8>) -> Self {
        self.service_revision = revision;
        self
    }

    pub fn builder(&self) -> ImageBuilder {
        let mut image = ImageBuilder::new()
            .command(CommandTable::ProcessAuxChannelTransaction.index(), aux_table())
            .scratch_kb(4);
        for table in SOURCE_TABLES {
            let revision = if table == CommandTable::DpEncoderService {
                match self.service_revision {
                    Some(revision) => revision,
                    None => continue,
                }
            } else {
                1
            };
            image = image.command(table.index(), logging_table(table.index(), revision));
        }
        image
    }

    pub fn build(&self) -> Vec<u8> {
        self.builder().build()
    }
}

/// Scripted reply the sink gives instead of handling a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimReply {
    Defer,
    Nack,
    Busy,
    Timeout,
    ChannelError,
    I2cNack,
    I2cDefer,
}

impl SimReply {
    pub fn status(self) -> u8 {
        match self {
            SimReply::Defer => 0x20,
            SimReply::Nack => 0x10,
            SimReply::Busy => 2,
            SimReply::Timeout => 1,
            SimReply::ChannelError => 3,
            SimReply::I2cNack => 0x40,
            SimReply::I2cDefer => 0x80,
        }
    }
}

/// A DisplayPort sink: configuration space, an EDID behind the DDC address, and a scripted
/// training response.
#[derive(Debug, Clone)]
pub struct SimSink {
    pub dpcd: Vec<u8>,
    pub edid: Vec<u8>,
    /// AUX channel id the sink is wired to; requests on any other channel time out.
    pub channel: u8,
    /// One-shot replies, consumed before requests are handled normally.
    pub script: VecDeque<SimReply>,
    /// Reply given to every request once `script` is empty.
    pub always: Option<SimReply>,
    /// Status reads under pattern 1 needed before lanes report CR_DONE. `None` never locks.
    pub cr_after: Option<u32>,
    /// Status reads under pattern 2/3 needed before channel equalization is done.
    pub eq_after: Option<u32>,
    /// ADJUST_REQUEST_LANE0_1 / LANE2_3 bytes reported with every status read.
    pub adjust: [u8; 2],
    /// Native writes starting at these addresses are not acknowledged.
    pub nack_writes: Vec<u16>,
    /// Caps the length of lane status replies.
    pub status_reply_len: Option<usize>,
    /// Every TRAINING_LANEx_SET write, in order.
    pub lane_set_writes: Vec<Vec<u8>>,
    /// Every TRAINING_PATTERN_SET write, in order.
    pub pattern_writes: Vec<u8>,
    /// Doorbell rings, including scripted replies.
    pub transactions: u32,
    cr_reads: u32,
    eq_reads: u32,
    cr_locked: bool,
    i2c_segment: u8,
    i2c_offset: usize,
}

impl Default for SimSink {
    fn default() -> Self {
        Self {
            dpcd: vec![0; DPCD_SIZE],
            edid: Vec::new(),
            channel: 0,
            script: VecDeque::new(),
            always: None,
            cr_after: Some(1),
            eq_after: Some(1),
            adjust: [0; 2],
            nack_writes: Vec::new(),
            status_reply_len: None,
            lane_set_writes: Vec::new(),
            pattern_writes: Vec::new(),
            transactions: 0,
            cr_reads: 0,
            eq_reads: 0,
            cr_locked: false,
            i2c_segment: 0,
            i2c_offset: 0,
        }
    }
}

impl SimSink {
    /// A DPCD 1.2 sink with the given bandwidth code and lane count.
    pub fn new(rate_code: u8, lanes: u8) -> Self {
        let mut sink = Self::default();
        sink.dpcd[0] = 0x12;
        sink.dpcd[1] = rate_code;
        sink.dpcd[2] = lanes;
        sink
    }

    fn status_bytes(&mut self) {
        let lanes = usize::from(self.dpcd[usize::from(LANE_COUNT_SET)] & 0x1F).min(4);
        let (nibble, aligned) = match self.dpcd[usize::from(TRAINING_PATTERN_SET)] & 0x3 {
            1 => {
                self.cr_reads += 1;
                if self.cr_after.is_some_and(|n| self.cr_reads >= n) {
                    self.cr_locked = true;
                }
                (if self.cr_locked { LANE_CR_DONE } else { 0 }, false)
            }
            2 | 3 => {
                self.eq_reads += 1;
                let eq = self.eq_after.is_some_and(|n| self.eq_reads >= n);
                let mut nibble = if self.cr_locked { LANE_CR_DONE } else { 0 };
                if eq {
                    nibble |= LANE_CHANNEL_EQ_DONE | LANE_SYMBOL_LOCKED;
                }
                (nibble, eq)
            }
            _ => return,
        };

        let base = usize::from(LANE0_1_STATUS);
        let mut lane_bytes = [0u8; 2];
        for lane in 0..lanes {
            lane_bytes[lane / 2] |= nibble << ((lane & 1) * 4);
        }
        self.dpcd[base..base + 2].copy_from_slice(&lane_bytes);
        self.dpcd[base + 2] = if aligned { INTERLANE_ALIGN_DONE } else { 0 };
        self.dpcd[base + 4..base + 6].copy_from_slice(&self.adjust);
    }

    fn native_write(&mut self, address: usize, data: &[u8]) -> Option<()> {
        if self.nack_writes.iter().any(|&a| usize::from(a) == address) {
            return None;
        }
        self.dpcd.get_mut(address..address + data.len())?.copy_from_slice(data);
        if address == usize::from(TRAINING_PATTERN_SET) {
            let pattern = data.first().copied().unwrap_or(0) & 0x3;
            self.pattern_writes.push(pattern);
            match pattern {
                1 => {
                    self.cr_reads = 0;
                    self.cr_locked = false;
                }
                2 | 3 => self.eq_reads = 0,
                _ => {}
            }
        }
        if address == usize::from(TRAINING_LANE0_SET) {
            self.lane_set_writes.push(data.to_vec());
        }
        Some(())
    }

    fn native_read(&mut self, address: usize, mut len: usize) -> Option<Vec<u8>> {
        if address == usize::from(LANE0_1_STATUS) {
            self.status_bytes();
            len = self.status_reply_len.map_or(len, |cap| len.min(cap));
        }
        self.dpcd.get(address..address + len).map(<[u8]>::to_vec)
    }

    fn i2c(
        &mut self,
        address: u8,
        write: bool,
        mot: bool,
        data: &[u8],
        len: usize,
    ) -> Result<Vec<u8>, u8> {
        let nack = SimReply::I2cNack.status();
        let reply = if data.is_empty() && len == 0 {
            Vec::new()
        } else if write {
            match address {
                DDC_SEGMENT_ADDR => self.i2c_segment = data[0],
                DDC_ADDR => self.i2c_offset = usize::from(data[0]),
                _ => return Err(nack),
            }
            Vec::new()
        } else {
            if address != DDC_ADDR {
                return Err(nack);
            }
            let start = usize::from(self.i2c_segment) * 2 * EDID_BLOCK_SIZE + self.i2c_offset;
            let bytes = self.edid.get(start..start + len).ok_or(nack)?.to_vec();
            self.i2c_offset += len;
            bytes
        };
        if !mot {
            self.i2c_segment = 0;
        }
        Ok(reply)
    }

    /// Handles one decoded request frame. Returns the status byte and the reply bytes.
    pub fn handle(&mut self, channel: u8, frame: &[u8; 20]) -> (u8, Vec<u8>) {
        self.transactions += 1;
        if let Some(reply) = self.script.pop_front().or(self.always) {
            return (reply.status(), Vec::new());
        }
        if channel != self.channel {
            return (SimReply::Timeout.status(), Vec::new());
        }

        let address = usize::from(u16::from_le_bytes([frame[0], frame[1]]));
        let request = frame[2] >> 4;
        let size = if frame[3] == 0x30 {
            0
        } else {
            usize::from(frame[3] & 0xF) + 1
        };
        let read = request & 0x1 != 0;
        let payload = if read { &[][..] } else { &frame[4..4 + size] };

        if request & 0x8 != 0 {
            let reply = if read {
                self.native_read(address, size)
            } else {
                self.native_write(address, payload).map(|()| Vec::new())
            };
            match reply {
                Some(bytes) => (0, bytes),
                None => (SimReply::Nack.status(), Vec::new()),
            }
        } else {
            let mot = request & 0x4 != 0;
            let len = if read { size } else { 0 };
            match self.i2c(address as u8, !read, mot, payload, len) {
                Ok(bytes) => (0, bytes),
                Err(status) => (status, Vec::new()),
            }
        }
    }
}

/// A source command observed through a logging table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceCommand {
    pub table: u16,
    pub params: [u32; 2],
}

/// Register file plus a sink wired behind the AUX engine registers of [`aux_table`].
#[derive(Debug, Clone, Default)]
pub struct SimPlatform {
    pub regs: RegisterFile,
    pub delay: RecordingDelay,
    pub sink: SimSink,
    pub commands: Vec<SourceCommand>,
}

impl SimPlatform {
    pub fn new(sink: SimSink) -> Self {
        Self {
            sink,
            ..Self::default()
        }
    }

    fn ring(&mut self, control: u32) {
        let mut frame = [0u8; 20];
        for (i, chunk) in frame.chunks_exact_mut(4).enumerate() {
            let value = self
                .regs
                .get(RegisterSpace::General, general(AUX_BLOCK + AUX_REQUEST + i as u16));
            chunk.copy_from_slice(&value.to_le_bytes());
        }
        let (status, reply) = self.sink.handle(control as u8, &frame);

        let mut words = [0u8; 16];
        words[..reply.len()].copy_from_slice(&reply);
        for (i, chunk) in words.chunks_exact(4).enumerate() {
            let value = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            self.regs.preload(
                RegisterSpace::General,
                general(AUX_BLOCK + AUX_REPLY + i as u16),
                value,
            );
        }
        self.regs.preload(
            RegisterSpace::General,
            general(AUX_BLOCK + AUX_STATUS),
            u32::from(status),
        );
        self.regs.preload(
            RegisterSpace::General,
            general(AUX_BLOCK + AUX_LENGTH),
            reply.len() as u32,
        );
    }

    /// Source commands issued through `table`, in order.
    pub fn commands_to(&self, table: CommandTable) -> Vec<[u32; 2]> {
        self.commands
            .iter()
            .filter(|c| c.table == table.index())
            .map(|c| c.params)
            .collect()
    }
}

impl RegisterAccess for SimPlatform {
    fn read(&mut self, space: RegisterSpace, offset: u32) -> u32 {
        self.regs.read(space, offset)
    }

    fn write(&mut self, space: RegisterSpace, offset: u32, value: u32) {
        self.regs.write(space, offset, value);
        if space != RegisterSpace::General {
            return;
        }
        let index = offset >> 2;
        if index == u32::from(AUX_BLOCK + AUX_CONTROL) {
            self.ring(value);
            return;
        }
        let log_end = u32::from(LOG_BASE) + 2 * u32::from(COMMAND_SLOTS);
        if (u32::from(LOG_BASE)..log_end).contains(&index)
            && (index - u32::from(LOG_BASE)) % 2 == 1
        {
            let table = ((index - u32::from(LOG_BASE)) / 2) as u16;
            let first = self.regs.get(space, offset - 4);
            self.commands.push(SourceCommand {
                table,
                params: [first, value],
            });
        }
    }
}

impl Delay for SimPlatform {
    fn delay_us(&mut self, us: u32) {
        self.delay.delay_us(us)
    }
}

/// A valid 128-byte EDID block. Block 0 gets the fixed header and `extensions` in byte 126;
/// the checksum byte is filled in.
pub fn edid_block(index: u8, extensions: u8) -> [u8; EDID_BLOCK_SIZE] {
    let mut block = [0u8; EDID_BLOCK_SIZE];
    if index == 0 {
        block[..EDID_HEADER.len()].copy_from_slice(&EDID_HEADER);
        block[126] = extensions;
    } else {
        // CEA extension tag and revision.
        block[0] = 0x02;
        block[1] = 0x03;
    }
    for (i, byte) in block[8..120].iter_mut().enumerate() {
        *byte = index.wrapping_mul(31).wrapping_add(i as u8);
    }
    let sum = block[..127].iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
    block[127] = 0u8.wrapping_sub(sum);
    block
}

/// Concatenated EDID with `extensions` extension blocks.
pub fn edid(extensions: u8) -> Vec<u8> {
    (0..=extensions)
        .flat_map(|index| edid_block(index, extensions))
        .collect()
}
