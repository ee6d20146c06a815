//! AUX channel transactions through the firmware's `ProcessAuxChannelTransaction` table.
//!
//! The table does the actual engine programming. This layer builds the request frame, hands it
//! to the table through the interpreter scratch area, classifies the reply and owns the retry
//! policy.

use atom_bios::{AtomContext, CommandTable, ExecError, Outcome};
use gpu_hal::{Delay, Platform};
use tracing::{debug, error, trace, warn};

use crate::config::{AuxConfig, DceVersion};
use crate::error::AuxError;

pub const AUX_MAX_PAYLOAD: usize = 16;
pub const AUX_HEADER_LEN: usize = 4;
pub const AUX_FRAME_LEN: usize = AUX_HEADER_LEN + AUX_MAX_PAYLOAD;

/// Scratch byte offsets of the request and reply buffers handed to the transaction table.
pub const REQUEST_OFFSET: u16 = 4;
pub const REPLY_OFFSET: u16 = 20;

pub const NATIVE_WRITE: u8 = 0x8;
pub const NATIVE_READ: u8 = 0x9;
pub const I2C_WRITE: u8 = 0x0;
pub const I2C_READ: u8 = 0x1;
pub const I2C_MOT: u8 = 0x4;

const STATUS_TIMEOUT: u8 = 1;
const STATUS_BUSY: u8 = 2;
const STATUS_CHANNEL_ERROR: u8 = 3;

const REPLY_NATIVE_MASK: u8 = 0x3;
const REPLY_NATIVE_NACK: u8 = 0x1;
const REPLY_NATIVE_DEFER: u8 = 0x2;
const REPLY_I2C_MASK: u8 = 0xC;
const REPLY_I2C_NACK: u8 = 0x4;
const REPLY_I2C_DEFER: u8 = 0x8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuxCommand {
    NativeWrite,
    NativeRead,
    /// I2C-over-AUX write. `mot` keeps the I2C transaction open after this request.
    I2cWrite { mot: bool },
    I2cRead { mot: bool },
}

impl AuxCommand {
    pub fn code(self) -> u8 {
        let mot = |mot: bool| if mot { I2C_MOT } else { 0 };
        match self {
            AuxCommand::NativeWrite => NATIVE_WRITE,
            AuxCommand::NativeRead => NATIVE_READ,
            AuxCommand::I2cWrite { mot: m } => I2C_WRITE | mot(m),
            AuxCommand::I2cRead { mot: m } => I2C_READ | mot(m),
        }
    }

    pub fn is_write(self) -> bool {
        matches!(self, AuxCommand::NativeWrite | AuxCommand::I2cWrite { .. })
    }

    pub fn is_sideband(self) -> bool {
        matches!(self, AuxCommand::I2cWrite { .. } | AuxCommand::I2cRead { .. })
    }
}

/// One logical AUX request. Writes carry `data`; reads ask for `read_len` bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuxRequest<'a> {
    pub command: AuxCommand,
    pub address: u16,
    pub data: &'a [u8],
    pub read_len: usize,
}

impl<'a> AuxRequest<'a> {
    pub fn native_read(address: u16, len: usize) -> Self {
        Self {
            command: AuxCommand::NativeRead,
            address,
            data: &[],
            read_len: len,
        }
    }

    pub fn native_write(address: u16, data: &'a [u8]) -> Self {
        Self {
            command: AuxCommand::NativeWrite,
            address,
            data,
            read_len: 0,
        }
    }

    /// Bytes carried on the wire in the request's direction.
    pub fn size(&self) -> usize {
        if self.command.is_write() {
            self.data.len()
        } else {
            self.read_len
        }
    }

    /// Encodes the request frame and returns it with its used length.
    ///
    /// Layout: `[addr_lo][addr_hi][command << 4][length]` followed by the write payload. The
    /// length byte packs `size - 1` with the transmit size in the upper nibble, or `3 << 4` for
    /// an address-only request.
    pub fn encode(&self) -> Result<([u8; AUX_FRAME_LEN], usize), AuxError> {
        let size = self.size();
        if size > AUX_MAX_PAYLOAD {
            return Err(AuxError::PayloadTooLarge { len: size });
        }
        let mut frame = [0u8; AUX_FRAME_LEN];
        let [lo, hi] = self.address.to_le_bytes();
        frame[0] = lo;
        frame[1] = hi;
        frame[2] = self.command.code() << 4;
        let tx_size = if self.command.is_write() {
            AUX_HEADER_LEN + size
        } else {
            AUX_HEADER_LEN
        };
        // The transmit size of a full 16-byte write does not fit the nibble and wraps.
        frame[3] = if size == 0 {
            3 << 4
        } else {
            ((size - 1) | (tx_size << 4)) as u8
        };

        let mut len = AUX_HEADER_LEN;
        if self.command.is_write() {
            frame[AUX_HEADER_LEN..AUX_HEADER_LEN + size].copy_from_slice(self.data);
            len += size;
        }
        Ok((frame, len))
    }
}

/// Acknowledged reply to an [`AuxRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuxReply {
    bytes: [u8; AUX_MAX_PAYLOAD],
    len: usize,
    /// Raw reply status byte from the transaction table.
    pub status: u8,
}

impl AuxReply {
    pub fn data(&self) -> &[u8] {
        &self.bytes[..self.len]
    }
}

/// How one pass through the transaction table ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Attempt {
    Ack { status: u8, reply_len: usize },
    Defer,
    Busy,
}

/// A connector's AUX channel bound to the adapter's interpreter and platform for the duration
/// of an operation.
pub struct AuxChannel<'a, P: Platform> {
    pub(crate) atom: &'a mut AtomContext,
    pub(crate) hw: &'a mut P,
    channel: u8,
    hpd: Option<u8>,
    dce: DceVersion,
    config: &'a AuxConfig,
}

impl<'a, P: Platform> AuxChannel<'a, P> {
    pub fn new(
        atom: &'a mut AtomContext,
        hw: &'a mut P,
        channel: u8,
        hpd: Option<u8>,
        dce: DceVersion,
        config: &'a AuxConfig,
    ) -> Self {
        Self {
            atom,
            hw,
            channel,
            hpd,
            dce,
            config,
        }
    }

    pub fn channel(&self) -> u8 {
        self.channel
    }

    pub fn delay_us(&mut self, us: u32) {
        self.hw.delay_us(us);
    }

    /// Runs any command table on the bound adapter.
    pub fn execute(&mut self, table: u16, params: &mut [u32]) -> Result<Outcome, ExecError> {
        self.atom.execute(self.hw, table, params)
    }

    /// Runs one logical transaction with the retry policy applied.
    pub fn transact(&mut self, request: &AuxRequest<'_>) -> Result<AuxReply, AuxError> {
        let (frame, frame_len) = request.encode()?;
        let size = request.size();

        let mut attempts = 0u32;
        let mut busy = 0u32;
        loop {
            if attempts >= self.config.attempts {
                error!(
                    channel = self.channel,
                    address = request.address,
                    attempts,
                    "AUX transaction retries exhausted"
                );
                return Err(AuxError::RetriesExhausted { attempts });
            }

            match self.attempt(request, &frame[..frame_len])? {
                Attempt::Ack { status, reply_len } => {
                    let mut bytes = [0u8; AUX_MAX_PAYLOAD];
                    let len = if request.command.is_write() {
                        0
                    } else {
                        reply_len.min(size)
                    };
                    if !self
                        .atom
                        .read_scratch(usize::from(REPLY_OFFSET), &mut bytes[..len])
                    {
                        return Err(AuxError::ChannelError);
                    }
                    trace!(
                        channel = self.channel,
                        address = request.address,
                        len,
                        "AUX ack"
                    );
                    return Ok(AuxReply { bytes, len, status });
                }
                Attempt::Defer => {
                    attempts += 1;
                    debug!(
                        channel = self.channel,
                        address = request.address,
                        attempts,
                        "AUX defer, retrying"
                    );
                    self.hw.delay_us(self.config.defer_delay_us);
                }
                Attempt::Busy => {
                    busy += 1;
                    if busy > self.config.busy_retry_limit {
                        error!(channel = self.channel, retries = busy - 1, "AUX channel stuck busy");
                        return Err(AuxError::Busy { retries: busy - 1 });
                    }
                    debug!(channel = self.channel, busy, "AUX busy, retrying");
                }
            }
        }
    }

    fn attempt(&mut self, request: &AuxRequest<'_>, frame: &[u8]) -> Result<Attempt, AuxError> {
        if !self.atom.write_scratch(usize::from(REQUEST_OFFSET), frame) {
            return Err(AuxError::ChannelError);
        }

        let delay = (self.config.delay_us / 10).min(0xFF);
        let hpd = if self.dce.is_dce4() {
            u32::from(self.hpd.unwrap_or(0))
        } else {
            0
        };
        let mut params = [
            u32::from(REQUEST_OFFSET) | (u32::from(REPLY_OFFSET) << 16),
            u32::from(self.channel) | (delay << 8) | (hpd << 24),
        ];
        let outcome = self.atom.execute(
            self.hw,
            CommandTable::ProcessAuxChannelTransaction.index(),
            &mut params,
        )?;
        if !outcome.is_completed() {
            warn!(channel = self.channel, ?outcome, "AUX transaction table did not complete");
            return Err(AuxError::NotCompleted { outcome });
        }

        let status = (params[1] >> 8) as u8;
        let reply_len = ((params[1] >> 16) & 0xFF) as usize;
        match status {
            STATUS_TIMEOUT => return Err(AuxError::Timeout),
            STATUS_BUSY => return Ok(Attempt::Busy),
            STATUS_CHANNEL_ERROR => return Err(AuxError::ChannelError),
            _ => {}
        }

        let reply = status >> 4;
        match reply & REPLY_NATIVE_MASK {
            0 => {}
            REPLY_NATIVE_NACK => {
                warn!(channel = self.channel, address = request.address, "AUX native nack");
                return Err(AuxError::Nack);
            }
            REPLY_NATIVE_DEFER => return Ok(Attempt::Defer),
            _ => return Err(AuxError::InvalidReply { status }),
        }

        if request.command.is_sideband() {
            match reply & REPLY_I2C_MASK {
                0 => {}
                REPLY_I2C_NACK => {
                    debug!(channel = self.channel, address = request.address, "I2C nack");
                    return Err(AuxError::I2cNack);
                }
                REPLY_I2C_DEFER => return Ok(Attempt::Defer),
                _ => return Err(AuxError::InvalidReply { status }),
            }
        }

        Ok(Attempt::Ack { status, reply_len })
    }

    /// Burst read of up to 16 bytes of sink configuration space.
    pub fn dpcd_read(&mut self, address: u16, out: &mut [u8]) -> Result<usize, AuxError> {
        let reply = self.transact(&AuxRequest::native_read(address, out.len()))?;
        let data = reply.data();
        out[..data.len()].copy_from_slice(data);
        Ok(data.len())
    }

    pub fn dpcd_write(&mut self, address: u16, data: &[u8]) -> Result<(), AuxError> {
        self.transact(&AuxRequest::native_write(address, data))
            .map(|_| ())
    }

    pub fn dpcd_read_byte(&mut self, address: u16) -> Result<u8, AuxError> {
        let mut byte = [0u8];
        match self.dpcd_read(address, &mut byte)? {
            1 => Ok(byte[0]),
            _ => Err(AuxError::ChannelError),
        }
    }

    pub fn dpcd_write_byte(&mut self, address: u16, value: u8) -> Result<(), AuxError> {
        self.dpcd_write(address, &[value])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn native_write_frame_layout() {
        let (frame, len) = AuxRequest::native_write(0x0103, &[0x11, 0x22])
            .encode()
            .unwrap();
        assert_eq!(len, 6);
        assert_eq!(&frame[..6], &[0x03, 0x01, 0x80, 0x61, 0x11, 0x22]);
    }

    #[test]
    fn native_read_frame_carries_no_payload() {
        let (frame, len) = AuxRequest::native_read(0x0202, 6).encode().unwrap();
        assert_eq!(len, 4);
        assert_eq!(&frame[..4], &[0x02, 0x02, 0x90, 0x45]);
    }

    #[test]
    fn address_only_i2c_start() {
        let request = AuxRequest {
            command: AuxCommand::I2cWrite { mot: true },
            address: 0x50,
            data: &[],
            read_len: 0,
        };
        let (frame, len) = request.encode().unwrap();
        assert_eq!(&frame[..len], &[0x50, 0x00, 0x40, 0x30]);
    }

    #[test]
    fn full_write_length_nibble_wraps() {
        let data = [0u8; 16];
        let (frame, len) = AuxRequest::native_write(0, &data).encode().unwrap();
        assert_eq!(len, 20);
        // (16 - 1) | (20 << 4), truncated to a byte
        assert_eq!(frame[3], 0x4F);
    }

    #[test]
    fn oversized_payload_is_rejected() {
        let data = [0u8; 17];
        assert_eq!(
            AuxRequest::native_write(0, &data).encode(),
            Err(AuxError::PayloadTooLarge { len: 17 })
        );
        assert_eq!(
            AuxRequest::native_read(0, 32).encode(),
            Err(AuxError::PayloadTooLarge { len: 32 })
        );
    }

    #[test]
    fn command_codes() {
        assert_eq!(AuxCommand::NativeWrite.code(), 0x8);
        assert_eq!(AuxCommand::NativeRead.code(), 0x9);
        assert_eq!(AuxCommand::I2cWrite { mot: false }.code(), 0x0);
        assert_eq!(AuxCommand::I2cRead { mot: true }.code(), 0x5);
    }
}
