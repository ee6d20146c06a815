use atom_bios::{AttachError, ExecError, Outcome};
use thiserror::Error;

use crate::device::ConnectorId;

pub type Result<T> = std::result::Result<T, LinkError>;

/// Failure of a single logical AUX transaction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuxError {
    #[error("AUX payload of {len} bytes exceeds the 16-byte limit")]
    PayloadTooLarge { len: usize },

    #[error("sink did not acknowledge the native AUX request")]
    Nack,

    #[error("I2C target did not acknowledge the sideband request")]
    I2cNack,

    #[error("AUX transaction timed out")]
    Timeout,

    #[error("AUX channel error")]
    ChannelError,

    #[error("AUX reply carried {received} of {expected} requested bytes")]
    ShortReply { expected: usize, received: usize },

    #[error("reserved AUX reply status {status:#04x}")]
    InvalidReply { status: u8 },

    #[error("sink kept deferring after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },

    #[error("AUX channel stayed busy after {retries} retries")]
    Busy { retries: u32 },

    #[error("AUX transaction table did not complete ({outcome:?})")]
    NotCompleted { outcome: Outcome },

    #[error(transparent)]
    Exec(#[from] ExecError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockRecoveryFailure {
    /// Every active lane was already driven at maximum swing.
    MaxSwing,
    /// The sink kept requesting the same swing level.
    SameSwing,
}

/// Link training did not converge.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TrainError {
    #[error("clock recovery failed ({reason:?}) after {adjustments} adjustments")]
    ClockRecovery {
        reason: ClockRecoveryFailure,
        adjustments: u32,
    },

    #[error("channel equalization failed after {adjustments} adjustments")]
    ChannelEqualization { adjustments: u32 },

    #[error("source command table {table} did not complete ({outcome:?})")]
    SourceCommand { table: u16, outcome: Outcome },

    #[error("sink reports no usable lanes")]
    NoLanes,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EdidError {
    #[error("EDID base block has a bad header")]
    BadHeader,

    #[error("EDID block {block} fails its checksum")]
    BadChecksum { block: u8 },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkError {
    #[error("firmware rejected: {0}")]
    Attach(#[from] AttachError),

    #[error(transparent)]
    Exec(#[from] ExecError),

    #[error("AUX transaction failed: {0}")]
    Aux(#[from] AuxError),

    #[error("link training failed: {0}")]
    Training(#[from] TrainError),

    #[error("EDID rejected: {0}")]
    Edid(#[from] EdidError),

    #[error("unknown connector {0:?}")]
    UnknownConnector(ConnectorId),

    #[error("connector table is full ({capacity} entries)")]
    ConnectorsFull { capacity: usize },
}
