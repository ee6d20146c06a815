use thiserror::Error;

pub type Result<T> = std::result::Result<T, AttachError>;

/// Firmware image rejected at attach time. Fatal for the device context.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AttachError {
    #[error("firmware image too small ({len} bytes)")]
    TooSmall { len: usize },

    #[error("missing option ROM signature (found {found:#06x})")]
    BadRomSignature { found: u16 },

    #[error("missing ATI vendor magic")]
    BadVendorMagic,

    #[error("ROM header at {offset:#06x} lacks the ATOM magic")]
    BadAtomMagic { offset: u16 },

    #[error("{what} at {offset:#06x} extends past the end of the image ({len} bytes)")]
    Truncated {
        what: &'static str,
        offset: usize,
        len: usize,
    },

    #[error("{0} master table is absent")]
    MissingMasterTable(&'static str),

    #[error("malformed indirect I/O program at {offset:#06x}: {reason}")]
    BadIndirectIo { offset: usize, reason: &'static str },
}

/// Configuration error reported before any table code runs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecError {
    #[error("command table index {index} is outside the master table ({count} entries)")]
    UnknownTable { index: u16, count: u16 },

    #[error("parameter block of {len} dwords exceeds the {max}-dword parameter space")]
    ParamsTooLarge { len: usize, max: usize },
}

/// Reason a running table stopped before its end-of-table opcode.
///
/// Faults are not errors: they are reported in [`crate::Outcome::Halted`] and logged. The
/// requested action did not complete, but the context stays usable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Fault {
    #[error("unknown opcode {opcode:#04x} at {offset:#06x}")]
    UnknownOpcode { opcode: u8, offset: usize },

    #[error("fetch at {offset:#06x} past the end of the table")]
    OutOfBounds { offset: usize },

    #[error("indirect data read at {offset:#06x} outside the image")]
    DataOutOfBounds { offset: usize },

    #[error("workspace slot {index} outside the {len}-dword workspace")]
    Workspace { index: u8, len: usize },

    #[error("parameter slot {index} outside the parameter space")]
    Parameter { index: usize },

    #[error("frame buffer dword {index} outside the firmware scratch area")]
    Scratch { index: usize },

    #[error("no indirect I/O program for selector {selector:#04x}")]
    MissingIndirectProgram { selector: u8 },

    #[error("malformed switch case tag {tag:#04x} at {offset:#06x}")]
    BadSwitch { tag: u8, offset: usize },

    #[error("table call depth limit {limit} exceeded")]
    CallDepth { limit: u32 },

    #[error("step budget of {limit} opcodes exhausted")]
    StepBudget { limit: u64 },
}
