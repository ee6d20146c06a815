//! Interpreter for the command-table bytecode embedded in a graphics adapter's video firmware.
//!
//! A firmware image carries two master tables: a command master table indexing executable
//! bytecode tables (mode setting, encoder control, AUX transactions, ...) and a data master
//! table indexing static data (scratch size, indirect I/O programs, connector objects, ...).
//! [`AtomContext`] owns one validated image and runs its command tables against a
//! [`gpu_hal::Platform`].
//!
//! Table code is untrusted. Every fetch, operand access and branch target is bounds-checked;
//! a malformed table halts with a [`Fault`] reported in [`Outcome::Halted`] instead of
//! panicking. The context stays usable for the next invocation.
//!
//! ```text
//! invoke(table, params)
//!   `-> resolve master entry -> reset registers -> copy params in
//!         `-> fetch/dispatch loop (CALL_TABLE recurses with a shifted param window)
//!   <- copy params out (also on halt)
//! ```

#![forbid(unsafe_code)]

mod config;
mod error;
mod iio;
mod image;
mod interp;
mod opcodes;
mod operand;
mod tables;

/// Helpers for building synthetic firmware images and assembling command tables in tests.
///
/// Only available when compiling this crate's own tests, or when the `test-utils` feature is
/// enabled. Not part of the stable API.
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

#[cfg(test)]
mod tests;

pub use crate::config::InterpreterConfig;
pub use crate::error::{AttachError, ExecError, Fault};
pub use crate::iio::{IioTable, INDIRECT_WRITE};
pub use crate::image::{ByteView, FirmwareImage};
pub use crate::interp::{
    AtomContext, CompareFlags, ExecState, IoPort, Outcome, WS_AND_MASK, WS_ATTRIBUTES, WS_DATA_PTR,
    WS_FB_WINDOW, WS_OR_MASK, WS_QUOTIENT, WS_REG_PTR, WS_REMAINDER, WS_SHIFT,
};
pub use crate::operand::{Alignment, Attribute, OperandKind};
pub use crate::tables::{CommandTable, DataTable, MasterTable, TableHeader, TableIndex};
