//! Display link bring-up driven by adapter firmware.
//!
//! - [`gpu_hal`]: register access and delay seams.
//! - [`atom_bios`]: the firmware image and its bytecode interpreter.
//! - [`dp_link`]: AUX transactions, EDID, and DisplayPort link training on top of the
//!   interpreter.

#![forbid(unsafe_code)]

pub use atom_bios;
pub use dp_link;
pub use gpu_hal;

pub use dp_link::{ConnectorId, ConnectorInfo, DeviceConfig, DisplayDevice, LinkError};
