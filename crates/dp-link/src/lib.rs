//! DisplayPort link layer on top of the firmware interpreter.
//!
//! All hardware work goes through firmware command tables: AUX transactions run
//! `ProcessAuxChannelTransaction`, and the source side of link training runs the encoder,
//! transmitter and DP encoder service tables. This crate owns what the tables do not:
//!
//! - request framing, reply classification and the AUX retry policy ([`AuxChannel`])
//! - I2C-over-AUX and EDID retrieval ([`sideband`])
//! - lane count and link rate selection ([`link`])
//! - the clock recovery / channel equalization state machine ([`LinkTrainer`])
//! - per-connector link state behind a fixed-capacity arena ([`DisplayDevice`])

#![forbid(unsafe_code)]

pub mod aux;
pub mod config;
pub mod device;
pub mod dpcd;
pub mod encoder;
pub mod error;
pub mod link;
pub mod quirks;
pub mod sideband;
pub mod train;

/// Simulated adapter with a scripted DisplayPort sink behind a synthetic AUX table.
///
/// Only available when compiling this crate's own tests, or when the `test-utils` feature is
/// enabled. Not part of the stable API.
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;


pub use crate::aux::{AuxChannel, AuxCommand, AuxReply, AuxRequest};
pub use crate::config::{AuxConfig, DceVersion, DeviceConfig, SourceCaps, TrainingConfig};
pub use crate::device::{
    Connector, ConnectorId, ConnectorInfo, DisplayDevice, PanelMode, MAX_CONNECTORS,
};
pub use crate::dpcd::{LinkStatus, SinkCaps};
pub use crate::encoder::{SourceControl, Transmitter};
pub use crate::error::{AuxError, ClockRecoveryFailure, EdidError, LinkError, Result, TrainError};
pub use crate::link::{LinkConfig, NegotiatedLink};
pub use crate::sideband::{Edid, I2cMode};
pub use crate::train::{LinkTrainer, TrainingState};
