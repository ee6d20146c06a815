//! Lane count and link rate selection, and the per-connector link configuration.

use crate::config::SourceCaps;
use crate::dpcd::{LinkStatus, SinkCaps, LINK_RATE_1_62, LINK_RATE_2_70, LINK_RATE_5_40};
use crate::train::TrainingState;

pub const RATE_1_62_KHZ: u32 = 162_000;
pub const RATE_2_70_KHZ: u32 = 270_000;
pub const RATE_5_40_KHZ: u32 = 540_000;

pub const MAX_LANES: usize = 4;

/// Link symbol clock for a DPCD bandwidth code. Unknown codes fall back to the lowest rate.
pub fn rate_from_code(code: u8) -> u32 {
    match code {
        LINK_RATE_5_40 => RATE_5_40_KHZ,
        LINK_RATE_2_70 => RATE_2_70_KHZ,
        _ => RATE_1_62_KHZ,
    }
}

/// DPCD bandwidth code for a link rate.
pub fn bandwidth_code(rate_khz: u32) -> u8 {
    match rate_khz {
        RATE_5_40_KHZ => LINK_RATE_5_40,
        RATE_2_70_KHZ => LINK_RATE_2_70,
        _ => LINK_RATE_1_62,
    }
}

/// Highest pixel clock `lanes` lanes at `rate_khz` can carry at `bpp` bits per pixel.
fn max_pixel_clock(rate_khz: u32, lanes: u8, bpp: u32) -> u64 {
    u64::from(rate_khz) * u64::from(lanes) * 8 / u64::from(bpp.max(1))
}

/// Lane count for a mode: start at two lanes and double while the sink's top rate cannot carry
/// the pixel clock, never exceeding the sink's lane count.
pub fn select_lane_count(caps: &SinkCaps, pixel_clock_khz: u32, bpp: u32) -> u8 {
    let max_lanes = caps.max_lane_count();
    let max_rate = rate_from_code(caps.max_link_rate_code());

    let mut lanes = 2u8;
    while lanes < max_lanes && u64::from(pixel_clock_khz) > max_pixel_clock(max_rate, lanes, bpp) {
        lanes *= 2;
    }
    lanes.min(max_lanes)
}

/// Lowest link rate that carries the mode over `lanes` lanes, or the sink maximum when none
/// does. Candidates never exceed what the sink advertises.
pub fn select_link_rate(
    caps: &SinkCaps,
    source: SourceCaps,
    pixel_clock_khz: u32,
    bpp: u32,
    lanes: u8,
) -> u32 {
    let sink_max = rate_from_code(caps.max_link_rate_code());
    let hbr2 = caps.max_link_rate_code() == LINK_RATE_5_40 && source.contains(SourceCaps::HBR2);

    [RATE_1_62_KHZ, RATE_2_70_KHZ, RATE_5_40_KHZ]
        .into_iter()
        .filter(|&rate| rate <= sink_max)
        .filter(|&rate| rate != RATE_5_40_KHZ || hbr2)
        .find(|&rate| u64::from(pixel_clock_khz) <= max_pixel_clock(rate, lanes, bpp))
        .unwrap_or(sink_max)
}

/// Per-connector link state.
///
/// `lanes` and `rate_khz` are only written after a successful training run. `train_set` and
/// `status` hold what that run ended with.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkConfig {
    pub caps: SinkCaps,
    pub lanes: u8,
    pub rate_khz: u32,
    pub train_set: [u8; MAX_LANES],
    pub status: LinkStatus,
    /// Adjustments the last successful run needed.
    pub retries: u32,
    /// Arm the transmitter through the DP encoder service table instead of the encoder table.
    pub use_encoder_service: bool,
}

impl LinkConfig {
    pub fn is_trained(&self) -> bool {
        self.lanes != 0
    }
}

/// Result of a successful [`crate::DisplayDevice::train_link`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegotiatedLink {
    pub lanes: u8,
    pub rate_khz: u32,
    /// States visited, starting at `Idle`.
    pub trace: Vec<TrainingState>,
}
