//! Sink configuration space (DPCD) layout.

pub const DPCD_REV: u16 = 0x000;
pub const MAX_LINK_RATE: u16 = 0x001;
pub const MAX_LANE_COUNT: u16 = 0x002;
pub const MAX_DOWNSPREAD: u16 = 0x003;
pub const EDP_CONFIGURATION_CAP: u16 = 0x00D;
pub const TRAINING_AUX_RD_INTERVAL: u16 = 0x00E;

pub const LINK_BW_SET: u16 = 0x100;
pub const LANE_COUNT_SET: u16 = 0x101;
pub const TRAINING_PATTERN_SET: u16 = 0x102;
pub const TRAINING_LANE0_SET: u16 = 0x103;
pub const DOWNSPREAD_CTRL: u16 = 0x107;
pub const EDP_CONFIGURATION_SET: u16 = 0x10A;

pub const LANE0_1_STATUS: u16 = 0x202;
pub const SET_POWER: u16 = 0x600;

pub const RECEIVER_CAP_SIZE: usize = 15;
pub const LINK_STATUS_SIZE: usize = 6;

pub const LINK_RATE_1_62: u8 = 0x06;
pub const LINK_RATE_2_70: u8 = 0x0A;
pub const LINK_RATE_5_40: u8 = 0x14;

pub const LANE_COUNT_MASK: u8 = 0x1F;
pub const ENHANCED_FRAME_CAP: u8 = 0x80;
pub const TPS3_SUPPORTED: u8 = 0x40;
pub const MAX_DOWNSPREAD_0_5: u8 = 0x01;
pub const ALTERNATE_SCRAMBLER_RESET_CAP: u8 = 0x01;

pub const ENHANCED_FRAME_EN: u8 = 0x80;
pub const SPREAD_AMP_0_5: u8 = 0x10;
pub const ALTERNATE_SCRAMBLER_RESET_ENABLE: u8 = 0x01;
pub const SET_POWER_D0: u8 = 0x01;

pub const TRAINING_PATTERN_DISABLE: u8 = 0;
pub const TRAINING_PATTERN_1: u8 = 1;
pub const TRAINING_PATTERN_2: u8 = 2;
pub const TRAINING_PATTERN_3: u8 = 3;

pub const LANE_CR_DONE: u8 = 1 << 0;
pub const LANE_CHANNEL_EQ_DONE: u8 = 1 << 1;
pub const LANE_SYMBOL_LOCKED: u8 = 1 << 2;
pub const INTERLANE_ALIGN_DONE: u8 = 1 << 0;

pub const TRAIN_VOLTAGE_SWING_MASK: u8 = 0x03;
pub const TRAIN_MAX_SWING_REACHED: u8 = 0x04;
pub const TRAIN_PRE_EMPHASIS_SHIFT: u8 = 3;
pub const TRAIN_PRE_EMPHASIS_MASK: u8 = 0x18;
pub const TRAIN_MAX_PRE_EMPHASIS_REACHED: u8 = 0x20;

pub const VOLTAGE_SWING_MAX: u8 = 3;
pub const PRE_EMPHASIS_MAX: u8 = 3;

/// DPCD 1.1, the first revision with SET_POWER.
pub const DPCD_REV_11: u8 = 0x11;
/// DPCD 1.2, the first revision that may advertise TPS3.
pub const DPCD_REV_12: u8 = 0x12;

/// The receiver capability block at DPCD 0x000.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SinkCaps(pub [u8; RECEIVER_CAP_SIZE]);

impl SinkCaps {
    pub fn revision(&self) -> u8 {
        self.0[usize::from(DPCD_REV)]
    }

    pub fn max_link_rate_code(&self) -> u8 {
        self.0[usize::from(MAX_LINK_RATE)]
    }

    /// Maximum lane count, normalized to 1, 2 or 4.
    pub fn max_lane_count(&self) -> u8 {
        match self.0[usize::from(MAX_LANE_COUNT)] & LANE_COUNT_MASK {
            n @ (1 | 2 | 4) => n,
            _ => 1,
        }
    }

    pub fn enhanced_framing(&self) -> bool {
        self.0[usize::from(MAX_LANE_COUNT)] & ENHANCED_FRAME_CAP != 0
    }

    pub fn tps3(&self) -> bool {
        self.revision() >= DPCD_REV_12 && self.0[usize::from(MAX_LANE_COUNT)] & TPS3_SUPPORTED != 0
    }

    pub fn downspread(&self) -> bool {
        self.0[usize::from(MAX_DOWNSPREAD)] & MAX_DOWNSPREAD_0_5 != 0
    }

    pub fn alternate_scrambler_reset(&self) -> bool {
        self.0[usize::from(EDP_CONFIGURATION_CAP)] & ALTERNATE_SCRAMBLER_RESET_CAP != 0
    }

    /// Raw TRAINING_AUX_RD_INTERVAL (units of 4 ms, 0 meaning "use the default").
    pub fn training_interval(&self) -> u8 {
        self.0[usize::from(TRAINING_AUX_RD_INTERVAL)]
    }
}

/// The six link status bytes at DPCD 0x202.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkStatus(pub [u8; LINK_STATUS_SIZE]);

impl LinkStatus {
    pub fn lane(&self, lane: usize) -> u8 {
        (self.0[lane / 2] >> ((lane & 1) * 4)) & 0x0F
    }

    pub fn clock_recovery_ok(&self, lanes: u8) -> bool {
        (0..usize::from(lanes)).all(|lane| self.lane(lane) & LANE_CR_DONE != 0)
    }

    pub fn channel_eq_ok(&self, lanes: u8) -> bool {
        const ALL: u8 = LANE_CR_DONE | LANE_CHANNEL_EQ_DONE | LANE_SYMBOL_LOCKED;
        self.0[2] & INTERLANE_ALIGN_DONE != 0
            && (0..usize::from(lanes)).all(|lane| self.lane(lane) & ALL == ALL)
    }

    /// Requested (voltage swing, pre-emphasis) levels for `lane`.
    pub fn adjust_request(&self, lane: usize) -> (u8, u8) {
        let request = self.0[4 + lane / 2] >> ((lane & 1) * 4);
        (request & 0x03, (request >> 2) & 0x03)
    }

    /// Single drive setting for every lane: the highest swing and pre-emphasis any active lane
    /// requested, with the max-reached flags set at level 3.
    pub fn adjusted_train_set(&self, lanes: u8) -> u8 {
        let (mut v, mut p) = (0u8, 0u8);
        for lane in 0..usize::from(lanes) {
            let (swing, pre) = self.adjust_request(lane);
            v = v.max(swing);
            p = p.max(pre);
        }
        let mut set = v | (p << TRAIN_PRE_EMPHASIS_SHIFT);
        if v >= VOLTAGE_SWING_MAX {
            set |= TRAIN_MAX_SWING_REACHED;
        }
        if p >= PRE_EMPHASIS_MAX {
            set |= TRAIN_MAX_PRE_EMPHASIS_REACHED;
        }
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lane_status_nibbles() {
        let status = LinkStatus([0x71, 0x13, INTERLANE_ALIGN_DONE, 0, 0, 0]);
        assert_eq!(status.lane(0), 0x1);
        assert_eq!(status.lane(1), 0x7);
        assert_eq!(status.lane(2), 0x3);
        assert!(status.clock_recovery_ok(4));
        assert!(!status.channel_eq_ok(2));

        let status = LinkStatus([0x77, 0x77, INTERLANE_ALIGN_DONE, 0, 0, 0]);
        assert!(status.channel_eq_ok(4));
        let unaligned = LinkStatus([0x77, 0x77, 0, 0, 0, 0]);
        assert!(!unaligned.channel_eq_ok(4));
    }

    #[test]
    fn adjustment_takes_the_maximum_across_lanes() {
        // lane0: swing 1 pre 0, lane1: swing 0 pre 2
        let status = LinkStatus([0, 0, 0, 0, 0x81, 0x00]);
        assert_eq!(status.adjust_request(0), (1, 0));
        assert_eq!(status.adjust_request(1), (0, 2));
        assert_eq!(status.adjusted_train_set(2), 1 | (2 << 3));
        // Only lane 0 counts on a one-lane link.
        assert_eq!(status.adjusted_train_set(1), 1);

        let maxed = LinkStatus([0, 0, 0, 0, 0x0F, 0x00]);
        assert_eq!(
            maxed.adjusted_train_set(1),
            3 | TRAIN_MAX_SWING_REACHED | (3 << 3) | TRAIN_MAX_PRE_EMPHASIS_REACHED
        );
    }

    #[test]
    fn caps_decode_lane_count_and_features() {
        let mut caps = SinkCaps::default();
        caps.0[0] = 0x12;
        caps.0[2] = 0x84 | TPS3_SUPPORTED;
        assert_eq!(caps.max_lane_count(), 4);
        assert!(caps.enhanced_framing());
        assert!(caps.tps3());

        caps.0[0] = 0x11;
        assert!(!caps.tps3());
        caps.0[2] = 3;
        assert_eq!(caps.max_lane_count(), 1);
    }
}
