//! Two-phase link training: clock recovery, then channel equalization.
//!
//! ```text
//! Idle -> ClockRecovery -> ChannelEqualization -> Trained
//!              |                    |
//!              `------> Aborted <---'
//! ```
//!
//! Each phase writes a drive setting, waits the sink's read interval, reads the lane status
//! and applies the sink's adjustment request, under a bounded number of tries.

use gpu_hal::Platform;
use tracing::{debug, warn};

use crate::aux::AuxChannel;
use crate::config::{SourceCaps, TrainingConfig};
use crate::device::PanelMode;
use crate::dpcd::{
    LinkStatus, SinkCaps, ALTERNATE_SCRAMBLER_RESET_ENABLE, DOWNSPREAD_CTRL, DPCD_REV_11,
    EDP_CONFIGURATION_SET, ENHANCED_FRAME_EN, LANE0_1_STATUS, LANE_COUNT_SET, LINK_BW_SET,
    LINK_STATUS_SIZE, SET_POWER, SET_POWER_D0, SPREAD_AMP_0_5, TRAINING_LANE0_SET,
    TRAINING_PATTERN_1, TRAINING_PATTERN_2, TRAINING_PATTERN_3, TRAINING_PATTERN_DISABLE,
    TRAINING_PATTERN_SET, TRAIN_MAX_SWING_REACHED, TRAIN_VOLTAGE_SWING_MASK,
};
use crate::encoder::SourceControl;
use crate::error::{AuxError, ClockRecoveryFailure, LinkError, TrainError};
use crate::link::{bandwidth_code, MAX_LANES};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrainingState {
    Idle,
    ClockRecovery,
    ChannelEqualization,
    Trained,
    Aborted,
}

/// A single training run over one connector.
pub struct LinkTrainer<'r, 'a, P: Platform> {
    aux: &'r mut AuxChannel<'a, P>,
    source: SourceControl,
    caps: SinkCaps,
    source_caps: SourceCaps,
    panel_mode: PanelMode,
    config: &'r TrainingConfig,
    train_set: [u8; MAX_LANES],
    status: LinkStatus,
    adjustments: u32,
    state: TrainingState,
    trace: Vec<TrainingState>,
}

impl<'r, 'a, P: Platform> LinkTrainer<'r, 'a, P> {
    pub fn new(
        aux: &'r mut AuxChannel<'a, P>,
        source: SourceControl,
        caps: SinkCaps,
        source_caps: SourceCaps,
        panel_mode: PanelMode,
        config: &'r TrainingConfig,
    ) -> Self {
        Self {
            aux,
            source,
            caps,
            source_caps,
            panel_mode,
            config,
            train_set: [0; MAX_LANES],
            status: LinkStatus::default(),
            adjustments: 0,
            state: TrainingState::Idle,
            trace: vec![TrainingState::Idle],
        }
    }

    pub fn state(&self) -> TrainingState {
        self.state
    }

    pub fn trace(&self) -> &[TrainingState] {
        &self.trace
    }

    pub fn train_set(&self) -> [u8; MAX_LANES] {
        self.train_set
    }

    pub fn status(&self) -> LinkStatus {
        self.status
    }

    /// Adjustments applied across both phases.
    pub fn adjustments(&self) -> u32 {
        self.adjustments
    }

    fn lanes(&self) -> u8 {
        self.source.lanes
    }

    fn enter(&mut self, state: TrainingState) {
        debug!(
            channel = self.aux.channel(),
            from = ?self.state,
            to = ?state,
            "training state change"
        );
        self.state = state;
        self.trace.push(state);
    }

    /// Runs both phases. Every failure, including one before the source was armed, ends in
    /// [`TrainingState::Aborted`].
    pub fn run(&mut self) -> Result<(), LinkError> {
        let result = self
            .prepare()
            .and_then(|()| self.source.start_training(self.aux))
            .and_then(|()| self.train_armed());
        match result {
            Ok(()) => {
                self.enter(TrainingState::Trained);
                Ok(())
            }
            Err(err) => {
                warn!(channel = self.aux.channel(), error = %err, "link training aborted");
                self.enter(TrainingState::Aborted);
                Err(err)
            }
        }
    }

    /// Both phases on an armed source. The link is taken out of training whatever the outcome.
    fn train_armed(&mut self) -> Result<(), LinkError> {
        let result = self
            .aux
            .dpcd_write_byte(TRAINING_PATTERN_SET, TRAINING_PATTERN_DISABLE)
            .map_err(LinkError::from)
            .and_then(|()| self.clock_recovery())
            .and_then(|()| self.channel_equalization());
        let finished = self.finish();
        match (result, finished) {
            (Err(err), Err(finish)) => {
                warn!(channel = self.aux.channel(), error = %finish, "leaving training failed");
                Err(err)
            }
            (result, finished) => result.and(finished),
        }
    }

    /// Sink-side link configuration ahead of arming the source.
    fn prepare(&mut self) -> Result<(), LinkError> {
        power_up_sink(self.aux, &self.caps, self.config)?;

        let downspread = if self.caps.downspread()
            && self.source_caps.contains(SourceCaps::SPREAD_SPECTRUM)
        {
            SPREAD_AMP_0_5
        } else {
            0
        };
        self.aux.dpcd_write_byte(DOWNSPREAD_CTRL, downspread)?;

        if self.panel_mode == PanelMode::InternalDp2 {
            self.aux
                .dpcd_write_byte(EDP_CONFIGURATION_SET, ALTERNATE_SCRAMBLER_RESET_ENABLE)?;
        }

        let mut lane_count = self.lanes();
        if self.caps.enhanced_framing() {
            lane_count |= ENHANCED_FRAME_EN;
        }
        self.aux.dpcd_write_byte(LANE_COUNT_SET, lane_count)?;
        self.aux
            .dpcd_write_byte(LINK_BW_SET, bandwidth_code(self.source.rate_khz))?;
        Ok(())
    }

    fn set_pattern(&mut self, pattern: u8) -> Result<(), LinkError> {
        self.source.select_pattern(self.aux, pattern)?;
        self.aux.dpcd_write_byte(TRAINING_PATTERN_SET, pattern)?;
        Ok(())
    }

    /// Programs the source with lane 0's setting and the sink with every active lane's.
    fn apply_drive(&mut self) -> Result<(), LinkError> {
        self.source.set_drive(self.aux, self.train_set[0])?;
        let lanes = usize::from(self.lanes());
        self.aux
            .dpcd_write(TRAINING_LANE0_SET, &self.train_set[..lanes])?;
        Ok(())
    }

    /// Interval in microseconds; the sink advertises it in 4 ms units.
    fn read_interval(&self, default_us: u32) -> u32 {
        match self.caps.training_interval() {
            0 => default_us,
            n => u32::from(n) * 4000,
        }
    }

    fn read_status(&mut self) -> Result<(), LinkError> {
        let mut bytes = [0u8; LINK_STATUS_SIZE];
        let received = self.aux.dpcd_read(LANE0_1_STATUS, &mut bytes)?;
        if received < bytes.len() {
            return Err(AuxError::ShortReply {
                expected: bytes.len(),
                received,
            }
            .into());
        }
        self.status = LinkStatus(bytes);
        Ok(())
    }

    fn adjust(&mut self) -> Result<(), LinkError> {
        let set = self.status.adjusted_train_set(self.lanes());
        let lanes = usize::from(self.lanes());
        self.train_set[..lanes].fill(set);
        self.adjustments += 1;
        self.apply_drive()
    }

    fn clock_recovery(&mut self) -> Result<(), LinkError> {
        self.enter(TrainingState::ClockRecovery);
        self.set_pattern(TRAINING_PATTERN_1)?;
        self.train_set = [0; MAX_LANES];
        self.apply_drive()?;
        self.aux.delay_us(self.config.pattern_settle_us);

        let lanes = usize::from(self.lanes());
        let interval = self.read_interval(self.config.default_cr_interval_us);
        let mut voltage = 0xFFu8;
        let mut tries = 0u32;
        loop {
            self.aux.delay_us(interval);
            self.read_status()?;
            if self.status.clock_recovery_ok(self.lanes()) {
                debug!(adjustments = self.adjustments, "clock recovery done");
                return Ok(());
            }

            let fail = |reason| TrainError::ClockRecovery {
                reason,
                adjustments: self.adjustments,
            };
            if self.train_set[..lanes]
                .iter()
                .all(|set| set & TRAIN_MAX_SWING_REACHED != 0)
            {
                return Err(fail(ClockRecoveryFailure::MaxSwing).into());
            }

            let swing = self.train_set[0] & TRAIN_VOLTAGE_SWING_MASK;
            if swing == voltage {
                tries += 1;
                if tries >= self.config.cr_max_same_swing {
                    return Err(fail(ClockRecoveryFailure::SameSwing).into());
                }
            } else {
                tries = 0;
            }
            voltage = swing;

            self.adjust()?;
        }
    }

    fn channel_equalization(&mut self) -> Result<(), LinkError> {
        self.enter(TrainingState::ChannelEqualization);
        let pattern = if self.caps.tps3() && self.source_caps.contains(SourceCaps::TPS3) {
            TRAINING_PATTERN_3
        } else {
            TRAINING_PATTERN_2
        };
        self.set_pattern(pattern)?;

        let interval = self.read_interval(self.config.default_eq_interval_us);
        let start = self.adjustments;
        let mut tries = 0u32;
        loop {
            self.aux.delay_us(interval);
            self.read_status()?;
            if self.status.channel_eq_ok(self.lanes()) {
                debug!(adjustments = self.adjustments, "channel equalization done");
                return Ok(());
            }
            if tries > self.config.eq_max_attempts {
                return Err(TrainError::ChannelEqualization {
                    adjustments: self.adjustments - start,
                }
                .into());
            }
            self.adjust()?;
            tries += 1;
        }
    }

    fn finish(&mut self) -> Result<(), LinkError> {
        self.aux.delay_us(self.config.pattern_settle_us);
        self.aux
            .dpcd_write_byte(TRAINING_PATTERN_SET, TRAINING_PATTERN_DISABLE)?;
        self.source.complete_training(self.aux)
    }
}

/// Wakes the sink with `SET_POWER = D0` when its DPCD revision has the register.
pub fn power_up_sink<P: Platform>(
    aux: &mut AuxChannel<'_, P>,
    caps: &SinkCaps,
    config: &TrainingConfig,
) -> Result<(), LinkError> {
    if caps.revision() < DPCD_REV_11 {
        return Ok(());
    }
    aux.dpcd_write_byte(SET_POWER, SET_POWER_D0)?;
    aux.delay_us(config.power_up_delay_us);
    Ok(())
}
