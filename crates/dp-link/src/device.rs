use atom_bios::{AtomContext, CommandTable, Outcome};
use gpu_hal::Platform;
use tracing::{debug, info};

use crate::aux::{AuxChannel, AuxReply, AuxRequest};
use crate::config::DeviceConfig;
use crate::dpcd::{SinkCaps, LANE_COUNT_MASK, MAX_LANE_COUNT};
use crate::encoder::{SourceControl, Transmitter};
use crate::error::{LinkError, Result, TrainError};
use crate::link::{select_lane_count, select_link_rate, LinkConfig, NegotiatedLink};
use crate::sideband::{Edid, I2cMode};
use crate::train::{power_up_sink, LinkTrainer, TrainingState};

pub const MAX_CONNECTORS: usize = 16;

/// Handle of a connector registered with a [`DisplayDevice`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectorId(pub u8);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PanelMode {
    #[default]
    External,
    /// Embedded panel behind an internal DisplayPort bridge.
    InternalDp1,
    /// Embedded panel that uses the alternate scrambler reset.
    InternalDp2,
}

impl PanelMode {
    /// Mode actually used with a sink. Any embedded mode becomes `InternalDp2` when the sink
    /// supports the alternate scrambler reset, and `InternalDp1` otherwise.
    pub fn for_sink(self, caps: &SinkCaps) -> PanelMode {
        match self {
            PanelMode::External => PanelMode::External,
            _ if caps.alternate_scrambler_reset() => PanelMode::InternalDp2,
            _ => PanelMode::InternalDp1,
        }
    }
}

/// Static description of a DisplayPort connector, as discovered from the firmware's object
/// tables by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConnectorInfo {
    /// AUX engine channel id.
    pub channel: u8,
    pub hpd: Option<u8>,
    pub dig: u8,
    pub link_b: bool,
    pub transmitter: Transmitter,
    pub panel_mode: PanelMode,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connector {
    pub info: ConnectorInfo,
    pub link: LinkConfig,
    last_trace: Vec<TrainingState>,
}

impl Connector {
    /// States visited by the most recent training attempt, successful or not.
    pub fn last_trace(&self) -> &[TrainingState] {
        &self.last_trace
    }
}

/// One display adapter: the platform, the attached firmware and its connectors.
pub struct DisplayDevice<P: Platform> {
    hw: P,
    atom: AtomContext,
    connectors: [Option<Connector>; MAX_CONNECTORS],
    config: DeviceConfig,
    use_encoder_service: bool,
}

impl<P: Platform> DisplayDevice<P> {
    pub fn attach(hw: P, firmware: Vec<u8>, config: DeviceConfig) -> Result<Self> {
        let atom = AtomContext::attach_with_config(firmware, config.interpreter.clone())?;

        // Content revisions above 1 of the service table no longer implement link training.
        let use_encoder_service = !atom
            .command_header(CommandTable::DpEncoderService.index())
            .is_some_and(|header| header.content_revision > 1);
        debug!(dce = ?config.dce, use_encoder_service, "display device attached");

        Ok(Self {
            hw,
            atom,
            connectors: Default::default(),
            config,
            use_encoder_service,
        })
    }

    pub fn hw(&self) -> &P {
        &self.hw
    }

    pub fn hw_mut(&mut self) -> &mut P {
        &mut self.hw
    }

    pub fn atom(&self) -> &AtomContext {
        &self.atom
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    pub fn use_encoder_service(&self) -> bool {
        self.use_encoder_service
    }

    pub fn add_connector(&mut self, info: ConnectorInfo) -> Result<ConnectorId> {
        let slot = self
            .connectors
            .iter()
            .position(Option::is_none)
            .ok_or(LinkError::ConnectorsFull {
                capacity: MAX_CONNECTORS,
            })?;
        self.connectors[slot] = Some(Connector {
            info,
            link: LinkConfig {
                use_encoder_service: self.use_encoder_service,
                ..LinkConfig::default()
            },
            last_trace: Vec::new(),
        });
        Ok(ConnectorId(slot as u8))
    }

    pub fn connector(&self, id: ConnectorId) -> Result<&Connector> {
        self.connectors
            .get(usize::from(id.0))
            .and_then(Option::as_ref)
            .ok_or(LinkError::UnknownConnector(id))
    }

    fn connector_mut(&mut self, id: ConnectorId) -> Result<&mut Connector> {
        self.connectors
            .get_mut(usize::from(id.0))
            .and_then(Option::as_mut)
            .ok_or(LinkError::UnknownConnector(id))
    }

    /// Runs a command table by index. `params` is both input and output.
    pub fn execute(&mut self, table: u16, params: &mut [u32]) -> Result<Outcome> {
        Ok(self.atom.execute(&mut self.hw, table, params)?)
    }

    fn with_aux<T>(
        &mut self,
        id: ConnectorId,
        f: impl FnOnce(&mut AuxChannel<'_, P>) -> Result<T>,
    ) -> Result<T> {
        let info = self.connector(id)?.info;
        let mut aux = AuxChannel::new(
            &mut self.atom,
            &mut self.hw,
            info.channel,
            info.hpd,
            self.config.dce,
            &self.config.aux,
        );
        f(&mut aux)
    }

    pub fn transact(&mut self, id: ConnectorId, request: &AuxRequest<'_>) -> Result<AuxReply> {
        self.with_aux(id, |aux| Ok(aux.transact(request)?))
    }

    pub fn dpcd_read(&mut self, id: ConnectorId, address: u16, out: &mut [u8]) -> Result<usize> {
        self.with_aux(id, |aux| Ok(aux.dpcd_read(address, out)?))
    }

    pub fn dpcd_write(&mut self, id: ConnectorId, address: u16, data: &[u8]) -> Result<()> {
        self.with_aux(id, |aux| Ok(aux.dpcd_write(address, data)?))
    }

    pub fn dpcd_read_byte(&mut self, id: ConnectorId, address: u16) -> Result<u8> {
        self.with_aux(id, |aux| Ok(aux.dpcd_read_byte(address)?))
    }

    pub fn dpcd_write_byte(&mut self, id: ConnectorId, address: u16, value: u8) -> Result<()> {
        self.with_aux(id, |aux| Ok(aux.dpcd_write_byte(address, value)?))
    }

    pub fn i2c_transfer(
        &mut self,
        id: ConnectorId,
        address: u8,
        mode: I2cMode,
        byte: u8,
    ) -> Result<u8> {
        self.with_aux(id, |aux| Ok(aux.i2c_transfer(address, mode, byte)?))
    }

    /// Reads the receiver capability block and stores it on the connector.
    pub fn probe(&mut self, id: ConnectorId) -> Result<SinkCaps> {
        let mut caps = SinkCaps::default();
        self.with_aux(id, |aux| Ok(aux.dpcd_read(0, &mut caps.0)?))?;
        debug!(
            connector = id.0,
            revision = caps.revision(),
            rate = caps.max_link_rate_code(),
            lanes = caps.max_lane_count(),
            "sink capabilities"
        );
        self.connector_mut(id)?.link.caps = caps;
        Ok(caps)
    }

    pub fn read_edid(&mut self, id: ConnectorId) -> Result<Edid> {
        let max = self.config.aux.max_edid_extensions;
        self.with_aux(id, |aux| aux.read_edid(max))
    }

    /// Wakes the sink using the last probed capabilities.
    pub fn power_up_sink(&mut self, id: ConnectorId) -> Result<()> {
        let caps = self.connector(id)?.link.caps;
        let training = self.config.training.clone();
        self.with_aux(id, |aux| power_up_sink(aux, &caps, &training))
    }

    /// Probes the sink, picks lanes and rate for the mode and trains the link.
    ///
    /// The connector's negotiated lanes and rate only change when training succeeds.
    pub fn train_link(
        &mut self,
        id: ConnectorId,
        pixel_clock_khz: u32,
        bpp: u32,
    ) -> Result<NegotiatedLink> {
        let caps = self.probe(id)?;
        if caps.0[usize::from(MAX_LANE_COUNT)] & LANE_COUNT_MASK == 0 {
            return Err(TrainError::NoLanes.into());
        }

        let info = self.connector(id)?.info;
        let panel_mode = info.panel_mode.for_sink(&caps);
        let lanes = select_lane_count(&caps, pixel_clock_khz, bpp);
        let rate_khz = select_link_rate(&caps, self.config.source_caps, pixel_clock_khz, bpp, lanes);
        let source = SourceControl {
            dce: self.config.dce,
            use_encoder_service: self.use_encoder_service,
            dig: info.dig,
            link_b: info.link_b,
            transmitter: info.transmitter,
            hpd: info.hpd,
            pixel_clock_khz,
            bpc: (bpp / 3) as u8,
            lanes,
            rate_khz,
        };
        info!(connector = id.0, lanes, rate_khz, ?panel_mode, "training link");

        let mut aux = AuxChannel::new(
            &mut self.atom,
            &mut self.hw,
            info.channel,
            info.hpd,
            self.config.dce,
            &self.config.aux,
        );
        let mut trainer = LinkTrainer::new(
            &mut aux,
            source,
            caps,
            self.config.source_caps,
            panel_mode,
            &self.config.training,
        );
        let result = trainer.run();
        let trace = trainer.trace().to_vec();
        let train_set = trainer.train_set();
        let status = trainer.status();
        let retries = trainer.adjustments();

        let connector = self.connector_mut(id)?;
        connector.last_trace = trace.clone();
        result?;

        connector.link.lanes = lanes;
        connector.link.rate_khz = rate_khz;
        connector.link.train_set = train_set;
        connector.link.status = status;
        connector.link.retries = retries;
        Ok(NegotiatedLink {
            lanes,
            rate_khz,
            trace,
        })
    }
}
