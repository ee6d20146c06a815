use atom_link::dp_link::test_utils::{SimFirmware, SimPlatform, SimSink};
use atom_link::dp_link::{
    dpcd::LINK_RATE_2_70, ClockRecoveryFailure, ConnectorInfo, DeviceConfig, DisplayDevice,
    LinkError, TrainError, TrainingState,
};
use pretty_assertions::assert_eq;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

fn four_lane_hbr_sink() -> SimSink {
    let mut sink = SimSink::new(LINK_RATE_2_70, 4);
    sink.channel = 1;
    sink
}

fn attach(sink: SimSink) -> anyhow::Result<(DisplayDevice<SimPlatform>, atom_link::ConnectorId)> {
    let mut dev = DisplayDevice::attach(
        SimPlatform::new(sink),
        SimFirmware::new().build(),
        DeviceConfig::default(),
    )?;
    let id = dev.add_connector(ConnectorInfo {
        channel: 1,
        hpd: Some(0),
        ..ConnectorInfo::default()
    })?;
    Ok((dev, id))
}

#[test]
fn trains_two_lanes_at_rbr() -> anyhow::Result<()> {
    init_tracing();
    let mut sink = four_lane_hbr_sink();
    sink.cr_after = Some(2);
    sink.eq_after = Some(1);
    let (mut dev, id) = attach(sink)?;

    let link = dev.train_link(id, 100_000, 24)?;
    assert_eq!(link.lanes, 2);
    assert_eq!(link.rate_khz, 162_000);
    assert_eq!(
        link.trace,
        vec![
            TrainingState::Idle,
            TrainingState::ClockRecovery,
            TrainingState::ChannelEqualization,
            TrainingState::Trained,
        ]
    );

    let connector = dev.connector(id)?;
    assert!(connector.link.is_trained());
    assert_eq!(connector.link.status.0[2] & 1, 1);
    Ok(())
}

#[test]
fn sleeps_follow_the_training_intervals() -> anyhow::Result<()> {
    let mut sink = four_lane_hbr_sink();
    sink.cr_after = Some(2);
    let (mut dev, id) = attach(sink)?;
    dev.train_link(id, 100_000, 24)?;

    // power-up, CR settle, two CR polls, one EQ poll, finish settle
    assert_eq!(
        dev.hw().delay.waits_us(),
        &[1000, 400, 100, 100, 400, 400]
    );
    Ok(())
}

#[test]
fn advertised_read_interval_is_in_four_millisecond_units() -> anyhow::Result<()> {
    let mut sink = four_lane_hbr_sink();
    sink.dpcd[0x0E] = 2;
    let (mut dev, id) = attach(sink)?;
    dev.train_link(id, 100_000, 24)?;

    assert_eq!(
        dev.hw().delay.waits_us(),
        &[1000, 400, 8000, 8000, 400]
    );
    Ok(())
}

#[test]
fn constant_swing_request_exhausts_clock_recovery() -> anyhow::Result<()> {
    init_tracing();
    let mut sink = four_lane_hbr_sink();
    sink.cr_after = None;
    let (mut dev, id) = attach(sink)?;

    let err = dev.train_link(id, 100_000, 24).unwrap_err();
    assert_eq!(
        err,
        LinkError::Training(TrainError::ClockRecovery {
            reason: ClockRecoveryFailure::SameSwing,
            adjustments: 5,
        })
    );
    assert_eq!(
        dev.connector(id)?.last_trace().last(),
        Some(&TrainingState::Aborted)
    );
    assert!(!dev.connector(id)?.link.is_trained());
    Ok(())
}
