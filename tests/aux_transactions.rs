use atom_link::dp_link::test_utils::{edid, SimFirmware, SimPlatform, SimReply, SimSink};
use atom_link::dp_link::{
    AuxError, AuxRequest, ConnectorInfo, DeviceConfig, DisplayDevice, LinkError,
};
use pretty_assertions::assert_eq;

fn device(sink: SimSink) -> (DisplayDevice<SimPlatform>, atom_link::ConnectorId) {
    let mut dev = DisplayDevice::attach(
        SimPlatform::new(sink),
        SimFirmware::new().build(),
        DeviceConfig::default(),
    )
    .unwrap();
    let id = dev.add_connector(ConnectorInfo::default()).unwrap();
    (dev, id)
}

#[test]
fn always_deferring_sink_gets_exactly_seven_attempts() {
    let mut sink = SimSink::new(0x0A, 4);
    sink.always = Some(SimReply::Defer);
    let (mut dev, id) = device(sink);

    assert_eq!(
        dev.dpcd_read_byte(id, 0x000),
        Err(LinkError::Aux(AuxError::RetriesExhausted { attempts: 7 }))
    );
    assert_eq!(dev.hw().sink.transactions, 7);
}

#[test]
fn busy_then_ack_succeeds_without_spending_attempts() {
    let mut sink = SimSink::new(0x0A, 4);
    sink.script.extend([SimReply::Busy; 20]);
    sink.script.extend([SimReply::Defer; 6]);
    let (mut dev, id) = device(sink);

    // 6 defers leave one attempt; 20 busy replies spend none.
    assert_eq!(dev.dpcd_read_byte(id, 0x001), Ok(0x0A));
    assert_eq!(dev.hw().sink.transactions, 27);
}

#[test]
fn timeout_is_not_retried() {
    let mut sink = SimSink::new(0x0A, 4);
    sink.script.push_back(SimReply::Timeout);
    let (mut dev, id) = device(sink);

    assert_eq!(
        dev.dpcd_read_byte(id, 0),
        Err(LinkError::Aux(AuxError::Timeout))
    );
    // The next transaction is unaffected.
    assert_eq!(dev.dpcd_read_byte(id, 0), Ok(0x12));
}

#[test]
fn request_over_sixteen_bytes_is_a_configuration_error() {
    let (mut dev, id) = device(SimSink::new(0x0A, 4));
    let mut out = [0u8; 32];
    assert_eq!(
        dev.dpcd_read(id, 0, &mut out),
        Err(LinkError::Aux(AuxError::PayloadTooLarge { len: 32 }))
    );
    let data = [0u8; 16];
    dev.transact(id, &AuxRequest::native_write(0x100, &data))
        .unwrap();
    assert_eq!(dev.hw().sink.transactions, 1);
}

#[test]
fn edid_round_trips_over_the_sideband() -> anyhow::Result<()> {
    let mut sink = SimSink::new(0x0A, 4);
    sink.edid = edid(2);
    let (mut dev, id) = device(sink);

    let edid = dev.read_edid(id)?;
    assert_eq!(edid.blocks().len(), 3);
    assert_eq!(edid.to_bytes(), dev.hw().sink.edid);
    Ok(())
}
