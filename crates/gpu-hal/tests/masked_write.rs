use gpu_hal::{Delay, HostPlatform, RecordingDelay, RegisterAccess, RegisterFile, RegisterSpace};
use proptest::prelude::*;

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 256,
        .. ProptestConfig::default()
    })]

    #[test]
    fn write_masked_only_touches_masked_bits(old in any::<u32>(), value in any::<u32>(), mask in any::<u32>()) {
        let mut regs = RegisterFile::new();
        regs.preload(RegisterSpace::Crtc, 0x6080, old);
        regs.write_masked(RegisterSpace::Crtc, 0x6080, value, mask);
        let new = regs.get(RegisterSpace::Crtc, 0x6080);
        prop_assert_eq!(new & !mask, old & !mask);
        prop_assert_eq!(new & mask, value & mask);
    }
}

#[test]
fn host_platform_forwards_registers_and_delays() {
    let mut platform = HostPlatform::new(RegisterFile::new(), RecordingDelay::new());
    platform.write(RegisterSpace::Dac, 0x7800, 0x55);
    platform.delay_us(400);
    platform.delay_ms(2);

    assert_eq!(platform.read(RegisterSpace::Dac, 0x7800), 0x55);
    assert_eq!(platform.delay.waits_us(), &[400, 2000]);
    assert_eq!(platform.delay.total_us(), 2400);
}
