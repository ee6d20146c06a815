//! Fixups for connector records that firmware gets wrong or encodes per generation.

use tracing::debug;

use crate::config::DceVersion;

const HPD_GPIO_DCE6: u32 = 0x65B4;
const HPD_GPIO_DCE4: u32 = 0x64B4;
const HPD_GPIO_LEGACY: u32 = 0x7E94;

/// GPIO masks of HPD pins 0 through 5.
const HPD_MASKS: [u32; 6] = [1 << 0, 1 << 8, 1 << 16, 1 << 24, 1 << 26, 1 << 28];

/// GPIO register that carries the HPD pins on this generation.
pub fn hpd_gpio_register(dce: DceVersion) -> u32 {
    if dce.is_dce6() {
        HPD_GPIO_DCE6
    } else if dce.is_dce4() {
        HPD_GPIO_DCE4
    } else {
        HPD_GPIO_LEGACY
    }
}

/// HPD pin id of a connector's GPIO pin record, or `None` when the record is not an HPD pin.
pub fn hpd_from_gpio(dce: DceVersion, register: u32, mask: u32) -> Option<u8> {
    if register != hpd_gpio_register(dce) {
        return None;
    }
    HPD_MASKS
        .iter()
        .position(|&m| m == mask)
        .map(|pin| pin as u8)
}

/// An AUX/DDC channel record as read from the firmware's GPIO I2C table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelRecord {
    /// Position of the record in the table.
    pub index: u8,
    pub clock_mask_register: u16,
    /// Raw access byte; the low bits are the hardware channel id.
    pub access: u8,
}

/// Returns the access byte with known bad records corrected.
pub fn fixup_channel(dce: DceVersion, record: ChannelRecord) -> u8 {
    let fixed = match record {
        ChannelRecord {
            index: 7,
            clock_mask_register: 0x1936,
            access: 0,
        } if dce.is_dce4() => 0x97,
        ChannelRecord {
            index: 4,
            clock_mask_register: 0x1FDA,
            access: 0x94,
        } if dce.is_dce3() => 0x14,
        _ => record.access,
    };
    if fixed != record.access {
        debug!(
            index = record.index,
            from = record.access,
            to = fixed,
            "corrected channel record"
        );
    }
    fixed
}
