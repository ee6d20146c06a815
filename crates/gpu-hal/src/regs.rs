use std::collections::BTreeMap;

/// Logical register subsystem.
///
/// Offsets in the general, CRTC and DAC spaces are byte offsets. PLL and memory controller
/// offsets are register indices into their index/data pairs; PCI configuration and system I/O
/// offsets are port addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RegisterSpace {
    /// Main MMIO aperture (GPIO, AUX engines, encoders).
    General,
    /// CRT timing controller block.
    Crtc,
    /// Video DAC block.
    Dac,
    /// Clock synthesizer (PLL) indexed registers.
    Pll,
    /// Memory controller indexed registers.
    MemoryController,
    /// PCI configuration space of the adapter function.
    PciConfig,
    /// Legacy system I/O ports.
    SystemIo,
}

/// Tagged 32-bit register access.
///
/// Reads take `&mut self` because real register reads can have side effects (e.g. clear-on-read
/// status bits, or a simulated device advancing its state).
pub trait RegisterAccess {
    fn read(&mut self, space: RegisterSpace, offset: u32) -> u32;
    fn write(&mut self, space: RegisterSpace, offset: u32, value: u32);

    /// Read-modify-write that only changes the bits set in `mask`.
    fn write_masked(&mut self, space: RegisterSpace, offset: u32, value: u32, mask: u32) {
        let old = self.read(space, offset);
        self.write(space, offset, (old & !mask) | (value & mask));
    }
}

impl<T: RegisterAccess + ?Sized> RegisterAccess for &mut T {
    fn read(&mut self, space: RegisterSpace, offset: u32) -> u32 {
        (**self).read(space, offset)
    }

    fn write(&mut self, space: RegisterSpace, offset: u32, value: u32) {
        (**self).write(space, offset, value)
    }

    fn write_masked(&mut self, space: RegisterSpace, offset: u32, value: u32, mask: u32) {
        (**self).write_masked(space, offset, value, mask)
    }
}

/// One write observed by a [`RegisterFile`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterWrite {
    pub space: RegisterSpace,
    pub offset: u32,
    pub value: u32,
}

/// Sparse in-memory register backend.
///
/// Unwritten registers read as the configured fill value. Every write is appended to a log so
/// callers can assert on ordering as well as final state.
#[derive(Debug, Clone, Default)]
pub struct RegisterFile {
    values: BTreeMap<(RegisterSpace, u32), u32>,
    fill: u32,
    log: Vec<RegisterWrite>,
}

impl RegisterFile {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers that were never written read back as `fill`.
    pub fn with_fill(fill: u32) -> Self {
        Self {
            fill,
            ..Self::default()
        }
    }

    /// Sets a register without recording it in the write log.
    pub fn preload(&mut self, space: RegisterSpace, offset: u32, value: u32) {
        self.values.insert((space, offset), value);
    }

    pub fn get(&self, space: RegisterSpace, offset: u32) -> u32 {
        self.values
            .get(&(space, offset))
            .copied()
            .unwrap_or(self.fill)
    }

    pub fn writes(&self) -> &[RegisterWrite] {
        &self.log
    }

    pub fn writes_to(
        &self,
        space: RegisterSpace,
        offset: u32,
    ) -> impl Iterator<Item = u32> + '_ {
        self.log
            .iter()
            .filter(move |w| w.space == space && w.offset == offset)
            .map(|w| w.value)
    }

    pub fn clear_log(&mut self) {
        self.log.clear();
    }
}

impl RegisterAccess for RegisterFile {
    fn read(&mut self, space: RegisterSpace, offset: u32) -> u32 {
        self.get(space, offset)
    }

    fn write(&mut self, space: RegisterSpace, offset: u32, value: u32) {
        self.values.insert((space, offset), value);
        self.log.push(RegisterWrite {
            space,
            offset,
            value,
        });
    }
}
