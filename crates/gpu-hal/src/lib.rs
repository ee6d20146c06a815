//! Hardware seams for the display link layer.
//!
//! Everything above this crate touches the adapter through two narrow traits:
//!
//! - [`RegisterAccess`]: tagged 32-bit register reads/writes over the adapter's logical
//!   subsystems (general MMIO, CRTC, DAC, PLL, memory controller, PCI config, system I/O).
//! - [`Delay`]: blocking settle-time waits (link training and firmware tables both sleep).
//!
//! A type that implements both is a [`Platform`]. Production code pairs a real MMIO mapping with
//! [`StdDelay`]; tests use [`RegisterFile`] and [`RecordingDelay`] so every access and every
//! sleep is observable.

#![forbid(unsafe_code)]

mod delay;
mod regs;

pub use delay::{Delay, RecordingDelay, StdDelay};
pub use regs::{RegisterAccess, RegisterFile, RegisterSpace, RegisterWrite};

/// Register access plus blocking delays: the full set of hardware services the interpreter and
/// link trainer need.
pub trait Platform: RegisterAccess + Delay {}

impl<T: RegisterAccess + Delay + ?Sized> Platform for T {}

/// Pairs an independent register backend with an independent delay source.
#[derive(Debug, Default, Clone)]
pub struct HostPlatform<R, D> {
    pub regs: R,
    pub delay: D,
}

impl<R, D> HostPlatform<R, D> {
    pub fn new(regs: R, delay: D) -> Self {
        Self { regs, delay }
    }
}

impl<R: RegisterAccess, D> RegisterAccess for HostPlatform<R, D> {
    fn read(&mut self, space: RegisterSpace, offset: u32) -> u32 {
        self.regs.read(space, offset)
    }

    fn write(&mut self, space: RegisterSpace, offset: u32, value: u32) {
        self.regs.write(space, offset, value)
    }

    fn write_masked(&mut self, space: RegisterSpace, offset: u32, value: u32, mask: u32) {
        self.regs.write_masked(space, offset, value, mask)
    }
}

impl<R, D: Delay> Delay for HostPlatform<R, D> {
    fn delay_us(&mut self, us: u32) {
        self.delay.delay_us(us)
    }

    fn delay_ms(&mut self, ms: u32) {
        self.delay.delay_ms(ms)
    }
}
