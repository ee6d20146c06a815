use std::time::Duration;

/// Blocking settle-time waits.
///
/// Hardware link training is "write, wait, read status"; the waits are thread-blocking by
/// contract, so this is a plain synchronous trait.
pub trait Delay {
    fn delay_us(&mut self, us: u32);

    fn delay_ms(&mut self, ms: u32) {
        self.delay_us(ms.saturating_mul(1000));
    }
}

impl<T: Delay + ?Sized> Delay for &mut T {
    fn delay_us(&mut self, us: u32) {
        (**self).delay_us(us)
    }

    fn delay_ms(&mut self, ms: u32) {
        (**self).delay_ms(ms)
    }
}

/// Sleeps the calling thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdDelay;

impl Delay for StdDelay {
    fn delay_us(&mut self, us: u32) {
        std::thread::sleep(Duration::from_micros(u64::from(us)));
    }

    fn delay_ms(&mut self, ms: u32) {
        std::thread::sleep(Duration::from_millis(u64::from(ms)));
    }
}

/// Does not sleep; records every requested wait in microseconds.
#[derive(Debug, Default, Clone)]
pub struct RecordingDelay {
    waits_us: Vec<u64>,
}

impl RecordingDelay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn waits_us(&self) -> &[u64] {
        &self.waits_us
    }

    pub fn total_us(&self) -> u64 {
        self.waits_us.iter().sum()
    }

    pub fn clear(&mut self) {
        self.waits_us.clear();
    }
}

impl Delay for RecordingDelay {
    fn delay_us(&mut self, us: u32) {
        self.waits_us.push(u64::from(us));
    }

    fn delay_ms(&mut self, ms: u32) {
        self.waits_us.push(u64::from(ms) * 1000);
    }
}
