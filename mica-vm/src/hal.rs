//! Host abstraction layer.
//!
//! The interpreter reaches its host exclusively through this trait:
//! console bytes go out through `write`/`flush`, the scheduler parks the
//! CPU through `idle_cpu`, and bare-metal ports gate their timer interrupt
//! around critical sections with `enable_irq`/`disable_irq`. The default
//! implementations are no-ops so hosted targets only supply `write`.

/// Host hooks the interpreter requires.
pub trait Hal {
    /// One-time hardware bring-up; called during runtime construction.
    fn init(&mut self) {}

    /// Write bytes to a host descriptor; descriptor 1 is the console.
    fn write(&mut self, fd: i32, buf: &[u8]);

    /// Flush a host descriptor.
    fn flush(&mut self, _fd: i32) {}

    /// Park the CPU until the next interrupt.
    fn idle_cpu(&mut self) {}

    /// Unmask the timer interrupt.
    fn enable_irq(&mut self) {}

    /// Mask the timer interrupt.
    fn disable_irq(&mut self) {}
}

/// HAL for hosted targets: console bytes go to standard output.
#[cfg(feature = "std")]
#[derive(Debug, Default)]
pub struct StdHal;

#[cfg(feature = "std")]
impl Hal for StdHal {
    fn write(&mut self, _fd: i32, buf: &[u8]) {
        use std::io::Write;
        let _ = std::io::stdout().write_all(buf);
    }

    fn flush(&mut self, _fd: i32) {
        use std::io::Write;
        let _ = std::io::stdout().flush();
    }

    fn idle_cpu(&mut self) {
        std::thread::yield_now();
    }
}

/// Test HAL: captures console bytes and, when given a ticker, advances the
/// scheduler clock each time the scheduler goes idle.
#[cfg(any(test, feature = "test-helpers"))]
#[derive(Debug, Default)]
pub struct CaptureHal {
    output: alloc::rc::Rc<core::cell::RefCell<alloc::vec::Vec<u8>>>,
    ticker: Option<alloc::sync::Arc<crate::scheduler::Ticker>>,
}

#[cfg(any(test, feature = "test-helpers"))]
impl CaptureHal {
    /// New capture HAL plus the shared buffer to read afterwards.
    pub fn new() -> (Self, alloc::rc::Rc<core::cell::RefCell<alloc::vec::Vec<u8>>>) {
        let hal = Self::default();
        let out = hal.output.clone();
        (hal, out)
    }

    /// Drive this ticker whenever the scheduler idles.
    pub fn with_ticker(mut self, ticker: alloc::sync::Arc<crate::scheduler::Ticker>) -> Self {
        self.ticker = Some(ticker);
        self
    }
}

#[cfg(any(test, feature = "test-helpers"))]
impl Hal for CaptureHal {
    fn write(&mut self, _fd: i32, buf: &[u8]) {
        self.output.borrow_mut().extend_from_slice(buf);
    }

    fn idle_cpu(&mut self) {
        if let Some(t) = &self.ticker {
            t.tick();
        }
    }
}
