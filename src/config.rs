//! Runtime configuration
//!
//! One [`Config`] is created when the patcher starts and hands out the
//! configured components. There is no process-wide configuration state.

use crate::{
    Result,
    logging::{LogFlags, LogSink, Logger},
    os::Mmap,
    reserve::ReservationConfig,
    trampoline::{TrampolineAllocator, TrampolineConfig},
};

/// Settings shared by the components of one patcher instance.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Config {
    /// Log levels passed to sinks created through [`Config::logger`].
    pub log_flags: LogFlags,
    /// Trampoline page layout and jump range.
    pub trampoline: TrampolineConfig,
    /// Probing limits for near-address reservations.
    pub reservation: ReservationConfig,
}

impl Config {
    /// Creates the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the enabled log levels.
    pub fn with_log_flags(mut self, flags: LogFlags) -> Self {
        self.log_flags = flags;
        self
    }

    /// Sets the trampoline page layout.
    pub fn with_trampoline(mut self, trampoline: TrampolineConfig) -> Self {
        self.trampoline = trampoline;
        self
    }

    /// Sets the maximum distance between a trampoline page and its callers.
    ///
    /// The default suits 32-bit relative branches; architectures with shorter
    /// branch encodings need a smaller value.
    pub fn with_jump_range(mut self, jump_range: usize) -> Self {
        self.trampoline.jump_range = jump_range;
        self
    }

    /// Sets the probing limits.
    pub fn with_reservation(mut self, reservation: ReservationConfig) -> Self {
        self.reservation = reservation;
        self
    }

    /// Creates a trampoline allocator using backend `M`.
    pub fn trampoline_allocator<M: Mmap>(&self) -> Result<TrampolineAllocator<M>> {
        TrampolineAllocator::with_config(self.trampoline, self.reservation)
    }

    /// Creates a logger writing the configured levels to `sink`.
    pub fn logger<S: LogSink>(&self, sink: S) -> Logger<S> {
        Logger::new(self.log_flags, sink)
    }
}
