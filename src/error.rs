use alloc::borrow::Cow;
use core::fmt::{Debug, Display};

/// Error types used throughout the `hotpatch_core` library.
///
/// Only failures that a caller may want to inspect are represented here.
/// Deallocating a block the allocator does not own and missing a symbol
/// lookup are ordinary outcomes and are reported through `bool`/`Option`.
#[derive(Debug)]
pub enum Error {
    /// An error occurred while querying a file.
    ///
    /// This error typically indicates issues such as:
    /// * File not found
    /// * Permission denied
    /// * A path that cannot be passed to the OS (interior NUL byte)
    Io {
        /// A descriptive message about the I/O error.
        msg: Cow<'static, str>,
    },

    /// An OS memory mapping call failed outright.
    Mmap {
        /// A descriptive message about the memory mapping error.
        msg: Cow<'static, str>,
    },

    /// No address range could be reserved where it was needed.
    ///
    /// Raised when every probe up to the retry ceiling failed, when the probe
    /// walked off either end of the address space, or when a fresh trampoline
    /// page could not be placed inside the jump range of its target.
    AddressSpace {
        /// A descriptive message about the exhausted search.
        msg: Cow<'static, str>,
    },

    /// The general heap refused to back a new allocator page.
    OutOfMemory {
        /// A descriptive message about the failed allocation.
        msg: Cow<'static, str>,
    },

    /// A request broke the calling contract in a way that can be detected,
    /// such as a zero-sized reservation or an inconsistent configuration.
    InvalidArgument {
        /// A descriptive message about the rejected argument.
        msg: Cow<'static, str>,
    },

    /// An error occurred in a user-defined backend or handler.
    Custom {
        /// A descriptive message about the custom error.
        msg: Cow<'static, str>,
    },
}

impl Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Error::Io { msg } => write!(f, "I/O error: {msg}"),
            Error::Mmap { msg } => write!(f, "Memory mapping error: {msg}"),
            Error::AddressSpace { msg } => write!(f, "Address space error: {msg}"),
            Error::OutOfMemory { msg } => write!(f, "Out of memory: {msg}"),
            Error::InvalidArgument { msg } => write!(f, "Invalid argument: {msg}"),
            Error::Custom { msg } => write!(f, "Custom error: {msg}"),
        }
    }
}

impl core::error::Error for Error {}

/// Creates an I/O error with the specified message.
#[cold]
#[inline(never)]
#[allow(unused)]
pub(crate) fn io_error(msg: impl Into<Cow<'static, str>>) -> Error {
    Error::Io { msg: msg.into() }
}

/// Creates a memory mapping error with the specified message.
#[cold]
#[inline(never)]
#[allow(unused)]
pub(crate) fn mmap_error(msg: impl Into<Cow<'static, str>>) -> Error {
    Error::Mmap { msg: msg.into() }
}

/// Creates an address space exhaustion error with the specified message.
#[cold]
#[inline(never)]
pub(crate) fn address_space_error(msg: impl Into<Cow<'static, str>>) -> Error {
    Error::AddressSpace { msg: msg.into() }
}

/// Creates a heap exhaustion error with the specified message.
#[cold]
#[inline(never)]
pub(crate) fn out_of_memory_error(msg: impl Into<Cow<'static, str>>) -> Error {
    Error::OutOfMemory { msg: msg.into() }
}

/// Creates a contract violation error with the specified message.
#[cold]
#[inline(never)]
pub(crate) fn invalid_argument(msg: impl Into<Cow<'static, str>>) -> Error {
    Error::InvalidArgument { msg: msg.into() }
}

/// Creates a custom error with the specified message.
///
/// This is a convenience function for creating `Error::Custom` variants,
/// intended for user-provided [`Mmap`](crate::os::Mmap) backends.
///
/// # Arguments
/// * `msg` - The error message.
///
/// # Returns
/// An `Error::Custom` variant with the specified message.
#[cold]
#[inline(never)]
pub fn custom_error(msg: impl Into<Cow<'static, str>>) -> Error {
    Error::Custom { msg: msg.into() }
}
