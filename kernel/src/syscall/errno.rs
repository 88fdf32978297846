//! Kernel error codes
//!
//! Every syscall either succeeds with a non-negative value or fails with one
//! of these codes, returned negated in the result register.

use core::fmt;

/// Errors returned by kernel operations and system calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum Error {
    /// Unspecified or unknown problem
    Unspecified = 1,
    /// Environment doesn't exist or otherwise cannot be used
    BadEnv = 2,
    /// Invalid parameter
    Inval = 3,
    /// Request failed due to memory shortage
    NoMem = 4,
    /// Attempt to create a new environment beyond the maximum allowed
    NoFreeEnv = 5,
    /// Memory fault
    Fault = 6,
    /// Function not implemented
    NoSys = 7,
}

impl Error {
    /// Value returned in the result register for this error.
    pub const fn errno(self) -> i64 {
        -(self as i32 as i64)
    }

    /// Decode a negative syscall result back into an error.
    pub fn from_errno(value: i64) -> Option<Self> {
        match -value {
            1 => Some(Error::Unspecified),
            2 => Some(Error::BadEnv),
            3 => Some(Error::Inval),
            4 => Some(Error::NoMem),
            5 => Some(Error::NoFreeEnv),
            6 => Some(Error::Fault),
            7 => Some(Error::NoSys),
            _ => None,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Error::Unspecified => "unspecified error",
            Error::BadEnv => "bad environment",
            Error::Inval => "invalid parameter",
            Error::NoMem => "out of memory",
            Error::NoFreeEnv => "out of environments",
            Error::Fault => "segmentation fault",
            Error::NoSys => "function not implemented",
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Encode a syscall result for the result register.
pub fn encode(result: Result<u64, Error>) -> i64 {
    match result {
        Ok(value) => value as i64,
        Err(e) => e.errno(),
    }
}

/// Decode a result register value.
///
/// Unknown negative values decode as [`Error::Unspecified`].
pub fn decode(value: i64) -> Result<u64, Error> {
    if value < 0 {
        Err(Error::from_errno(value).unwrap_or(Error::Unspecified))
    } else {
        Ok(value as u64)
    }
}
