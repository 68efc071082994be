//! Client interface error types.
//!
//! Failures come in two tiers. A *transport* failure means the entry point
//! refused the call frame outright and none of its return cells hold data.
//! A *logical* failure means firmware processed the frame, but the
//! operation's own sentinel (an invalid handle, an invalid length, a nonzero
//! catch result, a short write) says the request did not succeed.

use core::ffi::CStr;
use core::fmt;

use crate::Cell;

/// Errors returned by client interface calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The entry point returned -1 for this service.
    Transport {
        /// The client interface service that was rejected.
        service: &'static CStr,
    },
    /// Firmware answered with the all-ones phandle.
    InvalidPhandle,
    /// Firmware answered with the zero ihandle.
    InvalidIhandle,
    /// Firmware answered with the all-ones length.
    InvalidLength,
    /// `nextprop` reported that the node or the previous name does not exist.
    NoSuchProperty,
    /// `setprop` stored fewer bytes than requested.
    ShortWrite {
        /// Number of bytes handed to firmware.
        requested: usize,
        /// Number of bytes firmware reports it stored.
        actual: usize,
    },
    /// `claim` returned the all-ones base: no region satisfies the request.
    ClaimFailed,
    /// A dispatched method raised a firmware exception.
    Exception {
        /// Name of the method that threw.
        method: &'static CStr,
        /// The nonzero catch result.
        catch: Cell,
    },
    /// A unit address could not be decoded or encoded.
    OutOfRange {
        /// `decode-unit` or `encode-unit`.
        method: &'static CStr,
    },
    /// Copying firmware-owned data into local memory failed to allocate.
    OutOfMemory,
    /// A call frame needed more cells than [`MAX_CELLS`](crate::MAX_CELLS).
    FrameOverflow,
}

impl Error {
    /// Returns `true` if the entry point rejected the frame.
    #[must_use]
    pub const fn is_transport(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }

    /// Returns `true` if firmware processed the frame but reported failure.
    #[must_use]
    pub const fn is_logical(&self) -> bool {
        !matches!(
            self,
            Self::Transport { .. } | Self::OutOfMemory | Self::FrameOverflow
        )
    }
}

fn name(s: &CStr) -> &str {
    s.to_str().unwrap_or("<non-utf8>")
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport { service } => {
                write!(f, "firmware rejected `{}` call", name(service))
            }
            Self::InvalidPhandle => f.write_str("invalid phandle"),
            Self::InvalidIhandle => f.write_str("invalid ihandle"),
            Self::InvalidLength => f.write_str("invalid length"),
            Self::NoSuchProperty => f.write_str("no such property"),
            Self::ShortWrite { requested, actual } => {
                write!(f, "short property write ({actual} of {requested} bytes)")
            }
            Self::ClaimFailed => f.write_str("memory claim failed"),
            Self::Exception { method, catch } => {
                write!(f, "method `{}` threw {catch:#x}", name(method))
            }
            Self::OutOfRange { method } => write!(f, "{} failed", name(method)),
            Self::OutOfMemory => f.write_str("out of memory"),
            Self::FrameOverflow => f.write_str("call frame exceeds cell capacity"),
        }
    }
}

impl core::error::Error for Error {}

/// Result type for client interface calls.
pub type Result<T> = core::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_variants() {
        assert_eq!(
            format!("{}", Error::Transport { service: c"finddevice" }),
            "firmware rejected `finddevice` call"
        );
        assert_eq!(
            format!(
                "{}",
                Error::ShortWrite {
                    requested: 8,
                    actual: 3
                }
            ),
            "short property write (3 of 8 bytes)"
        );
        assert_eq!(
            format!(
                "{}",
                Error::Exception {
                    method: c"color!",
                    catch: 0x10
                }
            ),
            "method `color!` threw 0x10"
        );
        assert_eq!(
            format!("{}", Error::OutOfRange { method: c"decode-unit" }),
            "decode-unit failed"
        );
    }

    #[test]
    fn tiers_do_not_overlap() {
        let transport = Error::Transport { service: c"open" };
        assert!(transport.is_transport());
        assert!(!transport.is_logical());

        let range = Error::OutOfRange { method: c"decode-unit" };
        assert!(range.is_logical());
        assert!(!range.is_transport());

        assert!(!Error::OutOfMemory.is_logical());
        assert!(!Error::OutOfMemory.is_transport());
    }
}
