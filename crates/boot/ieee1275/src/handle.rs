//! Firmware-owned handle types.
//!
//! Both handles are opaque cells minted by firmware. This layer never
//! fabricates one; it only relays what firmware returned.

use core::fmt;

use crate::Cell;

/// Handle to a device-tree node (a *package*).
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Phandle(Cell);

impl Phandle {
    /// The all-ones value firmware uses for "no such node".
    pub const INVALID: Self = Self(Cell::MAX);

    /// Wraps a raw cell returned by firmware.
    #[must_use]
    pub const fn from_raw(raw: Cell) -> Self {
        Self(raw)
    }

    /// Returns the raw cell.
    #[must_use]
    pub const fn as_raw(self) -> Cell {
        self.0
    }
}

/// Handle to an open device instance.
///
/// Closing the instance ends its validity; nothing on this side can observe
/// that, so a stale handle is simply passed through to firmware.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ihandle(Cell);

impl Ihandle {
    /// The zero value firmware uses for "open failed".
    pub const INVALID: Self = Self(0);

    /// Wraps a raw cell returned by firmware.
    #[must_use]
    pub const fn from_raw(raw: Cell) -> Self {
        Self(raw)
    }

    /// Returns the raw cell.
    #[must_use]
    pub const fn as_raw(self) -> Cell {
        self.0
    }
}

impl fmt::Debug for Phandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Phandle({:#x})", self.0)
    }
}

impl fmt::Debug for Ihandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ihandle({:#x})", self.0)
    }
}
