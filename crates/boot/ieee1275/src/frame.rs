//! Call frames.
//!
//! Every client interface request is a single array of cells handed to the
//! entry point by address:
//!
//! ```text
//! +---------+-------+-------+----------------+----------------+
//! | service | nargs | nrets | arg 0 .. arg N | ret 0 .. ret M |
//! +---------+-------+-------+----------------+----------------+
//! ```
//!
//! Firmware reads exactly `nargs` argument cells and writes exactly `nrets`
//! return cells, so the declared counts must match the cells the call site
//! lays out. [`CallFrame`] derives both counts from the values it is built
//! from, which keeps them consistent by construction.

use core::ffi::CStr;

use crate::error::{Error, Result};
use crate::Cell;

/// Number of argument plus return cells a frame can hold.
pub const MAX_CELLS: usize = 16;

/// Converts a pointer into the cell that carries it across the boundary.
#[inline]
pub(crate) fn ptr_cell<T: ?Sized>(ptr: *const T) -> Cell {
    ptr.cast::<u8>() as Cell
}

/// A single client interface request, laid out as firmware expects it.
///
/// Only the header and the first `nargs + nrets` cells are visible to
/// firmware; the remaining capacity is never read or written.
#[repr(C)]
pub struct CallFrame {
    service: Cell,
    nargs: Cell,
    nrets: Cell,
    cells: [Cell; MAX_CELLS],
    name: &'static CStr,
}

impl CallFrame {
    /// Builds a frame for `service` with the given arguments and room for
    /// `nrets` return cells, all initialised to zero.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FrameOverflow`] if the cells do not fit.
    pub fn new(service: &'static CStr, args: &[Cell], nrets: usize) -> Result<Self> {
        let nargs = args.len();
        if nargs.checked_add(nrets).is_none_or(|n| n > MAX_CELLS) {
            return Err(Error::FrameOverflow);
        }
        let mut cells = [0; MAX_CELLS];
        cells[..nargs].copy_from_slice(args);
        Ok(Self {
            service: ptr_cell(service.as_ptr()),
            nargs,
            nrets,
            cells,
            name: service,
        })
    }

    /// Seeds return cell `index` with `value` before the call.
    ///
    /// A firmware that leaves the cell untouched then reports `value`, so
    /// call sites preset their failure sentinel here. Out-of-range indices
    /// are ignored.
    #[must_use]
    pub fn with_preset(mut self, index: usize, value: Cell) -> Self {
        let (nargs, nrets) = (self.nargs, self.nrets);
        if let Some(slot) = self.cells[nargs..nargs + nrets].get_mut(index) {
            *slot = value;
        }
        self
    }

    /// The service name this frame invokes.
    #[must_use]
    pub fn service(&self) -> &'static CStr {
        self.name
    }

    /// The argument cells in call order.
    #[must_use]
    pub fn args(&self) -> &[Cell] {
        &self.cells[..self.nargs]
    }

    pub(crate) fn as_mut_ptr(&mut self) -> *mut Cell {
        core::ptr::from_mut(self).cast()
    }

    fn rets(&self) -> &[Cell] {
        &self.cells[self.nargs..self.nargs + self.nrets]
    }
}

/// Return cells of a frame that firmware accepted.
///
/// Only [`Client::invoke`](crate::Client::invoke) produces this, and only
/// when the entry point did not reject the frame.
pub struct Returns {
    frame: CallFrame,
}

impl Returns {
    pub(crate) fn new(frame: CallFrame) -> Self {
        Self { frame }
    }

    /// Returns cell `index` of the return area.
    ///
    /// # Panics
    ///
    /// Panics if `index` is not below the frame's declared return count.
    #[must_use]
    pub fn get(&self, index: usize) -> Cell {
        self.frame.rets()[index]
    }

    /// All return cells in order.
    #[must_use]
    pub fn as_slice(&self) -> &[Cell] {
        self.frame.rets()
    }
}

// ── Compile-time layout assertions ──────────────────────────────────

const _: () = {
    const CELL: usize = core::mem::size_of::<Cell>();
    assert!(core::mem::offset_of!(CallFrame, service) == 0);
    assert!(core::mem::offset_of!(CallFrame, nargs) == CELL);
    assert!(core::mem::offset_of!(CallFrame, nrets) == 2 * CELL);
    assert!(core::mem::offset_of!(CallFrame, cells) == 3 * CELL);
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_matches_arity() {
        let frame = CallFrame::new(c"getprop", &[1, 2, 3, 4], 1).unwrap();
        assert_eq!(frame.nargs, 4);
        assert_eq!(frame.nrets, 1);
        assert_eq!(frame.args(), &[1, 2, 3, 4]);
        assert_eq!(frame.rets(), &[0]);
        assert_eq!(frame.service(), c"getprop");
    }

    #[test]
    fn overflow_rejected_at_construction() {
        let args = [0; MAX_CELLS];
        assert!(CallFrame::new(c"call-method", &args, 0).is_ok());
        assert!(matches!(
            CallFrame::new(c"call-method", &args, 1),
            Err(Error::FrameOverflow)
        ));
        assert!(matches!(
            CallFrame::new(c"call-method", &[], usize::MAX),
            Err(Error::FrameOverflow)
        ));
    }

    #[test]
    fn presets_land_in_return_area() {
        let frame = CallFrame::new(c"child", &[7], 1)
            .unwrap()
            .with_preset(0, Cell::MAX)
            .with_preset(5, 9);
        assert_eq!(frame.args(), &[7]);
        assert_eq!(frame.rets(), &[Cell::MAX]);
    }

    #[test]
    fn service_cell_points_at_name() {
        let name = c"milliseconds";
        let frame = CallFrame::new(name, &[], 1).unwrap();
        assert_eq!(frame.service, name.as_ptr() as Cell);
    }
}
