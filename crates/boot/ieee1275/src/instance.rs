//! Instance I/O on open devices.

use core::ffi::CStr;

use crate::client::{Client, EntryPoint};
use crate::error::{Error, Result};
use crate::frame::ptr_cell;
use crate::{Cell, Ihandle};

/// Splits a 64-bit position into `(high, low)` cells of `cell_bits` width.
///
/// With cells of 64 bits or more the whole position travels in the low
/// cell and the high cell is zero.
#[must_use]
pub const fn split_position(position: u64, cell_bits: u32) -> (u64, u64) {
    if cell_bits >= 64 {
        (0, position)
    } else {
        (position >> cell_bits, position & ((1u64 << cell_bits) - 1))
    }
}

impl<E: EntryPoint> Client<E> {
    /// Opens the device at `path`.
    ///
    /// # Errors
    ///
    /// Transport failure, or [`Error::InvalidIhandle`] if firmware could not
    /// open it.
    pub fn open(&self, path: &CStr) -> Result<Ihandle> {
        let rets = self.call(c"open", &[ptr_cell(path.as_ptr())], 1)?;
        match Ihandle::from_raw(rets.get(0)) {
            Ihandle::INVALID => Err(Error::InvalidIhandle),
            ihandle => Ok(ihandle),
        }
    }

    /// Closes an open instance.
    ///
    /// # Errors
    ///
    /// Transport failure only.
    pub fn close(&self, ihandle: Ihandle) -> Result<()> {
        self.call(c"close", &[ihandle.as_raw()], 0).map(drop)
    }

    /// Reads up to `buf.len()` bytes at the instance's position and returns
    /// what firmware reports: the byte count, possibly short, or a negative
    /// device status.
    ///
    /// # Errors
    ///
    /// Transport failure only.
    pub fn read(&self, ihandle: Ihandle, buf: &mut [u8]) -> Result<isize> {
        let rets = self.call(
            c"read",
            &[ihandle.as_raw(), ptr_cell(buf.as_mut_ptr()), buf.len()],
            1,
        )?;
        Ok(rets.get(0) as isize)
    }

    /// Writes `buf` at the instance's position and returns the byte count
    /// firmware reports, possibly short, or a negative device status.
    ///
    /// # Errors
    ///
    /// Transport failure only.
    pub fn write(&self, ihandle: Ihandle, buf: &[u8]) -> Result<isize> {
        let rets = self.call(
            c"write",
            &[ihandle.as_raw(), ptr_cell(buf.as_ptr()), buf.len()],
            1,
        )?;
        Ok(rets.get(0) as isize)
    }

    /// Moves the instance to byte `position` and returns firmware's status
    /// (zero on success, -1 on failure).
    ///
    /// # Errors
    ///
    /// Transport failure only.
    pub fn seek(&self, ihandle: Ihandle, position: u64) -> Result<isize> {
        let (high, low) = split_position(position, Cell::BITS);
        // Each half fits in a cell by construction.
        let rets = self.call(
            c"seek",
            &[ihandle.as_raw(), high as Cell, low as Cell],
            1,
        )?;
        Ok(rets.get(0) as isize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Phandle;
    use crate::sim::SimFirmware;

    fn disk() -> (SimFirmware, Phandle) {
        let sim = SimFirmware::new();
        let disk = sim.add_node(sim.root(), "disk");
        sim.set_contents(disk, b"0123456789");
        (sim, disk)
    }

    #[test]
    fn split_on_narrow_cells() {
        assert_eq!(split_position(0x1_0000_0001, 32), (1, 1));
        assert_eq!(split_position(0xffff_ffff, 32), (0, 0xffff_ffff));
        assert_eq!(split_position(0xdead_beef_0000_0010, 32), (0xdead_beef, 0x10));
    }

    #[test]
    fn no_split_on_wide_cells() {
        assert_eq!(split_position(0x1_0000_0001, 64), (0, 0x1_0000_0001));
        assert_eq!(split_position(u64::MAX, 64), (0, u64::MAX));
    }

    #[test]
    fn open_and_close() {
        let (sim, _) = disk();
        let of = Client::new(&sim);
        let ih = of.open(c"/disk").unwrap();
        assert!(sim.is_open(ih));
        of.close(ih).unwrap();
        assert!(!sim.is_open(ih));
        assert_eq!(of.open(c"/tape"), Err(Error::InvalidIhandle));
    }

    #[test]
    fn short_read_is_reported_not_failed() {
        let (sim, _) = disk();
        let of = Client::new(&sim);
        let ih = of.open(c"/disk").unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(of.read(ih, &mut buf), Ok(4));
        assert_eq!(&buf, b"0123");

        assert_eq!(of.seek(ih, 8), Ok(0));
        assert_eq!(of.read(ih, &mut buf), Ok(2));
        assert_eq!(&buf[..2], b"89");
        assert_eq!(of.read(ih, &mut buf), Ok(0));
    }

    #[test]
    fn write_then_read_back() {
        let (sim, node) = disk();
        let of = Client::new(&sim);
        let ih = of.open(c"/disk").unwrap();
        assert_eq!(of.seek(ih, 2), Ok(0));
        assert_eq!(of.write(ih, b"ab"), Ok(2));
        assert_eq!(sim.contents(node), b"01ab456789");
        assert_eq!(sim.position(ih), Some(4));
    }

    #[test]
    fn seek_past_end_reports_firmware_status() {
        let (sim, _) = disk();
        let of = Client::new(&sim);
        let ih = of.open(c"/disk").unwrap();
        assert_eq!(of.seek(ih, 0x1_0000_0001), Ok(-1));
        let call = sim.calls().pop().unwrap();
        let (high, low) = split_position(0x1_0000_0001, Cell::BITS);
        assert_eq!(call.args, [ih.as_raw(), high as Cell, low as Cell]);
    }

    #[test]
    fn transport_failures() {
        let (sim, _) = disk();
        let of = Client::new(&sim);
        let ih = of.open(c"/disk").unwrap();

        sim.fail_transport(c"open");
        assert!(of.open(c"/disk").unwrap_err().is_transport());
        sim.fail_transport(c"read");
        assert!(of.read(ih, &mut [0; 2]).unwrap_err().is_transport());
        sim.fail_transport(c"write");
        assert!(of.write(ih, b"x").unwrap_err().is_transport());
        sim.fail_transport(c"seek");
        assert!(of.seek(ih, 0).unwrap_err().is_transport());
        sim.fail_transport(c"close");
        assert!(of.close(ih).unwrap_err().is_transport());
    }
}
