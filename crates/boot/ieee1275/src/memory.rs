//! Physical memory claims.

use crate::client::{Client, EntryPoint};
use crate::error::{Error, Result};
use crate::tree::INVALID_CELL;

const MIB: usize = 1024 * 1024;

impl<E: EntryPoint> Client<E> {
    /// Claims `size` bytes of physical memory.
    ///
    /// With `align` zero firmware must place the region exactly at `hint`;
    /// otherwise it picks a base that is a multiple of `align` and ignores
    /// the hint.
    ///
    /// # Errors
    ///
    /// Transport failure, or [`Error::ClaimFailed`] if firmware could not
    /// satisfy the request.
    pub fn claim(&self, hint: usize, size: usize, align: usize) -> Result<usize> {
        let rets = self.call(c"claim", &[hint, size, align], 1)?;
        match rets.get(0) {
            INVALID_CELL => Err(Error::ClaimFailed),
            base => {
                log::debug!(
                    "ieee1275: claimed {:#x} - {:#x} ({} MiB, {} MiB rounded up)",
                    base,
                    base.wrapping_add(size),
                    size / MIB,
                    size.div_ceil(MIB),
                );
                Ok(base)
            }
        }
    }

    /// Returns a region obtained from [`claim`](Self::claim).
    ///
    /// # Errors
    ///
    /// Transport failure only.
    pub fn release(&self, addr: usize, size: usize) -> Result<()> {
        self.call(c"release", &[addr, size], 0).map(drop)
    }
}
